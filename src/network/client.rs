use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::common::{AuctionEvent, Body, Envelope, Lot, User};
use crate::config::ClientConfig;
use crate::error::{AuctionError, AuctionResult, ErrorCategory};

use super::transport::{Transport, decode, encode};

/// Notifications buffered per subscriber before the slowest one starts lagging.
const EVENT_CAPACITY: usize = 256;

/// State the listener task writes and callers read.
#[derive(Default)]
struct Shared {
    pending: Mutex<HashMap<Uuid, oneshot::Sender<Envelope>>>,
    lots: RwLock<HashMap<String, Lot>>,
    started_at: RwLock<Option<DateTime<Utc>>>,
}

impl Shared {
    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, oneshot::Sender<Envelope>>> {
        self.pending.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn store_lot(&self, lot: Lot) {
        self.lots
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(lot.lot_id.clone(), lot);
    }

    fn mark_started(&self, at: DateTime<Utc>) {
        let mut started = self.started_at.write().unwrap_or_else(|p| p.into_inner());
        if started.is_none() {
            *started = Some(at);
        }
    }

    fn apply(&self, event: &AuctionEvent) {
        match event {
            AuctionEvent::LotUpdated { lot, .. } | AuctionEvent::AuctionEnded { lot, .. } => {
                self.store_lot(lot.clone())
            }
            AuctionEvent::AuctionStarted { at } => self.mark_started(at.unwrap_or_else(Utc::now)),
        }
    }
}

/// One user's session with the auction server.
///
/// A background listener routes responses to the request waiting on their id
/// and turns broadcasts into [`AuctionEvent`]s for subscribers. The session
/// lasts until [`ClientAgent::close`] or drop.
pub struct ClientAgent {
    user: User,
    server: SocketAddr,
    transport: Transport,
    attempts: u32,
    retry_interval: Duration,
    shared: Arc<Shared>,
    events: broadcast::Sender<AuctionEvent>,
    shutdown: watch::Sender<bool>,
}

impl ClientAgent {
    /// Binds an ephemeral socket and starts the listener. Nothing is sent yet.
    pub async fn start(config: &ClientConfig, user: User) -> AuctionResult<Self> {
        if user.username.trim().is_empty() || user.password.is_empty() {
            return Err(AuctionError::Validation(
                "username and password are required".to_string(),
            ));
        }
        let server = tokio::net::lookup_host(config.server_addr.as_str())
            .await?
            .next()
            .ok_or_else(|| {
                AuctionError::Validation(format!("cannot resolve {}", config.server_addr))
            })?;
        let local = if server.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let transport = Transport::bind(local).await?;

        let shared = Arc::new(Shared::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        tokio::spawn(listen(
            transport.clone(),
            shared.clone(),
            events.clone(),
            shutdown.subscribe(),
        ));
        log::info!(
            "Session for {} on {} talking to {server}",
            user.username,
            transport.local_addr()?
        );

        Ok(Self {
            user,
            server,
            transport,
            attempts: config.request_attempts,
            retry_interval: config.retry_interval(),
            shared,
            events,
            shutdown,
        })
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn local_addr(&self) -> AuctionResult<SocketAddr> {
        self.transport.local_addr()
    }

    /// Sends `body` as a request and waits for the matching response.
    /// A response with `success = false` becomes [`AuctionError::Rejected`].
    pub async fn request(&self, body: Body) -> AuctionResult<Envelope> {
        let response = self.exchange(Envelope::request(&self.user, body)).await?;
        if response.success {
            Ok(response)
        } else {
            Err(AuctionError::Rejected {
                kind: response.kind(),
                category: response.error.unwrap_or(ErrorCategory::State),
                reason: response.info.unwrap_or_default(),
            })
        }
    }

    /// Sends the request and resends the same datagram until a response with
    /// its id arrives or the attempts run out.
    async fn exchange(&self, envelope: Envelope) -> AuctionResult<Envelope> {
        if !self.is_open() {
            return Err(AuctionError::Closed);
        }
        let kind = envelope.kind();
        let id = envelope
            .request_id
            .ok_or_else(|| AuctionError::Validation(format!("{kind} request has no id")))?;
        let frame = encode(&envelope)?;

        let (tx, mut rx) = oneshot::channel();
        self.shared.pending().insert(id, tx);

        let mut outcome = Err(AuctionError::NoResponse {
            kind,
            attempts: self.attempts,
        });
        for attempt in 1..=self.attempts {
            if let Err(err) = self.transport.send_frame(&frame, self.server).await {
                log::warn!("Sending {kind} to {} failed: {err}", self.server);
            }
            match tokio::time::timeout(self.retry_interval, &mut rx).await {
                Ok(Ok(response)) => {
                    outcome = Ok(response);
                    break;
                }
                Ok(Err(_)) => {
                    outcome = Err(AuctionError::Closed);
                    break;
                }
                Err(_) => log::debug!("No answer to {kind} {id} (attempt {attempt})"),
            }
        }

        self.shared.pending().remove(&id);
        outcome
    }

    pub async fn register(&self) -> AuctionResult<()> {
        self.request(Body::Register).await.map(|_| ())
    }

    /// Authenticates, joins the broadcast list and loads the open lots.
    pub async fn connect(&self) -> AuctionResult<()> {
        let response = self
            .request(Body::Connect {
                auction_started_at: None,
            })
            .await?;
        if let Body::Connect {
            auction_started_at: Some(at),
        } = response.body
        {
            self.shared.mark_started(at);
        }
        self.list_lots().await?;
        Ok(())
    }

    /// Fetches every open lot and refreshes the local cache with them.
    pub async fn list_lots(&self) -> AuctionResult<Vec<Lot>> {
        let response = self.request(Body::ListLots { lots: Vec::new() }).await?;
        match response.body {
            Body::ListLots { lots } => {
                for lot in &lots {
                    self.shared.store_lot(lot.clone());
                }
                Ok(lots)
            }
            other => Err(unexpected(other)),
        }
    }

    /// Last known state of a lot, from a listing or a broadcast.
    pub fn cached_lot(&self, lot_id: &str) -> Option<Lot> {
        self.shared
            .lots
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(lot_id)
            .cloned()
    }

    pub fn auction_started_at(&self) -> Option<DateTime<Utc>> {
        *self
            .shared
            .started_at
            .read()
            .unwrap_or_else(|p| p.into_inner())
    }

    pub fn auction_started(&self) -> bool {
        self.auction_started_at().is_some()
    }

    pub(crate) fn note_started(&self, at: DateTime<Utc>) {
        self.shared.mark_started(at);
    }

    pub(crate) fn note_lot(&self, lot: Lot) {
        self.shared.store_lot(lot);
    }

    /// A receiver of every notification from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<AuctionEvent> {
        self.events.subscribe()
    }

    /// Calls `callback` for each lot update, including lots closing.
    pub fn on_lot_update<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: FnMut(AuctionEvent) + Send + 'static,
    {
        self.spawn_consumer(|event| event.lot().is_some(), callback)
    }

    pub fn on_auction_start<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: FnMut(AuctionEvent) + Send + 'static,
    {
        self.spawn_consumer(
            |event| matches!(event, AuctionEvent::AuctionStarted { .. }),
            callback,
        )
    }

    fn spawn_consumer<F>(&self, wanted: fn(&AuctionEvent) -> bool, mut callback: F) -> JoinHandle<()>
    where
        F: FnMut(AuctionEvent) + Send + 'static,
    {
        let mut events = self.events.subscribe();
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    _ = shutdown.wait_for(|closed| *closed) => break,
                    received = events.recv() => received,
                };
                match received {
                    Ok(event) if wanted(&event) => callback(event),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Subscriber fell behind; {skipped} notifications skipped")
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Stops the listener and subscribers and fails any waiting request.
    pub fn close(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }
        self.shared.pending().clear();
        log::info!("Session for {} closed", self.user.username);
    }

    pub fn is_open(&self) -> bool {
        !*self.shutdown.borrow()
    }
}

impl Drop for ClientAgent {
    fn drop(&mut self) {
        self.close();
    }
}

fn unexpected(body: Body) -> AuctionError {
    AuctionError::Rejected {
        kind: body.kind(),
        category: ErrorCategory::Transport,
        reason: "unexpected response payload".to_string(),
    }
}

pub(crate) fn expect_lot(response: Envelope) -> AuctionResult<Lot> {
    match response.body {
        Body::AddLot { lot } | Body::PlaceBid { lot } | Body::LotUpdate { lot } => Ok(lot),
        other => Err(unexpected(other)),
    }
}

async fn listen(
    transport: Transport,
    shared: Arc<Shared>,
    events: broadcast::Sender<AuctionEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    log::debug!("Listener started");
    loop {
        let received = tokio::select! {
            _ = shutdown.wait_for(|closed| *closed) => break,
            received = transport.recv() => received,
        };
        let (frame, from) = match received {
            Ok(received) => received,
            Err(err) => {
                log::warn!("Receive error: {err}");
                continue;
            }
        };
        let envelope = match decode(&frame) {
            Ok(envelope) => envelope,
            Err(err) => {
                log::warn!("Dropping malformed datagram from {from}: {err}");
                continue;
            }
        };

        if let Some(id) = envelope.request_id {
            let waiter = shared.pending().remove(&id);
            match waiter {
                Some(waiter) => {
                    let _ = waiter.send(envelope);
                }
                None => log::debug!("Late or duplicate response {id} ignored"),
            }
            continue;
        }

        match AuctionEvent::from_envelope(envelope) {
            Some(event) => {
                shared.apply(&event);
                // No receivers just means nobody subscribed.
                let _ = events.send(event);
            }
            None => log::debug!("Ignoring unsolicited datagram from {from}"),
        }
    }
    log::debug!("Listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(server: SocketAddr, attempts: u32) -> ClientConfig {
        ClientConfig {
            server_addr: server.to_string(),
            request_attempts: attempts,
            retry_interval_ms: 50,
        }
    }

    #[tokio::test]
    async fn empty_credentials_never_reach_the_network() {
        let err = ClientAgent::start(&ClientConfig::default(), User::new("", "pw"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AuctionError::Validation(_)));
    }

    #[tokio::test]
    async fn silent_server_yields_no_response_after_retries() {
        let silent = Transport::bind("127.0.0.1:0").await.unwrap();
        let agent = ClientAgent::start(
            &config(silent.local_addr().unwrap(), 3),
            User::new("a@example.com", "pw"),
        )
        .await
        .unwrap();

        let err = agent.register().await.unwrap_err();
        assert!(matches!(err, AuctionError::NoResponse { attempts: 3, .. }));

        // Every attempt resent the same request id.
        let mut ids = Vec::new();
        for _ in 0..3 {
            let (frame, _) = silent.recv().await.unwrap();
            ids.push(decode(&frame).unwrap().request_id);
        }
        assert!(ids.iter().all(|id| id.is_some() && *id == ids[0]));
    }

    #[tokio::test]
    async fn broadcasts_update_cache_before_subscribers_run() {
        let server = Transport::bind("127.0.0.1:0").await.unwrap();
        let agent = ClientAgent::start(
            &config(server.local_addr().unwrap(), 1),
            User::new("a@example.com", "pw"),
        )
        .await
        .unwrap();
        let mut events = agent.subscribe();
        let client_addr = SocketAddr::new(
            "127.0.0.1".parse().unwrap(),
            agent.local_addr().unwrap().port(),
        );

        let lot = Lot::new("AB-1", "coupe", 100.0, 10, 30);
        server
            .send(&Envelope::lot_update(lot.clone(), "New lot added"), client_addr)
            .await
            .unwrap();
        server
            .send(
                &Envelope::notification(Body::StartAuction { started_at: None }, "started"),
                client_addr,
            )
            .await
            .unwrap();

        let first = events.recv().await.unwrap();
        assert_eq!(first.lot(), Some(&lot));
        assert_eq!(agent.cached_lot("AB-1"), Some(lot));
        assert!(matches!(events.recv().await.unwrap(), AuctionEvent::AuctionStarted { .. }));
        assert!(agent.auction_started());
    }

    #[tokio::test]
    async fn closed_session_refuses_requests() {
        let agent = ClientAgent::start(
            &config("127.0.0.1:9".parse().unwrap(), 1),
            User::new("a@example.com", "pw"),
        )
        .await
        .unwrap();
        assert!(agent.is_open());
        agent.close();
        assert!(!agent.is_open());
        assert!(matches!(agent.list_lots().await, Err(AuctionError::Closed)));
    }
}
