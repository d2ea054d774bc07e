use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::common::Envelope;
use crate::config::ServerConfig;
use crate::error::AuctionResult;
use crate::storage::AuctionStore;

use super::handlers;
use super::monitor;
use super::state::ServerState;
use super::transport::{Transport, decode, encode};

enum Lookup {
    New,
    InFlight,
    Done(Envelope),
}

/// Responses remembered by request id, so a retransmitted request is answered
/// again instead of being applied twice.
struct ResponseCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<Uuid, Option<Envelope>>,
    order: VecDeque<Uuid>,
}

impl ResponseCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Claims `id` for processing unless it was seen before.
    fn begin(&self, id: Uuid) -> Lookup {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(entry) = inner.entries.get(&id) {
            return match entry {
                Some(response) => Lookup::Done(response.clone()),
                None => Lookup::InFlight,
            };
        }
        inner.entries.insert(id, None);
        inner.order.push_back(id);
        while inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
            }
        }
        Lookup::New
    }

    fn complete(&self, id: Uuid, response: &Envelope) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(slot) = inner.entries.get_mut(&id) {
            *slot = Some(response.clone());
        }
    }

    fn forget(&self, id: Uuid) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.entries.remove(&id);
        inner.order.retain(|queued| *queued != id);
    }
}

/// What a worker task or the expiry monitor needs to do its job.
#[derive(Clone)]
pub(crate) struct ServerContext {
    pub(crate) transport: Transport,
    pub(crate) state: Arc<ServerState>,
    responses: Arc<ResponseCache>,
}

impl ServerContext {
    /// Sends `envelope` to every registered peer concurrently. Returns how
    /// many sends succeeded; a failing peer does not stop the others.
    pub(crate) async fn broadcast(&self, envelope: &Envelope) -> usize {
        let frame = match encode(envelope) {
            Ok(frame) => frame,
            Err(err) => {
                log::error!("Cannot broadcast {envelope}: {err}");
                return 0;
            }
        };
        let peers = self.state.peers.snapshot();
        let frame = &frame;
        let sends = peers.iter().map(|peer| async move {
            (peer, self.transport.send_frame(frame, *peer).await)
        });

        let mut delivered = 0;
        for (peer, result) in join_all(sends).await {
            match result {
                Ok(()) => delivered += 1,
                Err(err) => log::warn!("Broadcast of {} to {peer} failed: {err}", envelope.kind()),
            }
        }
        log::debug!("Broadcast {envelope} to {delivered}/{} peers", peers.len());
        delivered
    }

    async fn handle(&self, envelope: Envelope, from: SocketAddr) {
        let request_id = envelope.request_id;
        let state = self.state.clone();
        let outcome =
            match tokio::task::spawn_blocking(move || handlers::dispatch(&state, envelope, from))
                .await
            {
                Ok(outcome) => outcome,
                Err(err) => {
                    log::error!("Handler for request from {from} panicked: {err}");
                    if let Some(id) = request_id {
                        self.responses.forget(id);
                    }
                    return;
                }
            };

        if let Some(id) = request_id {
            self.responses.complete(id, &outcome.response);
        }
        if let Err(err) = self.transport.send(&outcome.response, from).await {
            log::warn!("Failed to answer {} from {from}: {err}", outcome.response.kind());
        }
        for notice in &outcome.broadcasts {
            self.broadcast(notice).await;
        }
    }
}

/// Cloneable control for a running server.
#[derive(Clone)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    state: Arc<ServerState>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Stops the receive loop and the expiry monitor.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

pub struct AuctionServer {
    config: ServerConfig,
    context: ServerContext,
    handle: ServerHandle,
}

impl AuctionServer {
    pub async fn bind(config: ServerConfig, store: Arc<dyn AuctionStore>) -> AuctionResult<Self> {
        let transport = Transport::bind(&config.bind_addr).await?;
        let local_addr = transport.local_addr()?;
        let state = Arc::new(ServerState::new(store));
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            context: ServerContext {
                transport,
                state: state.clone(),
                responses: Arc::new(ResponseCache::new(config.response_cache_size)),
            },
            handle: ServerHandle {
                local_addr,
                state,
                shutdown: Arc::new(shutdown),
            },
            config,
        })
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// Runs the server on a background task.
    pub fn spawn(self) -> (ServerHandle, JoinHandle<AuctionResult<()>>) {
        let handle = self.handle();
        (handle, tokio::spawn(self.run()))
    }

    pub async fn run(self) -> AuctionResult<()> {
        let mut shutdown = self.handle.shutdown.subscribe();
        let workers = Arc::new(Semaphore::new(self.config.max_workers.max(1)));
        let monitor = tokio::spawn(monitor::run(
            self.context.clone(),
            self.config.expiry_interval(),
            self.handle.shutdown.subscribe(),
        ));
        log::info!("Auction server listening on {}", self.handle.local_addr);

        loop {
            // The select yields only the datagram; the shutdown guard must not
            // live across the awaits below.
            let received = tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => break,
                received = self.context.transport.recv() => received,
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
            if !self.admit(&envelope, from).await {
                continue;
            }
            let Ok(permit) = workers.clone().acquire_owned().await else {
                break;
            };
            let context = self.context.clone();
            tokio::spawn(async move {
                context.handle(envelope, from).await;
                drop(permit);
            });
        }

        log::info!("Auction server on {} shutting down", self.handle.local_addr);
        if let Err(err) = monitor.await {
            log::warn!("Expiry monitor ended abnormally: {err}");
        }
        Ok(())
    }

    /// Filters retransmissions: a repeat of a completed request gets its
    /// cached response, a repeat of one still being handled is dropped.
    async fn admit(&self, envelope: &Envelope, from: SocketAddr) -> bool {
        let Some(id) = envelope.request_id else {
            return true;
        };
        match self.context.responses.begin(id) {
            Lookup::New => true,
            Lookup::InFlight => {
                log::debug!("Request {id} from {from} already in progress");
                false
            }
            Lookup::Done(response) => {
                log::debug!("Replaying response for request {id} to {from}");
                if let Err(err) = self.context.transport.send(&response, from).await {
                    log::warn!("Failed to replay response to {from}: {err}");
                }
                false
            }
        }
    }
}
