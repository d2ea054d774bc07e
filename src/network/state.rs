use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, OnceLock, RwLock};

use chrono::{DateTime, Utc};

use crate::error::{AuctionError, AuctionResult};
use crate::storage::AuctionStore;

/// The single "auction has begun" timestamp.
///
/// Unset means lots may still be listed and bids are refused; once set it
/// never changes again.
#[derive(Debug, Default)]
pub struct AuctionClock {
    started_at: OnceLock<DateTime<Utc>>,
}

impl AuctionClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at.get().copied()
    }

    pub fn is_started(&self) -> bool {
        self.started_at.get().is_some()
    }

    /// Starts the auction now. Exactly one caller wins; every other call,
    /// concurrent or later, gets `AuctionAlreadyStarted`.
    pub fn start(&self) -> AuctionResult<DateTime<Utc>> {
        self.start_at(Utc::now())
    }

    pub(crate) fn start_at(&self, at: DateTime<Utc>) -> AuctionResult<DateTime<Utc>> {
        self.started_at
            .set(at)
            .map(|()| at)
            .map_err(|_| AuctionError::AuctionAlreadyStarted)
    }
}

/// Broadcast fan-out list: peer address -> port.
///
/// Keyed by IP, so a later Connect from the same host replaces the earlier
/// port. Not an authentication mechanism.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<IpAddr, u16>>,
}

impl PeerRegistry {
    pub fn register(&self, addr: SocketAddr) {
        let mut peers = self.peers.write().unwrap_or_else(|p| p.into_inner());
        if let Some(previous) = peers.insert(addr.ip(), addr.port()) {
            if previous != addr.port() {
                log::debug!("Peer {} moved from port {previous} to {}", addr.ip(), addr.port());
            }
        }
    }

    pub fn snapshot(&self) -> Vec<SocketAddr> {
        self.peers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|(ip, port)| SocketAddr::new(*ip, *port))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peers.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything a handler may touch.
pub struct ServerState {
    pub store: Arc<dyn AuctionStore>,
    pub clock: AuctionClock,
    pub peers: PeerRegistry,
}

impl ServerState {
    pub fn new(store: Arc<dyn AuctionStore>) -> Self {
        Self {
            store,
            clock: AuctionClock::new(),
            peers: PeerRegistry::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_starts_exactly_once_under_contention() {
        let clock = Arc::new(AuctionClock::new());
        let winners = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    let clock = clock.clone();
                    scope.spawn(move || clock.start().is_ok())
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join())
                .filter(|joined| matches!(joined, Ok(true)))
                .count()
        });
        assert_eq!(winners, 1);
        assert!(clock.is_started());
    }

    #[test]
    fn registry_overwrites_port_per_address() {
        let registry = PeerRegistry::default();
        registry.register("10.0.0.1:4000".parse().unwrap());
        registry.register("10.0.0.2:4000".parse().unwrap());
        registry.register("10.0.0.1:5000".parse().unwrap());

        let mut peers = registry.snapshot();
        peers.sort();
        assert_eq!(
            peers,
            vec![
                "10.0.0.1:5000".parse::<SocketAddr>().unwrap(),
                "10.0.0.2:4000".parse().unwrap()
            ]
        );
    }
}
