pub mod auth;
pub mod client;
pub mod handlers;
pub mod monitor;
pub mod roles;
pub mod server;
pub mod state;
pub mod transport;

pub use client::ClientAgent;
pub use roles::{Auctioneer, Bidder, Participant};
pub use server::{AuctionServer, ServerHandle};
pub use state::{AuctionClock, PeerRegistry, ServerState};
