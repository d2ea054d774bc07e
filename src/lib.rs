pub mod cli;
pub mod common;
pub mod config;
pub mod error;
pub mod network;
pub mod storage;

pub use error::{AuctionError, AuctionResult, ErrorCategory};
