pub mod auction_db;
pub mod database;
pub mod models;

pub use auction_db::AuctionDatabase;

use std::fs;
use std::path::Path;

use crate::common::{HistoryEntry, Lot, ReclamationDetails, User};
use crate::error::AuctionResult;

/// Ensure the directory holding the database file exists
pub fn ensure_data_dir(database_path: &Path) -> std::io::Result<()> {
    match database_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => fs::create_dir_all(dir),
        _ => Ok(()),
    }
}

/// Persistence operations the server relies on.
///
/// Implementations own the durable user, lot, bid and history records; the
/// server never caches them beyond a single request.
pub trait AuctionStore: Send + Sync {
    /// Stores a new account. Fails with `DuplicateUser` if the name is taken.
    fn register_user(&self, username: &str, password_hash: &str) -> AuctionResult<User>;

    /// Looks up an account; the returned `password` holds the stored hash.
    fn find_user(&self, username: &str) -> AuctionResult<Option<User>>;

    /// Fails with `DuplicateLot` if the id is taken.
    fn add_lot(&self, lot: &Lot) -> AuctionResult<()>;

    fn get_lot(&self, lot_id: &str) -> AuctionResult<Option<Lot>>;

    /// Every lot that still accepts bids.
    fn available_lots(&self) -> AuctionResult<Vec<Lot>>;

    /// Validates and applies a bid as one indivisible step, recording the bid
    /// and the bidder's history. Returns the updated lot.
    fn place_bid(&self, lot_id: &str, bidder: &str, amount: f64) -> AuctionResult<Lot>;

    /// Marks the lot unavailable. Returns the closed lot, or `None` if it was
    /// already closed or does not exist.
    fn close_lot(&self, lot_id: &str) -> AuctionResult<Option<Lot>>;

    fn history_for(&self, bidder: &str) -> AuctionResult<Vec<HistoryEntry>>;

    fn reclamation(&self, bidder: &str, lot_id: &str) -> AuctionResult<ReclamationDetails>;
}
