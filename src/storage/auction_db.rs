use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Result as SqlResult, TransactionBehavior, params};

use super::AuctionStore;
use super::database::Database;
use super::models::{LOT_COLUMNS, LotStatus, lot_from_row};
use crate::common::{BidSummary, HistoryEntry, Lot, ReclamationDetails, User};
use crate::error::{AuctionError, AuctionResult};

/// SQLite-backed auction store (users, lots, bids, history)
pub struct AuctionDatabase {
    db: Mutex<Database>,
}

impl AuctionDatabase {
    /// Initialize auction database at custom path
    pub fn with_path<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        Self::from_database(Database::new(path)?)
    }

    /// Throwaway database, used by tests and demos
    pub fn in_memory() -> SqlResult<Self> {
        Self::from_database(Database::in_memory()?)
    }

    fn from_database(db: Database) -> SqlResult<Self> {
        init_schema(db.connection())?;
        log::info!(
            "Auction database ready at {}",
            db.path().unwrap_or(":memory:")
        );
        Ok(Self { db: Mutex::new(db) })
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        // A panic while holding the lock cannot leave a half-applied bid
        // behind: the open transaction rolls back when it is dropped.
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn init_schema(conn: &Connection) -> SqlResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT UNIQUE NOT NULL,
            password_hash TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lots (
            lot_id TEXT PRIMARY KEY,
            description TEXT NOT NULL,
            starting_price REAL NOT NULL,
            current_price REAL NOT NULL,
            seller TEXT NOT NULL,
            buyer TEXT,
            increment INTEGER NOT NULL,
            duration INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'ACTIVE' CHECK (status IN ('ACTIVE', 'SOLD')),
            created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS bids (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            lot_id TEXT NOT NULL REFERENCES lots(lot_id),
            bidder TEXT NOT NULL REFERENCES users(username),
            amount REAL NOT NULL,
            bid_time TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            bidder TEXT NOT NULL REFERENCES users(username),
            lot_id TEXT NOT NULL REFERENCES lots(lot_id),
            amount REAL NOT NULL,
            interaction_time TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lots_status ON lots(status)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_bids_lot_bidder ON bids(lot_id, bidder)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_history_bidder ON history(bidder)",
        [],
    )?;

    Ok(())
}

fn select_lot(conn: &Connection, lot_id: &str) -> SqlResult<Option<Lot>> {
    conn.query_row(
        &format!("SELECT {LOT_COLUMNS} FROM lots WHERE lot_id = ?1"),
        params![lot_id],
        lot_from_row,
    )
    .optional()
}

fn bid_summary(row: &rusqlite::Row<'_>) -> SqlResult<BidSummary> {
    Ok(BidSummary {
        bidder: row.get(0)?,
        amount: row.get(1)?,
        at: row.get::<_, DateTime<Utc>>(2)?,
    })
}

impl AuctionStore for AuctionDatabase {
    // ========== Users ==========

    fn register_user(&self, username: &str, password_hash: &str) -> AuctionResult<User> {
        let db = self.db();
        let conn = db.connection();

        let exists = conn
            .query_row(
                "SELECT 1 FROM users WHERE username = ?1",
                params![username],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if exists {
            return Err(AuctionError::DuplicateUser(username.to_string()));
        }

        conn.execute(
            "INSERT INTO users (username, password_hash) VALUES (?1, ?2)",
            params![username, password_hash],
        )?;

        Ok(User {
            id: conn.last_insert_rowid(),
            username: username.to_string(),
            password: password_hash.to_string(),
        })
    }

    fn find_user(&self, username: &str) -> AuctionResult<Option<User>> {
        let db = self.db();
        let user = db
            .connection()
            .query_row(
                "SELECT id, username, password_hash FROM users WHERE username = ?1",
                params![username],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        password: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    // ========== Lots ==========

    fn add_lot(&self, lot: &Lot) -> AuctionResult<()> {
        let db = self.db();
        let conn = db.connection();

        if select_lot(conn, &lot.lot_id)?.is_some() {
            return Err(AuctionError::DuplicateLot(lot.lot_id.clone()));
        }

        conn.execute(
            "INSERT INTO lots (lot_id, description, starting_price, current_price, seller, buyer, increment, duration, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                lot.lot_id,
                lot.description,
                lot.starting_price,
                lot.current_price,
                lot.seller,
                lot.top_bidder,
                lot.increment,
                lot.duration_secs,
                LotStatus::of(lot).as_str()
            ],
        )?;
        Ok(())
    }

    fn get_lot(&self, lot_id: &str) -> AuctionResult<Option<Lot>> {
        let db = self.db();
        Ok(select_lot(db.connection(), lot_id)?)
    }

    fn available_lots(&self) -> AuctionResult<Vec<Lot>> {
        let db = self.db();
        let conn = db.connection();
        let mut stmt = conn.prepare(&format!(
            "SELECT {LOT_COLUMNS} FROM lots WHERE status = ?1 ORDER BY created_at, lot_id"
        ))?;

        let lots = stmt
            .query_map(params![LotStatus::Active.as_str()], lot_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(lots)
    }

    fn place_bid(&self, lot_id: &str, bidder: &str, amount: f64) -> AuctionResult<Lot> {
        if !amount.is_finite() {
            return Err(AuctionError::Validation(format!(
                "bid amount {amount} is not a number"
            )));
        }

        let mut db = self.db();
        // Immediate: take the write lock before reading the price we check against.
        let tx = db
            .connection_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let lot = select_lot(&tx, lot_id)?
            .ok_or_else(|| AuctionError::UnknownLot(lot_id.to_string()))?;
        if !lot.accepts(amount) {
            return Err(if lot.available {
                AuctionError::BidTooLow {
                    amount,
                    minimum: lot.minimum_bid(),
                }
            } else {
                AuctionError::LotUnavailable(lot_id.to_string())
            });
        }

        let now = Utc::now();
        tx.execute(
            "UPDATE lots SET current_price = ?1, buyer = ?2 WHERE lot_id = ?3",
            params![amount, bidder, lot_id],
        )?;
        tx.execute(
            "INSERT INTO bids (lot_id, bidder, amount, bid_time) VALUES (?1, ?2, ?3, ?4)",
            params![lot_id, bidder, amount, now],
        )?;
        tx.execute(
            "INSERT INTO history (bidder, lot_id, amount, interaction_time) VALUES (?1, ?2, ?3, ?4)",
            params![bidder, lot_id, amount, now],
        )?;

        let updated = select_lot(&tx, lot_id)?
            .ok_or_else(|| AuctionError::UnknownLot(lot_id.to_string()))?;
        tx.commit()?;
        Ok(updated)
    }

    fn close_lot(&self, lot_id: &str) -> AuctionResult<Option<Lot>> {
        let db = self.db();
        let conn = db.connection();
        let changed = conn.execute(
            "UPDATE lots SET status = ?1 WHERE lot_id = ?2 AND status = ?3",
            params![
                LotStatus::Sold.as_str(),
                lot_id,
                LotStatus::Active.as_str()
            ],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        Ok(select_lot(conn, lot_id)?)
    }

    // ========== History ==========

    fn history_for(&self, bidder: &str) -> AuctionResult<Vec<HistoryEntry>> {
        let db = self.db();
        let conn = db.connection();
        let mut stmt = conn.prepare(
            "SELECT id, lot_id, amount, interaction_time
             FROM history
             WHERE bidder = ?1
             ORDER BY id ASC",
        )?;

        let entries = stmt
            .query_map(params![bidder], |row| {
                Ok(HistoryEntry {
                    id: row.get(0)?,
                    lot_id: row.get(1)?,
                    amount: row.get(2)?,
                    at: row.get(3)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(entries)
    }

    fn reclamation(&self, bidder: &str, lot_id: &str) -> AuctionResult<ReclamationDetails> {
        let db = self.db();
        let conn = db.connection();

        let winner = conn
            .query_row(
                "SELECT bidder, amount, interaction_time
                 FROM history
                 WHERE lot_id = ?1
                 ORDER BY id DESC
                 LIMIT 1",
                params![lot_id],
                bid_summary,
            )
            .optional()?;

        let own = conn
            .query_row(
                "SELECT bidder, amount, bid_time
                 FROM bids
                 WHERE lot_id = ?1 AND bidder = ?2
                 ORDER BY id DESC
                 LIMIT 1",
                params![lot_id, bidder],
                bid_summary,
            )
            .optional()?;

        Ok(ReclamationDetails {
            lot_id: lot_id.to_string(),
            winner,
            own,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;

    fn store_with_lot() -> AuctionDatabase {
        let store = AuctionDatabase::in_memory().unwrap();
        store.register_user("alice@example.com", "h1").unwrap();
        store.register_user("bob@example.com", "h2").unwrap();
        store
            .add_lot(&Lot::new("AB-123", "red coupe", 1000.0, 50, 60).with_seller("seller@example.com"))
            .unwrap();
        store
    }

    #[test]
    fn duplicate_user_is_rejected() {
        let store = AuctionDatabase::in_memory().unwrap();
        let first = store.register_user("alice@example.com", "h1").unwrap();
        assert!(first.id > 0);

        let err = store.register_user("alice@example.com", "h2").unwrap_err();
        assert!(matches!(err, AuctionError::DuplicateUser(_)));
        assert_eq!(store.find_user("alice@example.com").unwrap().unwrap().password, "h1");
    }

    #[test]
    fn duplicate_lot_is_rejected() {
        let store = store_with_lot();
        let err = store
            .add_lot(&Lot::new("AB-123", "other", 1.0, 1, 1))
            .unwrap_err();
        assert!(matches!(err, AuctionError::DuplicateLot(_)));
    }

    #[test]
    fn low_bid_leaves_lot_untouched() {
        let store = store_with_lot();
        store.place_bid("AB-123", "alice@example.com", 1100.0).unwrap();

        let err = store
            .place_bid("AB-123", "bob@example.com", 1120.0)
            .unwrap_err();
        assert!(matches!(err, AuctionError::BidTooLow { minimum, .. } if minimum == 1150.0));
        assert_eq!(err.category(), ErrorCategory::State);

        let lot = store.get_lot("AB-123").unwrap().unwrap();
        assert_eq!(lot.current_price, 1100.0);
        assert_eq!(lot.top_bidder.as_deref(), Some("alice@example.com"));
        assert!(store.history_for("bob@example.com").unwrap().is_empty());
    }

    #[test]
    fn accepted_bid_is_recorded_everywhere() {
        let store = store_with_lot();
        let lot = store.place_bid("AB-123", "bob@example.com", 1050.0).unwrap();

        assert_eq!(lot.current_price, 1050.0);
        assert_eq!(lot.top_bidder.as_deref(), Some("bob@example.com"));

        let history = store.history_for("bob@example.com").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].lot_id, "AB-123");
        assert_eq!(history[0].amount, 1050.0);
    }

    #[test]
    fn closed_lot_refuses_bids_and_leaves_listing() {
        let store = store_with_lot();
        let closed = store.close_lot("AB-123").unwrap().unwrap();
        assert!(!closed.available);
        assert!(store.close_lot("AB-123").unwrap().is_none());
        assert!(store.available_lots().unwrap().is_empty());

        let err = store
            .place_bid("AB-123", "alice@example.com", 9000.0)
            .unwrap_err();
        assert!(matches!(err, AuctionError::LotUnavailable(_)));
    }

    #[test]
    fn closing_keeps_latest_price() {
        let store = store_with_lot();
        store.place_bid("AB-123", "alice@example.com", 1300.0).unwrap();
        let closed = store.close_lot("AB-123").unwrap().unwrap();
        assert_eq!(closed.current_price, 1300.0);
        assert_eq!(closed.top_bidder.as_deref(), Some("alice@example.com"));
    }

    #[test]
    fn reclamation_without_own_bid_still_reports_winner() {
        let store = store_with_lot();
        store.place_bid("AB-123", "alice@example.com", 1200.0).unwrap();

        let details = store.reclamation("bob@example.com", "AB-123").unwrap();
        assert!(details.own.is_none());
        let winner = details.winner.unwrap();
        assert_eq!(winner.bidder, "alice@example.com");
        assert_eq!(winner.amount, 1200.0);
    }

    #[test]
    fn reclamation_pairs_winner_with_own_latest_bid() {
        let store = store_with_lot();
        store.place_bid("AB-123", "bob@example.com", 1050.0).unwrap();
        store.place_bid("AB-123", "bob@example.com", 1100.0).unwrap();
        store.place_bid("AB-123", "alice@example.com", 1500.0).unwrap();

        let details = store.reclamation("bob@example.com", "AB-123").unwrap();
        assert_eq!(details.winner.unwrap().bidder, "alice@example.com");
        assert_eq!(details.own.unwrap().amount, 1100.0);
    }

    #[test]
    fn file_database_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("auction.db");
        {
            let store = AuctionDatabase::with_path(&path).unwrap();
            store.register_user("alice@example.com", "h1").unwrap();
            store.add_lot(&Lot::new("AB-123", "red coupe", 10.0, 1, 5)).unwrap();
        }
        let store = AuctionDatabase::with_path(&path).unwrap();
        assert!(store.find_user("alice@example.com").unwrap().is_some());
        assert_eq!(store.available_lots().unwrap().len(), 1);
    }
}
