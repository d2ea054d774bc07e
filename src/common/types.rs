use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account identity as carried inside envelopes.
///
/// Every envelope holds its own copy, never a shared reference. Two users are
/// equal when username and password match; the numeric id is ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub password: String,
}

impl User {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            id: 0,
            username: username.into(),
            password: password.into(),
        }
    }
}

impl PartialEq for User {
    fn eq(&self, other: &Self) -> bool {
        self.username == other.username && self.password == other.password
    }
}

impl Eq for User {}

impl Hash for User {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.username.hash(state);
        self.password.hash(state);
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "User[id={}, username={}]", self.id, self.username)
    }
}

/// An item under auction.
///
/// Treated as an immutable value: placing a bid produces a new `Lot`
/// through [`Lot::with_bid`] instead of mutating the current one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lot {
    pub lot_id: String,
    pub description: String,
    pub starting_price: f64,
    pub current_price: f64,
    pub increment: u32,
    pub duration_secs: u32,
    pub available: bool,
    pub seller: String,
    pub top_bidder: Option<String>,
}

impl Lot {
    /// A fresh, available lot whose current price equals its starting price.
    pub fn new(
        lot_id: impl Into<String>,
        description: impl Into<String>,
        starting_price: f64,
        increment: u32,
        duration_secs: u32,
    ) -> Self {
        Self {
            lot_id: lot_id.into(),
            description: description.into(),
            starting_price,
            current_price: starting_price,
            increment,
            duration_secs,
            available: true,
            seller: String::new(),
            top_bidder: None,
        }
    }

    pub fn with_seller(mut self, seller: impl Into<String>) -> Self {
        self.seller = seller.into();
        self
    }

    /// Proposal for a bid: a copy of this lot priced at `amount` with `bidder` on top.
    pub fn with_bid(&self, bidder: &User, amount: f64) -> Self {
        Self {
            current_price: amount,
            top_bidder: Some(bidder.username.clone()),
            ..self.clone()
        }
    }

    /// Copy of this lot that no longer accepts bids.
    pub fn closed(&self) -> Self {
        Self {
            available: false,
            ..self.clone()
        }
    }

    /// Smallest amount the next bid must reach.
    pub fn minimum_bid(&self) -> f64 {
        self.current_price + f64::from(self.increment)
    }

    pub fn accepts(&self, amount: f64) -> bool {
        self.available && amount >= self.minimum_bid()
    }
}

impl fmt::Display for Lot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | {} | price {:.2} (+{}) | {}",
            self.lot_id,
            self.description,
            self.current_price,
            self.increment,
            if self.available { "open" } else { "closed" }
        )?;
        if let Some(bidder) = &self.top_bidder {
            write!(f, " | top bidder {bidder}")?;
        }
        Ok(())
    }
}

/// One accepted bid as seen from the bidder's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub lot_id: String,
    pub amount: f64,
    pub at: DateTime<Utc>,
}

impl fmt::Display for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} lot {} bid {:.2} at {}",
            self.id,
            self.lot_id,
            self.amount,
            self.at.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

/// Bidder, amount and time of a single bid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidSummary {
    pub bidder: String,
    pub amount: f64,
    pub at: DateTime<Utc>,
}

/// Last winning bid on a lot paired with the caller's own latest bid on it.
/// `None` on either side means no such bid exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReclamationDetails {
    pub lot_id: String,
    pub winner: Option<BidSummary>,
    pub own: Option<BidSummary>,
}

impl fmt::Display for ReclamationDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "lot {}", self.lot_id)?;
        match &self.winner {
            Some(w) => writeln!(f, "  winner: {} with {:.2} at {}", w.bidder, w.amount, w.at)?,
            None => writeln!(f, "  winner: No previous winner")?,
        }
        match &self.own {
            Some(o) => write!(f, "  your last bid: {:.2} at {}", o.amount, o.at),
            None => write!(f, "  your last bid: No current bidder"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn users_compare_on_credentials_only() {
        let mut a = User::new("alice@example.com", "secret");
        let b = User::new("alice@example.com", "secret");
        a.id = 42;
        assert_eq!(a, b);
        assert_ne!(a, User::new("alice@example.com", "other"));
    }

    #[test]
    fn bidding_copies_the_lot() {
        let lot = Lot::new("AB-123", "red coupe", 1000.0, 50, 60).with_seller("seller@example.com");
        let bidder = User::new("bob@example.com", "pw");

        let proposal = lot.with_bid(&bidder, 1100.0);

        assert_eq!(lot.current_price, 1000.0);
        assert_eq!(lot.top_bidder, None);
        assert_eq!(proposal.current_price, 1100.0);
        assert_eq!(proposal.top_bidder.as_deref(), Some("bob@example.com"));
        assert_eq!(proposal.seller, "seller@example.com");
    }

    #[test]
    fn minimum_bid_includes_increment() {
        let lot = Lot::new("AB-123", "red coupe", 1000.0, 50, 60);
        assert!(!lot.accepts(1049.0));
        assert!(lot.accepts(1050.0));
        assert!(!lot.closed().accepts(5000.0));
    }
}
