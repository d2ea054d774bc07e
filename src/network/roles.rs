use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::common::{Body, HistoryEntry, Lot, ReclamationDetails};
use crate::error::{AuctionError, AuctionResult, ErrorCategory};

use super::client::{ClientAgent, expect_lot};

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";

/// Seller address check, compiled on first use.
static EMAIL: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| Regex::new(EMAIL_PATTERN));

/// Capabilities shared by every kind of auction participant.
///
/// Roles differ only in which operations they allow; an operation a role may
/// not perform fails locally without contacting the server.
#[allow(async_fn_in_trait)]
pub trait Participant {
    const ROLE: &'static str;

    fn agent(&self) -> &ClientAgent;

    async fn connect(&self) -> AuctionResult<()> {
        self.agent().connect().await
    }

    async fn list_lots(&self) -> AuctionResult<Vec<Lot>> {
        self.agent().list_lots().await
    }

    async fn place_bid(&self, lot_id: &str, amount: f64) -> AuctionResult<Lot> {
        submit_bid(self.agent(), lot_id, amount).await
    }
}

async fn submit_bid(agent: &ClientAgent, lot_id: &str, amount: f64) -> AuctionResult<Lot> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(AuctionError::Validation(format!("invalid bid amount {amount}")));
    }
    if !agent.auction_started() {
        return Err(AuctionError::AuctionNotStarted);
    }
    let lot = agent
        .cached_lot(lot_id)
        .ok_or_else(|| AuctionError::Validation(format!("lot `{lot_id}` is not listed")))?;
    if !lot.available {
        return Err(AuctionError::Validation(format!("lot `{lot_id}` is closed")));
    }

    let proposal = lot.with_bid(agent.user(), amount);
    let updated = expect_lot(agent.request(Body::PlaceBid { lot: proposal }).await?)?;
    agent.note_lot(updated.clone());
    Ok(updated)
}

pub struct Bidder {
    agent: ClientAgent,
}

impl Bidder {
    pub fn new(agent: ClientAgent) -> Self {
        Self { agent }
    }

    /// The last winning bid on the lot next to this bidder's own latest bid.
    pub async fn reclaim(&self, lot_id: &str) -> AuctionResult<ReclamationDetails> {
        if lot_id.trim().is_empty() {
            return Err(AuctionError::Validation("lot id is required".to_string()));
        }
        let response = self
            .agent
            .request(Body::Reclaim {
                lot_id: lot_id.to_string(),
                details: None,
            })
            .await?;
        match response.body {
            Body::Reclaim {
                details: Some(details),
                ..
            } => Ok(details),
            other => Err(AuctionError::Rejected {
                kind: other.kind(),
                category: ErrorCategory::Transport,
                reason: "reclamation details missing".to_string(),
            }),
        }
    }

    pub async fn history(&self) -> AuctionResult<Vec<HistoryEntry>> {
        let response = self
            .agent
            .request(Body::History {
                entries: Vec::new(),
            })
            .await?;
        match response.body {
            Body::History { entries } => Ok(entries),
            other => Err(AuctionError::Rejected {
                kind: other.kind(),
                category: ErrorCategory::Transport,
                reason: "history missing".to_string(),
            }),
        }
    }
}

impl Participant for Bidder {
    const ROLE: &'static str = "bidder";

    fn agent(&self) -> &ClientAgent {
        &self.agent
    }
}

/// Lists lots and opens the bidding. Never bids.
pub struct Auctioneer {
    agent: ClientAgent,
}

impl Auctioneer {
    pub fn new(agent: ClientAgent) -> Self {
        Self { agent }
    }

    pub async fn add_lot(
        &self,
        seller: &str,
        lot_id: &str,
        description: &str,
        starting_price: f64,
        increment: u32,
        duration_secs: u32,
    ) -> AuctionResult<Lot> {
        let email = EMAIL
            .as_ref()
            .map_err(|err| AuctionError::Validation(err.to_string()))?;
        if !email.is_match(seller) {
            return Err(AuctionError::Validation(format!(
                "`{seller}` is not a valid seller email"
            )));
        }
        if lot_id.trim().is_empty() {
            return Err(AuctionError::Validation("lot id is required".to_string()));
        }
        if !starting_price.is_finite() || starting_price <= 0.0 {
            return Err(AuctionError::Validation(format!(
                "invalid starting price {starting_price}"
            )));
        }
        if duration_secs == 0 {
            return Err(AuctionError::Validation(
                "duration must be at least one second".to_string(),
            ));
        }

        let lot = Lot::new(lot_id, description, starting_price, increment, duration_secs)
            .with_seller(seller);
        let added = expect_lot(self.agent.request(Body::AddLot { lot }).await?)?;
        self.agent.note_lot(added.clone());
        Ok(added)
    }

    pub async fn start_auction(&self) -> AuctionResult<DateTime<Utc>> {
        let response = self
            .agent
            .request(Body::StartAuction { started_at: None })
            .await?;
        let at = match response.body {
            Body::StartAuction {
                started_at: Some(at),
            } => at,
            _ => Utc::now(),
        };
        self.agent.note_started(at);
        Ok(at)
    }
}

impl Participant for Auctioneer {
    const ROLE: &'static str = "auctioneer";

    fn agent(&self) -> &ClientAgent {
        &self.agent
    }

    async fn place_bid(&self, _lot_id: &str, _amount: f64) -> AuctionResult<Lot> {
        Err(AuctionError::RoleViolation {
            role: Self::ROLE,
            action: "place bids",
        })
    }
}
