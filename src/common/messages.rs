use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AuctionError, ErrorCategory};

use super::types::{HistoryEntry, Lot, ReclamationDetails, User};

/// Payload of an envelope, one variant per request or notification kind.
///
/// Requests travel client -> server and come back with their result fields
/// filled in. `LotUpdate` and `AuctionEnded` are only ever produced by the
/// server. A `StartAuction` body without a request id is the start broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Body {
    Register,
    Connect {
        #[serde(default)]
        auction_started_at: Option<DateTime<Utc>>,
    },
    ListLots {
        #[serde(default)]
        lots: Vec<Lot>,
    },
    AddLot {
        lot: Lot,
    },
    StartAuction {
        #[serde(default)]
        started_at: Option<DateTime<Utc>>,
    },
    PlaceBid {
        lot: Lot,
    },
    Reclaim {
        lot_id: String,
        #[serde(default)]
        details: Option<ReclamationDetails>,
    },
    History {
        #[serde(default)]
        entries: Vec<HistoryEntry>,
    },
    LotUpdate {
        lot: Lot,
    },
    AuctionEnded {
        lot: Lot,
        winner: Option<String>,
    },
}

impl Body {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Register => MessageKind::Register,
            Self::Connect { .. } => MessageKind::Connect,
            Self::ListLots { .. } => MessageKind::ListLots,
            Self::AddLot { .. } => MessageKind::AddLot,
            Self::StartAuction { .. } => MessageKind::StartAuction,
            Self::PlaceBid { .. } => MessageKind::PlaceBid,
            Self::Reclaim { .. } => MessageKind::Reclaim,
            Self::History { .. } => MessageKind::History,
            Self::LotUpdate { .. } => MessageKind::LotUpdate,
            Self::AuctionEnded { .. } => MessageKind::AuctionEnded,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    Register,
    Connect,
    ListLots,
    AddLot,
    StartAuction,
    PlaceBid,
    Reclaim,
    History,
    LotUpdate,
    AuctionEnded,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The unit exchanged over the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Set by the client on requests and echoed back in the response.
    /// Broadcasts carry none.
    #[serde(default)]
    pub request_id: Option<Uuid>,
    #[serde(default)]
    pub author: Option<User>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub info: Option<String>,
    /// Class of the failure when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorCategory>,
    pub body: Body,
}

impl Envelope {
    /// A client request authored by `author` with a fresh request id.
    pub fn request(author: &User, body: Body) -> Self {
        Self {
            request_id: Some(Uuid::new_v4()),
            author: Some(author.clone()),
            created_at: Utc::now(),
            success: false,
            info: None,
            error: None,
            body,
        }
    }

    /// A server-originated notification: no author, no request id, always successful.
    pub fn notification(body: Body, info: impl Into<String>) -> Self {
        Self {
            request_id: None,
            author: None,
            created_at: Utc::now(),
            success: true,
            info: Some(info.into()),
            error: None,
            body,
        }
    }

    pub fn lot_update(lot: Lot, info: impl Into<String>) -> Self {
        Self::notification(Body::LotUpdate { lot }, info)
    }

    pub fn auction_ended(lot: Lot) -> Self {
        let winner = lot.top_bidder.clone();
        let info = match &winner {
            Some(w) => format!("Auction closed on lot {}: the winner is {w}", lot.lot_id),
            None => format!("Auction closed on lot {}: no bids were placed", lot.lot_id),
        };
        Self::notification(Body::AuctionEnded { lot, winner }, info)
    }

    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    pub fn is_notification(&self) -> bool {
        self.request_id.is_none()
            && matches!(
                self.body,
                Body::LotUpdate { .. } | Body::AuctionEnded { .. } | Body::StartAuction { .. }
            )
    }

    pub fn succeed(&mut self) {
        self.success = true;
        self.error = None;
    }

    pub fn fail(&mut self, err: &AuctionError) {
        self.success = false;
        self.info = Some(err.to_string());
        self.error = Some(err.category().reported());
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{{success={}, info='{}'}}",
            self.kind(),
            self.success,
            self.info.as_deref().unwrap_or("")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::BidSummary;

    #[test]
    fn failure_state_survives_the_wire() {
        let author = User::new("carol@example.com", "pw");
        let mut envelope = Envelope::request(
            &author,
            Body::Reclaim {
                lot_id: "ZX-9".to_string(),
                details: None,
            },
        );
        envelope.fail(&AuctionError::UnknownLot("ZX-9".to_string()));

        let bytes = serde_json::to_vec(&envelope).unwrap();
        let decoded: Envelope = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(decoded, envelope);
        assert!(!decoded.success);
        assert_eq!(decoded.info.as_deref(), Some("lot `ZX-9` does not exist"));
        assert_eq!(decoded.error, Some(ErrorCategory::State));
        assert_eq!(decoded.author.as_ref().map(|u| u.password.as_str()), Some("pw"));
    }

    #[test]
    fn lot_payload_survives_the_wire() {
        let lot = Lot::new("AB-123", "red coupe", 1000.0, 50, 60)
            .with_seller("s@example.com")
            .with_bid(&User::new("b@example.com", "pw"), 1200.0);
        let envelope = Envelope::auction_ended(lot.clone());

        let decoded: Envelope = serde_json::from_str(&serde_json::to_string(&envelope).unwrap()).unwrap();

        assert!(decoded.is_notification());
        assert_eq!(
            decoded.body,
            Body::AuctionEnded {
                lot,
                winner: Some("b@example.com".to_string())
            }
        );
    }

    #[test]
    fn responses_are_not_notifications() {
        let author = User::new("a@example.com", "pw");
        let envelope = Envelope::request(&author, Body::StartAuction { started_at: None });
        assert!(!envelope.is_notification());

        let mut broadcast = envelope.clone();
        broadcast.request_id = None;
        broadcast.author = None;
        assert!(broadcast.is_notification());
    }

    fn every_body() -> Vec<Body> {
        let bidder = User::new("b@example.com", "pw");
        let lot = Lot::new("AB-123", "red coupe", 1000.0, 50, 60).with_seller("s@example.com");
        let bid = lot.with_bid(&bidder, 1100.0);
        let at = Utc::now();
        vec![
            Body::Register,
            Body::Connect {
                auction_started_at: Some(at),
            },
            Body::ListLots {
                lots: vec![lot.clone(), bid.clone()],
            },
            Body::AddLot { lot: lot.clone() },
            Body::StartAuction {
                started_at: Some(at),
            },
            Body::PlaceBid { lot: bid.clone() },
            Body::Reclaim {
                lot_id: "AB-123".to_string(),
                details: Some(ReclamationDetails {
                    lot_id: "AB-123".to_string(),
                    winner: Some(BidSummary {
                        bidder: "w@example.com".to_string(),
                        amount: 1500.0,
                        at,
                    }),
                    own: None,
                }),
            },
            Body::History {
                entries: vec![HistoryEntry {
                    id: 7,
                    lot_id: "AB-123".to_string(),
                    amount: 1100.0,
                    at,
                }],
            },
            Body::LotUpdate { lot: bid.clone() },
            Body::AuctionEnded {
                lot: bid.closed(),
                winner: Some("b@example.com".to_string()),
            },
        ]
    }

    #[test]
    fn every_kind_survives_the_wire_in_both_outcomes() {
        let author = User::new("a@example.com", "pw");
        let bodies = every_body();
        let kinds: std::collections::HashSet<MessageKind> = bodies.iter().map(Body::kind).collect();
        assert_eq!(kinds.len(), 10);

        for body in bodies {
            let mut accepted = Envelope::request(&author, body.clone());
            accepted.succeed();
            accepted.info = Some(format!("{} done", body.kind()));

            let mut refused = Envelope::request(&author, body.clone());
            refused.fail(&AuctionError::BadCredential(author.username.clone()));

            for envelope in [accepted, refused] {
                let decoded: Envelope =
                    serde_json::from_slice(&serde_json::to_vec(&envelope).unwrap()).unwrap();
                assert_eq!(decoded, envelope, "{}", body.kind());
                assert_eq!(decoded.body, body);
                assert_eq!(decoded.success, envelope.success);
                assert_eq!(decoded.info, envelope.info);
                assert_eq!(decoded.error, envelope.error);
            }
        }
    }

    #[test]
    fn refusal_carries_its_category() {
        let mut envelope = Envelope::request(&User::new("a@example.com", "pw"), Body::Register);
        envelope.fail(&AuctionError::BadCredential("a@example.com".to_string()));
        assert_eq!(envelope.error, Some(ErrorCategory::Authorization));

        envelope.fail(&AuctionError::Persistence(rusqlite::Error::QueryReturnedNoRows));
        assert_eq!(envelope.error, Some(ErrorCategory::State));

        envelope.succeed();
        assert!(envelope.success);
        assert_eq!(envelope.error, None);
    }
}
