use chrono::{DateTime, Utc};

use super::messages::{Body, Envelope};
use super::types::Lot;

/// Unsolicited notification pushed to client subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum AuctionEvent {
    LotUpdated { lot: Lot, info: String },
    AuctionEnded { lot: Lot, winner: Option<String> },
    AuctionStarted { at: Option<DateTime<Utc>> },
}

impl AuctionEvent {
    /// Converts a broadcast envelope; responses and requests yield `None`.
    pub fn from_envelope(envelope: Envelope) -> Option<Self> {
        if !envelope.is_notification() {
            return None;
        }
        let info = envelope.info.unwrap_or_default();
        match envelope.body {
            Body::LotUpdate { lot } => Some(Self::LotUpdated { lot, info }),
            Body::AuctionEnded { lot, winner } => Some(Self::AuctionEnded {
                lot: lot.closed(),
                winner,
            }),
            Body::StartAuction { started_at } => Some(Self::AuctionStarted { at: started_at }),
            _ => None,
        }
    }

    /// Lot carried by the event, if any. An ended auction is a lot update too.
    pub fn lot(&self) -> Option<&Lot> {
        match self {
            Self::LotUpdated { lot, .. } | Self::AuctionEnded { lot, .. } => Some(lot),
            Self::AuctionStarted { .. } => None,
        }
    }
}

impl std::fmt::Display for AuctionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LotUpdated { lot, info } => write!(f, "[update] {info}\n  {lot}"),
            Self::AuctionEnded { lot, winner } => write!(
                f,
                "[closed] lot {} won by {} at {:.2}",
                lot.lot_id,
                winner.as_deref().unwrap_or("nobody"),
                lot.current_price
            ),
            Self::AuctionStarted { at } => match at {
                Some(at) => write!(f, "[start] bidding opened at {}", at.format("%H:%M:%S")),
                None => write!(f, "[start] bidding opened"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::User;

    #[test]
    fn ended_lot_is_never_biddable() {
        let mut notice = Envelope::auction_ended(Lot::new("AB-1", "coupe", 100.0, 10, 30));
        if let Body::AuctionEnded { lot, .. } = &mut notice.body {
            lot.available = true;
        }

        let event = AuctionEvent::from_envelope(notice).unwrap();
        let lot = event.lot().unwrap();
        assert!(!lot.available);
        assert!(!lot.accepts(1_000.0));
    }

    #[test]
    fn responses_are_not_events() {
        let author = User::new("a@example.com", "pw");
        let response = Envelope::request(&author, Body::StartAuction { started_at: None });
        assert!(AuctionEvent::from_envelope(response).is_none());
    }
}
