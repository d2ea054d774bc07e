use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::MessageKind;

/// Coarse grouping of failures, used by callers that only care about the class of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Bad input shape, rejected before anything is sent.
    Validation,
    /// Unknown user, wrong credential or role violation.
    Authorization,
    /// The auction or a lot is not in a state that allows the operation.
    State,
    /// The underlying store failed.
    Persistence,
    /// Sending, receiving or decoding a datagram failed.
    Transport,
}

#[derive(Debug, Error)]
pub enum AuctionError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("user `{0}` is not registered")]
    InvalidUser(String),

    #[error("wrong password for `{0}`")]
    BadCredential(String),

    #[error("{role} is not allowed to {action}")]
    RoleViolation {
        role: &'static str,
        action: &'static str,
    },

    #[error("user `{0}` already exists")]
    DuplicateUser(String),

    #[error("lot `{0}` already exists")]
    DuplicateLot(String),

    #[error("lot `{0}` does not exist")]
    UnknownLot(String),

    #[error("the auction has not started yet")]
    AuctionNotStarted,

    #[error("the auction has already started")]
    AuctionAlreadyStarted,

    #[error("lot `{0}` is no longer available for bidding")]
    LotUnavailable(String),

    #[error("bid of {amount} is below the minimum of {minimum}")]
    BidTooLow { amount: f64, minimum: f64 },

    #[error("no history recorded for `{0}`")]
    EmptyHistory(String),

    #[error("storage failure: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("transport failure: {0}")]
    Transport(#[from] std::io::Error),

    #[error("malformed envelope: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("envelope of {0} bytes exceeds the datagram limit")]
    FrameTooLarge(usize),

    #[error("no response to {kind} after {attempts} attempts")]
    NoResponse { kind: MessageKind, attempts: u32 },

    #[error("{kind} rejected by server: {reason}")]
    Rejected {
        kind: MessageKind,
        category: ErrorCategory,
        reason: String,
    },

    #[error("client session is closed")]
    Closed,
}

impl AuctionError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Validation,
            Self::InvalidUser(_) | Self::BadCredential(_) | Self::RoleViolation { .. } => {
                ErrorCategory::Authorization
            }
            Self::DuplicateUser(_)
            | Self::DuplicateLot(_)
            | Self::UnknownLot(_)
            | Self::AuctionNotStarted
            | Self::AuctionAlreadyStarted
            | Self::LotUnavailable(_)
            | Self::BidTooLow { .. }
            | Self::EmptyHistory(_) => ErrorCategory::State,
            Self::Rejected { category, .. } => *category,
            Self::Persistence(_) => ErrorCategory::Persistence,
            Self::Transport(_)
            | Self::Codec(_)
            | Self::FrameTooLarge(_)
            | Self::NoResponse { .. }
            | Self::Closed => ErrorCategory::Transport,
        }
    }
}

impl ErrorCategory {
    /// The category a failure carries back to the client. Store failures
    /// are reported as state errors.
    pub fn reported(self) -> Self {
        match self {
            Self::Persistence => Self::State,
            category => category,
        }
    }
}

pub type AuctionResult<T> = Result<T, AuctionError>;
