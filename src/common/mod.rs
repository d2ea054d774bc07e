pub mod events;
pub mod messages;
pub mod types;

pub use events::AuctionEvent;
pub use messages::{Body, Envelope, MessageKind};
pub use types::{BidSummary, HistoryEntry, Lot, ReclamationDetails, User};
