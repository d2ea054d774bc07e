use rusqlite::Row;

use crate::common::Lot;

/// Lifecycle of a lot row. Only `Active` lots accept bids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LotStatus {
    Active,
    Sold,
}

impl LotStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Sold => "SOLD",
        }
    }

    pub fn of(lot: &Lot) -> Self {
        if lot.available { Self::Active } else { Self::Sold }
    }
}

/// Column list matching [`lot_from_row`].
pub const LOT_COLUMNS: &str =
    "lot_id, description, starting_price, current_price, increment, duration, status, seller, buyer";

pub fn lot_from_row(row: &Row<'_>) -> rusqlite::Result<Lot> {
    let status: String = row.get(6)?;
    Ok(Lot {
        lot_id: row.get(0)?,
        description: row.get(1)?,
        starting_price: row.get(2)?,
        current_price: row.get(3)?,
        increment: row.get(4)?,
        duration_secs: row.get(5)?,
        available: status == LotStatus::Active.as_str(),
        seller: row.get(7)?,
        top_bidder: row.get(8)?,
    })
}
