// ===============================
// src/domain.rs
// ===============================
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    #[serde(rename = "limit")]
    Limit,
    #[serde(rename = "market")]
    Market,
    #[serde(rename = "fill-or-kill")]
    FillOrKill,
    #[serde(rename = "immediate-or-cancel")]
    ImmediateOrCancel,
}

/// Intent to trade. Built by the caller, serialized as-is onto the order
/// entry endpoint; the request key for the symbol is `stock`, unlike every
/// response shape which uses `symbol`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub account: String,
    pub venue: String,
    #[serde(rename = "stock")]
    pub symbol: String,
    pub price: i64,
    #[serde(rename = "qty")]
    pub quantity: i64,
    pub direction: Side,
    #[serde(rename = "orderType")]
    pub order_type: OrderType,
}

/// One partial or full execution of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub price: i64,
    #[serde(rename = "qty")]
    pub quantity: i64,
    #[serde(default)]
    pub ts: Option<DateTime<Utc>>,
}

/// The exchange's view of an order after an action (post, cancel, status
/// query). Never mutated once decoded; a later action produces a fresh one.
///
/// Error receipts (rejected cancels, failed submissions) carry only the
/// fields the server echoed back, so everything defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Receipt {
    pub ok: bool,
    pub error: Option<String>,
    pub id: u64,
    pub venue: String,
    pub symbol: String,
    pub account: String,
    pub direction: Option<Side>,
    #[serde(rename = "originalQty")]
    pub original_quantity: i64,
    /// Quantity still resting on the book.
    #[serde(rename = "qty")]
    pub remaining_quantity: i64,
    pub price: i64,
    // older server builds sent `type` instead of `orderType`
    #[serde(rename = "orderType", alias = "type")]
    pub order_type: Option<OrderType>,
    pub ts: Option<DateTime<Utc>>,
    pub fills: Vec<Fill>,
    #[serde(rename = "totalFilled")]
    pub total_filled: i64,
    pub open: bool,
}

impl Receipt {
    /// Receipt standing in for a server response when the request itself
    /// failed. `ok` is false and `error` holds the reason.
    pub fn from_error(venue: &str, symbol: &str, id: u64, error: String) -> Self {
        Receipt {
            ok: false,
            error: Some(error),
            id,
            venue: venue.to_string(),
            symbol: symbol.to_string(),
            ..Receipt::default()
        }
    }
}

/// Best bid/ask and last-trade snapshot for one stock on one venue.
/// A side with no orders is simply absent from the payload, so the
/// numeric fields default to zero the way the feed documents them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Quote {
    pub symbol: String,
    pub venue: String,
    pub bid: i64,
    pub ask: i64,
    pub bid_size: i64,
    pub ask_size: i64,
    pub bid_depth: i64,
    pub ask_depth: i64,
    pub last: i64,
    pub last_size: i64,
    pub last_trade: Option<DateTime<Utc>>,
    pub quote_time: Option<DateTime<Utc>>,
}

/// Push notification that a standing order matched an incoming one.
/// Carries the affected order's receipt plus the match metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Execution {
    pub ok: bool,
    pub error: Option<String>,
    pub account: String,
    pub venue: String,
    pub symbol: String,
    pub order: Receipt,
    pub standing_id: u64,
    pub incoming_id: u64,
    pub price: i64,
    pub filled: i64,
    pub filled_at: Option<DateTime<Utc>>,
    pub standing_complete: bool,
    pub incoming_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookEntry {
    pub price: i64,
    #[serde(rename = "qty")]
    pub quantity: i64,
    #[serde(rename = "isBuy")]
    pub is_buy: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Orderbook {
    pub venue: String,
    pub symbol: String,
    // the venue sends `null` for an empty book side
    #[serde(deserialize_with = "nullable_entries")]
    pub bids: Vec<BookEntry>,
    #[serde(deserialize_with = "nullable_entries")]
    pub asks: Vec<BookEntry>,
    pub ts: Option<DateTime<Utc>>,
}

fn nullable_entries<'de, D>(de: D) -> Result<Vec<BookEntry>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let entries = Option::<Vec<BookEntry>>::deserialize(de)?;
    Ok(entries.unwrap_or_default())
}
