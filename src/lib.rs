// ===============================
// src/lib.rs
// ===============================
//! Client library for the Stockfighter trading API.
//!
//! [`trader::Trader`] issues the REST calls (order entry, cancels, venue
//! state), [`feed`] keeps the quote/execution websockets alive, and
//! [`router::OrderRouter`] decouples trading logic from network I/O by
//! pushing order actions through worker tasks and fanning receipts out to
//! registered listeners.

pub mod config;
pub mod dispatch;
pub mod domain;
pub mod feed;
pub mod metrics;
pub mod router;
pub mod trader;

pub use dispatch::{Dispatcher, Listener, ListenerHandle};
pub use domain::{BookEntry, Execution, Fill, Order, OrderType, Orderbook, Quote, Receipt, Side};
pub use feed::{ExecutionTicker, QuoteTicker, Ticker};
pub use router::OrderRouter;
pub use trader::{Trader, TraderError, TradingApi};
