// ===============================
// src/trader.rs
// ===============================
//
// Synchronous request/response client for the exchange REST API. One call,
// one HTTP round trip, one decoded response. The order router drives this
// through the `TradingApi` trait so tests can swap in a stub endpoint.
//
use ahash::AHashMap as HashMap;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::domain::{Order, Orderbook, Quote, Receipt};

/// Auth header carried on every request, REST and websocket alike.
pub const AUTH_HEADER: &str = "X-Starfighter-Authorization";

#[derive(Debug, Error)]
pub enum TraderError {
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server rejected request: {0}")]
    Api(String),
    #[error("bad response body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// The slice of the endpoint the order router depends on.
#[async_trait]
pub trait TradingApi: Send + Sync {
    async fn post_order(&self, order: &Order) -> Result<Receipt, TraderError>;
    async fn cancel_order(
        &self,
        venue: &str,
        symbol: &str,
        id: u64,
    ) -> Result<Receipt, TraderError>;
}

#[derive(Clone)]
pub struct Trader {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    name: String,
    symbol: String,
}

#[derive(Debug, Deserialize)]
struct SymbolList {
    #[serde(default)]
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct OrderList {
    #[serde(default)]
    orders: Vec<Receipt>,
}

impl Trader {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send one request, check the `ok`/`error` envelope, decode the body.
    async fn request_json<T: serde::de::DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<T, TraderError> {
        let rsp = req.header(AUTH_HEADER, &self.api_key).send().await?;
        let status = rsp.status();
        let body: Value = rsp.json().await?;
        ensure_ok(&body)?;
        if !status.is_success() {
            return Err(TraderError::Api(format!("http {status}")));
        }
        Ok(serde_json::from_value(body)?)
    }

    /// Check the API is up.
    pub async fn heartbeat(&self) -> Result<bool, TraderError> {
        let body: Value = self
            .request_json(self.http.get(self.url("/heartbeat")))
            .await?;
        Ok(body.get("ok").and_then(Value::as_bool).unwrap_or(false))
    }

    /// Check one venue is up.
    pub async fn venue_heartbeat(&self, venue: &str) -> Result<bool, TraderError> {
        let body: Value = self
            .request_json(self.http.get(self.url(&format!("/venues/{venue}/heartbeat"))))
            .await?;
        Ok(body.get("ok").and_then(Value::as_bool).unwrap_or(false))
    }

    /// Stocks traded on a venue, as symbol -> display name.
    pub async fn list_symbols(&self, venue: &str) -> Result<HashMap<String, String>, TraderError> {
        let list: SymbolList = self
            .request_json(self.http.get(self.url(&format!("/venues/{venue}/stocks"))))
            .await?;
        Ok(list
            .symbols
            .into_iter()
            .map(|s| (s.symbol, s.name))
            .collect())
    }

    pub async fn orderbook(&self, venue: &str, symbol: &str) -> Result<Orderbook, TraderError> {
        self.request_json(
            self.http
                .get(self.url(&format!("/venues/{venue}/stocks/{symbol}"))),
        )
        .await
    }

    /// Current quote over REST. Unlike the websocket tickertape, the REST
    /// body is the quote itself rather than an envelope around one.
    pub async fn quote(&self, venue: &str, symbol: &str) -> Result<Quote, TraderError> {
        self.request_json(
            self.http
                .get(self.url(&format!("/venues/{venue}/stocks/{symbol}/quote"))),
        )
        .await
    }

    pub async fn order_status(
        &self,
        venue: &str,
        symbol: &str,
        id: u64,
    ) -> Result<Receipt, TraderError> {
        self.request_json(
            self.http
                .get(self.url(&format!("/venues/{venue}/stocks/{symbol}/orders/{id}"))),
        )
        .await
    }

    /// All orders for an account on a venue.
    pub async fn account_orders(
        &self,
        venue: &str,
        account: &str,
    ) -> Result<Vec<Receipt>, TraderError> {
        let list: OrderList = self
            .request_json(
                self.http
                    .get(self.url(&format!("/venues/{venue}/accounts/{account}/orders"))),
            )
            .await?;
        Ok(list.orders)
    }

    /// Orders for an account, narrowed to one stock.
    pub async fn account_orders_for(
        &self,
        venue: &str,
        account: &str,
        symbol: &str,
    ) -> Result<Vec<Receipt>, TraderError> {
        let list: OrderList = self
            .request_json(self.http.get(self.url(&format!(
                "/venues/{venue}/accounts/{account}/stocks/{symbol}/orders"
            ))))
            .await?;
        Ok(list.orders)
    }

    pub async fn post_order(&self, order: &Order) -> Result<Receipt, TraderError> {
        debug!(symbol = %order.symbol, venue = %order.venue, qty = order.quantity, "posting order");
        let path = format!("/venues/{}/stocks/{}/orders", order.venue, order.symbol);
        self.request_json(self.http.post(self.url(&path)).json(order))
            .await
    }

    pub async fn cancel_order(
        &self,
        venue: &str,
        symbol: &str,
        id: u64,
    ) -> Result<Receipt, TraderError> {
        debug!(id, %venue, %symbol, "cancelling order");
        self.request_json(
            self.http
                .delete(self.url(&format!("/venues/{venue}/stocks/{symbol}/orders/{id}"))),
        )
        .await
    }
}

#[async_trait]
impl TradingApi for Trader {
    async fn post_order(&self, order: &Order) -> Result<Receipt, TraderError> {
        Trader::post_order(self, order).await
    }

    async fn cancel_order(
        &self,
        venue: &str,
        symbol: &str,
        id: u64,
    ) -> Result<Receipt, TraderError> {
        Trader::cancel_order(self, venue, symbol, id).await
    }
}

fn ensure_ok(body: &Value) -> Result<(), TraderError> {
    if body.get("ok").and_then(Value::as_bool) == Some(false) {
        let msg = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown server error");
        return Err(TraderError::Api(msg.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_error_is_surfaced() {
        let body = serde_json::json!({"ok": false, "error": "Auth failed"});
        match ensure_ok(&body) {
            Err(TraderError::Api(msg)) => assert_eq!(msg, "Auth failed"),
            other => panic!("expected api error, got {other:?}"),
        }
        assert!(ensure_ok(&serde_json::json!({"ok": true})).is_ok());
        // bodies without an ok flag fall through to field decoding
        assert!(ensure_ok(&serde_json::json!({})).is_ok());
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let t = Trader::new("https://api.example.test/ob/api/", "key");
        assert_eq!(t.url("/heartbeat"), "https://api.example.test/ob/api/heartbeat");
    }

    #[test]
    fn symbol_listing_becomes_a_map() {
        let raw = r#"{"ok": true, "symbols": [
            {"name": "Foreign Owned Occluded Bridge Architecture Resources", "symbol": "FOOBAR"}
        ]}"#;
        let list: SymbolList = serde_json::from_str(raw).unwrap();
        let map: HashMap<String, String> = list
            .symbols
            .into_iter()
            .map(|s| (s.symbol, s.name))
            .collect();
        assert_eq!(
            map.get("FOOBAR").map(String::as_str),
            Some("Foreign Owned Occluded Bridge Architecture Resources")
        );
    }
}
