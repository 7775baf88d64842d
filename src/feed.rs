// ===============================
// src/feed.rs
// ===============================
//
// Market data channels:
// - QuoteTicker     : tickertape websocket, quote per trade
// - ExecutionTicker : executions websocket, one message per fill of our orders
//
// Both are the same reconnecting ticker underneath; only the endpoint and
// the frame decoder differ. Listeners never see the connection lifecycle,
// messages just resume arriving after a gap.
//
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use rand::Rng;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tracing::{error, info, warn};
use url::Url;

use crate::dispatch::{Dispatcher, Listener, ListenerHandle};
use crate::domain::{Execution, Quote};
use crate::metrics::{EXECUTIONS, QUOTES, WS_RECONNECTS};
use crate::trader::AUTH_HEADER;

const RECONNECT_DELAY_MS: u64 = 1_000;

/// Long-lived websocket subscription decoding server pushes into typed
/// events and fanning them out to listeners.
pub struct Ticker<E: 'static> {
    name: &'static str,
    url: String,
    api_key: String,
    decode: fn(&str) -> Option<E>,
    events: Arc<Dispatcher<E>>,
    connected: AtomicBool,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
}

pub type QuoteTicker = Ticker<Quote>;
pub type ExecutionTicker = Ticker<Execution>;

impl Ticker<Quote> {
    /// Tickertape for every stock on the venue.
    pub fn quotes(ws_base: &str, api_key: &str, account: &str, venue: &str) -> Self {
        Self::with_endpoint(
            "tickertape",
            format!(
                "{}/{}/venues/{}/tickertape",
                ws_base.trim_end_matches('/'),
                account,
                venue
            ),
            api_key,
            decode_quote,
        )
    }

    /// Tickertape narrowed to one stock.
    pub fn quotes_for_stock(ws_base: &str, api_key: &str, account: &str, venue: &str, symbol: &str) -> Self {
        Self::with_endpoint(
            "tickertape",
            format!(
                "{}/{}/venues/{}/tickertape/stocks/{}",
                ws_base.trim_end_matches('/'),
                account,
                venue,
                symbol
            ),
            api_key,
            decode_quote,
        )
    }
}

impl Ticker<Execution> {
    /// Fills for the account across the whole venue.
    pub fn executions(ws_base: &str, api_key: &str, account: &str, venue: &str) -> Self {
        Self::with_endpoint(
            "executions",
            format!(
                "{}/{}/venues/{}/executions",
                ws_base.trim_end_matches('/'),
                account,
                venue
            ),
            api_key,
            decode_execution,
        )
    }

    /// Fills narrowed to one stock.
    pub fn executions_for_stock(ws_base: &str, api_key: &str, account: &str, venue: &str, symbol: &str) -> Self {
        Self::with_endpoint(
            "executions",
            format!(
                "{}/{}/venues/{}/executions/stocks/{}",
                ws_base.trim_end_matches('/'),
                account,
                venue,
                symbol
            ),
            api_key,
            decode_execution,
        )
    }
}

impl<E: Send + Sync + 'static> Ticker<E> {
    fn with_endpoint(
        name: &'static str,
        url: String,
        api_key: &str,
        decode: fn(&str) -> Option<E>,
    ) -> Self {
        Self {
            name,
            url,
            api_key: api_key.to_string(),
            decode,
            events: Arc::new(Dispatcher::new()),
            connected: AtomicBool::new(false),
            shutdown: Mutex::new(None),
        }
    }

    pub fn add_listener(&self, listener: impl Listener<E> + 'static) -> ListenerHandle {
        self.events.add(listener)
    }

    pub fn remove_listener(&self, handle: ListenerHandle) -> bool {
        self.events.remove(handle)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Spawn the receive loop on the current tokio runtime. No-op when
    /// already connected. The loop retries forever until `disconnect`.
    pub fn connect(&self) {
        if self
            .connected
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.shutdown.lock().unwrap() = Some(shutdown_tx);
        tokio::spawn(run_feed(
            self.name,
            self.url.clone(),
            self.api_key.clone(),
            self.decode,
            Arc::clone(&self.events),
            shutdown_rx,
        ));
    }

    pub fn disconnect(&self) {
        if self
            .connected
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(feed = self.name, "not connected");
            return;
        }
        if let Some(shutdown_tx) = self.shutdown.lock().unwrap().take() {
            let _ = shutdown_tx.send(true);
        }
    }
}

async fn run_feed<E: Send + Sync + 'static>(
    name: &'static str,
    url: String,
    api_key: String,
    decode: fn(&str) -> Option<E>,
    events: Arc<Dispatcher<E>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    if let Err(e) = Url::parse(&url) {
        error!(feed = name, ?e, %url, "bad ws url");
        return;
    }

    loop {
        let mut request = match url.as_str().into_client_request() {
            Ok(request) => request,
            Err(e) => {
                error!(feed = name, ?e, %url, "cannot build ws request");
                return;
            }
        };
        match HeaderValue::from_str(&api_key) {
            Ok(value) => {
                request.headers_mut().insert(AUTH_HEADER, value);
            }
            Err(e) => {
                error!(feed = name, ?e, "api key not usable as a header");
                return;
            }
        }

        info!(feed = name, %url, "connecting");
        match connect_async(request).await {
            Ok((mut ws, _rsp)) => {
                info!(feed = name, "connected");
                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown_rx.changed() => {
                            let _ = ws.close(None).await;
                            info!(feed = name, "disconnected");
                            return;
                        }
                        frame = ws.next() => {
                            match frame {
                                Some(Ok(m)) if m.is_text() => {
                                    let txt = match m.into_text() {
                                        Ok(t) => t,
                                        Err(e) => {
                                            warn!(feed = name, ?e, "unreadable text frame");
                                            continue;
                                        }
                                    };
                                    if let Some(event) = decode(&txt) {
                                        events.notify(&event);
                                    }
                                }
                                Some(Ok(_)) => {
                                    // ignore non-text frames
                                }
                                Some(Err(e)) => {
                                    error!(feed = name, ?e, "ws read error");
                                    break;
                                }
                                None => break,
                            }
                        }
                    }
                }
                warn!(feed = name, "stream ended, reconnecting");
            }
            Err(e) => {
                error!(feed = name, ?e, "connect failed");
            }
        }

        WS_RECONNECTS.with_label_values(&[name]).inc();
        let jitter = rand::thread_rng().gen_range(0..=250);
        tokio::select! {
            _ = shutdown_rx.changed() => return,
            _ = sleep(Duration::from_millis(RECONNECT_DELAY_MS + jitter)) => {}
        }
    }
}

/// Tickertape frames wrap the quote: `{"ok": true, "quote": {...}}`.
fn decode_quote(txt: &str) -> Option<Quote> {
    let v: Value = match serde_json::from_str(txt) {
        Ok(v) => v,
        Err(e) => {
            warn!(?e, "quote frame is not json");
            return None;
        }
    };
    if v.get("ok").and_then(Value::as_bool) != Some(true) {
        warn!(
            error = v.get("error").and_then(|e| e.as_str()).unwrap_or("missing ok flag"),
            "quote tick not ok"
        );
        return None;
    }
    let quote = v.get("quote")?;
    match serde_json::from_value::<Quote>(quote.clone()) {
        Ok(quote) => {
            QUOTES.inc();
            Some(quote)
        }
        Err(e) => {
            warn!(?e, "bad quote payload");
            None
        }
    }
}

/// Execution frames are the execution object itself, ok flag inline.
fn decode_execution(txt: &str) -> Option<Execution> {
    let v: Value = match serde_json::from_str(txt) {
        Ok(v) => v,
        Err(e) => {
            warn!(?e, "execution frame is not json");
            return None;
        }
    };
    if v.get("ok").and_then(Value::as_bool) == Some(false) {
        warn!(
            error = v.get("error").and_then(|e| e.as_str()).unwrap_or("unknown"),
            "execution tick not ok"
        );
        return None;
    }
    match serde_json::from_value::<Execution>(v) {
        Ok(execution) => {
            EXECUTIONS.inc();
            Some(execution)
        }
        Err(e) => {
            warn!(?e, "bad execution payload");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_envelope_decodes() {
        let raw = r#"{"ok": true, "quote": {
            "symbol": "FOOBAR", "venue": "TESTEX",
            "bid": 5000, "ask": 5100, "bidSize": 100, "askSize": 80,
            "bidDepth": 1000, "askDepth": 900,
            "last": 5050, "lastSize": 10,
            "lastTrade": "2015-07-08T19:23:43.77Z",
            "quoteTime": "2015-07-08T19:23:43.77Z"
        }}"#;
        let quote = decode_quote(raw).unwrap();
        assert_eq!(quote.symbol, "FOOBAR");
        assert_eq!(quote.bid, 5000);
        assert_eq!(quote.ask_size, 80);
        assert_eq!(quote.last, 5050);
        assert!(quote.last_trade.is_some());
    }

    #[test]
    fn quote_with_empty_book_side_defaults_to_zero() {
        let raw = r#"{"ok": true, "quote": {"symbol": "FOOBAR", "venue": "TESTEX",
                       "ask": 5100, "askSize": 80, "last": 5050, "lastSize": 10}}"#;
        let quote = decode_quote(raw).unwrap();
        assert_eq!(quote.bid, 0);
        assert_eq!(quote.bid_size, 0);
        assert_eq!(quote.ask, 5100);
    }

    #[test]
    fn bad_quote_frames_are_dropped() {
        assert!(decode_quote(r#"{"ok": false, "error": "no such venue"}"#).is_none());
        assert!(decode_quote("not json at all").is_none());
        assert!(decode_quote(r#"{"ok": true}"#).is_none());
    }

    #[test]
    fn execution_decodes_with_embedded_receipt() {
        let raw = r#"{"ok": true, "account": "OGB12345", "venue": "TESTEX", "symbol": "FOOBAR",
            "order": {"ok": true, "symbol": "FOOBAR", "venue": "TESTEX", "direction": "buy",
                      "originalQty": 100, "qty": 0, "price": 5100, "orderType": "limit",
                      "id": 12345, "account": "OGB12345", "ts": "2015-07-05T22:16:18.410Z",
                      "fills": [], "totalFilled": 100, "open": false},
            "standingId": 12345, "incomingId": 12346, "price": 5100, "filled": 100,
            "filledAt": "2015-07-05T22:16:18.410Z",
            "standingComplete": true, "incomingComplete": false}"#;
        let execution = decode_execution(raw).unwrap();
        assert_eq!(execution.standing_id, 12345);
        assert_eq!(execution.incoming_id, 12346);
        assert_eq!(execution.filled, 100);
        assert!(execution.standing_complete);
        assert!(!execution.incoming_complete);
        assert_eq!(execution.order.id, 12345);
        assert!(!execution.order.open);
    }

    #[test]
    fn not_ok_execution_is_dropped() {
        assert!(decode_execution(r#"{"ok": false, "error": "auth"}"#).is_none());
    }

    #[test]
    fn ticker_urls_are_scoped_to_account_and_venue() {
        let quotes = QuoteTicker::quotes("wss://host/ws/", "key", "ACC", "TESTEX");
        assert_eq!(quotes.url, "wss://host/ws/ACC/venues/TESTEX/tickertape");

        let executions = ExecutionTicker::executions("wss://host/ws", "key", "ACC", "TESTEX");
        assert_eq!(executions.url, "wss://host/ws/ACC/venues/TESTEX/executions");

        let scoped = QuoteTicker::quotes_for_stock("wss://host/ws", "key", "ACC", "TESTEX", "FOOBAR");
        assert_eq!(scoped.url, "wss://host/ws/ACC/venues/TESTEX/tickertape/stocks/FOOBAR");
    }
}
