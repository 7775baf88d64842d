// ===============================
// src/config.rs
// ===============================
use std::env;

use dotenvy::dotenv;

pub const DEFAULT_REST_URL: &str = "https://api.stockfighter.io/ob/api";
pub const DEFAULT_WS_URL: &str = "wss://api.stockfighter.io/ob/api/ws";

#[derive(Clone, Debug)]
pub struct Args {
    // auth & endpoints
    pub api_key: String,
    pub rest_url: String,
    pub ws_url: String,

    // trading identity
    pub account: String,
    pub venue: String,
    pub symbol: String,

    // observability
    pub metrics_port: u16,
}

/// Read configuration from the environment (a `.env` file is honoured).
///
/// Everything except the API key has a working default pointing at the
/// public test venue, so `STOCKFIGHTER_API_KEY=... cargo run` is enough.
pub fn load() -> Args {
    let _ = dotenv();

    let api_key = env::var("STOCKFIGHTER_API_KEY").unwrap_or_default();

    let rest_url = env::var("STOCKFIGHTER_REST_URL")
        .unwrap_or_else(|_| DEFAULT_REST_URL.to_string());
    let ws_url = env::var("STOCKFIGHTER_WS_URL")
        .unwrap_or_else(|_| DEFAULT_WS_URL.to_string());

    let account = env::var("ACCOUNT").unwrap_or_else(|_| "EXB123456".to_string());
    let venue = env::var("VENUE").unwrap_or_else(|_| "TESTEX".to_string());
    let symbol = env::var("SYMBOL")
        .map(|s| s.trim().to_ascii_uppercase())
        .unwrap_or_else(|_| "FOOBAR".to_string());

    let metrics_port = env::var("METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9898);

    Args {
        api_key,
        rest_url,
        ws_url,
        account,
        venue,
        symbol,
        metrics_port,
    }
}
