// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Market data --------
pub static QUOTES: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("quotes_total", "quote ticks decoded").unwrap());

pub static EXECUTIONS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("executions_total", "execution ticks decoded").unwrap());

pub static WS_RECONNECTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ws_reconnects_total", "websocket reconnect attempts"),
        &["feed"],
    )
    .unwrap()
});

// -------- Order router --------
pub static ORDERS_POSTED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("orders_posted_total", "orders accepted by the exchange").unwrap());

pub static POST_FAILURES: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("order_post_failures_total", "order submissions that failed").unwrap());

pub static CANCELS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("cancels_total", "cancel requests processed").unwrap());

pub static DROPPED_ACTIONS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "router_dropped_actions_total",
        "actions dropped while the router was stopped",
    )
    .unwrap()
});

pub static RECEIPTS_DELIVERED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "receipts_delivered_total",
        "receipts fanned out to listeners",
    )
    .unwrap()
});

pub static ROUTER_RUNNING: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("router_running", "1 while the order router is running").unwrap());

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(QUOTES.clone())),
        REGISTRY.register(Box::new(EXECUTIONS.clone())),
        REGISTRY.register(Box::new(WS_RECONNECTS.clone())),
        REGISTRY.register(Box::new(ORDERS_POSTED.clone())),
        REGISTRY.register(Box::new(POST_FAILURES.clone())),
        REGISTRY.register(Box::new(CANCELS.clone())),
        REGISTRY.register(Box::new(DROPPED_ACTIONS.clone())),
        REGISTRY.register(Box::new(RECEIPTS_DELIVERED.clone())),
        REGISTRY.register(Box::new(ROUTER_RUNNING.clone())),
    ] {
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// Serve one HTTP request (GET / or /metrics), tiny HTTP 1.1 responder
fn handle_client(mut stream: TcpStream) {
    // Read a bit to consume headers (no full parse)
    let mut _req_buf = [0u8; 1024];
    let _ = stream.read(&mut _req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

// Run the metrics server in a dedicated OS thread (keeps the runtime clean)
pub async fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = TcpListener::bind(&addr)
            .unwrap_or_else(|e| panic!("metrics bind {} failed: {}", addr, e));
        eprintln!("metrics listening on http://{addr}/ (and /metrics)");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => eprintln!("metrics accept error: {}", e),
            }
        }
    });
}
