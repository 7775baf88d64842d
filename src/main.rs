// ===============================
// src/main.rs
// ===============================
//
// Demo binary: checks the API and venue are up, starts the order router
// with a logging listener, keeps the quote and execution feeds connected,
// and (with --demo-order) posts one throwaway order and cancels it through
// the router. Ctrl-C shuts everything down.
//
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use clap::Parser;
use tokio::{select, time::Duration};
use tracing::{info, warn};

use stockfighter_client::config;
use stockfighter_client::domain::{Execution, Order, OrderType, Quote, Receipt, Side};
use stockfighter_client::feed::{ExecutionTicker, QuoteTicker};
use stockfighter_client::metrics;
use stockfighter_client::router::OrderRouter;
use stockfighter_client::trader::Trader;

#[derive(Debug, Parser)]
#[command(name = "stockfighter_client", about = "Stockfighter trading client demo")]
struct Cli {
    /// Venue to trade on (overrides VENUE)
    #[arg(long)]
    venue: Option<String>,

    /// Stock symbol (overrides SYMBOL)
    #[arg(long)]
    symbol: Option<String>,

    /// Trading account (overrides ACCOUNT)
    #[arg(long)]
    account: Option<String>,

    /// Post one demo order and cancel it through the router
    #[arg(long)]
    demo_order: bool,
}

#[tokio::main]
async fn main() {
    // ---- Logging ----
    tracing_subscriber::fmt().with_env_filter("info").init();

    // ---- Config (env/.env, flags win) ----
    let cli = Cli::parse();
    let mut args = config::load();
    if let Some(venue) = cli.venue {
        args.venue = venue;
    }
    if let Some(symbol) = cli.symbol {
        args.symbol = symbol;
    }
    if let Some(account) = cli.account {
        args.account = account;
    }

    // ---- Metrics ----
    metrics::init();
    tokio::spawn(metrics::serve_metrics(args.metrics_port));

    info!(
        venue = %args.venue,
        symbol = %args.symbol,
        account = %args.account,
        rest = %args.rest_url,
        ws = %args.ws_url,
        "startup config"
    );

    let trader = Trader::new(&args.rest_url, &args.api_key);

    // ---- Liveness ----
    match trader.heartbeat().await {
        Ok(true) => info!("api up"),
        Ok(false) => warn!("api heartbeat came back not-ok"),
        Err(e) => warn!(%e, "api heartbeat failed"),
    }
    match trader.venue_heartbeat(&args.venue).await {
        Ok(true) => info!(venue = %args.venue, "venue up"),
        Ok(false) => warn!(venue = %args.venue, "venue heartbeat came back not-ok"),
        Err(e) => warn!(%e, venue = %args.venue, "venue heartbeat failed"),
    }
    match trader.list_symbols(&args.venue).await {
        Ok(symbols) => {
            for (symbol, name) in &symbols {
                info!(%symbol, %name, "listed stock");
            }
        }
        Err(e) => warn!(%e, "symbol listing failed"),
    }

    // ---- Order router + receipt listener ----
    let router = OrderRouter::new(
        Arc::new(trader.clone()),
        args.venue.clone(),
        args.symbol.clone(),
    );
    router.start();
    router.add_listener(|receipt: &Receipt| match &receipt.error {
        Some(reason) => warn!(id = receipt.id, %reason, "REJECT"),
        None if receipt.open => info!(
            id = receipt.id,
            remaining = receipt.remaining_quantity,
            "OPEN"
        ),
        None => info!(
            id = receipt.id,
            filled = receipt.total_filled,
            fills = receipt.fills.len(),
            "CLOSED"
        ),
    });

    // ---- Market data feeds ----
    let tick_count = Arc::new(AtomicU64::new(0));

    let quotes = QuoteTicker::quotes(&args.ws_url, &args.api_key, &args.account, &args.venue);
    {
        let tick_count = Arc::clone(&tick_count);
        quotes.add_listener(move |_quote: &Quote| {
            tick_count.fetch_add(1, Ordering::Relaxed);
        });
    }
    quotes.connect();

    let executions =
        ExecutionTicker::executions(&args.ws_url, &args.api_key, &args.account, &args.venue);
    executions.add_listener(|execution: &Execution| {
        info!(
            symbol = %execution.symbol,
            price = execution.price,
            filled = execution.filled,
            standing = execution.standing_id,
            incoming = execution.incoming_id,
            "execution"
        );
    });
    executions.connect();

    // ---- Demo order: post synchronously, cancel through the router ----
    if cli.demo_order {
        let order = Order {
            account: args.account.clone(),
            venue: args.venue.clone(),
            symbol: args.symbol.clone(),
            price: 1,
            quantity: 4,
            direction: Side::Sell,
            order_type: OrderType::Market,
        };
        match trader.post_order(&order).await {
            Ok(receipt) => {
                info!(id = receipt.id, "posted demo order, cancelling through the router");
                router.cancel(receipt.id);
            }
            Err(e) => warn!(%e, "demo order failed"),
        }
    }

    // ---- Heartbeat loop ----
    loop {
        select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
            _ = tokio::time::sleep(Duration::from_secs(1)) => {
                info!(ticks = tick_count.swap(0, Ordering::Relaxed), "heartbeat");
            }
        }
    }

    router.stop();
    quotes.disconnect();
    executions.disconnect();
}
