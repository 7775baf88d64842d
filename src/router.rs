// ===============================
// src/router.rs
// ===============================
//
// Async order router: trading logic hands orders and cancels to `post` /
// `cancel` and gets on with reacting to the market; two worker tasks own
// the network I/O. The outbound worker drains one FIFO of actions and is
// the only caller of the trading endpoint, so at most one request is in
// flight and actions hit the wire in submission order. The inbound worker
// drains a second FIFO of receipts and fans each one out to listeners, so
// a slow listener never delays the next submission.
//
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::dispatch::{Dispatcher, Listener, ListenerHandle};
use crate::domain::{Order, Receipt};
use crate::metrics::{
    CANCELS, DROPPED_ACTIONS, ORDERS_POSTED, POST_FAILURES, RECEIPTS_DELIVERED, ROUTER_RUNNING,
};
use crate::trader::TradingApi;

/// Work item consumed exactly once by the outbound worker.
#[derive(Debug)]
enum Action {
    Post(Order),
    Cancel(u64),
}

struct Wiring {
    action_tx: mpsc::UnboundedSender<Action>,
    shutdown_tx: watch::Sender<bool>,
}

/// Router bound to one (venue, symbol) pair, like the endpoint paths it
/// drives. `start`/`stop` are idempotent; a stopped router silently drops
/// `post`/`cancel` calls, and actions still queued when `stop` lands are
/// lost rather than drained.
pub struct OrderRouter {
    api: Arc<dyn TradingApi>,
    venue: String,
    symbol: String,
    running: AtomicBool,
    receipts: Arc<Dispatcher<Receipt>>,
    wiring: Mutex<Option<Wiring>>,
}

impl OrderRouter {
    pub fn new(api: Arc<dyn TradingApi>, venue: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            api,
            venue: venue.into(),
            symbol: symbol.into(),
            running: AtomicBool::new(false),
            receipts: Arc::new(Dispatcher::new()),
            wiring: Mutex::new(None),
        }
    }

    /// Spawn the outbound and inbound workers on the current tokio runtime.
    /// No-op when already running.
    pub fn start(&self) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let (action_tx, action_rx) = mpsc::unbounded_channel();
        let (receipt_tx, receipt_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        *self.wiring.lock().unwrap() = Some(Wiring {
            action_tx,
            shutdown_tx,
        });

        tokio::spawn(outbound_worker(
            Arc::clone(&self.api),
            self.venue.clone(),
            self.symbol.clone(),
            action_rx,
            receipt_tx,
            shutdown_rx.clone(),
        ));
        tokio::spawn(inbound_worker(
            Arc::clone(&self.receipts),
            receipt_rx,
            shutdown_rx,
        ));

        ROUTER_RUNNING.set(1);
        info!(venue = %self.venue, symbol = %self.symbol, "order router started");
    }

    /// Signal both workers to terminate. A worker blocked on its queue wakes
    /// immediately; a worker inside a network call finishes that call first.
    /// No-op when already stopped.
    pub fn stop(&self) {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        if let Some(wiring) = self.wiring.lock().unwrap().take() {
            let _ = wiring.shutdown_tx.send(true);
        }
        ROUTER_RUNNING.set(0);
        info!(venue = %self.venue, symbol = %self.symbol, "order router stopping");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Queue an order for submission. Returns as soon as the action is
    /// enqueued; FIFO with respect to other `post`/`cancel` calls.
    pub fn post(&self, order: Order) {
        self.enqueue(Action::Post(order));
    }

    /// Queue a cancel for the given order id. The resulting receipt reaches
    /// registered listeners once the endpoint has answered.
    pub fn cancel(&self, id: u64) {
        self.enqueue(Action::Cancel(id));
    }

    fn enqueue(&self, action: Action) {
        let wiring = self.wiring.lock().unwrap();
        match wiring.as_ref() {
            Some(w) if w.action_tx.send(action).is_ok() => {}
            _ => {
                DROPPED_ACTIONS.inc();
                debug!("router not running, action dropped");
            }
        }
    }

    pub fn add_listener(&self, listener: impl Listener<Receipt> + 'static) -> ListenerHandle {
        self.receipts.add(listener)
    }

    pub fn remove_listener(&self, handle: ListenerHandle) -> bool {
        self.receipts.remove(handle)
    }
}

/// Single consumer of the action queue; the only task that talks to the
/// trading endpoint. A failed submission becomes an error receipt on the
/// inbound queue instead of killing the worker, mirroring the cancel path.
async fn outbound_worker(
    api: Arc<dyn TradingApi>,
    venue: String,
    symbol: String,
    mut action_rx: mpsc::UnboundedReceiver<Action>,
    receipt_tx: mpsc::UnboundedSender<Receipt>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                info!("outbound worker shutting down");
                return;
            }
            next = action_rx.recv() => {
                let Some(action) = next else { return };
                match action {
                    Action::Post(order) => match api.post_order(&order).await {
                        Ok(receipt) => {
                            ORDERS_POSTED.inc();
                            debug!(id = receipt.id, symbol = %receipt.symbol, "order accepted");
                        }
                        Err(e) => {
                            POST_FAILURES.inc();
                            warn!(%e, symbol = %order.symbol, "order submission failed");
                            let _ = receipt_tx.send(Receipt::from_error(
                                &order.venue,
                                &order.symbol,
                                0,
                                e.to_string(),
                            ));
                        }
                    },
                    Action::Cancel(id) => {
                        CANCELS.inc();
                        let receipt = match api.cancel_order(&venue, &symbol, id).await {
                            Ok(receipt) => receipt,
                            Err(e) => {
                                warn!(%e, id, "cancel failed");
                                Receipt::from_error(&venue, &symbol, id, e.to_string())
                            }
                        };
                        let _ = receipt_tx.send(receipt);
                    }
                }
            }
        }
    }
}

/// Single consumer of the receipt queue; delivery happens strictly after
/// the network call that produced the receipt. The shutdown branch is
/// biased first, so receipts still queued when the router stops are
/// dropped, not delivered.
async fn inbound_worker(
    receipts: Arc<Dispatcher<Receipt>>,
    mut receipt_rx: mpsc::UnboundedReceiver<Receipt>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                info!("inbound worker shutting down");
                return;
            }
            next = receipt_rx.recv() => {
                let Some(receipt) = next else { return };
                RECEIPTS_DELIVERED.inc();
                receipts.notify(&receipt);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderType, Side};
    use crate::trader::TraderError;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    #[derive(Default)]
    struct RecordingApi {
        calls: Mutex<Vec<String>>,
        fail_posts: bool,
    }

    impl RecordingApi {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TradingApi for RecordingApi {
        async fn post_order(&self, order: &Order) -> Result<Receipt, TraderError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("post:{}", order.symbol));
            if self.fail_posts {
                return Err(TraderError::Api("order rejected".into()));
            }
            Ok(Receipt {
                ok: true,
                id: 1,
                open: true,
                ..Receipt::default()
            })
        }

        async fn cancel_order(
            &self,
            _venue: &str,
            _symbol: &str,
            id: u64,
        ) -> Result<Receipt, TraderError> {
            self.calls.lock().unwrap().push(format!("cancel:{id}"));
            Ok(Receipt {
                ok: true,
                id,
                open: false,
                total_filled: 5,
                ..Receipt::default()
            })
        }
    }

    fn sample_order() -> Order {
        Order {
            account: "EXB123456".into(),
            venue: "TESTEX".into(),
            symbol: "FOOBAR".into(),
            price: 4000,
            quantity: 5,
            direction: Side::Buy,
            order_type: OrderType::Limit,
        }
    }

    fn router_with(api: Arc<RecordingApi>) -> OrderRouter {
        OrderRouter::new(api, "TESTEX", "FOOBAR")
    }

    async fn wait_until(cond: impl Fn() -> bool) {
        timeout(Duration::from_secs(2), async {
            while !cond() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn actions_hit_the_endpoint_in_submission_order() {
        let api = Arc::new(RecordingApi::default());
        let router = router_with(Arc::clone(&api));
        router.start();

        router.post(sample_order());
        router.cancel(7);

        wait_until(|| api.calls().len() == 2).await;
        assert_eq!(api.calls(), vec!["post:FOOBAR", "cancel:7"]);
    }

    #[tokio::test]
    async fn cancel_receipt_reaches_the_listener_exactly_once() {
        let api = Arc::new(RecordingApi::default());
        let router = router_with(api);
        router.start();

        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            router.add_listener(move |receipt: &Receipt| {
                seen.lock().unwrap().push(receipt.clone());
            });
        }

        router.cancel(42);
        wait_until(|| !seen.lock().unwrap().is_empty()).await;
        sleep(Duration::from_millis(20)).await;

        let receipts = seen.lock().unwrap();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].id, 42);
        assert!(!receipts[0].open);
        assert_eq!(receipts[0].total_filled, 5);
        assert!(receipts[0].ok);
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let api = Arc::new(RecordingApi::default());
        let router = router_with(Arc::clone(&api));

        router.start();
        router.start();
        assert!(router.is_running());

        router.post(sample_order());
        wait_until(|| api.calls().len() == 1).await;

        router.stop();
        router.stop();
        assert!(!router.is_running());
    }

    #[tokio::test]
    async fn stopped_router_drops_actions_silently() {
        let api = Arc::new(RecordingApi::default());
        let router = router_with(Arc::clone(&api));

        // never started: nothing reaches the endpoint
        router.post(sample_order());
        router.cancel(1);
        sleep(Duration::from_millis(50)).await;
        assert!(api.calls().is_empty());

        router.start();
        router.cancel(2);
        wait_until(|| api.calls().len() == 1).await;

        router.stop();
        router.cancel(3);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(api.calls(), vec!["cancel:2"]);
    }

    #[tokio::test]
    async fn no_notifications_after_stop() {
        let api = Arc::new(RecordingApi::default());
        let router = router_with(api);
        router.start();

        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            router.add_listener(move |receipt: &Receipt| {
                seen.lock().unwrap().push(receipt.id);
            });
        }

        router.cancel(1);
        wait_until(|| !seen.lock().unwrap().is_empty()).await;

        router.stop();
        router.cancel(2);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn removed_listener_stops_receiving_mid_stream() {
        let api = Arc::new(RecordingApi::default());
        let router = router_with(api);
        router.start();

        let first = Arc::new(Mutex::new(Vec::new()));
        let second = Arc::new(Mutex::new(Vec::new()));
        {
            let first = Arc::clone(&first);
            router.add_listener(move |receipt: &Receipt| {
                first.lock().unwrap().push(receipt.id);
            });
        }
        let second_handle = {
            let second = Arc::clone(&second);
            router.add_listener(move |receipt: &Receipt| {
                second.lock().unwrap().push(receipt.id);
            })
        };

        router.cancel(1);
        wait_until(|| first.lock().unwrap().len() == 1 && second.lock().unwrap().len() == 1).await;

        assert!(router.remove_listener(second_handle));
        router.cancel(2);
        wait_until(|| first.lock().unwrap().len() == 2).await;
        sleep(Duration::from_millis(20)).await;

        assert_eq!(*first.lock().unwrap(), vec![1, 2]);
        assert_eq!(*second.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn failed_post_is_reported_and_the_worker_survives() {
        let api = Arc::new(RecordingApi {
            fail_posts: true,
            ..RecordingApi::default()
        });
        let router = router_with(Arc::clone(&api));
        router.start();

        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            router.add_listener(move |receipt: &Receipt| {
                seen.lock().unwrap().push(receipt.clone());
            });
        }

        router.post(sample_order());
        wait_until(|| !seen.lock().unwrap().is_empty()).await;
        {
            let receipts = seen.lock().unwrap();
            assert!(!receipts[0].ok);
            assert!(receipts[0]
                .error
                .as_deref()
                .unwrap_or_default()
                .contains("order rejected"));
        }

        // the worker is still draining the queue after the failure
        router.cancel(9);
        wait_until(|| seen.lock().unwrap().len() == 2).await;
        assert_eq!(seen.lock().unwrap()[1].id, 9);
    }
}
