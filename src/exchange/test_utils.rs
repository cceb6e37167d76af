//! Shared test utilities for the exchange boundary
//!
//! Provides a scripted `MockExchange` used by gateway, engine, and
//! integration tests. Responses are queued per call; an empty queue
//! yields a default successful fill.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::exchange::errors::{ExchangeError, ExchangeResult};
use crate::exchange::traits::ExchangeClient;
use crate::exchange::types::{BookEvent, OrderAck, OrderRequest, TopOfBook};

/// Scripted mock exchange client.
///
/// `push_response` enqueues the outcome of the next `place_order` call;
/// once the queue is empty every order fills at a fixed price. All calls
/// are recorded for assertions.
pub struct MockExchange {
    orders: Mutex<Vec<OrderRequest>>,
    responses: Mutex<VecDeque<ExchangeResult<OrderAck>>>,
    collateral_calls: Mutex<Vec<(String, String)>>,
    fail_collateral: AtomicBool,
    quotes: Mutex<HashMap<(String, String), TopOfBook>>,
    feed_txs: Mutex<HashMap<(String, String, usize), mpsc::Sender<BookEvent>>>,
    streaming: bool,
    order_seq: AtomicU64,
}

impl MockExchange {
    pub fn new() -> Self {
        Self {
            orders: Mutex::new(Vec::new()),
            responses: Mutex::new(VecDeque::new()),
            collateral_calls: Mutex::new(Vec::new()),
            fail_collateral: AtomicBool::new(false),
            quotes: Mutex::new(HashMap::new()),
            feed_txs: Mutex::new(HashMap::new()),
            streaming: true,
            order_seq: AtomicU64::new(1),
        }
    }

    /// Mock for a venue with no streaming book feed.
    pub fn without_streaming() -> Self {
        let mut mock = Self::new();
        mock.streaming = false;
        mock
    }

    /// Queue the outcome of the next `place_order` call.
    pub fn push_response(&self, response: ExchangeResult<OrderAck>) {
        self.responses.lock().unwrap().push_back(response);
    }

    /// Queue a vendor rejection with the given code.
    pub fn push_rejection(&self, code: i64, message: &str) {
        self.push_response(Err(ExchangeError::Rejected {
            venue: "mock".to_string(),
            code,
            message: message.to_string(),
        }));
    }

    /// Make `enable_collateral` fail.
    pub fn set_fail_collateral(&self, fail: bool) {
        self.fail_collateral.store(fail, Ordering::SeqCst);
    }

    /// Seed the request/response top-of-book for an instrument.
    pub fn set_top_of_book(&self, venue: &str, instrument: &str, bid: f64, ask: f64) {
        self.quotes.lock().unwrap().insert(
            (venue.to_string(), instrument.to_string()),
            TopOfBook {
                bid: Some(bid),
                ask: Some(ask),
            },
        );
    }

    /// Push a book event into an open subscription.
    ///
    /// Returns false if nothing is subscribed to that key or the
    /// receiver was dropped.
    pub async fn push_book_event(
        &self,
        venue: &str,
        instrument: &str,
        depth: usize,
        event: BookEvent,
    ) -> bool {
        let tx = {
            let txs = self.feed_txs.lock().unwrap();
            txs.get(&(venue.to_string(), instrument.to_string(), depth))
                .cloned()
        };
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Number of orders placed so far.
    pub fn orders_placed(&self) -> usize {
        self.orders.lock().unwrap().len()
    }

    /// Snapshot of every order request received.
    pub fn order_log(&self) -> Vec<OrderRequest> {
        self.orders.lock().unwrap().clone()
    }

    /// Snapshot of every (venue, coin) collateral remediation call.
    pub fn collateral_log(&self) -> Vec<(String, String)> {
        self.collateral_calls.lock().unwrap().clone()
    }

    /// True once a subscription exists for the key.
    pub fn is_subscribed(&self, venue: &str, instrument: &str, depth: usize) -> bool {
        self.feed_txs
            .lock()
            .unwrap()
            .contains_key(&(venue.to_string(), instrument.to_string(), depth))
    }
}

impl Default for MockExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeClient for MockExchange {
    async fn place_order(&self, order: OrderRequest) -> ExchangeResult<OrderAck> {
        self.orders.lock().unwrap().push(order);

        // Small simulated latency so concurrency tests have a window
        tokio::time::sleep(tokio::time::Duration::from_millis(2)).await;

        if let Some(scripted) = self.responses.lock().unwrap().pop_front() {
            return scripted;
        }

        let seq = self.order_seq.fetch_add(1, Ordering::Relaxed);
        Ok(OrderAck {
            order_id: format!("mock-{seq}"),
            price: Some(42_000.0),
        })
    }

    async fn enable_collateral(&self, venue: &str, coin: &str) -> ExchangeResult<()> {
        self.collateral_calls
            .lock()
            .unwrap()
            .push((venue.to_string(), coin.to_string()));
        if self.fail_collateral.load(Ordering::SeqCst) {
            return Err(ExchangeError::Rejected {
                venue: venue.to_string(),
                code: -1,
                message: "collateral switch rejected".to_string(),
            });
        }
        Ok(())
    }

    async fn top_of_book(&self, venue: &str, instrument: &str) -> ExchangeResult<TopOfBook> {
        let quotes = self.quotes.lock().unwrap();
        Ok(quotes
            .get(&(venue.to_string(), instrument.to_string()))
            .copied()
            .unwrap_or_default())
    }

    async fn subscribe_books(
        &self,
        venue: &str,
        instrument: &str,
        depth: usize,
    ) -> ExchangeResult<mpsc::Receiver<BookEvent>> {
        let (tx, rx) = mpsc::channel(64);
        self.feed_txs
            .lock()
            .unwrap()
            .insert((venue.to_string(), instrument.to_string(), depth), tx);
        Ok(rx)
    }

    fn supports_streaming(&self, _venue: &str) -> bool {
        self.streaming
    }
}
