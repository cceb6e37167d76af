//! Paper trading exchange client
//!
//! In-memory venue used for dry runs. Every order fills instantly at the
//! seeded quote and the streaming feed replays the seeded book as
//! periodic snapshots.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::exchange::errors::ExchangeResult;
use crate::exchange::traits::ExchangeClient;
use crate::exchange::types::{
    BookEvent, BookEventKind, OrderAck, OrderRequest, RawLevel, Side, TopOfBook,
};

const SNAPSHOT_INTERVAL_MS: u64 = 200;

/// Simulated exchange that fills every order at the seeded quote.
pub struct PaperExchange {
    quotes: Mutex<HashMap<(String, String), (f64, f64)>>,
    fills: AtomicU64,
}

impl PaperExchange {
    pub fn new() -> Self {
        Self {
            quotes: Mutex::new(HashMap::new()),
            fills: AtomicU64::new(0),
        }
    }

    /// Seed the bid/ask quote for an instrument.
    pub fn set_quote(&self, venue: &str, instrument: &str, bid: f64, ask: f64) {
        self.quotes
            .lock()
            .unwrap()
            .insert((venue.to_string(), instrument.to_string()), (bid, ask));
    }

    /// Total number of simulated fills so far.
    pub fn fill_count(&self) -> u64 {
        self.fills.load(Ordering::Relaxed)
    }

    fn quote(&self, venue: &str, instrument: &str) -> Option<(f64, f64)> {
        self.quotes
            .lock()
            .unwrap()
            .get(&(venue.to_string(), instrument.to_string()))
            .copied()
    }
}

impl Default for PaperExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeClient for PaperExchange {
    async fn place_order(&self, order: OrderRequest) -> ExchangeResult<OrderAck> {
        let fill_price = self.quote(&order.venue, &order.instrument).map(|(bid, ask)| {
            match order.side {
                Side::Buy => ask,
                Side::Sell => bid,
            }
        });
        self.fills.fetch_add(1, Ordering::Relaxed);
        let order_id = format!("paper-{}", Uuid::new_v4().simple());
        debug!(
            event_type = "paper_fill",
            venue = %order.venue,
            instrument = %order.instrument,
            side = %order.side,
            qty = order.qty,
            order_id = %order_id,
            "Simulated fill"
        );
        Ok(OrderAck {
            order_id,
            price: fill_price,
        })
    }

    async fn enable_collateral(&self, _venue: &str, _coin: &str) -> ExchangeResult<()> {
        Ok(())
    }

    async fn top_of_book(&self, venue: &str, instrument: &str) -> ExchangeResult<TopOfBook> {
        Ok(match self.quote(venue, instrument) {
            Some((bid, ask)) => TopOfBook {
                bid: Some(bid),
                ask: Some(ask),
            },
            None => TopOfBook::default(),
        })
    }

    async fn subscribe_books(
        &self,
        venue: &str,
        instrument: &str,
        _depth: usize,
    ) -> ExchangeResult<mpsc::Receiver<BookEvent>> {
        let (tx, rx) = mpsc::channel(16);
        let venue = venue.to_string();
        let instrument = instrument.to_string();
        let quotes = self.quote(&venue, &instrument);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(SNAPSHOT_INTERVAL_MS));
            loop {
                ticker.tick().await;
                let (bid, ask) = match quotes {
                    Some(q) => q,
                    None => continue,
                };
                let event = BookEvent {
                    kind: BookEventKind::Snapshot,
                    bids: vec![RawLevel::new(bid.to_string(), "1.0")],
                    asks: vec![RawLevel::new(ask.to_string(), "1.0")],
                    seq: None,
                };
                // Receiver dropped means the subscription is over
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    fn supports_streaming(&self, _venue: &str) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::types::InstrumentClass;

    #[tokio::test]
    async fn test_fill_at_seeded_quote() {
        let paper = PaperExchange::new();
        paper.set_quote("paper", "BTCUSDT", 99.0, 101.0);

        let ack = paper
            .place_order(OrderRequest {
                venue: "paper".to_string(),
                instrument: "BTCUSDT".to_string(),
                class: InstrumentClass::Spot,
                side: Side::Buy,
                qty: 0.5,
                leverage: false,
                client_order_id: "p-1".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(ack.price, Some(101.0));
        assert_eq!(paper.fill_count(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_stream_replays_quote() {
        let paper = PaperExchange::new();
        paper.set_quote("paper", "ETHUSDT", 2000.0, 2001.0);

        let mut rx = paper.subscribe_books("paper", "ETHUSDT", 1).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, BookEventKind::Snapshot);
        assert_eq!(event.bids[0].price, "2000");
    }
}
