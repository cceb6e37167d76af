//! Streaming book feed
//!
//! Subscribes venues' streaming book feeds and pumps snapshots/deltas
//! into the `BookStore`. Wire levels arrive as strings; malformed levels
//! are dropped here with a warning so the store only ever sees finite
//! numbers.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::book::{BookKey, BookStore};
use crate::exchange::types::{BookEventKind, RawLevel};
use crate::exchange::ExchangeClient;

/// Owns one ingestion task per subscribed (venue, instrument, depth).
pub struct BookFeed {
    client: Arc<dyn ExchangeClient>,
    store: Arc<BookStore>,
    subscribed: Mutex<HashSet<BookKey>>,
    shutdown: CancellationToken,
}

impl BookFeed {
    pub fn new(client: Arc<dyn ExchangeClient>, store: Arc<BookStore>) -> Self {
        Self {
            client,
            store,
            subscribed: Mutex::new(HashSet::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Subscribe a book and start pumping it into the store.
    ///
    /// No-op for an already-subscribed key. Venues without a streaming
    /// feed are skipped silently; their prices are served through the
    /// request/response fallback instead.
    pub async fn subscribe(&self, key: BookKey) -> crate::error::Result<()> {
        if !self.client.supports_streaming(&key.venue) {
            debug!(
                event_type = "feed_skip_no_streaming",
                venue = %key.venue,
                instrument = %key.instrument,
                "Venue has no streaming feed, serving via request/response"
            );
            return Ok(());
        }

        {
            let mut subscribed = self.subscribed.lock().await;
            if !subscribed.insert(key.clone()) {
                return Ok(());
            }
        }

        self.store.ensure_book(&key).await;

        let mut rx = self
            .client
            .subscribe_books(&key.venue, &key.instrument, key.depth)
            .await?;

        info!(
            event_type = "feed_subscribed",
            venue = %key.venue,
            instrument = %key.instrument,
            depth = key.depth,
            "Book subscription started"
        );

        let store = Arc::clone(&self.store);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!(
                            event_type = "feed_stopped",
                            venue = %key.venue,
                            instrument = %key.instrument,
                            "Book ingestion stopped"
                        );
                        break;
                    }
                    event = rx.recv() => {
                        let Some(event) = event else {
                            warn!(
                                event_type = "feed_stream_closed",
                                venue = %key.venue,
                                instrument = %key.instrument,
                                "Book stream closed by venue"
                            );
                            break;
                        };
                        let bids = parse_levels(&event.bids, &key, "bid");
                        let asks = parse_levels(&event.asks, &key, "ask");
                        match event.kind {
                            BookEventKind::Snapshot => {
                                store.apply_snapshot(&key, &bids, &asks, event.seq).await;
                            }
                            BookEventKind::Delta => {
                                store.apply_delta(&key, &bids, &asks, event.seq).await;
                            }
                        }
                    }
                }
            }
        });

        Ok(())
    }

    /// Stop every ingestion task.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// Parse wire levels into (price, qty) pairs, dropping anything that is
/// not a finite number.
fn parse_levels(levels: &[RawLevel], key: &BookKey, side: &str) -> Vec<(f64, f64)> {
    let parsed: Vec<(f64, f64)> = levels
        .iter()
        .filter_map(|level| {
            let price: f64 = level.price.parse().ok()?;
            let qty: f64 = level.qty.parse().ok()?;
            if !price.is_finite() || !qty.is_finite() {
                return None;
            }
            Some((price, qty))
        })
        .collect();

    if parsed.len() < levels.len() {
        warn!(
            event_type = "feed_malformed_levels",
            venue = %key.venue,
            instrument = %key.instrument,
            side = side,
            dropped = levels.len() - parsed.len(),
            "Dropped malformed book levels"
        );
    }
    parsed
}
