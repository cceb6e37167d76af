//! Order book store
//!
//! Keeps one bounded-depth book per (venue, instrument, depth) key and
//! serves best bid/ask reads to the execution core. Writers are the feed
//! ingestion tasks; readers are the arbitrage tick loop.

pub mod feed;

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub use feed::BookFeed;

/// One price level of a maintained book.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookLevel {
    pub price: f64,
    pub qty: f64,
}

/// A single bounded-depth order book.
///
/// Bids are kept sorted descending by price, asks ascending; both sides
/// are truncated to `depth` levels after every update.
#[derive(Debug, Clone)]
pub struct OrderBook {
    depth: usize,
    bids: Vec<BookLevel>,
    asks: Vec<BookLevel>,
    last_seq: Option<u64>,
}

impl OrderBook {
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            bids: Vec::new(),
            asks: Vec::new(),
            last_seq: None,
        }
    }

    /// Replace both sides wholesale.
    pub fn apply_snapshot(&mut self, bids: &[(f64, f64)], asks: &[(f64, f64)], seq: Option<u64>) {
        self.bids = bids
            .iter()
            .filter(|(_, qty)| *qty > 0.0)
            .map(|&(price, qty)| BookLevel { price, qty })
            .collect();
        self.asks = asks
            .iter()
            .filter(|(_, qty)| *qty > 0.0)
            .map(|&(price, qty)| BookLevel { price, qty })
            .collect();
        self.last_seq = seq;
        self.normalize();
    }

    /// Merge incremental updates. A quantity of zero (or below) removes
    /// the level at that price.
    pub fn apply_delta(&mut self, bids: &[(f64, f64)], asks: &[(f64, f64)], seq: Option<u64>) {
        for &(price, qty) in bids {
            Self::merge_level(&mut self.bids, price, qty);
        }
        for &(price, qty) in asks {
            Self::merge_level(&mut self.asks, price, qty);
        }
        self.last_seq = seq.or(self.last_seq);
        self.normalize();
    }

    fn merge_level(side: &mut Vec<BookLevel>, price: f64, qty: f64) {
        match side.iter_mut().find(|l| l.price == price) {
            Some(level) if qty > 0.0 => level.qty = qty,
            Some(_) => side.retain(|l| l.price != price),
            None if qty > 0.0 => side.push(BookLevel { price, qty }),
            None => {}
        }
    }

    fn normalize(&mut self) {
        self.bids
            .sort_by(|a, b| b.price.partial_cmp(&a.price).unwrap_or(std::cmp::Ordering::Equal));
        self.asks
            .sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(std::cmp::Ordering::Equal));
        self.bids.truncate(self.depth);
        self.asks.truncate(self.depth);
    }

    /// Best bid and ask; either side may be empty.
    pub fn best_bid_ask(&self) -> (Option<f64>, Option<f64>) {
        (
            self.bids.first().map(|l| l.price),
            self.asks.first().map(|l| l.price),
        )
    }

    pub fn bids(&self) -> &[BookLevel] {
        &self.bids
    }

    pub fn asks(&self) -> &[BookLevel] {
        &self.asks
    }

    pub fn last_seq(&self) -> Option<u64> {
        self.last_seq
    }
}

/// Identity of a maintained book.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BookKey {
    pub venue: String,
    pub instrument: String,
    pub depth: usize,
}

impl BookKey {
    pub fn new(venue: impl Into<String>, instrument: impl Into<String>, depth: usize) -> Self {
        Self {
            venue: venue.into(),
            instrument: instrument.into(),
            depth,
        }
    }
}

/// Concurrent map of maintained books.
#[derive(Debug, Default)]
pub struct BookStore {
    books: RwLock<HashMap<BookKey, OrderBook>>,
}

impl BookStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            books: RwLock::new(HashMap::new()),
        })
    }

    /// Create an empty book for the key if none exists yet.
    pub async fn ensure_book(&self, key: &BookKey) {
        let mut books = self.books.write().await;
        books
            .entry(key.clone())
            .or_insert_with(|| OrderBook::new(key.depth));
    }

    pub async fn apply_snapshot(
        &self,
        key: &BookKey,
        bids: &[(f64, f64)],
        asks: &[(f64, f64)],
        seq: Option<u64>,
    ) {
        let mut books = self.books.write().await;
        books
            .entry(key.clone())
            .or_insert_with(|| OrderBook::new(key.depth))
            .apply_snapshot(bids, asks, seq);
    }

    pub async fn apply_delta(
        &self,
        key: &BookKey,
        bids: &[(f64, f64)],
        asks: &[(f64, f64)],
        seq: Option<u64>,
    ) {
        let mut books = self.books.write().await;
        books
            .entry(key.clone())
            .or_insert_with(|| OrderBook::new(key.depth))
            .apply_delta(bids, asks, seq);
    }

    /// Best bid/ask for a key; `(None, None)` when the book is unknown.
    pub async fn best_bid_ask(&self, key: &BookKey) -> (Option<f64>, Option<f64>) {
        let books = self.books.read().await;
        books
            .get(key)
            .map(|b| b.best_bid_ask())
            .unwrap_or((None, None))
    }

    pub async fn book_count(&self) -> usize {
        self.books.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_best_bid_ask_depth_one() {
        let mut book = OrderBook::new(1);
        book.apply_snapshot(
            &[(100.0, 1.0), (99.0, 2.0)],
            &[(101.0, 1.0), (102.0, 2.0)],
            None,
        );
        assert_eq!(book.best_bid_ask(), (Some(100.0), Some(101.0)));
        assert_eq!(book.bids().len(), 1);
        assert_eq!(book.asks().len(), 1);
    }

    #[test]
    fn test_delta_zero_qty_removes_level() {
        let mut book = OrderBook::new(5);
        book.apply_snapshot(&[(100.0, 1.0), (99.0, 2.0)], &[(101.0, 1.0)], Some(1));
        book.apply_delta(&[(100.0, 0.0)], &[], Some(2));
        assert_eq!(book.best_bid_ask(), (Some(99.0), Some(101.0)));
        assert_eq!(book.last_seq(), Some(2));
    }

    #[test]
    fn test_delta_updates_and_inserts() {
        let mut book = OrderBook::new(5);
        book.apply_snapshot(&[(100.0, 1.0)], &[(101.0, 1.0)], None);
        book.apply_delta(&[(100.0, 3.0), (100.5, 0.5)], &[(101.5, 2.0)], None);
        assert_eq!(book.best_bid_ask(), (Some(100.5), Some(101.0)));
        assert_eq!(book.bids().len(), 2);
        assert_eq!(book.asks().len(), 2);
    }

    #[test]
    fn test_empty_side_reports_none() {
        let mut book = OrderBook::new(3);
        book.apply_snapshot(&[], &[(101.0, 1.0)], None);
        assert_eq!(book.best_bid_ask(), (None, Some(101.0)));
    }

    #[test]
    fn test_depth_bound_keeps_best_levels() {
        let mut book = OrderBook::new(2);
        book.apply_snapshot(
            &[(98.0, 1.0), (100.0, 1.0), (99.0, 1.0)],
            &[(103.0, 1.0), (101.0, 1.0), (102.0, 1.0)],
            None,
        );
        assert_eq!(book.bids().iter().map(|l| l.price).collect::<Vec<_>>(), vec![100.0, 99.0]);
        assert_eq!(book.asks().iter().map(|l| l.price).collect::<Vec<_>>(), vec![101.0, 102.0]);
    }

    #[tokio::test]
    async fn test_store_unknown_key() {
        let store = BookStore::new();
        let key = BookKey::new("bybit", "BTCUSDT", 1);
        assert_eq!(store.best_bid_ask(&key).await, (None, None));

        store.apply_snapshot(&key, &[(100.0, 1.0)], &[(101.0, 1.0)], None).await;
        assert_eq!(store.best_bid_ask(&key).await, (Some(100.0), Some(101.0)));
        assert_eq!(store.book_count().await, 1);
    }
}
