//! Wire-shaped data types for the exchange client boundary
//!
//! These types are shared by every exchange client implementation and by
//! the components written against the `ExchangeClient` trait.

use serde::{Deserialize, Serialize};

// =============================================================================
// Order Types
// =============================================================================

/// Direction of an order or leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The opposite direction, used for compensating trades.
    pub fn inverse(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Instrument class of a leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentClass {
    /// Spot market
    Spot,
    /// USDT-margined linear perpetual
    #[serde(alias = "linear-perp", alias = "perp")]
    Linear,
}

impl std::fmt::Display for InstrumentClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstrumentClass::Spot => write!(f, "spot"),
            InstrumentClass::Linear => write!(f, "linear"),
        }
    }
}

/// Market order request sent to a venue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Venue identifier (e.g. "bybit")
    pub venue: String,
    /// Instrument symbol (e.g. "BTCUSDT")
    pub instrument: String,
    /// Spot or linear perpetual
    pub class: InstrumentClass,
    /// Buy or sell
    pub side: Side,
    /// Base-coin quantity
    pub qty: f64,
    /// Place the spot order against margin. Ignored for perpetuals.
    /// The gateway clears this flag when falling back to the
    /// non-leveraged order variant.
    pub leverage: bool,
    /// Caller-assigned id for idempotent submission
    pub client_order_id: String,
}

/// Acknowledgement returned by a venue for a placed order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    /// Venue-assigned order id
    pub order_id: String,
    /// Fill price if the venue reports one (market orders usually don't)
    pub price: Option<f64>,
}

// =============================================================================
// Market Data Types
// =============================================================================

/// Best bid/ask returned by the request/response fallback
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TopOfBook {
    pub bid: Option<f64>,
    pub ask: Option<f64>,
}

/// One raw price level from the streaming feed.
///
/// Price and quantity arrive as strings on the wire; validation and
/// parsing happen at the feed boundary, never inside the book store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLevel {
    pub price: String,
    pub qty: String,
}

impl RawLevel {
    pub fn new(price: impl Into<String>, qty: impl Into<String>) -> Self {
        Self {
            price: price.into(),
            qty: qty.into(),
        }
    }
}

/// Kind of a streaming book message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookEventKind {
    /// Complete replacement of both sides
    Snapshot,
    /// Incremental merge; qty <= 0 removes a level
    Delta,
}

/// One message from a streaming book subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookEvent {
    #[serde(rename = "type")]
    pub kind: BookEventKind,
    pub bids: Vec<RawLevel>,
    pub asks: Vec<RawLevel>,
    /// Update sequence number from the venue, when provided
    pub seq: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_inverse() {
        assert_eq!(Side::Buy.inverse(), Side::Sell);
        assert_eq!(Side::Sell.inverse(), Side::Buy);
    }

    #[test]
    fn test_side_serde_lowercase() {
        let side: Side = serde_json::from_str("\"buy\"").unwrap();
        assert_eq!(side, Side::Buy);
        assert_eq!(serde_json::to_string(&Side::Sell).unwrap(), "\"sell\"");
    }

    #[test]
    fn test_instrument_class_aliases() {
        let class: InstrumentClass = serde_json::from_str("\"linear-perp\"").unwrap();
        assert_eq!(class, InstrumentClass::Linear);
        let class: InstrumentClass = serde_json::from_str("\"spot\"").unwrap();
        assert_eq!(class, InstrumentClass::Spot);
    }

    #[test]
    fn test_book_event_serialization() {
        let event = BookEvent {
            kind: BookEventKind::Snapshot,
            bids: vec![RawLevel::new("100.0", "1.5")],
            asks: vec![RawLevel::new("100.5", "2.0")],
            seq: Some(42),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"snapshot\""));
        assert!(json.contains("\"100.0\""));

        let back: BookEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, BookEventKind::Snapshot);
        assert_eq!(back.seq, Some(42));
    }
}
