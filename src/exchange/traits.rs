//! Exchange client trait definition
//!
//! The ExchangeClient trait is the single capability the execution core
//! consumes from the outside world: place an order, run one account
//! remediation call, fetch top-of-book over request/response, and open a
//! streaming book subscription.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::exchange::errors::ExchangeResult;
use crate::exchange::types::{BookEvent, OrderAck, OrderRequest, TopOfBook};

/// Abstract exchange connectivity consumed by the execution core.
///
/// Implementations own authentication, transport, and reconnection; the
/// core never sees any of that. All methods may suspend on network I/O.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Submit a market order to a venue.
    ///
    /// A venue-side rejection surfaces as `ExchangeError::Rejected` with
    /// the vendor code intact; the order gateway classifies it.
    async fn place_order(&self, order: OrderRequest) -> ExchangeResult<OrderAck>;

    /// Enable a coin as account collateral.
    ///
    /// Remediation call used by the gateway when an order is rejected
    /// because the base coin is not collateral-enabled.
    async fn enable_collateral(&self, venue: &str, coin: &str) -> ExchangeResult<()>;

    /// Fetch the current best bid/ask over request/response.
    ///
    /// Used as a fallback while the streaming book has no data yet.
    async fn top_of_book(&self, venue: &str, instrument: &str) -> ExchangeResult<TopOfBook>;

    /// Open a streaming book subscription for (venue, instrument, depth).
    ///
    /// Returns the receiving end of the event stream; the subscription
    /// lives until the receiver is dropped.
    async fn subscribe_books(
        &self,
        venue: &str,
        instrument: &str,
        depth: usize,
    ) -> ExchangeResult<mpsc::Receiver<BookEvent>>;

    /// Whether the venue pushes a streaming book feed at all.
    ///
    /// Venues without one are served exclusively through `top_of_book`.
    fn supports_streaming(&self, venue: &str) -> bool;
}
