//! Order gateway
//!
//! Single entry point for order placement. Classifies venue rejections
//! into recovery paths: retry after backoff when the borrow pool is
//! empty, enable collateral and retry, fall back to the non-leveraged
//! order variant, or give up. Also places the compensating order when a
//! multi-leg execution has to roll back.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::core::types::Leg;
use crate::exchange::errors::{codes, ExchangeError};
use crate::exchange::types::{InstrumentClass, OrderRequest};
use crate::exchange::ExchangeClient;

/// Recovery classification of an order placement failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderErrorKind {
    /// Terminal: the account cannot fund the order.
    InsufficientBalance,
    /// Transient venue-side shortage; retry once after a backoff.
    BorrowPoolExhausted,
    /// Remediable: enable the coin as collateral, then retry once.
    CollateralNotEnabled,
    /// Remediable: retry once with the non-leveraged order variant.
    UnsupportedMarginMode,
    /// Terminal and fatal: credentials are dead, stop the caller.
    Unauthorized,
    /// Terminal: transport failure or timeout.
    Network,
    /// Terminal: anything else.
    Other,
}

/// Map a venue error onto a recovery path.
pub fn classify(error: &ExchangeError) -> OrderErrorKind {
    match error {
        ExchangeError::Rejected { code, .. } => match *code {
            codes::INSUFFICIENT_BALANCE => OrderErrorKind::InsufficientBalance,
            codes::BORROW_POOL_EXHAUSTED => OrderErrorKind::BorrowPoolExhausted,
            codes::COLLATERAL_DISABLED => OrderErrorKind::CollateralNotEnabled,
            codes::MARGIN_MODE_UNSUPPORTED => OrderErrorKind::UnsupportedMarginMode,
            codes::INVALID_API_KEY | codes::EXPIRED_API_KEY => OrderErrorKind::Unauthorized,
            _ => OrderErrorKind::Other,
        },
        ExchangeError::Transport(_) | ExchangeError::Timeout(_) => OrderErrorKind::Network,
        ExchangeError::StreamingUnsupported(_) => OrderErrorKind::Other,
    }
}

/// Retry budget for the recoverable rejection paths.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries allowed per recovery path, on top of the initial attempt.
    pub max_retries: u32,
    /// Sleep before retrying a borrow-pool rejection.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            backoff: Duration::from_secs(10),
        }
    }
}

/// Final result of a gateway placement, successful or not.
#[derive(Debug, Clone)]
pub struct OrderOutcome {
    pub success: bool,
    pub order_id: Option<String>,
    pub price: Option<f64>,
    pub error_kind: Option<OrderErrorKind>,
    pub error: Option<ExchangeError>,
}

impl OrderOutcome {
    fn filled(order_id: String, price: Option<f64>) -> Self {
        Self {
            success: true,
            order_id: Some(order_id),
            price,
            error_kind: None,
            error: None,
        }
    }

    fn failed(kind: OrderErrorKind, error: ExchangeError) -> Self {
        Self {
            success: false,
            order_id: None,
            price: None,
            error_kind: Some(kind),
            error: Some(error),
        }
    }

    /// Whether the failure means credentials are dead.
    pub fn is_unauthorized(&self) -> bool {
        self.error_kind == Some(OrderErrorKind::Unauthorized)
    }
}

/// Places orders with classification-driven recovery.
pub struct OrderGateway {
    client: Arc<dyn ExchangeClient>,
    retry: RetryPolicy,
}

impl OrderGateway {
    pub fn new(client: Arc<dyn ExchangeClient>, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    /// Place one market order for a leg.
    ///
    /// Spot legs start as leveraged margin orders; recovery may clear
    /// the flag. Never returns Err: every failure is folded into the
    /// outcome so multi-leg callers can decide on rollback.
    pub async fn place_order(&self, leg: &Leg, qty: f64) -> OrderOutcome {
        let mut leverage = leg.class == InstrumentClass::Spot;
        let mut borrow_retries = 0u32;
        let mut collateral_retries = 0u32;
        let mut margin_retries = 0u32;

        loop {
            let request = OrderRequest {
                venue: leg.venue.clone(),
                instrument: leg.instrument.clone(),
                class: leg.class,
                side: leg.side,
                qty,
                leverage,
                client_order_id: format!("ord_{}", Uuid::new_v4().simple()),
            };

            let err = match self.client.place_order(request).await {
                Ok(ack) => {
                    info!(
                        event_type = "order_placed",
                        venue = %leg.venue,
                        instrument = %leg.instrument,
                        side = %leg.side,
                        qty,
                        order_id = %ack.order_id,
                        "Order placed"
                    );
                    return OrderOutcome::filled(ack.order_id, ack.price);
                }
                Err(e) => e,
            };

            let kind = classify(&err);
            match kind {
                OrderErrorKind::BorrowPoolExhausted if borrow_retries < self.retry.max_retries => {
                    borrow_retries += 1;
                    warn!(
                        event_type = "order_retry_borrow_pool",
                        venue = %leg.venue,
                        instrument = %leg.instrument,
                        backoff_ms = self.retry.backoff.as_millis() as u64,
                        attempt = borrow_retries,
                        "Borrow pool exhausted, backing off before retry"
                    );
                    tokio::time::sleep(self.retry.backoff).await;
                }
                OrderErrorKind::CollateralNotEnabled
                    if collateral_retries < self.retry.max_retries =>
                {
                    collateral_retries += 1;
                    let coin = base_coin(&leg.instrument);
                    warn!(
                        event_type = "order_retry_collateral",
                        venue = %leg.venue,
                        instrument = %leg.instrument,
                        coin = %coin,
                        "Enabling collateral before retry"
                    );
                    if let Err(remediation_err) = self.client.enable_collateral(&leg.venue, coin).await
                    {
                        error!(
                            event_type = "collateral_enable_failed",
                            venue = %leg.venue,
                            coin = %coin,
                            error = %remediation_err,
                            "Collateral remediation failed"
                        );
                        return OrderOutcome::failed(kind, err);
                    }
                }
                OrderErrorKind::UnsupportedMarginMode
                    if leverage && margin_retries < self.retry.max_retries =>
                {
                    margin_retries += 1;
                    leverage = false;
                    warn!(
                        event_type = "order_retry_no_leverage",
                        venue = %leg.venue,
                        instrument = %leg.instrument,
                        "Margin mode unsupported, retrying without leverage"
                    );
                }
                _ => {
                    error!(
                        event_type = "order_failed",
                        venue = %leg.venue,
                        instrument = %leg.instrument,
                        side = %leg.side,
                        qty,
                        kind = ?kind,
                        error = %err,
                        "Order placement failed"
                    );
                    return OrderOutcome::failed(kind, err);
                }
            }
        }
    }

    /// Place the compensating order for a previously filled leg.
    ///
    /// Failure is logged with the original order id for manual
    /// reconciliation; the outcome is returned so callers can record it.
    pub async fn rollback(&self, leg: &Leg, qty: f64, original_order_id: &str) -> OrderOutcome {
        let inverse = leg.inverse();
        info!(
            event_type = "rollback_started",
            venue = %inverse.venue,
            instrument = %inverse.instrument,
            side = %inverse.side,
            qty,
            original_order_id = %original_order_id,
            "Placing compensating order"
        );
        let outcome = self.place_order(&inverse, qty).await;
        if !outcome.success {
            error!(
                event_type = "rollback_failed",
                venue = %inverse.venue,
                instrument = %inverse.instrument,
                original_order_id = %original_order_id,
                "Compensating order failed, position needs manual reconciliation"
            );
        }
        outcome
    }
}

/// Base coin of an instrument symbol, for collateral remediation.
fn base_coin(instrument: &str) -> &str {
    instrument.strip_suffix("USDT").unwrap_or(instrument)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::test_utils::MockExchange;
    use crate::exchange::types::Side;

    fn spot_leg(side: Side) -> Leg {
        Leg {
            venue: "mock".to_string(),
            instrument: "BTCUSDT".to_string(),
            class: InstrumentClass::Spot,
            side,
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 1,
            backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_classification_table() {
        let rejected = |code| ExchangeError::Rejected {
            venue: "mock".to_string(),
            code,
            message: String::new(),
        };
        assert_eq!(classify(&rejected(170131)), OrderErrorKind::InsufficientBalance);
        assert_eq!(classify(&rejected(170207)), OrderErrorKind::BorrowPoolExhausted);
        assert_eq!(classify(&rejected(170037)), OrderErrorKind::CollateralNotEnabled);
        assert_eq!(classify(&rejected(170312)), OrderErrorKind::UnsupportedMarginMode);
        assert_eq!(classify(&rejected(10003)), OrderErrorKind::Unauthorized);
        assert_eq!(classify(&rejected(10004)), OrderErrorKind::Unauthorized);
        assert_eq!(classify(&rejected(999999)), OrderErrorKind::Other);
        assert_eq!(
            classify(&ExchangeError::Timeout(3000)),
            OrderErrorKind::Network
        );
        assert_eq!(
            classify(&ExchangeError::Transport("reset".to_string())),
            OrderErrorKind::Network
        );
    }

    #[tokio::test]
    async fn test_insufficient_balance_is_terminal() {
        let mock = Arc::new(MockExchange::new());
        mock.push_rejection(codes::INSUFFICIENT_BALANCE, "no funds");
        let gateway = OrderGateway::new(mock.clone(), fast_policy());

        let outcome = gateway.place_order(&spot_leg(Side::Buy), 0.01).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(OrderErrorKind::InsufficientBalance));
        assert_eq!(mock.orders_placed(), 1);
    }

    #[tokio::test]
    async fn test_borrow_pool_retried_once() {
        let mock = Arc::new(MockExchange::new());
        mock.push_rejection(codes::BORROW_POOL_EXHAUSTED, "pool empty");
        let gateway = OrderGateway::new(mock.clone(), fast_policy());

        let outcome = gateway.place_order(&spot_leg(Side::Buy), 0.01).await;
        assert!(outcome.success);
        assert_eq!(mock.orders_placed(), 2);
    }

    #[tokio::test]
    async fn test_borrow_pool_exhausts_retry_budget() {
        let mock = Arc::new(MockExchange::new());
        mock.push_rejection(codes::BORROW_POOL_EXHAUSTED, "pool empty");
        mock.push_rejection(codes::BORROW_POOL_EXHAUSTED, "still empty");
        let gateway = OrderGateway::new(mock.clone(), fast_policy());

        let outcome = gateway.place_order(&spot_leg(Side::Buy), 0.01).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(OrderErrorKind::BorrowPoolExhausted));
        assert_eq!(mock.orders_placed(), 2);
    }

    #[tokio::test]
    async fn test_collateral_remediation_then_retry() {
        let mock = Arc::new(MockExchange::new());
        mock.push_rejection(codes::COLLATERAL_DISABLED, "collateral off");
        let gateway = OrderGateway::new(mock.clone(), fast_policy());

        let outcome = gateway.place_order(&spot_leg(Side::Buy), 0.01).await;
        assert!(outcome.success);
        assert_eq!(mock.orders_placed(), 2);
        assert_eq!(
            mock.collateral_log(),
            vec![("mock".to_string(), "BTC".to_string())]
        );
    }

    #[tokio::test]
    async fn test_collateral_remediation_failure_is_terminal() {
        let mock = Arc::new(MockExchange::new());
        mock.push_rejection(codes::COLLATERAL_DISABLED, "collateral off");
        mock.set_fail_collateral(true);
        let gateway = OrderGateway::new(mock.clone(), fast_policy());

        let outcome = gateway.place_order(&spot_leg(Side::Buy), 0.01).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(OrderErrorKind::CollateralNotEnabled));
        assert_eq!(mock.orders_placed(), 1);
    }

    #[tokio::test]
    async fn test_margin_mode_retries_without_leverage() {
        let mock = Arc::new(MockExchange::new());
        mock.push_rejection(codes::MARGIN_MODE_UNSUPPORTED, "mode unsupported");
        let gateway = OrderGateway::new(mock.clone(), fast_policy());

        let outcome = gateway.place_order(&spot_leg(Side::Buy), 0.01).await;
        assert!(outcome.success);

        let log = mock.order_log();
        assert_eq!(log.len(), 2);
        assert!(log[0].leverage);
        assert!(!log[1].leverage);
    }

    #[tokio::test]
    async fn test_unauthorized_surfaces_fatal_kind() {
        let mock = Arc::new(MockExchange::new());
        mock.push_rejection(codes::EXPIRED_API_KEY, "key expired");
        let gateway = OrderGateway::new(mock.clone(), fast_policy());

        let outcome = gateway.place_order(&spot_leg(Side::Sell), 0.01).await;
        assert!(!outcome.success);
        assert!(outcome.is_unauthorized());
        assert_eq!(mock.orders_placed(), 1);
    }

    #[tokio::test]
    async fn test_rollback_places_inverse_side() {
        let mock = Arc::new(MockExchange::new());
        let gateway = OrderGateway::new(mock.clone(), fast_policy());

        let outcome = gateway.rollback(&spot_leg(Side::Buy), 0.01, "orig-1").await;
        assert!(outcome.success);

        let log = mock.order_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].side, Side::Sell);
    }

    #[test]
    fn test_base_coin_extraction() {
        assert_eq!(base_coin("BTCUSDT"), "BTC");
        assert_eq!(base_coin("SOLUSDT"), "SOL");
        assert_eq!(base_coin("BTCUSD"), "BTCUSD");
    }
}
