//! Arbitrage engine
//!
//! Polls monitored pairs on a fixed tick, computes the percentage
//! spread between the two legs, and fires a two-leg execution when the
//! spread clears the pair's threshold. Leg 1 is placed first; a leg 2
//! failure compensates leg 1. Pairs retire themselves after their
//! execution quota.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::book::{BookFeed, BookKey, BookStore};
use crate::core::events::{EngineEvent, NotificationSink};
use crate::core::gateway::OrderGateway;
use crate::core::types::{Leg, PairConfig, PairExecution};
use crate::exchange::types::Side;
use crate::exchange::ExchangeClient;

const BOOK_DEPTH: usize = 1;

/// Provider of the initially monitored pair set.
#[async_trait]
pub trait PairSource: Send + Sync {
    async fn enabled_pairs(&self) -> crate::error::Result<Vec<PairConfig>>;
}

/// Pair source backed by a fixed list, typically from the config file.
pub struct StaticPairSource {
    pairs: Vec<PairConfig>,
}

impl StaticPairSource {
    pub fn new(pairs: Vec<PairConfig>) -> Self {
        Self { pairs }
    }
}

#[async_trait]
impl PairSource for StaticPairSource {
    async fn enabled_pairs(&self) -> crate::error::Result<Vec<PairConfig>> {
        Ok(self.pairs.iter().filter(|p| p.enabled).cloned().collect())
    }
}

/// Mutable engine state behind one lock.
#[derive(Default)]
struct ArbState {
    pairs: HashMap<String, PairConfig>,
    exec_counts: HashMap<String, u32>,
    executing: HashSet<String>,
    history: Vec<PairExecution>,
}

/// Point-in-time status snapshot of the engine.
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub running: bool,
    pub pair_count: usize,
    pub total_executions: usize,
}

/// Cross-venue arbitrage execution engine.
pub struct ArbitrageEngine {
    state: Arc<Mutex<ArbState>>,
    running: Arc<AtomicBool>,
    tick_interval: Duration,
    gateway: Arc<OrderGateway>,
    store: Arc<BookStore>,
    feed: Arc<BookFeed>,
    client: Arc<dyn ExchangeClient>,
    sink: Arc<dyn NotificationSink>,
    pair_source: Arc<dyn PairSource>,
    task: Mutex<Option<(JoinHandle<()>, CancellationToken)>>,
}

impl ArbitrageEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tick_interval: Duration,
        gateway: Arc<OrderGateway>,
        store: Arc<BookStore>,
        feed: Arc<BookFeed>,
        client: Arc<dyn ExchangeClient>,
        sink: Arc<dyn NotificationSink>,
        pair_source: Arc<dyn PairSource>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(ArbState::default())),
            running: Arc::new(AtomicBool::new(false)),
            tick_interval,
            gateway,
            store,
            feed,
            client,
            sink,
            pair_source,
            task: Mutex::new(None),
        }
    }

    /// Load pairs from the source, subscribe their books, and start the
    /// tick loop. Idempotent: a second call while running is a no-op.
    pub async fn start(&self) -> crate::error::Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let pairs = self.pair_source.enabled_pairs().await?;
        for pair in &pairs {
            self.subscribe_pair_books(pair).await;
        }
        {
            let mut state = self.state.lock().await;
            for pair in pairs {
                state.pairs.insert(pair.id.clone(), pair);
            }
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(run_loop(
            Arc::clone(&self.state),
            Arc::clone(&self.running),
            self.tick_interval,
            Arc::clone(&self.gateway),
            Arc::clone(&self.store),
            Arc::clone(&self.client),
            Arc::clone(&self.sink),
            token.clone(),
        ));
        *self.task.lock().await = Some((handle, token));

        info!(
            event_type = "engine_started",
            tick_ms = self.tick_interval.as_millis() as u64,
            "Arbitrage engine started"
        );
        Ok(())
    }

    /// Stop the tick loop. In-flight executions finish on their own.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some((handle, token)) = self.task.lock().await.take() {
            token.cancel();
            let _ = handle.await;
        }
        info!(event_type = "engine_stopped", "Arbitrage engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Add or replace a monitored pair. Replacing resets its execution
    /// count and drops its history entries from counting toward quota.
    pub async fn upsert_pair(&self, pair: PairConfig) -> crate::error::Result<()> {
        self.subscribe_pair_books(&pair).await;
        let mut state = self.state.lock().await;
        state.exec_counts.remove(&pair.id);
        state.executing.remove(&pair.id);
        info!(event_type = "pair_upserted", pair_id = %pair.id, "Pair configured");
        state.pairs.insert(pair.id.clone(), pair);
        Ok(())
    }

    /// Remove a pair from monitoring. Returns false if unknown.
    pub async fn remove_pair(&self, pair_id: &str) -> bool {
        let mut state = self.state.lock().await;
        let removed = state.pairs.remove(pair_id).is_some();
        state.exec_counts.remove(pair_id);
        state.executing.remove(pair_id);
        if removed {
            info!(event_type = "pair_removed", pair_id = %pair_id, "Pair removed");
        }
        removed
    }

    pub async fn list_pairs(&self) -> Vec<PairConfig> {
        self.state.lock().await.pairs.values().cloned().collect()
    }

    pub async fn status(&self) -> EngineStatus {
        let state = self.state.lock().await;
        EngineStatus {
            running: self.is_running(),
            pair_count: state.pairs.len(),
            total_executions: state.history.len(),
        }
    }

    pub async fn executions_history(&self) -> Vec<PairExecution> {
        self.state.lock().await.history.clone()
    }

    /// Drop all pairs, counters, and history.
    pub async fn clear_all_data(&self) {
        let mut state = self.state.lock().await;
        state.pairs.clear();
        state.exec_counts.clear();
        state.executing.clear();
        state.history.clear();
        info!(event_type = "engine_cleared", "All pair data cleared");
    }

    async fn subscribe_pair_books(&self, pair: &PairConfig) {
        for leg in [&pair.leg1, &pair.leg2] {
            let key = BookKey::new(leg.venue.clone(), leg.instrument.clone(), BOOK_DEPTH);
            if let Err(e) = self.feed.subscribe(key).await {
                warn!(
                    event_type = "pair_subscribe_failed",
                    pair_id = %pair.id,
                    venue = %leg.venue,
                    instrument = %leg.instrument,
                    error = %e,
                    "Book subscription failed, relying on request/response prices"
                );
            }
        }
    }
}

/// Tick loop body. Runs until stopped or cancelled.
#[allow(clippy::too_many_arguments)]
async fn run_loop(
    state: Arc<Mutex<ArbState>>,
    running: Arc<AtomicBool>,
    tick_interval: Duration,
    gateway: Arc<OrderGateway>,
    store: Arc<BookStore>,
    client: Arc<dyn ExchangeClient>,
    sink: Arc<dyn NotificationSink>,
    token: CancellationToken,
) {
    while running.load(Ordering::SeqCst) {
        let tick_start = tokio::time::Instant::now();

        tick(&state, &gateway, &store, &client, &sink).await;

        let elapsed = tick_start.elapsed();
        let sleep_for = tick_interval.saturating_sub(elapsed);
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(sleep_for) => {}
        }
    }
}

/// Evaluate every pair once. Per-pair failures are logged and never
/// stop the loop or the remaining pairs.
async fn tick(
    state: &Arc<Mutex<ArbState>>,
    gateway: &Arc<OrderGateway>,
    store: &Arc<BookStore>,
    client: &Arc<dyn ExchangeClient>,
    sink: &Arc<dyn NotificationSink>,
) {
    let pairs: Vec<PairConfig> = {
        let state = state.lock().await;
        state.pairs.values().filter(|p| p.enabled).cloned().collect()
    };

    for pair in pairs {
        evaluate_pair(state, gateway, store, client, sink, &pair).await;
    }
}

/// Price one pair and execute if it triggers.
async fn evaluate_pair(
    state: &Arc<Mutex<ArbState>>,
    gateway: &Arc<OrderGateway>,
    store: &Arc<BookStore>,
    client: &Arc<dyn ExchangeClient>,
    sink: &Arc<dyn NotificationSink>,
    pair: &PairConfig,
) {
    let leg1_price = match exec_price(store, client, &pair.leg1).await {
        Some(p) => p,
        None => {
            debug!(event_type = "pair_no_price", pair_id = %pair.id, leg = %pair.leg1, "No usable price");
            return;
        }
    };
    let leg2_price = match exec_price(store, client, &pair.leg2).await {
        Some(p) => p,
        None => {
            debug!(event_type = "pair_no_price", pair_id = %pair.id, leg = %pair.leg2, "No usable price");
            return;
        }
    };

    let spread_pct = (leg2_price - leg1_price) / leg1_price * 100.0;
    sink.publish(&EngineEvent::PriceUpdate {
        pair_id: pair.id.clone(),
        leg1_price,
        leg2_price,
        spread_pct,
    });

    // Trigger check and the in-flight mark happen under one lock so two
    // ticks can never both claim the same pair.
    let should_execute = {
        let mut state = state.lock().await;
        let count = state.exec_counts.get(&pair.id).copied().unwrap_or(0);
        if spread_pct >= pair.threshold_pct
            && count < pair.max_execs
            && !state.executing.contains(&pair.id)
        {
            state.executing.insert(pair.id.clone());
            true
        } else {
            false
        }
    };

    if !should_execute {
        return;
    }

    execute_pair(state, gateway, sink, pair, spread_pct).await;

    state.lock().await.executing.remove(&pair.id);
}

/// Execution price for a leg: ask when buying, bid when selling.
/// Falls back to request/response when the maintained book is empty.
async fn exec_price(
    store: &Arc<BookStore>,
    client: &Arc<dyn ExchangeClient>,
    leg: &Leg,
) -> Option<f64> {
    let key = BookKey::new(leg.venue.clone(), leg.instrument.clone(), BOOK_DEPTH);
    let (bid, ask) = store.best_bid_ask(&key).await;

    let (bid, ask) = if bid.is_none() && ask.is_none() {
        match client.top_of_book(&leg.venue, &leg.instrument).await {
            Ok(tob) => (tob.bid, tob.ask),
            Err(e) => {
                debug!(
                    event_type = "price_fallback_failed",
                    venue = %leg.venue,
                    instrument = %leg.instrument,
                    error = %e,
                    "Request/response price fetch failed"
                );
                (None, None)
            }
        }
    } else {
        (bid, ask)
    };

    let price = match leg.side {
        Side::Buy => ask?,
        Side::Sell => bid?,
    };
    (price > 0.0).then_some(price)
}

/// Run the two-leg execution for a triggered pair.
async fn execute_pair(
    state: &Arc<Mutex<ArbState>>,
    gateway: &Arc<OrderGateway>,
    sink: &Arc<dyn NotificationSink>,
    pair: &PairConfig,
    spread_pct: f64,
) {
    info!(
        event_type = "arb_triggered",
        pair_id = %pair.id,
        spread_pct,
        threshold_pct = pair.threshold_pct,
        qty = pair.qty,
        "Spread cleared threshold, executing"
    );

    let leg1 = gateway.place_order(&pair.leg1, pair.qty).await;
    let Some(leg1_order_id) = leg1.order_id.clone() else {
        log_leg_failure(pair, "arb_leg1_failed", &leg1, "Leg 1 failed, nothing to roll back");
        return;
    };

    let leg2 = gateway.place_order(&pair.leg2, pair.qty).await;
    let Some(leg2_order_id) = leg2.order_id.clone() else {
        log_leg_failure(pair, "arb_leg2_failed", &leg2, "Leg 2 failed, rolling back leg 1");
        gateway.rollback(&pair.leg1, pair.qty, &leg1_order_id).await;
        return;
    };

    let execution = PairExecution {
        ts_ms: chrono::Utc::now().timestamp_millis(),
        pair_id: pair.id.clone(),
        spread_pct,
        qty: pair.qty,
        leg1_order_id: leg1_order_id.clone(),
        leg2_order_id: leg2_order_id.clone(),
    };

    let reached_quota = {
        let mut state = state.lock().await;
        state.history.push(execution);
        let count = state.exec_counts.entry(pair.id.clone()).or_insert(0);
        *count += 1;
        let reached = *count >= pair.max_execs;
        if reached {
            state.pairs.remove(&pair.id);
        }
        reached
    };

    info!(
        event_type = "arb_executed",
        pair_id = %pair.id,
        spread_pct,
        leg1_order_id = %leg1_order_id,
        leg2_order_id = %leg2_order_id,
        "Arbitrage executed"
    );
    sink.publish(&EngineEvent::ArbitrageExecuted {
        pair_id: pair.id.clone(),
        spread_pct,
        qty: pair.qty,
        leg1_order_id,
        leg2_order_id,
    });

    if reached_quota {
        info!(
            event_type = "pair_quota_reached",
            pair_id = %pair.id,
            max_execs = pair.max_execs,
            "Pair reached execution quota, retired"
        );
        sink.publish(&EngineEvent::PairRemoved {
            pair_id: pair.id.clone(),
            executions: pair.max_execs,
        });
    }
}

/// Failed executions never stop the tick loop; dead credentials just
/// log louder so an operator notices.
fn log_leg_failure(
    pair: &PairConfig,
    event_type: &'static str,
    outcome: &crate::core::gateway::OrderOutcome,
    message: &'static str,
) {
    if outcome.is_unauthorized() {
        error!(
            event_type = event_type,
            pair_id = %pair.id,
            kind = ?outcome.error_kind,
            "{message} (credentials rejected)"
        );
    } else {
        warn!(
            event_type = event_type,
            pair_id = %pair.id,
            kind = ?outcome.error_kind,
            "{message}"
        );
    }
}
