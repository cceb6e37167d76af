//! Execution engine entry point
//!
//! Orchestrates:
//! 1. Config + logging initialization
//! 2. Paper exchange client seeded from the configured pairs
//! 3. Book store + streaming feed
//! 4. Order gateway + arbitrage engine
//! 5. Ctrl+C graceful shutdown
//!
//! The binary runs against the paper venue; live connectivity plugs in
//! through the same `ExchangeClient` trait.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use arb_bot::book::{BookFeed, BookStore};
use arb_bot::config::{init_logging, load_config, AppConfig};
use arb_bot::core::{
    ArbitrageEngine, BroadcastSink, NotificationSink, OrderGateway, RetryPolicy, StaticPairSource,
};
use arb_bot::exchange::{ExchangeClient, PaperExchange};

/// Broadcast channel capacity for engine events
const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // =========================================================================
    // 1. Config + logging
    // =========================================================================
    dotenvy::dotenv().ok();
    init_logging();

    let config_path =
        std::env::var("ARB_BOT_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, path = %config_path, "Could not load config, starting with defaults");
            AppConfig::default()
        }
    };

    // =========================================================================
    // 2. Paper exchange seeded with synthetic quotes
    // =========================================================================
    let paper = Arc::new(PaperExchange::new());
    for pair in config.enabled_pairs() {
        for leg in [&pair.leg1, &pair.leg2] {
            paper.set_quote(&leg.venue, &leg.instrument, 42_000.0, 42_001.0);
        }
    }
    let client: Arc<dyn ExchangeClient> = paper;

    // =========================================================================
    // 3. Book store + feed + gateway + engine
    // =========================================================================
    let store = BookStore::new();
    let feed = Arc::new(BookFeed::new(Arc::clone(&client), Arc::clone(&store)));
    let gateway = Arc::new(OrderGateway::new(
        Arc::clone(&client),
        RetryPolicy {
            max_retries: 1,
            backoff: Duration::from_millis(config.gateway.borrow_retry_backoff_ms),
        },
    ));

    let (sink, mut events) = BroadcastSink::new(EVENT_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            debug!(event_type = "engine_event", payload = %event, "Engine event");
        }
    });

    let sink: Arc<dyn NotificationSink> = Arc::new(sink);
    let pair_source = Arc::new(StaticPairSource::new(config.enabled_pairs()));
    let engine = ArbitrageEngine::new(
        Duration::from_millis(config.arbitrage.tick_interval_ms),
        gateway,
        store,
        Arc::clone(&feed),
        client,
        sink,
        pair_source,
    );

    engine.start().await?;
    info!(
        event_type = "startup_complete",
        pairs = config.enabled_pairs().len(),
        "Engine running, press Ctrl+C to stop"
    );

    // =========================================================================
    // 4. Graceful shutdown
    // =========================================================================
    tokio::signal::ctrl_c().await?;
    info!(event_type = "shutdown_requested", "Shutting down");
    engine.stop().await;
    feed.shutdown();
    Ok(())
}
