//! End-to-end engine cycle tests
//!
//! Drives the arbitrage engine and TWAP scheduler through full
//! lifecycles against the scripted mock exchange, the way the binary
//! wires them up.

use std::sync::Arc;
use std::time::Duration;

use arb_bot::book::{BookFeed, BookKey, BookStore};
use arb_bot::core::{
    ArbitrageEngine, CreatePlan, Leg, MemorySink, NotificationSink, OrderGateway, PairConfig,
    PlanAction, RetryPolicy, StaticPairSource, TwapScheduler, TwapState,
};
use arb_bot::exchange::test_utils::MockExchange;
use arb_bot::exchange::{ExchangeClient, InstrumentClass, Side};

fn spot_perp_pair(threshold_pct: f64) -> PairConfig {
    PairConfig {
        id: "btc-basis".to_string(),
        leg1: Leg {
            venue: "mock".to_string(),
            instrument: "BTCUSDT".to_string(),
            class: InstrumentClass::Spot,
            side: Side::Buy,
        },
        leg2: Leg {
            venue: "mock".to_string(),
            instrument: "BTCUSDT-PERP".to_string(),
            class: InstrumentClass::Linear,
            side: Side::Sell,
        },
        threshold_pct,
        qty: 0.01,
        max_execs: 1,
        enabled: true,
    }
}

fn fast_gateway(mock: &Arc<MockExchange>) -> Arc<OrderGateway> {
    Arc::new(OrderGateway::new(
        mock.clone(),
        RetryPolicy {
            max_retries: 1,
            backoff: Duration::from_millis(1),
        },
    ))
}

#[tokio::test]
async fn test_arbitrage_full_cycle() {
    let mock = Arc::new(MockExchange::new());
    let client: Arc<dyn ExchangeClient> = mock.clone();
    let store = BookStore::new();
    let feed = Arc::new(BookFeed::new(client.clone(), store.clone()));
    let sink = Arc::new(MemorySink::new());
    let sink_dyn: Arc<dyn NotificationSink> = sink.clone();

    // Spread 0.2% on request/response quotes, above the 0.1% trigger
    mock.set_top_of_book("mock", "BTCUSDT", 99.9, 100.0);
    mock.set_top_of_book("mock", "BTCUSDT-PERP", 100.2, 100.3);

    let engine = ArbitrageEngine::new(
        Duration::from_millis(10),
        fast_gateway(&mock),
        store.clone(),
        Arc::clone(&feed),
        client,
        sink_dyn,
        Arc::new(StaticPairSource::new(vec![spot_perp_pair(0.1)])),
    );

    engine.start().await.unwrap();
    assert!(engine.is_running());
    // Both legs' books get subscribed on start
    assert!(mock.is_subscribed("mock", "BTCUSDT", 1));
    assert!(mock.is_subscribed("mock", "BTCUSDT-PERP", 1));

    // Wait for the tick loop to trigger and retire the pair
    for _ in 0..200 {
        if engine.executions_history().await.len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let history = engine.executions_history().await;
    assert_eq!(history.len(), 1, "pair should execute exactly once");
    assert_eq!(history[0].pair_id, "btc-basis");
    assert!((history[0].spread_pct - 0.2).abs() < 1e-6);

    // max_execs of 1 reached: pair retired, no further orders
    assert!(engine.list_pairs().await.is_empty());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(mock.orders_placed(), 2);

    let log = mock.order_log();
    assert_eq!(log[0].side, Side::Buy);
    assert_eq!(log[0].instrument, "BTCUSDT");
    assert_eq!(log[1].side, Side::Sell);
    assert_eq!(log[1].instrument, "BTCUSDT-PERP");

    engine.stop().await;
    feed.shutdown();
    assert!(!engine.is_running());
}

#[tokio::test]
async fn test_streaming_prices_drive_trigger() {
    let mock = Arc::new(MockExchange::new());
    let client: Arc<dyn ExchangeClient> = mock.clone();
    let store = BookStore::new();
    let feed = Arc::new(BookFeed::new(client.clone(), store.clone()));

    // Feed the store directly, as the ingestion task would
    let k1 = BookKey::new("mock", "BTCUSDT", 1);
    let k2 = BookKey::new("mock", "BTCUSDT-PERP", 1);
    store
        .apply_snapshot(&k1, &[(99.9, 1.0)], &[(100.0, 1.0)], None)
        .await;
    store
        .apply_snapshot(&k2, &[(100.0, 1.0)], &[(100.1, 1.0)], None)
        .await;

    let sink: Arc<dyn NotificationSink> = Arc::new(MemorySink::new());
    let engine = ArbitrageEngine::new(
        Duration::from_millis(10),
        fast_gateway(&mock),
        store.clone(),
        feed,
        client,
        sink,
        // Threshold 0.5% but spread is 0.0%: never triggers
        Arc::new(StaticPairSource::new(vec![spot_perp_pair(0.5)])),
    );

    engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(mock.orders_placed(), 0);

    // Perp bid moves up, spread clears the threshold
    store
        .apply_snapshot(&k2, &[(100.6, 1.0)], &[(100.7, 1.0)], None)
        .await;
    for _ in 0..200 {
        if mock.orders_placed() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(mock.orders_placed(), 2);

    engine.stop().await;
}

#[tokio::test]
async fn test_twap_full_cycle() {
    let mock = Arc::new(MockExchange::new());
    let sink: Arc<dyn NotificationSink> = Arc::new(MemorySink::new());
    let scheduler = TwapScheduler::new(fast_gateway(&mock), sink);

    let plan = scheduler
        .create_plan(CreatePlan {
            legs: vec![
                Leg {
                    venue: "mock".to_string(),
                    instrument: "BTCUSDT".to_string(),
                    class: InstrumentClass::Spot,
                    side: Side::Buy,
                },
                Leg {
                    venue: "mock".to_string(),
                    instrument: "BTCUSDT-PERP".to_string(),
                    class: InstrumentClass::Linear,
                    side: Side::Sell,
                },
            ],
            total_qty: 0.3,
            slice_qty: 0.1,
            interval_ms: 5,
        })
        .await
        .unwrap();
    assert_eq!(plan.slices_total, 3);

    let progress = scheduler.get_progress(&plan.plan_id).await.unwrap();
    assert_eq!(progress.state, TwapState::Pending);

    assert!(scheduler
        .control(&plan.plan_id, PlanAction::Start)
        .await
        .unwrap());

    let mut final_progress = None;
    for _ in 0..200 {
        let p = scheduler.get_progress(&plan.plan_id).await.unwrap();
        if p.state.is_terminal() {
            final_progress = Some(p);
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let final_progress = final_progress.expect("plan never finished");

    assert_eq!(final_progress.state, TwapState::Completed);
    assert_eq!(final_progress.slices_done, 3);
    assert!((final_progress.executed_qty - 0.3).abs() < 1e-9);
    assert!(final_progress.remaining_qty.abs() < 1e-9);

    // 3 slices x 2 legs, no rollbacks
    assert_eq!(mock.orders_placed(), 6);
    let executions = scheduler.get_executions(&plan.plan_id).await;
    assert_eq!(executions.len(), 6);
    assert!(executions.iter().all(|e| e.success && !e.rollback));
}
