//! Engine event notifications
//!
//! Both engines publish structured events through a `NotificationSink`
//! so a routing layer (websocket broadcast, UI, log drain) can observe
//! executions without coupling to engine internals.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::warn;

/// Events emitted by the arbitrage engine and TWAP scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum EngineEvent {
    /// Per-tick price observation for a monitored pair.
    #[serde(rename_all = "camelCase")]
    PriceUpdate {
        pair_id: String,
        leg1_price: f64,
        leg2_price: f64,
        spread_pct: f64,
    },
    /// A two-leg arbitrage execution completed.
    #[serde(rename_all = "camelCase")]
    ArbitrageExecuted {
        pair_id: String,
        spread_pct: f64,
        qty: f64,
        leg1_order_id: String,
        leg2_order_id: String,
    },
    /// A pair hit its execution quota and was retired.
    #[serde(rename_all = "camelCase")]
    PairRemoved { pair_id: String, executions: u32 },
    /// Slice-level progress of a TWAP plan.
    #[serde(rename_all = "camelCase")]
    TwapProgress {
        plan_id: String,
        slices_done: u32,
        slices_total: u32,
        executed_qty: f64,
        remaining_qty: f64,
    },
    /// A TWAP plan transitioned state.
    #[serde(rename_all = "camelCase")]
    TwapStateChanged {
        plan_id: String,
        state: String,
        reason: Option<String>,
    },
}

/// Consumer of engine events.
///
/// Publishing must never block or fail the caller; sinks swallow their
/// own delivery problems.
pub trait NotificationSink: Send + Sync {
    fn publish(&self, event: &EngineEvent);
}

/// Sink that drops every event. Used when nothing is listening.
pub struct NoopSink;

impl NotificationSink for NoopSink {
    fn publish(&self, _event: &EngineEvent) {}
}

/// Fan-out sink backed by a tokio broadcast channel.
///
/// Events are JSON-serialized; lagging or absent receivers are not an
/// error.
pub struct BroadcastSink {
    tx: broadcast::Sender<String>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> (Self, broadcast::Receiver<String>) {
        let (tx, rx) = broadcast::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

impl NotificationSink for BroadcastSink {
    fn publish(&self, event: &EngineEvent) {
        match serde_json::to_string(event) {
            Ok(json) => {
                // No receivers is fine
                let _ = self.tx.send(json);
            }
            Err(e) => {
                warn!(event_type = "event_serialize_failed", error = %e, "Dropped engine event");
            }
        }
    }
}

/// Sink that records every event, for assertions in tests.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<EngineEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl NotificationSink for MemorySink {
    fn publish(&self, event: &EngineEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let event = EngineEvent::ArbitrageExecuted {
            pair_id: "btc-1".to_string(),
            spread_pct: 0.21,
            qty: 0.01,
            leg1_order_id: "a".to_string(),
            leg2_order_id: "b".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"arbitrageExecuted\""));
        assert!(json.contains("\"pairId\":\"btc-1\""));
        assert!(json.contains("\"leg1OrderId\":\"a\""));
    }

    #[test]
    fn test_twap_state_changed_shape() {
        let event = EngineEvent::TwapStateChanged {
            plan_id: "twap_abc".to_string(),
            state: "cancelled".to_string(),
            reason: Some("slice failed".to_string()),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"twapStateChanged\""));
        assert!(json.contains("\"planId\":\"twap_abc\""));
    }

    #[tokio::test]
    async fn test_broadcast_sink_delivers_json() {
        let (sink, mut rx) = BroadcastSink::new(8);
        sink.publish(&EngineEvent::PairRemoved {
            pair_id: "p".to_string(),
            executions: 1,
        });
        let json = rx.recv().await.unwrap();
        assert!(json.contains("pairRemoved"));
    }

    #[test]
    fn test_broadcast_sink_without_receivers() {
        let (sink, rx) = BroadcastSink::new(8);
        drop(rx);
        // Must not panic or error
        sink.publish(&EngineEvent::PairRemoved {
            pair_id: "p".to_string(),
            executions: 1,
        });
    }
}
