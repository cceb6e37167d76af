//! Core execution types shared by the arbitrage engine and TWAP scheduler

use serde::{Deserialize, Serialize};

use crate::exchange::types::{InstrumentClass, Side};

/// One side of a cross-venue trade.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Leg {
    pub venue: String,
    pub instrument: String,
    pub class: InstrumentClass,
    pub side: Side,
}

impl Leg {
    /// The compensating leg: same venue and instrument, opposite side.
    pub fn inverse(&self) -> Leg {
        Leg {
            venue: self.venue.clone(),
            instrument: self.instrument.clone(),
            class: self.class,
            side: self.side.inverse(),
        }
    }
}

impl std::fmt::Display for Leg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.venue, self.instrument, self.side)
    }
}

/// Configuration of one monitored arbitrage pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairConfig {
    pub id: String,
    pub leg1: Leg,
    pub leg2: Leg,
    /// Spread trigger in percent; may be negative.
    pub threshold_pct: f64,
    /// Base-coin quantity per execution.
    pub qty: f64,
    /// Executions allowed before the pair retires itself.
    pub max_execs: u32,
    pub enabled: bool,
}

/// Record of one completed two-leg arbitrage execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairExecution {
    /// Unix epoch milliseconds.
    pub ts_ms: i64,
    pub pair_id: String,
    pub spread_pct: f64,
    pub qty: f64,
    pub leg1_order_id: String,
    pub leg2_order_id: String,
}
