//! Execution core - order gateway, arbitrage engine, and TWAP scheduler
//!
//! This module uses **explicit re-exports** instead of glob exports
//! (`pub use module::*`) to provide better API visibility and prevent
//! accidental public API changes.

pub mod arbitrage;
pub mod events;
pub mod gateway;
pub mod twap;
pub mod types;

pub use arbitrage::{ArbitrageEngine, EngineStatus, PairSource, StaticPairSource};
pub use events::{BroadcastSink, EngineEvent, MemorySink, NoopSink, NotificationSink};
pub use gateway::{classify, OrderErrorKind, OrderGateway, OrderOutcome, RetryPolicy};
pub use twap::{
    CreatePlan, PlanAction, TwapExecution, TwapPlan, TwapProgress, TwapScheduler, TwapState,
};
pub use types::{Leg, PairConfig, PairExecution};
