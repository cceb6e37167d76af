//! Cross-venue arbitrage and TWAP execution engine
//!
//! Real-time two-leg arbitrage execution and time-sliced order
//! scheduling:
//! - Exchange connectivity behind the `ExchangeClient` trait
//! - Bounded-depth order book store fed by streaming snapshots/deltas
//! - Order gateway with rejection classification and recovery
//! - Arbitrage tick loop and cancellable TWAP plan tasks

pub mod book;
pub mod config;
pub mod core;
pub mod error;
pub mod exchange;

pub use error::AppError;
