//! Configuration module for engine settings and YAML loading
//!
//! This module provides:
//! - Configuration types (`AppConfig`, `PairEntry`)
//! - YAML loading functionality (`load_config`)
//! - Logging configuration (`init_logging`)

mod loader;
pub mod logging;
mod types;

// Re-export types
pub use types::{
    AppConfig, ArbSettings, ExchangeSettings, GatewaySettings, LegEntry, PairEntry,
};

// Re-export loader functions
pub use loader::{load_config, load_config_from_str};

// Re-export logging functions
pub use logging::init_logging;
