//! Configuration types for the execution engine
//!
//! This module defines all configuration structs that are loaded from
//! YAML and handed to the engines at startup.

use serde::{Deserialize, Serialize};

use crate::core::types::{Leg, PairConfig};
use crate::error::AppError;
use crate::exchange::types::{InstrumentClass, Side};

// ============================================================================
// Configuration Structs
// ============================================================================

/// Venue API credentials.
///
/// Usually left empty in the file and injected from the environment by
/// the loader.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExchangeSettings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
}

/// One leg of a pair as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegEntry {
    pub venue: String,
    pub instrument: String,
    pub class: InstrumentClass,
    pub side: Side,
}

impl LegEntry {
    pub fn to_leg(&self) -> Leg {
        Leg {
            venue: self.venue.clone(),
            instrument: self.instrument.clone(),
            class: self.class,
            side: self.side,
        }
    }
}

/// One monitored pair as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairEntry {
    pub id: String,
    pub leg1: LegEntry,
    pub leg2: LegEntry,
    pub threshold_pct: f64,
    pub qty: f64,
    #[serde(default = "default_max_execs")]
    pub max_execs: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_max_execs() -> u32 {
    1
}

fn default_enabled() -> bool {
    true
}

impl PairEntry {
    pub fn to_pair_config(&self) -> PairConfig {
        PairConfig {
            id: self.id.clone(),
            leg1: self.leg1.to_leg(),
            leg2: self.leg2.to_leg(),
            threshold_pct: self.threshold_pct,
            qty: self.qty,
            max_execs: self.max_execs,
            enabled: self.enabled,
        }
    }
}

/// Arbitrage engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbSettings {
    /// Tick loop period, milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default)]
    pub pairs: Vec<PairEntry>,
}

fn default_tick_interval_ms() -> u64 {
    250
}

impl Default for ArbSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            pairs: Vec::new(),
        }
    }
}

/// Order gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    /// Backoff before retrying a borrow-pool rejection, milliseconds.
    #[serde(default = "default_borrow_retry_backoff_ms")]
    pub borrow_retry_backoff_ms: u64,
}

fn default_borrow_retry_backoff_ms() -> u64 {
    10_000
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            borrow_retry_backoff_ms: default_borrow_retry_backoff_ms(),
        }
    }
}

/// Root application configuration loaded from YAML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub exchange: ExchangeSettings,
    #[serde(default)]
    pub arbitrage: ArbSettings,
    #[serde(default)]
    pub gateway: GatewaySettings,
}

impl AppConfig {
    /// Validate the whole configuration, collecting the first error.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.arbitrage.tick_interval_ms == 0 {
            return Err(AppError::Config(
                "arbitrage.tick_interval_ms must be positive".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for pair in &self.arbitrage.pairs {
            if pair.id.is_empty() {
                return Err(AppError::Config("pair id must not be empty".to_string()));
            }
            if !seen.insert(&pair.id) {
                return Err(AppError::Config(format!("duplicate pair id: {}", pair.id)));
            }
            if !pair.threshold_pct.is_finite() {
                return Err(AppError::Config(format!(
                    "pair {}: threshold_pct must be finite",
                    pair.id
                )));
            }
            if !(pair.qty > 0.0) || !pair.qty.is_finite() {
                return Err(AppError::Config(format!(
                    "pair {}: qty must be positive",
                    pair.id
                )));
            }
            if pair.max_execs == 0 {
                return Err(AppError::Config(format!(
                    "pair {}: max_execs must be at least 1",
                    pair.id
                )));
            }
            if pair.leg1.venue == pair.leg2.venue
                && pair.leg1.instrument == pair.leg2.instrument
                && pair.leg1.class == pair.leg2.class
            {
                return Err(AppError::Config(format!(
                    "pair {}: leg1 and leg2 must differ",
                    pair.id
                )));
            }
        }
        Ok(())
    }

    /// The enabled pairs, converted to engine configs.
    pub fn enabled_pairs(&self) -> Vec<PairConfig> {
        self.arbitrage
            .pairs
            .iter()
            .filter(|p| p.enabled)
            .map(|p| p.to_pair_config())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> PairEntry {
        PairEntry {
            id: id.to_string(),
            leg1: LegEntry {
                venue: "bybit".to_string(),
                instrument: "BTCUSDT".to_string(),
                class: InstrumentClass::Spot,
                side: Side::Buy,
            },
            leg2: LegEntry {
                venue: "bybit".to_string(),
                instrument: "BTCUSDT".to_string(),
                class: InstrumentClass::Linear,
                side: Side::Sell,
            },
            threshold_pct: 0.15,
            qty: 0.01,
            max_execs: 1,
            enabled: true,
        }
    }

    #[test]
    fn test_valid_config_passes() {
        let config = AppConfig {
            arbitrage: ArbSettings {
                tick_interval_ms: 250,
                pairs: vec![entry("a"), entry("b")],
            },
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.enabled_pairs().len(), 2);
    }

    #[test]
    fn test_zero_tick_interval_rejected() {
        let config = AppConfig {
            arbitrage: ArbSettings {
                tick_interval_ms: 0,
                pairs: vec![],
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_pair_id_rejected() {
        let config = AppConfig {
            arbitrage: ArbSettings {
                tick_interval_ms: 250,
                pairs: vec![entry("a"), entry("a")],
            },
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_identical_legs_rejected() {
        let mut pair = entry("a");
        pair.leg2.class = InstrumentClass::Spot;
        pair.leg2.side = Side::Buy;
        let config = AppConfig {
            arbitrage: ArbSettings {
                tick_interval_ms: 250,
                pairs: vec![pair],
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_qty_and_max_execs_rejected() {
        let mut bad_qty = entry("a");
        bad_qty.qty = 0.0;
        let config = AppConfig {
            arbitrage: ArbSettings {
                tick_interval_ms: 250,
                pairs: vec![bad_qty],
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let mut bad_execs = entry("a");
        bad_execs.max_execs = 0;
        let config = AppConfig {
            arbitrage: ArbSettings {
                tick_interval_ms: 250,
                pairs: vec![bad_execs],
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_defaults_applied_from_yaml() {
        let yaml = r#"
arbitrage:
  pairs:
    - id: btc
      leg1: { venue: bybit, instrument: BTCUSDT, class: spot, side: buy }
      leg2: { venue: bybit, instrument: BTCUSDT, class: linear, side: sell }
      threshold_pct: 0.2
      qty: 0.01
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.arbitrage.tick_interval_ms, 250);
        assert_eq!(config.gateway.borrow_retry_backoff_ms, 10_000);
        let pair = &config.arbitrage.pairs[0];
        assert_eq!(pair.max_execs, 1);
        assert!(pair.enabled);
    }
}
