//! YAML configuration loading
//!
//! Loads `AppConfig` from a YAML file, overlays venue credentials from
//! the environment, and validates the result.

use std::path::Path;
use tracing::info;

use crate::config::types::AppConfig;
use crate::error::AppError;

const ENV_API_KEY: &str = "ARB_BOT_API_KEY";
const ENV_API_SECRET: &str = "ARB_BOT_API_SECRET";

/// Load and validate configuration from a YAML file.
///
/// `ARB_BOT_API_KEY` / `ARB_BOT_API_SECRET` override the credentials in
/// the file so secrets stay out of version control.
pub fn load_config(path: impl AsRef<Path>) -> Result<AppConfig, AppError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
    let config = load_config_from_str(&contents)?;
    info!(
        event_type = "config_loaded",
        path = %path.display(),
        pairs = config.arbitrage.pairs.len(),
        "Configuration loaded"
    );
    Ok(config)
}

/// Parse and validate configuration from a YAML string.
pub fn load_config_from_str(contents: &str) -> Result<AppConfig, AppError> {
    let mut config: AppConfig =
        serde_yaml::from_str(contents).map_err(|e| AppError::Config(format!("invalid YAML: {e}")))?;

    if let Ok(key) = std::env::var(ENV_API_KEY) {
        config.exchange.api_key = key;
    }
    if let Ok(secret) = std::env::var(ENV_API_SECRET) {
        config.exchange.api_secret = secret;
    }

    config.validate()?;
    Ok(config)
}
