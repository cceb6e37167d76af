//! Exchange client error types
//!
//! All venue-boundary errors are wrapped in the ExchangeError enum
//! which implements thiserror for consistent error handling. Vendor
//! rejection codes are carried verbatim so the order gateway can
//! classify them without string matching.

use thiserror::Error;

/// Vendor rejection codes recognized by the order gateway.
///
/// These mirror the upstream venue's unified-trading error codes; every
/// other code falls into the terminal "other" bucket.
pub mod codes {
    /// Account balance too low to fill the order.
    pub const INSUFFICIENT_BALANCE: i64 = 170131;
    /// Margin borrow pool temporarily empty; retryable after a backoff.
    pub const BORROW_POOL_EXHAUSTED: i64 = 170207;
    /// The base coin is not enabled as collateral on the account.
    pub const COLLATERAL_DISABLED: i64 = 170037;
    /// The account's margin mode does not allow leveraged spot orders.
    pub const MARGIN_MODE_UNSUPPORTED: i64 = 170312;
    /// API key invalid.
    pub const INVALID_API_KEY: i64 = 10003;
    /// API key expired or signature rejected.
    pub const EXPIRED_API_KEY: i64 = 10004;
}

/// Venue-boundary error types for exchange client operations
#[derive(Error, Debug, Clone)]
pub enum ExchangeError {
    /// Order or request rejected by the venue with a vendor error code
    #[error("rejected by {venue} (code {code}): {message}")]
    Rejected {
        venue: String,
        code: i64,
        message: String,
    },

    /// Transport-level failure (connection refused, reset, DNS, ...)
    #[error("transport error: {0}")]
    Transport(String),

    /// Network operation timed out
    #[error("network timeout after {0}ms")]
    Timeout(u64),

    /// The venue has no streaming book feed
    #[error("streaming not supported by venue {0}")]
    StreamingUnsupported(String),
}

impl ExchangeError {
    /// Vendor rejection code, if this is a venue rejection.
    pub fn vendor_code(&self) -> Option<i64> {
        match self {
            ExchangeError::Rejected { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Result type alias for exchange operations
pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_display() {
        let err = ExchangeError::Rejected {
            venue: "bybit".to_string(),
            code: codes::INSUFFICIENT_BALANCE,
            message: "balance too low".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "rejected by bybit (code 170131): balance too low"
        );
    }

    #[test]
    fn test_vendor_code_extraction() {
        let err = ExchangeError::Rejected {
            venue: "bybit".to_string(),
            code: codes::BORROW_POOL_EXHAUSTED,
            message: "pool empty".to_string(),
        };
        assert_eq!(err.vendor_code(), Some(170207));

        let err = ExchangeError::Timeout(3000);
        assert_eq!(err.vendor_code(), None);
    }

    #[test]
    fn test_timeout_display() {
        let err = ExchangeError::Timeout(5000);
        assert_eq!(err.to_string(), "network timeout after 5000ms");
    }
}
