//! Fetch contract between the scanner and its market-data collaborators.
//!
//! The scanner only ever talks to a `MarketDataProvider` and a
//! `UniverseSource`. Authentication, throttling and transient retries live
//! behind these traits.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::fmt;
use std::path::PathBuf;

use super::{FlowBar, Granularity, Market, PriceBar, TickerMeta};

// ============================================================================
// Provider Error
// ============================================================================

/// Errors reported by a market-data provider.
#[derive(Debug, Clone)]
pub enum ProviderError {
    /// Network error (connection failed, timeout)
    Network(String),
    /// Authentication error (token issuance failed, credentials rejected)
    Auth(String),
    /// Per-second quota still exceeded after backing off
    RateLimited { retry_after_secs: Option<u64> },
    /// No rows for the requested ticker/window
    DataNotAvailable(String),
    /// The API answered with a non-success result code
    Rejected(String),
    /// Response body could not be interpreted
    InvalidResponse(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(msg) => write!(f, "Network error: {}", msg),
            Self::Auth(msg) => write!(f, "Authentication error: {}", msg),
            Self::RateLimited { retry_after_secs } => {
                write!(f, "Rate limited")?;
                if let Some(secs) = retry_after_secs {
                    write!(f, ", retry after {} seconds", secs)?;
                }
                Ok(())
            }
            Self::DataNotAvailable(msg) => write!(f, "Data not available: {}", msg),
            Self::Rejected(msg) => write!(f, "Request rejected: {}", msg),
            Self::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
        }
    }
}

impl std::error::Error for ProviderError {}

impl ProviderError {
    /// Check if the error is transient (worth retrying)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RateLimited { .. })
    }
}

// ============================================================================
// Market Data Provider
// ============================================================================

/// Source of per-ticker price and investor-flow series.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Provider name for logs (e.g., "kis")
    fn name(&self) -> &'static str;

    /// Fetch price bars for `ticker` between `start` and `end` inclusive.
    ///
    /// Bars are returned ascending by date without duplicate dates. An empty
    /// window is reported as `DataNotAvailable`.
    async fn fetch_price_series(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
        granularity: Granularity,
    ) -> Result<Vec<PriceBar>, ProviderError>;

    /// Fetch the recent daily investor net-buying series for `ticker`.
    async fn fetch_flow_series(&self, ticker: &str) -> Result<Vec<FlowBar>, ProviderError>;
}

// ============================================================================
// Universe Source
// ============================================================================

/// Errors loading the ticker universe.
#[derive(Debug, thiserror::Error)]
pub enum UniverseError {
    /// The snapshot does not exist
    #[error("universe snapshot not found: {0}")]
    Missing(PathBuf),

    /// The snapshot could not be read
    #[error("failed to read universe snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The snapshot is not valid
    #[error("corrupt universe snapshot {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

/// Source of the tradable ticker list per market segment.
#[async_trait]
pub trait UniverseSource: Send + Sync {
    /// Tickers listed on `market`, in snapshot order.
    async fn load_universe(&self, market: Market) -> Result<Vec<TickerMeta>, UniverseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_recoverable() {
        assert!(ProviderError::Network("timeout".into()).is_recoverable());
        assert!(ProviderError::RateLimited { retry_after_secs: Some(1) }.is_recoverable());
        assert!(!ProviderError::Auth("invalid appkey".into()).is_recoverable());
        assert!(!ProviderError::Rejected("bad ticker".into()).is_recoverable());
        assert!(!ProviderError::DataNotAvailable("empty".into()).is_recoverable());
    }

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::RateLimited {
            retry_after_secs: Some(4),
        };
        assert!(err.to_string().contains("4 seconds"));

        let err = ProviderError::Rejected("no such ticker".into());
        assert!(err.to_string().contains("no such ticker"));
    }

    #[test]
    fn test_universe_error_display() {
        let err = UniverseError::Missing(PathBuf::from("/tmp/tickers.json"));
        assert!(err.to_string().contains("/tmp/tickers.json"));
    }
}
