//! Market data module for KOSPI/KOSDAQ equities.
//!
//! Provides the core bar types, the fetch contract consumed by the scanner,
//! and the concrete sources behind it.
//!
//! # Data Sources
//! - **KIS** (Korea Investment & Securities open API): daily/weekly/monthly
//!   price bars and per-investor net buying
//! - **Universe snapshot**: static `tickers.json` with code, name, market and cap

mod kis;
mod provider;
mod rate_limiter;
mod session;
mod universe;

pub use kis::KisClient;
pub use provider::{MarketDataProvider, ProviderError, UniverseError, UniverseSource};
pub use rate_limiter::RequestThrottle;
pub use session::{AccessToken, KisSession};
pub use universe::JsonUniverse;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ============================================================================
// Market Segment
// ============================================================================

/// Exchange segment a ticker is listed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Market {
    Kospi,
    Kosdaq,
}

impl Market {
    /// All segments in scan order.
    pub const ALL: [Market; 2] = [Market::Kospi, Market::Kosdaq];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kospi => "KOSPI",
            Self::Kosdaq => "KOSDAQ",
        }
    }
}

impl std::fmt::Display for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Market {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "KOSPI" => Ok(Self::Kospi),
            "KOSDAQ" => Ok(Self::Kosdaq),
            _ => Err(format!("Unknown market: {}", s)),
        }
    }
}

// ============================================================================
// Granularity
// ============================================================================

/// Bar period requested from the price endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Granularity {
    /// Period code used by the KIS chart endpoint.
    pub fn period_code(&self) -> &'static str {
        match self {
            Self::Daily => "D",
            Self::Weekly => "W",
            Self::Monthly => "M",
            Self::Yearly => "Y",
        }
    }

    /// Investor flow data only exists per trading day.
    pub fn has_flow_data(&self) -> bool {
        matches!(self, Self::Daily)
    }
}

// ============================================================================
// Core Data Types
// ============================================================================

/// A listed ticker from the universe snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerMeta {
    /// Six-digit exchange code (e.g., "005930")
    pub code: String,
    /// Display name
    pub name: String,
    /// Listing segment
    pub market: Market,
    /// Market capitalisation in KRW
    pub market_cap: f64,
}

/// One OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Traded shares
    pub volume: f64,
    /// Traded value in KRW
    pub value: f64,
}

/// Net buying per investor class for one trading day, in KRW.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowBar {
    pub date: NaiveDate,
    pub foreign_net: f64,
    pub institution_net: f64,
    pub individual_net: f64,
}

impl FlowBar {
    /// A day with no recorded flow.
    pub fn zero(date: NaiveDate) -> Self {
        Self {
            date,
            foreign_net: 0.0,
            institution_net: 0.0,
            individual_net: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_parse_and_display() {
        assert_eq!("kospi".parse::<Market>().unwrap(), Market::Kospi);
        assert_eq!(" KOSDAQ ".parse::<Market>().unwrap(), Market::Kosdaq);
        assert!("NYSE".parse::<Market>().is_err());
        assert_eq!(Market::Kosdaq.to_string(), "KOSDAQ");
    }

    #[test]
    fn test_market_serde() {
        let json = serde_json::to_string(&Market::Kospi).unwrap();
        assert_eq!(json, "\"KOSPI\"");
        let back: Market = serde_json::from_str("\"KOSDAQ\"").unwrap();
        assert_eq!(back, Market::Kosdaq);
    }

    #[test]
    fn test_granularity_codes() {
        assert_eq!(Granularity::Daily.period_code(), "D");
        assert_eq!(Granularity::Yearly.period_code(), "Y");
        assert!(Granularity::Daily.has_flow_data());
        assert!(!Granularity::Weekly.has_flow_data());
    }
}
