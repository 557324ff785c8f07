//! Configuration management for the KRX scanner.
//!
//! The scanner reads a single configuration file at `~/.krx-scanner/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `KIS_APP_KEY` → kis.app_key
//! - `KIS_APP_SECRET` → kis.app_secret
//! - `KIS_MOCK` → kis.mock
//! - `KRX_LOG_LEVEL` → observability.log_level
//! - `KRX_LOG_FORMAT` → observability.log_format
//! - `KRX_UNIVERSE_PATH` → scanner.universe_path

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".krx-scanner"),
        |dirs| dirs.home_dir().join(".krx-scanner"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Observability
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Base log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Output format: "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// KIS (Korea Investment & Securities) API
// ============================================================================

/// Credentials and transport settings for the KIS open API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KisConfig {
    /// Application key issued by KIS
    #[serde(default)]
    pub app_key: Option<String>,

    /// Application secret issued by KIS
    #[serde(default)]
    pub app_secret: Option<String>,

    /// Use the paper-trading (mock) endpoint
    #[serde(default = "default_true")]
    pub mock: bool,

    /// Override for the API base URL (tests, proxies)
    #[serde(default)]
    pub base_url: Option<String>,

    /// Where to persist the access token between runs
    #[serde(default)]
    pub token_cache_path: Option<PathBuf>,

    /// Proactive request budget (requests per second)
    #[serde(default = "default_rate_limit_rps")]
    pub rate_limit_rps: u32,

    /// Maximum attempts per request
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Per-request HTTP timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for KisConfig {
    fn default() -> Self {
        Self {
            app_key: None,
            app_secret: None,
            mock: true,
            base_url: None,
            token_cache_path: None,
            rate_limit_rps: default_rate_limit_rps(),
            max_retries: default_max_retries(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl KisConfig {
    /// Whether both the key and the secret are present.
    pub fn has_credentials(&self) -> bool {
        let filled = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        filled(&self.app_key) && filled(&self.app_secret)
    }
}

fn default_true() -> bool {
    true
}

fn default_rate_limit_rps() -> u32 {
    15
}

fn default_max_retries() -> u32 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

// ============================================================================
// Scanner
// ============================================================================

/// Settings for the market scan pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Number of largest-cap tickers scanned per market
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Calendar days of history fetched before the as-of date
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,

    /// Worker count for full-market scans
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Worker count for the focused leaderboard scan
    #[serde(default = "default_leaderboard_concurrency")]
    pub leaderboard_concurrency: usize,

    /// Calendar days fetched by the focused leaderboard scan
    #[serde(default = "default_leaderboard_lookback_days")]
    pub leaderboard_lookback_days: u32,

    /// Path of the ticker universe snapshot (`tickers.json`)
    #[serde(default)]
    pub universe_path: Option<PathBuf>,

    /// Whole-scan deadline in seconds; unset means no deadline
    #[serde(default)]
    pub scan_timeout_secs: Option<u64>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            lookback_days: default_lookback_days(),
            concurrency: default_concurrency(),
            leaderboard_concurrency: default_leaderboard_concurrency(),
            leaderboard_lookback_days: default_leaderboard_lookback_days(),
            universe_path: None,
            scan_timeout_secs: None,
        }
    }
}

impl ScannerConfig {
    /// Universe snapshot path, falling back to `<config dir>/tickers.json`.
    pub fn universe_path(&self) -> PathBuf {
        self.universe_path
            .clone()
            .unwrap_or_else(|| config_dir().join("tickers.json"))
    }
}

fn default_top_n() -> usize {
    100
}

fn default_lookback_days() -> u32 {
    120
}

fn default_concurrency() -> usize {
    5
}

fn default_leaderboard_concurrency() -> usize {
    2
}

fn default_leaderboard_lookback_days() -> u32 {
    10
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub kis: KisConfig,

    #[serde(default)]
    pub scanner: ScannerConfig,
}

impl Config {
    /// Load configuration from the default path, or defaults if absent.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| Error::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load configuration with environment variable overrides, then validate.
    pub fn load_with_env(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load_from(p)?,
            None => Self::load()?,
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("KIS_APP_KEY") {
            self.kis.app_key = Some(v);
        }
        if let Ok(v) = std::env::var("KIS_APP_SECRET") {
            self.kis.app_secret = Some(v);
        }
        if let Ok(v) = std::env::var("KIS_MOCK") {
            if let Some(mock) = parse_bool(&v) {
                self.kis.mock = mock;
            }
        }
        if let Ok(v) = std::env::var("KRX_LOG_LEVEL") {
            self.observability.log_level = v;
        }
        if let Ok(v) = std::env::var("KRX_LOG_FORMAT") {
            self.observability.log_format = v;
        }
        if let Ok(v) = std::env::var("KRX_UNIVERSE_PATH") {
            self.scanner.universe_path = Some(PathBuf::from(v));
        }
    }

    /// Reject settings the scanner cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.scanner.top_n == 0 {
            return Err(Error::Config("scanner.top_n must be greater than 0".into()));
        }
        if self.scanner.lookback_days == 0 || self.scanner.leaderboard_lookback_days == 0 {
            return Err(Error::Config("scanner lookback windows must be greater than 0".into()));
        }
        if self.scanner.concurrency == 0 || self.scanner.leaderboard_concurrency == 0 {
            return Err(Error::Config("scanner concurrency must be greater than 0".into()));
        }
        if self.kis.max_retries == 0 {
            return Err(Error::Config("kis.max_retries must be greater than 0".into()));
        }
        Ok(())
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.scanner.top_n, 100);
        assert_eq!(config.scanner.lookback_days, 120);
        assert_eq!(config.scanner.concurrency, 5);
        assert_eq!(config.scanner.leaderboard_concurrency, 2);
        assert!(config.kis.mock);
        assert_eq!(config.observability.log_format, "pretty");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"kis": {{"app_key": "k", "app_secret": "s", "mock": false}}, "scanner": {{"top_n": 30}}}}"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert!(!config.kis.mock);
        assert!(config.kis.has_credentials());
        assert_eq!(config.scanner.top_n, 30);
        assert_eq!(config.scanner.concurrency, 5);
    }

    #[test]
    fn test_load_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let err = Config::load_from(file.path()).unwrap_err();
        assert!(matches!(err, Error::Json { .. }));
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_from(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, Error::Io { ref path, .. } if path.ends_with("absent.json")));
    }

    #[test]
    fn test_load_with_env_rejects_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"scanner": {{"top_n": 0}}}}"#).unwrap();
        let err = Config::load_with_env(Some(file.path())).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.scanner.concurrency = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
