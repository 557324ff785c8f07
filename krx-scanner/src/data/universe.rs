//! Ticker universe loaded from a static JSON snapshot.
//!
//! The snapshot is an array of `{code, name, market, cap}` records. Codes may
//! be stored as numbers by the generator, so they are normalised to six
//! zero-padded digits here.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::provider::{UniverseError, UniverseSource};
use super::{Market, TickerMeta};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCode {
    Text(String),
    Number(u64),
}

impl RawCode {
    fn normalize(self) -> String {
        match self {
            Self::Text(s) => {
                let s = s.trim();
                if !s.is_empty() && s.len() < 6 && s.chars().all(|c| c.is_ascii_digit()) {
                    format!("{:0>6}", s)
                } else {
                    s.to_string()
                }
            }
            Self::Number(n) => format!("{:06}", n),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawTicker {
    code: RawCode,
    name: String,
    market: String,
    #[serde(default)]
    cap: f64,
}

/// Universe backed by a `tickers.json` file.
#[derive(Debug, Clone)]
pub struct JsonUniverse {
    path: PathBuf,
}

impl JsonUniverse {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse a snapshot body and keep the rows of one segment in file order.
    fn parse(&self, content: &str, market: Market) -> Result<Vec<TickerMeta>, UniverseError> {
        let raw: Vec<RawTicker> =
            serde_json::from_str(content).map_err(|e| UniverseError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        let tickers: Vec<TickerMeta> = raw
            .into_iter()
            .filter(|t| t.market.trim().eq_ignore_ascii_case(market.as_str()))
            .map(|t| TickerMeta {
                code: t.code.normalize(),
                name: t.name,
                market,
                market_cap: t.cap,
            })
            .collect();

        Ok(tickers)
    }
}

#[async_trait]
impl UniverseSource for JsonUniverse {
    async fn load_universe(&self, market: Market) -> Result<Vec<TickerMeta>, UniverseError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(UniverseError::Missing(self.path.clone()));
            }
            Err(source) => {
                return Err(UniverseError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let tickers = self.parse(&content, market)?;
        debug!(
            market = %market,
            count = tickers.len(),
            path = %self.path.display(),
            "Loaded ticker universe"
        );
        Ok(tickers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn snapshot(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_filters_market_and_pads_codes() {
        let file = snapshot(
            r#"[
                {"code": "005930", "name": "Samsung Electronics", "market": "KOSPI", "cap": 4.5e14},
                {"code": 660, "name": "SK hynix", "market": "KOSPI", "cap": 1.2e14},
                {"code": "247540", "name": "EcoPro BM", "market": "KOSDAQ", "cap": 2.0e13}
            ]"#,
        );
        let universe = JsonUniverse::new(file.path());

        let kospi = universe.load_universe(Market::Kospi).await.unwrap();
        assert_eq!(kospi.len(), 2);
        assert_eq!(kospi[0].code, "005930");
        assert_eq!(kospi[1].code, "000660");
        assert_eq!(kospi[1].market, Market::Kospi);

        let kosdaq = universe.load_universe(Market::Kosdaq).await.unwrap();
        assert_eq!(kosdaq.len(), 1);
        assert_eq!(kosdaq[0].name, "EcoPro BM");
    }

    #[tokio::test]
    async fn test_missing_snapshot() {
        let universe = JsonUniverse::new("/nonexistent/krx/tickers.json");
        let err = universe.load_universe(Market::Kospi).await.unwrap_err();
        assert!(matches!(err, UniverseError::Missing(_)));
    }

    #[tokio::test]
    async fn test_corrupt_snapshot() {
        let file = snapshot(r#"{"code": "005930"}"#);
        let universe = JsonUniverse::new(file.path());
        let err = universe.load_universe(Market::Kospi).await.unwrap_err();
        assert!(matches!(err, UniverseError::Corrupt { .. }));
    }

    #[test]
    fn test_code_normalization() {
        assert_eq!(RawCode::Text("5930".into()).normalize(), "005930");
        assert_eq!(RawCode::Text("0088M0".into()).normalize(), "0088M0");
        assert_eq!(RawCode::Number(35420).normalize(), "035420");
    }
}
