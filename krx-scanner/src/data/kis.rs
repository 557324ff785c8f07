//! KIS (Korea Investment & Securities) open API adapter.
//!
//! # Endpoints
//! - Period chart: `/uapi/domestic-stock/v1/quotations/inquire-daily-itemchartprice`
//!   (tr_id `FHKST03010100`)
//! - Investor trend: `/uapi/domestic-stock/v1/quotations/inquire-investor`
//!   (tr_id `FHKST01010900`)
//!
//! # Rate Limits
//! - Live: about 20 requests/second per app key
//! - Mock: a few requests/second
//! - Exceeding the quota returns HTTP 200 with a `msg1` mentioning the
//!   per-second transaction count; those responses are retried with
//!   exponential backoff.

use async_trait::async_trait;
use chrono::NaiveDate;
use krx_common::config::KisConfig;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::provider::{MarketDataProvider, ProviderError};
use super::rate_limiter::RequestThrottle;
use super::session::KisSession;
use super::{FlowBar, Granularity, PriceBar};

// ============================================================================
// Constants
// ============================================================================

/// Live trading endpoint
pub const KIS_LIVE_BASE: &str = "https://openapi.koreainvestment.com:9443";

/// Paper trading endpoint
pub const KIS_MOCK_BASE: &str = "https://openapivts.koreainvestment.com:29443";

const CHART_PATH: &str = "/uapi/domestic-stock/v1/quotations/inquire-daily-itemchartprice";
const CHART_TR_ID: &str = "FHKST03010100";

const INVESTOR_PATH: &str = "/uapi/domestic-stock/v1/quotations/inquire-investor";
const INVESTOR_TR_ID: &str = "FHKST01010900";

/// Market division code for stocks, ETFs and ETNs
const MARKET_DIV_STOCK: &str = "J";

/// Investor amounts are reported in millions of KRW
const FLOW_AMOUNT_UNIT: f64 = 1_000_000.0;

/// First backoff step for quota responses; doubles per attempt
const DEFAULT_QUOTA_BACKOFF: Duration = Duration::from_millis(500);

/// Pause after a server error or dropped connection
const DEFAULT_ERROR_PAUSE: Duration = Duration::from_secs(1);

/// Longest single backoff sleep
const MAX_BACKOFF: Duration = Duration::from_secs(30);

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ChartRow {
    #[serde(default)]
    stck_bsop_date: String,
    #[serde(default)]
    stck_oprc: String,
    #[serde(default)]
    stck_hgpr: String,
    #[serde(default)]
    stck_lwpr: String,
    #[serde(default)]
    stck_clpr: String,
    #[serde(default)]
    acml_vol: String,
    #[serde(default)]
    acml_tr_pbmn: String,
}

#[derive(Debug, Deserialize)]
struct InvestorRow {
    #[serde(default)]
    stck_bsop_date: String,
    #[serde(default)]
    prsn_ntby_tr_pbmn: String,
    #[serde(default)]
    frgn_ntby_tr_pbmn: String,
    #[serde(default)]
    orgn_ntby_tr_pbmn: String,
}

fn parse_num(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    s.parse::<f64>().ok()
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y%m%d").ok()
}

impl ChartRow {
    fn into_bar(self) -> Option<PriceBar> {
        Some(PriceBar {
            date: parse_date(&self.stck_bsop_date)?,
            open: parse_num(&self.stck_oprc)?,
            high: parse_num(&self.stck_hgpr)?,
            low: parse_num(&self.stck_lwpr)?,
            close: parse_num(&self.stck_clpr)?,
            volume: parse_num(&self.acml_vol).unwrap_or(0.0),
            value: parse_num(&self.acml_tr_pbmn).unwrap_or(0.0),
        })
    }
}

impl InvestorRow {
    fn into_flow(self) -> Option<FlowBar> {
        let amount = |s: &str| parse_num(s).unwrap_or(0.0) * FLOW_AMOUNT_UNIT;
        Some(FlowBar {
            date: parse_date(&self.stck_bsop_date)?,
            foreign_net: amount(&self.frgn_ntby_tr_pbmn),
            institution_net: amount(&self.orgn_ntby_tr_pbmn),
            individual_net: amount(&self.prsn_ntby_tr_pbmn),
        })
    }
}

/// Sort ascending, drop duplicate dates and bars without a positive close.
fn normalize_price_bars(mut bars: Vec<PriceBar>) -> Vec<PriceBar> {
    bars.retain(|b| b.close > 0.0);
    bars.sort_by_key(|b| b.date);
    bars.dedup_by_key(|b| b.date);
    bars
}

fn normalize_flow_bars(mut flows: Vec<FlowBar>) -> Vec<FlowBar> {
    flows.sort_by_key(|f| f.date);
    flows.dedup_by_key(|f| f.date);
    flows
}

fn is_quota_message(msg: &str) -> bool {
    msg.contains("초당 전송건수") || msg.contains("초과")
}

// ============================================================================
// KIS Client
// ============================================================================

/// Market-data provider backed by the KIS REST API.
pub struct KisClient {
    session: Arc<KisSession>,
    client: reqwest::Client,
    base_url: String,
    throttle: RequestThrottle,
    max_retries: u32,
    quota_backoff: Duration,
    error_pause: Duration,
}

impl KisClient {
    /// Create a client sharing an existing session.
    pub fn new(
        session: Arc<KisSession>,
        client: reqwest::Client,
        base_url: impl Into<String>,
        requests_per_second: u32,
        max_retries: u32,
    ) -> Self {
        Self {
            session,
            client,
            base_url: base_url.into(),
            throttle: RequestThrottle::new("kis", requests_per_second),
            max_retries: max_retries.max(1),
            quota_backoff: DEFAULT_QUOTA_BACKOFF,
            error_pause: DEFAULT_ERROR_PAUSE,
        }
    }

    /// Build a client and its session from configuration.
    pub fn from_config(config: &KisConfig) -> anyhow::Result<Self> {
        if !config.has_credentials() {
            anyhow::bail!("KIS credentials missing: set kis.app_key/kis.app_secret or KIS_APP_KEY/KIS_APP_SECRET");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let base_url = config.base_url.clone().unwrap_or_else(|| {
            if config.mock {
                KIS_MOCK_BASE.to_string()
            } else {
                KIS_LIVE_BASE.to_string()
            }
        });
        debug!(base_url = %base_url, mock = config.mock, "Configuring KIS client");

        let session = Arc::new(KisSession::new(
            client.clone(),
            base_url.clone(),
            config.app_key.clone().unwrap_or_default(),
            config.app_secret.clone().unwrap_or_default(),
            config.token_cache_path.clone(),
        ));

        Ok(Self::new(
            session,
            client,
            base_url,
            config.rate_limit_rps,
            config.max_retries,
        ))
    }

    /// Override retry pauses (tests use millisecond values).
    pub fn with_retry_delays(mut self, quota_backoff: Duration, error_pause: Duration) -> Self {
        self.quota_backoff = quota_backoff;
        self.error_pause = error_pause;
        self
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.quota_backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }

    /// GET an endpoint, retrying quota responses, server errors and
    /// transport failures. Returns the JSON body of a successful call.
    async fn get(
        &self,
        path: &str,
        tr_id: &str,
        params: &[(&str, String)],
    ) -> Result<Value, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_error = ProviderError::Network("no attempt made".into());

        for attempt in 0..self.max_retries {
            self.throttle.acquire().await;
            let token = self.session.bearer().await?;

            let err = match self.send_once(&url, &token, tr_id, params).await {
                Ok(body) => return Ok(body),
                Err(e) => e,
            };

            let wait = if matches!(err, ProviderError::Auth(_)) {
                warn!(tr_id, "KIS token rejected, re-authenticating");
                self.session.invalidate(&token).await;
                Duration::ZERO
            } else if matches!(err, ProviderError::RateLimited { .. }) {
                let wait = self.backoff(attempt);
                warn!(
                    tr_id,
                    attempt = attempt + 1,
                    max = self.max_retries,
                    wait_ms = wait.as_millis() as u64,
                    "KIS quota reached, backing off"
                );
                wait
            } else if err.is_recoverable() {
                warn!(tr_id, attempt, error = %err, "KIS request failed, retrying");
                self.error_pause
            } else {
                return Err(err);
            };

            last_error = match err {
                ProviderError::RateLimited { .. } => ProviderError::RateLimited {
                    retry_after_secs: Some(wait.as_secs()),
                },
                other => other,
            };
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
        }

        Err(last_error)
    }

    /// One authenticated GET. A 401 maps to `Auth`, quota answers to
    /// `RateLimited`, transport failures and 5xx to `Network`.
    async fn send_once(
        &self,
        url: &str,
        token: &str,
        tr_id: &str,
        params: &[(&str, String)],
    ) -> Result<Value, ProviderError> {
        let response = self
            .client
            .get(url)
            .header("content-type", "application/json; charset=utf-8")
            .header("authorization", format!("Bearer {}", token))
            .header("appkey", self.session.app_key())
            .header("appsecret", self.session.app_secret())
            .header("tr_id", tr_id)
            .header("custtype", "P")
            .query(params)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let body: Value = response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

            let msg = body.get("msg1").and_then(Value::as_str).unwrap_or_default();
            if is_quota_message(msg) {
                return Err(ProviderError::RateLimited {
                    retry_after_secs: None,
                });
            }
            return Ok(body);
        }

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProviderError::Auth(status.to_string()));
        }
        if status.is_server_error() {
            return Err(ProviderError::Network(format!("server error {}", status)));
        }

        let text = response.text().await.unwrap_or_default();
        Err(ProviderError::Rejected(format!("{} - {}", status, text)))
    }

    /// Extract a row list from a response envelope after checking `rt_cd`.
    fn rows<T: for<'de> Deserialize<'de>>(body: Value, field: &str) -> Result<Vec<T>, ProviderError> {
        let rt_cd = body.get("rt_cd").and_then(Value::as_str).unwrap_or_default();
        if rt_cd != "0" {
            let msg = body.get("msg1").and_then(Value::as_str).unwrap_or("unknown error");
            return Err(ProviderError::Rejected(msg.trim().to_string()));
        }

        match body.get(field) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(rows) => serde_json::from_value(rows.clone())
                .map_err(|e| ProviderError::InvalidResponse(format!("{}: {}", field, e))),
        }
    }
}

#[async_trait]
impl MarketDataProvider for KisClient {
    fn name(&self) -> &'static str {
        "kis"
    }

    async fn fetch_price_series(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
        granularity: Granularity,
    ) -> Result<Vec<PriceBar>, ProviderError> {
        let params = [
            ("FID_COND_MRKT_DIV_CODE", MARKET_DIV_STOCK.to_string()),
            ("FID_INPUT_ISCD", ticker.to_string()),
            ("FID_INPUT_DATE_1", start.format("%Y%m%d").to_string()),
            ("FID_INPUT_DATE_2", end.format("%Y%m%d").to_string()),
            ("FID_PERIOD_DIV_CODE", granularity.period_code().to_string()),
            ("FID_ORG_ADJ_PRC", "0".to_string()),
        ];

        let body = self.get(CHART_PATH, CHART_TR_ID, &params).await?;
        let rows: Vec<ChartRow> = Self::rows(body, "output2")?;
        let bars = normalize_price_bars(rows.into_iter().filter_map(ChartRow::into_bar).collect());

        if bars.is_empty() {
            return Err(ProviderError::DataNotAvailable(format!(
                "{} {}..{}",
                ticker, start, end
            )));
        }

        debug!(ticker, bars = bars.len(), "Fetched price series");
        Ok(bars)
    }

    async fn fetch_flow_series(&self, ticker: &str) -> Result<Vec<FlowBar>, ProviderError> {
        let params = [
            ("FID_COND_MRKT_DIV_CODE", MARKET_DIV_STOCK.to_string()),
            ("FID_INPUT_ISCD", ticker.to_string()),
        ];

        let body = self.get(INVESTOR_PATH, INVESTOR_TR_ID, &params).await?;
        let rows: Vec<InvestorRow> = Self::rows(body, "output")?;
        let flows = normalize_flow_bars(rows.into_iter().filter_map(InvestorRow::into_flow).collect());

        debug!(ticker, days = flows.len(), "Fetched investor flow");
        Ok(flows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_chart_row_parsing() {
        let row: ChartRow = serde_json::from_value(json!({
            "stck_bsop_date": "20260102",
            "stck_clpr": "71500",
            "stck_oprc": "70000",
            "stck_hgpr": "72000",
            "stck_lwpr": "69800",
            "acml_vol": "12345678",
            "acml_tr_pbmn": "880000000000",
            "flng_cls_code": "00"
        }))
        .unwrap();

        let bar = row.into_bar().unwrap();
        assert_eq!(bar.date, date("2026-01-02"));
        assert_eq!(bar.close, 71500.0);
        assert_eq!(bar.open, 70000.0);
        assert_eq!(bar.volume, 12345678.0);
    }

    #[test]
    fn test_empty_chart_row_is_dropped() {
        let row: ChartRow = serde_json::from_value(json!({"stck_bsop_date": ""})).unwrap();
        assert!(row.into_bar().is_none());
    }

    #[test]
    fn test_investor_amounts_scaled_to_krw() {
        let row: InvestorRow = serde_json::from_value(json!({
            "stck_bsop_date": "20260102",
            "prsn_ntby_tr_pbmn": "-1500",
            "frgn_ntby_tr_pbmn": "1200",
            "orgn_ntby_tr_pbmn": ""
        }))
        .unwrap();

        let flow = row.into_flow().unwrap();
        assert_eq!(flow.individual_net, -1_500_000_000.0);
        assert_eq!(flow.foreign_net, 1_200_000_000.0);
        assert_eq!(flow.institution_net, 0.0);
    }

    #[test]
    fn test_normalize_price_bars() {
        let bar = |d: &str, close: f64| PriceBar {
            date: date(d),
            open: close,
            high: close,
            low: close,
            close,
            volume: 0.0,
            value: 0.0,
        };
        let bars = normalize_price_bars(vec![
            bar("2026-01-05", 3.0),
            bar("2026-01-02", 1.0),
            bar("2026-01-05", 3.0),
            bar("2026-01-03", 0.0),
        ]);
        let dates: Vec<_> = bars.iter().map(|b| b.date).collect();
        assert_eq!(dates, vec![date("2026-01-02"), date("2026-01-05")]);
    }

    #[test]
    fn test_rows_rejects_error_code() {
        let body = json!({"rt_cd": "1", "msg1": "조회할 자료가 없습니다"});
        let err = KisClient::rows::<ChartRow>(body, "output2").unwrap_err();
        assert!(matches!(err, ProviderError::Rejected(_)));
    }

    #[test]
    fn test_quota_message_detection() {
        assert!(is_quota_message("초당 전송건수를 초과하였습니다."));
        assert!(!is_quota_message("정상처리 되었습니다."));
    }
}
