//! Market scanner.
//!
//! Loads a segment's universe, runs the fetch → enrich → evaluate pipeline
//! for each ticker on the worker pool, and collects the scored tickers into
//! a `ScanReport`.
//!
//! Per-ticker failures (fetch errors, empty windows, panics) are counted and
//! logged, never propagated. Only universe and request problems fail a scan.

mod leaders;
mod pool;
mod progress;
mod result;

pub use leaders::{
    LeaderEntry, LeaderboardScan, DEFAULT_LEADERBOARD_CONCURRENCY, DEFAULT_LEADERBOARD_LOOKBACK_DAYS,
};
pub use pool::WorkerPool;
pub use progress::{ProgressSink, ScaledProgress};
pub use result::{compare_results, sort_scan_results, AnalysisResult};

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use krx_common::config::ScannerConfig;
use krx_common::logging::generate_run_id;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::data::{
    Granularity, Market, MarketDataProvider, TickerMeta, UniverseError, UniverseSource,
};
use crate::indicators::enrich;
use crate::strategy::SignalEvaluator;

use progress::notify;

/// Default calendar days of history fetched per ticker.
pub const DEFAULT_LOOKBACK_DAYS: u32 = 120;

/// Default concurrent ticker tasks for a full scan.
pub const DEFAULT_CONCURRENCY: usize = 5;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("failed to load {market} universe: {source}")]
    UniverseLoad {
        market: Market,
        #[source]
        source: UniverseError,
    },

    #[error("invalid scan request: {0}")]
    InvalidRequest(String),

    #[error("worker pool is closed")]
    PoolClosed,
}

// ============================================================================
// Request / Report
// ============================================================================

/// One segment scan invocation.
#[derive(Clone)]
pub struct ScanRequest {
    pub market: Market,
    /// Largest-cap tickers to include
    pub top_n: usize,
    pub as_of: NaiveDate,
    pub progress: Option<Arc<dyn ProgressSink>>,
}

impl ScanRequest {
    pub fn new(market: Market, top_n: usize, as_of: NaiveDate) -> Self {
        Self {
            market,
            top_n,
            as_of,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Outcome of one segment scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    /// Scan ID (e.g., "scan_kospi_1a2b3c4d")
    pub id: String,
    pub market: Market,
    pub as_of: NaiveDate,
    /// Scored tickers, sorted by `compare_results`
    pub results: Vec<AnalysisResult>,
    /// Tickers submitted after top-N selection
    pub total_tickers: usize,
    /// Tickers dropped for fetch errors or panics
    pub failed: usize,
    /// Tickers that scored 0
    pub skipped: usize,
    /// Tickers aborted by the scan deadline
    pub timed_out: usize,
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl ScanReport {
    fn new(market: Market, as_of: NaiveDate) -> Self {
        let now = Utc::now();
        Self {
            id: format!("scan_{}_{}", market.as_str().to_lowercase(), generate_run_id()),
            market,
            as_of,
            results: Vec::new(),
            total_tickers: 0,
            failed: 0,
            skipped: 0,
            timed_out: 0,
            warnings: Vec::new(),
            started_at: now,
            completed_at: now,
        }
    }

    fn finish(mut self) -> Self {
        sort_scan_results(&mut self.results);
        self.completed_at = Utc::now();
        self
    }

    pub fn duration_secs(&self) -> f64 {
        (self.completed_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Summary string for logging.
    pub fn summary(&self) -> String {
        format!(
            "{} scan as of {}: {} candidates from {} tickers ({} failed, {} without signal, {} timed out) in {:.1}s",
            self.market,
            self.as_of,
            self.results.len(),
            self.total_tickers,
            self.failed,
            self.skipped,
            self.timed_out,
            self.duration_secs()
        )
    }
}

/// Take the `top_n` largest-cap tickers. Equal caps keep snapshot order.
pub fn select_top_n(mut tickers: Vec<TickerMeta>, top_n: usize) -> Vec<TickerMeta> {
    tickers.sort_by(|a, b| b.market_cap.total_cmp(&a.market_cap));
    tickers.truncate(top_n);
    tickers
}

// ============================================================================
// Per-ticker pipeline
// ============================================================================

enum TickerOutcome {
    Scored(Box<AnalysisResult>),
    NoSignal,
    Failed,
}

#[derive(Clone, Copy)]
struct Window {
    start: NaiveDate,
    end: NaiveDate,
    granularity: Granularity,
}

async fn analyze_ticker(
    provider: Arc<dyn MarketDataProvider>,
    evaluator: SignalEvaluator,
    meta: TickerMeta,
    window: Window,
) -> TickerOutcome {
    let prices = match provider
        .fetch_price_series(&meta.code, window.start, window.end, window.granularity)
        .await
    {
        Ok(bars) if !bars.is_empty() => bars,
        Ok(_) => {
            debug!(ticker = %meta.code, "Empty price window");
            return TickerOutcome::Failed;
        }
        Err(e) => {
            debug!(ticker = %meta.code, error = %e, "Price fetch failed, dropping ticker");
            return TickerOutcome::Failed;
        }
    };

    let flows = if window.granularity.has_flow_data() {
        provider
            .fetch_flow_series(&meta.code)
            .await
            .unwrap_or_else(|e| {
                debug!(ticker = %meta.code, error = %e, "No flow data");
                Vec::new()
            })
    } else {
        Vec::new()
    };

    let series = enrich(&prices, &flows);
    let evaluation = evaluator.evaluate(&series, meta.market_cap);
    if !evaluation.is_candidate() {
        return TickerOutcome::NoSignal;
    }

    match series.last() {
        Some(latest) => TickerOutcome::Scored(Box::new(AnalysisResult::new(&meta, latest, evaluation))),
        None => TickerOutcome::NoSignal,
    }
}

// ============================================================================
// Market Scanner
// ============================================================================

/// Scans one market segment at a time on a reusable worker pool.
pub struct MarketScanner {
    provider: Arc<dyn MarketDataProvider>,
    universe: Arc<dyn UniverseSource>,
    pool: WorkerPool,
    evaluator: SignalEvaluator,
    lookback_days: u32,
    granularity: Granularity,
    scan_timeout: Option<Duration>,
}

impl MarketScanner {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        universe: Arc<dyn UniverseSource>,
        concurrency: usize,
    ) -> Self {
        Self {
            provider,
            universe,
            pool: WorkerPool::new(concurrency),
            evaluator: SignalEvaluator::new(),
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            granularity: Granularity::Daily,
            scan_timeout: None,
        }
    }

    pub fn from_config(
        provider: Arc<dyn MarketDataProvider>,
        universe: Arc<dyn UniverseSource>,
        config: &ScannerConfig,
    ) -> Self {
        Self::new(provider, universe, config.concurrency)
            .with_lookback_days(config.lookback_days)
            .with_scan_timeout(config.scan_timeout_secs.map(Duration::from_secs))
    }

    pub fn with_lookback_days(mut self, days: u32) -> Self {
        self.lookback_days = days;
        self
    }

    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn with_scan_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.scan_timeout = timeout;
        self
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Close the pool; later scans fail with `PoolClosed`.
    pub fn shutdown(&self) {
        self.pool.close();
    }

    /// Run a segment scan.
    pub async fn scan(&self, request: ScanRequest) -> Result<ScanReport, ScanError> {
        if self.pool.is_closed() {
            return Err(ScanError::PoolClosed);
        }
        if request.top_n == 0 {
            return Err(ScanError::InvalidRequest("top_n must be at least 1".into()));
        }

        let market = request.market;
        let progress = request.progress.as_deref();
        let mut report = ScanReport::new(market, request.as_of);

        let universe = match self.universe.load_universe(market).await {
            Ok(tickers) => tickers,
            Err(UniverseError::Missing(path)) => {
                let msg = format!("{} universe snapshot not found: {}", market, path.display());
                warn!(market = %market, path = %path.display(), "Universe snapshot missing, returning empty scan");
                report.warnings.push(msg);
                notify(progress, 1.0, &format!("{}: no tickers", market));
                return Ok(report.finish());
            }
            Err(source) => return Err(ScanError::UniverseLoad { market, source }),
        };

        let tickers = select_top_n(universe, request.top_n);
        let total = tickers.len();
        report.total_tickers = total;

        if total == 0 {
            report.warnings.push(format!("{} universe is empty", market));
            notify(progress, 1.0, &format!("{}: no tickers", market));
            return Ok(report.finish());
        }

        info!(
            market = %market,
            total,
            as_of = %request.as_of,
            concurrency = self.pool.size(),
            provider = self.provider.name(),
            "Starting segment scan"
        );

        let window = Window {
            start: request.as_of - ChronoDuration::days(i64::from(self.lookback_days)),
            end: request.as_of,
            granularity: self.granularity,
        };

        let mut tasks = JoinSet::new();
        for meta in tickers {
            let provider = self.provider.clone();
            self.pool
                .spawn(&mut tasks, analyze_ticker(provider, self.evaluator, meta, window));
        }

        let deadline = self
            .scan_timeout
            .map(|t| tokio::time::Instant::now() + t);
        let mut completed = 0usize;

        loop {
            let next = match deadline {
                Some(at) => match tokio::time::timeout_at(at, tasks.join_next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        let outstanding = tasks.len();
                        tasks.abort_all();
                        while tasks.join_next().await.is_some() {}
                        warn!(market = %market, outstanding, "Scan deadline reached, returning partial results");
                        report.timed_out = outstanding;
                        let msg = format!(
                            "{} scan deadline reached: {} of {} tickers not analysed",
                            market, outstanding, total
                        );
                        notify(progress, 1.0, &msg);
                        report.warnings.push(msg);
                        break;
                    }
                },
                None => tasks.join_next().await,
            };

            let Some(joined) = next else {
                break;
            };

            completed += 1;
            match joined {
                Ok(Some(TickerOutcome::Scored(result))) => report.results.push(*result),
                Ok(Some(TickerOutcome::NoSignal)) => report.skipped += 1,
                Ok(Some(TickerOutcome::Failed)) | Ok(None) => report.failed += 1,
                Err(e) => {
                    warn!(market = %market, error = %e, "Ticker task panicked");
                    report.failed += 1;
                }
            }

            notify(
                progress,
                completed as f64 / total as f64,
                &format!("{} {}/{}", market, completed, total),
            );
        }

        let report = report.finish();
        info!(market = %market, elapsed_ms = (report.duration_secs() * 1000.0) as u64, "{}", report.summary());
        Ok(report)
    }
}
