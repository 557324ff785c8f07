//! Focused index-contribution leaderboard.
//!
//! A lighter P1-only pass: a short daily window per ticker is enough to read
//! the as-of close and the close before it.

use chrono::{Duration as ChronoDuration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::pool::WorkerPool;
use super::progress::{notify, ProgressSink};
use super::{select_top_n, ScanError};
use crate::aggregator::P1_LEADERBOARD_SIZE;
use crate::data::{Granularity, Market, MarketDataProvider, PriceBar, TickerMeta, UniverseError, UniverseSource};

/// Default concurrent tasks for the leaderboard pass.
pub const DEFAULT_LEADERBOARD_CONCURRENCY: usize = 2;

/// Default calendar days fetched per ticker.
pub const DEFAULT_LEADERBOARD_LOOKBACK_DAYS: u32 = 10;

/// One ranked index contributor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderEntry {
    pub code: String,
    pub name: String,
    pub market_cap: f64,
    pub close: f64,
    /// Change vs. the previous trading day (%); 0 without a previous bar
    pub pct_change: f64,
    pub contribution: f64,
}

/// Locate the `as_of` bar and compute its change vs. the bar before it.
fn leader_entry(meta: &TickerMeta, bars: &[PriceBar], as_of: NaiveDate) -> Option<LeaderEntry> {
    let idx = bars.iter().position(|b| b.date == as_of)?;
    let close = bars[idx].close;
    let pct_change = match idx.checked_sub(1).map(|i| bars[i].close) {
        Some(prev) if prev > 0.0 => (close - prev) / prev * 100.0,
        _ => 0.0,
    };

    Some(LeaderEntry {
        code: meta.code.clone(),
        name: meta.name.clone(),
        market_cap: meta.market_cap,
        close,
        pct_change,
        contribution: meta.market_cap * pct_change,
    })
}

pub struct LeaderboardScan {
    provider: Arc<dyn MarketDataProvider>,
    universe: Arc<dyn UniverseSource>,
    pool: WorkerPool,
    lookback_days: u32,
}

impl LeaderboardScan {
    pub fn new(provider: Arc<dyn MarketDataProvider>, universe: Arc<dyn UniverseSource>) -> Self {
        Self {
            provider,
            universe,
            pool: WorkerPool::new(DEFAULT_LEADERBOARD_CONCURRENCY),
            lookback_days: DEFAULT_LEADERBOARD_LOOKBACK_DAYS,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.pool = WorkerPool::new(concurrency);
        self
    }

    pub fn with_lookback_days(mut self, days: u32) -> Self {
        self.lookback_days = days;
        self
    }

    /// Close the pool; later runs fail with `PoolClosed`.
    pub fn shutdown(&self) {
        self.pool.close();
    }

    /// Rank the `top_n` largest KOSPI tickers by contribution on `as_of`.
    ///
    /// Tickers without an `as_of` bar are dropped. Returns at most five
    /// entries, contribution descending.
    pub async fn run(
        &self,
        top_n: usize,
        as_of: NaiveDate,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> Result<Vec<LeaderEntry>, ScanError> {
        if self.pool.is_closed() {
            return Err(ScanError::PoolClosed);
        }
        if top_n == 0 {
            return Err(ScanError::InvalidRequest("top_n must be at least 1".into()));
        }

        let market = Market::Kospi;
        let universe = match self.universe.load_universe(market).await {
            Ok(t) => t,
            Err(UniverseError::Missing(path)) => {
                warn!(path = %path.display(), "Universe snapshot missing, no leaders");
                return Ok(Vec::new());
            }
            Err(source) => return Err(ScanError::UniverseLoad { market, source }),
        };

        let tickers = select_top_n(universe, top_n);
        let total = tickers.len();
        let start = as_of - ChronoDuration::days(i64::from(self.lookback_days));
        info!(total, as_of = %as_of, "Starting leaderboard scan");

        let mut tasks = JoinSet::new();
        for meta in tickers {
            let provider = self.provider.clone();
            self.pool.spawn(&mut tasks, async move {
                match provider
                    .fetch_price_series(&meta.code, start, as_of, Granularity::Daily)
                    .await
                {
                    Ok(bars) => leader_entry(&meta, &bars, as_of),
                    Err(e) => {
                        debug!(ticker = %meta.code, error = %e, "Leaderboard fetch failed");
                        None
                    }
                }
            });
        }

        let mut entries = Vec::new();
        let mut completed = 0usize;
        while let Some(joined) = tasks.join_next().await {
            completed += 1;
            match joined {
                Ok(Some(Some(entry))) => entries.push(entry),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Leaderboard task panicked"),
            }
            notify(
                progress.as_deref(),
                completed as f64 / total as f64,
                &format!("leaders {}/{}", completed, total),
            );
        }

        entries.sort_by(|a, b| {
            b.contribution
                .total_cmp(&a.contribution)
                .then_with(|| a.code.cmp(&b.code))
        });
        entries.truncate(P1_LEADERBOARD_SIZE);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(day: u32, close: f64) -> PriceBar {
        PriceBar {
            date: NaiveDate::from_ymd_opt(2026, 1, day).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 0.0,
            value: 0.0,
        }
    }

    fn meta() -> TickerMeta {
        TickerMeta {
            code: "005930".into(),
            name: "Samsung Electronics".into(),
            market: Market::Kospi,
            market_cap: 400e12,
        }
    }

    #[test]
    fn test_leader_entry_uses_previous_bar() {
        let bars = vec![bar(2, 100.0), bar(5, 102.0), bar(6, 99.0)];
        let entry = leader_entry(&meta(), &bars, bars[1].date).unwrap();
        assert!((entry.pct_change - 2.0).abs() < 1e-9);
        assert!((entry.contribution - 800e12).abs() < 1.0);
    }

    #[test]
    fn test_leader_entry_without_previous_bar() {
        let bars = vec![bar(2, 100.0)];
        let entry = leader_entry(&meta(), &bars, bars[0].date).unwrap();
        assert_eq!(entry.pct_change, 0.0);
        assert_eq!(entry.contribution, 0.0);
    }

    #[test]
    fn test_leader_entry_missing_date() {
        let bars = vec![bar(2, 100.0), bar(5, 102.0)];
        let as_of = NaiveDate::from_ymd_opt(2026, 1, 3).unwrap();
        assert!(leader_entry(&meta(), &bars, as_of).is_none());
    }
}
