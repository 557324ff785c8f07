//! KRX Scanner Library
//!
//! Daily signal scanner for KOSPI/KOSDAQ equities. Each ticker's recent
//! price and investor-flow history is scored against three rule sets:
//!
//! - **P1 Index leader**: market-cap-weighted price change
//! - **P2 Supply leader**: foreign/institutional accumulation while
//!   individuals sell
//! - **P3 Rebound**: bullish bar below the 20-day average with foreign buying
//!
//! # Architecture
//!
//! ```text
//! tickers.json ──► MarketScanner ──► ScanReport (per segment)
//!                    │   ▲                 │
//!        WorkerPool ─┘   │                 ▼
//!                 KisClient ◄── KisSession  CrossMarketReport ──► report
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod aggregator;
pub mod data;
pub mod indicators;
pub mod report;
pub mod scanner;
pub mod strategy;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use krx_common::config::Config;
use std::sync::Arc;
use tracing::{info, warn};

use crate::aggregator::CrossMarketReport;
use crate::data::{JsonUniverse, KisClient, Market, MarketDataProvider, UniverseSource};
use crate::scanner::{
    LeaderEntry, LeaderboardScan, MarketScanner, ProgressSink, ScaledProgress, ScanReport, ScanRequest,
};

/// Scanner service: one provider, one universe, reusable pools.
pub struct ScannerService {
    config: Config,
    scanner: MarketScanner,
    leaders: LeaderboardScan,
}

impl ScannerService {
    /// Build the service around the KIS adapter and the configured snapshot.
    pub fn from_config(config: Config) -> Result<Self> {
        let provider: Arc<dyn MarketDataProvider> =
            Arc::new(KisClient::from_config(&config.kis).context("Failed to build KIS client")?);
        let universe = JsonUniverse::new(config.scanner.universe_path());
        info!(universe = %universe.path().display(), "Using ticker universe snapshot");
        let universe: Arc<dyn UniverseSource> = Arc::new(universe);
        Ok(Self::with_sources(config, provider, universe))
    }

    /// Build the service around explicit data sources.
    pub fn with_sources(
        config: Config,
        provider: Arc<dyn MarketDataProvider>,
        universe: Arc<dyn UniverseSource>,
    ) -> Self {
        let scanner = MarketScanner::from_config(provider.clone(), universe.clone(), &config.scanner);
        let leaders = LeaderboardScan::new(provider, universe)
            .with_concurrency(config.scanner.leaderboard_concurrency)
            .with_lookback_days(config.scanner.leaderboard_lookback_days);

        Self {
            config,
            scanner,
            leaders,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Scan `markets` in order and aggregate the views.
    ///
    /// With a progress sink, segment `i` of `n` reports within
    /// `[i/n, (i+1)/n]`.
    pub async fn scan_markets(
        &self,
        markets: &[Market],
        top_n: usize,
        as_of: NaiveDate,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> Result<(Vec<ScanReport>, CrossMarketReport)> {
        let mut reports = Vec::with_capacity(markets.len());

        for (i, &market) in markets.iter().enumerate() {
            let mut request = ScanRequest::new(market, top_n, as_of);
            if let Some(sink) = &progress {
                request = request.with_progress(Arc::new(ScaledProgress::segment(
                    sink.clone(),
                    i,
                    markets.len(),
                )));
            }

            let report = self
                .scanner
                .scan(request)
                .await
                .with_context(|| format!("{} scan failed", market))?;

            for w in &report.warnings {
                warn!(market = %market, "{}", w);
            }
            reports.push(report);
        }

        let combined = CrossMarketReport::build(&reports);
        info!(as_of = %as_of, "{}", combined.summary());
        Ok((reports, combined))
    }

    /// Focused P1 leaderboard over the largest KOSPI names.
    pub async fn leaders(
        &self,
        top_n: usize,
        as_of: NaiveDate,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> Result<Vec<LeaderEntry>> {
        let entries = self
            .leaders
            .run(top_n, as_of, progress)
            .await
            .context("Leaderboard scan failed")?;
        info!(as_of = %as_of, leaders = entries.len(), "Leaderboard complete");
        Ok(entries)
    }

    /// Stop admitting new ticker tasks on both pools.
    pub fn shutdown(&self) {
        self.scanner.shutdown();
        self.leaders.shutdown();
    }
}
