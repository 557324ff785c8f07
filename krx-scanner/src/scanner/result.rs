//! Per-ticker scan result.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::data::{Market, TickerMeta};
use crate::indicators::EnrichedBar;
use crate::strategy::{Evaluation, Priority};

/// Snapshot of one qualifying ticker at the as-of bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub code: String,
    pub name: String,
    pub market: Market,
    /// Latest close in KRW
    pub current_price: i64,
    /// Latest day-over-day change (%)
    pub pct_change: f64,
    pub foreign_net_amount: f64,
    pub institution_net_amount: f64,
    pub individual_net_amount: f64,
    pub market_cap: f64,
    /// Close / ma20 × 100; `None` while ma20 is undefined
    pub disparity: Option<f64>,
    pub score: u32,
    pub priority: Option<Priority>,
    pub reasons: Vec<String>,
    pub contribution: f64,
    pub foreign_consecutive_days: u32,
    pub personal_consecutive_sell_days: u32,
    pub is_p1: bool,
    pub is_p2: bool,
    pub is_p3: bool,
}

impl AnalysisResult {
    pub fn new(meta: &TickerMeta, latest: &EnrichedBar, evaluation: Evaluation) -> Self {
        Self {
            code: meta.code.clone(),
            name: meta.name.clone(),
            market: meta.market,
            current_price: latest.close.round() as i64,
            pct_change: latest.pct_change,
            foreign_net_amount: latest.foreign_net,
            institution_net_amount: latest.institution_net,
            individual_net_amount: latest.individual_net,
            market_cap: meta.market_cap,
            disparity: latest.disparity(),
            score: evaluation.score,
            priority: evaluation.priority,
            reasons: evaluation.reasons,
            contribution: evaluation.contribution,
            foreign_consecutive_days: evaluation.foreign_consecutive_days,
            personal_consecutive_sell_days: evaluation.personal_consecutive_sell_days,
            is_p1: evaluation.is_p1,
            is_p2: evaluation.is_p2,
            is_p3: evaluation.is_p3,
        }
    }

    /// Disparity with an undefined ma20 read as 0.
    pub fn disparity_or_zero(&self) -> f64 {
        self.disparity.unwrap_or(0.0)
    }

    /// Reasons joined for single-line display.
    pub fn reason_text(&self) -> String {
        self.reasons.join(", ")
    }
}

fn priority_rank(p: Option<Priority>) -> u8 {
    p.map_or(u8::MAX, u8::from)
}

/// Result ordering: priority ascending (unscored last), contribution
/// descending, score descending, then code.
///
/// Contribution only ranks P1 rows meaningfully; for P2/P3 rows it is 0 and
/// the score decides.
pub fn compare_results(a: &AnalysisResult, b: &AnalysisResult) -> Ordering {
    priority_rank(a.priority)
        .cmp(&priority_rank(b.priority))
        .then_with(|| b.contribution.total_cmp(&a.contribution))
        .then_with(|| b.score.cmp(&a.score))
        .then_with(|| a.code.cmp(&b.code))
}

pub fn sort_scan_results(results: &mut [AnalysisResult]) {
    results.sort_by(compare_results);
}
