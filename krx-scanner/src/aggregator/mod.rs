//! Cross-market aggregation.
//!
//! Turns per-segment scan results into the three published views:
//!
//! - **P1 leaderboard**: top index contributors across all segments
//! - **P2 candidates**: dual-buy tickers where foreign and institutional
//!   buying overlap while individuals sell, in the early-capture stage
//! - **P3 candidates**: every rebound-flagged ticker
//!
//! The P2 filter runs per segment and the survivors are unioned, so a large
//! KOSPI book never crowds KOSDAQ names out of the top-50 cut.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::data::Market;
use crate::scanner::{AnalysisResult, ScanReport};

/// Rows kept in the final P1 leaderboard.
pub const P1_LEADERBOARD_SIZE: usize = 5;

/// Rows taken from each side of the P2 intersection.
pub const P2_TOP_K: usize = 50;

/// Minimum foreign buying streak for P2.
pub const P2_MIN_FOREIGN_DAYS: u32 = 2;

/// Minimum individual selling streak for P2.
pub const P2_MIN_PERSONAL_SELL_DAYS: u32 = 2;

// ============================================================================
// Stage Classification
// ============================================================================

/// Position of a P2 candidate in the accumulation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// 2–4 buying days, price still near ma20
    EarlyCapture,
    /// 5–9 buying days, price modestly above ma20
    TrendConfirmed,
    /// Long streak or stretched price
    Overheated,
    Watch,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Self::EarlyCapture => "early-capture",
            Self::TrendConfirmed => "trend-confirmed",
            Self::Overheated => "overheated",
            Self::Watch => "watch",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Classify by foreign buying streak and disparity (undefined reads as 0).
///
/// Rules are checked in order: overheated, trend-confirmed, early-capture.
pub fn classify_stage(foreign_days: u32, disparity: f64) -> Stage {
    if foreign_days >= 10 || disparity >= 120.0 {
        Stage::Overheated
    } else if (5..=9).contains(&foreign_days) && (105.0..=115.0).contains(&disparity) {
        Stage::TrendConfirmed
    } else if (2..=4).contains(&foreign_days) && disparity <= 105.0 {
        Stage::EarlyCapture
    } else {
        Stage::Watch
    }
}

/// A P2 survivor with its stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedCandidate {
    pub stage: Stage,
    #[serde(flatten)]
    pub result: AnalysisResult,
}

// ============================================================================
// Views
// ============================================================================

fn desc(a: f64, b: f64) -> Ordering {
    b.total_cmp(&a)
}

/// P1 leaderboard: positive contributors, descending, at most five.
pub fn p1_leaderboard<'a, I>(results: I) -> Vec<AnalysisResult>
where
    I: IntoIterator<Item = &'a AnalysisResult>,
{
    let mut rows: Vec<AnalysisResult> = results
        .into_iter()
        .filter(|r| r.contribution > 0.0)
        .cloned()
        .collect();
    rows.sort_by(|a, b| desc(a.contribution, b.contribution).then_with(|| a.code.cmp(&b.code)));
    rows.truncate(P1_LEADERBOARD_SIZE);
    rows
}

/// Top `k` codes by `key` descending.
fn top_codes<F>(rows: &[&AnalysisResult], k: usize, key: F) -> HashSet<String>
where
    F: Fn(&AnalysisResult) -> f64,
{
    let mut sorted = rows.to_vec();
    sorted.sort_by(|a, b| desc(key(*a), key(*b)).then_with(|| a.code.cmp(&b.code)));
    sorted.into_iter().take(k).map(|r| r.code.clone()).collect()
}

/// Every P2 survivor of one segment, classified.
///
/// Dual-buy rows, intersection of the top-50 foreign and top-50
/// institutional buyers, with foreign buying and individual selling streaks
/// of at least two days.
pub fn p2_segment_candidates(results: &[AnalysisResult]) -> Vec<StagedCandidate> {
    let dual_buy: Vec<&AnalysisResult> = results
        .iter()
        .filter(|r| r.foreign_net_amount > 0.0 && r.institution_net_amount > 0.0)
        .collect();

    let by_foreign = top_codes(&dual_buy, P2_TOP_K, |r| r.foreign_net_amount);
    let by_institution = top_codes(&dual_buy, P2_TOP_K, |r| r.institution_net_amount);

    let mut candidates: Vec<StagedCandidate> = dual_buy
        .into_iter()
        .filter(|r| by_foreign.contains(&r.code) && by_institution.contains(&r.code))
        .filter(|r| {
            r.foreign_consecutive_days >= P2_MIN_FOREIGN_DAYS
                && r.personal_consecutive_sell_days >= P2_MIN_PERSONAL_SELL_DAYS
        })
        .map(|r| StagedCandidate {
            stage: classify_stage(r.foreign_consecutive_days, r.disparity_or_zero()),
            result: r.clone(),
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.result
            .foreign_consecutive_days
            .cmp(&a.result.foreign_consecutive_days)
            .then_with(|| a.result.code.cmp(&b.result.code))
    });
    candidates
}

/// P2 view: early-capture survivors of every segment, longest streak first.
pub fn p2_view(candidates: &[StagedCandidate]) -> Vec<AnalysisResult> {
    let mut rows: Vec<AnalysisResult> = candidates
        .iter()
        .filter(|c| c.stage == Stage::EarlyCapture)
        .map(|c| c.result.clone())
        .collect();
    rows.sort_by(|a, b| {
        b.foreign_consecutive_days
            .cmp(&a.foreign_consecutive_days)
            .then_with(|| a.code.cmp(&b.code))
    });
    rows
}

/// P3 view: every rebound-flagged row, foreign net buying descending.
pub fn p3_candidates<'a, I>(results: I) -> Vec<AnalysisResult>
where
    I: IntoIterator<Item = &'a AnalysisResult>,
{
    let mut rows: Vec<AnalysisResult> = results.into_iter().filter(|r| r.is_p3).cloned().collect();
    rows.sort_by(|a, b| desc(a.foreign_net_amount, b.foreign_net_amount).then_with(|| a.code.cmp(&b.code)));
    rows
}

// ============================================================================
// Cross-Market Report
// ============================================================================

/// Final views over any number of segment scans.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrossMarketReport {
    pub markets: Vec<Market>,
    pub p1: Vec<AnalysisResult>,
    pub p2: Vec<AnalysisResult>,
    /// Every classified P2 survivor, including non-early stages
    pub p2_diagnostics: Vec<StagedCandidate>,
    pub p3: Vec<AnalysisResult>,
    /// Warnings carried over from the segment scans
    pub warnings: Vec<String>,
}

impl CrossMarketReport {
    pub fn build(reports: &[ScanReport]) -> Self {
        let all = || reports.iter().flat_map(|r| r.results.iter());

        let p2_diagnostics: Vec<StagedCandidate> = reports
            .iter()
            .flat_map(|r| p2_segment_candidates(&r.results))
            .collect();

        Self {
            markets: reports.iter().map(|r| r.market).collect(),
            p1: p1_leaderboard(all()),
            p2: p2_view(&p2_diagnostics),
            p3: p3_candidates(all()),
            p2_diagnostics,
            warnings: reports.iter().flat_map(|r| r.warnings.iter().cloned()).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.p1.is_empty() && self.p2.is_empty() && self.p3.is_empty()
    }

    /// Summary string for logging.
    pub fn summary(&self) -> String {
        format!(
            "P1 {} / P2 {} ({} classified) / P3 {}",
            self.p1.len(),
            self.p2.len(),
            self.p2_diagnostics.len(),
            self.p3.len()
        )
    }
}
