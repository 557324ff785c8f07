//! Individual signal rules.
//!
//! Each rule looks at one ticker's enriched series and reports whether it
//! qualifies together with the number it is ranked by.

use crate::indicators::EnrichedBar;

/// P3 needs at least this many bars for ma20.
pub const REBOUND_MIN_BARS: usize = 20;

/// P3 disparity ceiling (percent of ma20).
pub const REBOUND_MAX_DISPARITY: f64 = 98.0;

/// P3 minimum trailing foreign buying days.
pub const REBOUND_MIN_FOREIGN_DAYS: u32 = 2;

/// Length of the run of values matching `pred` that ends at the last element.
pub fn trailing_run<I, F>(values: I, pred: F) -> u32
where
    I: DoubleEndedIterator<Item = f64>,
    F: Fn(f64) -> bool,
{
    values.rev().take_while(|v| pred(*v)).count() as u32
}

/// Consecutive days of positive foreign net buying ending at the latest bar.
pub fn foreign_consecutive_days(series: &[EnrichedBar]) -> u32 {
    trailing_run(series.iter().map(|b| b.foreign_net), |v| v > 0.0)
}

/// Consecutive days of individual net selling ending at the latest bar.
pub fn personal_consecutive_sell_days(series: &[EnrichedBar]) -> u32 {
    trailing_run(series.iter().map(|b| b.individual_net), |v| v < 0.0)
}

/// P1: index contribution leadership.
///
/// Returns the contribution (`market_cap * pct_change` of the latest bar)
/// when it is positive.
pub fn index_contribution(series: &[EnrichedBar], market_cap: f64) -> Option<f64> {
    let latest = series.last()?;
    let contribution = market_cap * latest.pct_change;
    (contribution > 0.0).then_some(contribution)
}

/// P2: supply/demand momentum.
///
/// Returns the trailing foreign buying streak when the latest day is a
/// foreign net-buy day.
pub fn supply_momentum(series: &[EnrichedBar]) -> Option<u32> {
    let days = foreign_consecutive_days(series);
    (days > 0).then_some(days)
}

/// P3: rebound from bottom.
///
/// Requires a bullish latest bar, a close at most 98% of ma20, and at least
/// two trailing foreign buying days. Returns the disparity on success.
pub fn rebound(series: &[EnrichedBar]) -> Option<f64> {
    if series.len() < REBOUND_MIN_BARS {
        return None;
    }
    let latest = series.last()?;

    if latest.close <= latest.open {
        return None;
    }

    let disparity = latest.disparity()?;
    if disparity > REBOUND_MAX_DISPARITY {
        return None;
    }

    if foreign_consecutive_days(series) < REBOUND_MIN_FOREIGN_DAYS {
        return None;
    }

    Some(disparity)
}
