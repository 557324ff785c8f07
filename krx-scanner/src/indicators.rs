//! Indicator engine.
//!
//! Pure functions over an ascending price series: simple moving averages,
//! MACD (recursive EMAs seeded with the first close), and day-over-day
//! percentage change. Input is assumed validated by the fetch boundary
//! (ascending unique dates, positive closes).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::data::{FlowBar, PriceBar};

/// MACD fast EMA span
pub const MACD_FAST: usize = 12;
/// MACD slow EMA span
pub const MACD_SLOW: usize = 26;
/// MACD signal EMA span
pub const MACD_SIGNAL: usize = 9;

/// One bar of price, flow and derived indicators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub value: f64,
    pub foreign_net: f64,
    pub institution_net: f64,
    pub individual_net: f64,
    pub ma5: Option<f64>,
    pub ma20: Option<f64>,
    pub ma60: Option<f64>,
    pub macd: f64,
    pub macd_signal: f64,
    pub macd_oscillator: f64,
    pub pct_change: f64,
}

impl EnrichedBar {
    /// Close relative to the 20-day average, in percent.
    ///
    /// `None` while ma20 is undefined or not positive.
    pub fn disparity(&self) -> Option<f64> {
        match self.ma20 {
            Some(ma) if ma > 0.0 => Some(self.close / ma * 100.0),
            _ => None,
        }
    }
}

/// Simple moving average over `window` values.
///
/// Index `i` is `Some` only when `i + 1 >= window`.
pub fn sma(values: &[f64], window: usize) -> Vec<Option<f64>> {
    if window == 0 {
        return vec![None; values.len()];
    }
    (0..values.len())
        .map(|i| {
            if i + 1 < window {
                None
            } else {
                let slice = &values[i + 1 - window..=i];
                Some(slice.iter().sum::<f64>() / window as f64)
            }
        })
        .collect()
}

/// Recursive exponential moving average seeded with the first value.
///
/// `alpha = 2 / (span + 1)`, `ema[0] = values[0]`.
pub fn ema(values: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev: Option<f64> = None;
    for &v in values {
        let next = match prev {
            None => v,
            Some(p) => alpha * v + (1.0 - alpha) * p,
        };
        out.push(next);
        prev = Some(next);
    }
    out
}

/// MACD line, signal line and oscillator.
#[derive(Debug, Clone, PartialEq)]
pub struct Macd {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub oscillator: Vec<f64>,
}

pub fn macd(closes: &[f64], fast: usize, slow: usize, signal_span: usize) -> Macd {
    let fast_ema = ema(closes, fast);
    let slow_ema = ema(closes, slow);
    let line: Vec<f64> = fast_ema.iter().zip(&slow_ema).map(|(f, s)| f - s).collect();
    let signal = ema(&line, signal_span);
    let oscillator = line.iter().zip(&signal).map(|(m, s)| m - s).collect();
    Macd {
        macd: line,
        signal,
        oscillator,
    }
}

/// Day-over-day change in percent; the first bar is 0.
pub fn pct_change(closes: &[f64]) -> Vec<f64> {
    (0..closes.len())
        .map(|i| {
            if i == 0 {
                0.0
            } else {
                (closes[i] - closes[i - 1]) / closes[i - 1] * 100.0
            }
        })
        .collect()
}

/// Left-join flow rows onto price bars by date.
///
/// A price date with no flow row gets a zero flow record: absent flow is
/// treated as no net buying by any investor class. Flow rows with no matching
/// price date are ignored.
pub fn join_flows(prices: &[PriceBar], flows: &[FlowBar]) -> Vec<FlowBar> {
    let by_date: HashMap<NaiveDate, &FlowBar> = flows.iter().map(|f| (f.date, f)).collect();
    prices
        .iter()
        .map(|p| {
            by_date
                .get(&p.date)
                .map(|f| (*f).clone())
                .unwrap_or_else(|| FlowBar::zero(p.date))
        })
        .collect()
}

/// Join flows and compute every indicator. Output length equals input length.
pub fn enrich(prices: &[PriceBar], flows: &[FlowBar]) -> Vec<EnrichedBar> {
    let closes: Vec<f64> = prices.iter().map(|p| p.close).collect();
    let joined = join_flows(prices, flows);
    let ma5 = sma(&closes, 5);
    let ma20 = sma(&closes, 20);
    let ma60 = sma(&closes, 60);
    let m = macd(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL);
    let pct = pct_change(&closes);

    prices
        .iter()
        .zip(joined)
        .enumerate()
        .map(|(i, (p, f))| EnrichedBar {
            date: p.date,
            open: p.open,
            high: p.high,
            low: p.low,
            close: p.close,
            volume: p.volume,
            value: p.value,
            foreign_net: f.foreign_net,
            institution_net: f.institution_net,
            individual_net: f.individual_net,
            ma5: ma5[i],
            ma20: ma20[i],
            ma60: ma60[i],
            macd: m.macd[i],
            macd_signal: m.signal[i],
            macd_oscillator: m.oscillator[i],
            pct_change: pct[i],
        })
        .collect()
}
