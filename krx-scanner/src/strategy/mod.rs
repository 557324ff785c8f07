//! Signal evaluator.
//!
//! Applies three independent rule sets to one ticker's enriched series:
//!
//! - **P1 Index leader**: market cap × today's change is positive
//! - **P2 Supply leader**: foreign investors are net buyers today
//! - **P3 Rebound**: bullish bar below the 20-day average with foreign buying
//!
//! A ticker carries a flag for every rule it meets. The highest-precedence
//! rule (P1 > P2 > P3) sets its score and priority.

pub mod rules;

use serde::{Deserialize, Serialize};

use crate::indicators::EnrichedBar;

/// Bars required before any rule is checked.
pub const MIN_BARS: usize = 60;

/// Reason recorded when the series is too short.
pub const INSUFFICIENT_DATA: &str = "insufficient data";

/// Rule that determined a ticker's score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Priority {
    /// Index contribution leader
    P1 = 1,
    /// Supply/demand leader
    P2 = 2,
    /// Rebound from bottom
    P3 = 3,
}

impl Priority {
    /// Score awarded by this priority.
    pub fn score(&self) -> u32 {
        match self {
            Self::P1 => 100,
            Self::P2 => 80,
            Self::P3 => 40,
        }
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> u8 {
        p as u8
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Self::P1),
            2 => Ok(Self::P2),
            3 => Ok(Self::P3),
            _ => Err(format!("invalid priority: {}", v)),
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "P{}", *self as u8)
    }
}

/// Outcome of evaluating one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub score: u32,
    pub priority: Option<Priority>,
    /// One tag per qualifying rule, in P1, P2, P3 order
    pub reasons: Vec<String>,
    pub contribution: f64,
    pub foreign_consecutive_days: u32,
    pub personal_consecutive_sell_days: u32,
    pub is_p1: bool,
    pub is_p2: bool,
    pub is_p3: bool,
}

impl Evaluation {
    fn insufficient() -> Self {
        Self {
            score: 0,
            priority: None,
            reasons: vec![INSUFFICIENT_DATA.to_string()],
            contribution: 0.0,
            foreign_consecutive_days: 0,
            personal_consecutive_sell_days: 0,
            is_p1: false,
            is_p2: false,
            is_p3: false,
        }
    }

    /// A scored evaluation is a scan candidate.
    pub fn is_candidate(&self) -> bool {
        self.score > 0
    }
}

/// Stateless rule evaluator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalEvaluator;

impl SignalEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate every rule against `series` for a ticker worth `market_cap`.
    pub fn evaluate(&self, series: &[EnrichedBar], market_cap: f64) -> Evaluation {
        if series.len() < MIN_BARS {
            return Evaluation::insufficient();
        }

        let mut priority: Option<Priority> = None;
        let mut reasons = Vec::new();

        let contribution = rules::index_contribution(series, market_cap);
        if let Some(c) = contribution {
            priority = Some(Priority::P1);
            reasons.push(format!("[P1] index contribution {:.0}", c));
        }

        let foreign_days = rules::supply_momentum(series);
        if let Some(days) = foreign_days {
            if priority.is_none() {
                priority = Some(Priority::P2);
            }
            reasons.push(format!("[P2] foreign buying {} days", days));
        }

        let rebound = rules::rebound(series);
        if let Some(disparity) = rebound {
            if priority.is_none() {
                priority = Some(Priority::P3);
            }
            reasons.push(format!("[P3] rebound (disparity {:.0}%)", disparity));
        }

        Evaluation {
            score: priority.map_or(0, |p| p.score()),
            priority,
            reasons,
            contribution: contribution.unwrap_or(0.0),
            foreign_consecutive_days: rules::foreign_consecutive_days(series),
            personal_consecutive_sell_days: rules::personal_consecutive_sell_days(series),
            is_p1: contribution.is_some(),
            is_p2: foreign_days.is_some(),
            is_p3: rebound.is_some(),
        }
    }
}
