//! Report rendering for scan results.
//!
//! Generates reports in two formats:
//! - Markdown (for terminals and notes)
//! - JSON (for dashboards and programmatic use)

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::aggregator::CrossMarketReport;
use crate::scanner::{AnalysisResult, LeaderEntry};

/// 1억 KRW
const EOK: f64 = 100_000_000.0;

/// 1조 KRW
const JO: f64 = 1_000_000_000_000.0;

// ============================================================================
// Report Format
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    /// Markdown tables (human-readable)
    Markdown,
    /// JSON (machine-readable)
    Json,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Json => "json",
        }
    }
}

impl std::fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Markdown => write!(f, "markdown"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "markdown" | "md" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown report format: {}", s)),
        }
    }
}

// ============================================================================
// Number formatting
// ============================================================================

/// Integer with thousands separators (e.g., 71,500).
pub fn thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if value < 0 {
        format!("-{}", out)
    } else {
        out
    }
}

/// KRW amount in 억 units with sign (e.g., +12억).
pub fn eok(amount: f64) -> String {
    let v = (amount / EOK).round() as i64;
    if v > 0 {
        format!("+{}억", thousands(v))
    } else {
        format!("{}억", thousands(v))
    }
}

/// Market cap in 조 units.
fn jo(amount: f64) -> String {
    format!("{:.1}조", amount / JO)
}

fn disparity_cell(r: &AnalysisResult) -> String {
    r.disparity.map_or_else(|| "-".to_string(), |d| format!("{:.1}%", d))
}

// ============================================================================
// Scan Report Renderer
// ============================================================================

/// Renders the three cross-market views.
pub struct ScanReportRenderer<'a> {
    report: &'a CrossMarketReport,
    as_of: NaiveDate,
}

impl<'a> ScanReportRenderer<'a> {
    pub fn new(report: &'a CrossMarketReport, as_of: NaiveDate) -> Self {
        Self { report, as_of }
    }

    pub fn generate(&self, format: ReportFormat) -> Result<String> {
        match format {
            ReportFormat::Markdown => Ok(self.to_markdown()),
            ReportFormat::Json => self.to_json(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        #[derive(Serialize)]
        struct Envelope<'r> {
            as_of: NaiveDate,
            #[serde(flatten)]
            report: &'r CrossMarketReport,
        }

        serde_json::to_string_pretty(&Envelope {
            as_of: self.as_of,
            report: self.report,
        })
        .context("Failed to serialize scan report")
    }

    pub fn to_markdown(&self) -> String {
        let r = self.report;
        let markets: Vec<&str> = r.markets.iter().map(|m| m.as_str()).collect();
        let mut md = String::new();

        md.push_str(&format!(
            "# 시장 스캔 리포트\n\n**기준일**: {}\n**시장**: {}\n\n",
            self.as_of,
            markets.join(", ")
        ));

        if !r.warnings.is_empty() {
            md.push_str("> **경고**\n");
            for w in &r.warnings {
                md.push_str(&format!("> - {}\n", w));
            }
            md.push('\n');
        }

        // P1
        md.push_str("## P1 지수 기여 상위\n\n");
        if r.p1.is_empty() {
            md.push_str("해당 종목 없음\n\n");
        } else {
            md.push_str("| 순위 | 코드 | 종목명 | 현재가 | 등락률 | 시가총액 | 기여도 |\n");
            md.push_str("|------|------|--------|--------|--------|----------|--------|\n");
            for (i, row) in r.p1.iter().enumerate() {
                md.push_str(&format!(
                    "| {} | {} | {} | {} | {:+.2}% | {} | {:.0} |\n",
                    i + 1,
                    row.code,
                    row.name,
                    thousands(row.current_price),
                    row.pct_change,
                    jo(row.market_cap),
                    row.contribution
                ));
            }
            md.push('\n');
        }

        // P2
        md.push_str("## P2 수급 주도 (초기 포착)\n\n");
        if r.p2.is_empty() {
            md.push_str("해당 종목 없음\n\n");
        } else {
            md.push_str("| 코드 | 종목명 | 시장 | 현재가 | 외국인 | 기관 | 개인 | 외국인 연속 | 개인 연속매도 | 이격도 |\n");
            md.push_str("|------|--------|------|--------|--------|------|------|-------------|---------------|--------|\n");
            for row in &r.p2 {
                md.push_str(&format!(
                    "| {} | {} | {} | {} | {} | {} | {} | {}일 | {}일 | {} |\n",
                    row.code,
                    row.name,
                    row.market,
                    thousands(row.current_price),
                    eok(row.foreign_net_amount),
                    eok(row.institution_net_amount),
                    eok(row.individual_net_amount),
                    row.foreign_consecutive_days,
                    row.personal_consecutive_sell_days,
                    disparity_cell(row)
                ));
            }
            md.push('\n');
        }

        // P3
        md.push_str("## P3 바닥 반등\n\n");
        if r.p3.is_empty() {
            md.push_str("해당 종목 없음\n\n");
        } else {
            md.push_str("| 코드 | 종목명 | 시장 | 현재가 | 등락률 | 외국인 | 이격도 | 사유 |\n");
            md.push_str("|------|--------|------|--------|--------|--------|--------|------|\n");
            for row in &r.p3 {
                md.push_str(&format!(
                    "| {} | {} | {} | {} | {:+.2}% | {} | {} | {} |\n",
                    row.code,
                    row.name,
                    row.market,
                    thousands(row.current_price),
                    row.pct_change,
                    eok(row.foreign_net_amount),
                    disparity_cell(row),
                    row.reason_text()
                ));
            }
            md.push('\n');
        }

        md.push_str(&format!(
            "---\n*P2 분류 대상 {}건 중 초기 포착 {}건*\n",
            r.p2_diagnostics.len(),
            r.p2.len()
        ));
        md
    }

    /// Write the report; `path` without an extension gets one from `format`.
    pub fn save_to_file(&self, path: &Path, format: ReportFormat) -> Result<PathBuf> {
        let content = self.generate(format)?;
        save(path, format, &content)
    }
}

// ============================================================================
// Leaderboard
// ============================================================================

pub fn leaders_to_markdown(entries: &[LeaderEntry], as_of: NaiveDate) -> String {
    let mut md = format!("# P1 지수 기여 상위 ({})\n\n", as_of);
    if entries.is_empty() {
        md.push_str("기준일 데이터 없음\n");
        return md;
    }

    md.push_str("| 순위 | 코드 | 종목명 | 종가 | 등락률 | 시가총액 | 기여도 |\n");
    md.push_str("|------|------|--------|------|--------|----------|--------|\n");
    for (i, e) in entries.iter().enumerate() {
        md.push_str(&format!(
            "| {} | {} | {} | {} | {:+.2}% | {} | {:.0} |\n",
            i + 1,
            e.code,
            e.name,
            thousands(e.close.round() as i64),
            e.pct_change,
            jo(e.market_cap),
            e.contribution
        ));
    }
    md
}

pub fn render_leaders(entries: &[LeaderEntry], as_of: NaiveDate, format: ReportFormat) -> Result<String> {
    match format {
        ReportFormat::Markdown => Ok(leaders_to_markdown(entries, as_of)),
        ReportFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
            "as_of": as_of,
            "leaders": entries,
        }))
        .context("Failed to serialize leaderboard"),
    }
}

/// Write `content`, creating parent directories.
pub fn save(path: &Path, format: ReportFormat, content: &str) -> Result<PathBuf> {
    let file_path = if path.extension().is_none() {
        path.with_extension(format.extension())
    } else {
        path.to_path_buf()
    };

    if let Some(parent) = file_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("Failed to create report directory")?;
        }
    }

    std::fs::write(&file_path, content).context("Failed to write report file")?;
    Ok(file_path)
}
