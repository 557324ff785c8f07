//! KRX Scanner - KOSPI/KOSDAQ daily signal scanner.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use krx_common::config::Config;
use krx_common::logging::init_logging;
use std::path::PathBuf;
use std::sync::Arc;

use krx_scanner::data::Market;
use krx_scanner::report::{render_leaders, save, ReportFormat, ScanReportRenderer};
use krx_scanner::scanner::ProgressSink;
use krx_scanner::ScannerService;

#[derive(Parser, Debug)]
#[command(name = "krx-scanner")]
#[command(version)]
#[command(about = "KOSPI/KOSDAQ signal scanner", long_about = None)]
struct Cli {
    /// Config file (default: ~/.krx-scanner/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan market segments and print the P1/P2/P3 views
    Scan {
        /// Largest-cap tickers per segment (default: scanner.top_n)
        #[arg(long)]
        top_n: Option<usize>,

        /// As-of date, YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// kospi, kosdaq or all
        #[arg(long, default_value = "all")]
        market: String,

        /// markdown or json
        #[arg(long, default_value = "markdown")]
        format: ReportFormat,

        /// Write the report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Rank the largest KOSPI tickers by index contribution
    Leaders {
        #[arg(long, default_value = "50")]
        top_n: usize,

        /// As-of date, YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// markdown or json
        #[arg(long, default_value = "markdown")]
        format: ReportFormat,

        /// Write the report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn parse_markets(s: &str) -> Result<Vec<Market>> {
    if s.eq_ignore_ascii_case("all") {
        return Ok(Market::ALL.to_vec());
    }
    let market = s.parse::<Market>().map_err(anyhow::Error::msg)?;
    Ok(vec![market])
}

fn emit(content: &str, output: Option<PathBuf>, format: ReportFormat) -> Result<()> {
    match output {
        Some(path) => {
            let written = save(&path, format, content)?;
            tracing::info!(path = %written.display(), "Report written");
        }
        None => println!("{}", content),
    }
    Ok(())
}

fn log_progress() -> Arc<dyn ProgressSink> {
    Arc::new(|fraction: f64, message: &str| -> Result<()> {
        tracing::info!(progress = %format!("{:.0}%", fraction * 100.0), "{}", message);
        Ok(())
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_with_env(cli.config.as_deref())?;
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );
    tracing::info!("KRX Scanner v{}", env!("CARGO_PKG_VERSION"));

    let today = Local::now().date_naive();
    let service = ScannerService::from_config(config)?;

    match cli.command {
        Commands::Scan {
            top_n,
            date,
            market,
            format,
            output,
        } => {
            let markets = parse_markets(&market).context("Invalid --market")?;
            let top_n = top_n.unwrap_or(service.config().scanner.top_n);
            let as_of = date.unwrap_or(today);

            let (_, combined) = service
                .scan_markets(&markets, top_n, as_of, Some(log_progress()))
                .await?;
            let content = ScanReportRenderer::new(&combined, as_of).generate(format)?;
            emit(&content, output, format)?;
        }
        Commands::Leaders {
            top_n,
            date,
            format,
            output,
        } => {
            let as_of = date.unwrap_or(today);
            let entries = service.leaders(top_n, as_of, Some(log_progress())).await?;
            let content = render_leaders(&entries, as_of, format)?;
            emit(&content, output, format)?;
        }
    }

    service.shutdown();
    Ok(())
}
