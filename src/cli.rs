//! Command-line interface definitions.
//!
//! The two positional arguments slice the symbol list; every option can also
//! be set in the YAML config file, and the flags below take precedence.

use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for the feed relay.
///
/// # Examples
///
/// ```sh
/// # Every symbol in stocks.csv
/// stock_feed_relay
///
/// # Symbols 100..200 only, with a run report
/// stock_feed_relay 100 200 --report-dir ./reports
///
/// # Token from the environment, custom endpoint
/// WP_API_TOKEN=... stock_feed_relay --sink-url https://example.com/ingest
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Index of the first symbol to process
    pub start: Option<usize>,

    /// Index one past the last symbol to process
    pub end: Option<usize>,

    /// CSV file with `Stock name` and `Symbol` columns
    #[arg(short, long)]
    pub symbols: Option<PathBuf>,

    /// Optional path to a YAML settings file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Ingestion endpoint that receives feed records
    #[arg(long, env = "SINK_URL")]
    pub sink_url: Option<String>,

    /// Bearer token for the ingestion endpoint
    #[arg(long, env = "WP_API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,

    /// Landing page opened before the first search
    #[arg(long)]
    pub page_url: Option<String>,

    /// Directory for JSON run reports
    #[arg(short, long)]
    pub report_dir: Option<String>,

    /// Show the browser window
    #[arg(long)]
    pub headful: bool,

    /// Chromium/Chrome executable (auto-detected when omitted)
    #[arg(long, env = "CHROME_PATH")]
    pub chrome_path: Option<PathBuf>,
}
