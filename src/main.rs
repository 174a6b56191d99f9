//! # Stock Feed Relay
//!
//! Drives a headless Chromium session through a stock-market web app,
//! collects each stock's recent feed items and relays them to an ingestion
//! endpoint.
//!
//! ## Usage
//!
//! ```sh
//! stock_feed_relay                 # every symbol in stocks.csv
//! stock_feed_relay 100 200 -r ./reports
//! ```
//!
//! ## Architecture
//!
//! One browser tab, one symbol at a time:
//! 1. **Resolution**: type the symbol into the site search and open the
//!    first suggestion tagged `Stock`, then its feeds view
//! 2. **Extraction**: read the feed list top to bottom while items fall in
//!    the time window, dropping repeats
//! 3. **Forwarding**: POST each record to the ingestion endpoint, which
//!    reports `stored` or `duplicate`
//! 4. **Report**: optionally write every per-symbol result as JSON

use chrono::Utc;
use clap::Parser;
use std::error::Error;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

mod browser;
mod cli;
mod config;
mod extractor;
mod forwarder;
mod models;
mod outputs;
mod pipeline;
mod resolver;
mod symbols;
mod utils;
mod window;

use browser::chromium::ChromiumDriver;
use browser::{BrowserDriver, WaitPolicy};
use cli::Cli;
use config::Settings;
use forwarder::{HttpSink, RetrySink};
use models::RunReport;
use outputs::json;
use pipeline::{slice_range, Pipeline};
use utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // Best-effort: a missing .env is normal.
    let _ = dotenvy::dotenv();

    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    let started_at = Utc::now();
    info!("stock_feed_relay starting up");

    let args = Cli::parse();
    debug!(start = ?args.start, end = ?args.end, config = ?args.config, "Parsed CLI arguments");

    let settings = Settings::load(&args)?;
    debug!(?settings, "Effective settings");

    let symbols = symbols::load_symbols(&settings.symbols_file)?;
    let range = slice_range(symbols.len(), args.start, args.end);
    info!(
        file = %settings.symbols_file.display(),
        total = symbols.len(),
        start = range.start,
        end = range.end,
        "Loaded symbols"
    );

    // Early check: the report must be writable before the browser starts
    if let Some(dir) = &settings.report_dir
        && let Err(e) = ensure_writable_dir(dir).await
    {
        error!(
            path = %dir,
            error = %e,
            "Report directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let sink = RetrySink::new(
        HttpSink::new(settings.sink_endpoint()?, settings.api_token.clone())?,
        settings.forward_retries,
        std::time::Duration::from_millis(settings.forward_retry_base_ms),
    );
    info!(
        endpoint = %settings.sink_url,
        authenticated = settings.api_token.is_some(),
        retries = settings.forward_retries,
        "Ingestion sink ready"
    );

    // ---- Browser session ----
    let mut driver = ChromiumDriver::launch(&settings.browser, settings.poll_interval()).await?;
    if let Err(e) = driver
        .navigate(&settings.page_url, WaitPolicy::NetworkIdle, settings.navigation_timeout())
        .await
    {
        error!(url = %settings.page_url, error = %e, "Landing page failed to load; aborting run");
        if let Err(close_err) = driver.close().await {
            warn!(error = %close_err, "Failed to close browser");
        }
        return Err(e.into());
    }
    info!(url = %settings.page_url, "Landing page loaded");

    let pipeline = Pipeline::new(&settings, sink);
    let results = pipeline
        .run(&mut driver, &symbols, args.start, args.end)
        .await;

    if let Err(e) = driver.close().await {
        warn!(error = %e, "Failed to close browser cleanly");
    }

    let report = RunReport {
        started_at,
        finished_at: Utc::now(),
        start: range.start,
        end: range.end,
        results,
    };

    if let Some(dir) = &settings.report_dir
        && let Err(e) = json::write_run_report(&report, dir).await
    {
        error!(error = %e, "Failed to write run report");
    }

    let elapsed = start_time.elapsed();
    info!(
        symbols = report.results.len(),
        matched = report.matched(),
        stored = report.total("stored"),
        duplicate = report.total("duplicate"),
        failed = report.total("failed"),
        ?elapsed,
        secs = elapsed.as_secs(),
        "Run complete"
    );

    Ok(())
}
