//! JSON run reports.
//!
//! One file per run, grouped by the UTC date the run started on:
//! `{report_dir}/{YYYY-MM-DD}/{HHMMSS}.json`.

use crate::models::RunReport;
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, instrument};

/// Path the report for a run started at `report.started_at` is written to.
pub fn report_path(report: &RunReport, report_dir: &str) -> PathBuf {
    Path::new(report_dir)
        .join(report.started_at.format("%Y-%m-%d").to_string())
        .join(format!("{}.json", report.started_at.format("%H%M%S")))
}

/// Write a [`RunReport`] to a JSON file with date-based directory structure.
///
/// # Arguments
///
/// * `report` - The finished run to serialize
/// * `report_dir` - Base directory for reports
///
/// # Returns
///
/// The path written, or an error if directory creation or file writing fails.
///
/// # Output Path
///
/// The file is written to: `{report_dir}/{YYYY-MM-DD}/{HHMMSS}.json`, using
/// the UTC time the run started.
#[instrument(level = "info", skip_all, fields(report_dir = %report_dir))]
pub async fn write_run_report(
    report: &RunReport,
    report_dir: &str,
) -> Result<PathBuf, Box<dyn Error>> {
    let json = serde_json::to_string_pretty(report)?;
    let path = report_path(report, report_dir);

    if let Some(dir) = path.parent() {
        info!(dir = %dir.display(), "Ensuring report directory exists");
        if let Err(e) = fs::create_dir_all(dir).await {
            error!(dir = %dir.display(), error = %e, "Failed to create report dir");
            return Err(e.into());
        }
    }

    fs::write(&path, json).await?;
    info!(path = %path.display(), symbols = report.results.len(), "Wrote run report");
    Ok(path)
}
