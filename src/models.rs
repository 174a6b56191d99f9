//! Data models shared by the relay pipeline.
//!
//! This module defines the values that flow between the pipeline stages:
//! - [`SymbolRequest`]: one row of the symbol source
//! - [`FeedRecord`]: one feed item read from a stock's feeds view
//! - [`ForwardOutcome`]: how the ingestion sink treated a record
//! - [`PipelineResult`]: everything that happened for one symbol
//! - [`RunReport`]: the aggregate written at the end of a run
//!
//! The wire names of [`FeedRecord`] follow the ingestion endpoint's JSON
//! schema (`stockName` in camelCase), everything else is snake_case.

use crate::forwarder::ForwardError;
use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A stock to look up, as read from the symbol source.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SymbolRequest {
    /// Human readable company name (`Stock name` column).
    #[serde(rename = "Stock name")]
    pub name: String,
    /// Ticker typed into the search bar (`Symbol` column).
    #[serde(rename = "Symbol")]
    pub symbol: String,
}

impl SymbolRequest {
    pub fn new(name: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbol: symbol.into(),
        }
    }
}

/// Publication date of a feed item.
///
/// Relative labels that carry a quantity ("5 min ago") are turned into a
/// timestamp against the extraction's reference time. Every other label is
/// kept exactly as the site rendered it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FeedDate {
    Timestamp(DateTime<FixedOffset>),
    Label(String),
}

impl fmt::Display for FeedDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedDate::Timestamp(ts) => f.write_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            FeedDate::Label(label) => f.write_str(label),
        }
    }
}

/// A single feed item, serialized as the body of an ingestion POST.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FeedRecord {
    pub stock: String,
    #[serde(rename = "stockName")]
    pub stock_name: String,
    pub date: FeedDate,
    pub source: String,
    pub content: String,
}

impl FeedRecord {
    /// Composite key used to drop repeated entries within one extraction.
    pub fn dedup_key(&self) -> (String, String, String) {
        (
            self.date.to_string(),
            self.source.clone(),
            self.content.clone(),
        )
    }
}

/// What the ingestion sink did with a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ForwardOutcome {
    Stored,
    Duplicate,
    Failed(ForwardError),
}

impl ForwardOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ForwardOutcome::Stored => "stored",
            ForwardOutcome::Duplicate => "duplicate",
            ForwardOutcome::Failed(_) => "failed",
        }
    }
}

/// Everything the pipeline produced for one symbol.
///
/// `records` and `outcomes` are index-aligned: `outcomes[i]` is the sink's
/// answer for `records[i]`.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub symbol: String,
    pub name: String,
    pub matched: bool,
    pub records: Vec<FeedRecord>,
    pub outcomes: Vec<ForwardOutcome>,
    /// Set when a stage failed; the result may still hold partial records.
    pub error: Option<String>,
}

impl PipelineResult {
    pub fn unmatched(request: &SymbolRequest) -> Self {
        Self {
            symbol: request.symbol.clone(),
            name: request.name.clone(),
            matched: false,
            records: Vec::new(),
            outcomes: Vec::new(),
            error: None,
        }
    }

    pub fn count(&self, label: &str) -> usize {
        self.outcomes.iter().filter(|o| o.label() == label).count()
    }
}

/// Aggregate of one run, written by [`crate::outputs::json`].
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub start: usize,
    pub end: usize,
    pub results: Vec<PipelineResult>,
}

impl RunReport {
    pub fn matched(&self) -> usize {
        self.results.iter().filter(|r| r.matched).count()
    }

    pub fn total(&self, label: &str) -> usize {
        self.results.iter().map(|r| r.count(label)).sum()
    }
}
