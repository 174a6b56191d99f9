//! Pipeline orchestration: resolve → extract → forward, one symbol at a time.
//!
//! The browser tab is a single mutable resource, so symbols are processed
//! strictly in order and never concurrently. A failure for one symbol ends
//! up in that symbol's [`PipelineResult`] and the loop moves on.

use crate::browser::BrowserDriver;
use crate::config::Settings;
use crate::extractor::extract;
use crate::forwarder::IngestionSink;
use crate::models::{ForwardOutcome, PipelineResult, SymbolRequest};
use crate::resolver::{EntityResolver, Resolution};
use chrono::{DateTime, FixedOffset, Utc};
use futures::{pin_mut, StreamExt};
use std::ops::Range;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

/// Clamp optional `[start, end)` bounds to a list of `len` items.
///
/// Out-of-range bounds are cut to `len`; `start >= end` selects nothing.
pub fn slice_range(len: usize, start: Option<usize>, end: Option<usize>) -> Range<usize> {
    let end = end.unwrap_or(len).min(len);
    let start = start.unwrap_or(0).min(end);
    start..end
}

/// Source of the extraction reference time.
pub type Clock<'a> = Box<dyn Fn() -> DateTime<FixedOffset> + 'a>;

pub struct Pipeline<'a, S> {
    settings: &'a Settings,
    sink: S,
    clock: Clock<'a>,
}

impl<'a, S: IngestionSink> Pipeline<'a, S> {
    /// Reference times come from the wall clock, in the offset the site
    /// prints its dates in.
    pub fn new(settings: &'a Settings, sink: S) -> Self {
        let offset = settings.label_offset();
        Self {
            settings,
            sink,
            clock: Box::new(move || Utc::now().with_timezone(&offset)),
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<FixedOffset> + 'a) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Process `symbols[start..end]` in order.
    ///
    /// # Arguments
    ///
    /// * `driver` - The shared browser tab, already on a page with the search bar
    /// * `symbols` - The full symbol list
    /// * `start`, `end` - Optional slice bounds, clamped by [`slice_range`]
    ///
    /// # Returns
    ///
    /// One [`PipelineResult`] per symbol in range, in order, whatever happened
    /// to the individual symbols.
    #[instrument(level = "info", skip_all, fields(total = symbols.len()))]
    pub async fn run<D: BrowserDriver>(
        &self,
        driver: &mut D,
        symbols: &[SymbolRequest],
        start: Option<usize>,
        end: Option<usize>,
    ) -> Vec<PipelineResult> {
        let range = slice_range(symbols.len(), start, end);
        info!(start = range.start, end = range.end, "Processing symbols");

        let mut results = Vec::with_capacity(range.len());
        for (offset, request) in symbols[range.clone()].iter().enumerate() {
            if offset > 0 && !self.settings.symbol_delay().is_zero() {
                sleep(self.settings.symbol_delay()).await;
            }
            results.push(self.process(driver, request, range.start + offset).await);
        }
        results
    }

    async fn process<D: BrowserDriver>(
        &self,
        driver: &mut D,
        request: &SymbolRequest,
        index: usize,
    ) -> PipelineResult {
        let symbol = request.symbol.as_str();
        info!(index, %symbol, name = %request.name, "Processing symbol");
        let mut result = PipelineResult::unmatched(request);

        let entity = match EntityResolver::new(self.settings).resolve(driver, symbol).await {
            Ok(Resolution::Matched(entity)) => entity,
            Ok(Resolution::NotFound) => {
                info!(index, %symbol, "Symbol not found; skipping");
                return result;
            }
            Err(e) => {
                error!(index, %symbol, error = %e, "Symbol failed; continuing with next");
                result.error = Some(e.to_string());
                return result;
            }
        };
        result.matched = true;
        debug!(%symbol, label = %entity.label(), "Reading feeds");

        let reference = (self.clock)();
        let records = extract(
            &*driver,
            &entity,
            request,
            reference,
            self.settings.window(),
            self.settings,
        );
        pin_mut!(records);

        while let Some(item) = records.next().await {
            let record = match item {
                Ok(record) => record,
                Err(e) => {
                    error!(%symbol, error = %e, records = result.records.len(), "Feed extraction failed partway");
                    result.error = Some(e.to_string());
                    break;
                }
            };
            if !result.records.is_empty() && !self.settings.post_delay().is_zero() {
                sleep(self.settings.post_delay()).await;
            }
            let outcome = self.sink.forward(&record).await;
            match &outcome {
                ForwardOutcome::Stored | ForwardOutcome::Duplicate => {
                    info!(%symbol, date = %record.date, source = %record.source, outcome = outcome.label(), "Forwarded record");
                }
                ForwardOutcome::Failed(e) => {
                    warn!(%symbol, date = %record.date, source = %record.source, error = %e, "Failed to forward record");
                }
            }
            result.records.push(record);
            result.outcomes.push(outcome);
        }

        info!(
            %symbol,
            records = result.records.len(),
            stored = result.count("stored"),
            duplicate = result.count("duplicate"),
            failed = result.count("failed"),
            "Symbol done"
        );
        result
    }
}
