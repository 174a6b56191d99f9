//! Feed extraction from a loaded feeds view.
//!
//! The feed list is read once, top to bottom, as a lazy stream. The site
//! lists items newest first, so the scan stops at the first item whose date
//! label falls outside the window. If the site ever interleaves older items
//! above newer ones, the newer items below the first stale one are missed.

use crate::browser::{BrowserDriver, DriverError};
use crate::config::Settings;
use crate::models::{FeedRecord, SymbolRequest};
use crate::resolver::ResolvedEntity;
use crate::window::{classify_label, LabelClass};
use async_stream::stream;
use chrono::{DateTime, FixedOffset, TimeDelta};
use futures::Stream;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Trimmed text of the first descendant of `item` matching `selector`, or
/// an empty string when there is none.
async fn field_text<D: BrowserDriver>(
    driver: &D,
    item: &D::Element,
    selector: &str,
) -> Result<String, DriverError> {
    match driver.query_within(item, selector).await?.first() {
        Some(el) => Ok(driver.read_text(el).await?.trim().to_string()),
        None => Ok(String::new()),
    }
}

/// Stream the in-window, deduplicated feed records of `entity`.
///
/// # Arguments
///
/// * `driver` - Tab already showing the feeds view of `entity`
/// * `request` - The symbol being processed; names the produced records
/// * `reference` - "Now" for the window, in the offset the site prints dates in
/// * `window` - How far back from `reference` items are kept
///
/// # Returns
///
/// A finite, single-pass stream. A feed list that never renders yields
/// nothing. A driver error mid-scan is yielded as the last item, after the
/// records already produced.
pub fn extract<'a, D: BrowserDriver>(
    driver: &'a D,
    entity: &'a ResolvedEntity,
    request: &'a SymbolRequest,
    reference: DateTime<FixedOffset>,
    window: TimeDelta,
    settings: &'a Settings,
) -> impl Stream<Item = Result<FeedRecord, DriverError>> + 'a {
    stream! {
        let sel = &settings.selectors;
        let symbol = request.symbol.as_str();

        let items = match driver.wait_for_selector(&sel.feed_item, settings.feed_timeout()).await {
            Ok(items) => items,
            Err(e) if e.is_timeout() => {
                info!(%symbol, url = %entity.url(), "Feed list did not render; nothing to extract");
                return;
            }
            Err(e) => {
                warn!(%symbol, error = %e, "Could not read feed list");
                yield Err(e);
                return;
            }
        };
        debug!(%symbol, entries = items.len(), "Feed list rendered");

        let mut seen = HashSet::new();
        let mut produced = 0usize;
        for (index, item) in items.iter().enumerate() {
            let fields = async {
                Ok::<_, DriverError>((
                    field_text(driver, item, &sel.feed_date).await?,
                    field_text(driver, item, &sel.feed_source).await?,
                    field_text(driver, item, &sel.feed_content).await?,
                ))
            };
            let (label, source, content) = match fields.await {
                Ok(fields) => fields,
                Err(e) => {
                    warn!(%symbol, index, error = %e, "Failed to read feed entry; stopping scan");
                    yield Err(e);
                    return;
                }
            };

            if label.is_empty() {
                debug!(%symbol, index, "Skipping entry without a date label");
                continue;
            }
            let date = match classify_label(&label, reference, window) {
                LabelClass::Within(date) => date,
                LabelClass::Outside => {
                    debug!(%symbol, index, %label, "Entry outside the window; stopping scan");
                    break;
                }
            };
            if source.is_empty() || content.is_empty() {
                debug!(%symbol, index, "Skipping entry without source or content");
                continue;
            }

            let record = FeedRecord {
                stock: request.symbol.clone(),
                stock_name: request.name.clone(),
                date,
                source,
                content,
            };
            if !seen.insert(record.dedup_key()) {
                debug!(%symbol, index, "Dropping repeated entry");
                continue;
            }
            produced += 1;
            yield Ok(record);
        }
        info!(%symbol, records = produced, "Feed extraction finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{site, FakeBrowser};
    use crate::browser::{BrowserDriver, WaitPolicy};
    use crate::models::FeedDate;
    use crate::resolver::{EntityResolver, Resolution};
    use chrono::TimeZone;
    use futures::StreamExt;
    use std::time::Duration;

    const DETAIL: &str = "https://web.stockedge.com/share/acme-labs/42";
    const FEEDS: &str = "https://web.stockedge.com/share/acme-labs/42?section=feeds";

    fn reference() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2025, 3, 7, 12, 0, 0)
            .unwrap()
    }

    fn request() -> SymbolRequest {
        SymbolRequest::new("Acme Labs", "ACME")
    }

    /// Resolve ACME against a feeds page holding `entries`.
    async fn resolved(entries: &[String]) -> (FakeBrowser, ResolvedEntity, Settings) {
        let settings = Settings::for_tests();
        let mut browser = FakeBrowser::new(site::MARKETS)
            .with_page(site::MARKETS, &site::search_page())
            .with_page(DETAIL, &site::feeds_page(&[]))
            .with_page(FEEDS, &site::feeds_page(entries))
            .with_suggestions(
                "ACME",
                &site::suggestion_list(&[site::suggestion("Acme Labs", "Stock", DETAIL)]),
            );
        let res = EntityResolver::new(&settings)
            .resolve(&mut browser, "ACME")
            .await
            .unwrap();
        let Resolution::Matched(entity) = res else {
            panic!("fixture did not resolve");
        };
        (browser, entity, settings)
    }

    async fn collect(entries: &[String]) -> Vec<FeedRecord> {
        let (browser, entity, settings) = resolved(entries).await;
        let req = request();
        let items: Vec<_> =
            extract(&browser, &entity, &req, reference(), TimeDelta::hours(24), &settings)
                .collect()
                .await;
        items.into_iter().collect::<Result<_, _>>().unwrap()
    }

    #[tokio::test]
    async fn test_window_and_early_exit() {
        let records = collect(&[
            site::feed_entry("News", "07-Mar-2025", "A"),
            site::feed_entry("News", "05-Mar-2025", "B"),
        ])
        .await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content, "A");
        assert_eq!(records[0].stock, "ACME");
        assert_eq!(records[0].stock_name, "Acme Labs");
        assert_eq!(records[0].date, FeedDate::Label("07-Mar-2025".to_string()));
    }

    #[tokio::test]
    async fn test_scan_stops_at_first_stale_entry() {
        // Out-of-order listing: the in-window entry after the stale one is missed.
        let records = collect(&[
            site::feed_entry("News", "2 hours ago", "A"),
            site::feed_entry("News", "01-Mar-2025", "B"),
            site::feed_entry("News", "Just now", "C"),
        ])
        .await;
        let contents: Vec<_> = records.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, vec!["A"]);
    }

    #[tokio::test]
    async fn test_duplicates_dropped_in_order() {
        let records = collect(&[
            site::feed_entry("News", "Today", "A"),
            site::feed_entry("Analyst", "Today", "A"),
            site::feed_entry("News", "Today", "A"),
            site::feed_entry("News", "Today", "B"),
        ])
        .await;
        let keys: Vec<_> = records
            .iter()
            .map(|r| (r.source.as_str(), r.content.as_str()))
            .collect();
        assert_eq!(keys, vec![("News", "A"), ("Analyst", "A"), ("News", "B")]);
    }

    #[tokio::test]
    async fn test_incomplete_entries_are_skipped() {
        let records = collect(&[
            site::feed_entry("", "Today", "no source"),
            site::feed_entry("News", "Today", ""),
            site::feed_entry("News", "", "no date"),
            site::feed_entry("News", "Today", "kept"),
        ])
        .await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content, "kept");
    }

    #[tokio::test]
    async fn test_relative_labels_become_timestamps() {
        let records = collect(&[site::feed_entry("News", "30 mins ago", "A")]).await;
        assert_eq!(
            records[0].date,
            FeedDate::Timestamp(reference() - TimeDelta::minutes(30))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_feed_list_yields_nothing() {
        let records = collect(&[]).await;
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_read_failure_ends_stream_with_error() {
        let (browser, entity, settings) = resolved(&[
            site::feed_entry("News", "Today", "A"),
            site::feed_entry("News", "Today", "BROKEN"),
            site::feed_entry("News", "Today", "C"),
        ])
        .await;
        let browser = browser.unreadable("BROKEN");
        let req = request();
        let items: Vec<_> =
            extract(&browser, &entity, &req, reference(), TimeDelta::hours(24), &settings)
                .collect()
                .await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().content, "A");
        assert!(matches!(items[1], Err(DriverError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_stream_is_lazy() {
        let (mut browser, entity, settings) = resolved(&[
            site::feed_entry("News", "Today", "A"),
            site::feed_entry("News", "Today", "B"),
        ])
        .await;
        let req = request();
        {
            let stream = extract(&browser, &entity, &req, reference(), TimeDelta::hours(24), &settings);
            futures::pin_mut!(stream);
            let first = stream.next().await.unwrap().unwrap();
            assert_eq!(first.content, "A");
        }
        // Dropping the stream early releases the driver for the next stage.
        browser
            .navigate(site::MARKETS, WaitPolicy::Load, Duration::from_secs(1))
            .await
            .unwrap();
    }
}
