//! Entity resolution: symbol → the stock's feeds view.
//!
//! The target site only exposes a stock's page through its search bar. The
//! resolver types the symbol key by key (the autocomplete ignores bulk value
//! changes), picks the first suggestion tagged exactly `Stock`, follows it and
//! then rewrites the destination to the `section=feeds` view.
//!
//! Any failure leaves the search bar cleared so the next symbol starts from
//! a clean input.

use crate::browser::{BrowserDriver, DriverError, WaitPolicy};
use crate::config::Settings;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Chip text that marks equities among the suggestions.
const STOCK_TAG: &str = "Stock";

/// Query parameter/value selecting the feeds tab of a stock page.
const FEEDS_SECTION: (&str, &str) = ("section", "feeds");

/// Handle to a stock's loaded feeds view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntity {
    url: String,
    label: String,
}

impl ResolvedEntity {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Suggestion label that was clicked (the site's company name).
    pub fn label(&self) -> &str {
        &self.label
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Matched(ResolvedEntity),
    NotFound,
}

/// Rewrite a stock page URL to its feeds view, dropping any other query.
pub fn feeds_view_url(current: &str) -> Result<String, DriverError> {
    let mut url = Url::parse(current).map_err(|e| DriverError::Navigation {
        url: current.to_string(),
        reason: e.to_string(),
    })?;
    url.set_fragment(None);
    url.set_query(Some(&format!("{}={}", FEEDS_SECTION.0, FEEDS_SECTION.1)));
    Ok(url.into())
}

fn is_feeds_view(current: &str) -> bool {
    Url::parse(current)
        .map(|u| {
            u.query_pairs()
                .any(|(k, v)| k == FEEDS_SECTION.0 && v == FEEDS_SECTION.1)
        })
        .unwrap_or(false)
}

pub struct EntityResolver<'a> {
    settings: &'a Settings,
}

impl<'a> EntityResolver<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Search for `symbol` and land on its feeds view.
    ///
    /// # Arguments
    ///
    /// * `driver` - The browser tab; must show a page with the site search bar
    /// * `symbol` - Ticker typed into the search bar
    ///
    /// # Returns
    ///
    /// `Matched` with the loaded feeds view, or `NotFound` when no suggestions
    /// render in time or none is tagged `Stock`. Driver failures are returned
    /// as errors after the search input has been reset.
    #[instrument(level = "info", skip_all, fields(%symbol))]
    pub async fn resolve<D: BrowserDriver>(
        &self,
        driver: &mut D,
        symbol: &str,
    ) -> Result<Resolution, DriverError> {
        match self.search_and_open(driver, symbol).await {
            Ok(Resolution::Matched(entity)) => {
                info!(label = %entity.label, url = %entity.url, "Resolved stock");
                Ok(Resolution::Matched(entity))
            }
            Ok(Resolution::NotFound) => {
                info!("No matching stock found");
                self.reset_search(driver).await;
                Ok(Resolution::NotFound)
            }
            Err(e) => {
                warn!(error = %e, "Resolution failed");
                self.reset_search(driver).await;
                Err(e)
            }
        }
    }

    async fn search_and_open<D: BrowserDriver>(
        &self,
        driver: &mut D,
        symbol: &str,
    ) -> Result<Resolution, DriverError> {
        let s = self.settings;
        let input = driver
            .wait_for_selector(&s.selectors.search_input, s.search_input_timeout())
            .await?
            .remove(0);
        driver.click(&input).await?;
        driver.clear(&input).await?;
        driver.type_text(&input, symbol, s.type_delay()).await?;

        let items = match driver
            .wait_for_selector(&s.selectors.suggestion_item, s.suggestion_timeout())
            .await
        {
            Ok(items) => items,
            Err(e) if e.is_timeout() => {
                debug!("Suggestion list never rendered");
                return Ok(Resolution::NotFound);
            }
            Err(e) => return Err(e),
        };

        let Some((index, label)) = self.first_stock(&*driver, &items).await? else {
            debug!(suggestions = items.len(), "No suggestion tagged as a stock");
            return Ok(Resolution::NotFound);
        };

        let before = driver.current_url().await?;
        driver.click(&items[index]).await?;
        let landed = driver
            .wait_for_url_change(&before, s.navigation_timeout())
            .await?;
        debug!(%landed, "Opened stock page");

        // The URL changes before the new document renders; until it settles
        // the previous stock's feed list is still in the DOM.
        let on_feeds = is_feeds_view(&landed);
        let settle = if on_feeds {
            WaitPolicy::NetworkIdle
        } else {
            WaitPolicy::Load
        };
        driver.wait_for_load(settle, s.navigation_timeout()).await?;

        let url = if on_feeds {
            landed
        } else {
            let feeds = feeds_view_url(&landed)?;
            driver
                .navigate(&feeds, WaitPolicy::NetworkIdle, s.navigation_timeout())
                .await?;
            feeds
        };

        self.apply_feed_filter(driver).await;
        Ok(Resolution::Matched(ResolvedEntity { url, label }))
    }

    /// Index and label of the first suggestion whose tag is exactly `Stock`.
    async fn first_stock<D: BrowserDriver>(
        &self,
        driver: &D,
        items: &[D::Element],
    ) -> Result<Option<(usize, String)>, DriverError> {
        let sel = &self.settings.selectors;
        for (index, item) in items.iter().enumerate() {
            let Some(tag) = driver.query_within(item, &sel.suggestion_tag).await?.into_iter().next()
            else {
                continue;
            };
            if driver.read_text(&tag).await?.trim() != STOCK_TAG {
                continue;
            }
            let label = match driver.query_within(item, &sel.suggestion_label).await?.first() {
                Some(el) => driver.read_text(el).await?.trim().to_string(),
                None => String::new(),
            };
            return Ok(Some((index, label)));
        }
        Ok(None)
    }

    /// Narrow the feed list with the site's filter control, if configured.
    /// Failure leaves the unfiltered list in place.
    async fn apply_feed_filter<D: BrowserDriver>(&self, driver: &mut D) {
        let Some(filter) = &self.settings.feed_filter else {
            return;
        };
        let timeout = self.settings.feed_timeout();
        for selector in [&filter.toggle, &filter.option] {
            let clicked = match driver.wait_for_selector(selector, timeout).await {
                Ok(found) => driver.click(&found[0]).await,
                Err(e) => Err(e),
            };
            if let Err(e) = clicked {
                warn!(%selector, error = %e, "Feed filter unavailable; reading unfiltered list");
                return;
            }
        }
        debug!("Feed filter applied");
    }

    /// Best-effort: empty the search bar. Never fails.
    async fn reset_search<D: BrowserDriver>(&self, driver: &mut D) {
        let selector = &self.settings.selectors.search_input;
        let input = match driver.query(selector).await {
            Ok(found) => found.into_iter().next(),
            Err(e) => {
                debug!(error = %e, "Could not locate search input to reset");
                None
            }
        };
        if let Some(input) = input
            && let Err(e) = driver.clear(&input).await
        {
            debug!(error = %e, "Could not reset search input");
        }
    }
}
