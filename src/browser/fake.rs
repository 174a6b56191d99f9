//! In-memory browser for tests.
//!
//! Pages are static HTML strings keyed by URL and queried with real CSS
//! selectors through `scraper`. Typing into an input reveals the suggestion
//! markup registered for the typed text, and clicking an element with an
//! `href` navigates there, which is enough to walk the search → detail →
//! feeds flow of the target site.
//!
//! [`FakeBrowser::spa_lag`] mimics a single-page app: a click changes the URL
//! at once but the previous document stays rendered until the next
//! `wait_for_load` or `navigate`.

use super::{BrowserDriver, DriverError, WaitPolicy};
use scraper::{ElementRef, Html, Selector};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Handle to the n-th element of the rendered document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakeElement(usize);

#[derive(Debug, Default)]
pub struct FakeBrowser {
    pages: HashMap<String, String>,
    suggestions: HashMap<String, String>,
    /// Typed values that make `type_text` fail after typing.
    poisoned: HashSet<String>,
    /// URLs whose navigation fails.
    unreachable: HashSet<String>,
    /// Markers that make `read_text` fail on elements containing them.
    unreadable: Vec<String>,
    spa_lag: bool,
    /// Document still on screen while the URL has already moved on.
    shown: Option<String>,
    url: String,
    input_value: String,
    pub keystrokes: usize,
    pub clears: usize,
    pub visited: Vec<String>,
    pub load_waits: usize,
}

impl FakeBrowser {
    pub fn new(start_url: &str) -> Self {
        Self {
            url: start_url.to_string(),
            ..Self::default()
        }
    }

    pub fn with_page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }

    /// Markup shown below the search bar once `query` has been typed.
    pub fn with_suggestions(mut self, query: &str, html: &str) -> Self {
        self.suggestions.insert(query.to_string(), html.to_string());
        self
    }

    pub fn poison(mut self, query: &str) -> Self {
        self.poisoned.insert(query.to_string());
        self
    }

    pub fn unreachable(mut self, url: &str) -> Self {
        self.unreachable.insert(url.to_string());
        self
    }

    /// Fail `read_text` on any element whose text contains `marker`.
    pub fn unreadable(mut self, marker: &str) -> Self {
        self.unreadable.push(marker.to_string());
        self
    }

    pub fn spa_lag(mut self) -> Self {
        self.spa_lag = true;
        self
    }

    pub fn input_value(&self) -> &str {
        &self.input_value
    }

    fn render(&self) -> Html {
        let current = self.shown.as_ref().unwrap_or(&self.url);
        let page = self.pages.get(current).map(String::as_str).unwrap_or("");
        let overlay = if self.input_value.is_empty() {
            ""
        } else {
            self.suggestions
                .get(&self.input_value)
                .map(String::as_str)
                .unwrap_or("")
        };
        Html::parse_document(&format!("{page}{overlay}"))
    }

    fn parse(selector: &str) -> Result<Selector, DriverError> {
        Selector::parse(selector)
            .map_err(|e| DriverError::Protocol(format!("bad selector {selector:?}: {e:?}")))
    }

    fn all() -> Selector {
        Selector::parse("*").unwrap()
    }

    fn index_of(doc: &Html, target: ElementRef<'_>) -> usize {
        doc.select(&Self::all())
            .position(|e| e.id() == target.id())
            .unwrap()
    }

    fn element<'a>(doc: &'a Html, handle: &FakeElement) -> Result<ElementRef<'a>, DriverError> {
        doc.select(&Self::all())
            .nth(handle.0)
            .ok_or_else(|| DriverError::Protocol(format!("stale element {}", handle.0)))
    }

    fn go(&mut self, url: &str) -> Result<(), DriverError> {
        if self.unreachable.contains(url) || !self.pages.contains_key(url) {
            return Err(DriverError::Navigation {
                url: url.to_string(),
                reason: "no such page".to_string(),
            });
        }
        self.url = url.to_string();
        self.visited.push(url.to_string());
        Ok(())
    }
}

impl BrowserDriver for FakeBrowser {
    type Element = FakeElement;

    async fn navigate(
        &mut self,
        url: &str,
        _wait: WaitPolicy,
        _timeout: Duration,
    ) -> Result<(), DriverError> {
        self.go(url)?;
        self.shown = None;
        Ok(())
    }

    async fn wait_for_load(
        &mut self,
        _wait: WaitPolicy,
        _timeout: Duration,
    ) -> Result<(), DriverError> {
        self.load_waits += 1;
        self.shown = None;
        Ok(())
    }

    async fn query(&self, selector: &str) -> Result<Vec<FakeElement>, DriverError> {
        let sel = Self::parse(selector)?;
        let doc = self.render();
        Ok(doc
            .select(&sel)
            .map(|e| FakeElement(Self::index_of(&doc, e)))
            .collect())
    }

    async fn query_within(
        &self,
        scope: &FakeElement,
        selector: &str,
    ) -> Result<Vec<FakeElement>, DriverError> {
        let sel = Self::parse(selector)?;
        let doc = self.render();
        let scope = Self::element(&doc, scope)?;
        Ok(scope
            .select(&sel)
            .map(|e| FakeElement(Self::index_of(&doc, e)))
            .collect())
    }

    async fn read_text(&self, element: &FakeElement) -> Result<String, DriverError> {
        let doc = self.render();
        let text: String = Self::element(&doc, element)?.text().collect();
        if self.unreadable.iter().any(|m| text.contains(m.as_str())) {
            return Err(DriverError::Protocol("injected read failure".to_string()));
        }
        Ok(text)
    }

    async fn click(&mut self, element: &FakeElement) -> Result<(), DriverError> {
        let href = {
            let doc = self.render();
            Self::element(&doc, element)?
                .value()
                .attr("href")
                .map(str::to_string)
        };
        let Some(url) = href else {
            return Ok(());
        };
        let previous = self.url.clone();
        self.go(&url)?;
        if self.spa_lag && self.shown.is_none() {
            self.shown = Some(previous);
        }
        Ok(())
    }

    async fn clear(&mut self, element: &FakeElement) -> Result<(), DriverError> {
        let doc = self.render();
        if Self::element(&doc, element)?.value().name() != "input" {
            return Err(DriverError::Protocol("clear on a non-input element".to_string()));
        }
        self.input_value.clear();
        self.clears += 1;
        Ok(())
    }

    async fn type_text(
        &mut self,
        element: &FakeElement,
        text: &str,
        per_char_delay: Duration,
    ) -> Result<(), DriverError> {
        {
            let doc = self.render();
            if Self::element(&doc, element)?.value().name() != "input" {
                return Err(DriverError::Protocol("typing into a non-input element".to_string()));
            }
        }
        for ch in text.chars() {
            self.input_value.push(ch);
            self.keystrokes += 1;
            if !per_char_delay.is_zero() {
                tokio::time::sleep(per_char_delay).await;
            }
        }
        if self.poisoned.contains(&self.input_value) {
            return Err(DriverError::Protocol("injected failure".to_string()));
        }
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.url.clone())
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(50)
    }

    async fn close(self) -> Result<(), DriverError> {
        Ok(())
    }
}

/// Markup builders mirroring the target site's structure.
pub mod site {
    pub const MARKETS: &str = "https://web.stockedge.com/app/markets";

    pub fn search_page() -> String {
        r#"<html><body><ion-searchbar><input class="searchbar-input"></ion-searchbar></body></html>"#
            .to_string()
    }

    /// One search suggestion; `tag` is the chip text ("Stock", "Index", ...).
    pub fn suggestion(label: &str, tag: &str, href: &str) -> String {
        format!(
            r#"<ion-item button href="{href}"><ion-label>{label}</ion-label><ion-chip><ion-label> {tag} </ion-label></ion-chip></ion-item>"#
        )
    }

    pub fn suggestion_list(items: &[String]) -> String {
        format!(
            r#"<div class="search-result-list-web"><ion-list>{}</ion-list></div>"#,
            items.concat()
        )
    }

    pub fn feed_entry(source: &str, date: &str, content: &str) -> String {
        format!(
            r#"<ion-item><ion-grid><ion-row><ion-col>{source}</ion-col><ion-col class="ion-text-end">{date}</ion-col></ion-row><ion-row><ion-col><p>{content}</p></ion-col></ion-row></ion-grid></ion-item>"#
        )
    }

    /// A stock's page: the search bar plus its feed list.
    pub fn feeds_page(entries: &[String]) -> String {
        format!(
            r#"<html><body><ion-searchbar><input class="searchbar-input"></ion-searchbar><ion-content><ion-list>{}</ion-list></ion-content></body></html>"#,
            entries.concat()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_typing_reveals_suggestions_and_click_navigates() {
        let detail = "https://web.stockedge.com/share/acme-labs/42";
        let mut browser = FakeBrowser::new(site::MARKETS)
            .with_page(site::MARKETS, &site::search_page())
            .with_page(detail, &site::feeds_page(&[]))
            .with_suggestions(
                "ACME",
                &site::suggestion_list(&[site::suggestion("Acme Labs", "Stock", detail)]),
            );

        assert!(browser.query("ion-item[button]").await.unwrap().is_empty());
        let input = browser.query("input.searchbar-input").await.unwrap()[0];
        browser.type_text(&input, "ACME", Duration::ZERO).await.unwrap();
        assert_eq!(browser.keystrokes, 4);

        let items = browser.query(".search-result-list-web ion-item[button]").await.unwrap();
        assert_eq!(items.len(), 1);
        let chip = browser.query_within(&items[0], "ion-chip").await.unwrap()[0];
        assert_eq!(browser.read_text(&chip).await.unwrap().trim(), "Stock");

        browser.click(&items[0]).await.unwrap();
        assert_eq!(browser.current_url().await.unwrap(), detail);
    }

    #[tokio::test]
    async fn test_scoped_structural_selectors() {
        let url = "https://web.stockedge.com/share/acme-labs/42?section=feeds";
        let browser = FakeBrowser::new(url).with_page(
            url,
            &site::feeds_page(&[site::feed_entry("News", "Today", "Results out")]),
        );
        let items = browser.query("ion-content ion-list ion-item").await.unwrap();
        assert_eq!(items.len(), 1);
        let date = browser
            .query_within(&items[0], "ion-grid > ion-row:nth-child(1) > ion-col:nth-child(2)")
            .await
            .unwrap();
        assert_eq!(browser.read_text(&date[0]).await.unwrap(), "Today");
        let content = browser
            .query_within(&items[0], "ion-grid > ion-row:nth-child(2) > ion-col > p")
            .await
            .unwrap();
        assert_eq!(browser.read_text(&content[0]).await.unwrap(), "Results out");
    }

    #[tokio::test]
    async fn test_spa_lag_keeps_old_document_until_load_wait() {
        let detail = "https://web.stockedge.com/share/acme-labs/42";
        let mut browser = FakeBrowser::new(site::MARKETS)
            .with_page(site::MARKETS, &site::search_page())
            .with_page(detail, &site::feeds_page(&[site::feed_entry("News", "Today", "A")]))
            .with_suggestions(
                "ACME",
                &site::suggestion_list(&[site::suggestion("Acme Labs", "Stock", detail)]),
            )
            .spa_lag();

        let input = browser.query("input.searchbar-input").await.unwrap()[0];
        browser.type_text(&input, "ACME", Duration::ZERO).await.unwrap();
        let item = browser.query("ion-item[button]").await.unwrap()[0];
        browser.click(&item).await.unwrap();

        assert_eq!(browser.current_url().await.unwrap(), detail);
        assert!(browser.query("ion-content ion-list ion-item").await.unwrap().is_empty());

        browser.wait_for_load(WaitPolicy::Load, Duration::from_secs(1)).await.unwrap();
        assert_eq!(browser.query("ion-content ion-list ion-item").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_marker_fails_reads() {
        let url = "https://web.stockedge.com/share/acme-labs/42?section=feeds";
        let browser = FakeBrowser::new(url)
            .with_page(
                url,
                &site::feeds_page(&[
                    site::feed_entry("News", "Today", "fine"),
                    site::feed_entry("News", "Today", "BROKEN"),
                ]),
            )
            .unreadable("BROKEN");
        let paragraphs = browser.query("p").await.unwrap();
        assert_eq!(browser.read_text(&paragraphs[0]).await.unwrap(), "fine");
        assert!(browser.read_text(&paragraphs[1]).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_selector_times_out() {
        let browser = FakeBrowser::new(site::MARKETS).with_page(site::MARKETS, &site::search_page());
        let err = browser
            .wait_for_selector("ion-item", Duration::from_secs(3))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }
}
