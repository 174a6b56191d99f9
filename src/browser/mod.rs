//! Browser driver abstraction.
//!
//! The pipeline talks to the rendered page only through [`BrowserDriver`],
//! so the resolver and extractor can be exercised against an in-memory
//! document in tests and against Chromium ([`chromium`]) in production.
//!
//! All waiting is condition based: [`BrowserDriver::wait_for_selector`]
//! polls until the selector matches or the deadline passes.

pub mod chromium;
#[cfg(test)]
pub mod fake;

use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::trace;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("timed out after {timeout:?} waiting for `{what}`")]
    Timeout { what: String, timeout: Duration },
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("browser launch failed: {0}")]
    Launch(String),
    #[error("browser protocol error: {0}")]
    Protocol(String),
}

impl DriverError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, DriverError::Timeout { .. })
    }
}

/// When a navigation counts as finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// The document's load event fired.
    Load,
    /// Load fired and in-flight requests settled.
    NetworkIdle,
}

/// A controllable rendered-document session (one tab).
///
/// Element handles are only valid for the document they were queried from.
pub trait BrowserDriver {
    type Element;

    /// Navigate the tab and wait according to `wait`, bounded by `timeout`.
    async fn navigate(
        &mut self,
        url: &str,
        wait: WaitPolicy,
        timeout: Duration,
    ) -> Result<(), DriverError>;

    /// Wait for the current document to finish loading according to `wait`.
    ///
    /// Used after in-page navigation (a click that changes the URL), where
    /// the URL can change before the new document has rendered.
    async fn wait_for_load(
        &mut self,
        wait: WaitPolicy,
        timeout: Duration,
    ) -> Result<(), DriverError>;

    /// All elements matching `selector`, in document order.
    async fn query(&self, selector: &str) -> Result<Vec<Self::Element>, DriverError>;

    /// Descendants of `scope` matching `selector`, in document order.
    async fn query_within(
        &self,
        scope: &Self::Element,
        selector: &str,
    ) -> Result<Vec<Self::Element>, DriverError>;

    /// Text content of an element, untrimmed.
    async fn read_text(&self, element: &Self::Element) -> Result<String, DriverError>;

    async fn click(&mut self, element: &Self::Element) -> Result<(), DriverError>;

    /// Empty a text input, notifying the page that its value changed.
    async fn clear(&mut self, element: &Self::Element) -> Result<(), DriverError>;

    /// Type `text` one character at a time, pausing `per_char_delay` between keys.
    async fn type_text(
        &mut self,
        element: &Self::Element,
        text: &str,
        per_char_delay: Duration,
    ) -> Result<(), DriverError>;

    async fn current_url(&self) -> Result<String, DriverError>;

    /// Polling interval used by the default wait implementations.
    fn poll_interval(&self) -> Duration {
        Duration::from_millis(250)
    }

    /// Wait until `selector` matches at least one element.
    ///
    /// Query errors while polling are treated as "not rendered yet", since
    /// the document may be mid-navigation.
    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<Vec<Self::Element>, DriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.query(selector).await {
                Ok(found) if !found.is_empty() => return Ok(found),
                Ok(_) => {}
                Err(e) => trace!(selector, error = %e, "query failed while waiting"),
            }
            if Instant::now() >= deadline {
                return Err(DriverError::Timeout {
                    what: selector.to_string(),
                    timeout,
                });
            }
            sleep(self.poll_interval()).await;
        }
    }

    /// Wait until the tab's URL differs from `previous`, returning the new URL.
    async fn wait_for_url_change(
        &self,
        previous: &str,
        timeout: Duration,
    ) -> Result<String, DriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            let url = self.current_url().await?;
            if url != previous {
                return Ok(url);
            }
            if Instant::now() >= deadline {
                return Err(DriverError::Timeout {
                    what: format!("navigation away from {previous}"),
                    timeout,
                });
            }
            sleep(self.poll_interval()).await;
        }
    }

    /// Release the session. Consumes the driver.
    async fn close(self) -> Result<(), DriverError>
    where
        Self: Sized;
}
