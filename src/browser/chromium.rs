//! Chromium-backed driver using chromiumoxide.

use super::{BrowserDriver, DriverError, WaitPolicy};
use crate::config::BrowserSettings;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{Headers, SetExtraHttpHeadersParams};
use chromiumoxide::element::Element;
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, instrument, warn};

/// How long the resource count must stay flat to call the network idle.
const NETWORK_QUIET: Duration = Duration::from_millis(500);

const LAUNCH_ARGS: [&str; 7] = [
    "--no-sandbox",
    "--disable-gpu",
    "--disable-setuid-sandbox",
    "--disable-dev-shm-usage",
    "--disable-popup-blocking",
    "--disable-notifications",
    "--disable-blink-features=AutomationControlled",
];

fn protocol<E: std::fmt::Display>(e: E) -> DriverError {
    DriverError::Protocol(e.to_string())
}

/// A single Chromium tab driven over CDP.
pub struct ChromiumDriver {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    poll_interval: Duration,
}

impl ChromiumDriver {
    /// Launch Chromium and open one tab configured like a desktop browser.
    #[instrument(level = "info", skip_all, fields(headless = settings.headless))]
    pub async fn launch(
        settings: &BrowserSettings,
        poll_interval: Duration,
    ) -> Result<Self, DriverError> {
        let mut builder = BrowserConfig::builder()
            .window_size(settings.window_width, settings.window_height)
            .args(LAUNCH_ARGS);
        if !settings.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &settings.chrome_path {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(DriverError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| DriverError::Launch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "CDP handler event error");
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| DriverError::Launch(e.to_string()))?;

        page.execute(SetDeviceMetricsOverrideParams::new(
            i64::from(settings.window_width),
            i64::from(settings.window_height),
            1.0,
            false,
        ))
        .await
        .map_err(protocol)?;
        page.set_user_agent(settings.user_agent.clone())
            .await
            .map_err(protocol)?;
        page.execute(SetExtraHttpHeadersParams::new(Headers::new(serde_json::json!({
            "accept-language": settings.accept_language,
            "Accept": "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
        }))))
        .await
        .map_err(protocol)?;

        info!("Chromium session ready");
        Ok(Self {
            browser,
            page,
            handler,
            poll_interval,
        })
    }

    /// Poll until `document.readyState` is `complete`, then, for
    /// [`WaitPolicy::NetworkIdle`], until the network goes quiet.
    async fn settle(&self, wait: WaitPolicy) -> Result<(), DriverError> {
        loop {
            let state: String = self
                .page
                .evaluate("document.readyState")
                .await
                .map_err(protocol)?
                .into_value()
                .map_err(protocol)?;
            if state == "complete" {
                break;
            }
            sleep(self.poll_interval).await;
        }
        if wait == WaitPolicy::NetworkIdle {
            self.wait_for_network_idle().await?;
        }
        Ok(())
    }

    /// Wait until the page stops loading new resources.
    async fn wait_for_network_idle(&self) -> Result<(), DriverError> {
        let mut last_count: i64 = -1;
        let mut quiet_since = Instant::now();
        loop {
            let count: i64 = self
                .page
                .evaluate("performance.getEntriesByType('resource').length")
                .await
                .map_err(protocol)?
                .into_value()
                .map_err(protocol)?;
            if count != last_count {
                last_count = count;
                quiet_since = Instant::now();
            } else if quiet_since.elapsed() >= NETWORK_QUIET {
                return Ok(());
            }
            sleep(self.poll_interval).await;
        }
    }
}

impl BrowserDriver for ChromiumDriver {
    type Element = Element;

    #[instrument(level = "debug", skip(self))]
    async fn navigate(
        &mut self,
        url: &str,
        wait: WaitPolicy,
        limit: Duration,
    ) -> Result<(), DriverError> {
        let nav = async {
            self.page.goto(url).await.map_err(|e| DriverError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
            self.settle(wait).await
        };
        match timeout(limit, nav).await {
            Ok(res) => res,
            Err(_) => Err(DriverError::Timeout {
                what: format!("navigation to {url}"),
                timeout: limit,
            }),
        }
    }

    async fn wait_for_load(&mut self, wait: WaitPolicy, limit: Duration) -> Result<(), DriverError> {
        match timeout(limit, self.settle(wait)).await {
            Ok(res) => res,
            Err(_) => Err(DriverError::Timeout {
                what: format!("{wait:?} after in-page navigation"),
                timeout: limit,
            }),
        }
    }

    async fn query(&self, selector: &str) -> Result<Vec<Element>, DriverError> {
        self.page.find_elements(selector).await.map_err(protocol)
    }

    async fn query_within(
        &self,
        scope: &Element,
        selector: &str,
    ) -> Result<Vec<Element>, DriverError> {
        scope.find_elements(selector).await.map_err(protocol)
    }

    async fn read_text(&self, element: &Element) -> Result<String, DriverError> {
        let ret = element
            .call_js_fn("function() { return this.textContent; }", false)
            .await
            .map_err(protocol)?;
        Ok(ret
            .result
            .value
            .as_ref()
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }

    async fn click(&mut self, element: &Element) -> Result<(), DriverError> {
        element.click().await.map_err(protocol)?;
        Ok(())
    }

    async fn clear(&mut self, element: &Element) -> Result<(), DriverError> {
        element
            .call_js_fn(
                "function() { this.value = ''; this.dispatchEvent(new Event('input', { bubbles: true })); }",
                false,
            )
            .await
            .map_err(protocol)?;
        Ok(())
    }

    async fn type_text(
        &mut self,
        element: &Element,
        text: &str,
        per_char_delay: Duration,
    ) -> Result<(), DriverError> {
        element.focus().await.map_err(protocol)?;
        let mut buf = [0u8; 4];
        for ch in text.chars() {
            element
                .type_str(ch.encode_utf8(&mut buf))
                .await
                .map_err(protocol)?;
            if !per_char_delay.is_zero() {
                sleep(per_char_delay).await;
            }
        }
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.page.url().await.map_err(protocol)?.unwrap_or_default())
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn close(mut self) -> Result<(), DriverError> {
        if let Err(e) = self.page.close().await {
            warn!(error = %e, "Failed to close tab");
        }
        let closed = self.browser.close().await.map_err(protocol);
        if let Err(e) = self.browser.wait().await {
            warn!(error = %e, "Failed to reap browser process");
        }
        self.handler.abort();
        closed.map(|_| info!("Browser closed"))
    }
}
