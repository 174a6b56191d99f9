//! Runtime configuration.
//!
//! [`Settings`] is built once at startup and handed to every stage by
//! reference. Values come from compiled defaults, then an optional YAML
//! file, then command-line flags and environment variables.

use crate::cli::Cli;
use chrono::{FixedOffset, Local, TimeDelta};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_PAGE_URL: &str = "https://web.stockedge.com/app/markets";
pub const DEFAULT_SINK_URL: &str = "https://profitbooking.in/wp-json/scraper/v1/stockedge-feeddata";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid {field} URL {value:?}: {source}")]
    Url {
        field: &'static str,
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("utc_offset_minutes {0} is out of range")]
    Offset(i32),
}

/// Bearer token for the ingestion endpoint.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn token(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

/// CSS selectors for the target site's markup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Selectors {
    pub search_input: String,
    pub suggestion_item: String,
    /// Tag chip inside a suggestion ("Stock", "Index", "MF", ...).
    pub suggestion_tag: String,
    pub suggestion_label: String,
    pub feed_item: String,
    pub feed_source: String,
    pub feed_date: String,
    pub feed_content: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            search_input: "input.searchbar-input".to_string(),
            suggestion_item: ".search-result-list-web ion-item[button]".to_string(),
            suggestion_tag: "ion-chip".to_string(),
            suggestion_label: "ion-label".to_string(),
            feed_item: "ion-content ion-list ion-item".to_string(),
            feed_source: "ion-grid > ion-row:nth-child(1) > ion-col:nth-child(1)".to_string(),
            feed_date: "ion-grid > ion-row:nth-child(1) > ion-col:nth-child(2)".to_string(),
            feed_content: "ion-grid > ion-row:nth-child(2) > ion-col > p".to_string(),
        }
    }
}

/// Filter control on the feeds view, clicked before reading the list.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedFilter {
    pub toggle: String,
    pub option: String,
}

impl Default for FeedFilter {
    fn default() -> Self {
        Self {
            toggle: "se-option-btns".to_string(),
            option: "app-feeds-filter ion-radio-group > div > ion-item:nth-child(2)".to_string(),
        }
    }
}

/// Headless browser launch options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
    pub user_agent: String,
    pub accept_language: String,
    pub window_width: u32,
    pub window_height: u32,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_language: "en-US,en;q=0.9".to_string(),
            window_width: 1920,
            window_height: 1080,
        }
    }
}

/// Everything the relay needs to run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub page_url: String,
    pub sink_url: String,
    pub api_token: Option<Credential>,
    pub symbols_file: PathBuf,
    pub report_dir: Option<String>,

    pub search_input_timeout_ms: u64,
    pub suggestion_timeout_ms: u64,
    pub navigation_timeout_ms: u64,
    pub feed_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub type_delay_ms: u64,

    pub symbol_delay_ms: u64,
    pub post_delay_ms: u64,

    pub window_hours: u64,
    /// Offset of the site's date labels; the machine's local offset when unset.
    pub utc_offset_minutes: Option<i32>,

    /// Extra attempts for transient forward failures (0 disables retrying).
    pub forward_retries: usize,
    pub forward_retry_base_ms: u64,

    pub browser: BrowserSettings,
    pub selectors: Selectors,
    pub feed_filter: Option<FeedFilter>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            page_url: DEFAULT_PAGE_URL.to_string(),
            sink_url: DEFAULT_SINK_URL.to_string(),
            api_token: None,
            symbols_file: PathBuf::from("stocks.csv"),
            report_dir: None,
            search_input_timeout_ms: 5_000,
            suggestion_timeout_ms: 7_000,
            navigation_timeout_ms: 60_000,
            feed_timeout_ms: 5_000,
            poll_interval_ms: 250,
            type_delay_ms: 100,
            symbol_delay_ms: 2_000,
            post_delay_ms: 500,
            window_hours: 24,
            utc_offset_minutes: None,
            forward_retries: 0,
            forward_retry_base_ms: 1_000,
            browser: BrowserSettings::default(),
            selectors: Selectors::default(),
            feed_filter: Some(FeedFilter::default()),
        }
    }
}

impl Settings {
    /// Parse settings from YAML; absent keys keep their defaults.
    pub fn from_yaml(yaml: &str, path: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        Self::from_yaml(&yaml, &display)
    }

    /// Build the effective settings for a run: file (if any), then CLI/env.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let mut settings = match &cli.config {
            Some(path) => Self::from_file(Path::new(path))?,
            None => Self::default(),
        };
        settings.apply_cli(cli);
        settings.validate()?;
        Ok(settings)
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(url) = &cli.page_url {
            self.page_url = url.clone();
        }
        if let Some(url) = &cli.sink_url {
            self.sink_url = url.clone();
        }
        if let Some(token) = cli.api_token.as_deref().filter(|t| !t.is_empty()) {
            self.api_token = Some(Credential::new(token));
        }
        if let Some(path) = &cli.symbols {
            self.symbols_file = path.clone();
        }
        if let Some(dir) = &cli.report_dir {
            self.report_dir = Some(dir.clone());
        }
        if cli.headful {
            self.browser.headless = false;
        }
        if let Some(path) = &cli.chrome_path {
            self.browser.chrome_path = Some(path.clone());
        }
    }

    /// Check the values that would otherwise only fail mid-run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sink_endpoint()?;
        Url::parse(&self.page_url).map_err(|source| ConfigError::Url {
            field: "page",
            value: self.page_url.clone(),
            source,
        })?;
        if let Some(minutes) = self.utc_offset_minutes {
            FixedOffset::east_opt(minutes * 60).ok_or(ConfigError::Offset(minutes))?;
        }
        Ok(())
    }

    pub fn sink_endpoint(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.sink_url).map_err(|source| ConfigError::Url {
            field: "sink",
            value: self.sink_url.clone(),
            source,
        })
    }

    /// Offset used to interpret the site's calendar dates.
    pub fn label_offset(&self) -> FixedOffset {
        self.utc_offset_minutes
            .and_then(|m| FixedOffset::east_opt(m * 60))
            .unwrap_or_else(|| *Local::now().offset())
    }

    pub fn window(&self) -> TimeDelta {
        TimeDelta::hours(self.window_hours as i64)
    }

    pub fn search_input_timeout(&self) -> Duration {
        Duration::from_millis(self.search_input_timeout_ms)
    }

    pub fn suggestion_timeout(&self) -> Duration {
        Duration::from_millis(self.suggestion_timeout_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn feed_timeout(&self) -> Duration {
        Duration::from_millis(self.feed_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn type_delay(&self) -> Duration {
        Duration::from_millis(self.type_delay_ms)
    }

    pub fn symbol_delay(&self) -> Duration {
        Duration::from_millis(self.symbol_delay_ms)
    }

    pub fn post_delay(&self) -> Duration {
        Duration::from_millis(self.post_delay_ms)
    }

    /// Settings without pacing or long waits, for driving fakes in tests.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            search_input_timeout_ms: 1_000,
            suggestion_timeout_ms: 1_000,
            navigation_timeout_ms: 1_000,
            feed_timeout_ms: 1_000,
            poll_interval_ms: 50,
            type_delay_ms: 0,
            symbol_delay_ms: 0,
            post_delay_ms: 0,
            utc_offset_minutes: Some(0),
            feed_filter: None,
            ..Self::default()
        }
    }
}
