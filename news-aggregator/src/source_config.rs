use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::types::{AggregatorError, Category, Result};

pub const DEFAULT_PRIORITY: u8 = 5;

/// One configured content source. Loaded once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub category: Category,
    /// 1 is the most important; out-of-range values are clamped.
    #[serde(default = "default_priority", deserialize_with = "clamped_priority")]
    pub priority: u8,
    #[serde(default = "default_language")]
    pub language: String,
    pub collector: CollectorConfig,
    #[serde(default)]
    pub authentication: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub filters: FilterConfig,
    #[serde(default)]
    pub status: StatusConfig,
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

fn default_language() -> String {
    "en".to_string()
}

fn clamped_priority<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = i64::deserialize(deserializer)?;
    Ok(raw.clamp(1, 10) as u8)
}

impl SourceConfig {
    pub fn is_enabled(&self) -> bool {
        self.status.enabled
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Catch configuration mistakes that serde cannot: blank ids and blank fetch targets.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(AggregatorError::Config("source id must not be empty".to_string()));
        }
        let target = match &self.collector {
            CollectorConfig::Feed(c) => &c.url,
            CollectorConfig::Api(c) => &c.base_url,
            CollectorConfig::Scrape(c) => &c.url,
            CollectorConfig::Newsletter(c) => &c.url,
        };
        if target.trim().is_empty() {
            return Err(AggregatorError::Config(format!(
                "source {} has no fetch url",
                self.id
            )));
        }
        if let CollectorConfig::Scrape(c) = &self.collector {
            if c.selectors.container.trim().is_empty() {
                return Err(AggregatorError::Config(format!(
                    "scrape source {} has no container selector",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CollectorConfig {
    #[serde(alias = "rss")]
    Feed(FeedCollectorConfig),
    Api(ApiCollectorConfig),
    #[serde(alias = "scraper")]
    Scrape(ScrapeCollectorConfig),
    Newsletter(NewsletterCollectorConfig),
}

impl CollectorConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            CollectorConfig::Feed(_) => "feed",
            CollectorConfig::Api(_) => "api",
            CollectorConfig::Scrape(_) => "scrape",
            CollectorConfig::Newsletter(_) => "newsletter",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedCollectorConfig {
    #[serde(alias = "rss_url")]
    pub url: String,
    /// Resolves relative entry links; defaults to the feed url.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_item_limit")]
    pub item_limit: usize,
}

fn default_item_limit() -> usize {
    50
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    #[serde(alias = "get")]
    Get,
    #[serde(alias = "post")]
    Post,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCollectorConfig {
    pub base_url: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    /// Dotted path to the result array; absent means the body root.
    #[serde(default)]
    pub data_path: Option<String>,
    #[serde(default)]
    pub fields: ApiFieldMap,
    #[serde(default)]
    pub pagination: Option<PaginationConfig>,
}

impl ApiCollectorConfig {
    pub fn request_url(&self) -> String {
        if self.endpoint.is_empty() {
            return self.base_url.clone();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.endpoint.trim_start_matches('/')
        )
    }
}

/// Dotted paths locating each item field inside one element of the result array.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiFieldMap {
    pub url: String,
    pub title: String,
    pub description: String,
    pub author: Option<String>,
    pub published_at: Option<String>,
    pub score: Option<String>,
}

impl Default for ApiFieldMap {
    fn default() -> Self {
        Self {
            url: "url".to_string(),
            title: "title".to_string(),
            description: "description".to_string(),
            author: None,
            published_at: None,
            score: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationStrategy {
    Offset,
    Cursor,
    Page,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    pub strategy: PaginationStrategy,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    /// Items per request; also the short-page threshold for offset paging.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_offset_param")]
    pub offset_param: String,
    #[serde(default = "default_limit_param")]
    pub limit_param: String,
    #[serde(default = "default_cursor_param")]
    pub cursor_param: String,
    /// Where the next cursor lives in the response body.
    #[serde(default)]
    pub next_cursor_path: Option<String>,
    #[serde(default = "default_page_param")]
    pub page_param: String,
    #[serde(default = "default_start_page")]
    pub start_page: u32,
}

fn default_max_pages() -> u32 {
    5
}
fn default_page_size() -> u32 {
    50
}
fn default_offset_param() -> String {
    "offset".to_string()
}
fn default_limit_param() -> String {
    "limit".to_string()
}
fn default_cursor_param() -> String {
    "cursor".to_string()
}
fn default_page_param() -> String {
    "page".to_string()
}
fn default_start_page() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeCollectorConfig {
    pub url: String,
    #[serde(default)]
    pub base_url: Option<String>,
    pub selectors: ScrapeSelectors,
    #[serde(default = "default_url_attribute")]
    pub url_attribute: String,
    /// When set, the timestamp is read from this attribute instead of the element text.
    #[serde(default)]
    pub published_attribute: Option<String>,
    #[serde(default)]
    pub render_js: bool,
    #[serde(default)]
    pub wait_for_selector: Option<String>,
}

fn default_url_attribute() -> String {
    "href".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrapeSelectors {
    pub container: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "link")]
    pub url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default, alias = "date")]
    pub published_at: Option<String>,
    #[serde(default)]
    pub score: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NewsletterExtractor {
    #[serde(alias = "rss")]
    Feed,
    #[default]
    Html,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsletterCollectorConfig {
    pub url: String,
    #[serde(default)]
    pub archive_url: Option<String>,
    #[serde(default)]
    pub extractor: NewsletterExtractor,
    #[serde(default)]
    pub rss_url: Option<String>,
}

impl NewsletterCollectorConfig {
    pub fn listing_url(&self) -> &str {
        self.archive_url.as_deref().unwrap_or(&self.url)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    #[default]
    None,
    ApiKey {
        api_key: String,
        #[serde(default = "default_api_key_header")]
        header: String,
        /// Send the key as this query parameter instead of a header.
        #[serde(default)]
        query_param: Option<String>,
    },
    Bearer {
        #[serde(alias = "bearer_token")]
        token: String,
    },
    Basic {
        username: String,
        #[serde(default)]
        password: Option<String>,
    },
    #[serde(rename = "oauth2")]
    OAuth2 {
        token_url: String,
        client_id: String,
        client_secret: String,
        #[serde(default)]
        scope: Option<String>,
    },
}

fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub requests_per_hour: Option<u32>,
    /// Seconds; seeds the retry backoff.
    pub retry_after: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 10,
            requests_per_hour: None,
            retry_after: 60,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub include_keywords: Vec<String>,
    pub exclude_keywords: Vec<String>,
    pub min_score: Option<f64>,
    pub max_age_hours: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub enabled: bool,
    /// Stable sources are expected to work; their failures log at error level.
    pub stable: bool,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stable: false,
        }
    }
}
