use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use interfaces::defs::{
    Category, CategoryDigest, Channel, DeliverySink, ExistingHashes, HistoryStore, Item,
    SeenIdentity, Selection, StoreError, Summarizer,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    /// Retries after the first attempt; the hard ceiling for every source.
    pub max_retries: u32,
    pub max_redirects: usize,
    pub max_body_mb: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "News-Aggregator/1.0".to_string(),
            timeout_seconds: 30,
            max_retries: 3,
            max_redirects: 5,
            max_body_mb: 10,
        }
    }
}

/// Source-specific fields pulled out of a feed entry, API element or page
/// container, before they are normalized into an [`Item`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEntry {
    pub url: String,
    pub title: String,
    pub description: String,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub score: Option<f64>,
}

#[derive(Debug)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub entries: Vec<RawEntry>,
}

#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transient fetch failure for {url}: {reason}")]
    TransientFetch {
        url: String,
        reason: String,
        retry_after: Option<Duration>,
    },

    #[error("Authentication rejected by {url} (HTTP {status})")]
    Auth { url: String, status: u16 },

    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Malformed source {source_id}: {reason}")]
    MalformedSource { source_id: String, reason: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid selector {selector:?}: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("History store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Response from {url} exceeds {limit_mb}MB")]
    BodyTooLarge { url: String, limit_mb: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("General error: {0}")]
    General(String),
}

impl AggregatorError {
    /// Network failures, timeouts, 5xx and 429 are worth another attempt.
    /// Everything else, authentication failures included, is terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            AggregatorError::TransientFetch { .. } => true,
            AggregatorError::Http(e) => {
                if let Some(status) = e.status() {
                    status.is_server_error() || status.as_u16() == 429
                } else {
                    e.is_timeout() || e.is_connect() || e.is_request() || e.is_body()
                }
            }
            _ => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AggregatorError::TransientFetch { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, AggregatorError>;
