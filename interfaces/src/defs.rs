use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Academic,
    LabBlog,
    Media,
    Tools,
    Community,
    Newsletter,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Academic,
        Category::LabBlog,
        Category::Media,
        Category::Tools,
        Category::Community,
        Category::Newsletter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Academic => "academic",
            Category::LabBlog => "lab_blog",
            Category::Media => "media",
            Category::Tools => "tools",
            Category::Community => "community",
            Category::Newsletter => "newsletter",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One collected piece of content, already normalized by its collector.
///
/// `url_hash` and `content_hash` are derived once when the item is built and
/// are carried along unchanged through dedup and selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub url: String,
    pub title: String,
    pub description: String,
    pub author: Option<String>,
    pub source_id: String,
    pub category: Category,
    pub published_at: Option<DateTime<Utc>>,
    pub score: f64,
    pub url_hash: String,
    pub content_hash: String,
}

/// A persisted identity. Created the first time an item is found novel, never updated.
///
/// An empty `content_hash` means the item had no content identity and is
/// never matched on content. `item` keeps the item itself for backlog reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeenIdentity {
    pub url_hash: String,
    pub content_hash: String,
    pub first_seen_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<Item>,
}

impl SeenIdentity {
    pub fn from_item(item: &Item, first_seen_at: DateTime<Utc>) -> Self {
        let mut payload = item.clone();
        if !payload.score.is_finite() {
            payload.score = 0.0;
        }
        Self {
            url_hash: item.url_hash.clone(),
            content_hash: item.content_hash.clone(),
            first_seen_at,
            item: Some(payload),
        }
    }
}

/// Hashes from a batch that the store already knows about.
#[derive(Debug, Clone, Default)]
pub struct ExistingHashes {
    pub url_hashes: HashSet<String>,
    pub content_hashes: HashSet<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("History store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable record of seen identities across runs.
///
/// Both dedup operations are batch operations: callers check a whole run's
/// hashes at once and append a whole run's identities at once. Appending an
/// identity that is already present is a no-op. Empty content hashes never
/// match.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn check_existing(
        &self,
        url_hashes: &[String],
        content_hashes: &[String],
    ) -> StoreResult<ExistingHashes>;

    async fn append(&self, identities: &[SeenIdentity]) -> StoreResult<()>;

    /// Recorded items not yet marked sent, best score first, then most
    /// recently seen. Identities appended without an item never show up.
    async fn unsent(&self, limit: usize) -> StoreResult<Vec<Item>>;

    /// Unknown and already sent hashes are ignored.
    async fn mark_sent(&self, url_hashes: &[String], at: DateTime<Utc>) -> StoreResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Tools,
    AcademicMedia,
}

impl Channel {
    pub fn for_category(category: Category) -> Self {
        match category {
            Category::Tools => Channel::Tools,
            _ => Channel::AcademicMedia,
        }
    }
}

/// Final bounded output of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Selection {
    Single {
        items: Vec<Item>,
    },
    Dual {
        tools: Vec<Item>,
        academic_media: Vec<Item>,
    },
}

impl Selection {
    pub fn len(&self) -> usize {
        match self {
            Selection::Single { items } => items.len(),
            Selection::Dual { tools, academic_media } => tools.len() + academic_media.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every selected item, tools channel first in dual mode.
    pub fn items(&self) -> Vec<&Item> {
        match self {
            Selection::Single { items } => items.iter().collect(),
            Selection::Dual { tools, academic_media } => {
                tools.iter().chain(academic_media.iter()).collect()
            }
        }
    }

    pub fn channels(&self) -> Vec<(Option<Channel>, &[Item])> {
        match self {
            Selection::Single { items } => vec![(None, items.as_slice())],
            Selection::Dual { tools, academic_media } => vec![
                (Some(Channel::Tools), tools.as_slice()),
                (Some(Channel::AcademicMedia), academic_media.as_slice()),
            ],
        }
    }
}

/// Rendered text for one category grouping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryDigest {
    pub channel: Option<Channel>,
    pub category: Category,
    pub text: String,
}

// Summarization and delivery live outside this workspace. The pipeline only
// hands them the selected items unchanged and does not inspect their output
// beyond passing digests from one to the other.

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, selection: &Selection) -> anyhow::Result<Vec<CategoryDigest>>;
}

#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, selection: &Selection, digests: &[CategoryDigest]) -> anyhow::Result<()>;
}
