use async_trait::async_trait;

use crate::types::{Item, Result};

/// One content source that can be asked for its current items.
///
/// Implementations are built from a `SourceConfig` and own everything needed to
/// reach the source: fetcher, rate limiter and credentials. An empty result is
/// a valid answer, not an error.
#[async_trait]
pub trait Collector: Send + Sync {
    /// The configured id of the source this collector reads.
    fn source_id(&self) -> &str;

    /// Short variant name used in logs (`feed`, `api`, ...).
    fn kind(&self) -> &'static str;

    async fn collect(&self) -> Result<Vec<Item>>;
}
