use async_trait::async_trait;
use tracing::info;
use url::Url;

use super::{base_url, normalize_entries};
use crate::fetcher::Fetcher;
use crate::parser::parse_feed;
use crate::source_config::{FeedCollectorConfig, SourceConfig};
use crate::traits::Collector;
use crate::types::{Category, FetchConfig, Item, Result};

/// Reads an RSS, Atom or JSON Feed document.
pub struct FeedCollector {
    source_id: String,
    category: Category,
    config: FeedCollectorConfig,
    base: Option<Url>,
    fetcher: Fetcher,
}

impl FeedCollector {
    pub fn new(source: &SourceConfig, config: FeedCollectorConfig, fetch: FetchConfig) -> Result<Self> {
        Url::parse(&config.url)?;
        let base = base_url(config.base_url.as_deref(), &config.url);
        Ok(Self {
            source_id: source.id.clone(),
            category: source.category,
            fetcher: Fetcher::new(fetch, &source.rate_limit)?,
            config,
            base,
        })
    }
}

#[async_trait]
impl Collector for FeedCollector {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn kind(&self) -> &'static str {
        "feed"
    }

    async fn collect(&self) -> Result<Vec<Item>> {
        let body = self.fetcher.fetch_text(&self.config.url).await?;
        let items = extract_feed_items(
            &self.source_id,
            self.category,
            self.base.as_ref(),
            self.config.item_limit,
            &body,
        )?;
        info!("{}: {} items from feed {}", self.source_id, items.len(), self.config.url);
        Ok(items)
    }
}

/// Parse a feed body and normalize at most `limit` of its entries.
pub fn extract_feed_items(
    source_id: &str,
    category: Category,
    base: Option<&Url>,
    limit: usize,
    body: &str,
) -> Result<Vec<Item>> {
    let mut parsed = parse_feed(body)?;
    parsed.entries.truncate(limit);
    Ok(normalize_entries(source_id, category, base, parsed.entries))
}
