use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use tracing::{info, warn};
use url::Url;

use super::feed::extract_feed_items;
use super::scrape::{compile_selector, element_text};
use super::{base_url, normalize_entries, parse_published};
use crate::fetcher::Fetcher;
use crate::source_config::{NewsletterCollectorConfig, NewsletterExtractor, SourceConfig};
use crate::traits::Collector;
use crate::types::{AggregatorError, Category, FetchConfig, Item, RawEntry, Result};

/// Containers tried in order; the first that yields linked entries wins.
const ARCHIVE_CONTAINERS: [&str; 5] = ["article", ".post", ".post-preview", ".archive-item", "li"];
const FEED_ITEM_LIMIT: usize = 50;

/// The generic archive-listing rule shared by every newsletter source.
pub struct ArchiveRules {
    containers: Vec<Selector>,
    anchor: Selector,
    heading: Selector,
    heading_anchor: Selector,
    paragraph: Selector,
    time: Selector,
}

impl ArchiveRules {
    pub fn new() -> Result<Self> {
        Ok(Self {
            containers: ARCHIVE_CONTAINERS
                .iter()
                .map(|s| compile_selector(s))
                .collect::<Result<Vec<_>>>()?,
            anchor: compile_selector("a[href]")?,
            heading: compile_selector("h1, h2, h3, h4")?,
            heading_anchor: compile_selector("h1 a[href], h2 a[href], h3 a[href], h4 a[href]")?,
            paragraph: compile_selector("p")?,
            time: compile_selector("time")?,
        })
    }

    pub fn extract(&self, source_id: &str, html: &str) -> Result<Vec<RawEntry>> {
        let document = Html::parse_document(html);
        for container in &self.containers {
            let entries: Vec<RawEntry> = document
                .select(container)
                .filter_map(|el| self.extract_one(el))
                .collect();
            if !entries.is_empty() {
                return Ok(entries);
            }
        }
        Err(AggregatorError::MalformedSource {
            source_id: source_id.to_string(),
            reason: "archive page has no linked entries".to_string(),
        })
    }

    fn extract_one(&self, container: ElementRef<'_>) -> Option<RawEntry> {
        let anchor = container
            .select(&self.heading_anchor)
            .next()
            .or_else(|| container.select(&self.anchor).next())?;
        let url = anchor.value().attr("href")?.trim().to_string();

        let title = container
            .select(&self.heading)
            .next()
            .map(element_text)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| element_text(anchor));

        let description = container
            .select(&self.paragraph)
            .next()
            .map(element_text)
            .unwrap_or_default();

        let published_raw = container.select(&self.time).next().map(|t| {
            t.value()
                .attr("datetime")
                .map(str::to_string)
                .unwrap_or_else(|| element_text(t))
        });

        Some(RawEntry {
            url,
            title,
            description,
            author: None,
            published_at: parse_published(published_raw.as_deref()),
            score: None,
        })
    }
}

/// Reads a newsletter archive, either from its feed or from the listing page.
pub struct NewsletterCollector {
    source_id: String,
    category: Category,
    config: NewsletterCollectorConfig,
    rules: ArchiveRules,
    fetcher: Fetcher,
}

impl NewsletterCollector {
    pub fn new(
        source: &SourceConfig,
        config: NewsletterCollectorConfig,
        fetch: FetchConfig,
    ) -> Result<Self> {
        Url::parse(&config.url)?;
        if let Some(rss) = &config.rss_url {
            Url::parse(rss)?;
        }
        Ok(Self {
            source_id: source.id.clone(),
            category: source.category,
            rules: ArchiveRules::new()?,
            fetcher: Fetcher::new(fetch, &source.rate_limit)?,
            config,
        })
    }

    async fn collect_feed(&self) -> Result<Vec<Item>> {
        let feed_url = self.config.rss_url.as_deref().unwrap_or(&self.config.url);
        let body = self.fetcher.fetch_text(feed_url).await?;
        let base = base_url(None, &self.config.url);
        extract_feed_items(&self.source_id, self.category, base.as_ref(), FEED_ITEM_LIMIT, &body)
    }

    async fn collect_html(&self) -> Result<Vec<Item>> {
        let listing = self.config.listing_url();
        let html = self.fetcher.fetch_text(listing).await?;
        let entries = match self.rules.extract(&self.source_id, &html) {
            Ok(entries) => entries,
            Err(e @ AggregatorError::MalformedSource { .. }) => {
                warn!("{}", e);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        let base = base_url(None, listing);
        Ok(normalize_entries(&self.source_id, self.category, base.as_ref(), entries))
    }
}

#[async_trait]
impl Collector for NewsletterCollector {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn kind(&self) -> &'static str {
        "newsletter"
    }

    async fn collect(&self) -> Result<Vec<Item>> {
        let items = match self.config.extractor {
            NewsletterExtractor::Html => self.collect_html().await?,
            NewsletterExtractor::Feed => match self.collect_feed().await {
                Ok(items) => items,
                Err(e) if self.config.rss_url.is_some() => {
                    warn!(
                        "{}: feed extraction failed ({}), falling back to archive html",
                        self.source_id, e
                    );
                    self.collect_html().await?
                }
                Err(e) => return Err(e),
            },
        };
        info!("{}: {} newsletter items", self.source_id, items.len());
        Ok(items)
    }
}
