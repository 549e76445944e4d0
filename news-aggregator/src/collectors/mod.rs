pub mod api;
pub mod feed;
pub mod newsletter;
pub mod scrape;

pub use api::ApiCollector;
pub use feed::FeedCollector;
pub use newsletter::NewsletterCollector;
pub use scrape::{RenderClient, ScrapeCollector};

use tracing::debug;
use url::Url;

use crate::config::RenderConfig;
use crate::identity;
use crate::source_config::{CollectorConfig, SourceConfig};
use crate::traits::Collector;
use crate::types::{Category, FetchConfig, Item, RawEntry, Result};
use crate::utils::{text, time};

const MAX_DESCRIPTION_CHARS: usize = 2000;

/// Build the collector variant a source is configured for.
///
/// Fails for configurations that can never work (invalid selectors, unusable
/// URLs); such sources are reported as failed by the orchestrator.
pub fn build_collector(
    source: &SourceConfig,
    fetch: &FetchConfig,
    render: Option<&RenderConfig>,
) -> Result<Box<dyn Collector>> {
    source.validate()?;
    let collector: Box<dyn Collector> = match &source.collector {
        CollectorConfig::Feed(config) => {
            Box::new(FeedCollector::new(source, config.clone(), fetch.clone())?)
        }
        CollectorConfig::Api(config) => {
            Box::new(ApiCollector::new(source, config.clone(), fetch.clone())?)
        }
        CollectorConfig::Scrape(config) => Box::new(ScrapeCollector::new(
            source,
            config.clone(),
            fetch.clone(),
            render.cloned(),
        )?),
        CollectorConfig::Newsletter(config) => {
            Box::new(NewsletterCollector::new(source, config.clone(), fetch.clone())?)
        }
    };
    Ok(collector)
}

/// Turn variant-specific raw entries into items.
///
/// Text is trimmed and descriptions are stripped of markup. Relative links are
/// resolved against `base`. Entries whose link is empty or not http(s) are
/// skipped. Missing or non-finite scores become 0.
pub fn normalize_entries(
    source_id: &str,
    category: Category,
    base: Option<&Url>,
    entries: Vec<RawEntry>,
) -> Vec<Item> {
    let total = entries.len();
    let items: Vec<Item> = entries
        .into_iter()
        .filter_map(|entry| normalize_entry(source_id, category, base, entry))
        .collect();

    if items.len() < total {
        debug!(
            "{}: skipped {} of {} entries without a usable url",
            source_id,
            total - items.len(),
            total
        );
    }
    items
}

fn normalize_entry(
    source_id: &str,
    category: Category,
    base: Option<&Url>,
    entry: RawEntry,
) -> Option<Item> {
    let url = resolve_url(entry.url.trim(), base)?;
    let title = text::extract_text_from_html(&entry.title);
    let description = text::smart_truncate(
        &text::extract_text_from_html(&entry.description),
        MAX_DESCRIPTION_CHARS,
    );
    let author = entry
        .author
        .map(|a| text::collapse_whitespace(&a))
        .filter(|a| !a.is_empty());
    let score = entry.score.filter(|s| s.is_finite()).unwrap_or(0.0);

    Some(Item {
        url_hash: identity::url_hash(&url),
        content_hash: identity::content_hash(&title, &description),
        url,
        title,
        description,
        author,
        source_id: source_id.to_string(),
        category,
        published_at: entry.published_at,
        score,
    })
}

fn resolve_url(raw: &str, base: Option<&Url>) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    let resolved = match Url::parse(raw) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => base?.join(raw).ok()?,
        Err(_) => return None,
    };
    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}

/// Parse a base url for link resolution, treating unparsable input as absent.
pub(crate) fn base_url(raw: Option<&str>, fallback: &str) -> Option<Url> {
    Url::parse(raw.unwrap_or(fallback)).ok()
}

/// Timestamp from free text, for extractors that only see strings.
pub(crate) fn parse_published(raw: Option<&str>) -> Option<chrono::DateTime<chrono::Utc>> {
    raw.and_then(time::parse_timestamp)
}
