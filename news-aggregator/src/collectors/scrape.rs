use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde_json::json;
use tracing::{info, warn};
use url::Url;

use super::{base_url, normalize_entries, parse_published};
use crate::config::RenderConfig;
use crate::fetcher::Fetcher;
use crate::source_config::{ScrapeCollectorConfig, SourceConfig};
use crate::traits::Collector;
use crate::types::{AggregatorError, Category, FetchConfig, Item, RawEntry, Result};
use crate::utils::text;

pub(crate) fn compile_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| AggregatorError::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

fn compile_optional(selector: Option<&str>) -> Result<Option<Selector>> {
    selector
        .filter(|s| !s.trim().is_empty())
        .map(compile_selector)
        .transpose()
}

pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    text::collapse_whitespace(&element.text().collect::<String>())
}

/// Compiled CSS locators for one scrape source.
pub struct ScrapeRules {
    container: Selector,
    title: Option<Selector>,
    url: Option<Selector>,
    description: Option<Selector>,
    author: Option<Selector>,
    published_at: Option<Selector>,
    score: Option<Selector>,
    url_attribute: String,
    published_attribute: Option<String>,
}

impl ScrapeRules {
    pub fn compile(config: &ScrapeCollectorConfig) -> Result<Self> {
        let selectors = &config.selectors;
        Ok(Self {
            container: compile_selector(&selectors.container)?,
            title: compile_optional(selectors.title.as_deref())?,
            url: compile_optional(selectors.url.as_deref())?,
            description: compile_optional(selectors.description.as_deref())?,
            author: compile_optional(selectors.author.as_deref())?,
            published_at: compile_optional(selectors.published_at.as_deref())?,
            score: compile_optional(selectors.score.as_deref())?,
            url_attribute: config.url_attribute.clone(),
            published_attribute: config.published_attribute.clone(),
        })
    }

    /// Pull one raw entry per container. A page without any container is malformed.
    pub fn extract(&self, source_id: &str, html: &str) -> Result<Vec<RawEntry>> {
        let document = Html::parse_document(html);
        let entries: Vec<RawEntry> = document
            .select(&self.container)
            .map(|container| self.extract_one(container))
            .collect();

        if entries.is_empty() {
            return Err(AggregatorError::MalformedSource {
                source_id: source_id.to_string(),
                reason: "no element matched the container selector".to_string(),
            });
        }
        Ok(entries)
    }

    fn extract_one(&self, container: ElementRef<'_>) -> RawEntry {
        let first = |selector: &Option<Selector>| {
            selector
                .as_ref()
                .and_then(|s| container.select(s).next())
        };
        let text_of = |selector: &Option<Selector>| first(selector).map(element_text).unwrap_or_default();

        let url = first(&self.url)
            .and_then(|el| el.value().attr(&self.url_attribute))
            .map(|href| href.trim().to_string())
            .unwrap_or_default();

        let published_raw = first(&self.published_at).map(|el| match &self.published_attribute {
            Some(attr) => el.value().attr(attr).unwrap_or_default().to_string(),
            None => element_text(el),
        });

        RawEntry {
            url,
            title: text_of(&self.title),
            description: text_of(&self.description),
            author: Some(text_of(&self.author)).filter(|a| !a.is_empty()),
            published_at: parse_published(published_raw.as_deref()),
            score: first(&self.score).and_then(|el| text::parse_score(&element_text(el))),
        }
    }
}

/// Headless-browser rendering service speaking the Browserless `/content` API.
#[derive(Debug, Clone)]
pub struct RenderClient {
    endpoint: String,
    token: Option<String>,
}

impl RenderClient {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            endpoint: format!("{}/content", config.endpoint.trim_end_matches('/')),
            token: config.token,
        }
    }

    pub async fn render(
        &self,
        fetcher: &Fetcher,
        url: &str,
        wait_for_selector: Option<&str>,
    ) -> Result<String> {
        let mut payload = json!({ "url": url });
        if let Some(selector) = wait_for_selector {
            payload["waitForSelector"] = json!({ "selector": selector });
        }

        fetcher
            .execute(&self.endpoint, |client| {
                let request = client.post(&self.endpoint).json(&payload);
                match &self.token {
                    Some(token) => request.query(&[("token", token)]),
                    None => request,
                }
            })
            .await
    }
}

/// Extracts repeating elements from a web page.
pub struct ScrapeCollector {
    source_id: String,
    category: Category,
    config: ScrapeCollectorConfig,
    rules: ScrapeRules,
    base: Option<Url>,
    fetcher: Fetcher,
    renderer: Option<RenderClient>,
}

impl ScrapeCollector {
    pub fn new(
        source: &SourceConfig,
        config: ScrapeCollectorConfig,
        fetch: FetchConfig,
        render: Option<RenderConfig>,
    ) -> Result<Self> {
        Url::parse(&config.url)?;
        let rules = ScrapeRules::compile(&config)?;
        let renderer = match (config.render_js, render) {
            (true, Some(render)) => Some(RenderClient::new(render)),
            (true, None) => {
                warn!(
                    "{}: render_js is set but no render service is configured, fetching raw html",
                    source.id
                );
                None
            }
            (false, _) => None,
        };

        Ok(Self {
            source_id: source.id.clone(),
            category: source.category,
            base: base_url(config.base_url.as_deref(), &config.url),
            fetcher: Fetcher::new(fetch, &source.rate_limit)?,
            config,
            rules,
            renderer,
        })
    }
}

#[async_trait]
impl Collector for ScrapeCollector {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn kind(&self) -> &'static str {
        "scrape"
    }

    async fn collect(&self) -> Result<Vec<Item>> {
        let html = match &self.renderer {
            Some(renderer) => {
                renderer
                    .render(
                        &self.fetcher,
                        &self.config.url,
                        self.config.wait_for_selector.as_deref(),
                    )
                    .await?
            }
            None => self.fetcher.fetch_text(&self.config.url).await?,
        };

        let entries = match self.rules.extract(&self.source_id, &html) {
            Ok(entries) => entries,
            Err(e @ AggregatorError::MalformedSource { .. }) => {
                warn!("{}", e);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let items = normalize_entries(&self.source_id, self.category, self.base.as_ref(), entries);
        info!("{}: {} items scraped from {}", self.source_id, items.len(), self.config.url);
        Ok(items)
    }
}
