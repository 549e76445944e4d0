use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use super::normalize_entries;
use crate::auth::Authenticator;
use crate::fetcher::Fetcher;
use crate::source_config::{
    ApiCollectorConfig, ApiFieldMap, HttpMethod, PaginationConfig, PaginationStrategy,
    SourceConfig,
};
use crate::traits::Collector;
use crate::types::{AggregatorError, Category, FetchConfig, Item, RawEntry, Result};
use crate::utils::{text, time};

/// Reads items out of a JSON API response, optionally across several pages.
pub struct ApiCollector {
    source_id: String,
    category: Category,
    config: ApiCollectorConfig,
    url: String,
    base: Option<Url>,
    fetcher: Fetcher,
    auth: Authenticator,
}

impl ApiCollector {
    pub fn new(source: &SourceConfig, config: ApiCollectorConfig, fetch: FetchConfig) -> Result<Self> {
        let url = config.request_url();
        let base = Some(Url::parse(&url)?);
        Ok(Self {
            source_id: source.id.clone(),
            category: source.category,
            fetcher: Fetcher::new(fetch, &source.rate_limit)?,
            auth: Authenticator::new(source.authentication.clone()),
            config,
            url,
            base,
        })
    }

    async fn fetch_page(&self, page_query: &[(String, String)]) -> Result<Value> {
        let credentials = self.auth.resolve(&self.fetcher).await?;
        let static_query: Vec<(String, String)> = self
            .config
            .params
            .iter()
            .map(|(k, v)| (k.clone(), value_to_string(v)))
            .collect();

        self.fetcher
            .execute_json(&self.url, |client| {
                let mut request = match self.config.method {
                    HttpMethod::Get => client.get(&self.url),
                    HttpMethod::Post => client.post(&self.url),
                };
                request = request.query(&static_query).query(page_query);
                for (name, value) in &self.config.headers {
                    request = request.header(name.as_str(), value.as_str());
                }
                if let Some(body) = &self.config.body {
                    request = request.json(body);
                }
                credentials.apply(request)
            })
            .await
    }
}

#[async_trait]
impl Collector for ApiCollector {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn kind(&self) -> &'static str {
        "api"
    }

    async fn collect(&self) -> Result<Vec<Item>> {
        let mut paginator = Paginator::new(self.config.pagination.as_ref());
        let mut entries = Vec::new();

        while let Some(page_query) = paginator.next_query() {
            let body = match self.fetch_page(&page_query).await {
                Ok(body) => body,
                // later pages are best effort; only a failed first page fails the source
                Err(e) if paginator.pages_fetched() > 0 => {
                    warn!(
                        "{}: page {} failed, keeping {} entries from earlier pages: {}",
                        self.source_id,
                        paginator.pages_fetched() + 1,
                        entries.len(),
                        e
                    );
                    break;
                }
                Err(e) => return Err(e),
            };
            let elements = match extract_elements(&self.source_id, &body, self.config.data_path.as_deref()) {
                Ok(elements) => elements,
                Err(e @ AggregatorError::MalformedSource { .. }) => {
                    warn!("{}", e);
                    break;
                }
                Err(e) => return Err(e),
            };
            debug!(
                "{}: page {} returned {} elements",
                self.source_id,
                paginator.pages_fetched(),
                elements.len()
            );
            entries.extend(elements.iter().map(|el| element_to_entry(el, &self.config.fields)));
            paginator.advance(&body, elements.len());
        }

        let items = normalize_entries(&self.source_id, self.category, self.base.as_ref(), entries);
        info!(
            "{}: {} items from {} page(s) of {}",
            self.source_id,
            items.len(),
            paginator.pages_fetched(),
            self.url
        );
        Ok(items)
    }
}

/// Follow a dotted path into a JSON value. Numeric segments index arrays.
/// An empty path is the value itself.
pub fn json_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Locate the result array. A single object at the path counts as one element.
pub fn extract_elements<'a>(
    source_id: &str,
    body: &'a Value,
    data_path: Option<&str>,
) -> Result<Vec<&'a Value>> {
    let path = data_path.unwrap_or("");
    match json_path(body, path) {
        Some(Value::Array(items)) => Ok(items.iter().collect()),
        Some(object @ Value::Object(_)) if !path.is_empty() => Ok(vec![object]),
        Some(Value::Null) => Ok(Vec::new()),
        Some(_) => Err(AggregatorError::MalformedSource {
            source_id: source_id.to_string(),
            reason: format!("data path {:?} is not an array", path),
        }),
        None => Err(AggregatorError::MalformedSource {
            source_id: source_id.to_string(),
            reason: format!("data path {:?} not found in response", path),
        }),
    }
}

pub fn element_to_entry(element: &Value, fields: &ApiFieldMap) -> RawEntry {
    let string_at = |path: &str| json_path(element, path).map(value_to_string).unwrap_or_default();

    RawEntry {
        url: string_at(&fields.url),
        title: string_at(&fields.title),
        description: string_at(&fields.description),
        author: fields
            .author
            .as_deref()
            .map(string_at)
            .filter(|a| !a.is_empty()),
        published_at: fields
            .published_at
            .as_deref()
            .and_then(|p| json_path(element, p))
            .and_then(|v| match v {
                Value::Number(n) => n.as_i64().and_then(time::from_unix),
                Value::String(s) => time::parse_timestamp(s),
                _ => None,
            }),
        score: fields
            .score
            .as_deref()
            .and_then(|p| json_path(element, p))
            .and_then(|v| match v {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => text::parse_score(s),
                _ => None,
            }),
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Walks the pages of a paginated API, one request at a time.
pub struct Paginator<'a> {
    config: Option<&'a PaginationConfig>,
    page: u32,
    cursor: Option<String>,
    done: bool,
}

impl<'a> Paginator<'a> {
    pub fn new(config: Option<&'a PaginationConfig>) -> Self {
        Self {
            config,
            page: 0,
            cursor: None,
            done: false,
        }
    }

    pub fn pages_fetched(&self) -> u32 {
        self.page
    }

    /// Query parameters for the next request, or `None` once exhausted or capped.
    pub fn next_query(&self) -> Option<Vec<(String, String)>> {
        if self.done {
            return None;
        }
        let Some(config) = self.config else {
            return (self.page == 0).then(Vec::new);
        };
        if self.page >= config.max_pages.max(1) {
            return None;
        }

        let query = match config.strategy {
            PaginationStrategy::Offset => vec![
                (
                    config.offset_param.clone(),
                    (u64::from(self.page) * u64::from(config.page_size)).to_string(),
                ),
                (config.limit_param.clone(), config.page_size.to_string()),
            ],
            PaginationStrategy::Page => vec![(
                config.page_param.clone(),
                (config.start_page + self.page).to_string(),
            )],
            PaginationStrategy::Cursor => match &self.cursor {
                Some(cursor) => vec![(config.cursor_param.clone(), cursor.clone())],
                None => Vec::new(),
            },
        };
        Some(query)
    }

    /// Record a fetched page of `count` elements.
    pub fn advance(&mut self, body: &Value, count: usize) {
        self.page += 1;
        let Some(config) = self.config else {
            self.done = true;
            return;
        };

        self.done = match config.strategy {
            PaginationStrategy::Offset => count < config.page_size as usize,
            PaginationStrategy::Page => count == 0,
            PaginationStrategy::Cursor => {
                self.cursor = config
                    .next_cursor_path
                    .as_deref()
                    .and_then(|p| json_path(body, p))
                    .map(value_to_string)
                    .filter(|c| !c.is_empty());
                self.cursor.is_none()
            }
        };
    }
}
