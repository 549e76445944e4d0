use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::fetcher::worst_case_fetch_time;
use crate::source_config::SourceConfig;
use crate::types::{AggregatorError, Category, FetchConfig, Result};

pub const PIPELINE_FILE: &str = "pipeline.json";
pub const SOURCES_FILE: &str = "sources.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub fetch: FetchConfig,
    pub selection: SelectionPolicy,
    pub dedup: DedupPolicy,
    pub collection_deadline_secs: u64,
    pub history_database_url: String,
    pub render: Option<RenderConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            fetch: FetchConfig::default(),
            selection: SelectionPolicy::default(),
            dedup: DedupPolicy::default(),
            collection_deadline_secs: 600,
            history_database_url: "sqlite://data/history.db".to_string(),
            render: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionPolicy {
    pub max_daily_items: usize,
    pub dual_channel_mode: bool,
    pub tools_channel_count: usize,
    pub academic_media_channel_count: usize,
    /// Items without a publication time survive the max-age filter.
    pub keep_undated: bool,
    pub mode: SelectionMode,
    pub recency: RecencyQuota,
    pub category_quota: CategoryQuota,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            max_daily_items: 10,
            dual_channel_mode: false,
            tools_channel_count: 5,
            academic_media_channel_count: 5,
            keep_undated: true,
            mode: SelectionMode::default(),
            recency: RecencyQuota::default(),
            category_quota: CategoryQuota::default(),
        }
    }
}

impl SelectionPolicy {
    /// Whether short selections are topped up from, and delivered items
    /// marked in, the history store's unsent backlog.
    pub fn uses_backlog(&self) -> bool {
        self.mode == SelectionMode::CategoryQuota
            && self.category_quota.backfill_unsent
            && !self.dual_channel_mode
    }
}

/// How surviving items are ordered and cut down to each bucket's limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Score, then source priority, then merge order.
    #[default]
    Ranked,
    /// Mostly recent items with a share reserved for older ones.
    RecencyQuota,
    /// Newest items first, then per-category quotas.
    CategoryQuota,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecencyQuota {
    pub recent_days: u32,
    /// Share of the limit given to recent items when enough exist.
    pub target_ratio: f64,
    /// Fallback share when fewer than the target are available.
    pub min_ratio: f64,
}

impl Default for RecencyQuota {
    fn default() -> Self {
        Self {
            recent_days: 365,
            target_ratio: 0.8,
            min_ratio: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryQuota {
    pub latest_count: usize,
    pub academic_min: usize,
    pub academic_max: usize,
    pub fill_order: Vec<Category>,
    pub backfill_unsent: bool,
}

impl Default for CategoryQuota {
    fn default() -> Self {
        Self {
            latest_count: 3,
            academic_min: 1,
            academic_max: 3,
            fill_order: vec![
                Category::Media,
                Category::LabBlog,
                Category::Tools,
                Category::Community,
                Category::Newsletter,
            ],
            backfill_unsent: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupMethod {
    UrlHash,
    ContentHash,
    #[default]
    Both,
}

impl DedupMethod {
    pub fn uses_url(&self) -> bool {
        matches!(self, DedupMethod::UrlHash | DedupMethod::Both)
    }

    pub fn uses_content(&self) -> bool {
        matches!(self, DedupMethod::ContentHash | DedupMethod::Both)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupPolicy {
    pub method: DedupMethod,
    /// Normalized Levenshtein similarity between titles at or above which
    /// two items in the same batch count as one story. Off when unset.
    pub similarity_threshold: Option<f64>,
}

/// Headless-browser service used by scrape sources with `render_js`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    pub endpoint: String,
    #[serde(default)]
    pub token: Option<String>,
}

impl AppConfig {
    /// Read `pipeline.json` from `dir`. A missing file yields defaults.
    /// `DATABASE_URL` overrides the history database location.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(PIPELINE_FILE);
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str::<AppConfig>(&substitute_env(&raw))?
        } else {
            info!("No {} in {}, using defaults", PIPELINE_FILE, dir.display());
            AppConfig::default()
        };

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.history_database_url = url;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fetch.max_retries > 10 {
            return Err(AggregatorError::Config(format!(
                "fetch.max_retries {} is above the ceiling of 10",
                self.fetch.max_retries
            )));
        }
        if self.collection_deadline_secs == 0 {
            return Err(AggregatorError::Config(
                "collection_deadline_secs must be positive".to_string(),
            ));
        }
        let recency = &self.selection.recency;
        for (name, ratio) in [
            ("target_ratio", recency.target_ratio),
            ("min_ratio", recency.min_ratio),
        ] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(AggregatorError::Config(format!(
                    "selection.recency.{} {} must be within 0..=1",
                    name, ratio
                )));
            }
        }
        if recency.min_ratio > recency.target_ratio {
            return Err(AggregatorError::Config(
                "selection.recency.min_ratio is above target_ratio".to_string(),
            ));
        }
        let quota = &self.selection.category_quota;
        if quota.academic_min > quota.academic_max {
            return Err(AggregatorError::Config(format!(
                "selection.category_quota.academic_min {} is above academic_max {}",
                quota.academic_min, quota.academic_max
            )));
        }
        if let Some(threshold) = self.dedup.similarity_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(AggregatorError::Config(format!(
                    "dedup.similarity_threshold {} must be within 0..=1",
                    threshold
                )));
            }
        }
        Ok(())
    }

    /// Enabled sources whose full retry schedule cannot finish inside the
    /// collection deadline. Their last retries would be cut off.
    pub fn sources_outliving_deadline<'a>(&self, sources: &'a [SourceConfig]) -> Vec<&'a str> {
        let deadline = std::time::Duration::from_secs(self.collection_deadline_secs);
        sources
            .iter()
            .filter(|s| s.is_enabled())
            .filter(|s| worst_case_fetch_time(&self.fetch, &s.rate_limit) > deadline)
            .map(|s| s.id.as_str())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct SourcesFile {
    sources: Vec<SourceConfig>,
}

/// Read `sources.json` from `dir`, substituting `${VAR}` references first.
pub fn load_sources(dir: &Path) -> Result<Vec<SourceConfig>> {
    let path = dir.join(SOURCES_FILE);
    let raw = std::fs::read_to_string(&path).map_err(|e| {
        AggregatorError::Config(format!("cannot read {}: {}", path.display(), e))
    })?;
    parse_sources(&substitute_env(&raw))
}

pub fn parse_sources(json: &str) -> Result<Vec<SourceConfig>> {
    let file: SourcesFile = serde_json::from_str(json)?;
    let mut seen = std::collections::HashSet::new();
    for source in &file.sources {
        source.validate()?;
        if !seen.insert(source.id.as_str()) {
            return Err(AggregatorError::Config(format!(
                "duplicate source id {}",
                source.id
            )));
        }
    }
    info!(
        "Loaded {} sources ({} enabled)",
        file.sources.len(),
        file.sources.iter().filter(|s| s.is_enabled()).count()
    );
    Ok(file.sources)
}

/// Replace `${VAR}` with the variable's value, escaped for use inside a JSON
/// string. Unset variables stay verbatim.
pub fn substitute_env(raw: &str) -> String {
    substitute_with(raw, |name| std::env::var(name).ok())
}

fn substitute_with<F>(raw: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match lookup(name) {
                    Some(value) => out.push_str(&json_escape(&value)),
                    None => {
                        warn!("Environment variable {} is not set, leaving placeholder", name);
                        out.push_str(&rest[start..start + 2 + end + 1]);
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn json_escape(value: &str) -> String {
    let quoted = serde_json::Value::String(value.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}
