use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::config::{SelectionMode, SelectionPolicy};
use crate::source_config::{FilterConfig, SourceConfig, DEFAULT_PRIORITY};
use crate::types::{Category, HistoryStore, Item, Selection};

struct SourceRules {
    priority: u8,
    filters: FilterConfig,
}

/// Per-source filters followed by a global ordering and truncation. The
/// ordering is the policy's `mode`.
pub struct Selector {
    policy: SelectionPolicy,
    sources: HashMap<String, SourceRules>,
    defaults: SourceRules,
}

impl Selector {
    pub fn new(policy: SelectionPolicy, sources: &[SourceConfig]) -> Self {
        let sources = sources
            .iter()
            .map(|s| {
                (
                    s.id.clone(),
                    SourceRules {
                        priority: s.priority,
                        filters: s.filters.clone(),
                    },
                )
            })
            .collect();
        Self {
            policy,
            sources,
            defaults: SourceRules {
                priority: DEFAULT_PRIORITY,
                filters: FilterConfig::default(),
            },
        }
    }

    pub fn select(&self, items: Vec<Item>) -> Selection {
        self.select_at(items, Utc::now())
    }

    pub fn select_at(&self, items: Vec<Item>, now: DateTime<Utc>) -> Selection {
        let total = items.len();
        let selection = if self.policy.dual_channel_mode {
            let (tools, academic_media): (Vec<Item>, Vec<Item>) = items
                .into_iter()
                .partition(|item| item.category == Category::Tools);
            Selection::Dual {
                tools: self.rank(tools, now, self.policy.tools_channel_count),
                academic_media: self.rank(
                    academic_media,
                    now,
                    self.policy.academic_media_channel_count,
                ),
            }
        } else {
            Selection::Single {
                items: self.rank(items, now, self.policy.max_daily_items),
            }
        };

        info!("Selected {} of {} items", selection.len(), total);
        selection
    }

    pub fn uses_backlog(&self) -> bool {
        self.policy.uses_backlog()
    }

    pub async fn backfill(
        &self,
        selection: Selection,
        seen_this_run: usize,
        store: &dyn HistoryStore,
    ) -> Selection {
        self.backfill_at(selection, seen_this_run, store, Utc::now()).await
    }

    /// Top a short single-channel selection up from the store's unsent
    /// backlog. `seen_this_run` widens the read, since this run's own items
    /// are in the backlog as well. Any other mode returns the selection as is.
    pub async fn backfill_at(
        &self,
        selection: Selection,
        seen_this_run: usize,
        store: &dyn HistoryStore,
        now: DateTime<Utc>,
    ) -> Selection {
        if !self.uses_backlog() {
            return selection;
        }
        let mut items = match selection {
            Selection::Single { items } => items,
            dual => return dual,
        };
        let limit = self.policy.max_daily_items;
        let needed = limit.saturating_sub(items.len());
        if needed == 0 {
            return Selection::Single { items };
        }

        let backlog = match store.unsent(needed + seen_this_run).await {
            Ok(backlog) => backlog,
            Err(e) => {
                warn!("Backlog read failed, keeping {} selected items: {}", items.len(), e);
                return Selection::Single { items };
            }
        };

        let mut taken: HashSet<String> = items.iter().map(|i| i.url_hash.clone()).collect();
        let academic_max = self.policy.category_quota.academic_max;
        let mut academic = items.iter().filter(|i| i.category == Category::Academic).count();
        let before = items.len();
        for item in backlog {
            if items.len() >= limit {
                break;
            }
            if taken.contains(&item.url_hash) || !self.passes_filters(&item, now) {
                continue;
            }
            if item.category == Category::Academic {
                if academic >= academic_max {
                    continue;
                }
                academic += 1;
            }
            taken.insert(item.url_hash.clone());
            items.push(item);
        }

        info!(
            "Backfilled {} unsent items from history ({} short before)",
            items.len() - before,
            needed
        );
        Selection::Single { items }
    }

    fn rules_for(&self, source_id: &str) -> &SourceRules {
        self.sources.get(source_id).unwrap_or(&self.defaults)
    }

    fn rank(&self, items: Vec<Item>, now: DateTime<Utc>, limit: usize) -> Vec<Item> {
        let survivors: Vec<Item> = items
            .into_iter()
            .filter(|item| self.passes_filters(item, now))
            .collect();

        match self.policy.mode {
            SelectionMode::Ranked => self.by_score(survivors, limit),
            SelectionMode::RecencyQuota => self.by_recency_quota(survivors, now, limit),
            SelectionMode::CategoryQuota => self.by_category_quota(survivors, limit),
        }
    }

    fn by_score(&self, mut survivors: Vec<Item>, limit: usize) -> Vec<Item> {
        // sort_by is stable, so remaining ties keep merge order
        survivors.sort_by(|a, b| {
            effective_score(b)
                .total_cmp(&effective_score(a))
                .then_with(|| {
                    self.rules_for(&a.source_id)
                        .priority
                        .cmp(&self.rules_for(&b.source_id).priority)
                })
        });
        survivors.truncate(limit);
        survivors
    }

    fn by_recency_quota(&self, items: Vec<Item>, now: DateTime<Utc>, limit: usize) -> Vec<Item> {
        let quota = &self.policy.recency;
        let cutoff = now - Duration::days(i64::from(quota.recent_days));
        let (mut recent, mut historical): (Vec<Item>, Vec<Item>) = items
            .into_iter()
            .partition(|i| matches!(i.published_at, Some(p) if p >= cutoff && p <= now));
        recent.sort_by(score_then_newest);
        historical.sort_by(score_then_newest);

        let target = (limit as f64 * quota.target_ratio).floor() as usize;
        let floor = (limit as f64 * quota.min_ratio).floor() as usize;
        let share = if recent.len() >= target {
            target
        } else if recent.len() >= floor {
            floor
        } else {
            recent.len()
        };
        debug!(
            "Recency quota: {} recent, {} historical, {} reserved for recent",
            recent.len(),
            historical.len(),
            share
        );

        let leftover = recent.split_off(share);
        let mut selected = recent;
        let room = limit.saturating_sub(selected.len());
        selected.extend(historical.into_iter().take(room));
        let room = limit.saturating_sub(selected.len());
        selected.extend(leftover.into_iter().take(room));
        selected.truncate(limit);
        selected
    }

    fn by_category_quota(&self, mut items: Vec<Item>, limit: usize) -> Vec<Item> {
        let quota = &self.policy.category_quota;
        items.sort_by(newest_then_score);

        let latest = quota.latest_count.min(limit).min(items.len());
        let rest = items.split_off(latest);
        let mut selected = items;
        let mut academic = selected
            .iter()
            .filter(|i| i.category == Category::Academic)
            .count();

        let (academics, mut others): (Vec<Item>, Vec<Item>) = rest
            .into_iter()
            .partition(|i| i.category == Category::Academic);
        for item in academics {
            if selected.len() >= limit || academic >= quota.academic_max {
                break;
            }
            selected.push(item);
            academic += 1;
        }
        if academic < quota.academic_min {
            warn!(
                "Only {} academic items available, wanted at least {}",
                academic, quota.academic_min
            );
        }

        for category in &quota.fill_order {
            let room = limit.saturating_sub(selected.len());
            if room == 0 {
                break;
            }
            let (picked, remaining): (Vec<Item>, Vec<Item>) =
                others.into_iter().partition(|i| i.category == *category);
            selected.extend(picked.into_iter().take(room));
            others = remaining;
        }

        selected.truncate(limit);
        selected
    }

    fn passes_filters(&self, item: &Item, now: DateTime<Utc>) -> bool {
        let filters = &self.rules_for(&item.source_id).filters;

        if let Some(max_age) = filters.max_age_hours {
            match item.published_at {
                Some(published) if now - published > Duration::hours(max_age as i64) => {
                    debug!("{}: too old: {}", item.source_id, item.url);
                    return false;
                }
                None if !self.policy.keep_undated => return false,
                _ => {}
            }
        }

        let haystack = format!("{} {}", item.title, item.description).to_lowercase();
        let contains = |term: &String| {
            let term = term.trim().to_lowercase();
            !term.is_empty() && haystack.contains(&term)
        };

        if filters.exclude_keywords.iter().any(contains) {
            debug!("{}: excluded by keyword: {}", item.source_id, item.url);
            return false;
        }
        if !filters.include_keywords.is_empty() && !filters.include_keywords.iter().any(contains) {
            return false;
        }
        if let Some(min_score) = filters.min_score {
            if effective_score(item) < min_score {
                return false;
            }
        }
        true
    }
}

/// Newest first, undated last.
fn newest_first(a: &Item, b: &Item) -> Ordering {
    b.published_at.cmp(&a.published_at)
}

fn score_then_newest(a: &Item, b: &Item) -> Ordering {
    effective_score(b)
        .total_cmp(&effective_score(a))
        .then_with(|| newest_first(a, b))
}

fn newest_then_score(a: &Item, b: &Item) -> Ordering {
    newest_first(a, b).then_with(|| effective_score(b).total_cmp(&effective_score(a)))
}

fn effective_score(item: &Item) -> f64 {
    if item.score.is_finite() {
        item.score
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity;
    use chrono::TimeZone;

    fn item(source: &str, url: &str, score: f64) -> Item {
        Item {
            url: url.to_string(),
            title: format!("title {}", url),
            description: String::new(),
            author: None,
            source_id: source.to_string(),
            category: Category::Media,
            published_at: None,
            score,
            url_hash: identity::url_hash(url),
            content_hash: identity::content_hash(url, ""),
        }
    }

    #[test]
    fn equal_scores_rank_by_priority_then_merge_order() {
        let sources: Vec<SourceConfig> = serde_json::from_value(serde_json::json!([
            {"id": "low", "category": "media", "priority": 8,
             "collector": {"type": "feed", "url": "https://low.example/rss"}},
            {"id": "high", "category": "media", "priority": 2,
             "collector": {"type": "feed", "url": "https://high.example/rss"}}
        ]))
        .unwrap();
        let selector = Selector::new(SelectionPolicy::default(), &sources);

        let selection = selector.select(vec![
            item("low", "https://a.example/1", 1.0),
            item("high", "https://a.example/2", 1.0),
            item("unknown", "https://a.example/3", 1.0),
            item("high", "https://a.example/4", 1.0),
            item("low", "https://a.example/5", 3.0),
        ]);

        let urls: Vec<&str> = selection.items().into_iter().map(|i| i.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://a.example/5",
                "https://a.example/2",
                "https://a.example/4",
                "https://a.example/3",
                "https://a.example/1",
            ]
        );
    }

    fn dated(category: Category, url: &str, score: f64, published_at: Option<DateTime<Utc>>) -> Item {
        Item {
            category,
            published_at,
            ..item("x", url, score)
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    fn days_ago(days: i64) -> Option<DateTime<Utc>> {
        Some(now() - Duration::days(days))
    }

    fn urls(selection: &Selection) -> Vec<&str> {
        selection.items().into_iter().map(|i| i.url.as_str()).collect()
    }

    fn with_mode(mode: SelectionMode) -> SelectionPolicy {
        SelectionPolicy {
            mode,
            ..SelectionPolicy::default()
        }
    }

    #[test]
    fn recency_quota_reserves_a_share_for_older_items() {
        let selector = Selector::new(with_mode(SelectionMode::RecencyQuota), &[]);
        let mut items: Vec<Item> = (0..9)
            .map(|i| dated(Category::Media, &format!("https://r.example/{}", i), i as f64, days_ago(i + 1)))
            .collect();
        items.extend((0..5).map(|i| {
            dated(Category::Media, &format!("https://h.example/{}", i), 100.0, days_ago(400 + i))
        }));

        let selection = selector.select_at(items, now());
        assert_eq!(
            urls(&selection),
            vec![
                "https://r.example/8",
                "https://r.example/7",
                "https://r.example/6",
                "https://r.example/5",
                "https://r.example/4",
                "https://r.example/3",
                "https://r.example/2",
                "https://r.example/1",
                "https://h.example/0",
                "https://h.example/1",
            ]
        );
    }

    #[test]
    fn recency_quota_falls_back_to_minimum_share() {
        let selector = Selector::new(with_mode(SelectionMode::RecencyQuota), &[]);
        let mut items: Vec<Item> = (0..7)
            .map(|i| dated(Category::Media, &format!("https://r.example/{}", i), 1.0, days_ago(i + 1)))
            .collect();
        items.extend((0..5).map(|i| {
            dated(Category::Media, &format!("https://h.example/{}", i), 1.0, days_ago(500 + i))
        }));

        let selection = selector.select_at(items, now());
        let picked = urls(&selection);
        assert_eq!(picked.len(), 10);
        assert_eq!(picked.iter().filter(|u| u.starts_with("https://r.")).count(), 7);
        assert_eq!(&picked[7..], &["https://h.example/0", "https://h.example/1", "https://h.example/2"]);
    }

    #[test]
    fn recency_quota_tops_up_with_recent_and_counts_undated_as_older() {
        let selector = Selector::new(with_mode(SelectionMode::RecencyQuota), &[]);
        let mut items: Vec<Item> = (0..10)
            .map(|i| dated(Category::Media, &format!("https://r.example/{}", i), 5.0, days_ago(i + 1)))
            .collect();
        items.push(dated(Category::Media, "https://u.example/undated", 0.0, None));
        items.push(dated(Category::Media, "https://f.example/future", 0.0, Some(now() + Duration::days(2))));

        let selection = selector.select_at(items, now());
        let picked = urls(&selection);
        assert_eq!(picked.len(), 10);
        // eight recent, both older slots, nothing left for the last two recent
        assert_eq!(&picked[..8], &[
            "https://r.example/0",
            "https://r.example/1",
            "https://r.example/2",
            "https://r.example/3",
            "https://r.example/4",
            "https://r.example/5",
            "https://r.example/6",
            "https://r.example/7",
        ]);
        assert!(picked.contains(&"https://u.example/undated"));
        assert!(picked.contains(&"https://f.example/future"));

        let few_older = Selector::new(with_mode(SelectionMode::RecencyQuota), &[]).select_at(
            (0..10)
                .map(|i| dated(Category::Media, &format!("https://r.example/{}", i), 5.0, days_ago(i + 1)))
                .chain([dated(Category::Media, "https://u.example/undated", 0.0, None)])
                .collect(),
            now(),
        );
        let picked = urls(&few_older);
        assert_eq!(picked[8], "https://u.example/undated");
        assert_eq!(picked[9], "https://r.example/8");
    }

    #[test]
    fn category_quota_takes_latest_then_caps_academic_then_fills_by_order() {
        let policy = SelectionPolicy {
            max_daily_items: 6,
            mode: SelectionMode::CategoryQuota,
            category_quota: crate::config::CategoryQuota {
                latest_count: 2,
                academic_min: 1,
                academic_max: 2,
                ..Default::default()
            },
            ..SelectionPolicy::default()
        };
        let selector = Selector::new(policy, &[]);
        let selection = selector.select_at(
            vec![
                dated(Category::Tools, "https://t.example/1", 9.0, days_ago(5)),
                dated(Category::Academic, "https://a.example/3", 1.0, days_ago(4)),
                dated(Category::Media, "https://m.example/1", 1.0, days_ago(2)),
                dated(Category::Community, "https://c.example/1", 1.0, days_ago(7)),
                dated(Category::Academic, "https://a.example/1", 1.0, days_ago(1)),
                dated(Category::Media, "https://m.example/2", 1.0, days_ago(6)),
                dated(Category::Academic, "https://a.example/2", 1.0, days_ago(3)),
                dated(Category::LabBlog, "https://l.example/1", 1.0, days_ago(8)),
            ],
            now(),
        );
        assert_eq!(
            urls(&selection),
            vec![
                "https://a.example/1",
                "https://m.example/1",
                "https://a.example/2",
                "https://m.example/2",
                "https://l.example/1",
                "https://t.example/1",
            ]
        );
    }

    #[test]
    fn nan_scores_count_as_zero() {
        let selector = Selector::new(SelectionPolicy::default(), &[]);
        let selection = selector.select(vec![
            item("x", "https://a.example/nan", f64::NAN),
            item("x", "https://a.example/one", 1.0),
            item("x", "https://a.example/neg", -1.0),
        ]);
        let urls: Vec<&str> = selection.items().into_iter().map(|i| i.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://a.example/one", "https://a.example/nan", "https://a.example/neg"]
        );
    }
}
