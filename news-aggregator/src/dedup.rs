use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::DedupPolicy;
use crate::identity;
use crate::types::{HistoryStore, Item, Result, SeenIdentity};

/// Removes items already seen in earlier runs or earlier in the same batch,
/// then records the survivors.
///
/// The store is read once and written once per call. Items are walked in merge
/// order so the first (highest priority) copy of a story is the one kept.
pub struct Deduplicator {
    store: Arc<dyn HistoryStore>,
    policy: DedupPolicy,
}

impl Deduplicator {
    pub fn new(store: Arc<dyn HistoryStore>, policy: DedupPolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &dyn HistoryStore {
        self.store.as_ref()
    }

    pub async fn deduplicate(&self, items: Vec<Item>) -> Result<Vec<Item>> {
        self.deduplicate_at(items, Utc::now()).await
    }

    pub async fn deduplicate_at(&self, items: Vec<Item>, now: DateTime<Utc>) -> Result<Vec<Item>> {
        if items.is_empty() {
            debug!("Nothing to deduplicate");
            return Ok(items);
        }

        let url_hashes = unique(items.iter().map(|i| i.url_hash.as_str()));
        let content_hashes = unique(
            items
                .iter()
                .map(|i| i.content_hash.as_str())
                .filter(|h| !h.is_empty()),
        );
        let existing = self.store.check_existing(&url_hashes, &content_hashes).await?;

        let method = self.policy.method;
        let mut batch_urls: HashSet<&str> = HashSet::new();
        let mut batch_contents: HashSet<&str> = HashSet::new();
        let mut kept_titles: Vec<String> = Vec::new();
        let mut kept_indices = Vec::with_capacity(items.len());
        let (mut historical, mut in_batch) = (0usize, 0usize);

        for (index, item) in items.iter().enumerate() {
            // blank title and description: nothing to compare on content
            let by_content = method.uses_content() && !item.content_hash.is_empty();
            let seen_before = (method.uses_url() && existing.url_hashes.contains(&item.url_hash))
                || (by_content && existing.content_hashes.contains(&item.content_hash));
            if seen_before {
                historical += 1;
                continue;
            }

            let repeated = (method.uses_url() && batch_urls.contains(item.url_hash.as_str()))
                || (by_content && batch_contents.contains(item.content_hash.as_str()));
            let title = identity::normalize_content(&item.title, "");
            if repeated || self.is_similar(&title, &kept_titles) {
                debug!("{}: duplicate of an earlier item in this batch: {}", item.source_id, item.url);
                in_batch += 1;
                continue;
            }

            batch_urls.insert(&item.url_hash);
            if !item.content_hash.is_empty() {
                batch_contents.insert(&item.content_hash);
            }
            if !title.is_empty() {
                kept_titles.push(title);
            }
            kept_indices.push(index);
        }

        let identities: Vec<SeenIdentity> = kept_indices
            .iter()
            .map(|&i| SeenIdentity::from_item(&items[i], now))
            .collect();
        self.store.append(&identities).await?;

        info!(
            "Dedup: {} in, {} kept, {} seen in earlier runs, {} repeated in batch",
            items.len(),
            kept_indices.len(),
            historical,
            in_batch
        );

        let keep: HashSet<usize> = kept_indices.into_iter().collect();
        Ok(items
            .into_iter()
            .enumerate()
            .filter(|(i, _)| keep.contains(i))
            .map(|(_, item)| item)
            .collect())
    }

    fn is_similar(&self, title: &str, kept: &[String]) -> bool {
        let Some(threshold) = self.policy.similarity_threshold else {
            return false;
        };
        if title.is_empty() {
            return false;
        }
        kept.iter()
            .any(|other| strsim::normalized_levenshtein(title, other) >= threshold)
    }
}

fn unique<'a>(hashes: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    hashes
        .filter(|h| seen.insert(*h))
        .map(str::to_string)
        .collect()
}
