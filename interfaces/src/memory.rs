use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::defs::{ExistingHashes, HistoryStore, Item, SeenIdentity, StoreError, StoreResult};

struct Record {
    identity: SeenIdentity,
    sent_at: Option<DateTime<Utc>>,
}

/// Process-local history store. Nothing survives a restart; meant for tests and dry runs.
#[derive(Default)]
pub struct MemoryHistoryStore {
    records: Mutex<HashMap<String, Record>>,
    unavailable: bool,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every call fails, for exercising the fatal-store path.
    pub fn unavailable() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            unavailable: true,
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, url_hash: &str) -> Option<SeenIdentity> {
        self.records
            .lock()
            .ok()?
            .get(url_hash)
            .map(|r| r.identity.clone())
    }

    fn guard(&self) -> StoreResult<std::sync::MutexGuard<'_, HashMap<String, Record>>> {
        if self.unavailable {
            return Err(StoreError::Unavailable("memory store switched off".to_string()));
        }
        self.records
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store mutex poisoned".to_string()))
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn check_existing(
        &self,
        url_hashes: &[String],
        content_hashes: &[String],
    ) -> StoreResult<ExistingHashes> {
        let records = self.guard()?;
        let mut existing = ExistingHashes::default();
        for hash in url_hashes {
            if records.contains_key(hash) {
                existing.url_hashes.insert(hash.clone());
            }
        }
        let wanted: HashSet<&String> = content_hashes.iter().filter(|h| !h.is_empty()).collect();
        for record in records.values() {
            if wanted.contains(&record.identity.content_hash) {
                existing.content_hashes.insert(record.identity.content_hash.clone());
            }
        }
        Ok(existing)
    }

    async fn append(&self, new: &[SeenIdentity]) -> StoreResult<()> {
        let mut records = self.guard()?;
        for identity in new {
            records
                .entry(identity.url_hash.clone())
                .or_insert_with(|| Record {
                    identity: identity.clone(),
                    sent_at: None,
                });
        }
        Ok(())
    }

    async fn unsent(&self, limit: usize) -> StoreResult<Vec<Item>> {
        let records = self.guard()?;
        let mut pending: Vec<(&Item, DateTime<Utc>)> = records
            .values()
            .filter(|r| r.sent_at.is_none())
            .filter_map(|r| r.identity.item.as_ref().map(|i| (i, r.identity.first_seen_at)))
            .collect();
        pending.sort_by(|a, b| {
            b.0.score
                .partial_cmp(&a.0.score)
                .unwrap_or(Ordering::Equal)
                .then(b.1.cmp(&a.1))
        });
        Ok(pending
            .into_iter()
            .take(limit)
            .map(|(item, _)| item.clone())
            .collect())
    }

    async fn mark_sent(&self, url_hashes: &[String], at: DateTime<Utc>) -> StoreResult<()> {
        let mut records = self.guard()?;
        for hash in url_hashes {
            if let Some(record) = records.get_mut(hash) {
                record.sent_at.get_or_insert(at);
            }
        }
        Ok(())
    }
}
