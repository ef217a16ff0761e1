use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::{CacheBackend, CacheEntry, CacheError};

/// Process-local cache backend.
///
/// Expired entries are dropped lazily on read and in bulk by `purge_expired`.
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<DashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(Utc::now()) {
                return Ok(Some(entry.value().clone()));
            }
            drop(entry); // release the read lock before removing
            self.entries.remove_if(key, |_, e| e.is_expired(Utc::now()));
        }
        Ok(None)
    }

    async fn set(&self, entry: CacheEntry) -> Result<(), CacheError> {
        self.entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, CacheError> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        Ok(before.saturating_sub(self.entries.len()))
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}
