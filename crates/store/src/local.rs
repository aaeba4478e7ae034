//! In-process key/value storage backed by DashMap. Models browser local
//! storage: entries expire after a retention window and the store refuses
//! new keys once its quota is reached.
//!
//! Cloning the `Arc` around a `LocalStorage` and handing it to two engines
//! models two tabs sharing one origin's storage.

use dashmap::DashMap;
use splitlane_core::{SplitlaneError, SplitlaneResult};
use std::time::{Duration, Instant};

use crate::StorageBackend;

struct StorageEntry {
    value: String,
    inserted_at: Instant,
}

pub struct LocalStorage {
    store: DashMap<String, StorageEntry>,
    retention: Option<Duration>,
    max_entries: usize,
}

impl LocalStorage {
    /// `retention_secs = 0` keeps entries forever.
    pub fn new(retention_secs: u64, max_entries: usize) -> Self {
        Self {
            store: DashMap::new(),
            retention: (retention_secs > 0).then(|| Duration::from_secs(retention_secs)),
            max_entries,
        }
    }

    fn is_expired(&self, entry: &StorageEntry) -> bool {
        self.retention
            .is_some_and(|ttl| entry.inserted_at.elapsed() > ttl)
    }

    /// Remove expired entries.
    pub fn evict_expired(&self) -> usize {
        let before = self.store.len();
        let retention = self.retention;
        self.store.retain(|_, entry| {
            retention.map_or(true, |ttl| entry.inserted_at.elapsed() <= ttl)
        });
        before - self.store.len()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

impl Default for LocalStorage {
    fn default() -> Self {
        Self::new(0, usize::MAX)
    }
}

impl StorageBackend for LocalStorage {
    fn get(&self, key: &str) -> SplitlaneResult<Option<String>> {
        let Some(entry) = self.store.get(key) else {
            return Ok(None);
        };
        if self.is_expired(&entry) {
            drop(entry);
            self.store.remove(key);
            return Ok(None);
        }
        Ok(Some(entry.value.clone()))
    }

    fn set(&self, key: &str, value: &str) -> SplitlaneResult<()> {
        if self.store.len() >= self.max_entries && !self.store.contains_key(key) {
            return Err(SplitlaneError::QuotaExceeded {
                used: self.store.len(),
                limit: self.max_entries,
            });
        }
        self.store.insert(
            key.to_string(),
            StorageEntry {
                value: value.to_string(),
                inserted_at: Instant::now(),
            },
        );
        Ok(())
    }

    fn remove(&self, key: &str) -> SplitlaneResult<()> {
        self.store.remove(key);
        Ok(())
    }

    fn keys(&self, prefix: &str) -> SplitlaneResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .store
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && !self.is_expired(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
