//! Search cache - TTL + LRU cache over expensive package lookups.
//!
//! Package searches against the underlying manager are slow (seconds), so
//! results are kept for a few minutes and shared across queries. Entries
//! are inserted fully formed under a write lock; concurrent readers never
//! observe a partially written entry. Expired entries are treated as absent
//! on read and an LRU bound caps memory on write.
//!
//! Lifecycle is explicit: `init()` loads the persisted map, `flush()`
//! writes it back, `close()` flushes and drops. The cache is an injected
//! dependency, not module state, so tests can run isolated instances.

use std::future::Future;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, warn};

pub const DEFAULT_TTL_SECS: u64 = 300;
pub const DEFAULT_CAPACITY: usize = 256;

use crate::types::PackageMatch;

/// One cached lookup. `created_at` plus `ttl_secs` decides expiry; the
/// entry itself is immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: Vec<PackageMatch>,
    pub created_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.created_at);
        age.num_seconds() < 0 || age.num_seconds() as u64 >= self.ttl_secs
    }
}

pub struct SearchCache {
    entries: RwLock<LruCache<String, CacheEntry>>,
    ttl: Duration,
    /// Persistence file; `None` for purely in-memory instances (tests).
    path: Option<PathBuf>,
}

impl SearchCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least 1");
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            ttl,
            path: None,
        }
    }

    /// Build a cache backed by a JSON file and load whatever unexpired
    /// entries it holds. A missing or corrupt file starts empty.
    pub fn init(capacity: usize, ttl: Duration, path: PathBuf) -> Self {
        let mut cache = Self::new(capacity, ttl);
        cache.path = Some(path);
        cache.load();
        cache
    }

    fn load(&self) {
        let Some(path) = &self.path else { return };
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => return,
        };
        let persisted: HashMap<String, CacheEntry> = match serde_json::from_str(&raw) {
            Ok(map) => map,
            Err(e) => {
                warn!("discarding unreadable search cache {}: {}", path.display(), e);
                return;
            }
        };

        let now = Utc::now();
        let mut entries = self.entries.write().expect("cache lock poisoned");
        for (key, entry) in persisted {
            if !entry.is_expired(now) {
                entries.put(key, entry);
            }
        }
        debug!("loaded {} cached searches", entries.len());
    }

    /// Normalized cache key: case and whitespace variations share entries.
    fn normalize(query: &str) -> String {
        query
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Read a live entry, refreshing its LRU position. Expired entries are
    /// treated as absent.
    pub fn get(&self, query: &str) -> Option<Vec<PackageMatch>> {
        let key = Self::normalize(query);
        let now = Utc::now();
        let mut entries = self.entries.write().expect("cache lock poisoned");
        match entries.get(&key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
            Some(_) => {
                entries.pop(&key);
                None
            }
            None => None,
        }
    }

    /// Read without touching LRU order or expiry. Used by the knowledge
    /// engine for best-effort disambiguation.
    pub fn peek(&self, query: &str) -> Option<Vec<PackageMatch>> {
        let key = Self::normalize(query);
        let now = Utc::now();
        let entries = self.entries.read().expect("cache lock poisoned");
        entries
            .peek(&key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value.clone())
    }

    /// Insert a fully formed entry, evicting the least recently used one
    /// when at capacity.
    pub fn insert(&self, query: &str, value: Vec<PackageMatch>) {
        let entry = CacheEntry {
            value,
            created_at: Utc::now(),
            ttl_secs: self.ttl.as_secs(),
        };
        let mut entries = self.entries.write().expect("cache lock poisoned");
        entries.put(Self::normalize(query), entry);
    }

    /// All package names currently cached, for fuzzy suggestion ranking.
    pub fn known_package_names(&self) -> Vec<String> {
        let entries = self.entries.read().expect("cache lock poisoned");
        let mut names: Vec<String> = entries
            .iter()
            .flat_map(|(_, e)| e.value.iter().map(|m| m.name.clone()))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Cache-through lookup. Within the TTL the compute function is never
    /// called a second time for the same key.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        query: &str,
        compute: F,
    ) -> Result<Vec<PackageMatch>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<PackageMatch>, E>>,
    {
        if let Some(hit) = self.get(query) {
            debug!(query, "search cache hit");
            return Ok(hit);
        }
        debug!(query, "search cache miss");
        let value = compute().await?;
        self.insert(query, value.clone());
        Ok(value)
    }

    /// Persist the current entries. No-op for in-memory instances.
    pub fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = {
            let entries = self.entries.read().expect("cache lock poisoned");
            let map: HashMap<&String, &CacheEntry> = entries.iter().map(|(k, v)| (k, v)).collect();
            serde_json::to_string_pretty(&map)?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    /// Flush and drop.
    pub fn close(self) -> Result<()> {
        self.flush()
    }
}
