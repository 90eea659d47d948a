//! TTL cache for raw API responses.
//!
//! Entries live in a moka cache with least-recently-used eviction and can be
//! mirrored to one JSON file per entry so they survive restarts. The mirror
//! directory is held to the same cap: evicted entries lose their file, and
//! the oldest files are pruned when the cache opens or a new file is written.
//! `get` never
//! returns expired data. Expired entries stay around for a grace period so a
//! rate-limited request can still fall back to them through `get_stale`;
//! past the grace period they are removed the next time they are read.
//!
//! Storage problems are logged and turn into cache misses.

use crate::fingerprint::digest_key;
use chrono::{DateTime, Utc};
use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Volatility class of an endpoint, mapped to a TTL by [`TtlPolicy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlClass {
    /// Reference data: details, characters, statistics, genres, season archive
    Static,
    /// Season listings and top lists
    Seasonal,
    /// Search, recommendations, random picks
    Dynamic,
}

/// TTL per volatility class
#[derive(Debug, Clone, Copy)]
pub struct TtlPolicy {
    pub static_ttl: Duration,
    pub seasonal_ttl: Duration,
    pub dynamic_ttl: Duration,
}

impl TtlPolicy {
    pub fn ttl(&self, class: TtlClass) -> Duration {
        match class {
            TtlClass::Static => self.static_ttl,
            TtlClass::Seasonal => self.seasonal_ttl,
            TtlClass::Dynamic => self.dynamic_ttl,
        }
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            static_ttl: Duration::from_secs(60 * 60),
            seasonal_ttl: Duration::from_secs(30 * 60),
            dynamic_ttl: Duration::from_secs(5 * 60),
        }
    }
}

/// Cache storage errors; never surfaced past the cache
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One cached response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub stored_at: DateTime<Utc>,
    pub ttl_ms: u64,
}

impl CacheEntry {
    /// `None` when the expiry is beyond the representable range
    fn expires_at(&self) -> Option<DateTime<Utc>> {
        let ttl = chrono::Duration::milliseconds(i64::try_from(self.ttl_ms).unwrap_or(i64::MAX));
        self.stored_at.checked_add_signed(ttl)
    }

    /// Valid iff `now <= stored_at + ttl`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().map_or(true, |expires| now <= expires)
    }

    fn is_past_grace(&self, now: DateTime<Utc>, grace: chrono::Duration) -> bool {
        match self.expires_at().and_then(|e| e.checked_add_signed(grace)) {
            Some(limit) => now > limit,
            None => false,
        }
    }
}

/// Cache construction options
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Maximum number of entries kept in memory and on disk
    pub max_entries: usize,
    /// How long expired entries remain available to `get_stale`
    pub stale_grace: Duration,
    /// Directory for JSON mirrors; `None` keeps the cache in memory only
    pub persist_dir: Option<PathBuf>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            max_entries: 500,
            stale_grace: Duration::from_secs(24 * 60 * 60),
            persist_dir: None,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub memory_entries: usize,
    pub total_files: usize,
    pub total_size_bytes: u64,
}

/// TTL response cache
pub struct TtlCache {
    memory: Cache<String, CacheEntry>,
    max_entries: usize,
    stale_grace: chrono::Duration,
    persist_dir: Option<PathBuf>,
}

impl TtlCache {
    /// Create a new cache, creating the persistence directory if needed
    ///
    /// A directory that cannot be created disables persistence.
    pub fn new(options: CacheOptions) -> Self {
        let max_entries = options.max_entries.max(1);
        let persist_dir = options.persist_dir.and_then(|dir| {
            match std::fs::create_dir_all(&dir) {
                Ok(()) => {
                    prune_dir(&dir, max_entries, None);
                    info!(cache_dir = %dir.display(), max_entries, "Cache initialized");
                    Some(dir)
                }
                Err(e) => {
                    warn!(
                        cache_dir = %dir.display(),
                        error = %e,
                        "Failed to create cache directory, caching in memory only"
                    );
                    None
                }
            }
        });

        // Capacity evictions take the mirror file with them
        let mirror = persist_dir.clone();
        let memory = Cache::builder()
            .max_capacity(max_entries as u64)
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(move |key: Arc<String>, _entry: CacheEntry, cause: RemovalCause| {
                if cause == RemovalCause::Size {
                    debug!(key = %key, "Evicted least recently used cache entry");
                    if let Some(dir) = &mirror {
                        remove_mirror(&mirror_path(dir, &key));
                    }
                }
            })
            .build();

        Self {
            memory,
            max_entries,
            stale_grace: chrono::Duration::from_std(options.stale_grace)
                .unwrap_or_else(|_| chrono::Duration::days(1)),
            persist_dir,
        }
    }

    /// Memory-only cache
    pub fn in_memory(max_entries: usize) -> Self {
        Self::new(CacheOptions {
            max_entries,
            ..Default::default()
        })
    }

    /// Fresh value for `key`, if any
    pub fn get(&self, key: &str) -> Option<Value> {
        self.get_at(key, Utc::now())
    }

    /// Entry for `key` even if expired (within the grace period)
    pub fn get_stale(&self, key: &str) -> Option<CacheEntry> {
        self.get_stale_at(key, Utc::now())
    }

    /// Store `value` under `key` for `ttl`
    pub fn set(&self, key: &str, value: Value, ttl: Duration) {
        self.set_at(key, value, ttl, Utc::now());
    }

    pub(crate) fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<Value> {
        let entry = self.lookup(key, now)?;
        if entry.is_valid_at(now) {
            debug!(key = key, "Cache hit");
            Some(entry.value)
        } else {
            debug!(key = key, "Cache entry expired");
            None
        }
    }

    pub(crate) fn get_stale_at(&self, key: &str, now: DateTime<Utc>) -> Option<CacheEntry> {
        self.lookup(key, now)
    }

    pub(crate) fn set_at(&self, key: &str, value: Value, ttl: Duration, now: DateTime<Utc>) {
        let entry = CacheEntry {
            key: key.to_string(),
            value,
            stored_at: now,
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
        };

        // Evict first so the directory prune only sees surviving entries
        self.insert(entry.clone());
        if let Err(e) = self.persist(&entry) {
            warn!(key = key, error = %e, "Failed to persist cache entry");
        }
        debug!(key = key, ttl_ms = ttl.as_millis(), "Cache stored");
    }

    /// Insert and settle capacity so the bound holds on return
    fn insert(&self, entry: CacheEntry) {
        self.memory.insert(entry.key.clone(), entry);
        self.memory.run_pending_tasks();
    }

    /// Memory lookup with disk fallback; drops entries past the grace period
    fn lookup(&self, key: &str, now: DateTime<Utc>) -> Option<CacheEntry> {
        let entry = match self.memory.get(key) {
            Some(entry) => entry,
            None => {
                let loaded = match self.load(key) {
                    Ok(loaded) => loaded?,
                    Err(e) => {
                        warn!(key = key, error = %e, "Failed to read cache entry, treating as miss");
                        return None;
                    }
                };
                debug!(key = key, "Loaded cache entry from disk");
                self.insert(loaded.clone());
                loaded
            }
        };

        if entry.is_past_grace(now, self.stale_grace) {
            self.memory.invalidate(key);
            self.remove_file(key);
            debug!(key = key, "Evicted stale cache entry");
            return None;
        }

        Some(entry)
    }

    /// Get the cache file path for a given key
    fn cache_path(&self, key: &str) -> Option<PathBuf> {
        self.persist_dir.as_deref().map(|dir| mirror_path(dir, key))
    }

    fn load(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let Some(path) = self.cache_path(key) else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path).map_err(|source| CacheError::Io {
            path: path.clone(),
            source,
        })?;
        let entry: CacheEntry = serde_json::from_str(&content)?;

        // Digest collision or a hand-edited file
        if entry.key != key {
            return Ok(None);
        }
        Ok(Some(entry))
    }

    fn persist(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let (Some(dir), Some(path)) = (self.persist_dir.as_deref(), self.cache_path(&entry.key))
        else {
            return Ok(());
        };

        let created = !path.exists();
        let content = serde_json::to_string(entry)?;
        std::fs::write(&path, content).map_err(|source| CacheError::Io {
            path: path.clone(),
            source,
        })?;

        if created {
            prune_dir(dir, self.max_entries, Some(&path));
        }
        Ok(())
    }

    fn remove_file(&self, key: &str) {
        if let Some(path) = self.cache_path(key) {
            remove_mirror(&path);
        }
    }

    /// Number of entries currently held in memory
    pub fn len(&self) -> usize {
        self.memory.run_pending_tasks();
        usize::try_from(self.memory.entry_count()).unwrap_or(usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all cached entries, in memory and on disk
    pub fn clear(&self) -> Result<(), CacheError> {
        self.memory.invalidate_all();
        self.memory.run_pending_tasks();

        if let Some(dir) = &self.persist_dir {
            if dir.exists() {
                std::fs::remove_dir_all(dir).map_err(|source| CacheError::Io {
                    path: dir.clone(),
                    source,
                })?;
                std::fs::create_dir_all(dir).map_err(|source| CacheError::Io {
                    path: dir.clone(),
                    source,
                })?;
            }
            info!("Cache cleared");
        }

        Ok(())
    }

    /// Get cache statistics
    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let mut stats = CacheStats {
            memory_entries: self.len(),
            ..Default::default()
        };

        let Some(dir) = self.persist_dir.as_deref().filter(|d| d.exists()) else {
            return Ok(stats);
        };

        let io_err = |source| CacheError::Io {
            path: dir.to_path_buf(),
            source,
        };
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            if is_cache_file(&entry.path()) {
                stats.total_files += 1;
                stats.total_size_bytes += entry.metadata().map_err(io_err)?.len();
            }
        }

        Ok(stats)
    }
}

fn mirror_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{}.json", digest_key(key)))
}

fn remove_mirror(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "Failed to remove cache file");
        }
    }
}

fn is_cache_file(path: &Path) -> bool {
    path.is_file() && path.extension().map_or(false, |ext| ext == "json")
}

/// Cache files in `dir` with their modification times
fn mirror_files(dir: &Path) -> std::io::Result<Vec<(PathBuf, SystemTime)>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if is_cache_file(&path) {
            let modified = std::fs::metadata(&path)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            files.push((path, modified));
        }
    }
    Ok(files)
}

/// Delete the least recently written files above `max_entries`, never `keep`
fn prune_dir(dir: &Path, max_entries: usize, keep: Option<&Path>) {
    let mut files = match mirror_files(dir) {
        Ok(files) => files,
        Err(e) => {
            warn!(cache_dir = %dir.display(), error = %e, "Failed to list cache directory");
            return;
        }
    };
    if files.len() <= max_entries {
        return;
    }

    let excess = files.len() - max_entries;
    files.sort_by_key(|(_, modified)| *modified);
    for (path, _) in files
        .iter()
        .filter(|(path, _)| Some(path.as_path()) != keep)
        .take(excess)
    {
        remove_mirror(path);
    }
    info!(cache_dir = %dir.display(), removed = excess, "Pruned cache directory");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn ms(n: i64) -> chrono::Duration {
        chrono::Duration::milliseconds(n)
    }

    fn persistent(dir: &Path) -> TtlCache {
        TtlCache::new(CacheOptions {
            persist_dir: Some(dir.to_path_buf()),
            ..Default::default()
        })
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let cache = TtlCache::in_memory(10);
        let t0 = Utc::now();

        cache.set_at("k", json!({ "v": 1 }), Duration::from_millis(1000), t0);

        assert_eq!(cache.get_at("k", t0 + ms(500)), Some(json!({ "v": 1 })));
        assert_eq!(cache.get_at("k", t0 + ms(1000)), Some(json!({ "v": 1 })));
        assert_eq!(cache.get_at("k", t0 + ms(1500)), None);
    }

    #[test]
    fn test_stale_entry_available_within_grace() {
        let cache = TtlCache::new(CacheOptions {
            max_entries: 10,
            stale_grace: Duration::from_secs(60),
            persist_dir: None,
        });
        let t0 = Utc::now();
        cache.set_at("k", json!([1, 2]), Duration::from_millis(1000), t0);

        let later = t0 + ms(30_000);
        assert_eq!(cache.get_at("k", later), None);

        let stale = cache.get_stale_at("k", later).expect("stale entry");
        assert_eq!(stale.value, json!([1, 2]));
        assert!(!stale.is_valid_at(later));
    }

    #[test]
    fn test_entry_removed_after_grace() {
        let cache = TtlCache::new(CacheOptions {
            max_entries: 10,
            stale_grace: Duration::from_secs(60),
            persist_dir: None,
        });
        let t0 = Utc::now();
        cache.set_at("k", json!(1), Duration::from_millis(1000), t0);

        let much_later = t0 + ms(120_000);
        assert_eq!(cache.get_stale_at("k", much_later), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_set_overwrites() {
        let cache = TtlCache::in_memory(10);
        cache.set("k", json!("old"), Duration::from_secs(60));
        cache.set("k", json!("new"), Duration::from_secs(60));
        assert_eq!(cache.get("k"), Some(json!("new")));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = TtlCache::in_memory(2);
        let ttl = Duration::from_secs(60);

        cache.set("a", json!(1), ttl);
        cache.set("b", json!(2), ttl);
        // Touch "a" so "b" becomes least recently used
        assert!(cache.get("a").is_some());
        cache.set("c", json!(3), ttl);

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_evicted_entry_loses_its_file() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let cache = TtlCache::new(CacheOptions {
            max_entries: 2,
            persist_dir: Some(temp_dir.path().to_path_buf()),
            ..Default::default()
        });
        let ttl = Duration::from_secs(60);

        cache.set("a", json!(1), ttl);
        cache.set("b", json!(2), ttl);
        assert!(cache.get("a").is_some());
        cache.set("c", json!(3), ttl);

        assert!(!temp_dir.path().join(format!("{}.json", digest_key("b"))).exists());
        assert_eq!(cache.stats()?.total_files, 2);

        Ok(())
    }

    #[test]
    fn test_entries_loaded_from_disk_respect_cap() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let small = TtlCache::new(CacheOptions {
            max_entries: 2,
            persist_dir: Some(temp_dir.path().to_path_buf()),
            ..Default::default()
        });

        // Another process with a larger cap fills the shared directory
        let writer = TtlCache::new(CacheOptions {
            max_entries: 10,
            persist_dir: Some(temp_dir.path().to_path_buf()),
            ..Default::default()
        });
        for n in 0..6 {
            writer.set(&format!("k{}", n), json!(n), Duration::from_secs(60));
        }

        for n in 0..6 {
            assert_eq!(small.get(&format!("k{}", n)), Some(json!(n)));
            assert!(small.len() <= 2);
        }
        assert!(small.stats()?.total_files <= 2);

        Ok(())
    }

    #[test]
    fn test_disk_mirror_bounded_across_instances() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let open = || {
            TtlCache::new(CacheOptions {
                max_entries: 2,
                persist_dir: Some(temp_dir.path().to_path_buf()),
                ..Default::default()
            })
        };

        // One short-lived cache per run, each storing a different key
        for n in 0..6 {
            open().set(&format!("k{}", n), json!(n), Duration::from_secs(60));
        }

        let reopened = open();
        assert!(reopened.stats()?.total_files <= 2);

        let hits = (0..6)
            .filter(|n| reopened.get(&format!("k{}", n)).is_some())
            .count();
        assert!(hits <= 2);
        assert!(reopened.len() <= 2);
        assert_eq!(reopened.get("k5"), Some(json!(5)));

        Ok(())
    }

    #[test]
    fn test_persisted_entries_survive_restart() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        persistent(temp_dir.path()).set("/seasons-{}", json!({ "data": [] }), Duration::from_secs(60));

        let reopened = persistent(temp_dir.path());
        assert_eq!(reopened.get("/seasons-{}"), Some(json!({ "data": [] })));

        let stats = reopened.stats()?;
        assert_eq!(stats.total_files, 1);
        assert!(stats.total_size_bytes > 0);

        Ok(())
    }

    #[test]
    fn test_corrupt_file_is_a_miss() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let cache = persistent(temp_dir.path());
        cache.set("k", json!(1), Duration::from_secs(60));

        let path = temp_dir.path().join(format!("{}.json", digest_key("k")));
        std::fs::write(&path, "{ not json")?;

        let reopened = persistent(temp_dir.path());
        assert_eq!(reopened.get("k"), None);
        assert_eq!(reopened.get_stale("k"), None);

        Ok(())
    }

    #[test]
    fn test_clear() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let cache = persistent(temp_dir.path());
        cache.set("k", json!(1), Duration::from_secs(60));

        cache.clear()?;
        assert!(cache.is_empty());
        assert_eq!(cache.stats()?.total_files, 0);
        assert_eq!(persistent(temp_dir.path()).get("k"), None);

        Ok(())
    }

    #[test]
    fn test_ttl_policy() {
        let policy = TtlPolicy::default();
        assert_eq!(policy.ttl(TtlClass::Static), Duration::from_secs(3600));
        assert_eq!(policy.ttl(TtlClass::Seasonal), Duration::from_secs(1800));
        assert_eq!(policy.ttl(TtlClass::Dynamic), Duration::from_secs(300));
    }
}
