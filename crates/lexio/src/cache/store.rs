//! # Cache Store
//!
//! Disk-backed key/value store with a persistent metadata index, TTL
//! expiry, priority+recency eviction, and a background expiry sweep.
//!
//! Every operation is best-effort: I/O failures degrade to a miss or a
//! no-op and are logged, so the cache is never a source of crashes for
//! its caller. All mutating operations serialize on one process-wide
//! async mutex over the index.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::index;
use super::types::{
    CacheConfig, CacheKey, CacheReport, CacheStats, CategoryUsage, EntryMeta, now_millis,
};

/// On-disk blob payload, stored next to the index as `<cacheKey>.cache`
#[derive(Serialize, Deserialize)]
struct Blob {
    value: serde_json::Value,
    metadata: BlobMeta,
}

#[derive(Serialize, Deserialize)]
struct BlobMeta {
    key: String,
    category: String,
    created: u64,
    ttl: u64,
    priority: i32,
}

impl From<&EntryMeta> for BlobMeta {
    fn from(meta: &EntryMeta) -> Self {
        Self {
            key: meta.key.clone(),
            category: meta.category.clone(),
            created: meta.created,
            ttl: meta.ttl,
            priority: meta.priority,
        }
    }
}

struct CacheState {
    index: HashMap<String, EntryMeta>,
    stats: CacheStats,
}

struct StoreInner {
    config: CacheConfig,
    state: Mutex<CacheState>,
}

/// Disk-backed cache with TTL and priority/LRU eviction
pub struct CacheStore {
    inner: Arc<StoreInner>,
    shutdown_tx: broadcast::Sender<()>,
    sweeper: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl CacheStore {
    /// Open a store over the given directory, creating it if necessary,
    /// and start the background expiry sweeper.
    pub async fn open(config: CacheConfig) -> io::Result<Self> {
        fs::create_dir_all(&config.cache_dir).await?;

        let (index, stats) = index::load(&config.cache_dir).await;
        info!(dir = ?config.cache_dir, entries = index.len(), "Cache store opened");

        let inner = Arc::new(StoreInner {
            config,
            state: Mutex::new(CacheState { index, stats }),
        });

        let (shutdown_tx, _) = broadcast::channel(1);
        let store = Self {
            inner,
            shutdown_tx,
            sweeper: parking_lot::Mutex::new(None),
        };
        store.start_sweeper();
        Ok(store)
    }

    fn start_sweeper(&self) {
        let inner = Arc::clone(&self.inner);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let sweep_interval = self.inner.config.sweep_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        inner.sweep_expired().await;
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Cache sweeper stopping");
                        break;
                    }
                }
            }
        });

        *self.sweeper.lock() = Some(handle);
    }

    /// Store a value. Failures are logged and swallowed; the cache is
    /// best-effort and a failed put simply means a future miss.
    pub async fn put<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        category: &str,
        ttl: Duration,
        priority: i32,
    ) {
        if let Err(e) = self.inner.try_put(key, value, category, ttl, priority).await {
            warn!(key, category, error = %e, "Failed to store cache entry");
        }
    }

    /// Look up a value. Returns `None` on absence, TTL expiry (deleting
    /// the entry as a side effect), a missing blob (dropping the stale
    /// index entry), or any I/O failure.
    pub async fn get<T: DeserializeOwned>(&self, key: &str, category: &str) -> Option<T> {
        self.inner.get(key, category).await
    }

    /// Remove one entry. Returns whether an indexed entry was removed.
    pub async fn delete(&self, key: &str, category: &str) -> bool {
        self.inner.delete(key, category).await
    }

    /// Remove every entry in `category`, or everything when `None`.
    pub async fn clear(&self, category: Option<&str>) {
        self.inner.clear(category).await;
    }

    /// Drop every entry whose TTL has elapsed, returning how many were
    /// removed. The background sweeper calls this every `sweep_interval`.
    pub async fn sweep_expired(&self) -> usize {
        self.inner.sweep_expired().await
    }

    /// Snapshot of counters, totals, and per-category usage.
    pub async fn stats(&self) -> CacheReport {
        self.inner.stats().await
    }

    /// Zero the global hit/miss counters.
    pub async fn reset_stats(&self) {
        self.inner.reset_stats().await;
    }

    /// Re-stat blob files to fix size drift, drop index entries whose
    /// blob has vanished, then run one expiry pass.
    pub async fn optimize(&self) {
        self.inner.optimize().await;
    }

    /// Stop the background sweeper and persist the index a final time.
    pub async fn close(&self) {
        let _ = self.shutdown_tx.send(());
        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let state = self.inner.state.lock().await;
        if let Err(e) =
            index::persist(&self.inner.config.cache_dir, &state.index, &state.stats).await
        {
            warn!(error = %e, "Failed to persist cache index on close");
        }
        info!("Cache store closed");
    }
}

impl StoreInner {
    fn blob_path(&self, filename: &str) -> PathBuf {
        self.config.cache_dir.join(format!("{filename}.cache"))
    }

    async fn persist_locked(&self, state: &CacheState) {
        if let Err(e) = index::persist(&self.config.cache_dir, &state.index, &state.stats).await {
            warn!(error = %e, "Failed to persist cache index");
        }
    }

    async fn remove_blob(&self, filename: &str) {
        let path = self.blob_path(filename);
        if let Err(e) = fs::remove_file(&path).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = ?path, error = %e, "Failed to remove cache blob");
            }
        }
    }

    async fn try_put<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        category: &str,
        ttl: Duration,
        priority: i32,
    ) -> io::Result<()> {
        let cache_key = CacheKey::new(key, category);
        let filename = cache_key.to_filename();

        let mut meta = EntryMeta::new(&cache_key, ttl, priority);
        let blob = Blob {
            value: serde_json::to_value(value)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
            metadata: BlobMeta::from(&meta),
        };
        let bytes = serde_json::to_vec(&blob)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        meta.size = bytes.len() as u64;

        let mut state = self.state.lock().await;

        // Blob reaches disk (fsynced) before the index references it.
        let path = self.blob_path(&filename);
        let tmp_path = path.with_extension("cache.tmp");
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        if let Err(e) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e);
        }

        state.index.insert(filename, meta);
        index::persist(&self.config.cache_dir, &state.index, &state.stats).await?;
        debug!(key, category, "Cache entry stored");

        if total_size(&state.index) > self.config.max_size_bytes() {
            self.evict_locked(&mut state).await;
        }

        Ok(())
    }

    async fn get<T: DeserializeOwned>(&self, key: &str, category: &str) -> Option<T> {
        let cache_key = CacheKey::new(key, category);
        let filename = cache_key.to_filename();

        let mut state = self.state.lock().await;
        state.stats.total_requests += 1;

        let now = now_millis();
        let expired = match state.index.get(&filename) {
            None => {
                state.stats.misses += 1;
                return None;
            }
            Some(meta) => meta.is_expired(now),
        };

        if expired {
            state.index.remove(&filename);
            self.remove_blob(&filename).await;
            self.persist_locked(&state).await;
            state.stats.misses += 1;
            debug!(key, category, "Cache entry expired");
            return None;
        }

        let bytes = match fs::read(self.blob_path(&filename)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // Index pointed at a blob that is gone; drop the stale entry.
                state.index.remove(&filename);
                self.persist_locked(&state).await;
                state.stats.misses += 1;
                warn!(key, category, "Stale index entry removed, blob missing");
                return None;
            }
            Err(e) => {
                state.stats.misses += 1;
                warn!(key, category, error = %e, "Failed to read cache blob");
                return None;
            }
        };

        let blob: Blob = match serde_json::from_slice(&bytes) {
            Ok(blob) => blob,
            Err(e) => {
                state.index.remove(&filename);
                self.remove_blob(&filename).await;
                self.persist_locked(&state).await;
                state.stats.misses += 1;
                warn!(key, category, error = %e, "Corrupt cache blob removed");
                return None;
            }
        };

        let value = match serde_json::from_value(blob.value) {
            Ok(value) => value,
            Err(e) => {
                state.stats.misses += 1;
                warn!(key, category, error = %e, "Cache blob has unexpected payload type");
                return None;
            }
        };

        if let Some(meta) = state.index.get_mut(&filename) {
            meta.access_count += 1;
            meta.last_access = now;
        }
        state.stats.hits += 1;
        debug!(key, category, "Cache hit");
        Some(value)
    }

    async fn delete(&self, key: &str, category: &str) -> bool {
        let filename = CacheKey::new(key, category).to_filename();

        let mut state = self.state.lock().await;
        let existed = state.index.remove(&filename).is_some();
        self.remove_blob(&filename).await;
        if existed {
            self.persist_locked(&state).await;
            debug!(key, category, "Cache entry deleted");
        }
        existed
    }

    async fn clear(&self, category: Option<&str>) {
        let mut state = self.state.lock().await;

        let to_remove: Vec<String> = state
            .index
            .iter()
            .filter(|(_, meta)| category.is_none_or(|c| meta.category == c))
            .map(|(filename, _)| filename.clone())
            .collect();

        for filename in &to_remove {
            state.index.remove(filename);
            self.remove_blob(filename).await;
        }

        self.persist_locked(&state).await;
        info!(
            count = to_remove.len(),
            category = category.unwrap_or("all"),
            "Cache cleared"
        );
    }

    async fn sweep_expired(&self) -> usize {
        let mut state = self.state.lock().await;
        let now = now_millis();

        let expired: Vec<String> = state
            .index
            .iter()
            .filter(|(_, meta)| meta.is_expired(now))
            .map(|(filename, _)| filename.clone())
            .collect();

        for filename in &expired {
            state.index.remove(filename);
            self.remove_blob(filename).await;
        }

        if !expired.is_empty() {
            self.persist_locked(&state).await;
            info!(count = expired.len(), "Swept expired cache entries");
        }
        expired.len()
    }

    /// Evict lowest-priority, least-recently-used entries until total
    /// size is back under 80% of the budget. Caller holds the state lock.
    async fn evict_locked(&self, state: &mut CacheState) {
        let target = self.config.max_size_bytes() * 8 / 10;
        let mut total = total_size(&state.index);

        let mut candidates: Vec<(String, i32, u64)> = state
            .index
            .iter()
            .map(|(filename, meta)| (filename.clone(), meta.priority, meta.last_access))
            .collect();
        candidates.sort_by_key(|(_, priority, last_access)| (*priority, *last_access));

        let mut evicted = 0usize;
        for (filename, ..) in candidates {
            if total <= target {
                break;
            }
            if let Some(meta) = state.index.remove(&filename) {
                total = total.saturating_sub(meta.size);
                self.remove_blob(&filename).await;
                state.stats.evictions += 1;
                evicted += 1;
                debug!(key = %meta.key, category = %meta.category, priority = meta.priority, "Evicted cache entry");
            }
        }

        if evicted > 0 {
            self.persist_locked(state).await;
            info!(count = evicted, remaining_bytes = total, "Cache eviction complete");
        }
    }

    async fn stats(&self) -> CacheReport {
        let state = self.state.lock().await;

        let mut categories: HashMap<String, CategoryUsage> = HashMap::new();
        for meta in state.index.values() {
            let usage = categories.entry(meta.category.clone()).or_default();
            usage.count += 1;
            usage.size += meta.size;
        }

        let hit_rate = if state.stats.total_requests > 0 {
            state.stats.hits as f64 / state.stats.total_requests as f64
        } else {
            0.0
        };

        CacheReport {
            total_items: state.index.len(),
            total_size_bytes: total_size(&state.index),
            max_size_bytes: self.config.max_size_bytes(),
            hit_rate,
            categories,
            counters: state.stats.clone(),
        }
    }

    async fn reset_stats(&self) {
        let mut state = self.state.lock().await;
        state.stats = CacheStats::default();
        self.persist_locked(&state).await;
    }

    async fn optimize(&self) {
        let mut state = self.state.lock().await;

        let filenames: Vec<String> = state.index.keys().cloned().collect();
        for filename in filenames {
            match fs::metadata(self.blob_path(&filename)).await {
                Ok(md) => {
                    if let Some(meta) = state.index.get_mut(&filename) {
                        meta.size = md.len();
                    }
                }
                Err(_) => {
                    state.index.remove(&filename);
                }
            }
        }

        let now = now_millis();
        let expired: Vec<String> = state
            .index
            .iter()
            .filter(|(_, meta)| meta.is_expired(now))
            .map(|(filename, _)| filename.clone())
            .collect();
        for filename in &expired {
            state.index.remove(filename);
            self.remove_blob(filename).await;
        }

        self.persist_locked(&state).await;
        info!("Cache optimization complete");
    }
}

fn total_size(index: &HashMap<String, EntryMeta>) -> u64 {
    index.values().map(|meta| meta.size).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &std::path::Path) -> CacheConfig {
        CacheConfig {
            cache_dir: dir.to_path_buf(),
            max_size_mb: 1,
            default_ttl: Duration::from_secs(3600),
            // Long enough that the sweeper never interferes with a test
            sweep_interval: Duration::from_secs(3600),
        }
    }

    #[tokio::test]
    async fn test_round_trip() {
        crate::test_support::init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(test_config(dir.path())).await.unwrap();

        store
            .put("greeting", &"hello world", "translations", Duration::from_secs(60), 0)
            .await;
        let value: Option<String> = store.get("greeting", "translations").await;
        assert_eq!(value.as_deref(), Some("hello world"));

        let report = store.stats().await;
        assert_eq!(report.counters.hits, 1);
        assert_eq!(report.counters.total_requests, 1);
        store.close().await;
    }

    #[tokio::test]
    async fn test_miss_on_absent_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(test_config(dir.path())).await.unwrap();

        let value: Option<String> = store.get("nope", "translations").await;
        assert!(value.is_none());

        let report = store.stats().await;
        assert_eq!(report.counters.misses, 1);
        store.close().await;
    }

    #[tokio::test]
    async fn test_ttl_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(test_config(dir.path())).await.unwrap();

        store
            .put("a", &"v1", "cat", Duration::from_secs(1), 0)
            .await;

        tokio::time::sleep(Duration::from_millis(500)).await;
        let fresh: Option<String> = store.get("a", "cat").await;
        assert_eq!(fresh.as_deref(), Some("v1"));

        tokio::time::sleep(Duration::from_millis(1000)).await;
        let stale: Option<String> = store.get("a", "cat").await;
        assert!(stale.is_none(), "entry must be absent after its TTL");

        // The expired entry was deleted, not just hidden.
        let report = store.stats().await;
        assert_eq!(report.total_items, 0);
        store.close().await;
    }

    #[tokio::test]
    async fn test_expired_get_returns_default_at_call_site() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(test_config(dir.path())).await.unwrap();

        store
            .put("a", &"v1", "cat", Duration::from_secs(1), 0)
            .await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        let value = store
            .get::<String>("a", "cat")
            .await
            .unwrap_or_else(|| "default".to_owned());
        assert_eq!(value, "default");
        store.close().await;
    }

    #[tokio::test]
    async fn test_eviction_by_priority_then_recency() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(test_config(dir.path())).await.unwrap();

        // Five ~400KB entries into a 1MB budget; each over-budget put
        // trims the total back under the 80% band (0.8MB), dropping the
        // lowest priorities first.
        let payload = "x".repeat(400 * 1024);
        for (key, priority) in [("p1", 1), ("p2", 2), ("p3", 3), ("p4", 4), ("p5", 5)] {
            store
                .put(key, &payload, "bulk", Duration::from_secs(3600), priority)
                .await;
        }

        let report = store.stats().await;
        assert!(report.total_size_bytes <= report.max_size_bytes * 8 / 10);
        assert!(report.counters.evictions >= 2);

        // Lowest priorities were evicted first.
        let p1: Option<String> = store.get("p1", "bulk").await;
        let p2: Option<String> = store.get("p2", "bulk").await;
        let p5: Option<String> = store.get("p5", "bulk").await;
        assert!(p1.is_none());
        assert!(p2.is_none());
        assert!(p5.is_some());
        store.close().await;
    }

    #[tokio::test]
    async fn test_stale_index_entry_becomes_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(test_config(dir.path())).await.unwrap();

        store
            .put("k", &"v", "cat", Duration::from_secs(60), 0)
            .await;

        // Remove the blob behind the store's back.
        let filename = CacheKey::new("k", "cat").to_filename();
        std::fs::remove_file(dir.path().join(format!("{filename}.cache"))).unwrap();

        let value: Option<String> = store.get("k", "cat").await;
        assert!(value.is_none());

        let report = store.stats().await;
        assert_eq!(report.total_items, 0, "stale entry must be dropped");
        store.close().await;
    }

    #[tokio::test]
    async fn test_delete_and_clear_by_category() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(test_config(dir.path())).await.unwrap();

        store.put("a", &"1", "one", Duration::from_secs(60), 0).await;
        store.put("b", &"2", "one", Duration::from_secs(60), 0).await;
        store.put("c", &"3", "two", Duration::from_secs(60), 0).await;

        assert!(store.delete("a", "one").await);
        assert!(!store.delete("a", "one").await);

        store.clear(Some("one")).await;
        let b: Option<String> = store.get("b", "one").await;
        let c: Option<String> = store.get("c", "two").await;
        assert!(b.is_none());
        assert!(c.is_some());

        store.clear(None).await;
        assert_eq!(store.stats().await.total_items, 0);
        store.close().await;
    }

    #[tokio::test]
    async fn test_sweep_removes_unread_expired_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(test_config(dir.path())).await.unwrap();

        store
            .put("short", &"v", "cat", Duration::from_secs(1), 0)
            .await;
        store
            .put("long", &"v", "cat", Duration::from_secs(3600), 0)
            .await;

        tokio::time::sleep(Duration::from_secs(2)).await;
        let removed = store.sweep_expired().await;
        assert_eq!(removed, 1);
        assert_eq!(store.stats().await.total_items, 1);
        store.close().await;
    }

    #[tokio::test]
    async fn test_reopen_preserves_entries_and_stats() {
        let dir = tempfile::tempdir().unwrap();

        let store = CacheStore::open(test_config(dir.path())).await.unwrap();
        store
            .put("persisted", &"value", "cat", Duration::from_secs(3600), 0)
            .await;
        let _: Option<String> = store.get("persisted", "cat").await;
        store.close().await;

        let reopened = CacheStore::open(test_config(dir.path())).await.unwrap();
        let value: Option<String> = reopened.get("persisted", "cat").await;
        assert_eq!(value.as_deref(), Some("value"));

        let report = reopened.stats().await;
        assert!(report.counters.hits >= 2);
        reopened.close().await;
    }

    #[tokio::test]
    async fn test_optimize_drops_vanished_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(test_config(dir.path())).await.unwrap();

        store.put("a", &"1", "cat", Duration::from_secs(60), 0).await;
        store.put("b", &"2", "cat", Duration::from_secs(60), 0).await;

        let filename = CacheKey::new("a", "cat").to_filename();
        std::fs::remove_file(dir.path().join(format!("{filename}.cache"))).unwrap();

        store.optimize().await;
        assert_eq!(store.stats().await.total_items, 1);
        store.close().await;
    }
}
