//! # Cache Types
//!
//! This module defines common types used across the caching system.

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Milliseconds since the unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Cache key identifying one entry inside a category namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Namespace the entry belongs to
    pub category: String,
    /// Raw caller-chosen key
    pub key: String,
}

impl CacheKey {
    /// Create a new cache key
    pub fn new(key: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            key: key.into(),
        }
    }

    /// Convert to a filename-safe string, unique per (category, key)
    pub fn to_filename(&self) -> String {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(self.category.as_bytes());
        hasher.update(b":");
        hasher.update(self.key.as_bytes());

        let hash = hasher.finalize();
        format!("{}_{}", self.category, hex::encode(hash))
    }
}

/// Index metadata for a cached entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMeta {
    /// Raw caller-chosen key
    pub key: String,
    /// Namespace the entry belongs to
    pub category: String,
    /// Size of the blob file in bytes
    pub size: u64,
    /// Creation time in milliseconds since the unix epoch
    pub created: u64,
    /// Time-to-live in seconds
    pub ttl: u64,
    /// Eviction priority, lower evicted first
    pub priority: i32,
    /// Number of hits served from this entry
    pub access_count: u64,
    /// Last hit time in milliseconds since the unix epoch
    pub last_access: u64,
}

impl EntryMeta {
    pub(crate) fn new(cache_key: &CacheKey, ttl: Duration, priority: i32) -> Self {
        let now = now_millis();
        Self {
            key: cache_key.key.clone(),
            category: cache_key.category.clone(),
            size: 0,
            created: now,
            ttl: ttl.as_secs(),
            priority,
            access_count: 0,
            last_access: now,
        }
    }

    /// Check whether the entry's TTL has elapsed
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.created) > self.ttl.saturating_mul(1000)
    }
}

/// Global hit/miss counters, persisted with the index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub total_requests: u64,
}

/// Per-category usage inside a stats report
#[derive(Debug, Clone, Default)]
pub struct CategoryUsage {
    pub count: usize,
    pub size: u64,
}

/// Point-in-time view of the cache, for diagnostics display
#[derive(Debug, Clone)]
pub struct CacheReport {
    pub total_items: usize,
    pub total_size_bytes: u64,
    pub max_size_bytes: u64,
    /// Hits over total requests, 0.0 when nothing was requested yet
    pub hit_rate: f64,
    pub categories: std::collections::HashMap<String, CategoryUsage>,
    pub counters: CacheStats,
}

/// Configuration for the cache system
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding the index file and entry blobs
    pub cache_dir: PathBuf,
    /// Size budget; exceeding it triggers eviction down to 80%
    pub max_size_mb: u64,
    /// TTL applied by callers that do not choose one explicitly
    pub default_ttl: Duration,
    /// Interval between background expiry sweeps
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("cache"),
            max_size_mb: 200,
            default_ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(300),
        }
    }
}

impl CacheConfig {
    pub(crate) fn max_size_bytes(&self) -> u64 {
        self.max_size_mb * 1024 * 1024
    }
}
