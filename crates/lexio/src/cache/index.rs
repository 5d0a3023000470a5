//! # Cache Index Persistence
//!
//! The index file is the durable source of truth for which entries exist.
//! It is always swapped in atomically (write-new-file-then-rename) so a
//! crash mid-write can never leave a truncated index behind, and it is
//! only persisted after the blob it references is already on disk.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::types::{CacheStats, EntryMeta, now_millis};

pub(crate) const INDEX_FILE: &str = "index.json";

#[derive(Debug, Default, Deserialize)]
struct IndexDoc {
    #[serde(default)]
    index: HashMap<String, EntryMeta>,
    #[serde(default)]
    stats: CacheStats,
    #[allow(dead_code)]
    #[serde(default)]
    timestamp: u64,
}

#[derive(Serialize)]
struct IndexDocRef<'a> {
    index: &'a HashMap<String, EntryMeta>,
    stats: &'a CacheStats,
    timestamp: u64,
}

fn index_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join(INDEX_FILE)
}

/// Load the index from disk. A missing or unreadable index degrades to an
/// empty one; the cache then repopulates from scratch.
pub(crate) async fn load(cache_dir: &Path) -> (HashMap<String, EntryMeta>, CacheStats) {
    let path = index_path(cache_dir);

    let bytes = match fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = ?path, "No cache index found, starting empty");
            return (HashMap::new(), CacheStats::default());
        }
        Err(e) => {
            warn!(path = ?path, error = %e, "Failed to read cache index, starting empty");
            return (HashMap::new(), CacheStats::default());
        }
    };

    match serde_json::from_slice::<IndexDoc>(&bytes) {
        Ok(doc) => {
            debug!(entries = doc.index.len(), "Loaded cache index");
            (doc.index, doc.stats)
        }
        Err(e) => {
            warn!(path = ?path, error = %e, "Failed to parse cache index, starting empty");
            (HashMap::new(), CacheStats::default())
        }
    }
}

/// Persist the whole index atomically.
pub(crate) async fn persist(
    cache_dir: &Path,
    index: &HashMap<String, EntryMeta>,
    stats: &CacheStats,
) -> io::Result<()> {
    let doc = IndexDocRef {
        index,
        stats,
        timestamp: now_millis(),
    };

    let json = serde_json::to_vec_pretty(&doc)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let path = index_path(cache_dir);
    let tmp_path = path.with_extension("json.tmp");

    let mut file = fs::File::create(&tmp_path).await?;
    file.write_all(&json).await?;
    file.sync_all().await?;
    drop(file);

    if let Err(e) = fs::rename(&tmp_path, &path).await {
        warn!(from = ?tmp_path, to = ?path, error = %e, "Failed to swap in cache index");
        let _ = fs::remove_file(&tmp_path).await;
        return Err(e);
    }

    Ok(())
}
