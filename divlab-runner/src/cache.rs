//! Result cache keyed by run fingerprint.
//!
//! Entries are shared as `Arc<SearchOutcome>` and never handed out mutably.
//! Callers that need to adapt a cached outcome take a private copy with
//! [`ResultCache::get_owned`]. An optional directory persists entries as JSON
//! so later processes can reuse them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::debug;

use crate::runner::SCHEMA_VERSION;
use crate::search::SearchOutcome;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cache entry JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cached entry has schema version {found} (max supported: {supported})")]
    SchemaVersion { found: u32, supported: u32 },
}

/// Cache key for a search: dataset, result-determining config, split, and the
/// probability source's content fingerprint.
pub fn cache_key(
    dataset_hash: &str,
    config_fingerprint: &str,
    manifest_hash: &str,
    source_fingerprint: &str,
) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in [dataset_hash, config_fingerprint, manifest_hash, source_fingerprint] {
        hasher.update(part.as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize().to_hex().to_string()
}

/// In-memory cache with optional JSON persistence.
#[derive(Debug, Default)]
pub struct ResultCache {
    dir: Option<PathBuf>,
    entries: RwLock<HashMap<String, Arc<SearchOutcome>>>,
}

impl ResultCache {
    /// Memory-only cache.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Cache backed by `dir`; created if missing.
    pub fn with_dir(dir: impl AsRef<Path>) -> Result<Self, CacheError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|source| io_error(&dir, source))?;
        Ok(Self {
            dir: Some(dir),
            entries: RwLock::default(),
        })
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Shared, immutable view of a cached outcome.
    ///
    /// Falls back to the on-disk entry, which is then kept in memory.
    pub fn get(&self, key: &str) -> Result<Option<Arc<SearchOutcome>>, CacheError> {
        if let Some(hit) = self.read_entries().get(key) {
            return Ok(Some(Arc::clone(hit)));
        }
        let Some(outcome) = self.load_file(key)? else {
            return Ok(None);
        };
        debug!(key, "cache hit on disk");
        let shared = Arc::new(outcome);
        self.write_entries()
            .insert(key.to_string(), Arc::clone(&shared));
        Ok(Some(shared))
    }

    /// Private deep copy, safe to modify.
    pub fn get_owned(&self, key: &str) -> Result<Option<SearchOutcome>, CacheError> {
        Ok(self.get(key)?.map(|shared| (*shared).clone()))
    }

    pub fn put(&self, outcome: SearchOutcome) -> Result<Arc<SearchOutcome>, CacheError> {
        let key = outcome.cache_key.clone();
        if let Some(path) = self.entry_path(&key) {
            let json = serde_json::to_string_pretty(&outcome)?;
            std::fs::write(&path, json).map_err(|source| io_error(&path, source))?;
        }
        let shared = Arc::new(outcome);
        self.write_entries().insert(key, Arc::clone(&shared));
        Ok(shared)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read_entries().contains_key(key)
            || self.entry_path(key).is_some_and(|p| p.exists())
    }

    pub fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.write_entries().remove(key);
        if let Some(path) = self.entry_path(key) {
            if path.exists() {
                std::fs::remove_file(&path).map_err(|source| io_error(&path, source))?;
            }
        }
        Ok(())
    }

    /// Entries currently held in memory.
    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn load_file(&self, key: &str) -> Result<Option<SearchOutcome>, CacheError> {
        let Some(path) = self.entry_path(key) else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&path).map_err(|source| io_error(&path, source))?;
        let outcome: SearchOutcome = serde_json::from_str(&json)?;
        if outcome.schema_version > SCHEMA_VERSION {
            return Err(CacheError::SchemaVersion {
                found: outcome.schema_version,
                supported: SCHEMA_VERSION,
            });
        }
        Ok(Some(outcome))
    }

    fn entry_path(&self, key: &str) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join(format!("{key}.json")))
    }

    // A poisoned lock only means another reader panicked; the map itself
    // holds immutable Arcs and is still consistent.
    fn read_entries(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<SearchOutcome>>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_entries(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<SearchOutcome>>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn io_error(path: &Path, source: std::io::Error) -> CacheError {
    CacheError::Io {
        path: path.display().to_string(),
        source,
    }
}
