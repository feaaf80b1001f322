//! LMDB-backed versioned cache.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep cached snapshots in a
//! memory-mapped file that survives process restarts.
//!
//! # Entry Layout
//!
//! Each slot stores only the winning snapshot:
//!
//! ```text
//! [version: 8 bytes, big-endian][payload]
//! ```
//!
//! A write replaces the stored entry only when its version is at least the
//! stored one. Since a slot is removed wholesale on delete, this is
//! observably identical to keeping the whole history and reading its maximum.
//!
//! # Atomicity
//!
//! Every `get_multi` runs in one read transaction and every `set_multi` or
//! `delete_multi` in one write transaction. A failed write drops the
//! transaction, which aborts all of its sub-operations.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use entcache_core::{CacheError, Entity, EntityKey, EntityResult};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use crate::traits::{decode_entry, encode_entry, plan_slots, Cache, CacheResult};

/// Error type for opening an LMDB cache.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for CacheError {
    fn from(e: LmdbCacheError) -> Self {
        CacheError::Lmdb {
            reason: e.to_string(),
        }
    }
}

fn lmdb_error(e: heed::Error) -> CacheError {
    CacheError::Lmdb {
        reason: e.to_string(),
    }
}

/// Location and size of an LMDB cache.
#[derive(Debug, Clone)]
pub struct LmdbConfig {
    /// Directory where LMDB files will be stored.
    pub path: PathBuf,
    /// Maximum size of the memory map in megabytes.
    pub max_size_mb: usize,
}

impl LmdbConfig {
    pub fn new(path: impl AsRef<Path>, max_size_mb: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_size_mb,
        }
    }
}

/// Versioned cache stored in LMDB.
///
/// # Example
///
/// ```ignore
/// use entcache_storage::{Cache, LmdbCache, LmdbConfig};
///
/// let cache = LmdbCache::open(&LmdbConfig::new("/tmp/entcache", 64))?;
/// cache.set_multi("my-project", &found).await?;
/// let items = cache.get_multi("my-project", &keys).await?;
/// ```
pub struct LmdbCache {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl LmdbCache {
    /// Open (or create) the cache described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, or the LMDB
    /// environment or database cannot be opened.
    pub fn open(config: &LmdbConfig) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&config.path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(config.max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(&config.path)
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(Self { env, db })
    }

    /// Number of slots stored.
    pub fn slot_count(&self) -> CacheResult<u64> {
        let rtxn = self.env.read_txn().map_err(lmdb_error)?;
        self.db.len(&rtxn).map_err(lmdb_error)
    }
}

#[async_trait]
impl Cache for LmdbCache {
    async fn get_multi(
        &self,
        project_id: &str,
        keys: &[EntityKey],
    ) -> CacheResult<Vec<Option<EntityResult>>> {
        let rtxn = self.env.read_txn().map_err(lmdb_error)?;

        let mut items = Vec::with_capacity(keys.len());
        for (slot, key) in plan_slots(project_id, keys).into_iter().zip(keys) {
            let Some(slot) = slot else {
                items.push(None);
                continue;
            };
            let item = match self.db.get(&rtxn, slot.as_bytes()).map_err(lmdb_error)? {
                Some(bytes) => {
                    let (version, payload) = decode_entry(&slot, bytes)?;
                    Some(EntityResult::new(
                        Entity::new(key.clone(), payload.to_vec()),
                        version,
                    ))
                }
                None => None,
            };
            items.push(item);
        }

        Ok(items)
    }

    async fn set_multi(&self, project_id: &str, items: &[EntityResult]) -> CacheResult<()> {
        let mut wtxn = self.env.write_txn().map_err(lmdb_error)?;

        for item in items {
            let Some(slot) = entcache_core::slot_key(project_id, item.key()) else {
                continue;
            };

            let stored = match self.db.get(&wtxn, slot.as_bytes()).map_err(lmdb_error)? {
                Some(bytes) => Some(decode_entry(&slot, bytes)?.0),
                None => None,
            };
            if stored.is_some_and(|stored| stored > item.version) {
                continue;
            }

            let entry = encode_entry(item.version, &item.entity.payload);
            self.db
                .put(&mut wtxn, slot.as_bytes(), &entry)
                .map_err(lmdb_error)?;
        }

        wtxn.commit().map_err(lmdb_error)
    }

    async fn delete_multi(&self, project_id: &str, keys: &[EntityKey]) -> CacheResult<()> {
        let mut wtxn = self.env.write_txn().map_err(lmdb_error)?;

        for slot in plan_slots(project_id, keys).into_iter().flatten() {
            self.db
                .delete(&mut wtxn, slot.as_bytes())
                .map_err(lmdb_error)?;
        }

        wtxn.commit().map_err(lmdb_error)
    }
}
