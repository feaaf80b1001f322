//! The cache contract consumed by the interceptor.

use std::sync::Arc;

use async_trait::async_trait;
use entcache_core::{CacheError, EntityKey, EntityResult};

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Bulk cache of versioned entity snapshots.
///
/// # Contract
///
/// - `get_multi` returns exactly `keys.len()` results, position-aligned with
///   `keys`; `None` is a miss. Reserved or unresolvable keys are misses.
/// - For any key, the visible entry is the one with the highest version ever
///   stored, whatever order the writes arrived in.
/// - `set_multi` is all-or-nothing per call.
/// - `delete_multi` removes every version of a key and is idempotent:
///   deleting an absent key succeeds.
///
/// Implementations report an unreachable store as an error rather than as an
/// all-miss result; the interceptor decides how to degrade.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Fetch the latest cached snapshot for each key.
    async fn get_multi(
        &self,
        project_id: &str,
        keys: &[EntityKey],
    ) -> CacheResult<Vec<Option<EntityResult>>>;

    /// Store snapshots, each under its entity key and version.
    async fn set_multi(&self, project_id: &str, items: &[EntityResult]) -> CacheResult<()>;

    /// Drop every cached version of each key.
    async fn delete_multi(&self, project_id: &str, keys: &[EntityKey]) -> CacheResult<()>;
}

#[async_trait]
impl<C: Cache + ?Sized> Cache for Arc<C> {
    async fn get_multi(
        &self,
        project_id: &str,
        keys: &[EntityKey],
    ) -> CacheResult<Vec<Option<EntityResult>>> {
        (**self).get_multi(project_id, keys).await
    }

    async fn set_multi(&self, project_id: &str, items: &[EntityResult]) -> CacheResult<()> {
        (**self).set_multi(project_id, items).await
    }

    async fn delete_multi(&self, project_id: &str, keys: &[EntityKey]) -> CacheResult<()> {
        (**self).delete_multi(project_id, keys).await
    }
}

/// Resolve the storage slot of every key, keeping positions.
pub(crate) fn plan_slots(project_id: &str, keys: &[EntityKey]) -> Vec<Option<String>> {
    keys.iter()
        .map(|key| entcache_core::slot_key(project_id, key))
        .collect()
}

/// Width of the version prefix in a stored entry.
pub(crate) const VERSION_LEN: usize = 8;

/// Stored entry for the byte-oriented backends: `[version: 8 bytes BE][payload]`.
///
/// Big-endian keeps byte order equal to version order.
pub(crate) fn encode_entry(version: u64, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(VERSION_LEN + payload.len());
    bytes.extend_from_slice(&version.to_be_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

/// Split a stored entry into its version and payload.
pub(crate) fn decode_entry<'a>(slot: &str, bytes: &'a [u8]) -> CacheResult<(u64, &'a [u8])> {
    if bytes.len() < VERSION_LEN {
        return Err(CacheError::Codec {
            slot: slot.to_string(),
            reason: format!("entry shorter than {} bytes", VERSION_LEN),
        });
    }
    let (prefix, payload) = bytes.split_at(VERSION_LEN);
    let mut version = [0u8; VERSION_LEN];
    version.copy_from_slice(prefix);
    Ok((u64::from_be_bytes(version), payload))
}
