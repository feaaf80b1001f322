//! In-process versioned cache.
//!
//! Keeps the full version history of every slot, so it doubles as a
//! reference model of the versioned-store semantics in tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use entcache_core::{CacheError, Entity, EntityKey, EntityResult};

use crate::traits::{plan_slots, Cache, CacheResult};

/// Version history of one slot, ordered by version.
type History = BTreeMap<u64, Vec<u8>>;

/// Versioned cache held in process memory.
///
/// Each call takes the lock once, so a multi-key write is never observed
/// half-applied.
#[derive(Debug, Default)]
pub struct MemoryCache {
    slots: RwLock<HashMap<String, History>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of slots currently holding at least one version.
    pub fn slot_count(&self) -> usize {
        self.slots.read().map(|slots| slots.len()).unwrap_or(0)
    }

    /// Number of versions stored for a key.
    pub fn history_len(&self, project_id: &str, key: &EntityKey) -> usize {
        let Some(slot) = entcache_core::slot_key(project_id, key) else {
            return 0;
        };
        self.slots
            .read()
            .ok()
            .and_then(|slots| slots.get(&slot).map(|history| history.len()))
            .unwrap_or(0)
    }

    pub fn clear(&self) {
        if let Ok(mut slots) = self.slots.write() {
            slots.clear();
        }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get_multi(
        &self,
        project_id: &str,
        keys: &[EntityKey],
    ) -> CacheResult<Vec<Option<EntityResult>>> {
        let slots = self.slots.read().map_err(|_| CacheError::LockPoisoned)?;

        Ok(plan_slots(project_id, keys)
            .into_iter()
            .zip(keys)
            .map(|(slot, key)| {
                let history = slots.get(&slot?)?;
                let (version, payload) = history.last_key_value()?;
                Some(EntityResult::new(
                    Entity::new(key.clone(), payload.clone()),
                    *version,
                ))
            })
            .collect())
    }

    async fn set_multi(&self, project_id: &str, items: &[EntityResult]) -> CacheResult<()> {
        let mut slots = self.slots.write().map_err(|_| CacheError::LockPoisoned)?;

        for item in items {
            let Some(slot) = entcache_core::slot_key(project_id, item.key()) else {
                continue;
            };
            slots
                .entry(slot)
                .or_default()
                .insert(item.version, item.entity.payload.clone());
        }

        Ok(())
    }

    async fn delete_multi(&self, project_id: &str, keys: &[EntityKey]) -> CacheResult<()> {
        let mut slots = self.slots.write().map_err(|_| CacheError::LockPoisoned)?;

        for slot in plan_slots(project_id, keys).into_iter().flatten() {
            slots.remove(&slot);
        }

        Ok(())
    }
}
