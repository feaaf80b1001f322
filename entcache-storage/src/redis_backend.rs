//! Redis-backed versioned cache.
//!
//! Each slot is a sorted set. A member is `[version: 8 bytes BE][payload]`,
//! scored by the version. `ZREVRANGE slot 0 0` reads the highest version, so
//! the order in which lookups populate a slot does not matter. `DEL` drops the
//! whole sorted set, so a late lower-version write cannot bring back a
//! snapshot that was explicitly invalidated.
//!
//! Scores are IEEE doubles and collapse neighbouring versions above 2^53.
//! The exact version lives in the member prefix: members with equal scores
//! sort by their bytes, so the higher version still comes first, and the
//! version read back is the prefix, never the score.
//!
//! All commands issued by one call go through a single pooled connection as
//! one `MULTI`/`EXEC` pipeline.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfigBuilder, Pool, PoolConfig, Runtime};
use entcache_core::{CacheError, ConfigError, Entity, EntityKey, EntityResult};

use crate::traits::{decode_entry, encode_entry, plan_slots, Cache, CacheResult};

/// Redis connection pool configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
    /// Maximum pool size
    pub max_size: usize,
    /// How long a call waits for a free connection; `None` waits until one
    /// frees up, leaving the bound to the caller's deadline
    pub timeout: Option<Duration>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            max_size: 16,
            timeout: None,
        }
    }
}

impl RedisConfig {
    /// Create a configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("ENTCACHE_REDIS_URL").unwrap_or(defaults.url),
            max_size: std::env::var("ENTCACHE_REDIS_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_size),
            timeout: std::env::var("ENTCACHE_REDIS_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .or(defaults.timeout),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> Result<Pool, ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "ENTCACHE_REDIS_URL".to_string(),
            });
        }

        let mut cfg = PoolConfigBuilder::from_url(self.url.clone());
        let mut pool = PoolConfig::new(self.max_size);
        pool.timeouts.wait = self.timeout;
        cfg.pool = Some(pool);

        cfg.create_pool(Some(Runtime::Tokio1))
            .map_err(|e| ConfigError::InvalidValue {
                field: "ENTCACHE_REDIS_URL".to_string(),
                value: self.url.clone(),
                reason: e.to_string(),
            })
    }
}

/// Versioned cache on a pooled Redis connection.
///
/// The pool is owned by the cache instance; several caches may share one by
/// cloning the pool handle.
#[derive(Clone)]
pub struct RedisCache {
    pool: Pool,
}

impl RedisCache {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &RedisConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.create_pool()?))
    }

    /// Current number of pooled connections.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    /// Run `pipe` as one `MULTI`/`EXEC` transaction on a pooled connection.
    async fn exec<T: redis::FromRedisValue>(&self, pipe: &redis::Pipeline) -> CacheResult<T> {
        let mut conn = self.pool.get().await.map_err(|e| CacheError::Pool {
            reason: e.to_string(),
        })?;
        pipe.query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Redis {
                reason: e.to_string(),
            })
    }
}

/// Build the read pipeline; only resolvable slots are queried.
fn read_pipeline(slots: &[Option<String>]) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic();
    for slot in slots.iter().flatten() {
        pipe.cmd("ZREVRANGE").arg(slot).arg(0).arg(0);
    }
    pipe
}

/// Build the write pipeline and report how many commands it holds.
fn write_pipeline(project_id: &str, items: &[EntityResult]) -> (redis::Pipeline, usize) {
    let mut pipe = redis::pipe();
    pipe.atomic();
    let mut queued = 0;
    for item in items {
        let Some(slot) = entcache_core::slot_key(project_id, item.key()) else {
            continue;
        };
        pipe.cmd("ZADD")
            .arg(&slot)
            .arg(item.version)
            .arg(encode_entry(item.version, &item.entity.payload))
            .ignore();
        queued += 1;
    }
    (pipe, queued)
}

fn delete_pipeline(slots: &[Option<String>]) -> (redis::Pipeline, usize) {
    let mut pipe = redis::pipe();
    pipe.atomic();
    let mut queued = 0;
    for slot in slots.iter().flatten() {
        pipe.cmd("DEL").arg(slot).ignore();
        queued += 1;
    }
    (pipe, queued)
}

/// Spread the per-slot replies back over the original key positions.
fn align_replies(
    keys: &[EntityKey],
    slots: &[Option<String>],
    replies: Vec<Vec<Vec<u8>>>,
) -> CacheResult<Vec<Option<EntityResult>>> {
    let queried = slots.iter().filter(|slot| slot.is_some()).count();
    if replies.len() != queried {
        return Err(CacheError::Redis {
            reason: format!("expected {} replies, got {}", queried, replies.len()),
        });
    }

    let mut replies = replies.into_iter();
    let mut items = Vec::with_capacity(keys.len());
    for (key, slot) in keys.iter().zip(slots) {
        let Some(slot) = slot else {
            items.push(None);
            continue;
        };
        let Some(member) = replies.next().and_then(|members| members.into_iter().next()) else {
            items.push(None);
            continue;
        };
        let (version, payload) = decode_entry(slot, &member)?;
        items.push(Some(EntityResult::new(
            Entity::new(key.clone(), payload.to_vec()),
            version,
        )));
    }
    Ok(items)
}

#[async_trait]
impl Cache for RedisCache {
    async fn get_multi(
        &self,
        project_id: &str,
        keys: &[EntityKey],
    ) -> CacheResult<Vec<Option<EntityResult>>> {
        let slots = plan_slots(project_id, keys);
        if slots.iter().all(Option::is_none) {
            return Ok(vec![None; keys.len()]);
        }

        let replies: Vec<Vec<Vec<u8>>> = self.exec(&read_pipeline(&slots)).await?;
        let items = align_replies(keys, &slots, replies)?;
        tracing::debug!(
            project_id,
            keys = keys.len(),
            hits = items.iter().filter(|item| item.is_some()).count(),
            "redis get_multi"
        );
        Ok(items)
    }

    async fn set_multi(&self, project_id: &str, items: &[EntityResult]) -> CacheResult<()> {
        let (pipe, queued) = write_pipeline(project_id, items);
        if queued == 0 {
            return Ok(());
        }
        self.exec::<()>(&pipe).await?;
        tracing::debug!(project_id, items = queued, "redis set_multi");
        Ok(())
    }

    async fn delete_multi(&self, project_id: &str, keys: &[EntityKey]) -> CacheResult<()> {
        let slots = plan_slots(project_id, keys);
        let (pipe, queued) = delete_pipeline(&slots);
        if queued == 0 {
            return Ok(());
        }
        self.exec::<()>(&pipe).await?;
        tracing::debug!(project_id, keys = queued, "redis delete_multi");
        Ok(())
    }
}
