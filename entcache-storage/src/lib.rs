//! entcache Storage - Versioned Cache Backends
//!
//! Defines the [`Cache`] contract the interceptor depends on and three
//! backends that honour it:
//!
//! - [`RedisCache`]: the reference store, one sorted set per key on a pooled
//!   Redis connection.
//! - [`LmdbCache`]: a local memory-mapped store for single-host deployments.
//! - [`MemoryCache`]: an in-process store keeping full version history.
//!
//! All three share the same guarantees: the highest version ever written for
//! a key is the one readers see, a delete erases every version, and keys
//! under a reserved project or namespace are skipped item by item.

pub mod lmdb_backend;
pub mod memory;
pub mod redis_backend;
pub mod traits;

pub use lmdb_backend::{LmdbCache, LmdbCacheError, LmdbConfig};
pub use memory::MemoryCache;
pub use redis_backend::{RedisCache, RedisConfig};
pub use traits::{Cache, CacheResult};
