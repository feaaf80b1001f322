//! entcache Middleware - Transparent Caching for Entity-Store RPCs
//!
//! [`CacheInterceptor`] sits between an application and its entity-store
//! client. Lookups are served from a versioned [`Cache`] where possible and
//! the misses are fetched and written back; commits invalidate the mutated
//! keys around the backend write. Calls it does not understand are passed
//! through untouched.
//!
//! ```ignore
//! let cache = Arc::new(RedisCache::from_config(&RedisConfig::from_env())?);
//! let interceptor = CacheInterceptor::with_config(cache, MiddlewareConfig::from_env()?)
//!     .with_sink(TracingSink);
//! let client = CachedClient::new(store_client, interceptor);
//!
//! let response = client.lookup(&CallContext::new(), LookupRequest::new(project, keys)).await?;
//! ```
//!
//! [`Cache`]: entcache_storage::Cache

pub mod client;
pub mod context;
pub mod diagnostics;
pub mod interceptor;
pub mod invoker;
pub mod query;
pub mod resolver;

pub use client::CachedClient;
pub use context::CallContext;
pub use diagnostics::{CacheEvent, DiagnosticSink, NoopSink, TracingSink};
pub use interceptor::CacheInterceptor;
pub use invoker::Invoker;
pub use query::{get_all, KeyQuery, QueryResults};
pub use resolver::{metadata_resolver, uncached_kinds, ModeResolver, MODE_METADATA_KEY};
