//! entcache Test Utilities
//!
//! Shared test infrastructure for the entcache workspace:
//! - `FakeEntityStore`, an in-process versioned entity store behind the
//!   `Invoker` seam
//! - `FailingCache` and `RecordingSink` for driving the error paths
//! - Proptest generators, fixtures and assertions

mod store;

pub use store::{status, FakeEntityStore};

// Re-export core types for convenience
pub use entcache_core::{
    CachingMode, CommitRequest, DeleteTiming, EntcacheError, EntcacheResult, Entity, EntityKey,
    EntityResult, LookupRequest, Mutation, RpcCall, RpcMethod, RpcReply,
};
pub use entcache_middleware::{CacheEvent, CacheInterceptor, CallContext, DiagnosticSink};
pub use entcache_storage::MemoryCache;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use entcache_core::CacheError;
use entcache_storage::{Cache, CacheResult};

/// Install a fmt subscriber honouring `RUST_LOG` for the current test binary.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// FAULT INJECTION
// ============================================================================

/// Failure schedule for one cache operation.
#[derive(Debug, Default)]
struct Fault {
    /// Calls left to succeed before failing; `None` never fails.
    succeed_for: Mutex<Option<usize>>,
    calls: AtomicUsize,
}

impl Fault {
    fn arm(&self, succeed_for: Option<usize>) {
        *self
            .succeed_for
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = succeed_for;
    }

    /// Count a call and report whether it should fail.
    fn trip(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut budget = self
            .succeed_for
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match budget.as_mut() {
            None => false,
            Some(0) => true,
            Some(left) => {
                *left -= 1;
                false
            }
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn injected(operation: &str) -> CacheError {
    CacheError::Unavailable {
        reason: format!("injected {operation} failure"),
    }
}

/// [`MemoryCache`] with switchable failures, delays and contract violations.
#[derive(Debug, Default)]
pub struct FailingCache {
    inner: MemoryCache,
    get: Fault,
    set: Fault,
    delete: Fault,
    short_reads: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl FailingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryCache {
        &self.inner
    }

    pub fn fail_gets(&self) {
        self.get.arm(Some(0));
    }

    pub fn fail_sets(&self) {
        self.set.arm(Some(0));
    }

    pub fn fail_deletes(&self) {
        self.delete.arm(Some(0));
    }

    /// Let `n` deletes through, then fail every later one.
    pub fn fail_deletes_after(&self, n: usize) {
        self.delete.arm(Some(n));
    }

    /// Return one result fewer than the number of keys asked for.
    pub fn short_reads(&self) {
        self.short_reads.store(true, Ordering::SeqCst);
    }

    /// Delay every operation by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap_or_else(PoisonError::into_inner) = Some(delay);
    }

    pub fn heal(&self) {
        self.get.arm(None);
        self.set.arm(None);
        self.delete.arm(None);
        self.short_reads.store(false, Ordering::SeqCst);
    }

    pub fn get_calls(&self) -> usize {
        self.get.calls()
    }

    pub fn set_calls(&self) -> usize {
        self.set.calls()
    }

    pub fn delete_calls(&self) -> usize {
        self.delete.calls()
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Cache for FailingCache {
    async fn get_multi(
        &self,
        project_id: &str,
        keys: &[EntityKey],
    ) -> CacheResult<Vec<Option<EntityResult>>> {
        self.pause().await;
        if self.get.trip() {
            return Err(injected("get_multi"));
        }
        let mut items = self.inner.get_multi(project_id, keys).await?;
        if self.short_reads.load(Ordering::SeqCst) {
            items.pop();
        }
        Ok(items)
    }

    async fn set_multi(&self, project_id: &str, items: &[EntityResult]) -> CacheResult<()> {
        self.pause().await;
        if self.set.trip() {
            return Err(injected("set_multi"));
        }
        self.inner.set_multi(project_id, items).await
    }

    async fn delete_multi(&self, project_id: &str, keys: &[EntityKey]) -> CacheResult<()> {
        self.pause().await;
        if self.delete.trip() {
            return Err(injected("delete_multi"));
        }
        self.inner.delete_multi(project_id, keys).await
    }
}

/// Sink keeping every event; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<CacheEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CacheEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(CacheEvent::kind).collect()
    }
}

impl DiagnosticSink for RecordingSink {
    fn record(&self, event: &CacheEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for keys and cache entries.

    use super::*;
    use entcache_core::{PartitionId, PathElement};
    use proptest::prelude::*;

    /// Kinds, including the characters the key codec has to escape.
    pub fn arb_kind() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("Task".to_string()),
            Just("User".to_string()),
            "[a-zA-Z:\\\\]{1,8}",
        ]
    }

    pub fn arb_path_element() -> impl Strategy<Value = PathElement> {
        prop_oneof![
            (arb_kind(), any::<i64>()).prop_map(|(kind, id)| PathElement::id(kind, id)),
            (arb_kind(), "[a-z0-9:\\\\]{0,10}")
                .prop_map(|(kind, name)| PathElement::name(kind, name)),
        ]
    }

    /// Partitions outside the reserved `__x__` space.
    pub fn arb_partition() -> impl Strategy<Value = Option<PartitionId>> {
        proptest::option::of(
            ("[a-z][a-z0-9-]{0,8}", "[a-z0-9:]{0,6}")
                .prop_map(|(project, namespace)| PartitionId::new(project, namespace)),
        )
    }

    /// Complete keys with one to four path elements.
    pub fn arb_entity_key() -> impl Strategy<Value = EntityKey> {
        (
            arb_partition(),
            prop::collection::vec(arb_path_element(), 1..=4),
        )
            .prop_map(|(partition, path)| EntityKey { partition, path })
    }

    pub fn arb_entity_result() -> impl Strategy<Value = EntityResult> {
        (
            arb_entity_key(),
            prop::collection::vec(any::<u8>(), 0..64),
            0u64..1_000_000,
        )
            .prop_map(|(key, payload, version)| EntityResult::new(Entity::new(key, payload), version))
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built values for common scenarios.

    use super::*;

    pub const PROJECT_ID: &str = "project-id";

    pub fn task_key(id: i64) -> EntityKey {
        EntityKey::id("Task", id)
    }

    pub fn task(id: i64, payload: &str) -> Entity {
        Entity::new(task_key(id), payload.as_bytes().to_vec())
    }

    /// A task whose id the store allocates on insert.
    pub fn new_task(payload: &str) -> Entity {
        Entity::new(EntityKey::incomplete("Task"), payload.as_bytes().to_vec())
    }

    pub fn lookup(keys: Vec<EntityKey>) -> RpcCall {
        RpcCall::Lookup(LookupRequest::new(PROJECT_ID, keys))
    }

    pub fn commit(mutations: Vec<Mutation>) -> RpcCall {
        RpcCall::Commit(CommitRequest::new(PROJECT_ID, mutations))
    }

    /// Interceptor over `cache` reporting to `sink`.
    pub fn interceptor<C>(cache: Arc<C>, sink: RecordingSink) -> CacheInterceptor<C>
    where
        C: entcache_storage::Cache + ?Sized,
    {
        CacheInterceptor::new(cache).with_sink(sink)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Reply unpacking and error-variant assertions.

    use super::*;
    use entcache_core::{CommitResponse, LookupResponse};

    #[track_caller]
    pub fn expect_lookup(reply: EntcacheResult<RpcReply>) -> LookupResponse {
        match reply {
            Ok(RpcReply::Lookup(response)) => response,
            other => panic!("Expected lookup reply, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn expect_commit(reply: EntcacheResult<RpcReply>) -> CommitResponse {
        match reply {
            Ok(RpcReply::Commit(response)) => response,
            other => panic!("Expected commit reply, got: {:?}", other),
        }
    }

    /// Payloads of the found entities, in response order.
    pub fn payloads(response: &LookupResponse) -> Vec<String> {
        response
            .found
            .iter()
            .map(|item| String::from_utf8_lossy(&item.entity.payload).into_owned())
            .collect()
    }

    #[track_caller]
    pub fn assert_backend_error<T: std::fmt::Debug>(result: &EntcacheResult<T>, code: i32) {
        match result {
            Err(EntcacheError::Backend(error)) => {
                assert_eq!(error.code, code, "Wrong backend status code")
            }
            other => panic!("Expected Backend error, got: {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_fail_deletes_after_budget() {
        let cache = FailingCache::new();
        cache.fail_deletes_after(1);
        let keys = [fixtures::task_key(1)];

        assert!(cache.delete_multi("pj", &keys).await.is_ok());
        assert!(cache.delete_multi("pj", &keys).await.is_err());
        assert!(cache.delete_multi("pj", &keys).await.is_err());
        assert_eq!(cache.delete_calls(), 3);

        cache.heal();
        assert!(cache.delete_multi("pj", &keys).await.is_ok());
    }

    #[tokio::test]
    async fn test_short_reads_break_alignment() {
        let cache = FailingCache::new();
        cache.short_reads();
        let items = cache
            .get_multi("pj", &[fixtures::task_key(1), fixtures::task_key(2)])
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_recording_sink_clones_share_events() {
        let sink = RecordingSink::new();
        let handle = sink.clone();
        sink.record(&CacheEvent::LookupReadFailed {
            project_id: "pj".into(),
            keys: 1,
            error: CacheError::LockPoisoned,
        });
        assert_eq!(handle.kinds(), vec!["lookup_read_failed"]);
    }

    proptest! {
        #[test]
        fn prop_generated_keys_are_cacheable(key in generators::arb_entity_key()) {
            prop_assert!(key.is_complete());
            prop_assert!(entcache_core::cache_key("pj", &key).is_some());
        }

        #[test]
        fn prop_healthy_cache_returns_what_was_set(item in generators::arb_entity_result()) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async {
                let cache = FailingCache::new();
                cache.set_multi("pj", std::slice::from_ref(&item)).await.unwrap();
                let items = cache.get_multi("pj", &[item.key().clone()]).await.unwrap();
                prop_assert_eq!(items, vec![Some(item)]);
                prop_assert_eq!(cache.set_calls(), 1);
                prop_assert_eq!(cache.get_calls(), 1);
                Ok(())
            })?;
        }
    }
}
