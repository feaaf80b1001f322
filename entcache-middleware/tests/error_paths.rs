//! Fatal and non-fatal cache failures.

use std::sync::Arc;
use std::time::Duration;

use entcache_core::{
    CacheError, CachingMode, DeleteTiming, EntcacheError, Entity, EntityKey, Mutation, RpcMethod,
};
use entcache_middleware::{CacheEvent, CacheInterceptor, CallContext};
use entcache_test_utils::assertions::{assert_backend_error, expect_commit, expect_lookup, payloads};
use entcache_test_utils::fixtures::{commit, interceptor, lookup, task, task_key, PROJECT_ID};
use entcache_test_utils::{init_test_tracing, status, FailingCache, FakeEntityStore, RecordingSink};

fn store_with_task() -> (FakeEntityStore, EntityKey) {
    let store = FakeEntityStore::new();
    let key = store.put_direct(task(1, "stored")).entity.key;
    (store, key)
}

#[tokio::test]
async fn test_cache_read_failure_falls_back_to_backend() {
    init_test_tracing();
    let cache = Arc::new(FailingCache::new());
    cache.fail_gets();
    let sink = RecordingSink::new();
    let (store, key) = store_with_task();

    let response = expect_lookup(
        interceptor(cache.clone(), sink.clone())
            .intercept(&CallContext::new(), lookup(vec![key.clone()]), &store)
            .await,
    );

    assert_eq!(payloads(&response), vec!["stored"]);
    assert_eq!(store.looked_up_keys(), vec![vec![key.clone()]]);
    assert_eq!(sink.kinds(), vec!["lookup_read_failed"]);
    assert_eq!(cache.get_calls(), 1);
    // Population still happens after a failed read.
    assert_eq!(cache.set_calls(), 1);
    assert_eq!(cache.inner().history_len(PROJECT_ID, &key), 1);
}

#[tokio::test]
async fn test_populate_failure_is_invisible_to_caller() {
    let cache = Arc::new(FailingCache::new());
    cache.fail_sets();
    let sink = RecordingSink::new();
    let (store, key) = store_with_task();

    let response = expect_lookup(
        interceptor(cache.clone(), sink.clone())
            .intercept(&CallContext::new(), lookup(vec![key]), &store)
            .await,
    );

    assert_eq!(payloads(&response), vec!["stored"]);
    match &sink.events()[..] {
        [CacheEvent::LookupPopulateFailed {
            project_id,
            entities,
            ..
        }] => {
            assert_eq!(project_id, PROJECT_ID);
            assert_eq!(*entities, 1);
        }
        other => panic!("unexpected events {other:?}"),
    }
    assert_eq!(cache.inner().slot_count(), 0);
}

#[tokio::test]
async fn test_pre_commit_invalidation_failure_aborts_commit() {
    let cache = Arc::new(FailingCache::new());
    cache.fail_deletes();
    let sink = RecordingSink::new();
    let store = FakeEntityStore::new();

    let result = interceptor(cache.clone(), sink.clone())
        .intercept(
            &CallContext::new(),
            commit(vec![Mutation::Upsert(task(1, "new"))]),
            &store,
        )
        .await;

    assert!(matches!(
        result,
        Err(EntcacheError::PreCommitInvalidation(CacheError::Unavailable { .. }))
    ));
    assert_eq!(store.commit_count(), 0);
    assert!(store.is_empty());
    assert!(sink.events().is_empty());
}

#[tokio::test]
async fn test_post_commit_invalidation_failure_is_non_fatal() {
    let cache = Arc::new(FailingCache::new());
    cache.fail_deletes_after(1);
    let sink = RecordingSink::new();
    let store = FakeEntityStore::new();

    let response = expect_commit(
        interceptor(cache.clone(), sink.clone())
            .intercept(
                &CallContext::new(),
                commit(vec![Mutation::Upsert(task(1, "new")), Mutation::Delete(task_key(2))]),
                &store,
            )
            .await,
    );

    assert_eq!(response.mutation_results.len(), 2);
    assert_eq!(store.commit_count(), 1);
    match &sink.events()[..] {
        [CacheEvent::PostCommitInvalidationFailed { keys, .. }] => assert_eq!(*keys, 2),
        other => panic!("unexpected events {other:?}"),
    }
}

#[tokio::test]
async fn test_length_mismatch_is_fatal_in_every_read_mode() {
    for mode in [CachingMode::ReadOnly, CachingMode::ReadWrite] {
        let cache = Arc::new(FailingCache::new());
        cache.short_reads();
        let sink = RecordingSink::new();
        let (store, key) = store_with_task();

        let result = interceptor(cache, sink.clone())
            .with_default_mode(mode)
            .intercept(
                &CallContext::new(),
                lookup(vec![key, task_key(2)]),
                &store,
            )
            .await;

        assert_eq!(
            result,
            Err(EntcacheError::CacheContract {
                expected: 2,
                got: 1
            })
        );
        assert_eq!(store.lookup_count(), 0);
        assert!(sink.events().is_empty());
    }
}

#[tokio::test]
async fn test_backend_errors_pass_through_unchanged() {
    let cache = Arc::new(FailingCache::new());
    let (store, key) = store_with_task();
    let layer = CacheInterceptor::new(cache.clone())
        .with_delete_timing(DeleteTiming::AfterCommit)
        .with_default_mode(CachingMode::ReadOnly);

    store.fail_next(RpcMethod::Lookup, status::UNAVAILABLE);
    let result = layer
        .intercept(&CallContext::new(), lookup(vec![key.clone()]), &store)
        .await;
    assert_backend_error(&result, status::UNAVAILABLE);
    assert_eq!(cache.set_calls(), 0);

    // A failed commit skips post-commit invalidation.
    let result = layer
        .intercept(
            &CallContext::new(),
            commit(vec![Mutation::Update(Entity::new(task_key(9), b"x".to_vec()))]),
            &store,
        )
        .await;
    assert_backend_error(&result, status::NOT_FOUND);
    assert_eq!(cache.delete_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_cache_read_degrades_to_backend() {
    let cache = Arc::new(FailingCache::new());
    cache.set_delay(Duration::from_secs(5));
    let sink = RecordingSink::new();
    let (store, key) = store_with_task();
    let ctx = CallContext::new().with_timeout(Duration::from_secs(1));

    // The deadline fires during the cache read; the store answers without
    // suspending, so the backend call still completes.
    let response = expect_lookup(
        interceptor(cache, sink.clone())
            .with_default_mode(CachingMode::ReadOnly)
            .intercept(&ctx, lookup(vec![key]), &store)
            .await,
    );

    assert_eq!(payloads(&response), vec!["stored"]);
    match &sink.events()[..] {
        [CacheEvent::LookupReadFailed { error, .. }] => {
            assert_eq!(error, &CacheError::Timeout { operation: "get_multi" })
        }
        other => panic!("unexpected events {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_slow_pre_commit_invalidation_is_fatal() {
    let cache = Arc::new(FailingCache::new());
    cache.set_delay(Duration::from_secs(5));
    let store = FakeEntityStore::new();
    let ctx = CallContext::new().with_timeout(Duration::from_secs(1));

    let result = CacheInterceptor::new(cache)
        .intercept(&ctx, commit(vec![Mutation::Upsert(task(1, "x"))]), &store)
        .await;

    assert_eq!(
        result,
        Err(EntcacheError::PreCommitInvalidation(CacheError::Timeout {
            operation: "delete_multi"
        }))
    );
    assert_eq!(store.commit_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_backend_is_fatal() {
    let cache = Arc::new(FailingCache::new());
    let (store, key) = store_with_task();
    store.set_latency(Duration::from_secs(5));
    let ctx = CallContext::new().with_timeout(Duration::from_secs(1));

    let result = CacheInterceptor::new(cache)
        .intercept(&ctx, lookup(vec![key]), &store)
        .await;

    assert_eq!(
        result,
        Err(EntcacheError::Timeout {
            operation: RpcMethod::Lookup.path().to_string()
        })
    );
}
