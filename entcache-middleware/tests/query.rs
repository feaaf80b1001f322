//! Keys-only queries resolved through the cache.

use std::sync::Arc;

use async_trait::async_trait;
use entcache_core::{EntcacheResult, EntityKey};
use entcache_middleware::{get_all, CachedClient, CallContext, KeyQuery};
use entcache_storage::MemoryCache;
use entcache_test_utils::fixtures::{task, PROJECT_ID};
use entcache_test_utils::FakeEntityStore;

/// Query that returns every key of one kind the store holds, in id order.
struct KindQuery {
    store: Arc<FakeEntityStore>,
    known: Vec<EntityKey>,
}

#[async_trait]
impl KeyQuery for KindQuery {
    type Query = String;

    async fn keys_only(
        &self,
        _ctx: &CallContext,
        _project_id: &str,
        kind: &String,
    ) -> EntcacheResult<Vec<EntityKey>> {
        Ok(self
            .known
            .iter()
            .filter(|key| key.kind() == Some(kind.as_str()))
            .filter(|key| self.store.get_direct(key).is_some())
            .cloned()
            .collect())
    }
}

#[tokio::test]
async fn test_get_all_serves_entities_from_cache() {
    let store = Arc::new(FakeEntityStore::new());
    let known: Vec<EntityKey> = [task(3, "c"), task(1, "a"), task(2, "b")]
        .into_iter()
        .map(|entity| store.put_direct(entity).entity.key)
        .collect();
    let queries = KindQuery {
        store: store.clone(),
        known: known.clone(),
    };
    let client = CachedClient::with_cache(store.clone(), Arc::new(MemoryCache::new()));
    let ctx = CallContext::new();

    let first = get_all(&ctx, &queries, &client, PROJECT_ID, &"Task".to_string())
        .await
        .unwrap();
    assert_eq!(first.keys, known);
    let payloads: Vec<_> = first.found.iter().map(|r| r.entity.payload.clone()).collect();
    assert_eq!(payloads, vec![b"c".to_vec(), b"a".to_vec(), b"b".to_vec()]);

    store.reset_calls();
    let second = get_all(&ctx, &queries, &client, PROJECT_ID, &"Task".to_string())
        .await
        .unwrap();
    assert_eq!(second.found, first.found);
    assert_eq!(store.lookup_count(), 0);
}

#[tokio::test]
async fn test_get_all_with_no_matches_skips_lookup() {
    let store = Arc::new(FakeEntityStore::new());
    let queries = KindQuery {
        store: store.clone(),
        known: vec![],
    };
    let client = CachedClient::with_cache(store.clone(), Arc::new(MemoryCache::new()));

    let results = get_all(&CallContext::new(), &queries, &client, PROJECT_ID, &"Task".to_string())
        .await
        .unwrap();

    assert!(results.keys.is_empty());
    assert!(results.found.is_empty());
    assert!(store.calls().is_empty());
}
