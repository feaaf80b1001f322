//! Query helper that resolves entities through the cache.
//!
//! Queries always run against the store, but only for keys. The entities are
//! then fetched with a lookup, which the caching layer can answer from cache.

use std::collections::HashMap;

use async_trait::async_trait;
use entcache_core::{
    EntcacheError, EntcacheResult, EntityKey, EntityResult, LookupRequest, RpcCall, RpcMethod,
    RpcReply,
};

use crate::context::CallContext;
use crate::invoker::Invoker;

/// Client able to run a query returning keys only.
#[async_trait]
pub trait KeyQuery: Send + Sync {
    type Query: Send + Sync;

    async fn keys_only(
        &self,
        ctx: &CallContext,
        project_id: &str,
        query: &Self::Query,
    ) -> EntcacheResult<Vec<EntityKey>>;
}

/// Outcome of [`get_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResults {
    /// Keys matched by the query, in query order.
    pub keys: Vec<EntityKey>,
    /// Entities for `keys`, in the same order; absent keys are skipped.
    pub found: Vec<EntityResult>,
    /// Keys the query matched but the lookup no longer found.
    pub missing: Vec<EntityKey>,
    pub deferred: Vec<EntityKey>,
}

/// Run `query` keys-only, then look the keys up through `client`.
pub async fn get_all<Q, I>(
    ctx: &CallContext,
    queries: &Q,
    client: &I,
    project_id: &str,
    query: &Q::Query,
) -> EntcacheResult<QueryResults>
where
    Q: KeyQuery + ?Sized,
    I: Invoker + ?Sized,
{
    let keys = ctx
        .run(queries.keys_only(ctx, project_id, query))
        .await
        .unwrap_or_else(|| {
            Err(EntcacheError::Timeout {
                operation: "keys-only query".to_string(),
            })
        })?;
    if keys.is_empty() {
        return Ok(QueryResults::default());
    }

    let request = LookupRequest::new(project_id, keys.clone());
    let response = match client.invoke(ctx, RpcCall::Lookup(request)).await? {
        RpcReply::Lookup(response) => response,
        _ => {
            return Err(EntcacheError::UnexpectedReply {
                method: RpcMethod::Lookup.path().to_string(),
            })
        }
    };

    let by_key: HashMap<&EntityKey, &EntityResult> =
        response.found.iter().map(|item| (item.key(), item)).collect();
    let found = keys
        .iter()
        .filter_map(|key| by_key.get(key).map(|item| (*item).clone()))
        .collect();

    tracing::debug!(
        project_id,
        keys = keys.len(),
        missing = response.missing.len(),
        "keys-only query resolved"
    );

    Ok(QueryResults {
        keys,
        found,
        missing: response.missing,
        deferred: response.deferred,
    })
}
