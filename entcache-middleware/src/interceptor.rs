//! Read-through / invalidate-on-commit interception of entity-store RPCs.
//!
//! Lookups are answered from the cache where possible and only the misses go
//! to the backend; the backend's answer is written back. Commits invalidate
//! every mutated key around the backend write, according to the configured
//! [`DeleteTiming`] and the call's [`CachingMode`].
//!
//! Cache failures are fatal only where ignoring them could leave a stale
//! entry visible after a write: a failed pre-commit invalidation aborts the
//! commit. Everything else is reported to the [`DiagnosticSink`] and the call
//! proceeds against the backend.

use std::sync::Arc;

use entcache_core::{
    CacheError, CachingMode, CommitRequest, CommitResponse, DeleteTiming, EntcacheError,
    EntcacheResult, EntityKey, EntityResult, LookupRequest, LookupResponse, MiddlewareConfig,
    RpcCall, RpcMethod, RpcReply,
};
use entcache_storage::Cache;

use crate::context::CallContext;
use crate::diagnostics::{CacheEvent, DiagnosticSink, NoopSink};
use crate::invoker::Invoker;
use crate::resolver::ModeResolver;

/// Caching interceptor over a [`Cache`].
///
/// One instance serves any number of concurrent calls; it holds no per-call
/// state.
pub struct CacheInterceptor<C: ?Sized> {
    cache: Arc<C>,
    config: MiddlewareConfig,
    resolver: Option<ModeResolver>,
    sink: Arc<dyn DiagnosticSink>,
}

impl<C: ?Sized> Clone for CacheInterceptor<C> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            config: self.config,
            resolver: self.resolver.clone(),
            sink: Arc::clone(&self.sink),
        }
    }
}

impl<C> CacheInterceptor<C>
where
    C: Cache + ?Sized,
{
    /// Interceptor with default policy: invalidate before and after commit,
    /// read and write the cache on every call.
    pub fn new(cache: Arc<C>) -> Self {
        Self::with_config(cache, MiddlewareConfig::default())
    }

    pub fn with_config(cache: Arc<C>, config: MiddlewareConfig) -> Self {
        Self {
            cache,
            config,
            resolver: None,
            sink: Arc::new(NoopSink),
        }
    }

    pub fn with_delete_timing(mut self, delete_timing: DeleteTiming) -> Self {
        self.config.delete_timing = delete_timing;
        self
    }

    /// Mode used when no resolver is installed.
    pub fn with_default_mode(mut self, mode: CachingMode) -> Self {
        self.config.default_mode = mode;
        self
    }

    pub fn with_mode_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&CallContext, &RpcMethod, &RpcCall) -> CachingMode + Send + Sync + 'static,
    {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    pub fn with_sink<S>(mut self, sink: S) -> Self
    where
        S: DiagnosticSink + 'static,
    {
        self.sink = Arc::new(sink);
        self
    }

    pub fn config(&self) -> &MiddlewareConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<C> {
        &self.cache
    }

    /// Caching mode for `call`, resolved once per call.
    pub fn resolve_mode(&self, ctx: &CallContext, call: &RpcCall) -> CachingMode {
        match &self.resolver {
            Some(resolve) => resolve(ctx, &call.method(), call),
            None => self.config.default_mode,
        }
    }

    /// Run `call` through the cache, using `invoker` for the backend.
    pub async fn intercept<I>(
        &self,
        ctx: &CallContext,
        call: RpcCall,
        invoker: &I,
    ) -> EntcacheResult<RpcReply>
    where
        I: Invoker + ?Sized,
    {
        let mode = self.resolve_mode(ctx, &call);
        match call {
            RpcCall::Lookup(request) => self
                .lookup(ctx, mode, request, invoker)
                .await
                .map(RpcReply::Lookup),
            RpcCall::Commit(request) => self
                .commit(ctx, mode, request, invoker)
                .await
                .map(RpcReply::Commit),
            other => call_backend(ctx, invoker, other).await,
        }
    }

    /// Lookup with an already resolved caching mode.
    pub async fn lookup<I>(
        &self,
        ctx: &CallContext,
        mode: CachingMode,
        mut request: LookupRequest,
        invoker: &I,
    ) -> EntcacheResult<LookupResponse>
    where
        I: Invoker + ?Sized,
    {
        if request.has_transaction() || mode == CachingMode::Never {
            tracing::debug!(
                project_id = %request.project_id,
                transaction = request.has_transaction(),
                mode = %mode,
                "lookup bypasses cache"
            );
            return backend_lookup(ctx, invoker, request).await;
        }
        if request.keys.is_empty() {
            return Ok(LookupResponse::default());
        }

        let project_id = request.project_id.clone();
        let mut hits = Vec::new();

        if mode.allows_read() {
            let requested = request.keys.len();
            match self.read_cache(ctx, &project_id, &request.keys).await {
                Ok(items) => {
                    if items.len() != requested {
                        return Err(EntcacheError::CacheContract {
                            expected: requested,
                            got: items.len(),
                        });
                    }
                    let (found, misses) = split_hits(std::mem::take(&mut request.keys), items);
                    hits = found;
                    request.keys = misses;
                }
                Err(error) => self.sink.record(&CacheEvent::LookupReadFailed {
                    project_id: project_id.clone(),
                    keys: requested,
                    error,
                }),
            }

            tracing::debug!(
                project_id = %project_id,
                hits = hits.len(),
                misses = request.keys.len(),
                "lookup served from cache"
            );
            if request.keys.is_empty() {
                return Ok(LookupResponse {
                    found: hits,
                    ..LookupResponse::default()
                });
            }
        }

        let fetched = backend_lookup(ctx, invoker, request).await?;

        if mode.allows_write() && !fetched.found.is_empty() {
            if let Err(error) = self.populate(ctx, &project_id, &fetched.found).await {
                self.sink.record(&CacheEvent::LookupPopulateFailed {
                    project_id: project_id.clone(),
                    entities: fetched.found.len(),
                    error,
                });
            }
        }

        hits.extend(fetched.found);
        Ok(LookupResponse {
            found: hits,
            missing: fetched.missing,
            deferred: fetched.deferred,
        })
    }

    /// Commit with an already resolved caching mode.
    pub async fn commit<I>(
        &self,
        ctx: &CallContext,
        mode: CachingMode,
        request: CommitRequest,
        invoker: &I,
    ) -> EntcacheResult<CommitResponse>
    where
        I: Invoker + ?Sized,
    {
        let project_id = request.project_id.clone();
        let keys = request.invalidation_keys();
        let timing = self.config.delete_timing;

        if timing.before_commit() || mode.allows_write() {
            if let Err(error) = self.invalidate(ctx, &project_id, &keys).await {
                tracing::warn!(
                    project_id = %project_id,
                    keys = keys.len(),
                    error = %error,
                    "cache invalidation before commit failed; commit not sent"
                );
                return Err(EntcacheError::PreCommitInvalidation(error));
            }
        }

        let response = backend_commit(ctx, invoker, request).await?;

        if timing.after_commit() || mode.allows_write() {
            if let Err(error) = self.invalidate(ctx, &project_id, &keys).await {
                self.sink.record(&CacheEvent::PostCommitInvalidationFailed {
                    project_id,
                    keys: keys.len(),
                    error,
                });
            }
        }

        Ok(response)
    }

    async fn read_cache(
        &self,
        ctx: &CallContext,
        project_id: &str,
        keys: &[EntityKey],
    ) -> Result<Vec<Option<EntityResult>>, CacheError> {
        ctx.run(self.cache.get_multi(project_id, keys))
            .await
            .unwrap_or(Err(CacheError::Timeout {
                operation: "get_multi",
            }))
    }

    async fn populate(
        &self,
        ctx: &CallContext,
        project_id: &str,
        items: &[EntityResult],
    ) -> Result<(), CacheError> {
        ctx.run(self.cache.set_multi(project_id, items))
            .await
            .unwrap_or(Err(CacheError::Timeout {
                operation: "set_multi",
            }))
    }

    async fn invalidate(
        &self,
        ctx: &CallContext,
        project_id: &str,
        keys: &[EntityKey],
    ) -> Result<(), CacheError> {
        if keys.is_empty() {
            return Ok(());
        }
        ctx.run(self.cache.delete_multi(project_id, keys))
            .await
            .unwrap_or(Err(CacheError::Timeout {
                operation: "delete_multi",
            }))
    }
}

/// Split a position-aligned cache answer into hits and the keys still needed.
fn split_hits(
    keys: Vec<EntityKey>,
    items: Vec<Option<EntityResult>>,
) -> (Vec<EntityResult>, Vec<EntityKey>) {
    let mut hits = Vec::new();
    let mut misses = Vec::new();
    for (key, item) in keys.into_iter().zip(items) {
        match item {
            Some(hit) => hits.push(hit),
            None => misses.push(key),
        }
    }
    (hits, misses)
}

async fn call_backend<I>(ctx: &CallContext, invoker: &I, call: RpcCall) -> EntcacheResult<RpcReply>
where
    I: Invoker + ?Sized,
{
    let method = call.method();
    match ctx.run(invoker.invoke(ctx, call)).await {
        Some(reply) => reply,
        None => Err(EntcacheError::Timeout {
            operation: method.path().to_string(),
        }),
    }
}

async fn backend_lookup<I>(
    ctx: &CallContext,
    invoker: &I,
    request: LookupRequest,
) -> EntcacheResult<LookupResponse>
where
    I: Invoker + ?Sized,
{
    match call_backend(ctx, invoker, RpcCall::Lookup(request)).await? {
        RpcReply::Lookup(response) => Ok(response),
        _ => Err(EntcacheError::UnexpectedReply {
            method: RpcMethod::Lookup.path().to_string(),
        }),
    }
}

async fn backend_commit<I>(
    ctx: &CallContext,
    invoker: &I,
    request: CommitRequest,
) -> EntcacheResult<CommitResponse>
where
    I: Invoker + ?Sized,
{
    match call_backend(ctx, invoker, RpcCall::Commit(request)).await? {
        RpcReply::Commit(response) => Ok(response),
        _ => Err(EntcacheError::UnexpectedReply {
            method: RpcMethod::Commit.path().to_string(),
        }),
    }
}
