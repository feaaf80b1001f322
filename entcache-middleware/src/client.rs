//! An [`Invoker`] with the caching layer in front of it.

use std::sync::Arc;

use async_trait::async_trait;
use entcache_core::{
    CommitRequest, CommitResponse, EntcacheError, EntcacheResult, LookupRequest, LookupResponse,
    RpcCall, RpcMethod, RpcReply,
};
use entcache_storage::Cache;

use crate::context::CallContext;
use crate::interceptor::CacheInterceptor;
use crate::invoker::Invoker;

/// Routes every call through a [`CacheInterceptor`] before reaching `inner`.
pub struct CachedClient<I, C: ?Sized> {
    inner: I,
    interceptor: CacheInterceptor<C>,
}

impl<I, C> CachedClient<I, C>
where
    I: Invoker,
    C: Cache + ?Sized,
{
    pub fn new(inner: I, interceptor: CacheInterceptor<C>) -> Self {
        Self { inner, interceptor }
    }

    /// Client with a default-configured interceptor over `cache`.
    pub fn with_cache(inner: I, cache: Arc<C>) -> Self {
        Self::new(inner, CacheInterceptor::new(cache))
    }

    pub fn inner(&self) -> &I {
        &self.inner
    }

    pub fn interceptor(&self) -> &CacheInterceptor<C> {
        &self.interceptor
    }

    pub async fn lookup(
        &self,
        ctx: &CallContext,
        request: LookupRequest,
    ) -> EntcacheResult<LookupResponse> {
        match self.invoke(ctx, RpcCall::Lookup(request)).await? {
            RpcReply::Lookup(response) => Ok(response),
            _ => Err(EntcacheError::UnexpectedReply {
                method: RpcMethod::Lookup.path().to_string(),
            }),
        }
    }

    pub async fn commit(
        &self,
        ctx: &CallContext,
        request: CommitRequest,
    ) -> EntcacheResult<CommitResponse> {
        match self.invoke(ctx, RpcCall::Commit(request)).await? {
            RpcReply::Commit(response) => Ok(response),
            _ => Err(EntcacheError::UnexpectedReply {
                method: RpcMethod::Commit.path().to_string(),
            }),
        }
    }
}

#[async_trait]
impl<I, C> Invoker for CachedClient<I, C>
where
    I: Invoker,
    C: Cache + ?Sized,
{
    async fn invoke(&self, ctx: &CallContext, call: RpcCall) -> EntcacheResult<RpcReply> {
        self.interceptor.intercept(ctx, call, &self.inner).await
    }
}
