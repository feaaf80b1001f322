//! Seam to the underlying entity-store client.

use std::sync::Arc;

use async_trait::async_trait;
use entcache_core::{EntcacheResult, RpcCall, RpcReply};

use crate::context::CallContext;

/// Performs an RPC against the entity store.
///
/// Implementations report store failures as `EntcacheError::Backend`; the
/// interceptor hands every invoker error back to its caller unchanged.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(&self, ctx: &CallContext, call: RpcCall) -> EntcacheResult<RpcReply>;
}

#[async_trait]
impl<I: Invoker + ?Sized> Invoker for Arc<I> {
    async fn invoke(&self, ctx: &CallContext, call: RpcCall) -> EntcacheResult<RpcReply> {
        (**self).invoke(ctx, call).await
    }
}
