//! Per-call caching mode selection.

use std::sync::Arc;

use entcache_core::{CachingMode, RpcCall, RpcMethod};

use crate::context::CallContext;

/// Metadata entry read by [`metadata_resolver`].
pub const MODE_METADATA_KEY: &str = "x-entcache-mode";

/// Picks the caching mode of one call from its context and request.
pub type ModeResolver =
    Arc<dyn Fn(&CallContext, &RpcMethod, &RpcCall) -> CachingMode + Send + Sync>;

/// Resolver that lets callers choose the mode through call metadata.
///
/// A missing or unparseable `x-entcache-mode` entry yields `fallback`.
pub fn metadata_resolver(
    fallback: CachingMode,
) -> impl Fn(&CallContext, &RpcMethod, &RpcCall) -> CachingMode + Send + Sync + 'static {
    move |ctx: &CallContext, _method: &RpcMethod, _call: &RpcCall| {
        ctx.metadata(MODE_METADATA_KEY)
            .and_then(|value| value.parse().ok())
            .unwrap_or(fallback)
    }
}

/// Resolver that disables caching for every kind listed in `kinds` when a
/// lookup or commit touches one of them.
pub fn uncached_kinds(
    kinds: Vec<String>,
    fallback: CachingMode,
) -> impl Fn(&CallContext, &RpcMethod, &RpcCall) -> CachingMode + Send + Sync + 'static {
    move |_ctx: &CallContext, _method: &RpcMethod, call: &RpcCall| {
        let touches = |kind: Option<&str>| kind.is_some_and(|k| kinds.iter().any(|x| x == k));
        let excluded = match call {
            RpcCall::Lookup(req) => req.keys.iter().any(|key| touches(key.kind())),
            RpcCall::Commit(req) => req.mutations.iter().any(|m| touches(m.key().kind())),
            RpcCall::Other(_) => false,
        };
        if excluded {
            CachingMode::Never
        } else {
            fallback
        }
    }
}
