//! Error types for entcache operations

use crate::rpc::RpcMethod;
use thiserror::Error;

/// Cache backend errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Connection pool error: {reason}")]
    Pool { reason: String },

    #[error("Redis command failed: {reason}")]
    Redis { reason: String },

    #[error("LMDB operation failed: {reason}")]
    Lmdb { reason: String },

    #[error("Malformed cache entry under {slot}: {reason}")]
    Codec { slot: String, reason: String },

    #[error("Cache lock poisoned")]
    LockPoisoned,

    #[error("Cache operation {operation} timed out")]
    Timeout { operation: &'static str },

    #[error("Cache unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Failure reported by the underlying entity-store RPC.
///
/// The interceptor never rewrites these; they reach the caller as the
/// backend produced them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{method} failed with status {code}: {message}")]
pub struct BackendError {
    pub method: String,
    pub code: i32,
    pub message: String,
}

impl BackendError {
    pub fn new(method: &RpcMethod, code: i32, message: impl Into<String>) -> Self {
        Self {
            method: method.path().to_string(),
            code,
            message: message.into(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all entcache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EntcacheError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Cache invalidation before commit failed: {0}")]
    PreCommitInvalidation(#[source] CacheError),

    #[error("Cache returned {got} results for {expected} keys")]
    CacheContract { expected: usize, got: usize },

    #[error("Backend answered {method} with a mismatched reply")]
    UnexpectedReply { method: String },

    #[error("{operation} exceeded the call deadline")]
    Timeout { operation: String },

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl EntcacheError {
    /// Whether this error originated in the entity-store backend.
    pub fn is_backend(&self) -> bool {
        matches!(self, EntcacheError::Backend(_))
    }
}

/// Result type alias for entcache operations.
pub type EntcacheResult<T> = Result<T, EntcacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_passes_through_transparently() {
        let backend = BackendError::new(&RpcMethod::Lookup, 14, "unavailable");
        let err: EntcacheError = backend.clone().into();
        assert!(err.is_backend());
        assert_eq!(err.to_string(), backend.to_string());
        assert!(err.to_string().contains("/google.datastore.v1.Datastore/Lookup"));
    }

    #[test]
    fn test_pre_commit_invalidation_wraps_cause() {
        use std::error::Error as _;

        let err = EntcacheError::PreCommitInvalidation(CacheError::Redis {
            reason: "connection reset".into(),
        });
        assert!(err.to_string().contains("before commit"));
        let source = err.source().expect("cause should be kept");
        assert!(source.to_string().contains("connection reset"));
    }

    #[test]
    fn test_contract_error_display() {
        let err = EntcacheError::CacheContract {
            expected: 3,
            got: 2,
        };
        assert_eq!(err.to_string(), "Cache returned 2 results for 3 keys");
    }
}
