//! Reporting of non-fatal cache failures.
//!
//! The interceptor never fails a call because the cache misbehaved on a path
//! where the backend alone can answer correctly. Those failures are turned
//! into [`CacheEvent`]s and handed to a [`DiagnosticSink`].

use std::fmt;

use entcache_core::CacheError;

/// A cache failure the interceptor absorbed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// Reading cached entries before a lookup failed; every key went to the backend.
    LookupReadFailed {
        project_id: String,
        keys: usize,
        error: CacheError,
    },
    /// Storing backend results after a lookup failed.
    LookupPopulateFailed {
        project_id: String,
        entities: usize,
        error: CacheError,
    },
    /// Invalidating after a successful commit failed.
    PostCommitInvalidationFailed {
        project_id: String,
        keys: usize,
        error: CacheError,
    },
}

impl CacheEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            CacheEvent::LookupReadFailed { .. } => "lookup_read_failed",
            CacheEvent::LookupPopulateFailed { .. } => "lookup_populate_failed",
            CacheEvent::PostCommitInvalidationFailed { .. } => "post_commit_invalidation_failed",
        }
    }

    pub fn project_id(&self) -> &str {
        match self {
            CacheEvent::LookupReadFailed { project_id, .. }
            | CacheEvent::LookupPopulateFailed { project_id, .. }
            | CacheEvent::PostCommitInvalidationFailed { project_id, .. } => project_id,
        }
    }

    pub fn error(&self) -> &CacheError {
        match self {
            CacheEvent::LookupReadFailed { error, .. }
            | CacheEvent::LookupPopulateFailed { error, .. }
            | CacheEvent::PostCommitInvalidationFailed { error, .. } => error,
        }
    }
}

impl fmt::Display for CacheEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheEvent::LookupReadFailed { keys, error, .. } => {
                write!(f, "cache read before lookup of {keys} keys failed: {error}")
            }
            CacheEvent::LookupPopulateFailed {
                entities, error, ..
            } => write!(f, "caching {entities} entities after lookup failed: {error}"),
            CacheEvent::PostCommitInvalidationFailed { keys, error, .. } => {
                write!(f, "invalidating {keys} keys after commit failed: {error}")
            }
        }
    }
}

/// Receiver of absorbed cache failures.
pub trait DiagnosticSink: Send + Sync {
    fn record(&self, event: &CacheEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl DiagnosticSink for NoopSink {
    fn record(&self, _event: &CacheEvent) {}
}

/// Forwards events to `tracing` at warn level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn record(&self, event: &CacheEvent) {
        tracing::warn!(
            kind = event.kind(),
            project_id = event.project_id(),
            error = %event.error(),
            "{}",
            event
        );
    }
}

impl<F> DiagnosticSink for F
where
    F: Fn(&CacheEvent) + Send + Sync,
{
    fn record(&self, event: &CacheEvent) {
        self(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn event() -> CacheEvent {
        CacheEvent::PostCommitInvalidationFailed {
            project_id: "pj".into(),
            keys: 3,
            error: CacheError::Unavailable {
                reason: "down".into(),
            },
        }
    }

    #[test]
    fn test_event_accessors() {
        let event = event();
        assert_eq!(event.kind(), "post_commit_invalidation_failed");
        assert_eq!(event.project_id(), "pj");
        assert!(matches!(event.error(), CacheError::Unavailable { .. }));
        assert_eq!(
            event.to_string(),
            "invalidating 3 keys after commit failed: Cache unavailable: down"
        );
    }

    #[test]
    fn test_closure_sink_collects_events() {
        let seen = Mutex::new(Vec::new());
        let sink = |event: &CacheEvent| seen.lock().unwrap().push(event.clone());
        sink.record(&event());
        NoopSink.record(&event());
        TracingSink.record(&event());
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
