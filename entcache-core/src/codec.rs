//! Cache key codec.
//!
//! Renders an [`EntityKey`] into a single flat string that is unambiguous
//! even when kinds, names or ids contain the `:` delimiter:
//!
//! ```text
//! <project>:<namespace>:<kind>:i:<id>[:<kind>:n:<name>...]
//! ```
//!
//! Every component is escaped before joining (`\` becomes `\\`, `:` becomes
//! `\:`), so no two distinct keys render to the same string.

use crate::{EntityKey, PathId};

/// Prefix and suffix marking a reserved project or namespace id.
pub const RESERVED_MARKER: &str = "__";

/// Escape a single key component.
pub fn escape_key(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            ':' => escaped.push_str("\\:"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Whether a project or namespace id is reserved (`__name__`).
///
/// Entities under a reserved id are never read from, written to or deleted
/// from the cache.
pub fn is_reserved(id: &str) -> bool {
    id.starts_with(RESERVED_MARKER) && id.ends_with(RESERVED_MARKER)
}

/// Render the cache key for `key` under the ambient `project_id`.
///
/// A non-empty partition project id on the key overrides `project_id`.
/// Returns `None` when any path element has neither an id nor a name, or the
/// path is empty.
pub fn cache_key(project_id: &str, key: &EntityKey) -> Option<String> {
    if key.path.is_empty() {
        return None;
    }

    let mut segments = Vec::with_capacity(key.path.len());
    for element in &key.path {
        let id = match element.id.as_ref()? {
            PathId::Id(id) => format!("i:{}", id),
            PathId::Name(name) => format!("n:{}", escape_key(name)),
        };
        segments.push(format!("{}:{}", escape_key(&element.kind), id));
    }

    let (project_id, namespace_id) = match &key.partition {
        Some(partition) if !partition.project_id.is_empty() => {
            (partition.project_id.as_str(), partition.namespace_id.as_str())
        }
        Some(partition) => (project_id, partition.namespace_id.as_str()),
        None => (project_id, ""),
    };

    Some(format!(
        "{}:{}:{}",
        escape_key(project_id),
        escape_key(namespace_id),
        segments.join(":")
    ))
}

/// Resolve the storage slot for one item of a batch.
///
/// Returns `None` when the item must be skipped: the ambient project, the
/// key's partition project or its namespace is reserved, or the key cannot be
/// rendered.
pub fn slot_key(project_id: &str, key: &EntityKey) -> Option<String> {
    if is_reserved(project_id) {
        return None;
    }
    if let Some(partition) = &key.partition {
        if is_reserved(&partition.project_id) || is_reserved(&partition.namespace_id) {
            return None;
        }
    }
    cache_key(project_id, key)
}
