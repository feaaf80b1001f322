//! entcache Core - Entity Keys, Messages and Policy
//!
//! Pure data structures shared by every other crate in the workspace.
//! This crate performs no I/O: the cache backends live in `entcache-storage`
//! and the interception logic lives in `entcache-middleware`.

use serde::{Deserialize, Serialize};

pub mod codec;
pub mod config;
pub mod enums;
pub mod error;
pub mod rpc;

pub use codec::{cache_key, escape_key, is_reserved, slot_key};
pub use config::MiddlewareConfig;
pub use enums::{CachingMode, DeleteTiming, PolicyParseError};
pub use error::{BackendError, CacheError, ConfigError, EntcacheError, EntcacheResult};
pub use rpc::{
    CommitMode, CommitRequest, CommitResponse, LookupRequest, LookupResponse, Mutation,
    MutationResult, OpaqueCall, OpaqueReply, ReadConsistency, ReadOptions, RpcCall, RpcMethod,
    RpcReply,
};

// ============================================================================
// KEY TYPES
// ============================================================================

/// Project/namespace partition a key lives in.
///
/// Empty strings mean "unset": an empty project id falls back to the project
/// of the surrounding request, an empty namespace id is the default namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionId {
    pub project_id: String,
    pub namespace_id: String,
}

impl PartitionId {
    pub fn new(project_id: impl Into<String>, namespace_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            namespace_id: namespace_id.into(),
        }
    }
}

/// Identifier of a single path element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathId {
    /// Numeric id, usually allocated by the store.
    Id(i64),
    /// Caller-chosen string name.
    Name(String),
}

/// One `(kind, id-or-name)` segment of a key path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathElement {
    pub kind: String,
    /// `None` for an incomplete key whose id has not been allocated yet.
    pub id: Option<PathId>,
}

impl PathElement {
    pub fn id(kind: impl Into<String>, id: i64) -> Self {
        Self {
            kind: kind.into(),
            id: Some(PathId::Id(id)),
        }
    }

    pub fn name(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: Some(PathId::Name(name.into())),
        }
    }

    pub fn incomplete(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: None,
        }
    }
}

/// Hierarchical entity key: an optional partition plus an ordered path.
///
/// Equality is structural; two keys naming the same path in the same
/// partition are equal regardless of where they were built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub partition: Option<PartitionId>,
    pub path: Vec<PathElement>,
}

impl EntityKey {
    /// Root key with a numeric id.
    pub fn id(kind: impl Into<String>, id: i64) -> Self {
        Self {
            partition: None,
            path: vec![PathElement::id(kind, id)],
        }
    }

    /// Root key with a string name.
    pub fn name(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            partition: None,
            path: vec![PathElement::name(kind, name)],
        }
    }

    /// Root key without an id.
    pub fn incomplete(kind: impl Into<String>) -> Self {
        Self {
            partition: None,
            path: vec![PathElement::incomplete(kind)],
        }
    }

    /// Append a numeric-id child segment.
    pub fn child_id(mut self, kind: impl Into<String>, id: i64) -> Self {
        self.path.push(PathElement::id(kind, id));
        self
    }

    /// Append a named child segment.
    pub fn child_name(mut self, kind: impl Into<String>, name: impl Into<String>) -> Self {
        self.path.push(PathElement::name(kind, name));
        self
    }

    /// Place the key in an explicit partition.
    pub fn with_partition(
        mut self,
        project_id: impl Into<String>,
        namespace_id: impl Into<String>,
    ) -> Self {
        self.partition = Some(PartitionId::new(project_id, namespace_id));
        self
    }

    /// Whether every path element carries an id or a name.
    pub fn is_complete(&self) -> bool {
        !self.path.is_empty() && self.path.iter().all(|element| element.id.is_some())
    }

    /// Kind of the last path element.
    pub fn kind(&self) -> Option<&str> {
        self.path.last().map(|element| element.kind.as_str())
    }

    pub fn project_id(&self) -> Option<&str> {
        self.partition.as_ref().map(|p| p.project_id.as_str())
    }

    pub fn namespace_id(&self) -> Option<&str> {
        self.partition.as_ref().map(|p| p.namespace_id.as_str())
    }
}

// ============================================================================
// ENTITY TYPES
// ============================================================================

/// An entity: its key plus the serialized property blob.
///
/// The payload is produced by an external codec and never interpreted here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub key: EntityKey,
    pub payload: Vec<u8>,
}

impl Entity {
    pub fn new(key: EntityKey, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            key,
            payload: payload.into(),
        }
    }
}

/// A versioned snapshot of an entity, as returned by lookups and stored in
/// the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityResult {
    pub entity: Entity,
    /// Monotonic version assigned by the store; higher is newer.
    pub version: u64,
}

impl EntityResult {
    pub fn new(entity: Entity, version: u64) -> Self {
        Self { entity, version }
    }

    pub fn key(&self) -> &EntityKey {
        &self.entity.key
    }
}
