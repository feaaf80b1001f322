//! RPC messages seen by the interceptor.
//!
//! Only lookup and commit are understood. Everything else travels as an
//! [`OpaqueCall`] and is forwarded without inspection.

use crate::{Entity, EntityKey, EntityResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fully qualified method path of the lookup RPC.
pub const LOOKUP_METHOD: &str = "/google.datastore.v1.Datastore/Lookup";
/// Fully qualified method path of the commit RPC.
pub const COMMIT_METHOD: &str = "/google.datastore.v1.Datastore/Commit";

/// Operation kind of an RPC.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RpcMethod {
    Lookup,
    Commit,
    Other(String),
}

impl RpcMethod {
    /// Classify a fully qualified method path.
    pub fn from_path(path: &str) -> Self {
        match path {
            LOOKUP_METHOD => RpcMethod::Lookup,
            COMMIT_METHOD => RpcMethod::Commit,
            other => RpcMethod::Other(other.to_string()),
        }
    }

    pub fn path(&self) -> &str {
        match self {
            RpcMethod::Lookup => LOOKUP_METHOD,
            RpcMethod::Commit => COMMIT_METHOD,
            RpcMethod::Other(path) => path,
        }
    }
}

impl fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

// ============================================================================
// LOOKUP
// ============================================================================

/// Read consistency requested by a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadConsistency {
    Strong,
    Eventual,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadOptions {
    pub consistency: Option<ReadConsistency>,
    /// Handle of the transaction the read belongs to, if any.
    pub transaction: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupRequest {
    pub project_id: String,
    pub read_options: ReadOptions,
    pub keys: Vec<EntityKey>,
}

impl LookupRequest {
    pub fn new(project_id: impl Into<String>, keys: Vec<EntityKey>) -> Self {
        Self {
            project_id: project_id.into(),
            read_options: ReadOptions::default(),
            keys,
        }
    }

    /// Bind the lookup to a transaction.
    pub fn in_transaction(mut self, transaction: impl Into<Vec<u8>>) -> Self {
        self.read_options.transaction = Some(transaction.into());
        self
    }

    pub fn has_transaction(&self) -> bool {
        self.read_options.transaction.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupResponse {
    pub found: Vec<EntityResult>,
    pub missing: Vec<EntityKey>,
    /// Keys the backend did not get to; the caller should retry them.
    pub deferred: Vec<EntityKey>,
}

// ============================================================================
// COMMIT
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitMode {
    #[default]
    Transactional,
    NonTransactional,
}

/// A single write in a commit batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    Insert(Entity),
    Update(Entity),
    Upsert(Entity),
    Delete(EntityKey),
}

impl Mutation {
    /// Key touched by this mutation.
    pub fn key(&self) -> &EntityKey {
        match self {
            Mutation::Insert(entity) | Mutation::Update(entity) | Mutation::Upsert(entity) => {
                &entity.key
            }
            Mutation::Delete(key) => key,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRequest {
    pub project_id: String,
    pub mode: CommitMode,
    pub transaction: Option<Vec<u8>>,
    pub mutations: Vec<Mutation>,
}

impl CommitRequest {
    pub fn new(project_id: impl Into<String>, mutations: Vec<Mutation>) -> Self {
        Self {
            project_id: project_id.into(),
            mode: CommitMode::NonTransactional,
            transaction: None,
            mutations,
        }
    }

    /// Keys whose cache entries a commit must invalidate, in mutation order.
    /// Duplicates are kept; cache deletion is idempotent.
    pub fn invalidation_keys(&self) -> Vec<EntityKey> {
        self.mutations.iter().map(|m| m.key().clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationResult {
    /// Allocated key for inserts of incomplete keys.
    pub key: Option<EntityKey>,
    pub version: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitResponse {
    pub mutation_results: Vec<MutationResult>,
    pub index_updates: i32,
}

// ============================================================================
// CALL ENVELOPES
// ============================================================================

/// Any RPC the interceptor does not understand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpaqueCall {
    pub method: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpaqueReply {
    pub payload: Vec<u8>,
}

/// Request side of an RPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcCall {
    Lookup(LookupRequest),
    Commit(CommitRequest),
    Other(OpaqueCall),
}

impl RpcCall {
    pub fn method(&self) -> RpcMethod {
        match self {
            RpcCall::Lookup(_) => RpcMethod::Lookup,
            RpcCall::Commit(_) => RpcMethod::Commit,
            RpcCall::Other(call) => RpcMethod::Other(call.method.clone()),
        }
    }
}

/// Response side of an RPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcReply {
    Lookup(LookupResponse),
    Commit(CommitResponse),
    Other(OpaqueReply),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_from_path() {
        assert_eq!(RpcMethod::from_path(LOOKUP_METHOD), RpcMethod::Lookup);
        assert_eq!(RpcMethod::from_path(COMMIT_METHOD), RpcMethod::Commit);
        let other = RpcMethod::from_path("/google.datastore.v1.Datastore/RunQuery");
        assert_eq!(
            other,
            RpcMethod::Other("/google.datastore.v1.Datastore/RunQuery".into())
        );
        assert_eq!(other.path(), "/google.datastore.v1.Datastore/RunQuery");
    }

    #[test]
    fn test_call_method() {
        let call = RpcCall::Lookup(LookupRequest::new("pj", vec![]));
        assert_eq!(call.method(), RpcMethod::Lookup);
        let call = RpcCall::Other(OpaqueCall {
            method: "/x/Y".into(),
            payload: vec![],
        });
        assert_eq!(call.method().path(), "/x/Y");
    }

    #[test]
    fn test_invalidation_keys_cover_every_mutation() {
        let a = EntityKey::id("Task", 1);
        let b = EntityKey::name("Task", "b");
        let request = CommitRequest::new(
            "pj",
            vec![
                Mutation::Insert(Entity::new(a.clone(), b"x".to_vec())),
                Mutation::Update(Entity::new(b.clone(), b"y".to_vec())),
                Mutation::Upsert(Entity::new(a.clone(), b"z".to_vec())),
                Mutation::Delete(b.clone()),
            ],
        );
        assert_eq!(request.invalidation_keys(), vec![a.clone(), b.clone(), a, b]);
    }

    #[test]
    fn test_transaction_marker() {
        let request = LookupRequest::new("pj", vec![EntityKey::id("Task", 1)]);
        assert!(!request.has_transaction());
        assert!(request.in_transaction(b"tx-1".to_vec()).has_transaction());
    }
}
