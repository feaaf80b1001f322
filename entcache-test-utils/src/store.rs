//! In-process entity store speaking the lookup/commit protocol.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use entcache_core::{
    BackendError, CommitRequest, CommitResponse, EntcacheResult, Entity, EntityKey, EntityResult,
    LookupRequest, LookupResponse, Mutation, MutationResult, OpaqueReply, PathId, RpcCall,
    RpcMethod, RpcReply,
};
use entcache_middleware::{CallContext, Invoker};

/// gRPC status codes the store reports.
pub mod status {
    pub const INVALID_ARGUMENT: i32 = 3;
    pub const NOT_FOUND: i32 = 5;
    pub const ALREADY_EXISTS: i32 = 6;
    pub const UNAVAILABLE: i32 = 14;
}

#[derive(Debug, Default)]
struct StoreState {
    entities: HashMap<EntityKey, EntityResult>,
    next_id: i64,
    version: u64,
}

impl StoreState {
    fn next_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    fn allocate(&mut self, key: &EntityKey) -> EntityKey {
        let mut key = key.clone();
        if let Some(last) = key.path.last_mut() {
            if last.id.is_none() {
                self.next_id += 1;
                last.id = Some(PathId::Id(self.next_id));
            }
        }
        key
    }
}

/// Versioned entity store standing in for the real backend.
///
/// Every committed batch gets one new version. Incomplete keys are allocated
/// sequential ids on insert and upsert. A commit either applies all of its
/// mutations or none.
#[derive(Debug, Default)]
pub struct FakeEntityStore {
    state: Mutex<StoreState>,
    calls: Mutex<Vec<RpcCall>>,
    failures: Mutex<Vec<(RpcMethod, i32)>>,
    deferred: Mutex<Vec<EntityKey>>,
    latency: Mutex<Option<Duration>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FakeEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `method` fail with `code`.
    pub fn fail_next(&self, method: RpcMethod, code: i32) {
        lock(&self.failures).push((method, code));
    }

    /// Report `keys` as deferred on the next lookup that asks for them.
    pub fn defer_once(&self, keys: Vec<EntityKey>) {
        lock(&self.deferred).extend(keys);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = Some(latency);
    }

    /// Write an entity without going through any interceptor.
    pub fn put_direct(&self, entity: Entity) -> EntityResult {
        let mut state = lock(&self.state);
        let key = state.allocate(&entity.key);
        let version = state.next_version();
        let stored = EntityResult::new(Entity::new(key.clone(), entity.payload), version);
        state.entities.insert(key, stored.clone());
        stored
    }

    /// Delete an entity without going through any interceptor.
    pub fn delete_direct(&self, key: &EntityKey) -> bool {
        let mut state = lock(&self.state);
        let removed = state.entities.remove(key).is_some();
        if removed {
            state.next_version();
        }
        removed
    }

    pub fn get_direct(&self, key: &EntityKey) -> Option<EntityResult> {
        lock(&self.state).entities.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every call received, in arrival order.
    pub fn calls(&self) -> Vec<RpcCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, method: &RpcMethod) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| &call.method() == method)
            .count()
    }

    pub fn lookup_count(&self) -> usize {
        self.call_count(&RpcMethod::Lookup)
    }

    pub fn commit_count(&self) -> usize {
        self.call_count(&RpcMethod::Commit)
    }

    /// Keys of every lookup received, one entry per call.
    pub fn looked_up_keys(&self) -> Vec<Vec<EntityKey>> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                RpcCall::Lookup(request) => Some(request.keys.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn reset_calls(&self) {
        lock(&self.calls).clear();
    }

    fn take_failure(&self, method: &RpcMethod) -> Option<BackendError> {
        let mut failures = lock(&self.failures);
        let index = failures.iter().position(|(m, _)| m == method)?;
        let (method, code) = failures.remove(index);
        Some(BackendError::new(&method, code, "injected failure"))
    }

    fn lookup(&self, request: LookupRequest) -> Result<LookupResponse, BackendError> {
        if request.keys.iter().any(|key| !key.is_complete()) {
            return Err(BackendError::new(
                &RpcMethod::Lookup,
                status::INVALID_ARGUMENT,
                "lookup of an incomplete key",
            ));
        }

        let state = lock(&self.state);
        let mut deferred = lock(&self.deferred);
        let mut response = LookupResponse::default();
        for key in request.keys {
            if let Some(index) = deferred.iter().position(|k| k == &key) {
                deferred.remove(index);
                response.deferred.push(key);
                continue;
            }
            match state.entities.get(&key) {
                Some(found) => response.found.push(found.clone()),
                None => response.missing.push(key),
            }
        }
        Ok(response)
    }

    fn commit(&self, request: CommitRequest) -> Result<CommitResponse, BackendError> {
        let fail = |code, message: &str| BackendError::new(&RpcMethod::Commit, code, message);

        let mut state = lock(&self.state);
        let mut staged = state.entities.clone();
        let mut next_id = state.next_id;
        let version = state.version + 1;
        let mut results = Vec::with_capacity(request.mutations.len());

        for mutation in request.mutations {
            let mut allocated = None;
            match mutation {
                Mutation::Insert(entity) | Mutation::Upsert(entity) if !entity.key.is_complete() => {
                    let mut key = entity.key.clone();
                    if let Some(last) = key.path.last_mut() {
                        next_id += 1;
                        last.id = Some(PathId::Id(next_id));
                    }
                    staged.insert(
                        key.clone(),
                        EntityResult::new(Entity::new(key.clone(), entity.payload), version),
                    );
                    allocated = Some(key);
                }
                Mutation::Insert(entity) => {
                    if staged.contains_key(&entity.key) {
                        return Err(fail(status::ALREADY_EXISTS, "entity already exists"));
                    }
                    staged.insert(entity.key.clone(), EntityResult::new(entity, version));
                }
                Mutation::Update(entity) => {
                    if !staged.contains_key(&entity.key) {
                        return Err(fail(status::NOT_FOUND, "no entity to update"));
                    }
                    staged.insert(entity.key.clone(), EntityResult::new(entity, version));
                }
                Mutation::Upsert(entity) => {
                    staged.insert(entity.key.clone(), EntityResult::new(entity, version));
                }
                Mutation::Delete(key) => {
                    if !key.is_complete() {
                        return Err(fail(status::INVALID_ARGUMENT, "delete of an incomplete key"));
                    }
                    staged.remove(&key);
                }
            }
            results.push(MutationResult {
                key: allocated,
                version,
            });
        }

        let index_updates = results.len() as i32;
        state.entities = staged;
        state.next_id = next_id;
        state.version = version;
        Ok(CommitResponse {
            mutation_results: results,
            index_updates,
        })
    }
}

#[async_trait]
impl Invoker for FakeEntityStore {
    async fn invoke(&self, _ctx: &CallContext, call: RpcCall) -> EntcacheResult<RpcReply> {
        lock(&self.calls).push(call.clone());

        let latency = *lock(&self.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(error) = self.take_failure(&call.method()) {
            return Err(error.into());
        }

        let reply = match call {
            RpcCall::Lookup(request) => RpcReply::Lookup(self.lookup(request)?),
            RpcCall::Commit(request) => RpcReply::Commit(self.commit(request)?),
            RpcCall::Other(call) => RpcReply::Other(OpaqueReply {
                payload: call.payload,
            }),
        };
        Ok(reply)
    }
}
