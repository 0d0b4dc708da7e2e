//! In-memory capabilities with API-server-like versioning.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use kube::{Resource, ResourceExt};
use kuadra_core::{AwsAccount, ObjectKey, StoreError, StoreResult, User};
use rustc_hash::FxHashMap;

use crate::{ClusterStore, RecordStore};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> { m.lock().unwrap_or_else(PoisonError::into_inner) }

/// How a kind splits into desired and observed sections, mirroring the
/// API server's main resource vs. status subresource.
pub trait Subresources: Clone {
    /// Result of a main-resource replace: incoming spec/metadata, stored status.
    fn merge_main(stored: &Self, incoming: &Self) -> Self;
    /// Result of a status replace: stored spec/metadata, incoming status.
    fn merge_status(stored: &Self, incoming: &Self) -> Self;
}

impl Subresources for AwsAccount {
    fn merge_main(stored: &Self, incoming: &Self) -> Self {
        let mut out = incoming.clone();
        out.status = stored.status.clone();
        out
    }

    fn merge_status(stored: &Self, incoming: &Self) -> Self {
        let mut out = stored.clone();
        out.status = incoming.status.clone();
        out
    }
}

impl Subresources for User {
    fn merge_main(_stored: &Self, incoming: &Self) -> Self { incoming.clone() }

    fn merge_status(stored: &Self, _incoming: &Self) -> Self { stored.clone() }
}

struct RecordsState<K> {
    objects: FxHashMap<ObjectKey, K>,
    next_rv: u64,
    creates: usize,
    updates: usize,
    status_updates: usize,
    fail_next: Option<StoreError>,
}

/// Record store double. Every write bumps a global resource version and
/// stale writes are rejected with `Conflict`.
pub struct MemoryRecords<K> {
    state: Mutex<RecordsState<K>>,
}

impl<K> Default for MemoryRecords<K> {
    fn default() -> Self {
        Self {
            state: Mutex::new(RecordsState {
                objects: FxHashMap::default(),
                next_rv: 0,
                creates: 0,
                updates: 0,
                status_updates: 0,
                fail_next: None,
            }),
        }
    }
}

fn key_of<K: Resource>(obj: &K) -> ObjectKey { ObjectKey::new(obj.meta().namespace.as_deref(), &obj.name_any()) }

impl<K: Resource + Subresources> MemoryRecords<K> {
    pub fn new() -> Self { Self::default() }

    /// Insert or replace a record directly, assigning a fresh resource version.
    pub fn seed(&self, mut obj: K) -> K {
        let mut st = lock(&self.state);
        st.next_rv += 1;
        obj.meta_mut().resource_version = Some(st.next_rv.to_string());
        st.objects.insert(key_of(&obj), obj.clone());
        obj
    }

    pub fn get_now(&self, key: &ObjectKey) -> Option<K> { lock(&self.state).objects.get(key).cloned() }

    /// Simulate a concurrent writer by bumping the stored version.
    pub fn touch(&self, key: &ObjectKey) {
        let mut st = lock(&self.state);
        st.next_rv += 1;
        let rv = st.next_rv.to_string();
        if let Some(obj) = st.objects.get_mut(key) {
            obj.meta_mut().resource_version = Some(rv);
        }
    }

    /// Fail the next write (create/update/update_status) with `err`.
    pub fn fail_next_write(&self, err: StoreError) { lock(&self.state).fail_next = Some(err); }

    pub fn creates(&self) -> usize { lock(&self.state).creates }
    pub fn updates(&self) -> usize { lock(&self.state).updates }
    pub fn status_updates(&self) -> usize { lock(&self.state).status_updates }

    fn write(&self, obj: &K, merge: fn(&K, &K) -> K) -> StoreResult<K> {
        let mut st = lock(&self.state);
        if let Some(err) = st.fail_next.take() {
            return Err(err);
        }
        let key = key_of(obj);
        let stored = st.objects.get(&key).ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        if stored.meta().resource_version != obj.meta().resource_version {
            return Err(StoreError::Conflict(format!(
                "{}: resourceVersion {:?} does not match stored {:?}",
                key,
                obj.meta().resource_version,
                stored.meta().resource_version
            )));
        }
        let mut next = merge(stored, obj);
        st.next_rv += 1;
        next.meta_mut().resource_version = Some(st.next_rv.to_string());
        st.objects.insert(key, next.clone());
        Ok(next)
    }
}

#[async_trait::async_trait]
impl<K> RecordStore<K> for MemoryRecords<K>
where
    K: Resource + Subresources + Send + Sync + 'static,
{
    async fn get(&self, key: &ObjectKey) -> StoreResult<Option<K>> { Ok(lock(&self.state).objects.get(key).cloned()) }

    async fn create(&self, obj: &K) -> StoreResult<K> {
        let mut st = lock(&self.state);
        if let Some(err) = st.fail_next.take() {
            return Err(err);
        }
        let key = key_of(obj);
        if st.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        let mut created = obj.clone();
        st.next_rv += 1;
        created.meta_mut().resource_version = Some(st.next_rv.to_string());
        st.objects.insert(key, created.clone());
        st.creates += 1;
        Ok(created)
    }

    async fn update(&self, obj: &K) -> StoreResult<K> {
        let out = self.write(obj, K::merge_main)?;
        lock(&self.state).updates += 1;
        Ok(out)
    }

    async fn update_status(&self, obj: &K) -> StoreResult<K> {
        let out = self.write(obj, K::merge_status)?;
        lock(&self.state).status_updates += 1;
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterOp {
    NamespaceExists,
    CreateNamespace,
    ReadSecret,
    WriteSecret,
}

#[derive(Default)]
struct ClusterState {
    namespaces: BTreeSet<String>,
    secrets: BTreeMap<(String, String), BTreeMap<String, String>>,
    calls: Vec<ClusterOp>,
    failures: HashMap<ClusterOp, usize>,
}

/// Namespace/secret double. Secrets can only be written into existing namespaces.
#[derive(Default)]
pub struct MemoryCluster {
    state: Mutex<ClusterState>,
}

impl MemoryCluster {
    pub fn new() -> Self { Self::default() }

    pub fn fail_once(&self, op: ClusterOp) { *lock(&self.state).failures.entry(op).or_insert(0) += 1; }

    pub fn seed_namespace(&self, name: &str) { lock(&self.state).namespaces.insert(name.to_string()); }

    pub fn has_namespace(&self, name: &str) -> bool { lock(&self.state).namespaces.contains(name) }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<BTreeMap<String, String>> {
        lock(&self.state).secrets.get(&(namespace.to_string(), name.to_string())).cloned()
    }

    pub fn count(&self, op: ClusterOp) -> usize { lock(&self.state).calls.iter().filter(|c| **c == op).count() }

    fn enter(&self, op: ClusterOp) -> StoreResult<MutexGuard<'_, ClusterState>> {
        let mut st = lock(&self.state);
        st.calls.push(op);
        if let Some(n) = st.failures.get_mut(&op) {
            if *n > 0 {
                *n -= 1;
                return Err(StoreError::Backend(format!("injected {:?} failure", op)));
            }
        }
        Ok(st)
    }
}

#[async_trait::async_trait]
impl ClusterStore for MemoryCluster {
    async fn namespace_exists(&self, name: &str) -> StoreResult<bool> {
        Ok(self.enter(ClusterOp::NamespaceExists)?.namespaces.contains(name))
    }

    async fn create_namespace_if_absent(&self, name: &str) -> StoreResult<()> {
        self.enter(ClusterOp::CreateNamespace)?.namespaces.insert(name.to_string());
        Ok(())
    }

    async fn read_secret(&self, namespace: &str, name: &str) -> StoreResult<Option<BTreeMap<String, String>>> {
        let st = self.enter(ClusterOp::ReadSecret)?;
        Ok(st.secrets.get(&(namespace.to_string(), name.to_string())).cloned())
    }

    async fn write_secret_if_absent(&self, namespace: &str, name: &str, data: BTreeMap<String, String>) -> StoreResult<()> {
        let mut st = self.enter(ClusterOp::WriteSecret)?;
        if !st.namespaces.contains(namespace) {
            return Err(StoreError::NotFound(format!("namespace {}", namespace)));
        }
        st.secrets.entry((namespace.to_string(), name.to_string())).or_insert(data);
        Ok(())
    }

    async fn put_secret(&self, namespace: &str, name: &str, data: BTreeMap<String, String>) -> StoreResult<()> {
        let mut st = self.enter(ClusterOp::WriteSecret)?;
        if !st.namespaces.contains(namespace) {
            return Err(StoreError::NotFound(format!("namespace {}", namespace)));
        }
        st.secrets.insert((namespace.to_string(), name.to_string()), data);
        Ok(())
    }
}
