//! Kuadra kubehub: versioned object records and namespace/secret storage.
//!
//! Two capabilities are exposed to the reconcilers: [`RecordStore`] for the
//! custom resources themselves and [`ClusterStore`] for the per-principal
//! namespace and the secrets holding generated credentials. Each has a kube-rs
//! implementation and an in-memory one.

#![forbid(unsafe_code)]

mod kube_impl;
mod memory;

use std::collections::BTreeMap;

use anyhow::Result;
use kuadra_core::{ObjectKey, StoreResult};

pub use kube_impl::{map_kube_err, KubeCluster, KubeRecords};
pub use memory::{ClusterOp, MemoryCluster, MemoryRecords, Subresources};

/// Label stamped on every object this operator creates.
pub const MANAGED_BY_LABEL: (&str, &str) = ("app.kubernetes.io/managed-by", "kuadra");

/// Versioned records keyed by namespace/name.
///
/// `update` and `update_status` are optimistic: the record's
/// `metadata.resourceVersion` must match the stored one, otherwise
/// `StoreError::Conflict` is returned and nothing is written.
#[async_trait::async_trait]
pub trait RecordStore<K>: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> StoreResult<Option<K>>;
    async fn create(&self, obj: &K) -> StoreResult<K>;
    /// Replace the desired-state section (and metadata); status is left untouched.
    async fn update(&self, obj: &K) -> StoreResult<K>;
    /// Replace the observed-state section only.
    async fn update_status(&self, obj: &K) -> StoreResult<K>;
}

/// Namespaces and secrets for provisioned principals.
#[async_trait::async_trait]
pub trait ClusterStore: Send + Sync {
    async fn namespace_exists(&self, name: &str) -> StoreResult<bool>;
    /// "Already exists" counts as success.
    async fn create_namespace_if_absent(&self, name: &str) -> StoreResult<()>;
    async fn read_secret(&self, namespace: &str, name: &str) -> StoreResult<Option<BTreeMap<String, String>>>;
    /// Never overwrites: an existing secret is left as-is and the call succeeds.
    async fn write_secret_if_absent(&self, namespace: &str, name: &str, data: BTreeMap<String, String>) -> StoreResult<()>;
    /// Create or replace.
    async fn put_secret(&self, namespace: &str, name: &str, data: BTreeMap<String, String>) -> StoreResult<()>;
}

/// Client for the current kubeconfig context or in-cluster service account.
pub async fn kube_client() -> Result<kube::Client> {
    let client = kube::Client::try_default().await?;
    Ok(client)
}
