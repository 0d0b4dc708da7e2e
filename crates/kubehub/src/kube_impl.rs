//! kube-rs backed capabilities.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::marker::PhantomData;

use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Api, ObjectMeta, Patch, PatchParams, PostParams},
    Client, Resource, ResourceExt,
};
use kuadra_core::{ObjectKey, StoreError, StoreResult};
use metrics::counter;
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::{ClusterStore, RecordStore, MANAGED_BY_LABEL};

/// Translate API server failures into the store taxonomy.
pub fn map_kube_err(err: kube::Error) -> StoreError {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound(ae.message),
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => StoreError::AlreadyExists(ae.message),
        kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict(ae.message),
        kube::Error::Api(ae) if ae.code == 400 || ae.code == 422 => StoreError::Invalid(ae.message),
        other => StoreError::Backend(other.to_string()),
    }
}

fn managed_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(MANAGED_BY_LABEL.0.to_string(), MANAGED_BY_LABEL.1.to_string())])
}

/// Namespaced custom resources through the API server.
pub struct KubeRecords<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeRecords<K> {
    pub fn new(client: Client) -> Self { Self { client, _kind: PhantomData } }
}

impl<K> KubeRecords<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    fn api(&self, namespace: Option<&str>) -> Api<K> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::default_namespaced(self.client.clone()),
        }
    }
}

#[async_trait::async_trait]
impl<K> RecordStore<K> for KubeRecords<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, key: &ObjectKey) -> StoreResult<Option<K>> {
        self.api(key.namespace.as_deref()).get_opt(&key.name).await.map_err(map_kube_err)
    }

    async fn create(&self, obj: &K) -> StoreResult<K> {
        let ns = obj.namespace();
        let created = self.api(ns.as_deref()).create(&PostParams::default(), obj).await.map_err(map_kube_err)?;
        counter!("store_writes_total", 1u64, "op" => "create");
        Ok(created)
    }

    async fn update(&self, obj: &K) -> StoreResult<K> {
        let ns = obj.namespace();
        let updated = self
            .api(ns.as_deref())
            .replace(&obj.name_any(), &PostParams::default(), obj)
            .await
            .map_err(map_kube_err)?;
        counter!("store_writes_total", 1u64, "op" => "update");
        Ok(updated)
    }

    async fn update_status(&self, obj: &K) -> StoreResult<K> {
        let ns = obj.namespace();
        let body = serde_json::to_vec(obj).map_err(|e| StoreError::Invalid(e.to_string()))?;
        let updated = self
            .api(ns.as_deref())
            .replace_status(&obj.name_any(), &PostParams::default(), body)
            .await
            .map_err(map_kube_err)?;
        counter!("store_writes_total", 1u64, "op" => "update_status");
        Ok(updated)
    }
}

/// Namespaces and opaque secrets through the API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self { Self { client } }
}

#[async_trait::async_trait]
impl ClusterStore for KubeCluster {
    async fn namespace_exists(&self, name: &str) -> StoreResult<bool> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await.map_err(map_kube_err)?.is_some())
    }

    async fn create_namespace_if_absent(&self, name: &str) -> StoreResult<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta { name: Some(name.to_string()), labels: Some(managed_labels()), ..Default::default() },
            ..Default::default()
        };
        match api.create(&PostParams::default(), &ns).await.map_err(map_kube_err) {
            Ok(_) => Ok(()),
            Err(StoreError::AlreadyExists(_)) => {
                debug!(namespace = %name, "namespace already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn read_secret(&self, namespace: &str, name: &str) -> StoreResult<Option<BTreeMap<String, String>>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let Some(secret) = api.get_opt(name).await.map_err(map_kube_err)? else { return Ok(None) };
        let mut out = BTreeMap::new();
        for (k, v) in secret.data.unwrap_or_default() {
            let s = String::from_utf8(v.0).map_err(|_| StoreError::Invalid(format!("secret {}/{} key {} is not utf-8", namespace, name, k)))?;
            out.insert(k, s);
        }
        Ok(Some(out))
    }

    async fn write_secret_if_absent(&self, namespace: &str, name: &str, data: BTreeMap<String, String>) -> StoreResult<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = opaque_secret(namespace, name, data);
        match api.create(&PostParams::default(), &secret).await.map_err(map_kube_err) {
            Ok(_) => {
                counter!("store_writes_total", 1u64, "op" => "secret");
                Ok(())
            }
            Err(StoreError::AlreadyExists(_)) => {
                debug!(namespace = %namespace, secret = %name, "secret already exists; keeping stored value");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn put_secret(&self, namespace: &str, name: &str, data: BTreeMap<String, String>) -> StoreResult<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = opaque_secret(namespace, name, data);
        let pp = PatchParams::apply(FIELD_MANAGER).force();
        api.patch(name, &pp, &Patch::Apply(&secret)).await.map_err(map_kube_err)?;
        counter!("store_writes_total", 1u64, "op" => "secret");
        Ok(())
    }
}

const FIELD_MANAGER: &str = "kuadra";

fn opaque_secret(namespace: &str, name: &str, data: BTreeMap<String, String>) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(managed_labels()),
            ..Default::default()
        },
        string_data: Some(data),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_err(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse { status: "Failure".into(), message: format!("{} {}", code, reason), reason: reason.into(), code })
    }

    #[test]
    fn maps_api_status_codes() {
        assert!(map_kube_err(api_err(404, "NotFound")).is_not_found());
        assert!(map_kube_err(api_err(409, "AlreadyExists")).is_already_exists());
        assert!(map_kube_err(api_err(409, "Conflict")).is_conflict());
        assert!(matches!(map_kube_err(api_err(422, "Invalid")), StoreError::Invalid(_)));
        assert!(matches!(map_kube_err(api_err(500, "InternalError")), StoreError::Backend(_)));
    }
}
