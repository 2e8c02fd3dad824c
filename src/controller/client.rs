//! Cluster object access used by the test pipeline
//!
//! The pipeline only needs get/create/status-update/delete/list on a handful
//! of kinds, so it talks to the cluster through [`ClusterClient`]. The kube-rs
//! implementation is [`KubeClusterClient`]; tests use an in-memory one.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Field manager used for every write the operator makes
pub const FIELD_MANAGER: &str = "coastie-operator";

/// A namespaced kind the operator reads or writes
pub trait NamespacedObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> NamespacedObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Any kind, including cluster-scoped ones such as Node
pub trait AnyObject:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<K> AnyObject for K where
    K: Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// `Ok(None)` when the object does not exist
    async fn get<K: NamespacedObject>(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    async fn create<K: NamespacedObject>(&self, namespace: &str, obj: &K) -> Result<K>;

    /// Persist `obj.status` in one write to the status subresource
    async fn update_status<K: NamespacedObject>(&self, namespace: &str, obj: &K) -> Result<K>;

    /// `Ok(false)` when there was nothing to delete
    async fn delete<K: NamespacedObject>(&self, namespace: &str, name: &str) -> Result<bool>;

    async fn list<K: NamespacedObject>(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<K>>;

    /// List across the whole cluster
    async fn list_all<K: AnyObject>(&self, label_selector: Option<&str>) -> Result<Vec<K>>;
}

/// [`ClusterClient`] backed by the API server
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get<K: NamespacedObject>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create<K: NamespacedObject>(&self, namespace: &str, obj: &K) -> Result<K> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let pp = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        Ok(api.create(&pp, obj).await?)
    }

    async fn update_status<K: NamespacedObject>(&self, namespace: &str, obj: &K) -> Result<K> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let name = obj
            .meta()
            .name
            .clone()
            .ok_or(Error::MissingObjectKey("metadata.name"))?;

        let value = serde_json::to_value(obj)?;
        let patch = serde_json::json!({ "status": value.get("status").cloned() });

        Ok(api
            .patch_status(
                &name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?)
    }

    async fn delete<K: NamespacedObject>(&self, namespace: &str, name: &str) -> Result<bool> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!("{} {}/{} already gone", K::kind(&()), namespace, name);
                Ok(false)
            }
            Err(e) => Err(Error::KubeError(e)),
        }
    }

    async fn list<K: NamespacedObject>(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<K>> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default().labels(label_selector)).await?;
        Ok(list.items)
    }

    async fn list_all<K: AnyObject>(&self, label_selector: Option<&str>) -> Result<Vec<K>> {
        let api: Api<K> = Api::all(self.client.clone());
        let mut lp = ListParams::default();
        if let Some(selector) = label_selector {
            lp = lp.labels(selector);
        }
        let list = api.list(&lp).await?;
        Ok(list.items)
    }
}

