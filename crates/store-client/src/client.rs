//! Kubernetes-backed object store client
//!
//! Compare-and-swap writes are JSON merge patches carrying the object's
//! `resourceVersion`: the object patch carries the base snapshot's version,
//! and the status patch carries the version the object patch returned. The
//! API server rejects either with 409 when the stored object has moved on.
//! Only changed keys are sent, so fields of external resources that the
//! typed model does not know are left untouched.

use crate::changes::{changes, merge_patch, split};
use crate::error::StoreError;
use crate::store_trait::StoreClientTrait;
use crds::{
    BmcJob, CapiCluster, CapiMachine, Hardware, Selector, Template, TinkerbellCluster,
    TinkerbellMachine, Workflow,
};
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::fmt::Debug;
use tracing::debug;

/// Object store client talking to the Kubernetes API server
#[derive(Clone)]
pub struct KubeStoreClient {
    client: Client,
}

impl std::fmt::Debug for KubeStoreClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStoreClient").finish_non_exhaustive()
    }
}

/// `Kind namespace/name`, used in errors and logs
fn describe<K>(namespace: &str, name: &str) -> String
where
    K: Resource,
    K::DynamicType: Default,
{
    format!("{} {}/{}", K::kind(&K::DynamicType::default()), namespace, name)
}

/// Namespace and name of an object about to be written
fn key<K>(obj: &K) -> Result<(String, String), StoreError>
where
    K: Resource,
{
    let name = obj
        .meta()
        .name
        .clone()
        .ok_or_else(|| StoreError::InvalidObject("object has no name".to_string()))?;
    let namespace = obj
        .namespace()
        .ok_or_else(|| StoreError::InvalidObject(format!("{} has no namespace", name)))?;
    Ok((namespace, name))
}

impl KubeStoreClient {
    /// Creates a client from an existing Kubernetes client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get<K>(&self, namespace: &str, name: &str) -> Result<K, StoreError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        self.api::<K>(namespace)
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube(e, &describe::<K>(namespace, name)))
    }

    async fn create<K>(&self, obj: &K) -> Result<K, StoreError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + Serialize + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let (namespace, name) = key(obj)?;
        let what = describe::<K>(&namespace, &name);
        debug!("Creating {}", what);
        self.api::<K>(&namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| StoreError::from_kube(e, &what))
    }

    async fn delete<K>(&self, namespace: &str, name: &str) -> Result<(), StoreError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let what = describe::<K>(namespace, name);
        debug!("Deleting {}", what);
        self.api::<K>(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| StoreError::from_kube(e, &what))
    }

    async fn patch<K>(&self, updated: &K, base: &K) -> Result<K, StoreError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + Serialize + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let (namespace, name) = key(updated)?;
        let what = describe::<K>(&namespace, &name);
        let diff = changes(updated, base)?;
        if diff.is_empty() {
            debug!("No changes to write for {}", what);
            return Ok(base.clone());
        }

        let api = self.api::<K>(&namespace);
        let mut current = base.clone();

        if diff.object {
            let mut patch = merge_patch(updated, base)?;
            if let Some(body) = patch.as_object_mut() {
                let metadata = body.entry("metadata").or_insert_with(|| json!({}));
                if let Some(metadata) = metadata.as_object_mut() {
                    metadata.insert(
                        "resourceVersion".to_string(),
                        json!(base.meta().resource_version),
                    );
                }
            }
            current = api
                .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                .await
                .map_err(|e| StoreError::from_kube(e, &what))?;
            debug!("Patched {}", what);
        }

        if diff.status {
            let (_, status) = split(updated)?;
            let patch = json!({
                "metadata": { "resourceVersion": current.meta().resource_version },
                "status": status,
            });
            current = api
                .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
                .await
                .map_err(|e| StoreError::from_kube(e, &what))?;
            debug!("Patched status of {}", what);
        }

        Ok(current)
    }
}

#[async_trait::async_trait]
impl StoreClientTrait for KubeStoreClient {
    async fn get_tinkerbell_machine(&self, namespace: &str, name: &str) -> Result<TinkerbellMachine, StoreError> {
        self.get(namespace, name).await
    }

    async fn patch_tinkerbell_machine(&self, updated: &TinkerbellMachine, base: &TinkerbellMachine) -> Result<TinkerbellMachine, StoreError> {
        self.patch(updated, base).await
    }

    async fn get_tinkerbell_cluster(&self, namespace: &str, name: &str) -> Result<TinkerbellCluster, StoreError> {
        self.get(namespace, name).await
    }

    async fn patch_tinkerbell_cluster(&self, updated: &TinkerbellCluster, base: &TinkerbellCluster) -> Result<TinkerbellCluster, StoreError> {
        self.patch(updated, base).await
    }

    async fn get_capi_cluster(&self, namespace: &str, name: &str) -> Result<CapiCluster, StoreError> {
        self.get(namespace, name).await
    }

    async fn get_capi_machine(&self, namespace: &str, name: &str) -> Result<CapiMachine, StoreError> {
        self.get(namespace, name).await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, StoreError> {
        self.get(namespace, name).await
    }

    async fn get_hardware(&self, namespace: &str, name: &str) -> Result<Hardware, StoreError> {
        self.get(namespace, name).await
    }

    async fn list_hardware(&self, namespace: Option<&str>, selector: &Selector) -> Result<Vec<Hardware>, StoreError> {
        let api: Api<Hardware> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let mut params = ListParams::default();
        if !selector.is_everything() {
            params = params.labels(&selector.to_string());
        }
        debug!("Listing Hardware with selector '{}'", selector);
        let list = api
            .list(&params)
            .await
            .map_err(|e| StoreError::from_kube(e, &format!("Hardware list '{}'", selector)))?;
        Ok(list.items)
    }

    async fn patch_hardware(&self, updated: &Hardware, base: &Hardware) -> Result<Hardware, StoreError> {
        self.patch(updated, base).await
    }

    async fn get_template(&self, namespace: &str, name: &str) -> Result<Template, StoreError> {
        self.get(namespace, name).await
    }

    async fn create_template(&self, template: &Template) -> Result<Template, StoreError> {
        self.create(template).await
    }

    async fn delete_template(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.delete::<Template>(namespace, name).await
    }

    async fn get_workflow(&self, namespace: &str, name: &str) -> Result<Workflow, StoreError> {
        self.get(namespace, name).await
    }

    async fn create_workflow(&self, workflow: &Workflow) -> Result<Workflow, StoreError> {
        self.create(workflow).await
    }

    async fn delete_workflow(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.delete::<Workflow>(namespace, name).await
    }

    async fn get_bmc_job(&self, namespace: &str, name: &str) -> Result<BmcJob, StoreError> {
        self.get(namespace, name).await
    }

    async fn create_bmc_job(&self, job: &BmcJob) -> Result<BmcJob, StoreError> {
        self.create(job).await
    }

    async fn delete_bmc_job(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.delete::<BmcJob>(namespace, name).await
    }
}
