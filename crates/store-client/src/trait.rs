//! StoreClient trait for mocking
//!
//! This trait abstracts the object store so reconcilers can run against the
//! Kubernetes API in production and against [`crate::MockStoreClient`] in tests.

use crate::error::StoreError;
use crds::{
    BmcJob, CapiCluster, CapiMachine, Hardware, Selector, Template, TinkerbellCluster,
    TinkerbellMachine, Workflow,
};
use k8s_openapi::api::core::v1::Secret;

/// Trait for object store operations
///
/// `patch_*` methods write `updated` only if `base` is still the stored
/// version, and only the parts that differ from `base`. Unchanged objects
/// are returned without a write. `delete_*` of an object carrying finalizers
/// marks it for deletion; it disappears once the finalizers are removed.
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait StoreClientTrait: Send + Sync {
    // Provider resources
    async fn get_tinkerbell_machine(&self, namespace: &str, name: &str) -> Result<TinkerbellMachine, StoreError>;
    async fn patch_tinkerbell_machine(&self, updated: &TinkerbellMachine, base: &TinkerbellMachine) -> Result<TinkerbellMachine, StoreError>;
    async fn get_tinkerbell_cluster(&self, namespace: &str, name: &str) -> Result<TinkerbellCluster, StoreError>;
    async fn patch_tinkerbell_cluster(&self, updated: &TinkerbellCluster, base: &TinkerbellCluster) -> Result<TinkerbellCluster, StoreError>;

    // Cluster API resources (read-only)
    async fn get_capi_cluster(&self, namespace: &str, name: &str) -> Result<CapiCluster, StoreError>;
    async fn get_capi_machine(&self, namespace: &str, name: &str) -> Result<CapiMachine, StoreError>;
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, StoreError>;

    // Tinkerbell resources
    async fn get_hardware(&self, namespace: &str, name: &str) -> Result<Hardware, StoreError>;
    /// Lists hardware in `namespace` (all namespaces when `None`) matching `selector`
    async fn list_hardware(&self, namespace: Option<&str>, selector: &Selector) -> Result<Vec<Hardware>, StoreError>;
    async fn patch_hardware(&self, updated: &Hardware, base: &Hardware) -> Result<Hardware, StoreError>;
    async fn get_template(&self, namespace: &str, name: &str) -> Result<Template, StoreError>;
    async fn create_template(&self, template: &Template) -> Result<Template, StoreError>;
    async fn delete_template(&self, namespace: &str, name: &str) -> Result<(), StoreError>;
    async fn get_workflow(&self, namespace: &str, name: &str) -> Result<Workflow, StoreError>;
    async fn create_workflow(&self, workflow: &Workflow) -> Result<Workflow, StoreError>;
    async fn delete_workflow(&self, namespace: &str, name: &str) -> Result<(), StoreError>;

    // BMC resources
    async fn get_bmc_job(&self, namespace: &str, name: &str) -> Result<BmcJob, StoreError>;
    async fn create_bmc_job(&self, job: &BmcJob) -> Result<BmcJob, StoreError>;
    async fn delete_bmc_job(&self, namespace: &str, name: &str) -> Result<(), StoreError>;
}
