//! Mock StoreClient for unit testing
//!
//! In-memory implementation of [`StoreClientTrait`] with the same
//! optimistic-concurrency contract as the API server: every write bumps the
//! `resourceVersion`, a `patch_*` whose base is stale fails with
//! [`StoreError::Conflict`], and deleting an object that carries finalizers
//! only marks it for deletion.

use crate::changes::changes;
use crate::error::StoreError;
use crate::store_trait::StoreClientTrait;
use crds::{
    BmcJob, BmcJobStatus, CapiCluster, CapiMachine, Hardware, Selector, Template,
    TinkerbellCluster, TinkerbellMachine, Workflow, WorkflowStatus,
};
use k8s_openapi::api::core::v1::Secret;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

type Key = (String, String);
type Store<K> = Arc<Mutex<BTreeMap<Key, K>>>;

const DELETION_TIMESTAMP: &str = "2026-01-01T00:00:00Z";

/// Mock StoreClient for testing
///
/// Clones share the same storage, so a test can hand one clone to a
/// reconciler and inspect the store through another.
#[derive(Clone, Debug, Default)]
pub struct MockStoreClient {
    tinkerbell_machines: Store<TinkerbellMachine>,
    tinkerbell_clusters: Store<TinkerbellCluster>,
    capi_clusters: Store<CapiCluster>,
    capi_machines: Store<CapiMachine>,
    secrets: Store<Secret>,
    hardware: Store<Hardware>,
    templates: Store<Template>,
    workflows: Store<Workflow>,
    bmc_jobs: Store<BmcJob>,
    // Counter for resource versions and UIDs
    next_id: Arc<Mutex<u64>>,
    // Number of upcoming hardware patches to fail with a conflict
    pending_hardware_conflicts: Arc<Mutex<u32>>,
    hardware_list_calls: Arc<Mutex<usize>>,
    // Yield to the runtime after each hardware list
    yield_after_hardware_list: Arc<Mutex<bool>>,
}

fn key_of<K: Resource>(obj: &K) -> Result<Key, StoreError> {
    let name = obj
        .meta()
        .name
        .clone()
        .ok_or_else(|| StoreError::InvalidObject("object has no name".to_string()))?;
    let namespace = obj
        .meta()
        .namespace
        .clone()
        .ok_or_else(|| StoreError::InvalidObject(format!("{} has no namespace", name)))?;
    Ok((namespace, name))
}

fn describe<K: Resource<DynamicType = ()>>(key: &Key) -> String {
    format!("{} {}/{}", K::kind(&()), key.0, key.1)
}

impl MockStoreClient {
    /// Create a new, empty mock store
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> u64 {
        let mut id = self.next_id.lock().unwrap();
        *id += 1;
        *id
    }

    fn insert<K>(&self, store: &Store<K>, mut obj: K) -> K
    where
        K: Resource<DynamicType = ()> + Clone,
    {
        let id = self.next_id();
        if obj.meta().uid.is_none() {
            obj.meta_mut().uid = Some(format!("mock-uid-{}", id));
        }
        obj.meta_mut().resource_version = Some(id.to_string());
        if obj.meta().namespace.is_none() {
            obj.meta_mut().namespace = Some("default".to_string());
        }
        if let Ok(key) = key_of(&obj) {
            store.lock().unwrap().insert(key, obj.clone());
        }
        obj
    }

    fn get_in<K>(&self, store: &Store<K>, namespace: &str, name: &str) -> Result<K, StoreError>
    where
        K: Resource<DynamicType = ()> + Clone,
    {
        let key = (namespace.to_string(), name.to_string());
        store
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(describe::<K>(&key)))
    }

    fn create_in<K>(&self, store: &Store<K>, obj: &K) -> Result<K, StoreError>
    where
        K: Resource<DynamicType = ()> + Clone,
    {
        let key = key_of(obj)?;
        if store.lock().unwrap().contains_key(&key) {
            return Err(StoreError::AlreadyExists(describe::<K>(&key)));
        }
        Ok(self.insert(store, obj.clone()))
    }

    fn patch_in<K>(&self, store: &Store<K>, updated: &K, base: &K) -> Result<K, StoreError>
    where
        K: Resource<DynamicType = ()> + Clone + Serialize,
    {
        let key = key_of(updated)?;
        if changes(updated, base)?.is_empty() {
            return Ok(base.clone());
        }

        let mut map = store.lock().unwrap();
        let stored = map
            .get(&key)
            .ok_or_else(|| StoreError::NotFound(describe::<K>(&key)))?;
        if stored.meta().resource_version != base.meta().resource_version {
            return Err(StoreError::Conflict(describe::<K>(&key)));
        }

        let mut obj = updated.clone();
        obj.meta_mut().uid = stored.meta().uid.clone();
        obj.meta_mut().deletion_timestamp = stored.meta().deletion_timestamp.clone();
        obj.meta_mut().resource_version = Some(self.next_id().to_string());

        if obj.meta().deletion_timestamp.is_some() && obj.finalizers().is_empty() {
            map.remove(&key);
        } else {
            map.insert(key, obj.clone());
        }
        Ok(obj)
    }

    fn delete_in<K>(&self, store: &Store<K>, namespace: &str, name: &str) -> Result<(), StoreError>
    where
        K: Resource<DynamicType = ()> + Clone,
    {
        let key = (namespace.to_string(), name.to_string());
        let mut map = store.lock().unwrap();
        let has_finalizers = match map.get(&key) {
            Some(obj) => !obj.finalizers().is_empty(),
            None => return Err(StoreError::NotFound(describe::<K>(&key))),
        };
        if !has_finalizers {
            map.remove(&key);
            return Ok(());
        }
        let version = self.next_id().to_string();
        if let Some(obj) = map.get_mut(&key) {
            if obj.meta().deletion_timestamp.is_none() {
                obj.meta_mut().deletion_timestamp =
                    serde_json::from_value(serde_json::json!(DELETION_TIMESTAMP)).ok();
                obj.meta_mut().resource_version = Some(version);
            }
        }
        Ok(())
    }

    fn set_status<K, S>(&self, store: &Store<K>, namespace: &str, name: &str, apply: impl FnOnce(&mut K, S), status: S) -> Result<(), StoreError>
    where
        K: Resource<DynamicType = ()> + Clone,
    {
        let key = (namespace.to_string(), name.to_string());
        let version = self.next_id().to_string();
        let mut map = store.lock().unwrap();
        let obj = map
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(describe::<K>(&key)))?;
        apply(obj, status);
        obj.meta_mut().resource_version = Some(version);
        Ok(())
    }

    /// Add a TinkerbellMachine to the mock store (for test setup)
    pub fn add_tinkerbell_machine(&self, machine: TinkerbellMachine) -> TinkerbellMachine {
        self.insert(&self.tinkerbell_machines, machine)
    }

    /// Add a TinkerbellCluster to the mock store (for test setup)
    pub fn add_tinkerbell_cluster(&self, cluster: TinkerbellCluster) -> TinkerbellCluster {
        self.insert(&self.tinkerbell_clusters, cluster)
    }

    /// Add a Cluster API Cluster to the mock store (for test setup)
    pub fn add_capi_cluster(&self, cluster: CapiCluster) -> CapiCluster {
        self.insert(&self.capi_clusters, cluster)
    }

    /// Add a Cluster API Machine to the mock store (for test setup)
    pub fn add_capi_machine(&self, machine: CapiMachine) -> CapiMachine {
        self.insert(&self.capi_machines, machine)
    }

    /// Add a Secret to the mock store (for test setup)
    pub fn add_secret(&self, secret: Secret) -> Secret {
        self.insert(&self.secrets, secret)
    }

    /// Add a Hardware to the mock store (for test setup)
    pub fn add_hardware(&self, hardware: Hardware) -> Hardware {
        self.insert(&self.hardware, hardware)
    }

    /// All hardware, ordered by namespace and name
    pub fn all_hardware(&self) -> Vec<Hardware> {
        self.hardware.lock().unwrap().values().cloned().collect()
    }

    /// Marks a TinkerbellMachine for deletion, as `kubectl delete` would
    pub fn delete_tinkerbell_machine(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.delete_in(&self.tinkerbell_machines, namespace, name)
    }

    /// Marks a TinkerbellCluster for deletion, as `kubectl delete` would
    pub fn delete_tinkerbell_cluster(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.delete_in(&self.tinkerbell_clusters, namespace, name)
    }

    /// Replaces a workflow's status, as the workflow engine would
    pub fn set_workflow_status(&self, namespace: &str, name: &str, status: WorkflowStatus) -> Result<(), StoreError> {
        self.set_status(&self.workflows, namespace, name, |wf, s| wf.status = Some(s), status)
    }

    /// Replaces a BMC job's status, as the BMC engine would
    pub fn set_bmc_job_status(&self, namespace: &str, name: &str, status: BmcJobStatus) -> Result<(), StoreError> {
        self.set_status(&self.bmc_jobs, namespace, name, |job, s| job.status = Some(s), status)
    }

    /// Makes the next `count` hardware patches fail with a conflict
    pub fn inject_hardware_conflicts(&self, count: u32) {
        *self.pending_hardware_conflicts.lock().unwrap() = count;
    }

    /// Makes every `list_hardware` yield after taking its snapshot, so
    /// concurrent callers on one task all list before any of them writes
    pub fn interleave_hardware_lists(&self) {
        *self.yield_after_hardware_list.lock().unwrap() = true;
    }

    /// Number of `list_hardware` calls served so far
    pub fn hardware_list_calls(&self) -> usize {
        *self.hardware_list_calls.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl StoreClientTrait for MockStoreClient {
    async fn get_tinkerbell_machine(&self, namespace: &str, name: &str) -> Result<TinkerbellMachine, StoreError> {
        self.get_in(&self.tinkerbell_machines, namespace, name)
    }

    async fn patch_tinkerbell_machine(&self, updated: &TinkerbellMachine, base: &TinkerbellMachine) -> Result<TinkerbellMachine, StoreError> {
        self.patch_in(&self.tinkerbell_machines, updated, base)
    }

    async fn get_tinkerbell_cluster(&self, namespace: &str, name: &str) -> Result<TinkerbellCluster, StoreError> {
        self.get_in(&self.tinkerbell_clusters, namespace, name)
    }

    async fn patch_tinkerbell_cluster(&self, updated: &TinkerbellCluster, base: &TinkerbellCluster) -> Result<TinkerbellCluster, StoreError> {
        self.patch_in(&self.tinkerbell_clusters, updated, base)
    }

    async fn get_capi_cluster(&self, namespace: &str, name: &str) -> Result<CapiCluster, StoreError> {
        self.get_in(&self.capi_clusters, namespace, name)
    }

    async fn get_capi_machine(&self, namespace: &str, name: &str) -> Result<CapiMachine, StoreError> {
        self.get_in(&self.capi_machines, namespace, name)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, StoreError> {
        self.get_in(&self.secrets, namespace, name)
    }

    async fn get_hardware(&self, namespace: &str, name: &str) -> Result<Hardware, StoreError> {
        self.get_in(&self.hardware, namespace, name)
    }

    async fn list_hardware(&self, namespace: Option<&str>, selector: &Selector) -> Result<Vec<Hardware>, StoreError> {
        *self.hardware_list_calls.lock().unwrap() += 1;
        let listed: Vec<Hardware> = self
            .hardware
            .lock()
            .unwrap()
            .iter()
            .filter(|((ns, _), _)| namespace.is_none_or(|wanted| wanted == ns))
            .filter(|(_, hw)| selector.matches(hw.labels()))
            .map(|(_, hw)| hw.clone())
            .collect();
        if *self.yield_after_hardware_list.lock().unwrap() {
            tokio::task::yield_now().await;
        }
        Ok(listed)
    }

    async fn patch_hardware(&self, updated: &Hardware, base: &Hardware) -> Result<Hardware, StoreError> {
        {
            let mut pending = self.pending_hardware_conflicts.lock().unwrap();
            if *pending > 0 {
                *pending -= 1;
                let key = key_of(updated)?;
                return Err(StoreError::Conflict(describe::<Hardware>(&key)));
            }
        }
        self.patch_in(&self.hardware, updated, base)
    }

    async fn get_template(&self, namespace: &str, name: &str) -> Result<Template, StoreError> {
        self.get_in(&self.templates, namespace, name)
    }

    async fn create_template(&self, template: &Template) -> Result<Template, StoreError> {
        self.create_in(&self.templates, template)
    }

    async fn delete_template(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.delete_in(&self.templates, namespace, name)
    }

    async fn get_workflow(&self, namespace: &str, name: &str) -> Result<Workflow, StoreError> {
        self.get_in(&self.workflows, namespace, name)
    }

    async fn create_workflow(&self, workflow: &Workflow) -> Result<Workflow, StoreError> {
        self.create_in(&self.workflows, workflow)
    }

    async fn delete_workflow(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.delete_in(&self.workflows, namespace, name)
    }

    async fn get_bmc_job(&self, namespace: &str, name: &str) -> Result<BmcJob, StoreError> {
        self.get_in(&self.bmc_jobs, namespace, name)
    }

    async fn create_bmc_job(&self, job: &BmcJob) -> Result<BmcJob, StoreError> {
        self.create_in(&self.bmc_jobs, job)
    }

    async fn delete_bmc_job(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.delete_in(&self.bmc_jobs, namespace, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{HardwareSpec, TinkerbellMachineSpec, HARDWARE_OWNER_NAME_LABEL};

    fn hardware(name: &str) -> Hardware {
        let mut hw = Hardware::new(name, HardwareSpec::default());
        hw.metadata.namespace = Some("default".to_string());
        hw
    }

    #[tokio::test]
    async fn test_patch_with_stale_base_conflicts() {
        let store = MockStoreClient::new();
        let base = store.add_hardware(hardware("hw-a"));

        let mut first = base.clone();
        first.labels_mut().insert(HARDWARE_OWNER_NAME_LABEL.to_string(), "m1".to_string());
        store.patch_hardware(&first, &base).await.unwrap();

        let mut second = base.clone();
        second.labels_mut().insert(HARDWARE_OWNER_NAME_LABEL.to_string(), "m2".to_string());
        let err = store.patch_hardware(&second, &base).await.unwrap_err();
        assert!(err.is_conflict());

        let stored = store.get_hardware("default", "hw-a").await.unwrap();
        assert_eq!(stored.labels().get(HARDWARE_OWNER_NAME_LABEL).map(String::as_str), Some("m1"));
    }

    #[tokio::test]
    async fn test_unchanged_patch_does_not_bump_version() {
        let store = MockStoreClient::new();
        let base = store.add_hardware(hardware("hw-a"));
        let result = store.patch_hardware(&base.clone(), &base).await.unwrap();
        assert_eq!(result.metadata.resource_version, base.metadata.resource_version);
    }

    #[tokio::test]
    async fn test_list_filters_by_selector_and_namespace() {
        let store = MockStoreClient::new();
        store.add_hardware(hardware("hw-a"));
        let mut claimed = hardware("hw-b");
        claimed.labels_mut().insert(HARDWARE_OWNER_NAME_LABEL.to_string(), "m1".to_string());
        store.add_hardware(claimed);
        let mut elsewhere = hardware("hw-c");
        elsewhere.metadata.namespace = Some("other".to_string());
        store.add_hardware(elsewhere);

        let unclaimed = Selector::everything().without(HARDWARE_OWNER_NAME_LABEL);
        let names: Vec<String> = store
            .list_hardware(Some("default"), &unclaimed)
            .await
            .unwrap()
            .iter()
            .map(|hw| hw.name_any())
            .collect();
        assert_eq!(names, vec!["hw-a".to_string()]);

        let all = store.list_hardware(None, &Selector::everything()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(store.hardware_list_calls(), 2);
    }

    #[tokio::test]
    async fn test_delete_with_finalizer_waits_for_removal() {
        let store = MockStoreClient::new();
        let mut machine = TinkerbellMachine::new("worker-0", TinkerbellMachineSpec::default());
        machine.metadata.namespace = Some("default".to_string());
        machine.metadata.finalizers = Some(vec!["example.com/cleanup".to_string()]);
        store.add_tinkerbell_machine(machine);

        store.delete_tinkerbell_machine("default", "worker-0").unwrap();
        let marked = store.get_tinkerbell_machine("default", "worker-0").await.unwrap();
        assert!(marked.metadata.deletion_timestamp.is_some());

        let mut released = marked.clone();
        released.metadata.finalizers = Some(vec![]);
        store.patch_tinkerbell_machine(&released, &marked).await.unwrap();
        let err = store.get_tinkerbell_machine("default", "worker-0").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_create_twice_reports_already_exists() {
        let store = MockStoreClient::new();
        let mut template = Template::new("worker-0", Default::default());
        template.metadata.namespace = Some("default".to_string());
        let created = store.create_template(&template).await.unwrap();
        assert!(created.metadata.uid.is_some());

        let err = store.create_template(&template).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_injected_conflicts_are_consumed() {
        let store = MockStoreClient::new();
        let base = store.add_hardware(hardware("hw-a"));
        let mut updated = base.clone();
        updated.labels_mut().insert(HARDWARE_OWNER_NAME_LABEL.to_string(), "m1".to_string());

        store.inject_hardware_conflicts(1);
        assert!(store.patch_hardware(&updated, &base).await.unwrap_err().is_conflict());
        assert!(store.patch_hardware(&updated, &base).await.is_ok());
    }
}
