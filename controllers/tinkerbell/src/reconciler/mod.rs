//! Reconciliation logic for the provider's CRDs.
//!
//! Each pass loads the object fresh from the store, computes the next step
//! of its lifecycle and writes the result back with a compare-and-swap
//! against the snapshot it started from. Passes are safe to repeat.
//!
//! Building blocks, leaf-first:
//! - `affinity`: pure hardware filtering and ranking
//! - `hardware`: claim / release of hardware through labels and a finalizer
//! - `template`: image URL and default workflow template rendering
//! - `workflow`: Template and Workflow creation, progress evaluation
//! - `power`: BMC jobs around provisioning and deletion

pub mod affinity;
pub mod hardware;
pub mod power;
pub mod template;
pub mod workflow;
mod cluster;
mod machine;

#[cfg(test)]
mod hardware_test;

use crate::backoff::BackoffTracker;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::events::{actions, EventPublisher};
use crds::{TinkerbellCluster, TinkerbellMachine, CAPI_GROUP, CAPI_PAUSED_ANNOTATION};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use store_client::{StoreClientTrait, StoreError};
use tracing::debug;

/// Requeue delay after a pass that created an object it now waits to observe
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Result of a successful pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Settled; wait for the next change
    Done,
    /// Created something; come back shortly
    Retry,
    /// Waiting on external progress (owner, bootstrap data, workflow, BMC job)
    Wait,
}

/// Reconciles TinkerbellMachine and TinkerbellCluster resources.
pub struct Reconciler {
    pub(crate) store: Box<dyn StoreClientTrait + Send + Sync>,
    pub(crate) events: Arc<dyn EventPublisher>,
    pub(crate) config: ControllerConfig,
    /// Error requeue state per object
    pub(crate) backoff: BackoffTracker,
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        store: Box<dyn StoreClientTrait + Send + Sync>,
        events: Arc<dyn EventPublisher>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            events,
            config,
            backoff: BackoffTracker::default(),
        }
    }

    /// Controller action for a successful pass
    pub fn action_for(&self, outcome: ReconcileOutcome) -> Action {
        match outcome {
            ReconcileOutcome::Done => Action::await_change(),
            ReconcileOutcome::Retry => Action::requeue(RETRY_DELAY),
            ReconcileOutcome::Wait => Action::requeue(self.config.workflow_poll),
        }
    }

    /// Watch entry point for TinkerbellMachine
    pub async fn reconcile_machine(&self, machine: &TinkerbellMachine) -> Result<Action, ControllerError> {
        let namespace = machine.namespace().unwrap_or_default();
        match self.reconcile_tinkerbell_machine(&namespace, &machine.name_any()).await {
            Ok(outcome) => {
                self.backoff.reset(&backoff_key(machine));
                Ok(self.action_for(outcome))
            }
            Err(e) => {
                self.publish_failure(machine, &e).await;
                Err(e)
            }
        }
    }

    /// Watch entry point for TinkerbellCluster
    pub async fn reconcile_cluster(&self, cluster: &TinkerbellCluster) -> Result<Action, ControllerError> {
        let namespace = cluster.namespace().unwrap_or_default();
        match self.reconcile_tinkerbell_cluster(&namespace, &cluster.name_any()).await {
            Ok(outcome) => {
                self.backoff.reset(&backoff_key(cluster));
                Ok(self.action_for(outcome))
            }
            Err(e) => {
                self.publish_failure(cluster, &e).await;
                Err(e)
            }
        }
    }

    /// Publishes a Normal event about `obj`
    pub(crate) async fn publish_normal<K>(&self, obj: &K, reason: &str, action: &str, note: String)
    where
        K: Resource<DynamicType = ()>,
    {
        self.events
            .publish(&obj.object_ref(&()), EventType::Normal, reason, action, Some(note))
            .await;
    }

    async fn publish_failure<K>(&self, obj: &K, error: &ControllerError)
    where
        K: Resource<DynamicType = ()>,
    {
        self.events
            .publish(
                &obj.object_ref(&()),
                EventType::Warning,
                error.reason(),
                actions::RECONCILE,
                Some(error.to_string()),
            )
            .await;
    }

    /// Whether reconciliation of an object is paused
    ///
    /// Paused by the annotation on the object itself or by `spec.paused` of
    /// the Cluster API cluster it belongs to. A cluster that does not exist
    /// (yet) does not pause anything.
    pub(crate) async fn is_paused(
        &self,
        annotations: &BTreeMap<String, String>,
        namespace: &str,
        cluster_name: Option<&str>,
    ) -> Result<bool, ControllerError> {
        if annotations.contains_key(CAPI_PAUSED_ANNOTATION) {
            return Ok(true);
        }
        let Some(cluster_name) = cluster_name else {
            return Ok(false);
        };
        match self.store.get_capi_cluster(namespace, cluster_name).await {
            Ok(cluster) => Ok(cluster.spec.paused),
            Err(StoreError::NotFound(_)) => {
                debug!("Cluster {}/{} not found, treating as not paused", namespace, cluster_name);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Key of an object in the backoff tracker
pub fn backoff_key<K>(obj: &K) -> String
where
    K: Resource<DynamicType = ()>,
{
    object_key(
        &K::kind(&()),
        obj.meta().namespace.as_deref().unwrap_or_default(),
        obj.meta().name.as_deref().unwrap_or_default(),
    )
}

/// `Kind/namespace/name`
pub fn object_key(kind: &str, namespace: &str, name: &str) -> String {
    format!("{}/{}/{}", kind, namespace, name)
}

/// Name of the Cluster API owner of `kind` in `meta`'s owner references
pub(crate) fn capi_owner<'m>(meta: &'m ObjectMeta, kind: &str) -> Option<&'m str> {
    meta.owner_references
        .as_ref()?
        .iter()
        .find(|o| o.kind == kind && o.api_version.split('/').next() == Some(CAPI_GROUP))
        .map(|o| o.name.as_str())
}

/// Name of the Cluster API Machine owning `machine`
pub(crate) fn owner_machine_name(machine: &TinkerbellMachine) -> Option<&str> {
    capi_owner(&machine.metadata, "Machine")
}
