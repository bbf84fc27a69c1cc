//! Kubernetes resource watchers.
//!
//! Each provider kind runs one `kube_runtime::Controller`. Changes to the
//! Tinkerbell objects a machine depends on (its Hardware, Template,
//! Workflow and BMC jobs) and to the Cluster API owners re-trigger the
//! provider object through the mappers below.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::reconciler::{backoff_key, object_key, Reconciler};
use crds::{
    BmcJob, CapiCluster, CapiMachine, Hardware, Template, TinkerbellCluster, TinkerbellMachine,
    Workflow, INFRASTRUCTURE_GROUP,
};
use futures::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::NamespaceResourceScope;
use kube::{Api, Client, Resource};
use kube_runtime::controller::{Action, Config as RuntimeConfig, Error as RuntimeError};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{watcher, Controller};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

type ReconcileFuture = Pin<Box<dyn Future<Output = Result<Action, ControllerError>> + Send>>;

/// Secondary kinds whose changes re-trigger a TinkerbellMachine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchedKind {
    /// Routed through the owner-name / owner-namespace claim labels
    Hardware,
    /// Routed through the owner reference, falling back to the same name
    Template,
    /// Routed through the owner reference, falling back to the same name
    Workflow,
    /// Routed through the owner reference only; job names follow the hardware
    BmcJob,
}

/// TinkerbellMachine affected by a change to an object of `kind`
pub fn machine_for(kind: WatchedKind, meta: &ObjectMeta) -> Option<ObjectRef<TinkerbellMachine>> {
    match kind {
        WatchedKind::Hardware => {
            let labels = meta.labels.as_ref()?;
            let name = labels.get(crds::HARDWARE_OWNER_NAME_LABEL)?;
            let namespace = labels.get(crds::HARDWARE_OWNER_NAMESPACE_LABEL)?;
            Some(ObjectRef::new(name).within(namespace))
        }
        WatchedKind::Template | WatchedKind::Workflow | WatchedKind::BmcJob => {
            let namespace = meta.namespace.as_deref()?;
            let owner = meta.owner_references.as_ref().and_then(|refs| {
                refs.iter().find(|o| {
                    o.kind == "TinkerbellMachine"
                        && o.api_version.split('/').next() == Some(INFRASTRUCTURE_GROUP)
                })
            });
            match (owner, kind) {
                (Some(owner), _) => Some(ObjectRef::new(&owner.name).within(namespace)),
                (None, WatchedKind::BmcJob) => None,
                (None, _) => Some(ObjectRef::new(meta.name.as_deref()?).within(namespace)),
            }
        }
    }
}

/// TinkerbellMachine referenced as infrastructure of a Cluster API Machine
pub fn machine_for_capi_machine(machine: &CapiMachine) -> Option<ObjectRef<TinkerbellMachine>> {
    let infra = &machine.spec.infrastructure_ref;
    if infra.kind.as_deref() != Some("TinkerbellMachine") || infra.name.is_empty() {
        return None;
    }
    let namespace = machine.metadata.namespace.as_deref()?;
    Some(ObjectRef::new(&infra.name).within(infra.namespace_or(namespace)))
}

/// TinkerbellCluster referenced as infrastructure of a Cluster API Cluster
pub fn cluster_for_capi_cluster(cluster: &CapiCluster) -> Option<ObjectRef<TinkerbellCluster>> {
    let infra = cluster.spec.infrastructure_ref.as_ref()?;
    if infra.kind.as_deref() != Some("TinkerbellCluster") {
        return None;
    }
    let namespace = cluster.metadata.namespace.as_deref()?;
    Some(ObjectRef::new(&infra.name).within(infra.namespace_or(namespace)))
}

/// Runs a built controller until its watch stream ends.
///
/// Failed passes are requeued with the per-object Fibonacci backoff of the
/// reconciler; the entry points reset it after a successful pass.
async fn watch_resource<K, F>(
    controller: Controller<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    resource_name: &'static str,
) -> Result<(), ControllerError>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    F: Fn(Arc<Reconciler>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher", resource_name);

    let error_policy = move |obj: Arc<K>, error: &ControllerError, ctx: Arc<Reconciler>| {
        let key = backoff_key(obj.as_ref());
        let delay = ctx.backoff.next_backoff(&key);
        if error.is_transient() {
            warn!("Reconciliation of {} will be retried in {:?}: {}", key, delay, error);
        } else {
            error!("Reconciliation of {} failed, retrying in {:?}: {}", key, delay, error);
        }
        Action::requeue(delay)
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        async move {
            debug!("Reconciling {} {}", resource_name, backoff_key(obj.as_ref()));
            reconcile_fn(ctx, obj).await
        }
    };

    let runtime_config = RuntimeConfig::default()
        .debounce(reconciler.config.reconcile_debounce)
        .concurrency(reconciler.config.reconcile_concurrency);

    let tracker = reconciler.clone();
    controller
        .with_config(runtime_config)
        .run(reconcile, error_policy, reconciler)
        .for_each(move |res| {
            let tracker = tracker.clone();
            async move {
                match res {
                    // Requeued object is gone; drop its error history
                    Err(RuntimeError::ObjectNotFound(obj_ref)) => {
                        let key = object_key(
                            &K::kind(&()),
                            obj_ref.namespace.as_deref().unwrap_or_default(),
                            &obj_ref.name,
                        );
                        debug!("{} no longer exists, forgetting its backoff", key);
                        tracker.backoff.reset(&key);
                    }
                    Err(e) => debug!("Controller event for {}: {}", resource_name, e),
                    Ok(_) => {}
                }
            }
        })
        .await;

    Ok(())
}

/// Watches the provider's resources and the resources they depend on.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    client: Client,
    namespace: Option<String>,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher").field("namespace", &self.namespace).finish_non_exhaustive()
    }
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(reconciler: Arc<Reconciler>, client: Client, config: &ControllerConfig) -> Self {
        Self {
            reconciler,
            client,
            namespace: config.watch_namespace.clone(),
        }
    }

    fn api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        match self.namespace.as_deref() {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    /// Starts watching TinkerbellMachine resources.
    pub async fn watch_tinkerbell_machines(&self) -> Result<(), ControllerError> {
        let wc = watcher::Config::default;
        let controller = Controller::new(self.api::<TinkerbellMachine>(), wc())
            .watches(self.api::<Hardware>(), wc(), |hw| machine_for(WatchedKind::Hardware, &hw.metadata))
            .watches(self.api::<Template>(), wc(), |t| machine_for(WatchedKind::Template, &t.metadata))
            .watches(self.api::<Workflow>(), wc(), |wf| machine_for(WatchedKind::Workflow, &wf.metadata))
            .watches(self.api::<BmcJob>(), wc(), |job| machine_for(WatchedKind::BmcJob, &job.metadata))
            .watches(self.api::<CapiMachine>(), wc(), |m| machine_for_capi_machine(&m));

        watch_resource(
            controller,
            self.reconciler.clone(),
            |reconciler, machine| Box::pin(async move { reconciler.reconcile_machine(&machine).await }),
            "TinkerbellMachine",
        )
        .await
    }

    /// Starts watching TinkerbellCluster resources.
    pub async fn watch_tinkerbell_clusters(&self) -> Result<(), ControllerError> {
        let wc = watcher::Config::default;
        let controller = Controller::new(self.api::<TinkerbellCluster>(), wc())
            .watches(self.api::<CapiCluster>(), wc(), |c| cluster_for_capi_cluster(&c));

        watch_resource(
            controller,
            self.reconciler.clone(),
            |reconciler, cluster| Box::pin(async move { reconciler.reconcile_cluster(&cluster).await }),
            "TinkerbellCluster",
        )
        .await
    }
}
