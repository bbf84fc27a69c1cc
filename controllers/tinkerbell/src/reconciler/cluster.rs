//! TinkerbellCluster reconciliation.
//!
//! A cluster reserves one hardware unit whose DHCP address becomes the
//! control-plane endpoint, and releases it on deletion.

use super::hardware::{ClaimOwner, ReservationManager};
use super::{capi_owner, ReconcileOutcome, Reconciler};
use crate::error::ControllerError;
use crate::events::{actions, reasons};
use crds::{TinkerbellCluster, CLUSTER_FINALIZER, DEFAULT_CONTROL_PLANE_PORT};
use kube::ResourceExt;
use store_client::{StoreClientTrait, StoreError};
use tracing::{debug, info};

/// One reconcile pass over a TinkerbellCluster
pub struct ClusterScope<'a> {
    store: &'a dyn StoreClientTrait,
    base: TinkerbellCluster,
    cluster: TinkerbellCluster,
    namespace: String,
    name: String,
    /// Name of the owning Cluster API cluster
    owner: Option<String>,
}

impl std::fmt::Debug for ClusterScope<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterScope")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

impl<'a> ClusterScope<'a> {
    pub fn new(store: &'a dyn StoreClientTrait, cluster: TinkerbellCluster) -> Self {
        Self {
            store,
            namespace: cluster.namespace().unwrap_or_default(),
            name: cluster.name_any(),
            owner: capi_owner(&cluster.metadata, "Cluster").map(str::to_string),
            base: cluster.clone(),
            cluster,
        }
    }

    pub fn cluster(&self) -> &TinkerbellCluster {
        &self.cluster
    }

    fn owner_ref(&self) -> ClaimOwner<'_> {
        ClaimOwner::Cluster {
            name: &self.name,
            namespace: &self.namespace,
        }
    }

    fn has_finalizer(&self) -> bool {
        self.cluster.finalizers().iter().any(|f| f == CLUSTER_FINALIZER)
    }

    async fn write(&mut self) -> Result<(), ControllerError> {
        let written = self.store.patch_tinkerbell_cluster(&self.cluster, &self.base).await?;
        self.base = written.clone();
        self.cluster = written;
        Ok(())
    }

    pub async fn ensure_finalizer(&mut self) -> Result<(), ControllerError> {
        if self.has_finalizer() {
            return Ok(());
        }
        self.cluster.finalizers_mut().push(CLUSTER_FINALIZER.to_string());
        self.write().await?;
        debug!("Added finalizer to TinkerbellCluster {}/{}", self.namespace, self.name);
        Ok(())
    }

    /// Assigns the control-plane endpoint and marks the cluster ready
    pub async fn reconcile_normal(&mut self) -> Result<ReconcileOutcome, ControllerError> {
        if self.owner.is_none() {
            info!("TinkerbellCluster {}/{} is waiting for its owner Cluster", self.namespace, self.name);
            return Ok(ReconcileOutcome::Wait);
        }

        if self.cluster.spec.control_plane_endpoint.is_unset() {
            let hardware = ReservationManager::new(self.store)
                .reserve_for_cluster(&self.name, &self.namespace)
                .await?;
            let host = hardware.first_ip()?.to_string();
            info!(
                "TinkerbellCluster {}/{} uses hardware {} at {} as control-plane endpoint",
                self.namespace,
                self.name,
                hardware.name_any(),
                host
            );
            self.cluster.spec.control_plane_endpoint.host = host;
        }
        if self.cluster.spec.control_plane_endpoint.port == 0 {
            self.cluster.spec.control_plane_endpoint.port = DEFAULT_CONTROL_PLANE_PORT;
        }
        self.cluster.status.get_or_insert_with(Default::default).ready = true;
        self.write().await?;
        Ok(ReconcileOutcome::Done)
    }

    /// Releases the endpoint hardware and drops the finalizer
    ///
    /// Returns the number of hardware units released.
    pub async fn reconcile_delete(&mut self) -> Result<usize, ControllerError> {
        if !self.has_finalizer() {
            return Ok(0);
        }
        let released = ReservationManager::new(self.store)
            .release_owned(&self.owner_ref())
            .await?;

        self.cluster.finalizers_mut().retain(|f| f != CLUSTER_FINALIZER);
        match self.store.patch_tinkerbell_cluster(&self.cluster, &self.base).await {
            Ok(_) | Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        info!(
            "Removed finalizer from TinkerbellCluster {}/{} after releasing {} hardware unit(s)",
            self.namespace, self.name, released
        );
        Ok(released)
    }

    pub fn is_ready(&self) -> bool {
        self.cluster.status.as_ref().is_some_and(|s| s.ready)
    }
}

impl Reconciler {
    /// Runs one pass over the TinkerbellCluster `namespace/name`
    pub async fn reconcile_tinkerbell_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ReconcileOutcome, ControllerError> {
        let cluster = match self.store.get_tinkerbell_cluster(namespace, name).await {
            Ok(cluster) => cluster,
            Err(StoreError::NotFound(_)) => {
                debug!("TinkerbellCluster {}/{} not found, nothing to do", namespace, name);
                return Ok(ReconcileOutcome::Done);
            }
            Err(e) => return Err(e.into()),
        };

        let mut scope = ClusterScope::new(self.store.as_ref(), cluster);
        if self
            .is_paused(scope.cluster().annotations(), namespace, scope.owner.as_deref())
            .await?
        {
            info!("TinkerbellCluster {}/{} is paused", namespace, name);
            return Ok(ReconcileOutcome::Done);
        }

        if scope.cluster().metadata.deletion_timestamp.is_some() {
            let released = scope.reconcile_delete().await?;
            if released > 0 {
                self.publish_normal(
                    scope.cluster(),
                    reasons::HARDWARE_RELEASED,
                    actions::DELETE,
                    format!("Released {} hardware unit(s)", released),
                )
                .await;
            }
            return Ok(ReconcileOutcome::Done);
        }

        info!("Reconciling TinkerbellCluster {}/{}", namespace, name);
        scope.ensure_finalizer().await?;
        let was_ready = scope.is_ready();
        let outcome = scope.reconcile_normal().await?;
        if !was_ready && scope.is_ready() {
            let endpoint = &scope.cluster().spec.control_plane_endpoint;
            self.publish_normal(
                scope.cluster(),
                reasons::CLUSTER_READY,
                actions::RECONCILE,
                format!("Control-plane endpoint {}:{}", endpoint.host, endpoint.port),
            )
            .await;
        }
        Ok(outcome)
    }
}
