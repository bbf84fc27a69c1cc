//! TinkerbellMachine reconciliation.
//!
//! Normal path: owner Machine and bootstrap data, hardware reservation,
//! Template, Workflow, BMC power cycle, readiness. Deletion path: power
//! off, release the hardware, delete the Template and Workflow, drop the
//! finalizer.

use super::hardware::ReservationManager;
use super::power::{JobProgress, PowerCoordinator};
use super::template::{self, ImageLookup, TemplateParams};
use super::workflow::{self, ProvisioningState, WorkflowOrchestrator};
use super::{owner_machine_name, ReconcileOutcome, Reconciler};
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::events::{actions, reasons};
use crds::{
    provider_id, CapiMachine, Hardware, MachineAddress, MachineAddressType, TinkerbellClusterSpec,
    TinkerbellMachine, BOOTSTRAP_DATA_KEY, CAPI_CLUSTER_NAME_LABEL, INSTANCE_STATE_PROVISIONED,
    MACHINE_FINALIZER,
};
use kube::ResourceExt;
use store_client::{StoreClientTrait, StoreError};
use tracing::{debug, info, warn};

/// One reconcile pass over a TinkerbellMachine
///
/// Holds the snapshot the pass started from, the working copy it mutates,
/// and what it resolved along the way.
pub struct MachineScope<'a> {
    store: &'a dyn StoreClientTrait,
    config: &'a ControllerConfig,
    /// Writes are compare-and-swap against this snapshot
    base: TinkerbellMachine,
    machine: TinkerbellMachine,
    namespace: String,
    name: String,
    /// Hardware selected for the machine
    hardware: Option<Hardware>,
}

impl std::fmt::Debug for MachineScope<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineScope")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .field("hardware", &self.hardware.as_ref().map(ResourceExt::name_any))
            .finish_non_exhaustive()
    }
}

impl<'a> MachineScope<'a> {
    pub fn new(store: &'a dyn StoreClientTrait, config: &'a ControllerConfig, machine: TinkerbellMachine) -> Self {
        Self {
            store,
            config,
            namespace: machine.namespace().unwrap_or_default(),
            name: machine.name_any(),
            base: machine.clone(),
            machine,
            hardware: None,
        }
    }

    /// The machine as last written
    pub fn machine(&self) -> &TinkerbellMachine {
        &self.machine
    }

    pub fn is_deleting(&self) -> bool {
        self.machine.metadata.deletion_timestamp.is_some()
    }

    fn has_finalizer(&self) -> bool {
        self.machine.finalizers().iter().any(|f| f == MACHINE_FINALIZER)
    }

    /// Adds the finalizer and writes it before anything else is claimed
    pub async fn ensure_finalizer(&mut self) -> Result<(), ControllerError> {
        if self.has_finalizer() {
            return Ok(());
        }
        self.machine.finalizers_mut().push(MACHINE_FINALIZER.to_string());
        self.write().await?;
        debug!("Added finalizer to TinkerbellMachine {}/{}", self.namespace, self.name);
        Ok(())
    }

    /// Writes the working copy and makes the result the new base
    async fn write(&mut self) -> Result<(), ControllerError> {
        let written = self.store.patch_tinkerbell_machine(&self.machine, &self.base).await?;
        self.base = written.clone();
        self.machine = written;
        Ok(())
    }

    /// Records the outcome of the pass in the status and writes the machine
    ///
    /// Errors that need an operator are surfaced through `errorReason` /
    /// `errorMessage`; a successful pass clears them.
    pub async fn persist(&mut self, result: &Result<ReconcileOutcome, ControllerError>) -> Result<(), ControllerError> {
        match result {
            Ok(_) => {
                if let Some(status) = self.machine.status.as_mut() {
                    status.error_reason = None;
                    status.error_message = None;
                }
            }
            Err(e) if !e.is_transient() => {
                let status = self.machine.status.get_or_insert_with(Default::default);
                status.error_reason = Some(e.reason().to_string());
                status.error_message = Some(e.to_string());
            }
            Err(_) => {}
        }
        self.write().await
    }

    pub async fn reconcile_normal(&mut self) -> Result<ReconcileOutcome, ControllerError> {
        let Some(owner) = self.load_owner().await? else {
            info!("TinkerbellMachine {}/{} is waiting for its owner Machine", self.namespace, self.name);
            return Ok(ReconcileOutcome::Wait);
        };
        let Some(secret_name) = owner.spec.bootstrap.data_secret_name.as_deref() else {
            info!("TinkerbellMachine {}/{} is waiting for bootstrap data", self.namespace, self.name);
            return Ok(ReconcileOutcome::Wait);
        };
        let version = owner
            .spec
            .version
            .as_deref()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                ControllerError::InvalidConfig(format!(
                    "Machine {}/{} has no Kubernetes version",
                    self.namespace,
                    owner.name_any()
                ))
            })?;
        let user_data = self.bootstrap_data(secret_name).await?;
        let cluster = self.load_cluster_spec(&owner.spec.cluster_name).await?;

        let hardware = self.reserve().await?;
        let hardware = ReservationManager::new(self.store)
            .prepare_for_provisioning(&hardware, &user_data)
            .await?;
        self.hardware = Some(hardware.clone());

        let orchestrator = WorkflowOrchestrator::new(self.store);
        orchestrator
            .ensure_template(&self.machine, || self.render_template(&hardware, version, cluster.as_ref()))
            .await?;
        let workflow = orchestrator.ensure_workflow(&self.machine, &hardware).await?;
        if workflow.was_created() {
            return Ok(ReconcileOutcome::Retry);
        }
        let workflow = workflow.into_inner();

        // Failures surface even while the power cycle is still running
        let state = workflow::evaluate(workflow.status.as_ref());
        match state {
            ProvisioningState::WorkflowFailed => {
                return Err(ControllerError::WorkflowFailed(format!(
                    "Workflow {}/{} failed on hardware {}",
                    self.namespace,
                    self.name,
                    hardware.name_any()
                )));
            }
            ProvisioningState::WorkflowTimeout => {
                return Err(ControllerError::WorkflowFailed(format!(
                    "Workflow {}/{} timed out on hardware {}",
                    self.namespace,
                    self.name,
                    hardware.name_any()
                )));
            }
            _ => {}
        }

        if !is_provisioned(&hardware) {
            match PowerCoordinator::new(self.store)
                .ensure_provision_job(&self.machine, &hardware)
                .await?
            {
                Some(JobProgress::Created | JobProgress::Running) => {
                    info!(
                        "TinkerbellMachine {}/{} is waiting for hardware {} to power-cycle into PXE",
                        self.namespace,
                        self.name,
                        hardware.name_any()
                    );
                    return Ok(ReconcileOutcome::Wait);
                }
                Some(JobProgress::Completed) | None => {}
            }
        }

        if state == ProvisioningState::Ready {
            self.mark_ready(&hardware).await?;
            return Ok(ReconcileOutcome::Done);
        }
        debug!("Workflow {}/{} is in state {:?}", self.namespace, self.name, state);
        Ok(ReconcileOutcome::Wait)
    }

    /// Deletion: power off, release the hardware, remove provisioning objects, drop the finalizer
    pub async fn reconcile_delete(&mut self) -> Result<ReconcileOutcome, ControllerError> {
        if !self.has_finalizer() {
            debug!("TinkerbellMachine {}/{} has no finalizer, nothing to clean up", self.namespace, self.name);
            return Ok(ReconcileOutcome::Done);
        }

        if let Some(hardware) = self.find_hardware().await? {
            let power = PowerCoordinator::new(self.store);
            match power.ensure_poweroff_job(&self.machine, &hardware).await? {
                Some(JobProgress::Created | JobProgress::Running) => {
                    info!(
                        "TinkerbellMachine {}/{} is waiting for hardware {} to power off",
                        self.namespace,
                        self.name,
                        hardware.name_any()
                    );
                    return Ok(ReconcileOutcome::Wait);
                }
                Some(JobProgress::Completed) | None => {}
            }
            ReservationManager::new(self.store).release(&hardware).await?;
            power.delete_jobs(&hardware).await?;
            self.hardware = Some(hardware);
        }

        WorkflowOrchestrator::new(self.store).delete_for(&self.machine).await?;

        self.machine.finalizers_mut().retain(|f| f != MACHINE_FINALIZER);
        match self.store.patch_tinkerbell_machine(&self.machine, &self.base).await {
            Ok(_) | Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        info!("Removed finalizer from TinkerbellMachine {}/{}", self.namespace, self.name);
        Ok(ReconcileOutcome::Done)
    }

    async fn load_owner(&self) -> Result<Option<CapiMachine>, ControllerError> {
        let Some(owner_name) = owner_machine_name(&self.machine) else {
            return Ok(None);
        };
        match self.store.get_capi_machine(&self.namespace, owner_name).await {
            Ok(owner) => Ok(Some(owner)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Bootstrap user data from the secret's `value` key
    async fn bootstrap_data(&self, secret_name: &str) -> Result<String, ControllerError> {
        let secret = self.store.get_secret(&self.namespace, secret_name).await?;
        if let Some(value) = secret.data.as_ref().and_then(|d| d.get(BOOTSTRAP_DATA_KEY)) {
            return String::from_utf8(value.0.clone()).map_err(|_| {
                ControllerError::InvalidConfig(format!(
                    "bootstrap data secret {}/{}: key '{}' is not UTF-8",
                    self.namespace, secret_name, BOOTSTRAP_DATA_KEY
                ))
            });
        }
        secret
            .string_data
            .as_ref()
            .and_then(|d| d.get(BOOTSTRAP_DATA_KEY))
            .cloned()
            .ok_or_else(|| {
                ControllerError::InvalidConfig(format!(
                    "bootstrap data secret {}/{} has no '{}' key",
                    self.namespace, secret_name, BOOTSTRAP_DATA_KEY
                ))
            })
    }

    /// Spec of the TinkerbellCluster behind the machine's Cluster API cluster, if any
    async fn load_cluster_spec(&self, cluster_name: &str) -> Result<Option<TinkerbellClusterSpec>, ControllerError> {
        if cluster_name.is_empty() {
            return Ok(None);
        }
        let cluster = match self.store.get_capi_cluster(&self.namespace, cluster_name).await {
            Ok(cluster) => cluster,
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let Some(infra) = cluster.spec.infrastructure_ref.as_ref() else {
            return Ok(None);
        };
        match self
            .store
            .get_tinkerbell_cluster(infra.namespace_or(&self.namespace), &infra.name)
            .await
        {
            Ok(tc) => Ok(Some(tc.spec)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Reserves hardware and records the selection on the machine
    async fn reserve(&mut self) -> Result<Hardware, ControllerError> {
        let hardware = ReservationManager::new(self.store)
            .reserve_for_machine(
                &self.name,
                &self.namespace,
                self.machine.spec.hardware_name.as_deref(),
                self.machine.spec.hardware_affinity.as_ref(),
            )
            .await?;
        hardware.first_dhcp()?;
        self.machine.spec.hardware_name = Some(hardware.name_any());
        Ok(hardware)
    }

    /// Hardware the machine holds: by recorded name, else by claim labels
    async fn find_hardware(&self) -> Result<Option<Hardware>, ControllerError> {
        let reservations = ReservationManager::new(self.store);
        let owner = super::hardware::ClaimOwner::Machine {
            name: &self.name,
            namespace: &self.namespace,
        };
        if let Some(name) = self.machine.spec.hardware_name.as_deref() {
            match self.store.get_hardware(&self.namespace, name).await {
                Ok(hardware) if owner.owns(&hardware) => return Ok(Some(hardware)),
                Ok(hardware) => {
                    warn!(
                        "Hardware {} recorded on TinkerbellMachine {}/{} is not claimed by it",
                        hardware.name_any(),
                        self.namespace,
                        self.name
                    );
                }
                Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        reservations.find_owned(&owner).await
    }

    fn render_template(
        &self,
        hardware: &Hardware,
        kubernetes_version: &str,
        cluster: Option<&TinkerbellClusterSpec>,
    ) -> Result<String, ControllerError> {
        if let Some(body) = self.machine.spec.template_override.as_ref().filter(|b| !b.is_empty()) {
            return Ok(body.clone());
        }
        let disk = hardware
            .spec
            .disks
            .first()
            .map(|d| d.device.as_str())
            .ok_or_else(|| ControllerError::InvalidConfig(format!("hardware {} has no disks", hardware.name_any())))?;
        let image_url = ImageLookup::resolve(&self.machine.spec, cluster, &self.config.image_lookup)
            .image_url(kubernetes_version)?;
        template::render_default(&TemplateParams {
            name: &self.name,
            disk,
            image_url: &image_url,
            tinkerbell_ip: self.config.tinkerbell_ip.as_deref(),
        })
    }

    async fn mark_ready(&mut self, hardware: &Hardware) -> Result<(), ControllerError> {
        let mut addresses = vec![MachineAddress {
            type_: MachineAddressType::InternalIP,
            address: hardware.first_ip()?.to_string(),
        }];
        if let Some(hostname) = hardware.first_dhcp()?.hostname.as_ref().filter(|h| !h.is_empty()) {
            addresses.push(MachineAddress {
                type_: MachineAddressType::Hostname,
                address: hostname.clone(),
            });
        }

        ReservationManager::new(self.store).mark_provisioned(hardware).await?;

        self.machine.spec.provider_id = Some(provider_id(&self.namespace, &hardware.name_any()));
        let status = self.machine.status.get_or_insert_with(Default::default);
        if !status.ready {
            info!(
                "TinkerbellMachine {}/{} is ready on hardware {}",
                self.namespace,
                self.name,
                hardware.name_any()
            );
        }
        status.ready = true;
        status.addresses = addresses;
        Ok(())
    }

    fn became_ready(&self) -> bool {
        let ready = |m: &TinkerbellMachine| m.status.as_ref().is_some_and(|s| s.ready);
        ready(&self.machine) && !ready(&self.base)
    }

    fn newly_reserved(&self) -> Option<&str> {
        match (&self.base.spec.hardware_name, &self.machine.spec.hardware_name) {
            (None, Some(name)) => Some(name.as_str()),
            _ => None,
        }
    }
}

fn is_provisioned(hardware: &Hardware) -> bool {
    hardware
        .spec
        .metadata
        .as_ref()
        .and_then(|m| m.instance.as_ref())
        .is_some_and(|i| i.state == INSTANCE_STATE_PROVISIONED)
}

impl Reconciler {
    /// Runs one pass over the TinkerbellMachine `namespace/name`
    pub async fn reconcile_tinkerbell_machine(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ReconcileOutcome, ControllerError> {
        let machine = match self.store.get_tinkerbell_machine(namespace, name).await {
            Ok(machine) => machine,
            Err(StoreError::NotFound(_)) => {
                debug!("TinkerbellMachine {}/{} not found, nothing to do", namespace, name);
                return Ok(ReconcileOutcome::Done);
            }
            Err(e) => return Err(e.into()),
        };

        let cluster_name = machine.labels().get(CAPI_CLUSTER_NAME_LABEL).map(String::as_str);
        if self.is_paused(machine.annotations(), namespace, cluster_name).await? {
            info!("TinkerbellMachine {}/{} is paused", namespace, name);
            return Ok(ReconcileOutcome::Done);
        }

        let mut scope = MachineScope::new(self.store.as_ref(), &self.config, machine);
        if scope.is_deleting() {
            let outcome = scope.reconcile_delete().await?;
            if let Some(hardware) = scope.hardware.as_ref() {
                self.publish_normal(
                    scope.machine(),
                    reasons::HARDWARE_RELEASED,
                    actions::DELETE,
                    format!("Released hardware {}", hardware.name_any()),
                )
                .await;
            }
            return Ok(outcome);
        }

        info!("Reconciling TinkerbellMachine {}/{}", namespace, name);
        scope.ensure_finalizer().await?;
        let result = scope.reconcile_normal().await;
        let reserved = scope.newly_reserved().map(str::to_string);
        let became_ready = scope.became_ready();
        if let Err(e) = scope.persist(&result).await {
            if result.is_ok() {
                return Err(e);
            }
            warn!("Failed to record status of TinkerbellMachine {}/{}: {}", namespace, name, e);
        }

        if let Some(hardware) = reserved {
            self.publish_normal(
                scope.machine(),
                reasons::HARDWARE_RESERVED,
                actions::PROVISION,
                format!("Reserved hardware {}", hardware),
            )
            .await;
        }
        if became_ready {
            self.publish_normal(
                scope.machine(),
                reasons::MACHINE_READY,
                actions::PROVISION,
                "Workflow reached its final action".to_string(),
            )
            .await;
        }
        result
    }
}
