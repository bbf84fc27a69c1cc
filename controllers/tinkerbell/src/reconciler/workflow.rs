//! Provisioning workflow orchestration.
//!
//! A machine is provisioned by one Template and one Workflow, both named
//! after the machine and owned by it. Creation is always preceded by an
//! existence check, so a pass interrupted anywhere can simply be repeated.

use crate::error::ControllerError;
use crds::{
    Hardware, Template, TemplateSpec, TinkerbellMachine, Workflow, WorkflowSpec, WorkflowState,
    WorkflowStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use store_client::{StoreClientTrait, StoreError};
use tracing::{debug, info};

/// Hardware map key the templates address the worker by
pub const WORKER_DEVICE_KEY: &str = "device_1";

/// Where a machine stands in its provisioning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningState {
    NoTemplate,
    NoWorkflow,
    WorkflowPending,
    WorkflowRunning,
    WorkflowFailed,
    WorkflowTimeout,
    /// The current action succeeded but more actions follow
    WorkflowSuccessButNotFinalAction,
    /// The final action has started or the workflow succeeded
    Ready,
}

/// Maps a workflow status onto a provisioning state
pub fn evaluate(status: Option<&WorkflowStatus>) -> ProvisioningState {
    let Some(status) = status else {
        return ProvisioningState::WorkflowPending;
    };

    let action = status.current_action_state();
    match (status.state, action) {
        (WorkflowState::Failed, _) | (_, Some(WorkflowState::Failed)) => ProvisioningState::WorkflowFailed,
        (WorkflowState::Timeout, _) | (_, Some(WorkflowState::Timeout)) => ProvisioningState::WorkflowTimeout,
        (WorkflowState::Success, _) => ProvisioningState::Ready,
        (_, Some(WorkflowState::Running | WorkflowState::Success)) if status.at_final_action() => {
            ProvisioningState::Ready
        }
        (_, Some(WorkflowState::Success)) => ProvisioningState::WorkflowSuccessButNotFinalAction,
        (WorkflowState::Running, _) | (_, Some(WorkflowState::Running)) => ProvisioningState::WorkflowRunning,
        _ => ProvisioningState::WorkflowPending,
    }
}

/// Result of an idempotent create
#[derive(Debug, Clone)]
pub enum Ensured<T> {
    /// Created by this call
    Created(T),
    /// Already present
    Existing(T),
}

impl<T> Ensured<T> {
    pub fn was_created(&self) -> bool {
        matches!(self, Ensured::Created(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Ensured::Created(v) | Ensured::Existing(v) => v,
        }
    }
}

/// Metadata for an object named after and owned by `machine`
fn owned_metadata(machine: &TinkerbellMachine) -> ObjectMeta {
    ObjectMeta {
        name: Some(machine.name_any()),
        namespace: machine.namespace(),
        owner_references: machine.controller_owner_ref(&()).map(|owner| vec![owner]),
        ..Default::default()
    }
}

/// Hardware map of a workflow: the worker is addressed by instance ID, or by MAC
pub fn hardware_map(hardware: &Hardware) -> Result<BTreeMap<String, String>, ControllerError> {
    let worker = match hardware.instance_id() {
        Some(id) => id.to_string(),
        None => hardware.first_dhcp()?.mac.clone(),
    };
    Ok(BTreeMap::from([(WORKER_DEVICE_KEY.to_string(), worker)]))
}

/// Creates and inspects the Template and Workflow of a machine
pub struct WorkflowOrchestrator<'a> {
    store: &'a dyn StoreClientTrait,
}

impl<'a> WorkflowOrchestrator<'a> {
    pub fn new(store: &'a dyn StoreClientTrait) -> Self {
        Self { store }
    }

    /// Ensures the machine's Template exists, rendering it only when absent
    pub async fn ensure_template<F>(
        &self,
        machine: &TinkerbellMachine,
        render: F,
    ) -> Result<Ensured<Template>, ControllerError>
    where
        F: FnOnce() -> Result<String, ControllerError>,
    {
        let namespace = machine.namespace().unwrap_or_default();
        let name = machine.name_any();
        match self.store.get_template(&namespace, &name).await {
            Ok(existing) => {
                debug!("Template {}/{} already exists", namespace, name);
                return Ok(Ensured::Existing(existing));
            }
            Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let template = Template {
            metadata: owned_metadata(machine),
            spec: TemplateSpec { data: Some(render()?) },
        };
        match self.store.create_template(&template).await {
            Ok(created) => {
                info!("Created Template {}/{}", namespace, name);
                Ok(Ensured::Created(created))
            }
            Err(StoreError::AlreadyExists(_)) => Ok(Ensured::Existing(self.store.get_template(&namespace, &name).await?)),
            Err(e) => Err(e.into()),
        }
    }

    /// Ensures the machine's Workflow exists, running its Template on `hardware`
    pub async fn ensure_workflow(
        &self,
        machine: &TinkerbellMachine,
        hardware: &Hardware,
    ) -> Result<Ensured<Workflow>, ControllerError> {
        let namespace = machine.namespace().unwrap_or_default();
        let name = machine.name_any();
        match self.store.get_workflow(&namespace, &name).await {
            Ok(existing) => return Ok(Ensured::Existing(existing)),
            Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let workflow = Workflow {
            metadata: owned_metadata(machine),
            spec: WorkflowSpec {
                template_ref: name.clone(),
                hardware_ref: Some(hardware.name_any()),
                hardware_map: hardware_map(hardware)?,
            },
            status: None,
        };
        match self.store.create_workflow(&workflow).await {
            Ok(created) => {
                info!(
                    "Created Workflow {}/{} for hardware {}",
                    namespace,
                    name,
                    hardware.name_any()
                );
                Ok(Ensured::Created(created))
            }
            Err(StoreError::AlreadyExists(_)) => Ok(Ensured::Existing(self.store.get_workflow(&namespace, &name).await?)),
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes the machine's Workflow and Template; missing objects are fine
    pub async fn delete_for(&self, machine: &TinkerbellMachine) -> Result<(), ControllerError> {
        let namespace = machine.namespace().unwrap_or_default();
        let name = machine.name_any();
        match self.store.delete_workflow(&namespace, &name).await {
            Ok(()) => info!("Deleted Workflow {}/{}", namespace, name),
            Err(StoreError::NotFound(_)) => debug!("Workflow {}/{} already gone", namespace, name),
            Err(e) => return Err(e.into()),
        }
        match self.store.delete_template(&namespace, &name).await {
            Ok(()) => info!("Deleted Template {}/{}", namespace, name),
            Err(StoreError::NotFound(_)) => debug!("Template {}/{} already gone", namespace, name),
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}
