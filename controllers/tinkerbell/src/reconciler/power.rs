//! BMC power coordination.
//!
//! Hardware with a BMC reference is power-cycled into PXE before its
//! workflow can run, and powered off when its machine is deleted. Each
//! operation is a single Rufio job with a deterministic name, so repeated
//! passes observe the job created by an earlier one.

use crate::error::ControllerError;
use crds::{
    BmcJob, BmcJobConditionType, BmcJobSpec, BmcTask, BootDevice, Hardware, ObjectReference,
    PowerAction, TinkerbellMachine,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use store_client::{StoreClientTrait, StoreError};
use tracing::{debug, info};

/// Progress of a BMC job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobProgress {
    /// Created by this pass
    Created,
    /// Exists and has not finished
    Running,
    Completed,
}

/// Name of the job that reboots `hardware` into PXE
pub fn provision_job_name(hardware: &str) -> String {
    format!("{}-provision", hardware)
}

/// Name of the job that powers `hardware` off
pub fn poweroff_job_name(hardware: &str) -> String {
    format!("{}-poweroff", hardware)
}

/// Runs BMC jobs for a machine's hardware
pub struct PowerCoordinator<'a> {
    store: &'a dyn StoreClientTrait,
}

impl<'a> PowerCoordinator<'a> {
    pub fn new(store: &'a dyn StoreClientTrait) -> Self {
        Self { store }
    }

    /// Power off, one-time PXE boot, power on
    ///
    /// Returns `None` for hardware without a BMC, which is expected to
    /// netboot on its own.
    pub async fn ensure_provision_job(
        &self,
        machine: &TinkerbellMachine,
        hardware: &Hardware,
    ) -> Result<Option<JobProgress>, ControllerError> {
        let Some(bmc) = hardware.spec.bmc_ref.as_ref() else {
            return Ok(None);
        };
        let efi = hardware.first_dhcp()?.uefi;
        let tasks = vec![
            BmcTask::power(PowerAction::Off),
            BmcTask::boot_device(BootDevice::Pxe, efi),
            BmcTask::power(PowerAction::On),
        ];
        let job = self.job(machine, hardware, &bmc.name, provision_job_name(&hardware.name_any()), tasks);
        self.ensure(&job).await.map(Some)
    }

    /// Hard power off ahead of releasing the hardware
    pub async fn ensure_poweroff_job(
        &self,
        machine: &TinkerbellMachine,
        hardware: &Hardware,
    ) -> Result<Option<JobProgress>, ControllerError> {
        let Some(bmc) = hardware.spec.bmc_ref.as_ref() else {
            return Ok(None);
        };
        let tasks = vec![BmcTask::power(PowerAction::Off)];
        let job = self.job(machine, hardware, &bmc.name, poweroff_job_name(&hardware.name_any()), tasks);
        self.ensure(&job).await.map(Some)
    }

    /// Deletes both jobs of `hardware` so a later owner starts from scratch
    pub async fn delete_jobs(&self, hardware: &Hardware) -> Result<(), ControllerError> {
        let namespace = hardware.namespace().unwrap_or_default();
        let hw = hardware.name_any();
        for name in [provision_job_name(&hw), poweroff_job_name(&hw)] {
            match self.store.delete_bmc_job(&namespace, &name).await {
                Ok(()) => debug!("Deleted BMC job {}/{}", namespace, name),
                Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn job(
        &self,
        machine: &TinkerbellMachine,
        hardware: &Hardware,
        bmc_name: &str,
        name: String,
        tasks: Vec<BmcTask>,
    ) -> BmcJob {
        let namespace = hardware.namespace().unwrap_or_default();
        BmcJob {
            metadata: ObjectMeta {
                name: Some(name),
                namespace: Some(namespace.clone()),
                owner_references: machine.controller_owner_ref(&()).map(|owner| vec![owner]),
                ..Default::default()
            },
            spec: BmcJobSpec {
                machine_ref: ObjectReference::new(bmc_name, namespace),
                tasks,
            },
            status: None,
        }
    }

    async fn ensure(&self, job: &BmcJob) -> Result<JobProgress, ControllerError> {
        let namespace = job.namespace().unwrap_or_default();
        let name = job.name_any();
        let existing = match self.store.get_bmc_job(&namespace, &name).await {
            Ok(existing) => existing,
            Err(StoreError::NotFound(_)) => {
                return match self.store.create_bmc_job(job).await {
                    Ok(_) => {
                        info!("Created BMC job {}/{}", namespace, name);
                        Ok(JobProgress::Created)
                    }
                    Err(StoreError::AlreadyExists(_)) => Ok(JobProgress::Running),
                    Err(e) => Err(e.into()),
                };
            }
            Err(e) => return Err(e.into()),
        };

        if existing.has_condition(BmcJobConditionType::Failed) {
            return Err(ControllerError::BmcJobFailed(format!(
                "BMC job {}/{}: {}",
                namespace,
                name,
                existing.failure_message().unwrap_or("no message")
            )));
        }
        if existing.has_condition(BmcJobConditionType::Completed) {
            return Ok(JobProgress::Completed);
        }
        Ok(JobProgress::Running)
    }
}
