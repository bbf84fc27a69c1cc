//! Rufio BMC Job CRD
//!
//! A job runs an ordered list of power / boot-device tasks against a BMC
//! machine and reports completion through status conditions.

use crate::references::ObjectReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "bmc.tinkerbell.org",
    version = "v1alpha1",
    kind = "Job",
    root = "BmcJob",
    namespaced,
    status = "BmcJobStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct BmcJobSpec {
    /// BMC machine the tasks run against
    pub machine_ref: ObjectReference,

    /// Tasks, executed in order
    pub tasks: Vec<BmcTask>,
}

/// One task; exactly one action is set
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BmcTask {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_action: Option<PowerAction>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_time_boot_device_action: Option<OneTimeBootDeviceAction>,
}

impl BmcTask {
    /// Task with a power action
    pub fn power(action: PowerAction) -> Self {
        Self {
            power_action: Some(action),
            one_time_boot_device_action: None,
        }
    }

    /// Task setting the next boot device
    pub fn boot_device(device: BootDevice, efi_boot: bool) -> Self {
        Self {
            power_action: None,
            one_time_boot_device_action: Some(OneTimeBootDeviceAction {
                device: vec![device],
                efi_boot,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PowerAction {
    /// Hard power off
    Off,
    On,
    Soft,
    Cycle,
    Reset,
    Status,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OneTimeBootDeviceAction {
    pub device: Vec<BootDevice>,

    #[serde(default)]
    pub efi_boot: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BootDevice {
    Pxe,
    Disk,
    Bios,
    Cdrom,
    Safe,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BmcJobStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<BmcJobCondition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BmcJobCondition {
    #[serde(rename = "type")]
    pub type_: BmcJobConditionType,

    pub status: ConditionStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum BmcJobConditionType {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl BmcJob {
    /// Whether the job carries condition `kind` with status `True`
    pub fn has_condition(&self, kind: BmcJobConditionType) -> bool {
        self.status.as_ref().is_some_and(|s| {
            s.conditions
                .iter()
                .any(|c| c.type_ == kind && c.status == ConditionStatus::True)
        })
    }

    /// Message of the `Failed` condition, if any
    pub fn failure_message(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| {
            s.conditions
                .iter()
                .find(|c| c.type_ == BmcJobConditionType::Failed)
                .and_then(|c| c.message.as_deref())
        })
    }
}
