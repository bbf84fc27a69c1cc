//! Hardware CRD
//!
//! One provisionable physical (or virtual) machine known to Tinkerbell.
//! Hardware is discovered externally; the provider only mutates labels,
//! finalizers, netboot flags, state strings and user data.

use crate::labels::{
    HARDWARE_CLUSTER_NAME_LABEL, HARDWARE_CLUSTER_NAMESPACE_LABEL, HARDWARE_OWNER_NAME_LABEL,
    HARDWARE_OWNER_NAMESPACE_LABEL,
};
use crate::references::TypedLocalObjectReference;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "tinkerbell.org",
    version = "v1alpha1",
    kind = "Hardware",
    plural = "hardware",
    shortname = "hw",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct HardwareSpec {
    /// Reference to the BMC machine used for power management
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bmc_ref: Option<TypedLocalObjectReference>,

    /// Network interfaces, the first one is the provisioning interface
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<Interface>,

    /// Block devices available for the OS image
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<Disk>,

    /// Free-form metadata served to the machine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HardwareMetadata>,

    /// Cloud-init user data handed to the provisioned OS
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,

    /// Fields the provider does not model, kept so writes do not drop them
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Interface {
    /// DHCP lease handed out on this interface
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp: Option<Dhcp>,

    /// Netboot permissions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub netboot: Option<Netboot>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Dhcp {
    /// MAC address of the interface
    pub mac: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<Ip>,

    /// Whether the machine boots in UEFI mode
    #[serde(default, rename = "uefi")]
    pub uefi: bool,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Ip {
    pub address: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub netmask: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Netboot {
    #[serde(default, rename = "allowPXE", skip_serializing_if = "Option::is_none")]
    pub allow_pxe: Option<bool>,

    #[serde(default, rename = "allowWorkflow", skip_serializing_if = "Option::is_none")]
    pub allow_workflow: Option<bool>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    /// Device path, e.g. `/dev/sda`
    pub device: String,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HardwareMetadata {
    /// `in_use` while a node runs on the hardware, empty when available
    #[serde(default)]
    pub state: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<Instance>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    #[serde(default)]
    pub id: String,

    /// `active`, `provisioning`, `provisioned` or empty
    #[serde(default)]
    pub state: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Malformed provisioning interface on a hardware unit
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HardwareError {
    #[error("hardware {0} has no network interfaces")]
    MissingInterfaces(String),

    #[error("hardware {0}: first network interface has no DHCP configuration")]
    FirstInterfaceNotDhcp(String),

    #[error("hardware {0}: first network interface DHCP configuration has no IP address")]
    FirstInterfaceDhcpMissingIp(String),
}

impl Hardware {
    /// DHCP configuration of the provisioning interface
    pub fn first_dhcp(&self) -> Result<&Dhcp, HardwareError> {
        let first = self
            .spec
            .interfaces
            .first()
            .ok_or_else(|| HardwareError::MissingInterfaces(self.name_any()))?;
        first
            .dhcp
            .as_ref()
            .ok_or_else(|| HardwareError::FirstInterfaceNotDhcp(self.name_any()))
    }

    /// IP address of the provisioning interface
    pub fn first_ip(&self) -> Result<&str, HardwareError> {
        self.first_dhcp()?
            .ip
            .as_ref()
            .map(|ip| ip.address.as_str())
            .filter(|address| !address.is_empty())
            .ok_or_else(|| HardwareError::FirstInterfaceDhcpMissingIp(self.name_any()))
    }

    /// Instance ID from the metadata, if any
    pub fn instance_id(&self) -> Option<&str> {
        self.spec
            .metadata
            .as_ref()
            .and_then(|m| m.instance.as_ref())
            .map(|i| i.id.as_str())
            .filter(|id| !id.is_empty())
    }

    /// `(name, namespace)` of the owning machine, if claimed by one
    pub fn machine_owner(&self) -> Option<(&str, &str)> {
        let labels = self.labels();
        Some((
            labels.get(HARDWARE_OWNER_NAME_LABEL)?.as_str(),
            labels.get(HARDWARE_OWNER_NAMESPACE_LABEL)?.as_str(),
        ))
    }

    /// `(name, namespace)` of the cluster that reserved this hardware, if any
    pub fn cluster_owner(&self) -> Option<(&str, &str)> {
        let labels = self.labels();
        Some((
            labels.get(HARDWARE_CLUSTER_NAME_LABEL)?.as_str(),
            labels.get(HARDWARE_CLUSTER_NAMESPACE_LABEL)?.as_str(),
        ))
    }

    /// Whether any claim label is present
    pub fn is_claimed(&self) -> bool {
        let labels = self.labels();
        [
            HARDWARE_OWNER_NAME_LABEL,
            HARDWARE_OWNER_NAMESPACE_LABEL,
            HARDWARE_CLUSTER_NAME_LABEL,
            HARDWARE_CLUSTER_NAMESPACE_LABEL,
        ]
        .iter()
        .any(|key| labels.contains_key(*key))
    }
}
