//! TinkerbellMachine CRD
//!
//! Provider-side machine object. Selects and claims a hardware unit, then
//! drives it through a Tinkerbell workflow until the node is provisioned.

use crate::selector::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "TinkerbellMachine",
    namespaced,
    status = "TinkerbellMachineStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct TinkerbellMachineSpec {
    /// `tinkerbell://<namespace>/<hardwareName>` once hardware is selected
    #[serde(default, rename = "providerID", skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,

    /// Hardware to use; set by the user to pre-select or by the provider after selection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_name: Option<String>,

    /// Constraints on which hardware may be selected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_affinity: Option<HardwareAffinity>,

    /// Replaces the default workflow template body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_override: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_lookup_format: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_lookup_base_registry: Option<String>,

    #[serde(default, rename = "imageLookupOSDistro", skip_serializing_if = "Option::is_none")]
    pub image_lookup_os_distro: Option<String>,

    #[serde(default, rename = "imageLookupOSVersion", skip_serializing_if = "Option::is_none")]
    pub image_lookup_os_version: Option<String>,
}

/// Required terms filter (OR-ed), preferred terms rank
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HardwareAffinity {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<HardwareAffinityTerm>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preferred: Vec<WeightedHardwareAffinityTerm>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HardwareAffinityTerm {
    #[serde(default)]
    pub label_selector: LabelSelector,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WeightedHardwareAffinityTerm {
    /// Added to the score of hardware matching the term
    pub weight: i32,

    pub hardware_affinity_term: HardwareAffinityTerm,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TinkerbellMachineStatus {
    /// The node is provisioned
    #[serde(default)]
    pub ready: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<MachineAddress>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MachineAddress {
    #[serde(rename = "type")]
    pub type_: MachineAddressType,

    pub address: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum MachineAddressType {
    Hostname,
    InternalIP,
    ExternalIP,
    InternalDNS,
    ExternalDNS,
}
