//! TinkerbellCluster CRD
//!
//! Provider-side cluster object. Reserves a hardware unit whose DHCP address
//! becomes the control-plane endpoint.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "TinkerbellCluster",
    namespaced,
    status = "TinkerbellClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct TinkerbellClusterSpec {
    /// Endpoint used to reach the control plane
    #[serde(default)]
    pub control_plane_endpoint: ApiEndpoint,

    /// Image URL format inherited by machines without their own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_lookup_format: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_lookup_base_registry: Option<String>,

    #[serde(default, rename = "imageLookupOSDistro", skip_serializing_if = "Option::is_none")]
    pub image_lookup_os_distro: Option<String>,

    #[serde(default, rename = "imageLookupOSVersion", skip_serializing_if = "Option::is_none")]
    pub image_lookup_os_version: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiEndpoint {
    #[serde(default)]
    pub host: String,

    #[serde(default)]
    pub port: i32,
}

impl ApiEndpoint {
    /// Whether no host has been assigned yet
    pub fn is_unset(&self) -> bool {
        self.host.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TinkerbellClusterStatus {
    /// Infrastructure is ready for machines
    #[serde(default)]
    pub ready: bool,
}
