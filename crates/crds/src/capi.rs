//! Cluster API core resources
//!
//! Only the fields the provider reads are modelled; unknown fields are
//! ignored on deserialization. These types are never written by the provider.

use crate::references::ObjectReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Cluster",
    root = "CapiCluster",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CapiClusterSpec {
    /// Pauses reconciliation of the cluster and all its descendants
    #[serde(default)]
    pub paused: bool,

    /// Reference to the provider-specific cluster object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_ref: Option<ObjectReference>,
}

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Machine",
    root = "CapiMachine",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CapiMachineSpec {
    /// Name of the owning Cluster API cluster
    pub cluster_name: String,

    /// Kubernetes version the node runs, e.g. `v1.30.2`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default)]
    pub bootstrap: Bootstrap,

    /// Reference to the provider-specific machine object
    #[serde(default)]
    pub infrastructure_ref: ObjectReference,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Bootstrap {
    /// Secret holding the bootstrap data once the bootstrap provider produced it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_secret_name: Option<String>,
}
