//! Object references used across provider, Tinkerbell and Cluster API resources
//!
//! Follows the Kubernetes `ObjectReference` / `TypedLocalObjectReference`
//! shapes, reduced to the fields the provider reads.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to an object, optionally in another namespace
///
/// Used for Cluster API `infrastructureRef` fields and Rufio `machineRef`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    /// API version of the referenced object (e.g., "infrastructure.cluster.x-k8s.io/v1beta1")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Kind of the referenced object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Name of the referenced object
    pub name: String,

    /// Namespace of the referenced object (defaults to the referencing object's namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ObjectReference {
    /// Create a reference by name and namespace
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            api_version: None,
            kind: None,
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }

    /// Namespace of the reference, falling back to `default_ns`
    #[must_use]
    pub fn namespace_or<'a>(&'a self, default_ns: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(default_ns)
    }
}

/// Reference to an object in the same namespace with an explicit kind
///
/// Hardware uses this shape for `bmcRef`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypedLocalObjectReference {
    /// API group of the referenced object (e.g., "bmc.tinkerbell.org")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_group: Option<String>,

    /// Kind of the referenced object (e.g., "Machine")
    pub kind: String,

    /// Name of the referenced object
    pub name: String,
}
