//! Template CRD
//!
//! Rendered Tinkerbell workflow template. Created once per machine and owned
//! by it; the provider never mutates a template after creation.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "tinkerbell.org",
    version = "v1alpha1",
    kind = "Template",
    shortname = "tpl",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSpec {
    /// Template body (YAML)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}
