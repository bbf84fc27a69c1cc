//! Workflow CRD
//!
//! Binds a template to a hardware unit. The Tinkerbell workflow engine
//! executes the actions and reports progress through the status.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "tinkerbell.org",
    version = "v1alpha1",
    kind = "Workflow",
    shortname = "wf",
    namespaced,
    status = "WorkflowStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSpec {
    /// Name of the Template to run
    pub template_ref: String,

    /// Name of the Hardware to run it on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_ref: Option<String>,

    /// Template placeholders to hardware identifiers (`device_1` -> ID)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hardware_map: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStatus {
    /// Overall workflow state
    #[serde(default)]
    pub state: WorkflowState,

    /// Zero-based index of the action currently executing
    #[serde(default)]
    pub current_action_index: u32,

    /// Number of actions across all tasks
    #[serde(default)]
    pub total_number_of_actions: u32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<WorkflowAction>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowAction {
    pub name: String,

    #[serde(default)]
    pub status: WorkflowState,
}

/// State of a workflow or of a single action
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum WorkflowState {
    #[default]
    #[serde(rename = "STATE_PENDING")]
    Pending,
    #[serde(rename = "STATE_RUNNING")]
    Running,
    #[serde(rename = "STATE_SUCCESS")]
    Success,
    #[serde(rename = "STATE_FAILED")]
    Failed,
    #[serde(rename = "STATE_TIMEOUT")]
    Timeout,
}

impl WorkflowState {
    /// Failed or timed out
    pub fn is_failure(self) -> bool {
        matches!(self, WorkflowState::Failed | WorkflowState::Timeout)
    }
}

impl WorkflowStatus {
    /// State of the action at `current_action_index`, flattening tasks in order
    pub fn current_action_state(&self) -> Option<WorkflowState> {
        self.tasks
            .iter()
            .flat_map(|t| t.actions.iter())
            .nth(self.current_action_index as usize)
            .map(|a| a.status)
    }

    /// Whether the current action is the last one
    pub fn at_final_action(&self) -> bool {
        self.total_number_of_actions > 0
            && self.current_action_index.saturating_add(1) >= self.total_number_of_actions
    }
}
