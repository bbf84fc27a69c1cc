//! Controller-specific error types.
//!
//! Errors are matched by variant, never by message. [`ControllerError::is_transient`]
//! separates races and not-yet-available conditions, which resolve on a later
//! pass, from errors that need an operator.

use crds::HardwareError;
use kube::Error as KubeError;
use store_client::StoreError;
use thiserror::Error;

/// Errors that can occur in the Tinkerbell controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Object store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Selected hardware is malformed
    #[error("Invalid hardware: {0}")]
    Hardware(#[from] HardwareError),

    /// No unclaimed hardware matches the machine's or cluster's requirements
    #[error("No hardware available: {0}")]
    NoHardwareAvailable(String),

    /// Pre-selected hardware already belongs to another owner
    #[error("Hardware already claimed: {0}")]
    HardwareClaimed(String),

    /// Invalid configuration of the controller or of a reconciled object
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Provisioning template could not be rendered
    #[error("Template rendering failed: {0}")]
    TemplateRender(String),

    /// Workflow reported a failed or timed out action
    #[error("Workflow failed: {0}")]
    WorkflowFailed(String),

    /// BMC job reported a failure
    #[error("BMC job failed: {0}")]
    BmcJobFailed(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Whether the error resolves by retrying on a later pass
    pub fn is_transient(&self) -> bool {
        match self {
            ControllerError::Kube(_) | ControllerError::NoHardwareAvailable(_) => true,
            ControllerError::Store(e) => !matches!(e, StoreError::InvalidObject(_) | StoreError::Serialization(_)),
            _ => false,
        }
    }

    /// Short machine-readable reason, used for status and events
    pub fn reason(&self) -> &'static str {
        match self {
            ControllerError::Kube(_) | ControllerError::Store(_) => "StoreError",
            ControllerError::Hardware(_) => "InvalidHardware",
            ControllerError::NoHardwareAvailable(_) => "NoHardwareAvailable",
            ControllerError::HardwareClaimed(_) => "HardwareClaimed",
            ControllerError::InvalidConfig(_) => "InvalidConfiguration",
            ControllerError::TemplateRender(_) => "TemplateRenderFailed",
            ControllerError::WorkflowFailed(_) => "WorkflowFailed",
            ControllerError::BmcJobFailed(_) => "BmcJobFailed",
            ControllerError::Watch(_) => "WatchFailed",
        }
    }
}
