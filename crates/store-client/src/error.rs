//! Object store errors

use thiserror::Error;

/// Errors that can occur when talking to the object store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Kubernetes API error not covered by a more specific variant
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The base snapshot of a compare-and-swap is stale
    #[error("Conflict: {0}")]
    Conflict(String),

    /// An object with the same name already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Object is missing required metadata (name, namespace)
    #[error("Invalid object: {0}")]
    InvalidObject(String),
}

impl StoreError {
    /// Whether the error is a lost optimistic-concurrency race
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    /// Whether the object was missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Maps a kube error for the object `what`, keeping 404 and 409 distinct
    pub(crate) fn from_kube(err: kube::Error, what: &str) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound(what.to_string()),
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                StoreError::AlreadyExists(what.to_string())
            }
            kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict(what.to_string()),
            other => StoreError::Kube(other),
        }
    }
}
