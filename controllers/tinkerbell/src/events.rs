//! Kubernetes Event recording.
//!
//! Events are fire-and-forget: a failed publish is logged and never fails
//! the reconcile pass that produced it.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// `reportingComponent` of every event this controller publishes
pub const CONTROLLER_NAME: &str = "tinkerbell-controller";

/// Publishes Kubernetes Events about reconciled objects
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Drops every event; used when no API server is available
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Event reasons (REASON column of `kubectl get events`)
pub mod reasons {
    pub const HARDWARE_RESERVED: &str = "HardwareReserved";
    pub const HARDWARE_RELEASED: &str = "HardwareReleased";
    pub const MACHINE_READY: &str = "MachineReady";
    pub const CLUSTER_READY: &str = "ClusterReady";
}

/// Event actions (ACTION column of `kubectl get events`)
pub mod actions {
    pub const RECONCILE: &str = "Reconcile";
    pub const PROVISION: &str = "Provision";
    pub const DELETE: &str = "Delete";
}
