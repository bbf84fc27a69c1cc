//! Label, annotation, finalizer and state constants.
//!
//! The hardware claim labels are shared with the Tinkerbell hardware
//! discovery agent and must stay bit-exact.

// ============================================================================
// Hardware claim protocol
// ============================================================================

/// Name of the `TinkerbellMachine` that owns a hardware unit
pub const HARDWARE_OWNER_NAME_LABEL: &str = "v1alpha1.tinkerbell.org/ownerName";

/// Namespace of the `TinkerbellMachine` that owns a hardware unit
pub const HARDWARE_OWNER_NAMESPACE_LABEL: &str = "v1alpha1.tinkerbell.org/ownerNamespace";

/// Name of the `TinkerbellCluster` that reserved a hardware unit for its control-plane endpoint
pub const HARDWARE_CLUSTER_NAME_LABEL: &str = "v1alpha1.tinkerbell.org/clusterName";

/// Namespace of the `TinkerbellCluster` that reserved a hardware unit
pub const HARDWARE_CLUSTER_NAMESPACE_LABEL: &str = "v1alpha1.tinkerbell.org/clusterNamespace";

/// Finalizer carried by every claimed hardware unit
pub const HARDWARE_CLAIM_FINALIZER: &str = "v1alpha1.tinkerbell.org/hardware-claim";

// ============================================================================
// Hardware state strings
// ============================================================================

/// `spec.metadata.state` of a hardware unit running a provisioned node
pub const HARDWARE_STATE_IN_USE: &str = "in_use";

/// `spec.metadata.state` of an available hardware unit
pub const HARDWARE_STATE_AVAILABLE: &str = "";

/// `spec.metadata.instance.state` of an instance being provisioned by a workflow
pub const INSTANCE_STATE_PROVISIONING: &str = "provisioning";
/// Instance has reached the final workflow action
pub const INSTANCE_STATE_PROVISIONED: &str = "provisioned";

// ============================================================================
// Cluster API
// ============================================================================

/// API group of Cluster API core resources
pub const CAPI_GROUP: &str = "cluster.x-k8s.io";

/// Label set by Cluster API on every machine with the owning cluster name
pub const CAPI_CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Annotation pausing reconciliation of an object
pub const CAPI_PAUSED_ANNOTATION: &str = "cluster.x-k8s.io/paused";

/// API group of the provider's own resources
pub const INFRASTRUCTURE_GROUP: &str = "infrastructure.cluster.x-k8s.io";

/// Finalizer of `TinkerbellMachine`
pub const MACHINE_FINALIZER: &str = "tinkerbellmachine.infrastructure.cluster.x-k8s.io";

/// Finalizer of `TinkerbellCluster`
pub const CLUSTER_FINALIZER: &str = "tinkerbellcluster.infrastructure.cluster.x-k8s.io";

// ============================================================================
// Misc
// ============================================================================

/// Prefix of every provider ID produced by this provider
pub const PROVIDER_ID_PREFIX: &str = "tinkerbell://";

/// Control-plane endpoint port used when the cluster spec leaves it unset
pub const DEFAULT_CONTROL_PLANE_PORT: i32 = 6443;

/// Bootstrap data secret key holding the rendered user data
pub const BOOTSTRAP_DATA_KEY: &str = "value";

/// Build the provider ID for a hardware unit
#[must_use]
pub fn provider_id(namespace: &str, hardware_name: &str) -> String {
    format!("{PROVIDER_ID_PREFIX}{namespace}/{hardware_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_id_format() {
        assert_eq!(provider_id("default", "hw-0"), "tinkerbell://default/hw-0");
    }
}
