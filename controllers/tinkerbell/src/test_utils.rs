//! Test utilities for unit testing reconcilers
//!
//! Builders for the provider, Tinkerbell and Cluster API objects the
//! reconcilers read, plus a reconciler wired to a [`MockStoreClient`].

use crate::config::ControllerConfig;
use crate::events::NoopEventPublisher;
use crate::reconciler::Reconciler;
use crds::*;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use std::collections::BTreeMap;
use std::sync::Arc;
use store_client::MockStoreClient;

/// MAC address of the first interface of every test hardware
pub const TEST_MAC: &str = "aa:bb:cc:dd:ee:00";

/// Kubernetes version of every test Machine
pub const TEST_K8S_VERSION: &str = "v1.30.2";

fn meta(name: &str, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

fn capi_owner_ref(kind: &str, name: &str) -> OwnerReference {
    OwnerReference {
        api_version: format!("{}/v1beta1", CAPI_GROUP),
        kind: kind.to_string(),
        name: name.to_string(),
        uid: format!("{}-uid", name),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Hardware with one DHCP interface at `ip` and disk `/dev/sda`
pub fn hardware_with_ip(name: &str, namespace: &str, ip: &str) -> Hardware {
    Hardware {
        metadata: meta(name, namespace),
        spec: HardwareSpec {
            interfaces: vec![Interface {
                dhcp: Some(Dhcp {
                    mac: TEST_MAC.to_string(),
                    hostname: Some(name.to_string()),
                    ip: Some(Ip {
                        address: ip.to_string(),
                        netmask: Some("255.255.255.0".to_string()),
                        ..Default::default()
                    }),
                    uefi: true,
                    ..Default::default()
                }),
                netboot: Some(Netboot {
                    allow_pxe: Some(true),
                    allow_workflow: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            disks: vec![Disk {
                device: "/dev/sda".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        },
    }
}

/// Hardware with `labels` and a DHCP interface
pub fn hardware_with_labels(name: &str, namespace: &str, labels: &[(&str, &str)]) -> Hardware {
    let mut hardware = hardware_with_ip(name, namespace, "10.0.0.10");
    hardware.metadata.labels = Some(
        labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    );
    hardware
}

/// Hardware managed by the BMC machine `bmc`
pub fn hardware_with_bmc(name: &str, namespace: &str, ip: &str, bmc: &str) -> Hardware {
    let mut hardware = hardware_with_ip(name, namespace, ip);
    hardware.spec.bmc_ref = Some(TypedLocalObjectReference {
        api_group: Some("bmc.tinkerbell.org".to_string()),
        kind: "Machine".to_string(),
        name: bmc.to_string(),
    });
    hardware
}

/// TinkerbellMachine owned by the Cluster API Machine of the same name in cluster `test-cluster`
pub fn machine(name: &str, namespace: &str) -> TinkerbellMachine {
    let mut metadata = meta(name, namespace);
    metadata.owner_references = Some(vec![capi_owner_ref("Machine", name)]);
    metadata.labels = Some(BTreeMap::from([(
        CAPI_CLUSTER_NAME_LABEL.to_string(),
        "test-cluster".to_string(),
    )]));
    TinkerbellMachine {
        metadata,
        spec: TinkerbellMachineSpec::default(),
        status: None,
    }
}

/// TinkerbellCluster owned by the Cluster API Cluster `owner`
pub fn cluster(name: &str, namespace: &str, owner: &str) -> TinkerbellCluster {
    let mut metadata = meta(name, namespace);
    metadata.owner_references = Some(vec![capi_owner_ref("Cluster", owner)]);
    TinkerbellCluster {
        metadata,
        spec: TinkerbellClusterSpec::default(),
        status: None,
    }
}

/// Cluster API Cluster pointing at the TinkerbellCluster `infra`
pub fn capi_cluster(name: &str, namespace: &str, infra: &str) -> CapiCluster {
    CapiCluster {
        metadata: meta(name, namespace),
        spec: CapiClusterSpec {
            paused: false,
            infrastructure_ref: Some(ObjectReference {
                api_version: Some(format!("{}/v1beta1", INFRASTRUCTURE_GROUP)),
                kind: Some("TinkerbellCluster".to_string()),
                name: infra.to_string(),
                namespace: Some(namespace.to_string()),
            }),
        },
    }
}

/// Cluster API Machine in `test-cluster` whose bootstrap data is in secret `<name>-bootstrap`
pub fn capi_machine(name: &str, namespace: &str) -> CapiMachine {
    CapiMachine {
        metadata: meta(name, namespace),
        spec: CapiMachineSpec {
            cluster_name: "test-cluster".to_string(),
            version: Some(TEST_K8S_VERSION.to_string()),
            bootstrap: Bootstrap {
                data_secret_name: Some(format!("{}-bootstrap", name)),
            },
            infrastructure_ref: ObjectReference::new(name, namespace),
        },
    }
}

/// Bootstrap data secret with `value` set to `user_data`
pub fn bootstrap_secret(name: &str, namespace: &str, user_data: &str) -> Secret {
    Secret {
        metadata: meta(name, namespace),
        data: Some(BTreeMap::from([(
            BOOTSTRAP_DATA_KEY.to_string(),
            ByteString(user_data.as_bytes().to_vec()),
        )])),
        ..Default::default()
    }
}

/// Workflow status with one task holding `actions`
pub fn workflow_status(state: WorkflowState, current: u32, actions: &[WorkflowState]) -> WorkflowStatus {
    WorkflowStatus {
        state,
        current_action_index: current,
        total_number_of_actions: actions.len() as u32,
        tasks: vec![Task {
            name: "os-installation".to_string(),
            actions: actions
                .iter()
                .enumerate()
                .map(|(i, status)| WorkflowAction {
                    name: format!("action-{}", i),
                    status: *status,
                })
                .collect(),
        }],
    }
}

/// Stores a TinkerbellMachine `name` together with its owner Machine and bootstrap secret
pub fn add_machine_with_owner(store: &MockStoreClient, name: &str, namespace: &str) -> TinkerbellMachine {
    store.add_capi_machine(capi_machine(name, namespace));
    store.add_secret(bootstrap_secret(&format!("{}-bootstrap", name), namespace, "#cloud-config\n"));
    store.add_tinkerbell_machine(machine(name, namespace))
}

/// Reconciler over `store` with default configuration and no event sink
pub fn create_test_reconciler(store: &MockStoreClient) -> Reconciler {
    Reconciler::new(
        Box::new(store.clone()),
        Arc::new(NoopEventPublisher),
        ControllerConfig::default(),
    )
}
