//! Unit tests for hardware reservation

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::reconciler::hardware::{ClaimOwner, ReservationManager};
    use crate::test_utils::*;
    use crds::*;
    use kube::ResourceExt;
    use store_client::{MockStoreClient, StoreClientTrait, StoreError};

    fn preferring(weight: i32, key: &str, value: &str) -> HardwareAffinity {
        HardwareAffinity {
            required: vec![],
            preferred: vec![WeightedHardwareAffinityTerm {
                weight,
                hardware_affinity_term: HardwareAffinityTerm {
                    label_selector: LabelSelector {
                        match_labels: [(key.to_string(), value.to_string())].into(),
                        match_expressions: vec![],
                    },
                },
            }],
        }
    }

    #[tokio::test]
    async fn test_claim_writes_labels_and_finalizer() {
        let store = MockStoreClient::new();
        store.add_hardware(hardware_with_ip("hw-0", "default", "10.0.0.2"));
        let reservations = ReservationManager::new(&store);

        let hw = reservations
            .reserve_for_machine("m-0", "default", None, None)
            .await
            .unwrap();

        assert_eq!(hw.machine_owner(), Some(("m-0", "default")));
        assert_eq!(hw.cluster_owner(), None);
        assert!(hw.finalizers().iter().any(|f| f == HARDWARE_CLAIM_FINALIZER));
    }

    #[tokio::test]
    async fn test_racing_machines_get_one_claim() {
        let store = MockStoreClient::new();
        store.add_hardware(hardware_with_ip("hw-0", "default", "10.0.0.2"));
        // Both reservations list the unclaimed unit before either writes
        store.interleave_hardware_lists();
        let reservations = ReservationManager::new(&store);

        let (a, b) = tokio::join!(
            reservations.reserve_for_machine("m-a", "default", None, None),
            reservations.reserve_for_machine("m-b", "default", None, None),
        );

        let (winner, loser) = match (a, b) {
            (Ok(_), Err(e)) => ("m-a", e),
            (Err(e), Ok(_)) => ("m-b", e),
            other => panic!("expected exactly one claim, got {:?}", other),
        };
        assert!(matches!(loser, ControllerError::Store(StoreError::Conflict(_))));
        assert!(loser.is_transient());

        let stored = store.get_hardware("default", "hw-0").await.unwrap();
        assert_eq!(stored.machine_owner(), Some((winner, "default")));
        assert_eq!(
            stored
                .finalizers()
                .iter()
                .filter(|f| *f == HARDWARE_CLAIM_FINALIZER)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_claim_and_release_keep_unmodelled_hardware_fields() {
        let store = MockStoreClient::new();
        let hw: Hardware = serde_json::from_value(serde_json::json!({
            "apiVersion": "tinkerbell.org/v1alpha1",
            "kind": "Hardware",
            "metadata": {"name": "hw-0", "namespace": "default"},
            "spec": {
                "interfaces": [{
                    "dhcp": {
                        "mac": "aa:bb:cc:dd:ee:00",
                        "arch": "x86_64",
                        "lease_time": 86400,
                        "name_servers": ["1.1.1.1"],
                        "ip": {"address": "10.0.0.2", "netmask": "255.255.255.0"}
                    },
                    "netboot": {"allowPXE": true, "allowWorkflow": true, "osie": {"baseURL": "http://osie"}}
                }],
                "metadata": {
                    "facility": {"facility_code": "onprem"},
                    "instance": {"id": "inst-0", "state": "", "operating_system": {"distro": "ubuntu"}}
                },
                "vendorData": "vendor"
            }
        }))
        .unwrap();
        store.add_hardware(hw);
        let reservations = ReservationManager::new(&store);

        let claimed = reservations
            .reserve_for_machine("m-0", "default", None, None)
            .await
            .unwrap();
        let prepared = reservations
            .prepare_for_provisioning(&claimed, "#cloud-config\n")
            .await
            .unwrap();
        let provisioned = reservations.mark_provisioned(&prepared).await.unwrap();
        reservations.release(&provisioned).await.unwrap();

        let stored = store.get_hardware("default", "hw-0").await.unwrap();
        let spec = serde_json::to_value(&stored.spec).unwrap();
        let interface = &spec["interfaces"][0];
        assert_eq!(interface["dhcp"]["arch"], "x86_64");
        assert_eq!(interface["dhcp"]["lease_time"], 86400);
        assert_eq!(interface["dhcp"]["name_servers"][0], "1.1.1.1");
        assert_eq!(interface["netboot"]["osie"]["baseURL"], "http://osie");
        assert_eq!(interface["netboot"]["allowPXE"], true);
        assert_eq!(spec["metadata"]["facility"]["facility_code"], "onprem");
        assert_eq!(spec["metadata"]["instance"]["operating_system"]["distro"], "ubuntu");
        assert_eq!(spec["vendorData"], "vendor");
        assert!(!stored.is_claimed());
    }

    #[tokio::test]
    async fn test_stale_claim_is_transient_and_leaves_hardware_unclaimed() {
        let store = MockStoreClient::new();
        store.add_hardware(hardware_with_ip("hw-0", "default", "10.0.0.2"));
        store.inject_hardware_conflicts(1);
        let reservations = ReservationManager::new(&store);

        let err = reservations
            .reserve_for_machine("m-0", "default", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Store(StoreError::Conflict(_))));
        assert!(err.is_transient());
        assert!(!store.get_hardware("default", "hw-0").await.unwrap().is_claimed());

        // The next pass lists a fresh snapshot and wins
        let hw = reservations
            .reserve_for_machine("m-0", "default", None, None)
            .await
            .unwrap();
        assert_eq!(hw.machine_owner(), Some(("m-0", "default")));
    }

    #[tokio::test]
    async fn test_patch_against_listed_snapshot_conflicts_after_claim() {
        let store = MockStoreClient::new();
        let snapshot = store.add_hardware(hardware_with_ip("hw-0", "default", "10.0.0.2"));
        ReservationManager::new(&store)
            .reserve_for_machine("m-a", "default", None, None)
            .await
            .unwrap();

        let mut stale = snapshot.clone();
        stale
            .labels_mut()
            .insert(HARDWARE_OWNER_NAME_LABEL.to_string(), "m-b".to_string());
        let err = store.patch_hardware(&stale, &snapshot).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_reservation_resumes_without_matching() {
        let store = MockStoreClient::new();
        store.add_hardware(hardware_with_ip("hw-0", "default", "10.0.0.2"));
        store.add_hardware(hardware_with_ip("hw-1", "default", "10.0.0.3"));
        let reservations = ReservationManager::new(&store);

        let first = reservations
            .reserve_for_machine("m-0", "default", None, None)
            .await
            .unwrap();
        let calls = store.hardware_list_calls();

        let second = reservations
            .reserve_for_machine("m-0", "default", None, None)
            .await
            .unwrap();

        assert_eq!(first.name_any(), second.name_any());
        // Only the ownership lookup ran
        assert_eq!(store.hardware_list_calls(), calls + 1);
        let claimed = store.all_hardware().iter().filter(|hw| hw.is_claimed()).count();
        assert_eq!(claimed, 1);
    }

    #[tokio::test]
    async fn test_ranking_prefers_weight_then_name() {
        let store = MockStoreClient::new();
        store.add_hardware(hardware_with_labels("hw-c", "default", &[("rack", "r1")]));
        store.add_hardware(hardware_with_labels("hw-a", "default", &[("rack", "r2")]));
        store.add_hardware(hardware_with_labels("hw-b", "default", &[("rack", "r1")]));
        let reservations = ReservationManager::new(&store);

        let affinity = preferring(10, "rack", "r1");
        let hw = reservations
            .reserve_for_machine("m-0", "default", None, Some(&affinity))
            .await
            .unwrap();
        assert_eq!(hw.name_any(), "hw-b");

        let hw = reservations
            .reserve_for_machine("m-1", "default", None, None)
            .await
            .unwrap();
        assert_eq!(hw.name_any(), "hw-a");
    }

    #[tokio::test]
    async fn test_required_terms_filter_candidates() {
        let store = MockStoreClient::new();
        store.add_hardware(hardware_with_labels("hw-0", "default", &[("type", "worker")]));
        store.add_hardware(hardware_with_labels("hw-1", "default", &[("type", "cp")]));
        let reservations = ReservationManager::new(&store);

        let affinity = HardwareAffinity {
            required: vec![HardwareAffinityTerm {
                label_selector: LabelSelector {
                    match_labels: [("type".to_string(), "cp".to_string())].into(),
                    match_expressions: vec![],
                },
            }],
            preferred: vec![],
        };
        let hw = reservations
            .reserve_for_machine("m-0", "default", None, Some(&affinity))
            .await
            .unwrap();
        assert_eq!(hw.name_any(), "hw-1");

        let err = reservations
            .reserve_for_machine("m-1", "default", None, Some(&affinity))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::NoHardwareAvailable(_)));
    }

    #[tokio::test]
    async fn test_hardware_in_other_namespaces_is_ignored() {
        let store = MockStoreClient::new();
        store.add_hardware(hardware_with_ip("hw-0", "other", "10.0.0.2"));
        let reservations = ReservationManager::new(&store);

        let err = reservations
            .reserve_for_machine("m-0", "default", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::NoHardwareAvailable(_)));
    }

    #[tokio::test]
    async fn test_cluster_and_machine_claims_are_exclusive() {
        let store = MockStoreClient::new();
        store.add_hardware(hardware_with_ip("hw-0", "default", "10.0.0.2"));
        let reservations = ReservationManager::new(&store);

        let hw = reservations.reserve_for_cluster("c-0", "default").await.unwrap();
        assert_eq!(hw.cluster_owner(), Some(("c-0", "default")));

        let err = reservations
            .reserve_for_machine("m-0", "default", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::NoHardwareAvailable(_)));
    }

    #[tokio::test]
    async fn test_preselected_hardware() {
        let store = MockStoreClient::new();
        store.add_hardware(hardware_with_ip("hw-0", "default", "10.0.0.2"));
        store.add_hardware(hardware_with_ip("hw-1", "default", "10.0.0.3"));
        let reservations = ReservationManager::new(&store);

        let hw = reservations
            .reserve_for_machine("m-0", "default", Some("hw-1"), None)
            .await
            .unwrap();
        assert_eq!(hw.name_any(), "hw-1");

        let err = reservations
            .reserve_for_machine("m-1", "default", Some("hw-1"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::HardwareClaimed(_)));
        assert!(!err.is_transient());

        let err = reservations
            .reserve_for_machine("m-1", "default", Some("hw-9"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::NoHardwareAvailable(_)));
    }

    #[tokio::test]
    async fn test_release_restores_unclaimed_hardware() {
        let store = MockStoreClient::new();
        let original = store.add_hardware(hardware_with_ip("hw-0", "default", "10.0.0.2"));
        let reservations = ReservationManager::new(&store);

        let claimed = reservations
            .reserve_for_machine("m-0", "default", None, None)
            .await
            .unwrap();
        let released = reservations.release(&claimed).await.unwrap();

        assert!(!released.is_claimed());
        assert_eq!(released.labels(), original.labels());
        assert_eq!(released.finalizers(), original.finalizers());
        assert_eq!(released.spec, original.spec);

        // Releasing again is a no-op
        let again = reservations.release(&released).await.unwrap();
        assert_eq!(again.resource_version(), released.resource_version());
    }

    #[tokio::test]
    async fn test_release_after_provisioning_blanks_state() {
        let store = MockStoreClient::new();
        store.add_hardware(hardware_with_ip("hw-0", "default", "10.0.0.2"));
        let reservations = ReservationManager::new(&store);

        let hw = reservations
            .reserve_for_machine("m-0", "default", None, None)
            .await
            .unwrap();
        let hw = reservations.prepare_for_provisioning(&hw, "#cloud-config\n").await.unwrap();
        let hw = reservations.mark_provisioned(&hw).await.unwrap();
        let netboot = hw.spec.interfaces[0].netboot.as_ref().unwrap();
        assert_eq!(netboot.allow_pxe, Some(false));

        let released = reservations.release(&hw).await.unwrap();
        let metadata = released.spec.metadata.as_ref().unwrap();
        assert_eq!(metadata.state, HARDWARE_STATE_AVAILABLE);
        assert_eq!(metadata.instance.as_ref().unwrap().state, "");
        let netboot = released.spec.interfaces[0].netboot.as_ref().unwrap();
        assert_eq!(netboot.allow_pxe, Some(true));
        assert_eq!(netboot.allow_workflow, Some(true));
    }

    #[tokio::test]
    async fn test_provisioning_state_transitions() {
        let store = MockStoreClient::new();
        store.add_hardware(hardware_with_ip("hw-0", "default", "10.0.0.2"));
        let reservations = ReservationManager::new(&store);
        let hw = reservations
            .reserve_for_machine("m-0", "default", None, None)
            .await
            .unwrap();

        let hw = reservations.prepare_for_provisioning(&hw, "#cloud-config\n").await.unwrap();
        assert_eq!(hw.spec.user_data.as_deref(), Some("#cloud-config\n"));
        let instance = hw.spec.metadata.as_ref().and_then(|m| m.instance.as_ref()).unwrap();
        assert_eq!(instance.state, INSTANCE_STATE_PROVISIONING);

        let hw = reservations.mark_provisioned(&hw).await.unwrap();
        let metadata = hw.spec.metadata.as_ref().unwrap();
        assert_eq!(metadata.state, HARDWARE_STATE_IN_USE);
        assert_eq!(metadata.instance.as_ref().unwrap().state, INSTANCE_STATE_PROVISIONED);

        // A later pass does not move provisioned hardware back
        let hw = reservations.prepare_for_provisioning(&hw, "#cloud-config\n").await.unwrap();
        let instance = hw.spec.metadata.as_ref().and_then(|m| m.instance.as_ref()).unwrap();
        assert_eq!(instance.state, INSTANCE_STATE_PROVISIONED);
    }

    #[tokio::test]
    async fn test_release_owned_by_cluster() {
        let store = MockStoreClient::new();
        store.add_hardware(hardware_with_ip("hw-0", "default", "10.0.0.2"));
        store.add_hardware(hardware_with_ip("hw-1", "default", "10.0.0.3"));
        let reservations = ReservationManager::new(&store);
        reservations.reserve_for_cluster("c-0", "default").await.unwrap();
        reservations
            .reserve_for_machine("m-0", "default", None, None)
            .await
            .unwrap();

        let owner = ClaimOwner::Cluster {
            name: "c-0",
            namespace: "default",
        };
        assert_eq!(reservations.release_owned(&owner).await.unwrap(), 1);
        assert_eq!(reservations.release_owned(&owner).await.unwrap(), 0);

        let still_claimed: Vec<_> = store.all_hardware().into_iter().filter(|hw| hw.is_claimed()).collect();
        assert_eq!(still_claimed.len(), 1);
        assert_eq!(still_claimed[0].machine_owner(), Some(("m-0", "default")));
    }
}
