//! Change detection between an updated object and its base snapshot
//!
//! Used by both the kube-backed client and the mock to decide which
//! writes a `patch_*(updated, base)` call needs, and by the kube-backed
//! client to build the merge patch it sends. Server-managed metadata is
//! ignored so a re-read object compares equal to its source.

use crate::error::StoreError;
use serde::Serialize;
use serde_json::{Map, Value};

const SERVER_MANAGED_METADATA: &[&str] = &[
    "resourceVersion",
    "managedFields",
    "generation",
    "creationTimestamp",
    "uid",
];

/// Which parts of an object differ from its base
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Changes {
    /// Metadata or spec differ
    pub object: bool,
    /// Status differs
    pub status: bool,
}

impl Changes {
    /// Nothing needs writing
    pub fn is_empty(&self) -> bool {
        !self.object && !self.status
    }
}

/// Compares `updated` against `base`
pub fn changes<K: Serialize>(updated: &K, base: &K) -> Result<Changes, StoreError> {
    let (updated_object, updated_status) = split(updated)?;
    let (base_object, base_status) = split(base)?;
    Ok(Changes {
        object: updated_object != base_object,
        status: updated_status != base_status,
    })
}

/// Serializes an object into its comparable body and its status
pub fn split<K: Serialize>(obj: &K) -> Result<(Value, Option<Value>), StoreError> {
    let mut value = serde_json::to_value(obj)?;
    let status = value.as_object_mut().and_then(|m| m.remove("status"));
    if let Some(meta) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        for key in SERVER_MANAGED_METADATA {
            meta.remove(*key);
        }
    }
    Ok((value, status.filter(|s| !s.is_null())))
}

/// JSON merge patch (RFC 7386) turning `base` into `updated`, status excluded
///
/// Only differing keys are carried; keys absent from `updated` become
/// `null`. Arrays are replaced as a whole.
pub fn merge_patch<K: Serialize>(updated: &K, base: &K) -> Result<Value, StoreError> {
    let (updated_object, _) = split(updated)?;
    let (base_object, _) = split(base)?;
    Ok(diff(&base_object, &updated_object).unwrap_or_else(|| Value::Object(Map::new())))
}

fn diff(base: &Value, updated: &Value) -> Option<Value> {
    match (base, updated) {
        (Value::Object(base), Value::Object(updated)) => {
            let mut patch = Map::new();
            for (key, value) in updated {
                match base.get(key) {
                    Some(old) => {
                        if let Some(changed) = diff(old, value) {
                            patch.insert(key.clone(), changed);
                        }
                    }
                    None => {
                        patch.insert(key.clone(), value.clone());
                    }
                }
            }
            for key in base.keys().filter(|k| !updated.contains_key(*k)) {
                patch.insert(key.clone(), Value::Null);
            }
            (!patch.is_empty()).then_some(Value::Object(patch))
        }
        _ if base == updated => None,
        _ => Some(updated.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{Hardware, TinkerbellMachine, TinkerbellMachineSpec, TinkerbellMachineStatus};
    use kube::ResourceExt;
    use serde_json::json;

    fn machine() -> TinkerbellMachine {
        let mut m = TinkerbellMachine::new("worker-0", TinkerbellMachineSpec::default());
        m.metadata.namespace = Some("default".to_string());
        m.metadata.resource_version = Some("7".to_string());
        m
    }

    #[test]
    fn test_resource_version_is_ignored() {
        let base = machine();
        let mut updated = base.clone();
        updated.metadata.resource_version = Some("8".to_string());
        assert!(changes(&updated, &base).unwrap().is_empty());
    }

    #[test]
    fn test_spec_and_status_detected_separately() {
        let base = machine();

        let mut updated = base.clone();
        updated.spec.hardware_name = Some("hw-a".to_string());
        assert_eq!(
            changes(&updated, &base).unwrap(),
            Changes { object: true, status: false }
        );

        let mut updated = base.clone();
        updated.status = Some(TinkerbellMachineStatus {
            ready: true,
            ..Default::default()
        });
        assert_eq!(
            changes(&updated, &base).unwrap(),
            Changes { object: false, status: true }
        );
    }

    #[test]
    fn test_merge_patch_carries_only_changed_keys() {
        let base: Hardware = serde_json::from_value(json!({
            "apiVersion": "tinkerbell.org/v1alpha1",
            "kind": "Hardware",
            "metadata": {
                "name": "hw-0",
                "namespace": "default",
                "resourceVersion": "41",
                "labels": {"rack": "r1", "stale": "x"}
            },
            "spec": {
                "interfaces": [{
                    "dhcp": {"mac": "aa:bb:cc:dd:ee:00", "arch": "x86_64", "lease_time": 86400},
                    "netboot": {"allowPXE": true, "osie": {"baseURL": "http://osie"}}
                }],
                "vendorData": "vendor",
                "tinkVersion": 1
            }
        }))
        .unwrap();

        let mut updated = base.clone();
        updated.labels_mut().remove("stale");
        updated.labels_mut().insert("owner".to_string(), "m-0".to_string());
        updated.spec.user_data = Some("#cloud-config".to_string());

        let patch = merge_patch(&updated, &base).unwrap();
        assert_eq!(
            patch,
            json!({
                "metadata": {"labels": {"stale": null, "owner": "m-0"}},
                "spec": {"userData": "#cloud-config"}
            })
        );
    }

    #[test]
    fn test_merge_patch_replaces_changed_arrays_whole() {
        let base: Hardware = serde_json::from_value(json!({
            "apiVersion": "tinkerbell.org/v1alpha1",
            "kind": "Hardware",
            "metadata": {"name": "hw-0", "namespace": "default"},
            "spec": {
                "interfaces": [{
                    "dhcp": {"mac": "aa:bb:cc:dd:ee:00", "lease_time": 86400},
                    "netboot": {"allowPXE": true, "ipxe": {"contents": "#!ipxe"}}
                }]
            }
        }))
        .unwrap();

        let mut updated = base.clone();
        if let Some(netboot) = updated.spec.interfaces[0].netboot.as_mut() {
            netboot.allow_pxe = Some(false);
        }

        let patch = merge_patch(&updated, &base).unwrap();
        let interface = &patch["spec"]["interfaces"][0];
        assert_eq!(interface["netboot"]["allowPXE"], json!(false));
        assert_eq!(interface["netboot"]["ipxe"]["contents"], json!("#!ipxe"));
        assert_eq!(interface["dhcp"]["lease_time"], json!(86400));
    }

    #[test]
    fn test_merge_patch_of_identical_objects_is_empty() {
        let base = machine();
        assert_eq!(merge_patch(&base.clone(), &base).unwrap(), json!({}));
    }
}
