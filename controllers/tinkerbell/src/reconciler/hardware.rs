//! Hardware reservation.
//!
//! Ownership of a hardware unit is a pair of labels plus the claim finalizer,
//! written with a compare-and-swap against the snapshot the candidate was
//! listed from. Two passes racing for the same unit cannot both win: the
//! loser's base is stale and its patch fails with a conflict, which surfaces
//! as a transient error and is retried on the next pass.

use crate::error::ControllerError;
use crate::reconciler::affinity;
use crds::{
    Hardware, HardwareAffinity, Selector, HARDWARE_CLAIM_FINALIZER, HARDWARE_CLUSTER_NAME_LABEL,
    HARDWARE_CLUSTER_NAMESPACE_LABEL, HARDWARE_OWNER_NAME_LABEL, HARDWARE_OWNER_NAMESPACE_LABEL,
    HARDWARE_STATE_AVAILABLE, HARDWARE_STATE_IN_USE, INSTANCE_STATE_PROVISIONED,
    INSTANCE_STATE_PROVISIONING,
};
use kube::ResourceExt;
use store_client::{StoreClientTrait, StoreError};
use tracing::{debug, info, warn};

/// Who a hardware unit is claimed for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOwner<'a> {
    /// A `TinkerbellMachine` provisioning a node on the hardware
    Machine { name: &'a str, namespace: &'a str },
    /// A `TinkerbellCluster` using the hardware's address as control-plane endpoint
    Cluster { name: &'a str, namespace: &'a str },
}

impl<'a> ClaimOwner<'a> {
    fn label_keys(&self) -> (&'static str, &'static str) {
        match self {
            ClaimOwner::Machine { .. } => (HARDWARE_OWNER_NAME_LABEL, HARDWARE_OWNER_NAMESPACE_LABEL),
            ClaimOwner::Cluster { .. } => (HARDWARE_CLUSTER_NAME_LABEL, HARDWARE_CLUSTER_NAMESPACE_LABEL),
        }
    }

    fn name_and_namespace(&self) -> (&'a str, &'a str) {
        match *self {
            ClaimOwner::Machine { name, namespace } | ClaimOwner::Cluster { name, namespace } => {
                (name, namespace)
            }
        }
    }

    /// Namespace hardware is listed in
    pub fn namespace(&self) -> &'a str {
        self.name_and_namespace().1
    }

    /// Selector matching hardware claimed by this owner
    pub fn selector(&self) -> Selector {
        let (name_key, namespace_key) = self.label_keys();
        let (name, namespace) = self.name_and_namespace();
        Selector::everything()
            .equals(name_key, name)
            .equals(namespace_key, namespace)
    }

    /// Whether `hardware` carries this owner's claim labels
    pub fn owns(&self, hardware: &Hardware) -> bool {
        self.selector().matches(hardware.labels())
    }
}

impl std::fmt::Display for ClaimOwner<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClaimOwner::Machine { name, namespace } => write!(f, "TinkerbellMachine {}/{}", namespace, name),
            ClaimOwner::Cluster { name, namespace } => write!(f, "TinkerbellCluster {}/{}", namespace, name),
        }
    }
}

/// Claims and releases hardware through the object store
pub struct ReservationManager<'a> {
    store: &'a dyn StoreClientTrait,
}

impl<'a> ReservationManager<'a> {
    pub fn new(store: &'a dyn StoreClientTrait) -> Self {
        Self { store }
    }

    /// Hardware already claimed by `owner`, if any
    ///
    /// A previous pass may have claimed hardware and failed before recording
    /// the selection on the owner; this lookup resumes from that claim.
    pub async fn find_owned(&self, owner: &ClaimOwner<'_>) -> Result<Option<Hardware>, ControllerError> {
        let mut owned = self
            .store
            .list_hardware(Some(owner.namespace()), &owner.selector())
            .await?;
        owned.sort_by_key(|hw| hw.name_any());
        if owned.len() > 1 {
            warn!(
                "{} owns {} hardware units, using {}",
                owner,
                owned.len(),
                owned[0].name_any()
            );
        }
        Ok(owned.into_iter().next())
    }

    /// Reserves hardware for a machine
    ///
    /// Order: hardware already claimed by the machine, then the machine's
    /// pre-selected `hardware_name`, then the best match for `affinity`.
    pub async fn reserve_for_machine(
        &self,
        name: &str,
        namespace: &str,
        hardware_name: Option<&str>,
        affinity: Option<&HardwareAffinity>,
    ) -> Result<Hardware, ControllerError> {
        let owner = ClaimOwner::Machine { name, namespace };
        if let Some(hardware) = self.find_owned(&owner).await? {
            debug!("{} resumes with hardware {}", owner, hardware.name_any());
            return Ok(hardware);
        }

        if let Some(hardware_name) = hardware_name {
            let hardware = match self.store.get_hardware(namespace, hardware_name).await {
                Ok(hw) => hw,
                Err(StoreError::NotFound(_)) => {
                    return Err(ControllerError::NoHardwareAvailable(format!(
                        "hardware {}/{} selected by {} does not exist",
                        namespace, hardware_name, owner
                    )));
                }
                Err(e) => return Err(e.into()),
            };
            if hardware.is_claimed() {
                return Err(ControllerError::HardwareClaimed(format!(
                    "hardware {}/{} selected by {} is claimed by another owner",
                    namespace, hardware_name, owner
                )));
            }
            return self.claim(&hardware, &owner).await;
        }

        self.reserve_best(&owner, affinity).await
    }

    /// Reserves hardware whose address becomes a cluster's control-plane endpoint
    pub async fn reserve_for_cluster(&self, name: &str, namespace: &str) -> Result<Hardware, ControllerError> {
        let owner = ClaimOwner::Cluster { name, namespace };
        if let Some(hardware) = self.find_owned(&owner).await? {
            debug!("{} resumes with hardware {}", owner, hardware.name_any());
            return Ok(hardware);
        }
        self.reserve_best(&owner, None).await
    }

    async fn reserve_best(
        &self,
        owner: &ClaimOwner<'_>,
        affinity: Option<&HardwareAffinity>,
    ) -> Result<Hardware, ControllerError> {
        let mut candidates = Vec::new();
        for selector in affinity::required_selectors(affinity) {
            debug!("Listing hardware for {} with selector '{}'", owner, selector);
            candidates.extend(
                self.store
                    .list_hardware(Some(owner.namespace()), &selector)
                    .await?,
            );
        }

        let ranked = affinity::select(candidates, affinity);
        let best = ranked.first().ok_or_else(|| {
            ControllerError::NoHardwareAvailable(format!(
                "no unclaimed hardware in namespace {} matches the requirements of {}",
                owner.namespace(),
                owner
            ))
        })?;
        self.claim(best, owner).await
    }

    /// Writes the claim labels and finalizer onto `hardware`
    async fn claim(&self, hardware: &Hardware, owner: &ClaimOwner<'_>) -> Result<Hardware, ControllerError> {
        let (name_key, namespace_key) = owner.label_keys();
        let (name, namespace) = owner.name_and_namespace();

        let mut updated = hardware.clone();
        let labels = updated.labels_mut();
        labels.insert(name_key.to_string(), name.to_string());
        labels.insert(namespace_key.to_string(), namespace.to_string());
        let finalizers = updated.finalizers_mut();
        if !finalizers.iter().any(|f| f == HARDWARE_CLAIM_FINALIZER) {
            finalizers.push(HARDWARE_CLAIM_FINALIZER.to_string());
        }

        let claimed = self.store.patch_hardware(&updated, hardware).await?;
        info!("Claimed hardware {} for {}", claimed.name_any(), owner);
        Ok(claimed)
    }

    /// Returns `hardware` to the available pool
    ///
    /// Removes both claim label pairs and the finalizer in one write, blanks
    /// the hardware and instance state and re-enables netboot. Hardware that
    /// is not claimed is left untouched.
    pub async fn release(&self, hardware: &Hardware) -> Result<Hardware, ControllerError> {
        if !hardware.is_claimed() && !has_claim_finalizer(hardware) {
            debug!("Hardware {} is not claimed, nothing to release", hardware.name_any());
            return Ok(hardware.clone());
        }

        let mut updated = hardware.clone();
        let labels = updated.labels_mut();
        for key in [
            HARDWARE_OWNER_NAME_LABEL,
            HARDWARE_OWNER_NAMESPACE_LABEL,
            HARDWARE_CLUSTER_NAME_LABEL,
            HARDWARE_CLUSTER_NAMESPACE_LABEL,
        ] {
            labels.remove(key);
        }
        updated.finalizers_mut().retain(|f| f != HARDWARE_CLAIM_FINALIZER);

        if let Some(metadata) = updated.spec.metadata.as_mut() {
            metadata.state = HARDWARE_STATE_AVAILABLE.to_string();
            if let Some(instance) = metadata.instance.as_mut() {
                instance.state = String::new();
            }
        }
        set_netboot(&mut updated, true);

        let released = self.store.patch_hardware(&updated, hardware).await?;
        info!("Released hardware {}", released.name_any());
        Ok(released)
    }

    /// Releases every unit claimed by `owner`, returning how many were released
    pub async fn release_owned(&self, owner: &ClaimOwner<'_>) -> Result<usize, ControllerError> {
        let owned = self
            .store
            .list_hardware(Some(owner.namespace()), &owner.selector())
            .await?;
        for hardware in &owned {
            self.release(hardware).await?;
        }
        Ok(owned.len())
    }

    /// Stores the bootstrap user data and marks the instance as provisioning
    ///
    /// Hardware that already reached the provisioned state keeps its state.
    pub async fn prepare_for_provisioning(
        &self,
        hardware: &Hardware,
        user_data: &str,
    ) -> Result<Hardware, ControllerError> {
        let mut updated = hardware.clone();
        updated.spec.user_data = Some(user_data.to_string());

        let metadata = updated.spec.metadata.get_or_insert_with(Default::default);
        let instance = metadata.instance.get_or_insert_with(Default::default);
        if instance.state != INSTANCE_STATE_PROVISIONED {
            instance.state = INSTANCE_STATE_PROVISIONING.to_string();
            set_netboot(&mut updated, true);
        }

        Ok(self.store.patch_hardware(&updated, hardware).await?)
    }

    /// Marks the hardware as running a provisioned node and stops netbooting it
    pub async fn mark_provisioned(&self, hardware: &Hardware) -> Result<Hardware, ControllerError> {
        let mut updated = hardware.clone();
        let metadata = updated.spec.metadata.get_or_insert_with(Default::default);
        metadata.state = HARDWARE_STATE_IN_USE.to_string();
        metadata
            .instance
            .get_or_insert_with(Default::default)
            .state = INSTANCE_STATE_PROVISIONED.to_string();
        for interface in &mut updated.spec.interfaces {
            if let Some(netboot) = interface.netboot.as_mut() {
                netboot.allow_pxe = Some(false);
            }
        }

        Ok(self.store.patch_hardware(&updated, hardware).await?)
    }
}

fn has_claim_finalizer(hardware: &Hardware) -> bool {
    hardware.finalizers().iter().any(|f| f == HARDWARE_CLAIM_FINALIZER)
}

fn set_netboot(hardware: &mut Hardware, allowed: bool) {
    for interface in &mut hardware.spec.interfaces {
        let netboot = interface.netboot.get_or_insert_with(Default::default);
        netboot.allow_pxe = Some(allowed);
        netboot.allow_workflow = Some(allowed);
    }
}
