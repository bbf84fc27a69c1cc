//! Object store client
//!
//! Typed access to the Kubernetes objects the Tinkerbell provider reads and
//! writes. Every write of an existing object is a compare-and-swap against the
//! snapshot the caller read: `patch_*(updated, base)` fails with
//! [`StoreError::Conflict`] when `base` is no longer the stored version.
//!
//! # Example
//!
//! ```no_run
//! use store_client::{KubeStoreClient, StoreClientTrait};
//! use crds::{Selector, HARDWARE_OWNER_NAME_LABEL};
//!
//! # async fn example(client: kube::Client) -> Result<(), store_client::StoreError> {
//! let store = KubeStoreClient::new(client);
//! let unclaimed = Selector::everything().without(HARDWARE_OWNER_NAME_LABEL);
//! let hardware = store.list_hardware(None, &unclaimed).await?;
//! # Ok(())
//! # }
//! ```

pub mod changes;
pub mod client;
pub mod error;
#[path = "trait.rs"]
pub mod store_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::KubeStoreClient;
pub use error::StoreError;
pub use store_trait::StoreClientTrait;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockStoreClient;
