//! Tinkerbell provider CRD definitions
//!
//! Kubernetes resource types used by the Tinkerbell infrastructure provider:
//! - Provider resources: `TinkerbellCluster`, `TinkerbellMachine`
//! - Tinkerbell resources: `Hardware`, `Template`, `Workflow`
//! - Rufio BMC resources: `Job`
//! - The subset of Cluster API `Cluster` / `Machine` the provider reads
//!
//! Label selectors and the hardware claim protocol constants also live here
//! so that the store client and the controller agree on them.

pub mod labels;
pub mod references;
pub mod selector;
pub mod hardware;
pub mod template;
pub mod workflow;
pub mod bmc_job;
pub mod capi;
pub mod tinkerbell_cluster;
pub mod tinkerbell_machine;

pub use labels::*;
pub use references::*;
pub use selector::*;
pub use hardware::*;
pub use template::*;
pub use workflow::*;
pub use bmc_job::*;
pub use capi::*;
pub use tinkerbell_cluster::*;
pub use tinkerbell_machine::*;
