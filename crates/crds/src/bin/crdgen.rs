//! Prints the provider CRDs as a multi-document YAML stream.
//!
//! Tinkerbell, Rufio and Cluster API CRDs are installed by their own
//! projects and are not emitted here.

use crds::{TinkerbellCluster, TinkerbellMachine};
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    let crds = [TinkerbellCluster::crd(), TinkerbellMachine::crd()];
    for crd in crds {
        println!("---");
        print!("{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
