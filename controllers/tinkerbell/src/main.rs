//! Tinkerbell infrastructure provider
//!
//! Cluster API infrastructure provider for bare metal managed by Tinkerbell:
//! - TinkerbellCluster: reserves a hardware unit for the control-plane endpoint
//! - TinkerbellMachine: claims hardware, renders a provisioning template and
//!   runs a Tinkerbell workflow until the node is provisioned

mod backoff;
mod config;
mod controller;
mod error;
mod events;
mod reconciler;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("rustls crypto provider already installed");
    }

    info!("Starting Tinkerbell infrastructure provider");

    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!("  Namespace: {}", config.watch_namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Tinkerbell IP: {}", config.tinkerbell_ip.as_deref().unwrap_or("unset"));
    info!("  Image registry: {}", config.image_lookup.base_registry);
    info!("  Concurrency: {}", config.reconcile_concurrency);
    info!("  Workflow poll interval: {:?}", config.workflow_poll);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
