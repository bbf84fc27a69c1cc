//! Main controller implementation.
//!
//! Wires the Kubernetes client, the object store, the event recorder and
//! the reconciler together, then runs one watcher per provider kind:
//! - TinkerbellMachine: hardware selection and workflow-driven provisioning
//! - TinkerbellCluster: control-plane endpoint reservation

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::events::KubeEventPublisher;
use crate::reconciler::Reconciler;
use crate::watcher::Watcher;
use kube::Client;
use std::sync::Arc;
use store_client::KubeStoreClient;
use tokio::task::JoinHandle;
use tracing::info;

/// Main controller for the Tinkerbell infrastructure provider.
#[derive(Debug)]
pub struct Controller {
    machine_watcher: JoinHandle<Result<(), ControllerError>>,
    cluster_watcher: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts its watchers.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing Tinkerbell infrastructure provider");

        let kube_client = Client::try_default().await?;

        let store = KubeStoreClient::new(kube_client.clone());
        let events = Arc::new(KubeEventPublisher::new(kube_client.clone()));
        let watcher = Arc::new(Watcher::new(
            Arc::new(Reconciler::new(Box::new(store), events, config.clone())),
            kube_client,
            &config,
        ));

        let machine_watcher = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.watch_tinkerbell_machines().await })
        };
        let cluster_watcher = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.watch_tinkerbell_clusters().await })
        };

        Ok(Self {
            machine_watcher,
            cluster_watcher,
        })
    }

    /// Runs until one of the watchers exits.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Tinkerbell infrastructure provider running");

        // Watchers run forever; any exit is fatal
        tokio::select! {
            result = &mut self.machine_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("TinkerbellMachine watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("TinkerbellMachine watcher error: {}", e)))?;
            }
            result = &mut self.cluster_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("TinkerbellCluster watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("TinkerbellCluster watcher error: {}", e)))?;
            }
        }

        Err(ControllerError::Watch("watcher exited unexpectedly".to_string()))
    }
}
