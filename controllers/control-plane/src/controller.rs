//! Main controller implementation.
//!
//! Wires the Kubernetes-backed collaborators into the reconciler and runs the
//! watcher next to the probe server.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconciler::{KubeStatusWriter, Reconciler};
use crate::server::{self, ProbeState};
use crate::watcher::Watcher;
use bootstrap_client::{ConfigMapInstaller, KubeSecretStore, MachineClient};
use crds::OpenShiftControlPlane;
use kube::api::ListParams;
use kube::{Api, Client};
use prometheus::Registry;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Control-plane controller process
pub struct Controller {
    watcher: JoinHandle<Result<(), ControllerError>>,
    probe_server: JoinHandle<Result<(), ControllerError>>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller").finish_non_exhaustive()
    }
}

impl Controller {
    /// Connect to the cluster and start the watcher and probe server
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing OpenShift control-plane controller");

        let client = Client::try_default().await?;

        let api: Api<OpenShiftControlPlane> = match config.watch_namespace.as_deref() {
            Some(namespace) => Api::namespaced(client.clone(), namespace),
            None => Api::all(client.clone()),
        };

        // Fail early when the CRD is not installed
        api.list(&ListParams::default().limit(1)).await.map_err(|e| {
            error!("OpenShiftControlPlane CRD is not available: {}", e);
            ControllerError::Kube(e)
        })?;

        let registry = Registry::new();
        let metrics = Metrics::new(&registry)?;
        let probe_state = ProbeState::new(registry);

        let reconciler = Arc::new(Reconciler::new(
            Arc::new(KubeSecretStore::new(client.clone())),
            Arc::new(MachineClient::new(client.clone())),
            Arc::new(ConfigMapInstaller::new(client.clone())),
            Arc::new(KubeStatusWriter::new(client)),
            config.clone(),
            metrics,
        ));

        let probe_server = {
            let state = probe_state.clone();
            let address = config.probe_bind_address;
            tokio::spawn(async move { server::serve(address, state).await })
        };

        let watcher = {
            let watcher = Watcher::new(reconciler, api);
            tokio::spawn(async move { watcher.watch_control_planes().await })
        };
        probe_state.set_ready(true);

        info!("Controller initialized");
        Ok(Self { watcher, probe_server })
    }

    /// Run until the watcher stops or the probe server fails
    pub async fn run(self) -> Result<(), ControllerError> {
        let Controller { watcher, probe_server } = self;

        tokio::select! {
            result = watcher => {
                flatten("watcher", result)
            }
            result = probe_server => {
                flatten("probe server", result)
            }
        }
    }
}

fn flatten(
    task: &str,
    result: Result<Result<(), ControllerError>, tokio::task::JoinError>,
) -> Result<(), ControllerError> {
    match result {
        Ok(Ok(())) => {
            info!("{} stopped", task);
            Ok(())
        }
        Ok(Err(e)) => {
            error!("{} failed: {}", task, e);
            Err(e)
        }
        Err(e) => {
            error!("{} task panicked: {}", task, e);
            Err(ControllerError::Watch(format!("{task} task aborted: {e}")))
        }
    }
}
