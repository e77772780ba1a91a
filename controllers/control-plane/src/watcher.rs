//! Kubernetes resource watcher.
//!
//! Runs the `kube_runtime::Controller` loop for OpenShiftControlPlane
//! resources. The controller handles reconnection, and requeues come from the
//! `Action` each reconcile returns.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crds::OpenShiftControlPlane;
use futures::StreamExt;
use kube::Api;
use kube_runtime::{
    Controller, watcher,
    controller::{Action, Config as RuntimeConfig},
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Events for the same object within this window are folded into one pass
const DEBOUNCE: Duration = Duration::from_secs(5);

/// Maximum number of control planes reconciled at once
const CONCURRENCY: u16 = 3;

/// Watches OpenShiftControlPlane resources and drives reconciliation
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    api: Api<OpenShiftControlPlane>,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("reconciler", &self.reconciler)
            .finish_non_exhaustive()
    }
}

impl Watcher {
    pub fn new(reconciler: Arc<Reconciler>, api: Api<OpenShiftControlPlane>) -> Self {
        Self { reconciler, api }
    }

    /// Run until the process receives a shutdown signal
    pub async fn watch_control_planes(&self) -> Result<(), ControllerError> {
        info!("Starting OpenShiftControlPlane watcher");

        let reconcile = |ocp: Arc<OpenShiftControlPlane>, ctx: Arc<Reconciler>| async move {
            ctx.reconcile(&ocp).await
        };

        let error_policy = |ocp: Arc<OpenShiftControlPlane>, error: &ControllerError, ctx: Arc<Reconciler>| -> Action {
            ctx.error_action(&ocp, error)
        };

        let config = RuntimeConfig::default().debounce(DEBOUNCE).concurrency(CONCURRENCY);

        Controller::new(self.api.clone(), watcher::Config::default())
            .with_config(config)
            .shutdown_on_signal()
            .run(reconcile, error_policy, Arc::clone(&self.reconciler))
            .for_each(|res| async move {
                match res {
                    Ok((object, _)) => debug!(name = %object.name, namespace = ?object.namespace, "Reconciled"),
                    Err(e) => error!("Controller error for OpenShiftControlPlane: {}", e),
                }
            })
            .await;

        info!("OpenShiftControlPlane watcher stopped");
        Ok(())
    }
}
