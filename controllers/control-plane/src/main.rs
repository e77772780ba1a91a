//! OpenShift Control Plane Controller
//!
//! Drives OpenShiftControlPlane resources through the bootstrap lifecycle:
//! - binds the machine template and reads the installer state secret
//! - hands install config and manifests to the installer
//! - creates the bootstrap and control-plane machines
//! - latches `initialized` when a control-plane machine joins, and `ready`
//!   once the installer finished and the bootstrap machine is gone

mod backoff;
mod config;
mod controller;
mod error;
mod lifecycle;
mod metrics;
mod reconciler;
#[cfg(test)]
mod reconciler_test;
mod reporter;
mod server;
#[cfg(test)]
mod test_utils;
mod watcher;

use config::ControllerConfig;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube and rustls both pull in crypto backends; pick one before any TLS client exists
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        info!("rustls crypto provider already installed");
    }

    info!("Starting OpenShift Control Plane Controller");

    let config = ControllerConfig::from_env()?;
    info!("Configuration:");
    info!("  Namespace: {}", config.watch_namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Control-plane replicas: {}", config.control_plane_replicas);
    info!("  Signal poll interval: {:?}", config.signal_poll_interval);
    info!("  Probe address: {}", config.probe_bind_address);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
