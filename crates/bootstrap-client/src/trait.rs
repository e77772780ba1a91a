//! Traits for the external collaborators of the bootstrap lifecycle
//!
//! The Kubernetes-backed clients implement these traits, and tests use the
//! in-memory mocks behind the `test-util` feature.
//! All async methods must be `Send` to work with Tokio's work-stealing runtime.

use crate::error::BootstrapClientError;
use crate::models::*;
use kube::core::Selector;

/// Read-only secret lookup
#[async_trait::async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch a secret's data; `None` if the secret does not exist
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<SecretData>, BootstrapClientError>;

    /// List secrets whose labels match the selector
    async fn list_secrets(&self, namespace: &str, selector: &Selector) -> Result<Vec<NamedSecret>, BootstrapClientError>;
}

/// Creates, observes and tears down machines for a cluster
#[async_trait::async_trait]
pub trait InfrastructureProvider: Send + Sync {
    /// Create the bootstrap machine and the control-plane machines.
    ///
    /// Machines that already exist are left alone.
    async fn ensure_machines(&self, request: &MachineSetRequest) -> Result<(), BootstrapClientError>;

    /// True once at least one control-plane machine has joined the bootstrap cluster
    async fn control_plane_joined(&self, namespace: &str, cluster: &str) -> Result<bool, BootstrapClientError>;

    /// Request deletion of the bootstrap machine; succeeds if it is already gone
    async fn delete_bootstrap_machine(&self, namespace: &str, cluster: &str) -> Result<(), BootstrapClientError>;

    /// True once the bootstrap machine no longer exists
    async fn bootstrap_machine_deleted(&self, namespace: &str, cluster: &str) -> Result<bool, BootstrapClientError>;
}

/// Renders boot configuration and reports bootstrap completion
#[async_trait::async_trait]
pub trait Installer: Send + Sync {
    /// Hand the inputs to the installer; repeated calls with the same inputs
    /// return the same reference
    async fn generate_boot_config(&self, inputs: &InstallInputs) -> Result<BootConfigRef, BootstrapClientError>;

    /// True once the installer reports the bootstrap finished
    async fn bootstrap_complete(&self, namespace: &str, cluster: &str) -> Result<bool, BootstrapClientError>;
}
