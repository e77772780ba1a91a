//! Bootstrap Clients
//!
//! Clients for the systems the OpenShift control-plane lifecycle depends on:
//! the secret store holding installer configuration and manifests, the
//! infrastructure provider that creates machines, and the installer that
//! renders boot configuration and reports bootstrap completion.
//!
//! Each is an async trait with a Kubernetes-backed implementation and, behind
//! the `test-util` feature, an in-memory mock.
//!
//! # Example
//!
//! ```no_run
//! use bootstrap_client::{KubeSecretStore, SecretStore};
//! use kube::core::Selector;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let secrets = KubeSecretStore::new(client);
//!
//! let install = secrets.get_secret("clusters", "demo-install").await?;
//! let selector: Selector = [("cluster", "demo")].into_iter().collect();
//! let manifests = secrets.list_secrets("clusters", &selector).await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod kube_client;
pub mod models;
#[path = "trait.rs"]
pub mod bootstrap_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use bootstrap_trait::{InfrastructureProvider, Installer, SecretStore};
pub use error::BootstrapClientError;
pub use kube_client::{ConfigMapInstaller, KubeSecretStore, MachineClient};
pub use models::*;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockInfrastructureProvider, MockInstaller, MockSecretStore};
