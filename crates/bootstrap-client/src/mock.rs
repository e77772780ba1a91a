//! In-memory mocks for unit testing
//!
//! These implement the bootstrap traits without a running cluster. State can be
//! set up and flipped between reconcile passes, and call counters let tests
//! assert that repeated passes do not repeat side effects.

use crate::bootstrap_trait::{InfrastructureProvider, Installer, SecretStore};
use crate::error::BootstrapClientError;
use crate::models::*;
use kube::core::{Selector, SelectorExt};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Optional artificial latency, used to exercise call timeouts
#[derive(Debug, Clone, Default)]
struct Latency(Arc<Mutex<Option<Duration>>>);

impl Latency {
    fn set(&self, delay: Option<Duration>) {
        *lock(&self.0) = delay;
    }

    async fn wait(&self) {
        let delay = *lock(&self.0);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Mock secret store keyed by (namespace, name)
#[derive(Debug, Clone, Default)]
pub struct MockSecretStore {
    secrets: Arc<Mutex<HashMap<(String, String), NamedSecret>>>,
    latency: Latency,
    unavailable: Arc<AtomicBool>,
    get_calls: Arc<AtomicUsize>,
    list_calls: Arc<AtomicUsize>,
}

impl MockSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a secret (for test setup)
    pub fn add_secret<I, K, V>(&self, namespace: &str, name: &str, labels: BTreeMap<String, String>, data: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Vec<u8>>,
    {
        let secret = NamedSecret {
            name: name.to_string(),
            labels,
            data: data.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        };
        lock(&self.secrets).insert((namespace.to_string(), name.to_string()), secret);
    }

    pub fn remove_secret(&self, namespace: &str, name: &str) {
        lock(&self.secrets).remove(&(namespace.to_string(), name.to_string()));
    }

    /// Delay every call by `delay`
    pub fn set_latency(&self, delay: Option<Duration>) {
        self.latency.set(delay);
    }

    /// Make every call fail as if the API server were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), BootstrapClientError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BootstrapClientError::Api("secret store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl SecretStore for MockSecretStore {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<SecretData>, BootstrapClientError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.latency.wait().await;
        self.check_available()?;
        Ok(lock(&self.secrets)
            .get(&(namespace.to_string(), name.to_string()))
            .map(|s| s.data.clone()))
    }

    async fn list_secrets(&self, namespace: &str, selector: &Selector) -> Result<Vec<NamedSecret>, BootstrapClientError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.latency.wait().await;
        self.check_available()?;
        let mut found: Vec<NamedSecret> = lock(&self.secrets)
            .iter()
            .filter(|((ns, _), secret)| ns == namespace && selector.matches(&secret.labels))
            .map(|(_, secret)| secret.clone())
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }
}

/// Mock infrastructure provider
///
/// Machines are recorded per (namespace, name). Joining and deletion are
/// driven by the test through [`MockInfrastructureProvider::set_control_plane_joined`]
/// and [`MockInfrastructureProvider::complete_bootstrap_deletion`].
#[derive(Debug, Clone, Default)]
pub struct MockInfrastructureProvider {
    machines: Arc<Mutex<HashMap<(String, String), (MachineRole, MachineSetRequest)>>>,
    joined: Arc<Mutex<HashSet<(String, String)>>>,
    deletion_requested: Arc<Mutex<HashSet<(String, String)>>>,
    hold_deletion: Arc<AtomicBool>,
    latency: Latency,
    ensure_calls: Arc<AtomicUsize>,
    created: Arc<AtomicUsize>,
    delete_calls: Arc<AtomicUsize>,
}

impl MockInfrastructureProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report whether a control-plane machine of the cluster has joined
    pub fn set_control_plane_joined(&self, namespace: &str, cluster: &str, joined: bool) {
        let key = (namespace.to_string(), cluster.to_string());
        if joined {
            lock(&self.joined).insert(key);
        } else {
            lock(&self.joined).remove(&key);
        }
    }

    /// Keep the bootstrap machine around after deletion was requested, as a
    /// provider with finalizers would
    pub fn hold_bootstrap_deletion(&self, hold: bool) {
        self.hold_deletion.store(hold, Ordering::SeqCst);
    }

    /// Finish a held deletion of the bootstrap machine
    pub fn complete_bootstrap_deletion(&self, namespace: &str, cluster: &str) {
        lock(&self.machines).remove(&(namespace.to_string(), bootstrap_machine_name(cluster)));
    }

    pub fn set_latency(&self, delay: Option<Duration>) {
        self.latency.set(delay);
    }

    /// Names of the machines that currently exist, sorted
    pub fn machine_names(&self, namespace: &str) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.machines)
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// The request a machine was created from
    pub fn machine_request(&self, namespace: &str, name: &str) -> Option<MachineSetRequest> {
        lock(&self.machines)
            .get(&(namespace.to_string(), name.to_string()))
            .map(|(_, request)| request.clone())
    }

    pub fn ensure_calls(&self) -> usize {
        self.ensure_calls.load(Ordering::SeqCst)
    }

    /// Number of machines ever created
    pub fn machines_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn deletion_requested(&self, namespace: &str, cluster: &str) -> bool {
        lock(&self.deletion_requested).contains(&(namespace.to_string(), cluster.to_string()))
    }
}

#[async_trait::async_trait]
impl InfrastructureProvider for MockInfrastructureProvider {
    async fn ensure_machines(&self, request: &MachineSetRequest) -> Result<(), BootstrapClientError> {
        self.ensure_calls.fetch_add(1, Ordering::SeqCst);
        self.latency.wait().await;

        if request.boot_config.secret_name.is_empty() {
            return Err(BootstrapClientError::InvalidRequest("boot configuration is required".to_string()));
        }

        // A deleted bootstrap machine is never recreated
        let bootstrap_gone = self.deletion_requested(&request.namespace, &request.cluster);

        let mut machines = lock(&self.machines);
        for (role, name) in request.machine_names() {
            if role == MachineRole::Bootstrap && bootstrap_gone {
                continue;
            }
            let key = (request.namespace.clone(), name);
            if !machines.contains_key(&key) {
                machines.insert(key, (role, request.clone()));
                self.created.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    async fn control_plane_joined(&self, namespace: &str, cluster: &str) -> Result<bool, BootstrapClientError> {
        self.latency.wait().await;
        Ok(lock(&self.joined).contains(&(namespace.to_string(), cluster.to_string())))
    }

    async fn delete_bootstrap_machine(&self, namespace: &str, cluster: &str) -> Result<(), BootstrapClientError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.latency.wait().await;
        lock(&self.deletion_requested).insert((namespace.to_string(), cluster.to_string()));
        if !self.hold_deletion.load(Ordering::SeqCst) {
            self.complete_bootstrap_deletion(namespace, cluster);
        }
        Ok(())
    }

    async fn bootstrap_machine_deleted(&self, namespace: &str, cluster: &str) -> Result<bool, BootstrapClientError> {
        self.latency.wait().await;
        Ok(!lock(&self.machines).contains_key(&(namespace.to_string(), bootstrap_machine_name(cluster))))
    }
}

/// Mock installer
#[derive(Debug, Clone, Default)]
pub struct MockInstaller {
    inputs: Arc<Mutex<HashMap<(String, String), InstallInputs>>>,
    complete: Arc<Mutex<HashSet<(String, String)>>>,
    latency: Latency,
    generate_calls: Arc<AtomicUsize>,
}

impl MockInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report whether the installer finished bootstrapping the cluster
    pub fn set_bootstrap_complete(&self, namespace: &str, cluster: &str, complete: bool) {
        let key = (namespace.to_string(), cluster.to_string());
        if complete {
            lock(&self.complete).insert(key);
        } else {
            lock(&self.complete).remove(&key);
        }
    }

    pub fn set_latency(&self, delay: Option<Duration>) {
        self.latency.set(delay);
    }

    /// Inputs last handed to the installer for a cluster
    pub fn inputs(&self, namespace: &str, cluster: &str) -> Option<InstallInputs> {
        lock(&self.inputs)
            .get(&(namespace.to_string(), cluster.to_string()))
            .cloned()
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Installer for MockInstaller {
    async fn generate_boot_config(&self, inputs: &InstallInputs) -> Result<BootConfigRef, BootstrapClientError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.latency.wait().await;

        if inputs.install_config.is_none() && inputs.install_state.is_none() {
            return Err(BootstrapClientError::InvalidRequest(format!(
                "no install configuration or state for cluster {}",
                inputs.cluster
            )));
        }

        lock(&self.inputs).insert((inputs.namespace.clone(), inputs.cluster.clone()), inputs.clone());
        Ok(BootConfigRef {
            secret_name: format!("{}-installer-inputs", inputs.cluster),
        })
    }

    async fn bootstrap_complete(&self, namespace: &str, cluster: &str) -> Result<bool, BootstrapClientError> {
        self.latency.wait().await;
        Ok(lock(&self.complete).contains(&(namespace.to_string(), cluster.to_string())))
    }
}
