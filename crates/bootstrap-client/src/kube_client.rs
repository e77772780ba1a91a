//! Kubernetes-backed implementations of the bootstrap traits
//!
//! - [`KubeSecretStore`] reads core `Secret` objects.
//! - [`MachineClient`] manages Cluster API `Machine` objects
//!   (`cluster.x-k8s.io/v1beta1`) through the dynamic API.
//! - [`ConfigMapInstaller`] hands inputs to the installer job via a secret and
//!   reads completion from the installer's bootstrap ConfigMap.

use crate::bootstrap_trait::{InfrastructureProvider, Installer, SecretStore};
use crate::error::BootstrapClientError;
use crate::models::*;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, ObjectMeta, Patch,
    PatchParams,
};
use kube::Client;
use kube::core::Selector;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "openshift-control-plane";

/// Key of the installer's bootstrap ConfigMap that reports progress
pub const BOOTSTRAP_STATUS_KEY: &str = "status";

/// Value of [`BOOTSTRAP_STATUS_KEY`] once bootstrap is done
pub const BOOTSTRAP_STATUS_COMPLETE: &str = "complete";

/// Key holding the manifests (JSON map of path to contents) in the inputs secret
pub const MANIFESTS_KEY: &str = "manifests.json";

fn secret_data(secret: Secret) -> SecretData {
    secret
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, v.0))
        .collect()
}

/// Secret store backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl std::fmt::Debug for KubeSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSecretStore").finish_non_exhaustive()
    }
}

impl KubeSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl SecretStore for KubeSecretStore {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<SecretData>, BootstrapClientError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        debug!(namespace = %namespace, name = %name, "Fetching secret");
        Ok(api.get_opt(name).await?.map(secret_data))
    }

    async fn list_secrets(&self, namespace: &str, selector: &Selector) -> Result<Vec<NamedSecret>, BootstrapClientError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secrets = api.list(&ListParams::default().labels_from(selector)).await?;
        debug!(namespace = %namespace, %selector, count = secrets.items.len(), "Listed secrets");

        Ok(secrets
            .items
            .into_iter()
            .map(|secret| NamedSecret {
                name: secret.metadata.name.clone().unwrap_or_default(),
                labels: secret.metadata.labels.clone().unwrap_or_default(),
                data: secret_data(secret),
            })
            .collect())
    }
}

/// Infrastructure provider backed by Cluster API `Machine` objects
#[derive(Clone)]
pub struct MachineClient {
    client: Client,
    resource: ApiResource,
}

impl std::fmt::Debug for MachineClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineClient")
            .field("api_version", &self.resource.api_version)
            .finish_non_exhaustive()
    }
}

impl MachineClient {
    pub fn new(client: Client) -> Self {
        let gvk = GroupVersionKind::gvk("cluster.x-k8s.io", "v1beta1", "Machine");
        Self {
            client,
            resource: ApiResource::from_gvk(&gvk),
        }
    }

    fn api(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.resource)
    }

    /// Build the Machine object for one member of the request
    pub fn machine_object(&self, request: &MachineSetRequest, role: MachineRole, name: &str) -> serde_json::Value {
        let template = &request.template;

        let mut labels = template.metadata.labels.clone();
        labels.insert(CLUSTER_NAME_LABEL.to_string(), request.cluster.clone());
        labels.insert(CONTROL_PLANE_LABEL.to_string(), String::new());
        labels.insert(MACHINE_ROLE_LABEL.to_string(), role.as_str().to_string());

        let mut spec = json!({
            "clusterName": request.cluster,
            "bootstrap": { "dataSecretName": request.boot_config.secret_name },
            "infrastructureRef": {
                "apiVersion": template.infrastructure_ref.api_version,
                "kind": template.infrastructure_ref.kind,
                "name": template.infrastructure_ref.name,
                "namespace": template.infrastructure_ref.namespace,
            },
        });

        for (key, value) in [
            ("nodeDrainTimeout", &template.node_drain_timeout),
            ("nodeVolumeDetachTimeout", &template.node_volume_detach_timeout),
            ("nodeDeletionTimeout", &template.node_deletion_timeout),
        ] {
            if let Some(value) = value {
                spec[key] = json!(value);
            }
        }

        json!({
            "apiVersion": self.resource.api_version,
            "kind": self.resource.kind,
            "metadata": {
                "name": name,
                "namespace": request.namespace,
                "labels": labels,
                "annotations": template.metadata.annotations,
            },
            "spec": spec,
        })
    }

    fn role_query(cluster: &str, role: MachineRole) -> String {
        format!("{CLUSTER_NAME_LABEL}={cluster},{MACHINE_ROLE_LABEL}={}", role.as_str())
    }
}

#[async_trait::async_trait]
impl InfrastructureProvider for MachineClient {
    async fn ensure_machines(&self, request: &MachineSetRequest) -> Result<(), BootstrapClientError> {
        let api = self.api(&request.namespace);

        for (role, name) in request.machine_names() {
            if api.get_opt(&name).await?.is_some() {
                debug!(namespace = %request.namespace, machine = %name, "Machine already exists");
                continue;
            }

            let machine = self.machine_object(request, role, &name);
            api.patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&machine))
                .await?;
            info!(namespace = %request.namespace, machine = %name, role = role.as_str(), "Created machine");
        }

        Ok(())
    }

    async fn control_plane_joined(&self, namespace: &str, cluster: &str) -> Result<bool, BootstrapClientError> {
        let machines = self
            .api(namespace)
            .list(&ListParams::default().labels(&Self::role_query(cluster, MachineRole::Master)))
            .await?;

        Ok(machines.items.iter().any(|machine| {
            machine
                .data
                .get("status")
                .and_then(|status| status.get("nodeRef"))
                .is_some_and(|node_ref| !node_ref.is_null())
        }))
    }

    async fn delete_bootstrap_machine(&self, namespace: &str, cluster: &str) -> Result<(), BootstrapClientError> {
        let api = self.api(namespace);
        let name = bootstrap_machine_name(cluster);

        if api.get_opt(&name).await?.is_none() {
            return Ok(());
        }

        api.delete(&name, &DeleteParams::background()).await?;
        info!(namespace = %namespace, machine = %name, "Requested bootstrap machine deletion");
        Ok(())
    }

    async fn bootstrap_machine_deleted(&self, namespace: &str, cluster: &str) -> Result<bool, BootstrapClientError> {
        let name = bootstrap_machine_name(cluster);
        Ok(self.api(namespace).get_opt(&name).await?.is_none())
    }
}

/// Installer integration through Kubernetes objects
///
/// Inputs are written to the secret `<cluster>-installer-inputs`; the
/// installer job publishes progress in the ConfigMap `<cluster>-bootstrap`.
#[derive(Clone)]
pub struct ConfigMapInstaller {
    client: Client,
}

impl std::fmt::Debug for ConfigMapInstaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigMapInstaller").finish_non_exhaustive()
    }
}

impl ConfigMapInstaller {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Name of the secret holding the installer inputs
    pub fn inputs_secret_name(cluster: &str) -> String {
        format!("{cluster}-installer-inputs")
    }

    /// Name of the ConfigMap the installer reports progress in
    pub fn bootstrap_config_map_name(cluster: &str) -> String {
        format!("{cluster}-bootstrap")
    }

    /// Render the inputs as secret data
    ///
    /// Manifest paths contain '/', which is not allowed in secret keys, so the
    /// manifests travel as one JSON document.
    pub fn inputs_secret_data(inputs: &InstallInputs) -> Result<BTreeMap<String, ByteString>, BootstrapClientError> {
        let mut data = BTreeMap::new();

        if let Some(config) = &inputs.install_config {
            data.insert(crds::INSTALL_CONFIG_KEY.to_string(), ByteString(config.clone()));
        }
        if let Some(state) = &inputs.install_state {
            data.insert(crds::INSTALL_STATE_KEY.to_string(), ByteString(state.clone()));
        }

        let manifests: BTreeMap<&str, &[u8]> = inputs
            .manifests
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
            .collect();
        data.insert(MANIFESTS_KEY.to_string(), ByteString(serde_json::to_vec(&manifests)?));

        Ok(data)
    }
}

#[async_trait::async_trait]
impl Installer for ConfigMapInstaller {
    async fn generate_boot_config(&self, inputs: &InstallInputs) -> Result<BootConfigRef, BootstrapClientError> {
        if inputs.install_config.is_none() && inputs.install_state.is_none() {
            return Err(BootstrapClientError::InvalidRequest(format!(
                "no install configuration or state for cluster {}",
                inputs.cluster
            )));
        }

        let name = Self::inputs_secret_name(&inputs.cluster);
        let mut labels = BTreeMap::new();
        labels.insert(CLUSTER_NAME_LABEL.to_string(), inputs.cluster.clone());

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(inputs.namespace.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            data: Some(Self::inputs_secret_data(inputs)?),
            ..Default::default()
        };

        let api: Api<Secret> = Api::namespaced(self.client.clone(), &inputs.namespace);
        api.patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&secret))
            .await?;
        debug!(namespace = %inputs.namespace, secret = %name, manifests = inputs.manifests.len(), "Applied installer inputs");

        Ok(BootConfigRef { secret_name: name })
    }

    async fn bootstrap_complete(&self, namespace: &str, cluster: &str) -> Result<bool, BootstrapClientError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let config_map = api.get_opt(&Self::bootstrap_config_map_name(cluster)).await?;

        Ok(config_map
            .and_then(|cm| cm.data)
            .and_then(|data| data.get(BOOTSTRAP_STATUS_KEY).cloned())
            .is_some_and(|status| status == BOOTSTRAP_STATUS_COMPLETE))
    }
}
