//! Test utilities for reconciler tests
//!
//! The harness wires the in-memory bootstrap mocks into a `Reconciler` and
//! feeds every written status back into the resource, the way the API server
//! would between passes.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::lifecycle::LifecyclePhase;
use crate::metrics::Metrics;
use crate::reconciler::{Reconciler, StatusWriter};
use crate::reporter::ConditionType;
use bootstrap_client::{MockInfrastructureProvider, MockInstaller, MockSecretStore};
use crds::*;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube_runtime::controller::Action;
use prometheus::Registry;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const NAMESPACE: &str = "clusters";
pub const NAME: &str = "demo";
pub const INSTALL_SECRET: &str = "demo-install";

/// Status writer that keeps every write in memory
#[derive(Debug, Default)]
pub struct RecordingStatusWriter {
    writes: Mutex<Vec<(String, String, OpenShiftControlPlaneStatus)>>,
    fail: Mutex<bool>,
}

impl RecordingStatusWriter {
    pub fn writes(&self) -> usize {
        self.writes.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<OpenShiftControlPlaneStatus> {
        self.writes.lock().unwrap().last().map(|(_, _, status)| status.clone())
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }
}

#[async_trait::async_trait]
impl StatusWriter for RecordingStatusWriter {
    async fn write_status(
        &self,
        namespace: &str,
        name: &str,
        status: &OpenShiftControlPlaneStatus,
    ) -> Result<(), ControllerError> {
        if *self.fail.lock().unwrap() {
            return Err(ControllerError::DependencyUnavailable("status write rejected".to_string()));
        }
        self.writes
            .lock()
            .unwrap()
            .push((namespace.to_string(), name.to_string(), status.clone()));
        Ok(())
    }
}

pub fn machine_template(infrastructure_name: &str) -> MachineTemplate {
    MachineTemplate {
        metadata: MachineMetadata {
            labels: BTreeMap::from([("cluster.x-k8s.io/cluster-name".to_string(), NAME.to_string())]),
            annotations: BTreeMap::new(),
        },
        infrastructure_ref: InfrastructureReference::new(
            "infrastructure.cluster.x-k8s.io/v1beta1",
            "AWSMachineTemplate",
            NAMESPACE,
            infrastructure_name,
        ),
        node_drain_timeout: None,
        node_volume_detach_timeout: None,
        node_deletion_timeout: None,
    }
}

pub fn create_test_control_plane(template: MachineTemplate, manifests: Option<LabelSelector>) -> OpenShiftControlPlane {
    OpenShiftControlPlane {
        metadata: ObjectMeta {
            name: Some(NAME.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            generation: Some(1),
            ..Default::default()
        },
        spec: OpenShiftControlPlaneSpec {
            machine_template: template,
            install_state_secret_ref: SecretReference::new(INSTALL_SECRET),
            manifests_selector: manifests,
        },
        status: None,
    }
}

pub fn manifests_selector() -> LabelSelector {
    LabelSelector {
        match_labels: Some(manifest_labels()),
        ..Default::default()
    }
}

pub fn manifest_labels() -> BTreeMap<String, String> {
    BTreeMap::from([("cluster".to_string(), NAME.to_string())])
}

pub fn test_config() -> ControllerConfig {
    ControllerConfig {
        secret_lookup_timeout: Duration::from_secs(1),
        machine_poll_timeout: Duration::from_secs(2),
        installer_timeout: Duration::from_secs(3),
        signal_poll_interval: Duration::from_secs(15),
        control_plane_replicas: 3,
        ..ControllerConfig::default()
    }
}

/// Mocks, reconciler and the resource under test
pub struct Harness {
    pub secrets: MockSecretStore,
    pub infrastructure: MockInfrastructureProvider,
    pub installer: MockInstaller,
    pub writer: Arc<RecordingStatusWriter>,
    pub registry: Registry,
    pub reconciler: Reconciler,
    pub ocp: OpenShiftControlPlane,
}

impl Harness {
    pub fn new(ocp: OpenShiftControlPlane) -> Self {
        let secrets = MockSecretStore::new();
        let infrastructure = MockInfrastructureProvider::new();
        let installer = MockInstaller::new();
        let writer = Arc::new(RecordingStatusWriter::default());
        let registry = Registry::new();
        let reconciler = Reconciler::new(
            Arc::new(secrets.clone()),
            Arc::new(infrastructure.clone()),
            Arc::new(installer.clone()),
            Arc::clone(&writer) as Arc<dyn StatusWriter>,
            test_config(),
            Metrics::new(&registry).unwrap(),
        );

        Self {
            secrets,
            infrastructure,
            installer,
            writer,
            registry,
            reconciler,
            ocp,
        }
    }

    /// Harness with an install-state secret holding only `install-config.yaml`
    pub fn with_install_config(ocp: OpenShiftControlPlane) -> Self {
        let harness = Self::new(ocp);
        harness.add_install_secret([(INSTALL_CONFIG_KEY, "apiVersion: v1\nmetadata:\n  name: demo\n")]);
        harness
    }

    pub fn add_install_secret<const N: usize>(&self, data: [(&str, &str); N]) {
        self.secrets.add_secret(NAMESPACE, INSTALL_SECRET, BTreeMap::new(), data);
    }

    /// Run one pass and persist what it wrote
    pub async fn pass(&mut self) -> Action {
        let action = self.reconciler.reconcile(&self.ocp).await.unwrap();
        if let Some(status) = self.writer.last() {
            self.ocp.status = Some(status);
        }
        action
    }

    /// Replace the spec as a user edit would
    pub fn edit_spec(&mut self, edit: impl FnOnce(&mut OpenShiftControlPlaneSpec)) {
        edit(&mut self.ocp.spec);
        self.ocp.metadata.generation = self.ocp.metadata.generation.map(|g| g + 1);
    }

    pub fn status(&self) -> OpenShiftControlPlaneStatus {
        self.ocp.status.clone().unwrap_or_default()
    }

    pub fn condition(&self, condition_type: ConditionType) -> Option<Condition> {
        self.ocp
            .status
            .as_ref()
            .and_then(|s| s.conditions.get(condition_type.as_str()).cloned())
    }

    pub fn phase(&self) -> LifecyclePhase {
        LifecyclePhase::observe(self.ocp.status.as_ref())
    }

    /// Signal the control-plane join
    pub fn join_control_plane(&self) {
        self.infrastructure.set_control_plane_joined(NAMESPACE, NAME, true);
    }

    /// Signal bootstrap completion from the installer
    pub fn complete_bootstrap(&self) {
        self.installer.set_bootstrap_complete(NAMESPACE, NAME, true);
    }
}
