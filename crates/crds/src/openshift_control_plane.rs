//! OpenShiftControlPlane CRD
//!
//! Desired and observed state of an OpenShift cluster's control plane while the
//! cluster is being bootstrapped.

use crate::conditions::ConditionSet;
use crate::references::{InfrastructureReference, SecretReference};
use crate::validation::ValidationError;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use kube::core::Selector;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

/// Secret key holding the static install configuration
pub const INSTALL_CONFIG_KEY: &str = "install-config.yaml";

/// Secret key holding the installer's resumable state
pub const INSTALL_STATE_KEY: &str = ".openshift_install_state.json";

/// Path prefixes allowed for keys of manifest secrets
pub const MANIFEST_PATH_PREFIXES: [&str; 2] = ["manifests/", "openshift/"];

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.openshift.io",
    version = "v1alpha1",
    kind = "OpenShiftControlPlane",
    namespaced,
    status = "OpenShiftControlPlaneStatus",
    shortname = "ocp",
    printcolumn = r#"{"name":"Initialized","type":"boolean","jsonPath":".status.initialized"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OpenShiftControlPlaneSpec {
    /// Template for the bootstrap and control-plane machines.
    ///
    /// Immutable once accepted.
    #[schemars(schema_with = "immutable_machine_template")]
    pub machine_template: MachineTemplate,

    /// Secret in the same namespace holding `install-config.yaml` and/or
    /// `.openshift_install_state.json`
    pub install_state_secret_ref: SecretReference,

    /// Selects secrets whose keys (`manifests/...` or `openshift/...`) are
    /// injected into the generated boot configuration.
    ///
    /// Absent means installer defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifests_selector: Option<LabelSelector>,
}

impl OpenShiftControlPlaneSpec {
    /// Manifests selector as a label query
    ///
    /// `None` when the selector is absent or selects everything.
    pub fn manifests_label_selector(&self) -> Result<Option<Selector>, ValidationError> {
        let Some(selector) = &self.manifests_selector else {
            return Ok(None);
        };
        let selector = Selector::try_from(selector.clone()).map_err(|e| ValidationError::InvalidSelector {
            field: "spec.manifestsSelector".to_string(),
            reason: e.0,
        })?;
        Ok((!selector.selects_all()).then_some(selector))
    }
}

/// How to create the bootstrap and control-plane machines
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MachineTemplate {
    /// Labels and annotations applied to every created machine
    #[serde(default)]
    pub metadata: MachineMetadata,

    /// Infrastructure provider object used to create the machines
    pub infrastructure_ref: InfrastructureReference,

    /// Time the controller spends draining a node. Unset or zero means no limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_drain_timeout: Option<String>,

    /// Time the controller waits for volumes to detach. Unset or zero means no limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_volume_detach_timeout: Option<String>,

    /// Time the controller keeps retrying node deletion.
    /// Unset defers to the Machine default (10s).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_deletion_timeout: Option<String>,
}

/// Metadata subset applied to created machines
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MachineMetadata {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Schema for `spec.machineTemplate` with an API-server immutability rule
///
/// The rule is a plain `self == oldSelf` and is stricter than
/// [`crate::machine_templates_equivalent`]: it also rejects edits made before a
/// template is bound, and an unset drain or detach timeout replaced by `0s`.
/// The controller guard never sees edits the API server already refused.
fn immutable_machine_template(generator: &mut schemars::SchemaGenerator) -> schemars::Schema {
    let mut schema = <MachineTemplate as JsonSchema>::json_schema(generator);
    schema.insert(
        "x-kubernetes-validations".to_string(),
        json!([{
            "rule": "self == oldSelf",
            "message": "machineTemplate is immutable"
        }]),
    );
    schema
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenShiftControlPlaneStatus {
    /// Observations of the lifecycle, unique per type
    #[serde(default, skip_serializing_if = "ConditionSet::is_empty")]
    pub conditions: ConditionSet,

    /// True once the first control-plane machine joined the bootstrap cluster.
    /// Never reset.
    #[serde(default)]
    pub(crate) initialized: bool,

    /// True once bootstrap completed and the bootstrap machine was removed.
    /// Never reset.
    #[serde(default)]
    pub(crate) ready: bool,

    /// Machine template accepted when the template was bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_machine_template: Option<MachineTemplate>,
}

impl OpenShiftControlPlaneStatus {
    pub fn initialized(&self) -> bool {
        self.initialized
    }

    pub fn ready(&self) -> bool {
        self.ready
    }

    /// Record the accepted machine template; a no-op when one is already bound
    pub fn bind_machine_template(&mut self, template: &MachineTemplate) -> bool {
        if self.bound_machine_template.is_some() {
            return false;
        }
        self.bound_machine_template = Some(template.clone());
        true
    }
}
