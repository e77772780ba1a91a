//! Object references used by the OpenShiftControlPlane spec
//!
//! Both references are subsets of the upstream Kubernetes reference types,
//! trimmed to the fields the bootstrap lifecycle consumes.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to a custom resource offered by an infrastructure provider
///
/// This is a subset of `corev1.ObjectReference`. The namespace must be the same
/// as the OpenShiftControlPlane's namespace; Cluster API still requires it to
/// be spelled out.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureReference {
    /// Kind of the referent (e.g., "AWSMachineTemplate")
    pub kind: String,

    /// Namespace of the referent
    pub namespace: String,

    /// Name of the referent
    pub name: String,

    /// API version of the referent (e.g., "infrastructure.cluster.x-k8s.io/v1beta2")
    pub api_version: String,
}

impl InfrastructureReference {
    /// Create a new reference
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
            api_version: api_version.into(),
        }
    }
}

/// Name-only reference to a secret in the same namespace as the OpenShiftControlPlane
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    /// Name of the secret.
    ///
    /// At most 253 characters, a valid DNS subdomain: lowercase alphanumeric
    /// characters, '-' or '.', starting and ending with an alphanumeric character.
    #[schemars(length(max = 253), extend("pattern" = r"^[a-z0-9]([-.a-z0-9]{0,251}[a-z0-9])?$"))]
    pub name: String,
}

impl SecretReference {
    /// Create a reference to the named secret
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}
