//! Structural validation of the OpenShiftControlPlane spec and the secrets it references

use crate::duration::parse_duration;
use crate::openshift_control_plane::{
    INSTALL_CONFIG_KEY, INSTALL_STATE_KEY, MANIFEST_PATH_PREFIXES, MachineTemplate,
    OpenShiftControlPlaneSpec,
};
use std::collections::BTreeMap;
use thiserror::Error;

/// Maximum length of a DNS subdomain name
pub const MAX_SECRET_NAME_LENGTH: usize = 253;

/// A single validation failure: the offending field and the violated rule
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} is required")]
    Required { field: String },

    #[error("{field} must be at most {max} characters, got {actual}")]
    TooLong {
        field: String,
        max: usize,
        actual: usize,
    },

    #[error("{field} {rule}: {value:?}")]
    InvalidFormat {
        field: String,
        rule: &'static str,
        value: String,
    },

    #[error("{field} must be in namespace {expected}, got {actual}")]
    NamespaceMismatch {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("{field} is not a valid duration {value:?}: {reason}")]
    InvalidDuration {
        field: String,
        value: String,
        reason: String,
    },

    #[error("{field} is not a valid label selector: {reason}")]
    InvalidSelector { field: String, reason: String },

    #[error("secret {secret} contains neither install-config.yaml nor .openshift_install_state.json")]
    MissingInstallState { secret: String },

    #[error("secret {secret} key {key:?} must start with manifests/ or openshift/")]
    InvalidManifestPath { secret: String, key: String },

    #[error("{field} is immutable")]
    Immutable { field: String },
}

impl ValidationError {
    /// Field path the error refers to
    pub fn field(&self) -> &str {
        match self {
            ValidationError::Required { field }
            | ValidationError::TooLong { field, .. }
            | ValidationError::InvalidFormat { field, .. }
            | ValidationError::NamespaceMismatch { field, .. }
            | ValidationError::InvalidDuration { field, .. }
            | ValidationError::InvalidSelector { field, .. }
            | ValidationError::Immutable { field } => field,
            ValidationError::MissingInstallState { .. } => "spec.installStateSecretRef",
            ValidationError::InvalidManifestPath { .. } => "spec.manifestsSelector",
        }
    }
}

/// Every violation found in one validation run
#[derive(Error, Debug, Clone, PartialEq, Eq, Default)]
#[error("{}", join_messages(.0))]
pub struct ValidationErrors(pub Vec<ValidationError>);

fn join_messages(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }

    /// `Ok(())` if nothing was collected
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl From<ValidationError> for ValidationErrors {
    fn from(error: ValidationError) -> Self {
        ValidationErrors(vec![error])
    }
}

/// Check a secret name is a DNS subdomain: at most 253 characters of lowercase
/// alphanumerics, '-' or '.', starting and ending with an alphanumeric
pub fn validate_secret_name(field: &str, name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if name.len() > MAX_SECRET_NAME_LENGTH {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_SECRET_NAME_LENGTH,
            actual: name.len(),
        });
    }

    let invalid = |rule| ValidationError::InvalidFormat {
        field: field.to_string(),
        rule,
        value: name.to_string(),
    };

    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return Err(invalid("must consist of lowercase alphanumeric characters, '-' or '.'"));
    }

    let alphanumeric = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    if !name.starts_with(alphanumeric) || !name.ends_with(alphanumeric) {
        return Err(invalid("must start and end with an alphanumeric character"));
    }

    Ok(())
}

/// Validate a spec in the context of the namespace it lives in, collecting
/// every violation
pub fn validate_spec(
    spec: &OpenShiftControlPlaneSpec,
    namespace: &str,
) -> Result<(), ValidationErrors> {
    let mut errors = Vec::new();

    if let Err(e) = validate_secret_name("spec.installStateSecretRef.name", &spec.install_state_secret_ref.name) {
        errors.push(e);
    }

    errors.extend(validate_machine_template(&spec.machine_template, namespace));

    if let Err(e) = spec.manifests_label_selector() {
        errors.push(e);
    }

    ValidationErrors(errors).into_result()
}

fn validate_machine_template(template: &MachineTemplate, namespace: &str) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let infra = &template.infrastructure_ref;

    for (field, value) in [
        ("spec.machineTemplate.infrastructureRef.kind", &infra.kind),
        ("spec.machineTemplate.infrastructureRef.name", &infra.name),
        ("spec.machineTemplate.infrastructureRef.apiVersion", &infra.api_version),
        ("spec.machineTemplate.infrastructureRef.namespace", &infra.namespace),
    ] {
        if value.is_empty() {
            errors.push(ValidationError::Required {
                field: field.to_string(),
            });
        }
    }

    if !infra.namespace.is_empty() && infra.namespace != namespace {
        errors.push(ValidationError::NamespaceMismatch {
            field: "spec.machineTemplate.infrastructureRef.namespace".to_string(),
            expected: namespace.to_string(),
            actual: infra.namespace.clone(),
        });
    }

    for (field, value) in [
        ("spec.machineTemplate.nodeDrainTimeout", &template.node_drain_timeout),
        ("spec.machineTemplate.nodeVolumeDetachTimeout", &template.node_volume_detach_timeout),
        ("spec.machineTemplate.nodeDeletionTimeout", &template.node_deletion_timeout),
    ] {
        let Some(value) = value else { continue };
        if let Err(e) = parse_duration(value) {
            errors.push(ValidationError::InvalidDuration {
                field: field.to_string(),
                value: value.clone(),
                reason: e.to_string(),
            });
        }
    }

    errors
}

/// Check every key of a manifest secret is a path under an allowed prefix
///
/// Malformed keys are reported, never skipped.
pub fn validate_manifest_keys<'a>(
    secret: &str,
    keys: impl IntoIterator<Item = &'a str>,
) -> Result<(), ValidationErrors> {
    let errors = keys
        .into_iter()
        .filter(|key| !is_manifest_path(key))
        .map(|key| ValidationError::InvalidManifestPath {
            secret: secret.to_string(),
            key: key.to_string(),
        })
        .collect();

    ValidationErrors(errors).into_result()
}

fn is_manifest_path(key: &str) -> bool {
    MANIFEST_PATH_PREFIXES
        .iter()
        .any(|prefix| key.len() > prefix.len() && key.starts_with(prefix))
}

/// Which recognized payload the installer will resume from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallSource {
    /// `.openshift_install_state.json`
    InstallState,
    /// `install-config.yaml`
    InstallConfig,
}

/// Installer payloads read from the install-state secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallState {
    pub install_config: Option<Vec<u8>>,
    pub install_state: Option<Vec<u8>>,
}

impl InstallState {
    /// Extract the recognized keys from secret data
    ///
    /// Fails when neither key is present.
    pub fn from_secret_data(
        secret: &str,
        data: &BTreeMap<String, Vec<u8>>,
    ) -> Result<Self, ValidationError> {
        let state = InstallState {
            install_config: data.get(INSTALL_CONFIG_KEY).cloned(),
            install_state: data.get(INSTALL_STATE_KEY).cloned(),
        };

        if state.install_config.is_none() && state.install_state.is_none() {
            return Err(ValidationError::MissingInstallState {
                secret: secret.to_string(),
            });
        }

        Ok(state)
    }

    /// Install state wins over install config since it reflects resumed progress
    pub fn preferred_source(&self) -> InstallSource {
        if self.install_state.is_some() {
            InstallSource::InstallState
        } else {
            InstallSource::InstallConfig
        }
    }
}
