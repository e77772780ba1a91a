//! Bootstrap client models
//!
//! Request and response types exchanged with the secret store, the
//! infrastructure provider and the installer.

use crds::MachineTemplate;
use std::collections::BTreeMap;

/// Secret contents, key to raw bytes
pub type SecretData = BTreeMap<String, Vec<u8>>;

/// Label carrying the Cluster API cluster name
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Label marking Cluster API control-plane machines
pub const CONTROL_PLANE_LABEL: &str = "cluster.x-k8s.io/control-plane";

/// Label distinguishing the bootstrap machine from the masters
pub const MACHINE_ROLE_LABEL: &str = "controlplane.openshift.io/machine-role";

/// A secret returned by a label-selector lookup
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NamedSecret {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub data: SecretData,
}

/// Role of a machine in the bootstrap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineRole {
    /// Temporary machine that stands up the initial control plane
    Bootstrap,
    /// Control-plane machine
    Master,
}

impl MachineRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MachineRole::Bootstrap => "bootstrap",
            MachineRole::Master => "master",
        }
    }
}

/// Name of the bootstrap machine for a cluster
pub fn bootstrap_machine_name(cluster: &str) -> String {
    format!("{cluster}-bootstrap")
}

/// Name of the n-th control-plane machine for a cluster
pub fn control_plane_machine_name(cluster: &str, index: u32) -> String {
    format!("{cluster}-master-{index}")
}

/// Everything the installer needs to render the boot configuration
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstallInputs {
    pub namespace: String,
    pub cluster: String,
    pub install_config: Option<Vec<u8>>,
    pub install_state: Option<Vec<u8>>,
    /// Manifest path (`manifests/...`, `openshift/...`) to contents
    pub manifests: BTreeMap<String, Vec<u8>>,
}

/// Where the generated boot configuration lives
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BootConfigRef {
    /// Secret that machines use as their bootstrap data
    pub secret_name: String,
}

/// Request to create the bootstrap and control-plane machines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineSetRequest {
    pub namespace: String,
    pub cluster: String,
    pub template: MachineTemplate,
    pub control_plane_replicas: u32,
    pub boot_config: BootConfigRef,
}

impl MachineSetRequest {
    /// Names of every machine the request describes, bootstrap first
    pub fn machine_names(&self) -> Vec<(MachineRole, String)> {
        std::iter::once((MachineRole::Bootstrap, bootstrap_machine_name(&self.cluster)))
            .chain(
                (0..self.control_plane_replicas)
                    .map(|i| (MachineRole::Master, control_plane_machine_name(&self.cluster, i))),
            )
            .collect()
    }
}
