//! Print the OpenShiftControlPlane CRD as YAML
//!
//! `cargo run -p crds --bin crdgen > config/crd/openshift-control-plane.yaml`

use crds::OpenShiftControlPlane;
use kube::CustomResourceExt as _;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&OpenShiftControlPlane::crd())?);
    Ok(())
}
