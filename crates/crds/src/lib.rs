//! OpenShiftControlPlane CRD Definitions
//!
//! Resource model for the control-plane bootstrap lifecycle: the custom
//! resource, its validation, the machine template immutability guard, status
//! latches and conditions.

pub mod conditions;
pub mod duration;
pub mod immutability;
pub mod latch;
pub mod openshift_control_plane;
pub mod references;
pub mod validation;

pub use conditions::*;
pub use duration::*;
pub use immutability::*;
pub use latch::*;
pub use openshift_control_plane::*;
pub use references::*;
pub use validation::*;
