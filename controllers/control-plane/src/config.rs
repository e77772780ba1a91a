//! Controller configuration from environment variables

use crate::error::ControllerError;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

const WATCH_NAMESPACE: &str = "WATCH_NAMESPACE";
const SECRET_LOOKUP_TIMEOUT_SECS: &str = "SECRET_LOOKUP_TIMEOUT_SECS";
const MACHINE_POLL_TIMEOUT_SECS: &str = "MACHINE_POLL_TIMEOUT_SECS";
const INSTALLER_TIMEOUT_SECS: &str = "INSTALLER_TIMEOUT_SECS";
const SIGNAL_POLL_INTERVAL_SECS: &str = "SIGNAL_POLL_INTERVAL_SECS";
const CONTROL_PLANE_REPLICAS: &str = "CONTROL_PLANE_REPLICAS";
const PROBE_BIND_ADDRESS: &str = "PROBE_BIND_ADDRESS";

/// Runtime configuration, read once at start-up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace to watch; `None` watches all namespaces
    pub watch_namespace: Option<String>,
    /// Budget for a single secret lookup or list
    pub secret_lookup_timeout: Duration,
    /// Budget for a single machine create/query/delete call
    pub machine_poll_timeout: Duration,
    /// Budget for a single installer call
    pub installer_timeout: Duration,
    /// Requeue interval while waiting on an external signal
    pub signal_poll_interval: Duration,
    /// Number of control-plane machines to create
    pub control_plane_replicas: u32,
    /// Address of the probes/metrics server
    pub probe_bind_address: SocketAddr,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            secret_lookup_timeout: Duration::from_secs(10),
            machine_poll_timeout: Duration::from_secs(30),
            installer_timeout: Duration::from_secs(60),
            signal_poll_interval: Duration::from_secs(30),
            control_plane_replicas: 3,
            probe_bind_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let secs = |key: &str, default: Duration| -> Result<Duration, ControllerError> {
            match lookup(key) {
                None => Ok(default),
                Some(raw) => {
                    let value: u64 = parse(key, &raw)?;
                    if value == 0 {
                        return Err(ControllerError::InvalidConfig(format!("{key} must be greater than 0")));
                    }
                    Ok(Duration::from_secs(value))
                }
            }
        };

        let control_plane_replicas = match lookup(CONTROL_PLANE_REPLICAS) {
            None => defaults.control_plane_replicas,
            Some(raw) => {
                let replicas: u32 = parse(CONTROL_PLANE_REPLICAS, &raw)?;
                if replicas == 0 {
                    return Err(ControllerError::InvalidConfig(format!(
                        "{CONTROL_PLANE_REPLICAS} must be at least 1"
                    )));
                }
                replicas
            }
        };

        let probe_bind_address = match lookup(PROBE_BIND_ADDRESS) {
            None => defaults.probe_bind_address,
            Some(raw) => parse(PROBE_BIND_ADDRESS, &raw)?,
        };

        Ok(Self {
            watch_namespace: lookup(WATCH_NAMESPACE).filter(|ns| !ns.is_empty()),
            secret_lookup_timeout: secs(SECRET_LOOKUP_TIMEOUT_SECS, defaults.secret_lookup_timeout)?,
            machine_poll_timeout: secs(MACHINE_POLL_TIMEOUT_SECS, defaults.machine_poll_timeout)?,
            installer_timeout: secs(INSTALLER_TIMEOUT_SECS, defaults.installer_timeout)?,
            signal_poll_interval: secs(SIGNAL_POLL_INTERVAL_SECS, defaults.signal_poll_interval)?,
            control_plane_replicas,
            probe_bind_address,
        })
    }
}

fn parse<T>(key: &str, raw: &str) -> Result<T, ControllerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| ControllerError::InvalidConfig(format!("{key}={raw:?}: {e}")))
}
