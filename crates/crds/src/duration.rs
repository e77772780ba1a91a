//! Machine teardown timeouts
//!
//! The timeout fields are stored as `metav1.Duration` strings ("10m", "1h30m",
//! "0s"). Unset and zero mean different things depending on the field, so
//! comparisons go through [`EffectiveTimeout`] rather than the raw strings.

use std::time::Duration;

/// Parse a Go-style duration string
///
/// A bare `"0"` is accepted, as Go's `time.ParseDuration` does.
pub fn parse_duration(value: &str) -> Result<Duration, humantime::DurationError> {
    let trimmed = value.trim();
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }
    humantime::parse_duration(trimmed)
}

/// What a timeout field means once defaults are applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectiveTimeout {
    /// No time limit
    NoLimit,
    /// Defer to the Machine resource's own default
    MachineDefault,
    /// An explicit limit (zero is only meaningful for node deletion, where it
    /// means "retry indefinitely")
    Limit(Duration),
}

/// Semantics for `nodeDrainTimeout` and `nodeVolumeDetachTimeout`:
/// unset and zero both mean "no limit"
pub fn drain_like_timeout(value: Option<&str>) -> Result<EffectiveTimeout, humantime::DurationError> {
    match value {
        None => Ok(EffectiveTimeout::NoLimit),
        Some(raw) => {
            let parsed = parse_duration(raw)?;
            if parsed.is_zero() {
                Ok(EffectiveTimeout::NoLimit)
            } else {
                Ok(EffectiveTimeout::Limit(parsed))
            }
        }
    }
}

/// Semantics for `nodeDeletionTimeout`: unset defers to the Machine default,
/// zero is an explicit value
pub fn deletion_timeout(value: Option<&str>) -> Result<EffectiveTimeout, humantime::DurationError> {
    match value {
        None => Ok(EffectiveTimeout::MachineDefault),
        Some(raw) => Ok(EffectiveTimeout::Limit(parse_duration(raw)?)),
    }
}
