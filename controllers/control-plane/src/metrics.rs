//! Prometheus metrics for reconciliation

use crate::error::ControllerError;
use prometheus::{HistogramVec, IntCounter, IntCounterVec, Registry, histogram_opts, opts};
use tokio::time::Instant;

#[derive(Clone)]
pub struct Metrics {
    pub reconciliations: IntCounter,
    pub failures: IntCounterVec,
    pub reconcile_duration: HistogramVec,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create the metrics and register them with `registry`
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "openshift_control_plane_reconcile_duration_seconds",
                "The duration of reconcile to complete in seconds",
            )
            .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]),
            &["phase"],
        )?;
        let failures = IntCounterVec::new(
            opts!(
                "openshift_control_plane_reconciliation_errors_total",
                "reconciliation errors by error class",
            ),
            &["error"],
        )?;
        let reconciliations = IntCounter::new(
            "openshift_control_plane_reconciliations_total",
            "reconciliations",
        )?;

        registry.register(Box::new(reconcile_duration.clone()))?;
        registry.register(Box::new(failures.clone()))?;
        registry.register(Box::new(reconciliations.clone()))?;

        Ok(Metrics {
            reconciliations,
            failures,
            reconcile_duration,
        })
    }

    pub fn reconcile_failure(&self, error: &ControllerError) {
        self.failures.with_label_values(&[error.metric_label()]).inc();
    }

    /// Count a reconciliation and time it until the returned guard is dropped
    pub fn count_and_measure(&self, phase: &str) -> ReconcileMeasurer {
        self.reconciliations.inc();
        ReconcileMeasurer {
            start: Instant::now(),
            metric: self.reconcile_duration.clone(),
            phase: phase.to_string(),
        }
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer {
    start: Instant,
    metric: HistogramVec,
    phase: String,
}

impl std::fmt::Debug for ReconcileMeasurer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcileMeasurer")
            .field("start", &self.start)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.metric
            .with_label_values(&[self.phase.as_str()])
            .observe(duration);
    }
}
