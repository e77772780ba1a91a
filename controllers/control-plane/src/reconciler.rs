//! Reconciliation logic for OpenShiftControlPlane resources.
//!
//! A reconcile pass works on a copy of the persisted status and walks the
//! lifecycle in order: validate and guard the spec, resolve the install state,
//! resolve manifests, hand inputs to the installer, create machines, then
//! observe the join, completion and teardown signals. The pass stops at the
//! first step that fails or is still waiting; every transition made before
//! that point is kept and committed in a single status write.

use crate::backoff::BackoffTracker;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::lifecycle::{LifecyclePhase, Signal, apply_signal};
use crate::metrics::Metrics;
use crate::reporter::{ConditionReporter, ConditionType, Reason};
use bootstrap_client::{
    BootConfigRef, BootstrapClientError, InfrastructureProvider, InstallInputs, Installer, MachineSetRequest,
    SecretStore,
};
use crds::{
    ConditionStatus, InstallSource, InstallState, OpenShiftControlPlane, OpenShiftControlPlaneStatus,
    ValidationError, ValidationErrors, check_machine_template_update, check_status_transition,
    validate_manifest_keys, validate_spec,
};
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use kube_runtime::controller::Action;
use serde_json::json;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Persists the status subresource of a control plane
#[async_trait::async_trait]
pub trait StatusWriter: Send + Sync {
    async fn write_status(
        &self,
        namespace: &str,
        name: &str,
        status: &OpenShiftControlPlaneStatus,
    ) -> Result<(), ControllerError>;
}

/// Writes status through the Kubernetes API with a merge patch
#[derive(Clone)]
pub struct KubeStatusWriter {
    client: Client,
}

impl KubeStatusWriter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl std::fmt::Debug for KubeStatusWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStatusWriter").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl StatusWriter for KubeStatusWriter {
    async fn write_status(
        &self,
        namespace: &str,
        name: &str,
        status: &OpenShiftControlPlaneStatus,
    ) -> Result<(), ControllerError> {
        let api: Api<OpenShiftControlPlane> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({ "status": status });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// When the resource should be looked at again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Nothing to do until the resource changes
    AwaitChange,
    /// Waiting on an external signal or on referenced content
    Poll,
    /// Transient failure, retry with the per-resource backoff
    Backoff,
}

/// Result of one pass over a status copy
#[derive(Debug)]
pub struct PassOutcome {
    pub status: OpenShiftControlPlaneStatus,
    pub requeue: Requeue,
    pub error: Option<ControllerError>,
}

/// Why a pass stopped early
#[derive(Debug)]
struct StepFailure {
    error: ControllerError,
    step: Option<(ConditionType, Reason)>,
    requeue: Requeue,
}

impl StepFailure {
    /// Failure reported on the step's own condition with the error class as reason
    fn at(condition: ConditionType, error: ControllerError, requeue: Requeue) -> Self {
        let reason = Reason::for_error(&error);
        Self {
            error,
            step: Some((condition, reason)),
            requeue,
        }
    }

    fn with_reason(condition: ConditionType, reason: Reason, error: ControllerError, requeue: Requeue) -> Self {
        Self {
            error,
            step: Some((condition, reason)),
            requeue,
        }
    }
}

/// Which error a call that overruns its budget turns into
#[derive(Debug, Clone, Copy)]
enum Budget {
    /// Lookups of referenced objects
    Dependency,
    /// Waiting on the installer or the infrastructure provider
    Signal,
}

/// Run a collaborator call within its time budget
async fn bounded<T, F>(budget: Duration, kind: Budget, what: &str, call: F) -> Result<T, ControllerError>
where
    F: Future<Output = Result<T, BootstrapClientError>>,
{
    match tokio::time::timeout(budget, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ControllerError::DependencyUnavailable(format!("{what}: {e}"))),
        Err(_) => {
            let message = format!("{what} did not answer within {}", humanize(budget));
            Err(match kind {
                Budget::Dependency => ControllerError::DependencyUnavailable(message),
                Budget::Signal => ControllerError::ExternalSignalTimeout(message),
            })
        }
    }
}

fn humanize(duration: Duration) -> String {
    if duration.subsec_millis() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

/// Reconciles OpenShiftControlPlane resources
pub struct Reconciler {
    pub(crate) secrets: Arc<dyn SecretStore>,
    pub(crate) infrastructure: Arc<dyn InfrastructureProvider>,
    pub(crate) installer: Arc<dyn Installer>,
    pub(crate) status_writer: Arc<dyn StatusWriter>,
    pub(crate) config: ControllerConfig,
    pub(crate) metrics: Metrics,
    backoff: BackoffTracker,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        secrets: Arc<dyn SecretStore>,
        infrastructure: Arc<dyn InfrastructureProvider>,
        installer: Arc<dyn Installer>,
        status_writer: Arc<dyn StatusWriter>,
        config: ControllerConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            secrets,
            infrastructure,
            installer,
            status_writer,
            config,
            metrics,
            backoff: BackoffTracker::new(),
        }
    }

    /// Run one reconcile pass and commit its status
    ///
    /// Errors the pass reports through conditions are not returned; only a
    /// failed status write is, so the watcher's error policy retries it.
    pub async fn reconcile(&self, ocp: &OpenShiftControlPlane) -> Result<Action, ControllerError> {
        let name = ocp.name_any();
        let namespace = ocp
            .namespace()
            .ok_or_else(|| ControllerError::Watch(format!("OpenShiftControlPlane {name} has no namespace")))?;
        let key = format!("{namespace}/{name}");

        let phase = LifecyclePhase::observe(ocp.status.as_ref());
        let _timer = self.metrics.count_and_measure(phase.as_str());
        debug!(%namespace, %name, %phase, generation = ?ocp.metadata.generation, "Reconciling OpenShiftControlPlane");

        let PassOutcome {
            mut status,
            mut requeue,
            mut error,
        } = ReconcilePass::new(self, ocp, &namespace, &name).run().await;

        let mut write = true;
        if let Err(violation) = check_status_transition(ocp.status.as_ref(), &status) {
            error!(%namespace, %name, %violation, "Discarding reconcile pass that would break a status latch");
            let violation = ControllerError::InvariantViolation(violation);
            status = ocp.status.clone().unwrap_or_default();
            ConditionReporter::new(ocp.metadata.generation).report_error(&mut status, None, &violation);
            // A persisted status that already breaks the latches is left for an operator
            write = check_status_transition(ocp.status.as_ref(), &status).is_ok();
            error = Some(violation);
            requeue = Requeue::AwaitChange;
        }

        if write && ocp.status.as_ref() != Some(&status) {
            self.status_writer.write_status(&namespace, &name, &status).await?;
            let next = LifecyclePhase::observe(Some(&status));
            if next == phase {
                debug!(%namespace, %name, %phase, "Status updated");
            } else {
                info!(%namespace, %name, from = %phase, to = %next, "Lifecycle transition");
            }
        }

        match &error {
            Some(e) => {
                self.metrics.reconcile_failure(e);
                warn!(%namespace, %name, class = e.metric_label(), "Reconcile pass stopped: {}", e);
            }
            None => self.backoff.reset(&key),
        }

        Ok(self.action_for(requeue, &key))
    }

    /// Requeue action for a reconcile that returned an error
    pub fn error_action(&self, ocp: &OpenShiftControlPlane, error: &ControllerError) -> Action {
        let key = format!("{}/{}", ocp.namespace().unwrap_or_default(), ocp.name_any());
        self.metrics.reconcile_failure(error);
        let (delay, attempts) = self.backoff.next_for(&key);
        error!(resource = %key, attempts, "Reconciliation error, retrying in {}: {}", humanize(delay), error);
        Action::requeue(delay)
    }

    fn action_for(&self, requeue: Requeue, key: &str) -> Action {
        match requeue {
            Requeue::AwaitChange => Action::await_change(),
            Requeue::Poll => Action::requeue(self.config.signal_poll_interval),
            Requeue::Backoff => {
                let (delay, attempts) = self.backoff.next_for(key);
                debug!(resource = %key, attempts, "Backing off for {}", humanize(delay));
                Action::requeue(delay)
            }
        }
    }
}

/// One pass of the lifecycle over a status copy
pub struct ReconcilePass<'a> {
    reconciler: &'a Reconciler,
    ocp: &'a OpenShiftControlPlane,
    namespace: &'a str,
    name: &'a str,
    status: OpenShiftControlPlaneStatus,
    reporter: ConditionReporter,
}

impl std::fmt::Debug for ReconcilePass<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcilePass")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl<'a> ReconcilePass<'a> {
    pub fn new(
        reconciler: &'a Reconciler,
        ocp: &'a OpenShiftControlPlane,
        namespace: &'a str,
        name: &'a str,
    ) -> Self {
        Self {
            reconciler,
            ocp,
            namespace,
            name,
            status: ocp.status.clone().unwrap_or_default(),
            reporter: ConditionReporter::new(ocp.metadata.generation),
        }
    }

    /// Walk the lifecycle as far as it goes on this pass
    pub async fn run(mut self) -> PassOutcome {
        match self.drive().await {
            Ok(requeue) => PassOutcome {
                status: self.status,
                requeue,
                error: None,
            },
            Err(failure) => {
                self.reporter.report_error(&mut self.status, failure.step, &failure.error);
                PassOutcome {
                    status: self.status,
                    requeue: failure.requeue,
                    error: Some(failure.error),
                }
            }
        }
    }

    async fn drive(&mut self) -> Result<Requeue, StepFailure> {
        self.check_spec()?;

        if self.status.ready() {
            self.report_ready();
            return Ok(Requeue::AwaitChange);
        }

        if !self.status.initialized() {
            let install = self.resolve_install_state().await?;
            let manifests = self.resolve_manifests().await?;
            let boot_config = self.generate_boot_config(install, manifests).await?;
            self.ensure_machines(boot_config).await?;

            if !self.observe_control_plane_joined().await? {
                self.waiting(
                    ConditionType::ControlPlaneInitialized,
                    Reason::WaitingForControlPlane,
                    "waiting for a control-plane machine to join the bootstrap cluster",
                );
                return Ok(Requeue::Poll);
            }
        }

        if !self.bootstrap_completed() && !self.observe_bootstrap_complete().await? {
            self.waiting(
                ConditionType::BootstrapComplete,
                Reason::WaitingForInstaller,
                "waiting for the installer to report bootstrap complete",
            );
            return Ok(Requeue::Poll);
        }

        if !self.tear_down_bootstrap_machine().await? {
            self.waiting(
                ConditionType::Ready,
                Reason::WaitingForBootstrapDeletion,
                "waiting for the bootstrap machine to be deleted",
            );
            return Ok(Requeue::Poll);
        }

        self.report_ready();
        Ok(Requeue::AwaitChange)
    }

    /// Spec validation and the machine template guard
    fn check_spec(&mut self) -> Result<(), StepFailure> {
        let spec = &self.ocp.spec;
        let bound = self.status.bound_machine_template.as_ref();

        if let Err(errors) = validate_spec(spec, self.namespace) {
            let step = bound
                .is_none()
                .then_some((ConditionType::TemplateBound, Reason::ValidationFailed));
            return Err(StepFailure {
                error: ControllerError::Validation(errors),
                step,
                requeue: Requeue::AwaitChange,
            });
        }

        check_machine_template_update(bound, &spec.machine_template).map_err(|e| StepFailure {
            error: ControllerError::Validation(e.into()),
            step: None,
            requeue: Requeue::AwaitChange,
        })
    }

    /// Read the install-state secret and bind the machine template
    async fn resolve_install_state(&mut self) -> Result<InstallState, StepFailure> {
        let (reconciler, ocp, namespace) = (self.reconciler, self.ocp, self.namespace);
        let secret = ocp.spec.install_state_secret_ref.name.as_str();

        let data = bounded(
            reconciler.config.secret_lookup_timeout,
            Budget::Dependency,
            &format!("install-state secret {namespace}/{secret}"),
            reconciler.secrets.get_secret(namespace, secret),
        )
        .await
        .map_err(|e| StepFailure::at(ConditionType::TemplateBound, e, Requeue::Backoff))?
        .ok_or_else(|| {
            StepFailure::at(
                ConditionType::TemplateBound,
                ControllerError::DependencyUnavailable(format!("install-state secret {namespace}/{secret} not found")),
                Requeue::Backoff,
            )
        })?;

        // Secret content changes do not trigger a watch event, so poll for a fix
        let install = InstallState::from_secret_data(secret, &data).map_err(|e| {
            StepFailure::with_reason(
                ConditionType::TemplateBound,
                Reason::InstallStateMissing,
                ControllerError::Validation(e.into()),
                Requeue::Poll,
            )
        })?;

        if self.status.bind_machine_template(&ocp.spec.machine_template) {
            info!(%namespace, name = %self.name, "Machine template bound");
        }
        let (reason, message) = match install.preferred_source() {
            InstallSource::InstallState => (Reason::InstallStateFound, "resuming from saved installer state"),
            InstallSource::InstallConfig => (Reason::InstallConfigFound, "starting from install config"),
        };
        self.set(ConditionType::TemplateBound, ConditionStatus::True, reason, message);

        Ok(install)
    }

    /// Collect manifests from the secrets the selector matches, by path
    async fn resolve_manifests(&mut self) -> Result<BTreeMap<String, Vec<u8>>, StepFailure> {
        let (reconciler, ocp) = (self.reconciler, self.ocp);
        let selector = ocp.spec.manifests_label_selector().map_err(|e| {
            StepFailure::at(
                ConditionType::ManifestsResolved,
                ControllerError::Validation(e.into()),
                Requeue::AwaitChange,
            )
        })?;
        let Some(selector) = selector else {
            self.set(
                ConditionType::ManifestsResolved,
                ConditionStatus::True,
                Reason::InstallerDefaults,
                "no manifests selector, using installer defaults",
            );
            return Ok(BTreeMap::new());
        };

        let secrets = bounded(
            reconciler.config.secret_lookup_timeout,
            Budget::Dependency,
            &format!("manifest secrets matching \"{selector}\""),
            reconciler.secrets.list_secrets(self.namespace, &selector),
        )
        .await
        .map_err(|e| StepFailure::at(ConditionType::ManifestsResolved, e, Requeue::Backoff))?;

        let mut errors: Vec<ValidationError> = Vec::new();
        let mut manifests = BTreeMap::new();
        for secret in &secrets {
            match validate_manifest_keys(&secret.name, secret.data.keys().map(String::as_str)) {
                Ok(()) => manifests.extend(secret.data.clone()),
                Err(ValidationErrors(invalid)) => errors.extend(invalid),
            }
        }

        if !errors.is_empty() {
            return Err(StepFailure::with_reason(
                ConditionType::ManifestsResolved,
                Reason::InvalidManifests,
                ControllerError::Validation(ValidationErrors(errors)),
                Requeue::Poll,
            ));
        }

        let message = format!("{} manifests from {} secrets", manifests.len(), secrets.len());
        self.set(
            ConditionType::ManifestsResolved,
            ConditionStatus::True,
            Reason::ManifestsFound,
            message,
        );
        Ok(manifests)
    }

    async fn generate_boot_config(
        &mut self,
        install: InstallState,
        manifests: BTreeMap<String, Vec<u8>>,
    ) -> Result<BootConfigRef, StepFailure> {
        let reconciler = self.reconciler;
        let inputs = InstallInputs {
            namespace: self.namespace.to_string(),
            cluster: self.name.to_string(),
            install_config: install.install_config,
            install_state: install.install_state,
            manifests,
        };

        bounded(
            reconciler.config.installer_timeout,
            Budget::Signal,
            "installer boot configuration",
            reconciler.installer.generate_boot_config(&inputs),
        )
        .await
        .map_err(|e| self.provisioning_failure(e))
    }

    async fn ensure_machines(&mut self, boot_config: BootConfigRef) -> Result<(), StepFailure> {
        let (reconciler, ocp) = (self.reconciler, self.ocp);
        let template = self
            .status
            .bound_machine_template
            .clone()
            .unwrap_or_else(|| ocp.spec.machine_template.clone());
        let request = MachineSetRequest {
            namespace: self.namespace.to_string(),
            cluster: self.name.to_string(),
            template,
            control_plane_replicas: reconciler.config.control_plane_replicas,
            boot_config,
        };

        bounded(
            reconciler.config.machine_poll_timeout,
            Budget::Signal,
            "machine creation",
            reconciler.infrastructure.ensure_machines(&request),
        )
        .await
        .map_err(|e| self.provisioning_failure(e))?;

        let message = format!(
            "bootstrap machine and {} control-plane machines requested",
            request.control_plane_replicas
        );
        self.set(
            ConditionType::MachinesProvisioned,
            ConditionStatus::True,
            Reason::MachinesRequested,
            message,
        );
        Ok(())
    }

    /// Failure of the installer hand-off or machine creation
    ///
    /// Once machines have been requested the failure is reported on
    /// `Progressing`/`Degraded` only; `MachinesProvisioned` stays `True` so the
    /// observed phase does not fall back to `TemplateBound`.
    fn provisioning_failure(&self, error: ControllerError) -> StepFailure {
        if self.status.conditions.is_true(ConditionType::MachinesProvisioned.as_str()) {
            StepFailure {
                error,
                step: None,
                requeue: Requeue::Backoff,
            }
        } else {
            StepFailure::at(ConditionType::MachinesProvisioned, error, Requeue::Backoff)
        }
    }

    async fn observe_control_plane_joined(&mut self) -> Result<bool, StepFailure> {
        let reconciler = self.reconciler;
        let joined = bounded(
            reconciler.config.machine_poll_timeout,
            Budget::Signal,
            "control-plane join",
            reconciler.infrastructure.control_plane_joined(self.namespace, self.name),
        )
        .await
        .map_err(|e| StepFailure::at(ConditionType::ControlPlaneInitialized, e, Requeue::Backoff))?;

        if joined {
            self.signal(Signal::ControlPlaneJoined)?;
        }
        Ok(joined)
    }

    fn bootstrap_completed(&self) -> bool {
        self.status
            .conditions
            .is_true(ConditionType::BootstrapComplete.as_str())
    }

    async fn observe_bootstrap_complete(&mut self) -> Result<bool, StepFailure> {
        let reconciler = self.reconciler;
        let complete = bounded(
            reconciler.config.installer_timeout,
            Budget::Signal,
            "installer bootstrap completion",
            reconciler.installer.bootstrap_complete(self.namespace, self.name),
        )
        .await
        .map_err(|e| StepFailure::at(ConditionType::BootstrapComplete, e, Requeue::Backoff))?;

        if complete {
            self.signal(Signal::BootstrapCompleted)?;
        }
        Ok(complete)
    }

    /// Request deletion of the bootstrap machine; true once it is gone
    async fn tear_down_bootstrap_machine(&mut self) -> Result<bool, StepFailure> {
        let reconciler = self.reconciler;
        let budget = reconciler.config.machine_poll_timeout;

        bounded(
            budget,
            Budget::Signal,
            "bootstrap machine deletion",
            reconciler.infrastructure.delete_bootstrap_machine(self.namespace, self.name),
        )
        .await
        .map_err(|e| StepFailure::at(ConditionType::Ready, e, Requeue::Backoff))?;

        let deleted = bounded(
            budget,
            Budget::Signal,
            "bootstrap machine deletion",
            reconciler.infrastructure.bootstrap_machine_deleted(self.namespace, self.name),
        )
        .await
        .map_err(|e| StepFailure::at(ConditionType::Ready, e, Requeue::Backoff))?;

        if deleted {
            self.signal(Signal::BootstrapMachineDeleted)?;
        }
        Ok(deleted)
    }

    fn signal(&mut self, signal: Signal) -> Result<(), StepFailure> {
        match apply_signal(&mut self.status, signal, self.ocp.metadata.generation) {
            Ok(true) => {
                debug!(namespace = %self.namespace, name = %self.name, ?signal, "Signal applied");
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(violation) => Err(StepFailure {
                error: ControllerError::InvariantViolation(violation),
                step: None,
                requeue: Requeue::AwaitChange,
            }),
        }
    }

    fn waiting(&mut self, condition: ConditionType, reason: Reason, message: &str) {
        self.set(condition, ConditionStatus::False, reason, message);
        self.reporter.report_waiting(&mut self.status, reason, message);
    }

    fn report_ready(&mut self) {
        self.set(
            ConditionType::Progressing,
            ConditionStatus::False,
            Reason::AsExpected,
            "control plane is ready",
        );
        self.reporter.clear_degraded(&mut self.status);
    }

    fn set(&mut self, condition: ConditionType, status: ConditionStatus, reason: Reason, message: impl AsRef<str>) {
        self.reporter.set(&mut self.status, condition, status, reason, message);
    }
}
