//! Unit tests for the OpenShiftControlPlane reconciler

#[cfg(test)]
mod tests {
    use crate::lifecycle::LifecyclePhase;
    use crate::reporter::ConditionType;
    use crate::test_utils::*;
    use bootstrap_client::{bootstrap_machine_name, control_plane_machine_name};
    use crds::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
    use kube_runtime::controller::Action;
    use prometheus::{Encoder, TextEncoder};
    use std::collections::BTreeMap;
    use std::time::Duration;

    const POLL: Duration = Duration::from_secs(15);

    fn assert_latches_hold(harness: &Harness) {
        let status = harness.status();
        assert!(!status.ready() || status.initialized(), "ready without initialized: {status:?}");
    }

    fn metrics_text(harness: &Harness) -> String {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&harness.registry.gather(), &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }

    #[tokio::test]
    async fn test_happy_path_reaches_ready() {
        let mut harness = Harness::with_install_config(create_test_control_plane(machine_template("demo-cp"), None));

        // Machines requested, waiting for a control-plane machine to join
        assert_eq!(harness.pass().await, Action::requeue(POLL));
        assert_eq!(harness.phase(), LifecyclePhase::Provisioning);
        let status = harness.status();
        assert_eq!(status.bound_machine_template, Some(machine_template("demo-cp")));
        assert!(!status.initialized());
        assert_eq!(harness.condition(ConditionType::TemplateBound).unwrap().reason, "InstallConfigFound");
        assert_eq!(harness.condition(ConditionType::ManifestsResolved).unwrap().reason, "InstallerDefaults");
        assert_eq!(harness.condition(ConditionType::Progressing).unwrap().reason, "WaitingForControlPlane");
        assert_eq!(
            harness.infrastructure.machine_names(NAMESPACE),
            vec![
                bootstrap_machine_name(NAME),
                control_plane_machine_name(NAME, 0),
                control_plane_machine_name(NAME, 1),
                control_plane_machine_name(NAME, 2),
            ]
        );

        harness.join_control_plane();
        assert_eq!(harness.pass().await, Action::requeue(POLL));
        assert_eq!(harness.phase(), LifecyclePhase::Initialized);
        assert!(harness.status().initialized());
        assert!(!harness.status().ready());
        assert_eq!(harness.condition(ConditionType::BootstrapComplete).unwrap().reason, "WaitingForInstaller");

        harness.complete_bootstrap();
        assert_eq!(harness.pass().await, Action::await_change());
        assert_eq!(harness.phase(), LifecyclePhase::Ready);
        let status = harness.status();
        assert!(status.initialized());
        assert!(status.ready());
        assert!(status.conditions.is_true("Ready"));
        assert!(status.conditions.is_false("Progressing"));
        assert!(status.conditions.is_false("Degraded"));
        assert!(!harness
            .infrastructure
            .machine_names(NAMESPACE)
            .contains(&bootstrap_machine_name(NAME)));
        assert_eq!(harness.writer.writes(), 3);
        assert_latches_hold(&harness);
    }

    #[tokio::test]
    async fn test_repeated_passes_do_not_repeat_side_effects() {
        let mut harness = Harness::with_install_config(create_test_control_plane(machine_template("demo-cp"), None));

        harness.pass().await;
        let status = harness.status();
        for _ in 0..3 {
            assert_eq!(harness.pass().await, Action::requeue(POLL));
        }

        assert_eq!(harness.status(), status);
        assert_eq!(harness.writer.writes(), 1, "unchanged status must not be written");
        assert_eq!(harness.infrastructure.machines_created(), 4);
        assert_eq!(harness.installer.generate_calls(), 4);
    }

    #[tokio::test]
    async fn test_latches_are_monotonic_over_passes() {
        let mut harness = Harness::with_install_config(create_test_control_plane(machine_template("demo-cp"), None));
        harness.infrastructure.hold_bootstrap_deletion(true);

        let mut initialized = false;
        let mut ready = false;
        for step in 0..8 {
            match step {
                2 => harness.join_control_plane(),
                4 => harness.complete_bootstrap(),
                6 => harness.infrastructure.complete_bootstrap_deletion(NAMESPACE, NAME),
                _ => {}
            }
            // A join reported once is enough; withdrawing it must not regress the latch
            if step == 3 {
                harness.infrastructure.set_control_plane_joined(NAMESPACE, NAME, false);
            }

            let writes_before = harness.writer.writes();
            harness.pass().await;
            assert!(harness.writer.writes() - writes_before <= 1);

            let status = harness.status();
            assert!(!initialized || status.initialized(), "initialized regressed at step {step}");
            assert!(!ready || status.ready(), "ready regressed at step {step}");
            initialized = status.initialized();
            ready = status.ready();
            assert_latches_hold(&harness);
        }

        assert!(initialized);
        assert!(ready);
    }

    #[tokio::test]
    async fn test_waits_for_bootstrap_machine_deletion() {
        let mut harness = Harness::with_install_config(create_test_control_plane(machine_template("demo-cp"), None));
        harness.infrastructure.hold_bootstrap_deletion(true);
        harness.join_control_plane();
        harness.complete_bootstrap();

        assert_eq!(harness.pass().await, Action::requeue(POLL));
        assert_eq!(harness.phase(), LifecyclePhase::BootstrapComplete);
        assert!(!harness.status().ready());
        assert_eq!(harness.condition(ConditionType::Ready).unwrap().reason, "WaitingForBootstrapDeletion");
        assert!(harness.infrastructure.deletion_requested(NAMESPACE, NAME));

        harness.infrastructure.complete_bootstrap_deletion(NAMESPACE, NAME);
        assert_eq!(harness.pass().await, Action::await_change());
        assert!(harness.status().ready());
        assert_eq!(harness.condition(ConditionType::Ready).unwrap().reason, "BootstrapMachineDeleted");
    }

    #[tokio::test]
    async fn test_ready_is_terminal() {
        let mut harness = Harness::with_install_config(create_test_control_plane(machine_template("demo-cp"), None));
        harness.join_control_plane();
        harness.complete_bootstrap();
        harness.pass().await;
        assert!(harness.status().ready());

        // Nothing referenced is read again once ready
        harness.secrets.remove_secret(NAMESPACE, INSTALL_SECRET);
        harness.infrastructure.set_control_plane_joined(NAMESPACE, NAME, false);
        let writes = harness.writer.writes();

        assert_eq!(harness.pass().await, Action::await_change());
        assert!(harness.status().ready());
        assert_eq!(harness.writer.writes(), writes);
    }

    #[tokio::test]
    async fn test_secret_without_install_keys_blocks_binding() {
        let mut harness = Harness::new(create_test_control_plane(machine_template("demo-cp"), None));
        harness.add_install_secret([("kubeconfig", "not an install config")]);

        assert_eq!(harness.pass().await, Action::requeue(POLL));
        let status = harness.status();
        assert!(status.bound_machine_template.is_none());
        assert!(!status.initialized());
        let bound = harness.condition(ConditionType::TemplateBound).unwrap();
        assert_eq!(bound.status, "False");
        assert_eq!(bound.reason, "InstallStateMissing");
        let degraded = harness.condition(ConditionType::Degraded).unwrap();
        assert_eq!(degraded.status, "True");
        assert_eq!(degraded.reason, "ValidationFailed");
        assert!(degraded.message.contains(INSTALL_SECRET));
        assert_eq!(harness.installer.generate_calls(), 0);
        assert_eq!(harness.infrastructure.ensure_calls(), 0);
        assert!(metrics_text(&harness).contains("openshift_control_plane_reconciliation_errors_total{error=\"ValidationError\"} 1"));

        // Fixing the secret content unblocks the next poll
        harness.add_install_secret([(INSTALL_STATE_KEY, "{}")]);
        harness.pass().await;
        assert_eq!(harness.phase(), LifecyclePhase::Provisioning);
        assert_eq!(harness.condition(ConditionType::TemplateBound).unwrap().reason, "InstallStateFound");
        assert!(harness.status().conditions.is_false("Degraded"));
    }

    #[tokio::test]
    async fn test_machine_template_change_is_rejected() {
        let mut harness = Harness::with_install_config(create_test_control_plane(machine_template("t1"), None));
        harness.pass().await;
        let before = harness.status();
        let ensure_calls = harness.infrastructure.ensure_calls();

        harness.edit_spec(|spec| spec.machine_template = machine_template("t2"));
        assert_eq!(harness.pass().await, Action::await_change());

        let after = harness.status();
        assert_eq!(after.bound_machine_template, Some(machine_template("t1")));
        assert_eq!(after.initialized(), before.initialized());
        assert_eq!(after.ready(), before.ready());
        let degraded = harness.condition(ConditionType::Degraded).unwrap();
        assert_eq!(degraded.status, "True");
        assert_eq!(degraded.reason, "MachineTemplateImmutable");
        assert!(degraded.message.contains("machineTemplate is immutable"));
        assert_eq!(degraded.observed_generation, Some(2));
        for condition in before.conditions.iter().filter(|c| c.type_ != "Degraded") {
            assert_eq!(after.conditions.get(&condition.type_), Some(condition));
        }
        assert_eq!(harness.infrastructure.ensure_calls(), ensure_calls);

        // Reverting the edit clears the condition
        harness.edit_spec(|spec| spec.machine_template = machine_template("t1"));
        assert_eq!(harness.pass().await, Action::requeue(POLL));
        assert!(harness.status().conditions.is_false("Degraded"));
        assert_eq!(harness.phase(), LifecyclePhase::Provisioning);
    }

    #[tokio::test]
    async fn test_equivalent_machine_template_is_accepted() {
        let mut harness = Harness::with_install_config(create_test_control_plane(machine_template("t1"), None));
        harness.pass().await;

        // Resubmitting the same template, and spelling an unset drain timeout as zero
        harness.edit_spec(|spec| spec.machine_template = machine_template("t1"));
        harness.pass().await;
        harness.edit_spec(|spec| spec.machine_template.node_drain_timeout = Some("0s".to_string()));
        harness.pass().await;

        assert!(harness.status().conditions.is_false("Degraded"));
        assert_eq!(harness.status().bound_machine_template, Some(machine_template("t1")));
    }

    #[tokio::test]
    async fn test_template_is_editable_before_binding() {
        let mut harness = Harness::new(create_test_control_plane(machine_template("t1"), None));

        // Secret missing, nothing bound yet
        harness.pass().await;
        assert!(harness.status().bound_machine_template.is_none());

        harness.edit_spec(|spec| spec.machine_template = machine_template("t2"));
        harness.add_install_secret([(INSTALL_CONFIG_KEY, "apiVersion: v1\n")]);
        harness.pass().await;
        assert_eq!(harness.status().bound_machine_template, Some(machine_template("t2")));
        assert!(harness.status().conditions.is_false("Degraded"));
    }

    #[tokio::test]
    async fn test_invalid_spec_is_not_retried_until_changed() {
        let mut template = machine_template("demo-cp");
        template.node_deletion_timeout = Some("soon".to_string());
        let mut harness = Harness::with_install_config(create_test_control_plane(template, None));

        assert_eq!(harness.pass().await, Action::await_change());
        let degraded = harness.condition(ConditionType::Degraded).unwrap();
        assert_eq!(degraded.reason, "ValidationFailed");
        assert!(degraded.message.contains("nodeDeletionTimeout"));
        assert_eq!(harness.condition(ConditionType::TemplateBound).unwrap().reason, "ValidationFailed");
        assert_eq!(harness.secrets.get_calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_manifest_path_blocks_until_fixed() {
        let mut harness = Harness::with_install_config(create_test_control_plane(
            machine_template("demo-cp"),
            Some(manifests_selector()),
        ));
        harness
            .secrets
            .add_secret(NAMESPACE, "demo-manifests", manifest_labels(), [("scripts/foo.sh", "#!/bin/sh")]);

        assert_eq!(harness.pass().await, Action::requeue(POLL));
        let status = harness.status();
        // Transitions made before the failing step are kept
        assert_eq!(status.bound_machine_template, Some(machine_template("demo-cp")));
        assert!(status.conditions.is_true("TemplateBound"));
        let resolved = harness.condition(ConditionType::ManifestsResolved).unwrap();
        assert_eq!(resolved.status, "False");
        assert_eq!(resolved.reason, "InvalidManifests");
        assert!(resolved.message.contains("scripts/foo.sh"));
        assert!(status.conditions.is_true("Degraded"));
        assert_eq!(harness.installer.generate_calls(), 0);
        assert_eq!(harness.infrastructure.ensure_calls(), 0);

        harness.secrets.add_secret(
            NAMESPACE,
            "demo-manifests",
            manifest_labels(),
            [("manifests/foo.sh", "#!/bin/sh")],
        );
        harness.pass().await;
        let resolved = harness.condition(ConditionType::ManifestsResolved).unwrap();
        assert_eq!(resolved.status, "True");
        assert_eq!(resolved.reason, "ManifestsFound");
        assert!(harness.status().conditions.is_false("Degraded"));
        let inputs = harness.installer.inputs(NAMESPACE, NAME).unwrap();
        assert_eq!(
            inputs.manifests,
            BTreeMap::from([("manifests/foo.sh".to_string(), b"#!/bin/sh".to_vec())])
        );
        assert_eq!(harness.infrastructure.machines_created(), 4);
    }

    #[tokio::test]
    async fn test_manifests_merged_from_matching_secrets_only() {
        let mut harness = Harness::with_install_config(create_test_control_plane(
            machine_template("demo-cp"),
            Some(manifests_selector()),
        ));
        harness
            .secrets
            .add_secret(NAMESPACE, "a-manifests", manifest_labels(), [("manifests/a.yaml", "a")]);
        harness
            .secrets
            .add_secret(NAMESPACE, "b-manifests", manifest_labels(), [("openshift/b.yaml", "b")]);
        harness.secrets.add_secret(
            NAMESPACE,
            "other-cluster",
            BTreeMap::from([("cluster".to_string(), "other".to_string())]),
            [("scripts/ignored.sh", "x")],
        );

        harness.pass().await;
        let inputs = harness.installer.inputs(NAMESPACE, NAME).unwrap();
        let paths: Vec<&str> = inputs.manifests.keys().map(String::as_str).collect();
        assert_eq!(paths, vec!["manifests/a.yaml", "openshift/b.yaml"]);
        assert_eq!(
            harness.condition(ConditionType::ManifestsResolved).unwrap().message,
            "2 manifests from 2 secrets"
        );
    }

    #[tokio::test]
    async fn test_manifests_selected_by_set_expression() {
        let selector = LabelSelector {
            match_labels: Some(manifest_labels()),
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "tier".to_string(),
                operator: "NotIn".to_string(),
                values: Some(vec!["legacy".to_string()]),
            }]),
        };
        let mut harness =
            Harness::with_install_config(create_test_control_plane(machine_template("demo-cp"), Some(selector)));
        let tiered = |tier: &str| {
            let mut labels = manifest_labels();
            labels.insert("tier".to_string(), tier.to_string());
            labels
        };
        harness
            .secrets
            .add_secret(NAMESPACE, "current", tiered("current"), [("manifests/new.yaml", "new")]);
        harness
            .secrets
            .add_secret(NAMESPACE, "legacy", tiered("legacy"), [("manifests/old.yaml", "old")]);
        harness
            .secrets
            .add_secret(NAMESPACE, "untiered", manifest_labels(), [("openshift/base.yaml", "base")]);

        harness.pass().await;
        let inputs = harness.installer.inputs(NAMESPACE, NAME).unwrap();
        let paths: Vec<&str> = inputs.manifests.keys().map(String::as_str).collect();
        assert_eq!(paths, vec!["manifests/new.yaml", "openshift/base.yaml"]);
        assert_eq!(harness.phase(), LifecyclePhase::Provisioning);
    }

    #[tokio::test]
    async fn test_missing_secret_is_transient() {
        let mut harness = Harness::new(create_test_control_plane(machine_template("demo-cp"), None));

        assert_eq!(harness.pass().await, Action::requeue(Duration::from_secs(5)));
        let bound = harness.condition(ConditionType::TemplateBound).unwrap();
        assert_eq!(bound.status, "False");
        assert_eq!(bound.reason, "DependencyUnavailable");
        assert_eq!(harness.condition(ConditionType::Progressing).unwrap().reason, "DependencyUnavailable");
        assert!(harness.status().conditions.is_false("Degraded"));
        assert_eq!(harness.phase(), LifecyclePhase::Pending);

        // Backoff grows while the failure persists
        assert_eq!(harness.pass().await, Action::requeue(Duration::from_secs(5)));
        assert_eq!(harness.pass().await, Action::requeue(Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_secret_lookup_times_out() {
        let mut harness = Harness::with_install_config(create_test_control_plane(machine_template("demo-cp"), None));
        harness.secrets.set_latency(Some(Duration::from_secs(5)));

        harness.pass().await;
        let bound = harness.condition(ConditionType::TemplateBound).unwrap();
        assert_eq!(bound.reason, "DependencyUnavailable");
        assert!(bound.message.contains("did not answer within 1s"));
        assert!(harness.status().bound_machine_template.is_none());

        harness.secrets.set_latency(None);
        harness.pass().await;
        assert_eq!(harness.phase(), LifecyclePhase::Provisioning);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_installer_is_an_external_signal_timeout() {
        let mut harness = Harness::with_install_config(create_test_control_plane(machine_template("demo-cp"), None));
        harness.installer.set_latency(Some(Duration::from_secs(10)));

        let action = harness.pass().await;
        assert_eq!(action, Action::requeue(Duration::from_secs(5)));
        let provisioned = harness.condition(ConditionType::MachinesProvisioned).unwrap();
        assert_eq!(provisioned.status, "False");
        assert_eq!(provisioned.reason, "ExternalSignalTimeout");
        assert_eq!(harness.condition(ConditionType::Progressing).unwrap().reason, "ExternalSignalTimeout");
        assert!(harness.status().conditions.is_true("TemplateBound"));
        assert_eq!(harness.infrastructure.ensure_calls(), 0);
        assert!(metrics_text(&harness)
            .contains("openshift_control_plane_reconciliation_errors_total{error=\"ExternalSignalTimeout\"} 1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_installer_timeout_while_provisioning_keeps_phase() {
        let mut harness = Harness::with_install_config(create_test_control_plane(machine_template("demo-cp"), None));
        harness.pass().await;
        assert_eq!(harness.phase(), LifecyclePhase::Provisioning);
        let requested = harness.condition(ConditionType::MachinesProvisioned).unwrap();

        harness.installer.set_latency(Some(Duration::from_secs(10)));
        assert_eq!(harness.pass().await, Action::requeue(Duration::from_secs(5)));

        assert_eq!(harness.phase(), LifecyclePhase::Provisioning);
        assert_eq!(harness.condition(ConditionType::MachinesProvisioned), Some(requested));
        let progressing = harness.condition(ConditionType::Progressing).unwrap();
        assert_eq!(progressing.reason, "ExternalSignalTimeout");
        assert!(progressing.message.contains("installer boot configuration did not answer within 3s"));
        assert!(harness.status().conditions.is_false("Degraded"));

        harness.installer.set_latency(None);
        assert_eq!(harness.pass().await, Action::requeue(POLL));
        assert_eq!(harness.phase(), LifecyclePhase::Provisioning);
        assert_eq!(harness.condition(ConditionType::Progressing).unwrap().reason, "WaitingForControlPlane");
    }

    #[tokio::test(start_paused = true)]
    async fn test_machine_timeout_while_provisioning_keeps_phase() {
        let mut harness = Harness::with_install_config(create_test_control_plane(machine_template("demo-cp"), None));
        harness.pass().await;
        assert_eq!(harness.phase(), LifecyclePhase::Provisioning);

        harness.infrastructure.set_latency(Some(Duration::from_secs(10)));
        assert_eq!(harness.pass().await, Action::requeue(Duration::from_secs(5)));

        assert_eq!(harness.phase(), LifecyclePhase::Provisioning);
        let provisioned = harness.condition(ConditionType::MachinesProvisioned).unwrap();
        assert_eq!(provisioned.status, "True");
        assert_eq!(provisioned.reason, "MachinesRequested");
        let progressing = harness.condition(ConditionType::Progressing).unwrap();
        assert_eq!(progressing.reason, "ExternalSignalTimeout");
        assert!(progressing.message.contains("machine creation did not answer within 2s"));
        assert!(!harness.status().initialized());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_machine_provider_after_initialization() {
        let mut harness = Harness::with_install_config(create_test_control_plane(machine_template("demo-cp"), None));
        harness.join_control_plane();
        harness.pass().await;
        assert!(harness.status().initialized());

        harness.complete_bootstrap();
        harness.infrastructure.set_latency(Some(Duration::from_secs(30)));
        harness.pass().await;

        let status = harness.status();
        assert!(status.initialized());
        assert!(!status.ready());
        assert!(status.conditions.is_true("BootstrapComplete"));
        assert_eq!(harness.condition(ConditionType::Ready).unwrap().reason, "ExternalSignalTimeout");
    }

    #[tokio::test]
    async fn test_persisted_latch_violation_is_not_written() {
        let mut ocp = create_test_control_plane(machine_template("demo-cp"), None);
        ocp.status = Some(serde_json::from_value(serde_json::json!({ "initialized": false, "ready": true })).unwrap());
        let mut harness = Harness::with_install_config(ocp);

        assert_eq!(harness.pass().await, Action::await_change());
        assert_eq!(harness.writer.writes(), 0);
        assert!(metrics_text(&harness)
            .contains("openshift_control_plane_reconciliation_errors_total{error=\"InvariantViolation\"} 1"));
    }

    #[tokio::test]
    async fn test_failed_status_write_is_returned() {
        let harness = Harness::with_install_config(create_test_control_plane(machine_template("demo-cp"), None));
        harness.writer.set_failing(true);

        let error = harness.reconciler.reconcile(&harness.ocp).await.unwrap_err();
        assert!(error.to_string().contains("status write rejected"));
        assert_eq!(
            harness.reconciler.error_action(&harness.ocp, &error),
            Action::requeue(Duration::from_secs(5))
        );
    }

    #[tokio::test]
    async fn test_reconcile_metrics_are_labelled_by_phase() {
        let mut harness = Harness::with_install_config(create_test_control_plane(machine_template("demo-cp"), None));
        harness.pass().await;
        harness.pass().await;

        let text = metrics_text(&harness);
        assert!(text.contains("openshift_control_plane_reconciliations_total 2"));
        assert!(text.contains("openshift_control_plane_reconcile_duration_seconds_count{phase=\"Pending\"} 1"));
        assert!(text.contains("openshift_control_plane_reconcile_duration_seconds_count{phase=\"Provisioning\"} 1"));
    }
}
