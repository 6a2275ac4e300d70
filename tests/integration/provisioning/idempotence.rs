//! Running provision on a satisfied pipeline changes nothing.

use super::common::{Harness, INITIAL_URL};
use secret_provisioner::descriptor::SecretValue;
use secret_provisioner::orchestrator::ProvisionState;
use secret_provisioner::reconciler::ReconcileAction;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_second_run_is_all_already_present() {
    let harness = Harness::new();
    let first = harness.provision().await;
    assert_eq!(first.reached, ProvisionState::Verified);
    let mutations = harness.cloud.cluster.mutation_count();

    let second = harness.provision().await;

    assert!(second.is_success());
    assert!(second
        .outcomes()
        .all(|outcome| outcome.action == ReconcileAction::AlreadyPresent));
    assert_eq!(harness.cloud.cluster.mutation_count(), mutations);
    assert_eq!(harness.cloud.secrets.create_calls(), 1);
    assert_eq!(harness.cloud.secrets.put_calls(), 0);
    assert_eq!(harness.cloud.iam.policy_create_calls(), 1);
    assert_eq!(harness.cloud.iam.policy_version_calls(), 0);
    assert_eq!(harness.cloud.iam.role_create_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rerun_with_different_value_does_not_overwrite() {
    let mut harness = Harness::new();
    harness.provision().await;

    harness.set.secret.value = Some(SecretValue::new("postgres://someone-else"));
    let report = harness.provision().await;

    assert!(report.is_success());
    assert_eq!(harness.cloud.secrets.value("app/db-url").as_deref(), Some(INITIAL_URL));
    assert_eq!(harness.consumer_value().as_deref(), Some(INITIAL_URL));
}

#[tokio::test(start_paused = true)]
async fn test_refresh_interval_drift_is_updated_in_place() {
    let mut harness = Harness::new();
    harness.provision().await;

    harness.set.sync.refresh_interval = Duration::from_secs(600);
    let report = harness.provision().await;

    assert!(report.is_success());
    let sync = report
        .outcomes()
        .find(|outcome| outcome.key == "default/app-db-secret")
        .unwrap();
    assert_eq!(sync.action, ReconcileAction::Updated);
    assert_eq!(sync.detail.as_deref(), Some("refresh interval 1h -> 10m"));

    let again = harness.provision().await;
    assert!(again
        .outcomes()
        .all(|outcome| outcome.action == ReconcileAction::AlreadyPresent));
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried_within_a_run() {
    let harness = Harness::new();
    harness.cloud.iam.faults.fail_times(
        "iam.create_policy",
        secret_provisioner::provider::memory::Injected::Transient,
        2,
    );

    let report = harness.provision().await;

    assert!(report.is_success(), "{}", report.render_text());
    assert_eq!(harness.cloud.iam.policy_create_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_policy_action_drift_creates_new_version() {
    let mut harness = Harness::new();
    harness.provision().await;

    harness.set.policy.actions.retain(|action| action != "secretsmanager:DescribeSecret");
    let report = harness.provision().await;

    assert!(report.is_success(), "{}", report.render_text());
    assert_eq!(harness.cloud.iam.policy_version_calls(), 1);
    assert_eq!(harness.cloud.iam.policy_versions("app-db-url-read"), vec!["v1", "v2"]);
}
