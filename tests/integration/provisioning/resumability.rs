//! A run that fails part way resumes on the next invocation without
//! recreating what already exists.

use super::common::{Harness, INITIAL_URL};
use secret_provisioner::error::ResourceKind;
use secret_provisioner::orchestrator::ProvisionState;
use secret_provisioner::provider::memory::{Injected, OperatorMode};
use secret_provisioner::reconciler::ReconcileAction;

#[tokio::test(start_paused = true)]
async fn test_resumes_after_store_failure() {
    let harness = Harness::new();
    harness
        .cloud
        .cluster
        .faults
        .fail_next("cluster.apply_store_binding", Injected::Provider);

    let first = harness.provision().await;
    assert_eq!(first.reached, ProvisionState::IdentityBound);
    let failure = first.failure.as_ref().unwrap();
    assert_eq!(failure.state, ProvisionState::StoreReady);
    assert_eq!(failure.error.exit_code(), 1);
    assert!(harness.consumer_value().is_none());

    let second = harness.provision().await;

    assert!(second.is_success(), "{}", second.render_text());
    let actions: Vec<(ResourceKind, ReconcileAction)> = second
        .outcomes()
        .map(|outcome| (outcome.kind, outcome.action))
        .collect();
    assert_eq!(
        actions,
        vec![
            (ResourceKind::Secret, ReconcileAction::AlreadyPresent),
            (ResourceKind::Policy, ReconcileAction::AlreadyPresent),
            (ResourceKind::IdentityBinding, ReconcileAction::AlreadyPresent),
            (ResourceKind::StoreBinding, ReconcileAction::Created),
            (ResourceKind::SyncRequest, ReconcileAction::Created),
        ]
    );
    assert_eq!(harness.cloud.iam.role_create_calls(), 1);
    assert_eq!(harness.cloud.iam.policy_create_calls(), 1);
    assert_eq!(harness.consumer_value().as_deref(), Some(INITIAL_URL));
}

#[tokio::test(start_paused = true)]
async fn test_stalled_operator_times_out_softly_then_resumes() {
    let harness = Harness::new();
    harness.cloud.cluster.set_operator(OperatorMode::Stalled);

    let first = harness.provision().await;
    assert_eq!(first.reached, ProvisionState::IdentityBound);
    let failure = first.failure.as_ref().unwrap();
    assert_eq!(failure.state, ProvisionState::StoreReady);
    assert!(failure.soft);
    assert!(failure
        .diagnostics
        .iter()
        .any(|line| line.contains("kubectl describe secretstore app-secret-store -n default")));

    harness.cloud.cluster.set_operator(OperatorMode::Running);
    let second = harness.provision().await;
    assert_eq!(second.reached, ProvisionState::Verified);
}

#[tokio::test(start_paused = true)]
async fn test_verify_reports_last_good_state_without_writing() {
    let harness = Harness::new();
    harness
        .cloud
        .cluster
        .faults
        .fail_next("cluster.apply_sync_request", Injected::Provider);
    harness.provision().await;
    let mutations = harness.cloud.cluster.mutation_count();

    let report = harness.orchestrator().verify(&harness.set).await;

    assert_eq!(report.reached, ProvisionState::StoreReady);
    assert_eq!(
        report.failure.as_ref().unwrap().state,
        ProvisionState::SyncRequested
    );
    assert_eq!(harness.cloud.cluster.mutation_count(), mutations);
}
