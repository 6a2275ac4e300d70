//! Rotation: the consumer is restarted exactly once, and only after the
//! cluster copy holds the new value. A rotation that does not converge
//! leaves the prior value in place.

use super::common::{Harness, INITIAL_URL, ROTATED_URL};
use secret_provisioner::descriptor::SecretValue;
use secret_provisioner::orchestrator::ProvisionState;
use secret_provisioner::provider::memory::{Injected, OperatorMode};
use secret_provisioner::rotation::{RefreshMode, RotationOutcome};
use secret_provisioner::ProvisionError;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_forced_rotation_restarts_consumer_once() {
    let harness = Harness::new();
    assert!(harness.provision().await.is_success());

    let outcome = harness
        .rotation()
        .rotate(&harness.set, &SecretValue::new(ROTATED_URL), RefreshMode::Forced)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        RotationOutcome::Completed {
            hash: SecretValue::new(ROTATED_URL).hash().short().to_string(),
            reload_signaled: true,
        }
    );
    assert_eq!(harness.consumer_value().as_deref(), Some(ROTATED_URL));
    assert_eq!(harness.cloud.secrets.value("app/db-url").as_deref(), Some(ROTATED_URL));
    assert_eq!(harness.consumer_restarts(), 1);

    let status = harness.orchestrator().observe(&harness.set).await.unwrap();
    assert_eq!(status.reached, ProvisionState::Verified);
}

#[tokio::test(start_paused = true)]
async fn test_passive_rotation_waits_for_scheduled_refresh() {
    let harness = Harness::new();
    harness.provision().await;
    let mutations = harness.cloud.cluster.mutation_count();

    let outcome = harness
        .rotation()
        .rotate(&harness.set, &SecretValue::new(ROTATED_URL), RefreshMode::Passive)
        .await
        .unwrap();

    assert!(outcome.is_completed());
    assert_eq!(harness.consumer_value().as_deref(), Some(ROTATED_URL));
    assert_eq!(harness.consumer_restarts(), 1);
    // No delete: only the restart went through the cluster API
    assert_eq!(harness.cloud.cluster.mutation_count(), mutations + 1);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_sync_leaves_prior_value_and_no_restart() {
    let harness = Harness::new();
    harness.provision().await;
    harness.cloud.cluster.set_operator(OperatorMode::Stalled);

    let outcome = harness
        .rotation()
        .rotate(&harness.set, &SecretValue::new(ROTATED_URL), RefreshMode::Forced)
        .await
        .unwrap();

    let RotationOutcome::Incomplete { hash, restored, .. } = &outcome else {
        panic!("expected incomplete rotation, got {outcome:?}");
    };
    assert!(*restored);
    assert_eq!(hash.as_str(), SecretValue::new(INITIAL_URL).hash().short());
    assert_eq!(harness.consumer_value().as_deref(), Some(INITIAL_URL));
    assert_eq!(harness.consumer_restarts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_passive_timeout_keeps_old_value_without_restore() {
    let harness = Harness::new();
    harness.provision().await;
    harness.cloud.cluster.set_operator(OperatorMode::Stalled);

    let outcome = harness
        .rotation()
        .rotate(&harness.set, &SecretValue::new(ROTATED_URL), RefreshMode::Passive)
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        RotationOutcome::Incomplete {
            restored: false,
            ..
        }
    ));
    assert_eq!(harness.consumer_value().as_deref(), Some(INITIAL_URL));
    assert_eq!(harness.consumer_restarts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rotation_refused_before_secret_synced() {
    let harness = Harness::new();
    harness
        .cloud
        .cluster
        .faults
        .fail_next("cluster.apply_store_binding", Injected::Provider);
    let report = harness.provision().await;
    assert_eq!(report.reached, ProvisionState::IdentityBound);
    let mutations = harness.cloud.cluster.mutation_count();

    let err = harness
        .rotation()
        .rotate(&harness.set, &SecretValue::new(ROTATED_URL), RefreshMode::Forced)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ProvisionError::PreconditionUnmet {
            required: ProvisionState::SecretSynced,
            reached: ProvisionState::IdentityBound,
            ..
        }
    ));
    assert_eq!(err.exit_code(), 4);
    assert_eq!(
        harness.rotation().reached_after(&harness.set, &err).await,
        Some(ProvisionState::IdentityBound)
    );
    assert_eq!(harness.cloud.cluster.mutation_count(), mutations);
    assert_eq!(harness.cloud.secrets.put_calls(), 0);
    assert_eq!(harness.cloud.secrets.value("app/db-url").as_deref(), Some(INITIAL_URL));
}

#[tokio::test(start_paused = true)]
async fn test_rotating_to_current_value_is_a_no_op() {
    let harness = Harness::new();
    harness.provision().await;

    let outcome = harness
        .rotation()
        .rotate(&harness.set, &SecretValue::new(INITIAL_URL), RefreshMode::Forced)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        RotationOutcome::Completed {
            hash: SecretValue::new(INITIAL_URL).hash().short().to_string(),
            reload_signaled: false,
        }
    );
    assert_eq!(harness.cloud.secrets.put_calls(), 0);
    assert_eq!(harness.consumer_restarts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_restart_failure_is_reported_after_sync() {
    let harness = Harness::new();
    harness.provision().await;
    harness
        .cloud
        .cluster
        .faults
        .fail_next("cluster.restart_workload", Injected::Provider);

    let err = harness
        .rotation()
        .rotate(&harness.set, &SecretValue::new(ROTATED_URL), RefreshMode::Forced)
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::Provider { .. }));
    assert_eq!(harness.consumer_value().as_deref(), Some(ROTATED_URL));
    assert_eq!(harness.consumer_restarts(), 0);
    assert_eq!(
        harness.rotation().reached_after(&harness.set, &err).await,
        Some(ProvisionState::Verified)
    );
}

#[tokio::test(start_paused = true)]
async fn test_rolling_back_after_incomplete_rotation_rewrites_store() {
    let harness = Harness::new();
    harness.provision().await;
    harness.cloud.cluster.set_operator(OperatorMode::Stalled);
    let failed = harness
        .rotation()
        .rotate(&harness.set, &SecretValue::new(ROTATED_URL), RefreshMode::Forced)
        .await
        .unwrap();
    assert!(!failed.is_completed());
    assert_eq!(harness.cloud.secrets.value("app/db-url").as_deref(), Some(ROTATED_URL));
    assert_eq!(harness.consumer_value().as_deref(), Some(INITIAL_URL));

    harness.cloud.cluster.set_operator(OperatorMode::Running);
    let rollback = harness
        .rotation()
        .rotate(&harness.set, &SecretValue::new(INITIAL_URL), RefreshMode::Forced)
        .await
        .unwrap();

    assert_eq!(
        rollback,
        RotationOutcome::Completed {
            hash: SecretValue::new(INITIAL_URL).hash().short().to_string(),
            reload_signaled: true,
        }
    );
    assert_eq!(harness.cloud.secrets.value("app/db-url").as_deref(), Some(INITIAL_URL));
    assert_eq!(harness.consumer_restarts(), 1);

    // A later scheduled refresh must not bring the abandoned value back
    tokio::time::advance(Duration::from_secs(2 * 3600)).await;
    let status = harness.orchestrator().observe(&harness.set).await.unwrap();
    assert_eq!(status.reached, ProvisionState::Verified);
    assert_eq!(harness.consumer_value().as_deref(), Some(INITIAL_URL));
}
