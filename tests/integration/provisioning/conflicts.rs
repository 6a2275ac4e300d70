//! Pre-existing resources that belong to someone else halt the run and are
//! left exactly as they were.

use super::common::{Harness, ACCOUNT_ID};
use secret_provisioner::error::ResourceKind;
use secret_provisioner::orchestrator::ProvisionState;
use secret_provisioner::provider::ClusterApi;
use secret_provisioner::ProvisionError;

#[tokio::test(start_paused = true)]
async fn test_sync_request_for_other_source_is_a_conflict() {
    let harness = Harness::new();
    let mut foreign = harness.set.sync.clone();
    foreign.remote_key = "billing/db-url".to_string();
    harness.cloud.cluster.insert_sync_request(&foreign, true);
    let mutations = harness.cloud.cluster.mutation_count();

    let report = harness.provision().await;

    assert_eq!(report.reached, ProvisionState::StoreReady);
    let failure = report.failure.as_ref().unwrap();
    assert_eq!(failure.state, ProvisionState::SyncRequested);
    assert!(matches!(
        failure.error,
        ProvisionError::ResourceConflict {
            kind: ResourceKind::SyncRequest,
            ..
        }
    ));
    assert_eq!(failure.error.exit_code(), 3);
    assert!(failure.message.contains("billing/db-url"));

    let existing = harness
        .cloud
        .cluster
        .get_sync_request("default", "app-db-secret")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(existing.request.remote_key, "billing/db-url");
    // Only the identity and store steps wrote anything
    assert_eq!(harness.cloud.cluster.mutation_count(), mutations + 2);
}

#[tokio::test(start_paused = true)]
async fn test_unmanaged_secret_store_is_a_conflict() {
    let harness = Harness::new();
    harness.cloud.cluster.insert_store_binding(&harness.set.store, false);

    let report = harness.provision().await;

    assert_eq!(report.reached, ProvisionState::IdentityBound);
    let failure = report.failure.as_ref().unwrap();
    assert!(matches!(
        failure.error,
        ProvisionError::ResourceConflict {
            kind: ResourceKind::StoreBinding,
            ..
        }
    ));
    assert!(!failure.soft);
}

#[tokio::test(start_paused = true)]
async fn test_role_trusting_another_subject_is_a_conflict() {
    let harness = Harness::new();
    let mut other = harness.set.identity.clone();
    other.service_account = "billing-sa".to_string();
    harness.cloud.iam.insert_role(
        &harness.set.identity.role_name,
        &other.trust_policy(),
        &[],
    );

    let report = harness.provision().await;

    assert_eq!(report.reached, ProvisionState::PolicyReady);
    let failure = report.failure.as_ref().unwrap();
    assert!(matches!(
        failure.error,
        ProvisionError::ResourceConflict {
            kind: ResourceKind::IdentityBinding,
            ..
        }
    ));
    assert_eq!(
        harness
            .cloud
            .iam
            .role_trust_policy(&harness.set.identity.role_name)
            .unwrap(),
        other.trust_policy()
    );
}

#[tokio::test(start_paused = true)]
async fn test_role_with_additional_trusted_principal_is_a_conflict() {
    let harness = Harness::new();
    let identity = &harness.set.identity;
    let mut trust: serde_json::Value = serde_json::from_str(&identity.trust_policy()).unwrap();
    trust["Statement"].as_array_mut().unwrap().push(serde_json::json!({
        "Effect": "Allow",
        "Principal": {"AWS": "arn:aws:iam::999999999999:root"},
        "Action": "sts:AssumeRole"
    }));
    let trust = trust.to_string();
    let policy_arn = identity.policy_arn();
    harness
        .cloud
        .iam
        .insert_role(&identity.role_name, &trust, &[policy_arn.as_str()]);

    let report = harness.provision().await;

    assert_eq!(report.reached, ProvisionState::PolicyReady);
    let failure = report.failure.as_ref().unwrap();
    assert!(matches!(
        failure.error,
        ProvisionError::ResourceConflict {
            kind: ResourceKind::IdentityBinding,
            ..
        }
    ));
    assert_eq!(
        harness.cloud.iam.role_trust_policy(&identity.role_name).unwrap(),
        trust
    );
    assert!(harness.consumer_value().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_service_account_bound_elsewhere_is_a_conflict() {
    let harness = Harness::new();
    harness.cloud.cluster.insert_service_account(
        "default",
        "external-secrets-sa",
        Some(&format!("arn:aws:iam::{ACCOUNT_ID}:role/somebody-else")),
    );

    let report = harness.provision().await;

    let failure = report.failure.as_ref().unwrap();
    assert_eq!(failure.state, ProvisionState::IdentityBound);
    assert!(matches!(
        failure.error,
        ProvisionError::ResourceConflict {
            kind: ResourceKind::ServiceAccount,
            ..
        }
    ));
    assert_eq!(harness.cloud.iam.role_create_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_policy_with_wider_scope_is_a_conflict() {
    let harness = Harness::new();
    harness.cloud.iam.insert_policy(
        "app-db-url-read",
        &[r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Action":["secretsmanager:GetSecretValue","secretsmanager:DescribeSecret"],"Resource":"*"}]}"#],
    );

    let report = harness.provision().await;

    assert_eq!(report.reached, ProvisionState::Unprovisioned);
    let failure = report.failure.as_ref().unwrap();
    assert_eq!(failure.state, ProvisionState::PolicyReady);
    assert!(matches!(
        failure.error,
        ProvisionError::ResourceConflict {
            kind: ResourceKind::Policy,
            ..
        }
    ));
    assert_eq!(harness.cloud.iam.policy_version_calls(), 0);
}
