//! Provisioning state machine.
//!
//! ```text
//! Unprovisioned -> PolicyReady -> IdentityBound -> StoreReady
//!               -> SyncRequested -> SecretSynced -> Verified
//! ```
//!
//! States are totally ordered; a run reports the highest state it verified.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ProvisionState {
    Unprovisioned,
    PolicyReady,
    IdentityBound,
    StoreReady,
    SyncRequested,
    SecretSynced,
    Verified,
}

impl ProvisionState {
    /// States that are reconciled and verified, in order
    pub const STEPS: [ProvisionState; 6] = [
        ProvisionState::PolicyReady,
        ProvisionState::IdentityBound,
        ProvisionState::StoreReady,
        ProvisionState::SyncRequested,
        ProvisionState::SecretSynced,
        ProvisionState::Verified,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProvisionState::Unprovisioned => "Unprovisioned",
            ProvisionState::PolicyReady => "PolicyReady",
            ProvisionState::IdentityBound => "IdentityBound",
            ProvisionState::StoreReady => "StoreReady",
            ProvisionState::SyncRequested => "SyncRequested",
            ProvisionState::SecretSynced => "SecretSynced",
            ProvisionState::Verified => "Verified",
        }
    }

    /// The state before this one in the pipeline
    pub fn previous(self) -> ProvisionState {
        match self {
            ProvisionState::Unprovisioned | ProvisionState::PolicyReady => {
                ProvisionState::Unprovisioned
            }
            ProvisionState::IdentityBound => ProvisionState::PolicyReady,
            ProvisionState::StoreReady => ProvisionState::IdentityBound,
            ProvisionState::SyncRequested => ProvisionState::StoreReady,
            ProvisionState::SecretSynced => ProvisionState::SyncRequested,
            ProvisionState::Verified => ProvisionState::SecretSynced,
        }
    }

    /// What a human should look at when this state does not converge
    pub fn diagnostics(self, namespace: &str, store: &str, target_secret: &str) -> Vec<String> {
        match self {
            ProvisionState::Unprovisioned => Vec::new(),
            ProvisionState::PolicyReady => vec![
                "aws iam get-policy --policy-arn <policy-arn>".to_string(),
                "IAM changes can take up to a minute to propagate".to_string(),
            ],
            ProvisionState::IdentityBound => vec![
                "aws iam get-role --role-name <role-name>".to_string(),
                "aws iam list-attached-role-policies --role-name <role-name>".to_string(),
                format!("kubectl get serviceaccount -n {namespace} -o yaml"),
            ],
            ProvisionState::StoreReady => vec![
                format!("kubectl describe secretstore {store} -n {namespace}"),
                "kubectl logs -n external-secrets deployment/external-secrets".to_string(),
            ],
            ProvisionState::SyncRequested | ProvisionState::SecretSynced => vec![
                format!("kubectl describe externalsecret {target_secret} -n {namespace}"),
                format!("kubectl get secret {target_secret} -n {namespace}"),
                "kubectl logs -n external-secrets deployment/external-secrets".to_string(),
            ],
            ProvisionState::Verified => vec![
                format!("kubectl get secret {target_secret} -n {namespace} -o jsonpath='{{.data}}'"),
                "Compare against the store with: aws secretsmanager describe-secret --secret-id <name>"
                    .to_string(),
            ],
        }
    }
}

impl std::fmt::Display for ProvisionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
