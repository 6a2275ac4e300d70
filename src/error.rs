//! # Provisioning Errors
//!
//! Error taxonomy for the provisioning pipeline with classification of
//! retryable vs terminal failures.
//!
//! - `TransientUnavailable` is retried internally and only surfaces when retries exhaust
//! - `ResourceConflict` halts the run and requires manual resolution
//! - `PropagationTimeout` is a soft failure; re-running resumes
//! - `PreconditionUnmet` is rejected immediately

use crate::orchestrator::ProvisionState;
use serde::Serialize;
use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T, E = ProvisionError> = std::result::Result<T, E>;

/// Resource kinds managed by the provisioner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Secret,
    Policy,
    IdentityBinding,
    ServiceAccount,
    StoreBinding,
    SyncRequest,
    ClusterSecret,
    Workload,
}

impl ResourceKind {
    /// Label used in logs and metrics
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Secret => "secret",
            ResourceKind::Policy => "policy",
            ResourceKind::IdentityBinding => "identity_binding",
            ResourceKind::ServiceAccount => "service_account",
            ResourceKind::StoreBinding => "store_binding",
            ResourceKind::SyncRequest => "sync_request",
            ResourceKind::ClusterSecret => "cluster_secret",
            ResourceKind::Workload => "workload",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the reconciler, verifier, orchestrator and rotation controller
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Network failure or API throttling
    #[error("{operation} temporarily unavailable: {message}")]
    TransientUnavailable { operation: String, message: String },

    /// Existing resource is owned by an incompatible descriptor
    #[error("{kind} '{key}' conflicts with the desired state: {reason}")]
    ResourceConflict {
        kind: ResourceKind,
        key: String,
        reason: String,
    },

    /// Resource was created but is not yet observably ready
    #[error("timed out waiting for {state}; last observed: {last_observed}")]
    PropagationTimeout {
        state: ProvisionState,
        last_observed: String,
    },

    /// A dependency state was never reached
    #[error("operation requires state {required}, but only {reached} has been reached")]
    PreconditionUnmet {
        required: ProvisionState,
        reached: ProvisionState,
        message: String,
    },

    /// Descriptor violates a scoping or binding invariant
    #[error("invalid {kind} descriptor: {reason}")]
    InvalidDescriptor { kind: ResourceKind, reason: String },

    /// External cancellation or invocation deadline
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// Provider error that does not fit any other class
    #[error("{operation} failed: {source:#}")]
    Provider {
        operation: String,
        #[source]
        source: anyhow::Error,
    },
}

impl ProvisionError {
    pub fn transient(operation: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::TransientUnavailable {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub fn conflict(kind: ResourceKind, key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ResourceConflict {
            kind,
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid(kind: ResourceKind, reason: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            kind,
            reason: reason.into(),
        }
    }

    pub fn provider(operation: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Provider {
            operation: operation.into(),
            source: source.into(),
        }
    }

    /// Only transient failures are retried; everything else halts or is reported
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProvisionError::TransientUnavailable { .. })
    }

    /// Soft failures leave the pipeline resumable without manual intervention
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            ProvisionError::PropagationTimeout { .. } | ProvisionError::Cancelled(_)
        )
    }

    /// Get error kind string for metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisionError::TransientUnavailable { .. } => "transient_unavailable",
            ProvisionError::ResourceConflict { .. } => "resource_conflict",
            ProvisionError::PropagationTimeout { .. } => "propagation_timeout",
            ProvisionError::PreconditionUnmet { .. } => "precondition_unmet",
            ProvisionError::InvalidDescriptor { .. } => "invalid_descriptor",
            ProvisionError::Cancelled(_) => "cancelled",
            ProvisionError::Provider { .. } => "provider",
        }
    }

    /// Process exit code for a run that stopped on this error
    pub fn exit_code(&self) -> u8 {
        match self {
            ProvisionError::ResourceConflict { .. } => 3,
            ProvisionError::PreconditionUnmet { .. } => 4,
            _ if self.is_soft() => 2,
            _ => 1,
        }
    }

    /// Get remediation guidance for this error
    pub fn remediation(&self) -> String {
        match self {
            ProvisionError::TransientUnavailable { .. } => {
                "The cloud or cluster API is throttling or unreachable. Re-run the command; completed states are skipped.".to_string()
            }
            ProvisionError::ResourceConflict { kind, key, .. } => format!(
                "{kind} '{key}' already exists with an incompatible definition. Inspect it, then delete or rename it manually; this tool never overwrites foreign resources."
            ),
            ProvisionError::PropagationTimeout { .. } => {
                "The resource was created but is not ready yet. It may still converge; re-run `provisionctl verify` or `provisionctl provision` to resume.".to_string()
            }
            ProvisionError::PreconditionUnmet { required, .. } => format!(
                "Run `provisionctl provision` until it reaches {required} before retrying this operation."
            ),
            ProvisionError::InvalidDescriptor { .. } => {
                "Fix the descriptor so the policy stays inside the application's secret namespace and the trust subject names exactly one service account.".to_string()
            }
            ProvisionError::Cancelled(_) => {
                "The run was interrupted. Re-running resumes from the last completed state.".to_string()
            }
            ProvisionError::Provider { .. } => {
                "Check credentials and permissions for the cloud account and cluster context in use.".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(ProvisionError::transient("iam.get_role", "Throttling").is_retryable());
        assert!(!ProvisionError::conflict(ResourceKind::Policy, "p", "scope").is_retryable());
        assert!(!ProvisionError::Cancelled("ctrl-c".to_string()).is_retryable());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            ProvisionError::conflict(ResourceKind::SyncRequest, "default/app-db-secret", "repoint")
                .exit_code(),
            3
        );
        assert_eq!(
            ProvisionError::PreconditionUnmet {
                required: ProvisionState::SecretSynced,
                reached: ProvisionState::IdentityBound,
                message: String::new(),
            }
            .exit_code(),
            4
        );
        assert_eq!(ProvisionError::Cancelled("ctrl-c".to_string()).exit_code(), 2);
        assert_eq!(ProvisionError::transient("iam.get_role", "Throttling").exit_code(), 1);
    }

    #[test]
    fn test_soft_failures() {
        let timeout = ProvisionError::PropagationTimeout {
            state: ProvisionState::StoreReady,
            last_observed: "Ready=False".to_string(),
        };
        assert!(timeout.is_soft());
        assert!(!ProvisionError::invalid(ResourceKind::Policy, "wildcard").is_soft());
    }

    #[test]
    fn test_conflict_message_names_resource() {
        let err = ProvisionError::conflict(
            ResourceKind::SyncRequest,
            "apps/app-db-secret",
            "remote key differs",
        );
        assert_eq!(
            err.to_string(),
            "sync_request 'apps/app-db-secret' conflicts with the desired state: remote key differs"
        );
        assert!(err.remediation().contains("apps/app-db-secret"));
        assert_eq!(err.as_str(), "resource_conflict");
    }
}
