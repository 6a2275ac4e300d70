//! # Constants
//!
//! Default values shared by configuration, descriptors and the verifier.

/// Default Kubernetes namespace of the consumer workload
pub const DEFAULT_NAMESPACE: &str = "default";

/// Default AWS region
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default application prefix in the secret store
pub const DEFAULT_APP: &str = "app";

/// Default secret resource under the application prefix
pub const DEFAULT_SECRET_RESOURCE: &str = "db-url";

/// Default service account used by the secret-store binding
pub const DEFAULT_SERVICE_ACCOUNT: &str = "external-secrets-sa";

/// Default cluster secret created by the sync operator
pub const DEFAULT_CLUSTER_SECRET: &str = "app-db-secret";

/// Environment variable key the consumer reads at boot
pub const DEFAULT_SECRET_KEY: &str = "DATABASE_URL";

/// Default sync refresh interval (Kubernetes duration format)
pub const DEFAULT_REFRESH_INTERVAL: &str = "1h";

/// Readiness timeout for policies and identity bindings (seconds)
/// Trust stores propagate IAM changes within about a minute
pub const DEFAULT_IDENTITY_TIMEOUT_SECS: u64 = 60;

/// Readiness timeout for store bindings and sync status (seconds)
pub const DEFAULT_SYNC_TIMEOUT_SECS: u64 = 120;

/// Overall invocation timeout (seconds)
pub const DEFAULT_INVOCATION_TIMEOUT_SECS: u64 = 900;

/// Verifier backoff base (seconds)
pub const VERIFIER_BACKOFF_BASE_SECS: u64 = 2;

/// Verifier backoff cap (seconds)
pub const VERIFIER_BACKOFF_CAP_SECS: u64 = 30;

/// Verifier jitter ratio (±20%)
pub const VERIFIER_JITTER_RATIO: f64 = 0.2;

/// Extra slack added to the refresh interval when rotating passively (seconds)
pub const PASSIVE_REFRESH_SLACK_SECS: u64 = 60;

/// Attempts for transient provider failures before surfacing them
pub const DEFAULT_TRANSIENT_RETRY_ATTEMPTS: u32 = 5;

/// Audience of projected service account tokens exchanged with STS
pub const IRSA_AUDIENCE: &str = "sts.amazonaws.com";

/// Service account annotation consumed by the EKS pod identity webhook
pub const IRSA_ROLE_ANNOTATION: &str = "eks.amazonaws.com/role-arn";

/// Label marking cluster objects owned by this tool
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of the ownership label
pub const MANAGED_BY_VALUE: &str = "provisionctl";

/// Pod template annotation patched to trigger a rolling restart
pub const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

/// Field manager for server-side apply
pub const FIELD_MANAGER: &str = "provisionctl";

/// IAM keeps at most five versions of a managed policy
pub const MAX_POLICY_VERSIONS: usize = 5;

/// Secrets Manager actions granted to the identity binding
pub const DEFAULT_POLICY_ACTIONS: &[&str] = &[
    "secretsmanager:GetSecretValue",
    "secretsmanager:DescribeSecret",
];

/// Prefix of environment variables read by the configuration layer
pub const ENV_PREFIX: &str = "PROVISION_";
