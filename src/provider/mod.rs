//! # Providers
//!
//! Trait seams for the external systems the orchestrator drives:
//!
//! - [`SecretStoreProvider`]: the cloud secret store (AWS Secrets Manager)
//! - [`PolicyProvider`]: managed access policies (IAM)
//! - [`IdentityProvider`]: roles trusted through the cluster's OIDC issuer (IAM)
//! - [`ClusterApi`]: service accounts, sync-operator resources, secrets and workloads (Kubernetes)
//!
//! Implementations:
//!
//! - `aws`: official AWS Rust SDK clients
//! - `cluster`: kube-rs client against the External Secrets Operator CRDs
//! - `memory`: in-process fakes that simulate the sync operator, used by tests

pub mod aws;
pub mod cluster;
pub mod memory;

use crate::descriptor::{
    PolicyStatement, SecretName, SecretSyncRequest, SecretValue, StoreBinding, SyncStatus,
    TrustCondition,
};
use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Result of a create call; concurrent runs may have created the resource first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Secret metadata from the store; never carries the value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretMetadata {
    pub name: String,
    pub arn: String,
}

/// Managed policy as currently stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedPolicy {
    pub arn: String,
    pub default_version: String,
    pub statements: Vec<PolicyStatement>,
    /// Non-default versions, oldest first
    pub other_versions: Vec<String>,
}

/// IAM role as currently stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedRole {
    pub arn: String,
    pub trust: Vec<TrustCondition>,
    pub attached_policies: BTreeSet<String>,
}

/// Service account as currently stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedServiceAccount {
    pub role_arn: Option<String>,
}

/// Readiness reported by a controller-owned status condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotReady(String),
    Unknown,
}

impl std::fmt::Display for Readiness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Readiness::Ready => f.write_str("Ready"),
            Readiness::NotReady(reason) => write!(f, "NotReady({reason})"),
            Readiness::Unknown => f.write_str("Unknown"),
        }
    }
}

/// Store binding as currently stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedStoreBinding {
    pub binding: StoreBinding,
    pub managed: bool,
    pub readiness: Readiness,
}

/// Sync request as currently stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedSyncRequest {
    pub request: SecretSyncRequest,
    pub managed: bool,
    pub status: SyncStatus,
}

/// Cluster-local secret snapshot
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClusterSecret {
    pub data: BTreeMap<String, Vec<u8>>,
    pub labels: BTreeMap<String, String>,
    pub owner_references: Vec<OwnerReference>,
}

impl ClusterSecret {
    pub fn key_hash(&self, key: &str) -> Option<crate::descriptor::ContentHash> {
        self.data
            .get(key)
            .map(|bytes| crate::descriptor::ContentHash::of(bytes))
    }
}

/// Cloud secret store keyed by hierarchical name
#[async_trait]
pub trait SecretStoreProvider: Send + Sync {
    async fn describe_secret(&self, name: &SecretName) -> Result<Option<SecretMetadata>>;

    async fn create_secret(&self, name: &SecretName, value: &SecretValue)
        -> Result<CreateOutcome>;

    /// Write a new value under an existing name
    async fn put_secret_value(&self, name: &SecretName, value: &SecretValue) -> Result<()>;

    async fn read_secret_value(&self, name: &SecretName) -> Result<SecretValue>;
}

/// Managed policy store keyed by policy ARN
#[async_trait]
pub trait PolicyProvider: Send + Sync {
    async fn get_policy(&self, arn: &str) -> Result<Option<ObservedPolicy>>;

    async fn create_policy(&self, name: &str, document: &str) -> Result<CreateOutcome>;

    /// Add a version and make it the default
    async fn create_policy_version(&self, arn: &str, document: &str) -> Result<()>;

    async fn delete_policy_version(&self, arn: &str, version_id: &str) -> Result<()>;
}

/// Federated role store keyed by role name
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn get_role(&self, name: &str) -> Result<Option<ObservedRole>>;

    async fn create_role(&self, name: &str, trust_policy: &str) -> Result<CreateOutcome>;

    async fn update_trust_policy(&self, name: &str, trust_policy: &str) -> Result<()>;

    async fn attach_policy(&self, role_name: &str, policy_arn: &str) -> Result<()>;
}

/// Kubernetes objects the pipeline touches
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ObservedServiceAccount>>;

    /// Create or annotate the service account with the role ARN
    async fn apply_service_account(&self, namespace: &str, name: &str, role_arn: &str)
        -> Result<()>;

    async fn get_store_binding(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ObservedStoreBinding>>;

    async fn apply_store_binding(&self, binding: &StoreBinding) -> Result<()>;

    async fn get_sync_request(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ObservedSyncRequest>>;

    async fn apply_sync_request(&self, request: &SecretSyncRequest) -> Result<()>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<ClusterSecret>>;

    /// Delete the cluster-local copy; the sync operator recreates it
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()>;

    /// Recreate a secret from a snapshot
    async fn restore_secret(&self, namespace: &str, name: &str, secret: &ClusterSecret)
        -> Result<()>;

    /// Trigger a rolling restart of a Deployment
    async fn restart_workload(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Cloud account facts needed to build ARNs and the trust policy
#[async_trait]
pub trait AccountResolver: Send + Sync {
    async fn account_id(&self) -> Result<String>;

    async fn oidc_issuer(&self, cluster: &str) -> Result<String>;
}

/// The set of providers one invocation works against
#[derive(Clone)]
pub struct Providers {
    pub secrets: Arc<dyn SecretStoreProvider>,
    pub policies: Arc<dyn PolicyProvider>,
    pub identities: Arc<dyn IdentityProvider>,
    pub cluster: Arc<dyn ClusterApi>,
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Providers").finish_non_exhaustive()
    }
}
