//! # Provisioner Configuration
//!
//! One immutable configuration struct threaded through the orchestrator and
//! the rotation controller.
//!
//! Layers are applied in order, later layers win:
//!
//! 1. Built-in defaults (`constants`)
//! 2. `.env` file in the working directory (optional)
//! 3. `PROVISION_*` environment variables
//! 4. Command-line flags

mod duration;

pub use duration::{format_duration, parse_duration};

use crate::constants::{
    DEFAULT_APP, DEFAULT_CLUSTER_SECRET, DEFAULT_IDENTITY_TIMEOUT_SECS,
    DEFAULT_INVOCATION_TIMEOUT_SECS, DEFAULT_NAMESPACE, DEFAULT_REFRESH_INTERVAL, DEFAULT_REGION,
    DEFAULT_SECRET_KEY, DEFAULT_SECRET_RESOURCE, DEFAULT_SERVICE_ACCOUNT,
    DEFAULT_SYNC_TIMEOUT_SECS, ENV_PREFIX,
};
use crate::descriptor::SecretName;
use anyhow::{Context, Result};
use std::time::Duration;

/// Resolved configuration for one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionerConfig {
    /// EKS cluster name
    pub cluster: String,
    /// AWS region of the secret store and cluster
    pub region: String,
    /// Namespace of the consumer, service account and cluster resources
    pub namespace: String,
    /// Logical secret name `<app>/<resource>`
    pub secret_name: SecretName,
    /// Service account the secret-store binding authenticates as
    pub service_account: String,
    /// Cluster-local secret created by the sync operator
    pub cluster_secret: String,
    /// Key inside the cluster secret exposed to the consumer
    pub secret_key: String,
    /// Consumer Deployment restarted after a rotation
    pub consumer: Option<String>,
    /// OIDC issuer of the cluster; looked up from EKS when absent
    pub oidc_issuer: Option<String>,
    /// IAM policy name; defaults to `<app>-<resource>-read`
    pub policy_name: String,
    /// IAM role name; defaults to `<cluster>-<namespace>-<service account>`
    pub role_name: String,
    /// SecretStore name; defaults to `<app>-secret-store`
    pub store_name: String,
    /// Sync refresh interval
    pub refresh_interval: Duration,
    /// Readiness timeout for policy and identity binding
    pub identity_timeout: Duration,
    /// Readiness timeout for store binding and sync status
    pub sync_timeout: Duration,
    /// Overall deadline for the invocation
    pub invocation_timeout: Duration,
}

/// One configuration layer; unset fields fall through to the previous layer
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub cluster: Option<String>,
    pub region: Option<String>,
    pub namespace: Option<String>,
    pub secret_name: Option<String>,
    pub service_account: Option<String>,
    pub cluster_secret: Option<String>,
    pub secret_key: Option<String>,
    pub consumer: Option<String>,
    pub oidc_issuer: Option<String>,
    pub policy_name: Option<String>,
    pub role_name: Option<String>,
    pub store_name: Option<String>,
    pub refresh_interval: Option<String>,
    pub identity_timeout: Option<String>,
    pub sync_timeout: Option<String>,
    pub invocation_timeout: Option<String>,
}

impl ConfigOverrides {
    /// Read the `PROVISION_*` environment layer
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    /// Build a layer from an arbitrary key lookup (keys without prefix)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            cluster: get("CLUSTER"),
            region: get("REGION"),
            namespace: get("NAMESPACE"),
            secret_name: get("SECRET_NAME"),
            service_account: get("SERVICE_ACCOUNT"),
            cluster_secret: get("CLUSTER_SECRET"),
            secret_key: get("SECRET_KEY"),
            consumer: get("CONSUMER"),
            oidc_issuer: get("OIDC_ISSUER"),
            policy_name: get("POLICY_NAME"),
            role_name: get("ROLE_NAME"),
            store_name: get("STORE_NAME"),
            refresh_interval: get("REFRESH_INTERVAL"),
            identity_timeout: get("IDENTITY_TIMEOUT"),
            sync_timeout: get("SYNC_TIMEOUT"),
            invocation_timeout: get("TIMEOUT"),
        }
    }

    fn merge(self, over: ConfigOverrides) -> ConfigOverrides {
        ConfigOverrides {
            cluster: over.cluster.or(self.cluster),
            region: over.region.or(self.region),
            namespace: over.namespace.or(self.namespace),
            secret_name: over.secret_name.or(self.secret_name),
            service_account: over.service_account.or(self.service_account),
            cluster_secret: over.cluster_secret.or(self.cluster_secret),
            secret_key: over.secret_key.or(self.secret_key),
            consumer: over.consumer.or(self.consumer),
            oidc_issuer: over.oidc_issuer.or(self.oidc_issuer),
            policy_name: over.policy_name.or(self.policy_name),
            role_name: over.role_name.or(self.role_name),
            store_name: over.store_name.or(self.store_name),
            refresh_interval: over.refresh_interval.or(self.refresh_interval),
            identity_timeout: over.identity_timeout.or(self.identity_timeout),
            sync_timeout: over.sync_timeout.or(self.sync_timeout),
            invocation_timeout: over.invocation_timeout.or(self.invocation_timeout),
        }
    }
}

/// Load the optional `.env` file so its entries join the environment layer
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!("Loaded configuration defaults from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!("Ignoring unreadable .env file: {}", e),
    }
}

impl ProvisionerConfig {
    /// Resolve layers on top of the built-in defaults
    pub fn resolve(layers: impl IntoIterator<Item = ConfigOverrides>) -> Result<Self> {
        let merged = layers
            .into_iter()
            .fold(ConfigOverrides::default(), ConfigOverrides::merge);

        let cluster = merged.cluster.context(
            "cluster identifier is required (--cluster or PROVISION_CLUSTER)",
        )?;
        let namespace = merged
            .namespace
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        let secret_name: SecretName = merged
            .secret_name
            .as_deref()
            .unwrap_or(&format!("{DEFAULT_APP}/{DEFAULT_SECRET_RESOURCE}"))
            .parse()?;
        let service_account = merged
            .service_account
            .unwrap_or_else(|| DEFAULT_SERVICE_ACCOUNT.to_string());

        let policy_name = merged.policy_name.unwrap_or_else(|| {
            format!("{}-{}-read", secret_name.app(), secret_name.resource())
        });
        let role_name = merged
            .role_name
            .unwrap_or_else(|| format!("{cluster}-{namespace}-{service_account}"));
        let store_name = merged
            .store_name
            .unwrap_or_else(|| format!("{}-secret-store", secret_name.app()));

        let refresh_interval = parse_duration(
            merged
                .refresh_interval
                .as_deref()
                .unwrap_or(DEFAULT_REFRESH_INTERVAL),
        )
        .context("invalid refresh interval")?;
        let identity_timeout =
            duration_or(merged.identity_timeout.as_deref(), DEFAULT_IDENTITY_TIMEOUT_SECS)
                .context("invalid identity timeout")?;
        let sync_timeout = duration_or(merged.sync_timeout.as_deref(), DEFAULT_SYNC_TIMEOUT_SECS)
            .context("invalid sync timeout")?;
        let invocation_timeout = duration_or(
            merged.invocation_timeout.as_deref(),
            DEFAULT_INVOCATION_TIMEOUT_SECS,
        )
        .context("invalid invocation timeout")?;

        Ok(Self {
            cluster,
            region: merged.region.unwrap_or_else(|| DEFAULT_REGION.to_string()),
            namespace,
            secret_name,
            service_account,
            cluster_secret: merged
                .cluster_secret
                .unwrap_or_else(|| DEFAULT_CLUSTER_SECRET.to_string()),
            secret_key: merged
                .secret_key
                .unwrap_or_else(|| DEFAULT_SECRET_KEY.to_string()),
            consumer: merged.consumer,
            oidc_issuer: merged.oidc_issuer,
            policy_name,
            role_name,
            store_name,
            refresh_interval,
            identity_timeout,
            sync_timeout,
            invocation_timeout,
        })
    }
}

fn duration_or(value: Option<&str>, default_secs: u64) -> Result<Duration> {
    value.map_or(Ok(Duration::from_secs(default_secs)), parse_duration)
}
