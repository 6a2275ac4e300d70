//! # Resource Descriptor Set
//!
//! Declarative target state for one credential pipeline:
//!
//! ```text
//! SecretDescriptor ─┐
//! PolicyDescriptor ─┴─> IdentityBinding ─> StoreBinding ─> SecretSyncRequest
//! ```
//!
//! A set is derived from the resolved configuration or loaded from YAML, and
//! is validated as a whole before any reconcile call is made.
//!
//! ```yaml
//! secret:
//!   name: app/db-url
//!   region: us-east-1
//!   cluster: tiles
//! policy:
//!   name: app-db-url-read
//!   actions: [secretsmanager:GetSecretValue, secretsmanager:DescribeSecret]
//!   resourcePattern: arn:aws:secretsmanager:us-east-1:123456789012:secret:app/db-url-*
//! identity:
//!   namespace: default
//!   serviceAccount: external-secrets-sa
//!   roleName: tiles-default-external-secrets-sa
//!   accountId: "123456789012"
//!   oidcIssuer: oidc.eks.us-east-1.amazonaws.com/id/ABC
//!   policyName: app-db-url-read
//! store:
//!   name: app-secret-store
//!   namespace: default
//!   region: us-east-1
//!   serviceAccount: external-secrets-sa
//! sync:
//!   targetSecret: app-db-secret
//!   namespace: default
//!   storeName: app-secret-store
//!   remoteKey: app/db-url
//!   targetKey: DATABASE_URL
//!   refreshInterval: 1h
//! ```

mod binding;
mod identity;
mod policy;
mod secret;

pub use binding::{SecretSyncRequest, StoreBinding, SyncStatus, SECRETS_MANAGER_SERVICE};
pub use identity::{parse_trust_policy, IdentityBinding, TrustCondition, TrustMatch};
pub use policy::{parse_statements, PolicyDescriptor, PolicyStatement};
pub use secret::{ContentHash, SecretDescriptor, SecretName, SecretValue};

use crate::config::ProvisionerConfig;
use crate::constants::{DEFAULT_POLICY_ACTIONS, IRSA_AUDIENCE};
use crate::error::{ProvisionError, ResourceKind};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Complete desired state for one pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorSet {
    pub secret: SecretDescriptor,
    pub policy: PolicyDescriptor,
    pub identity: IdentityBinding,
    pub store: StoreBinding,
    pub sync: SecretSyncRequest,
}

impl DescriptorSet {
    /// Derive the descriptor set from configuration and the discovered account
    pub fn from_config(
        config: &ProvisionerConfig,
        account_id: &str,
        oidc_issuer: &str,
    ) -> Result<Self, ProvisionError> {
        let name = config.secret_name.clone();
        let resource_pattern = format!(
            "{}{}-*",
            PolicyDescriptor::scope_prefix(&config.region, account_id, name.app()),
            name.resource()
        );

        let set = Self {
            secret: SecretDescriptor {
                name: name.clone(),
                region: config.region.clone(),
                cluster: config.cluster.clone(),
                value: None,
            },
            policy: PolicyDescriptor {
                name: config.policy_name.clone(),
                actions: DEFAULT_POLICY_ACTIONS
                    .iter()
                    .map(|action| (*action).to_string())
                    .collect(),
                resource_pattern,
            },
            identity: IdentityBinding {
                namespace: config.namespace.clone(),
                service_account: config.service_account.clone(),
                role_name: config.role_name.clone(),
                account_id: account_id.to_string(),
                oidc_issuer: IdentityBinding::normalize_issuer(oidc_issuer),
                audience: IRSA_AUDIENCE.to_string(),
                policy_name: config.policy_name.clone(),
            },
            store: StoreBinding {
                name: config.store_name.clone(),
                namespace: config.namespace.clone(),
                region: config.region.clone(),
                service: SECRETS_MANAGER_SERVICE.to_string(),
                service_account: config.service_account.clone(),
            },
            sync: SecretSyncRequest {
                target_secret: config.cluster_secret.clone(),
                namespace: config.namespace.clone(),
                store_name: config.store_name.clone(),
                remote_key: name.to_string(),
                target_key: config.secret_key.clone(),
                refresh_interval: config.refresh_interval,
            },
        };
        set.validate()?;
        Ok(set)
    }

    /// Load a descriptor set from a YAML file
    pub fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read descriptor file {}", path.display()))?;
        let set: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("Failed to parse descriptor file {}", path.display()))?;
        set.validate()?;
        Ok(set)
    }

    /// Check each descriptor and the links between them
    pub fn validate(&self) -> Result<(), ProvisionError> {
        self.policy.validate(
            &self.secret.region,
            &self.identity.account_id,
            self.secret.name.app(),
        )?;
        self.identity.validate()?;

        let link = |kind: ResourceKind, ok: bool, reason: String| {
            if ok {
                Ok(())
            } else {
                Err(ProvisionError::invalid(kind, reason))
            }
        };
        link(
            ResourceKind::IdentityBinding,
            self.identity.policy_name == self.policy.name,
            format!(
                "identity binding attaches policy '{}' but the policy descriptor is '{}'",
                self.identity.policy_name, self.policy.name
            ),
        )?;
        link(
            ResourceKind::StoreBinding,
            self.store.namespace == self.identity.namespace
                && self.store.service_account == self.identity.service_account,
            format!(
                "store binding authenticates as {}/{} which is not the bound identity {}/{}",
                self.store.namespace,
                self.store.service_account,
                self.identity.namespace,
                self.identity.service_account
            ),
        )?;
        link(
            ResourceKind::StoreBinding,
            self.store.region == self.secret.region,
            format!(
                "store binding region '{}' differs from secret region '{}'",
                self.store.region, self.secret.region
            ),
        )?;
        link(
            ResourceKind::SyncRequest,
            self.sync.store_name == self.store.name && self.sync.namespace == self.store.namespace,
            format!(
                "sync request references store '{}' but the store binding is '{}'",
                self.sync.store_name,
                self.store.key()
            ),
        )?;
        link(
            ResourceKind::SyncRequest,
            self.sync.remote_key == self.secret.name.to_string(),
            format!(
                "sync request reads '{}' but the secret descriptor is '{}'",
                self.sync.remote_key, self.secret.name
            ),
        )?;
        link(
            ResourceKind::SyncRequest,
            !self.sync.target_key.is_empty(),
            "sync request target key is empty".to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigOverrides;

    fn config() -> ProvisionerConfig {
        ProvisionerConfig::resolve([ConfigOverrides {
            cluster: Some("tiles".to_string()),
            namespace: Some("tiles".to_string()),
            ..Default::default()
        }])
        .unwrap()
    }

    #[test]
    fn test_from_config_links_descriptors() {
        let set = DescriptorSet::from_config(
            &config(),
            "123456789012",
            "https://oidc.eks.us-east-1.amazonaws.com/id/ABC",
        )
        .unwrap();

        assert_eq!(
            set.policy.resource_pattern,
            "arn:aws:secretsmanager:us-east-1:123456789012:secret:app/db-url-*"
        );
        assert_eq!(set.identity.oidc_issuer, "oidc.eks.us-east-1.amazonaws.com/id/ABC");
        assert_eq!(set.sync.remote_key, "app/db-url");
        assert_eq!(set.sync.target_secret, "app-db-secret");
        assert_eq!(set.sync.target_key, "DATABASE_URL");
        assert_eq!(set.store.service_account, set.identity.service_account);
    }

    #[test]
    fn test_broken_links_rejected() {
        let mut set = DescriptorSet::from_config(&config(), "123456789012", "oidc.example/id/1")
            .unwrap();
        set.sync.remote_key = "other/db-url".to_string();
        assert!(matches!(
            set.validate(),
            Err(ProvisionError::InvalidDescriptor {
                kind: ResourceKind::SyncRequest,
                ..
            })
        ));
    }

    #[test]
    fn test_yaml_round_trip_from_file() {
        let set = DescriptorSet::from_config(&config(), "123456789012", "oidc.example/id/1")
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("descriptors.yaml");
        std::fs::write(&path, serde_yaml::to_string(&set).unwrap()).unwrap();

        let loaded = DescriptorSet::from_yaml_file(&path).unwrap();
        assert_eq!(loaded.policy, set.policy);
        assert_eq!(loaded.identity, set.identity);
        assert_eq!(loaded.sync, set.sync);
        assert!(loaded.secret.value.is_none());
    }

    #[test]
    fn test_yaml_with_widened_scope_rejected() {
        let set = DescriptorSet::from_config(&config(), "123456789012", "oidc.example/id/1")
            .unwrap();
        let yaml = serde_yaml::to_string(&set).unwrap().replace(
            "secret:app/db-url-*",
            "secret:*",
        );
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("descriptors.yaml");
        std::fs::write(&path, yaml).unwrap();
        assert!(DescriptorSet::from_yaml_file(&path).is_err());
    }
}
