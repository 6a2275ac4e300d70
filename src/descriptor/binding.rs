//! # Store Binding and Sync Request
//!
//! Cluster-side descriptors: the namespaced secret-store binding that
//! authenticates as the identity binding's service account, and the sync
//! request mapping one upstream secret to one cluster secret key.

use crate::config::format_duration;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Secrets Manager service name understood by the sync operator
pub const SECRETS_MANAGER_SERVICE: &str = "SecretsManager";

/// Namespaced binding between an identity and the secret-store provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreBinding {
    pub name: String,
    pub namespace: String,
    pub region: String,
    #[serde(default = "default_service")]
    pub service: String,
    /// Service account carrying the identity binding
    pub service_account: String,
}

fn default_service() -> String {
    SECRETS_MANAGER_SERVICE.to_string()
}

impl StoreBinding {
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Maps an upstream secret to a cluster secret key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretSyncRequest {
    /// Cluster secret name; also the identity key of the request
    pub target_secret: String,
    pub namespace: String,
    pub store_name: String,
    /// Upstream secret name in the store
    pub remote_key: String,
    /// Key inside the cluster secret, e.g. `DATABASE_URL`
    pub target_key: String,
    #[serde(with = "duration_string")]
    pub refresh_interval: Duration,
}

impl SecretSyncRequest {
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.target_secret)
    }

    pub fn refresh_interval_string(&self) -> String {
        format_duration(self.refresh_interval)
    }
}

/// Observed state of a sync request, owned by the external operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason")]
pub enum SyncStatus {
    Pending,
    Synced,
    Error(String),
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Pending => f.write_str("Pending"),
            SyncStatus::Synced => f.write_str("Synced"),
            SyncStatus::Error(reason) => write!(f, "Error({reason})"),
        }
    }
}

mod duration_string {
    use crate::config::{format_duration, parse_duration};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
