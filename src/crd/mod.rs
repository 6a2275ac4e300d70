//! # Custom Resource Definitions
//!
//! External Secrets Operator resources the provisioner manages:
//!
//! - `SecretStore`: realises a [`StoreBinding`]
//! - `ExternalSecret`: realises a [`SecretSyncRequest`]
//!
//! Only the fields this tool reads or writes are modelled; the operator
//! owns the full schema.
//!
//! # Example
//!
//! ```yaml
//! apiVersion: external-secrets.io/v1
//! kind: ExternalSecret
//! metadata:
//!   name: app-db-secret
//!   namespace: default
//!   labels:
//!     app.kubernetes.io/managed-by: provisionctl
//! spec:
//!   refreshInterval: 1h
//!   secretStoreRef:
//!     name: app-secret-store
//!     kind: SecretStore
//!   target:
//!     name: app-db-secret
//!     creationPolicy: Owner
//!   data:
//!     - secretKey: DATABASE_URL
//!       remoteRef:
//!         key: app/db-url
//! ```

mod status;

pub use status::{ready_condition, Condition};

use crate::config::parse_duration;
use crate::constants::{MANAGED_BY_LABEL, MANAGED_BY_VALUE};
use crate::descriptor::{SecretSyncRequest, StoreBinding, SyncStatus};
use crate::provider::Readiness;
use kube::api::ObjectMeta;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// SecretStore spec (namespaced provider binding)
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    kind = "SecretStore",
    group = "external-secrets.io",
    version = "v1",
    namespaced,
    status = "SecretStoreStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct SecretStoreSpec {
    pub provider: SecretStoreProvider,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretStoreProvider {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsProvider>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AwsProvider {
    pub service: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AwsAuth>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AwsAuth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt: Option<JwtAuth>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JwtAuth {
    pub service_account_ref: ServiceAccountRef,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountRef {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretStoreStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// ExternalSecret spec (one upstream key to one cluster secret key)
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    kind = "ExternalSecret",
    group = "external-secrets.io",
    version = "v1",
    namespaced,
    status = "ExternalSecretStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSecretSpec {
    pub refresh_interval: String,
    pub secret_store_ref: SecretStoreRef,
    pub target: ExternalSecretTarget,
    #[serde(default)]
    pub data: Vec<ExternalSecretData>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretStoreRef {
    pub name: String,
    #[serde(default = "default_store_kind")]
    pub kind: String,
}

fn default_store_kind() -> String {
    "SecretStore".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSecretTarget {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_policy: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSecretData {
    pub secret_key: String,
    pub remote_ref: RemoteRef,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRef {
    pub key: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSecretStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_time: Option<String>,
}

fn managed_metadata(name: &str, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(BTreeMap::from([(
            MANAGED_BY_LABEL.to_string(),
            MANAGED_BY_VALUE.to_string(),
        )])),
        ..Default::default()
    }
}

/// Whether a cluster object carries this tool's ownership label
pub fn is_managed<K: ResourceExt>(object: &K) -> bool {
    object
        .labels()
        .get(MANAGED_BY_LABEL)
        .is_some_and(|value| value == MANAGED_BY_VALUE)
}

impl From<&StoreBinding> for SecretStore {
    fn from(binding: &StoreBinding) -> Self {
        SecretStore {
            metadata: managed_metadata(&binding.name, &binding.namespace),
            spec: SecretStoreSpec {
                provider: SecretStoreProvider {
                    aws: Some(AwsProvider {
                        service: binding.service.clone(),
                        region: binding.region.clone(),
                        auth: Some(AwsAuth {
                            jwt: Some(JwtAuth {
                                service_account_ref: ServiceAccountRef {
                                    name: binding.service_account.clone(),
                                },
                            }),
                        }),
                    }),
                },
            },
            status: None,
        }
    }
}

impl SecretStore {
    /// Read the binding back; fields this tool does not set come back empty
    pub fn to_binding(&self) -> StoreBinding {
        let aws = self.spec.provider.aws.as_ref();
        StoreBinding {
            name: self.name_any(),
            namespace: self.namespace().unwrap_or_default(),
            region: aws.map(|a| a.region.clone()).unwrap_or_default(),
            service: aws.map(|a| a.service.clone()).unwrap_or_default(),
            service_account: aws
                .and_then(|a| a.auth.as_ref())
                .and_then(|auth| auth.jwt.as_ref())
                .map(|jwt| jwt.service_account_ref.name.clone())
                .unwrap_or_default(),
        }
    }

    pub fn readiness(&self) -> Readiness {
        let conditions = self
            .status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default();
        match ready_condition(conditions) {
            Some(c) if c.status == "True" => Readiness::Ready,
            Some(c) => Readiness::NotReady(
                c.message
                    .clone()
                    .or_else(|| c.reason.clone())
                    .unwrap_or_else(|| "not ready".to_string()),
            ),
            None => Readiness::Unknown,
        }
    }
}

impl From<&SecretSyncRequest> for ExternalSecret {
    fn from(request: &SecretSyncRequest) -> Self {
        ExternalSecret {
            metadata: managed_metadata(&request.target_secret, &request.namespace),
            spec: ExternalSecretSpec {
                refresh_interval: request.refresh_interval_string(),
                secret_store_ref: SecretStoreRef {
                    name: request.store_name.clone(),
                    kind: default_store_kind(),
                },
                target: ExternalSecretTarget {
                    name: request.target_secret.clone(),
                    creation_policy: Some("Owner".to_string()),
                },
                data: vec![ExternalSecretData {
                    secret_key: request.target_key.clone(),
                    remote_ref: RemoteRef {
                        key: request.remote_key.clone(),
                    },
                }],
            },
            status: None,
        }
    }
}

impl ExternalSecret {
    /// Read the request back; multi-key resources map their first entry
    pub fn to_request(&self) -> SecretSyncRequest {
        let first = self.spec.data.first();
        SecretSyncRequest {
            target_secret: self.spec.target.name.clone(),
            namespace: self.namespace().unwrap_or_default(),
            store_name: self.spec.secret_store_ref.name.clone(),
            remote_key: first.map(|d| d.remote_ref.key.clone()).unwrap_or_default(),
            target_key: first.map(|d| d.secret_key.clone()).unwrap_or_default(),
            refresh_interval: parse_duration(&self.spec.refresh_interval).unwrap_or_default(),
        }
    }

    /// Ready=True means the operator wrote the target secret
    pub fn sync_status(&self) -> SyncStatus {
        let conditions = self
            .status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default();
        match ready_condition(conditions) {
            Some(c) if c.status == "True" => SyncStatus::Synced,
            Some(c) if c.status == "False" => SyncStatus::Error(
                c.message
                    .clone()
                    .or_else(|| c.reason.clone())
                    .unwrap_or_else(|| "sync failed".to_string()),
            ),
            _ => SyncStatus::Pending,
        }
    }
}
