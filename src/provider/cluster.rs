//! # Kubernetes Cluster API
//!
//! [`ClusterApi`] over kube-rs. Service accounts, SecretStores and
//! ExternalSecrets are written with server-side apply under the
//! `provisionctl` field manager, so re-applying an unchanged descriptor is a
//! no-op on the API server. Workload restarts patch the pod template's
//! `restartedAt` annotation the same way `kubectl rollout restart` does.

use super::{
    ClusterApi, ClusterSecret, ObservedServiceAccount, ObservedStoreBinding,
    ObservedSyncRequest,
};
use crate::constants::{FIELD_MANAGER, IRSA_ROLE_ANNOTATION, RESTARTED_AT_ANNOTATION};
use crate::crd::{is_managed, ExternalSecret, SecretStore};
use crate::descriptor::{SecretSyncRequest, StoreBinding};
use crate::error::{ProvisionError, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{DeleteParams, Patch, PatchParams};
use kube::{Api, Client};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::fmt::Debug;
use tracing::{debug, info};

/// Map kube client errors onto the provisioning taxonomy
fn classify(operation: &str, error: kube::Error) -> ProvisionError {
    match &error {
        kube::Error::Api(api_err) if api_err.code == 429 || api_err.code >= 500 => {
            ProvisionError::transient(operation, format!("{} ({})", api_err.message, api_err.code))
        }
        kube::Error::HyperError(_) | kube::Error::Service(_) => {
            ProvisionError::transient(operation, error.to_string())
        }
        _ => ProvisionError::provider(operation, anyhow::Error::new(error)),
    }
}

async fn get_optional<K>(api: &Api<K>, name: &str, operation: &str) -> Result<Option<K>>
where
    K: Clone + DeserializeOwned + Debug,
{
    match api.get(name).await {
        Ok(object) => Ok(Some(object)),
        Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(None),
        Err(e) => Err(classify(operation, e)),
    }
}

/// Cluster access through the current kubeconfig context
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl std::fmt::Debug for KubeCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeCluster").finish_non_exhaustive()
    }
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Infer the client from the environment (in-cluster or kubeconfig)
    pub async fn try_default() -> anyhow::Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {e}"))?;
        Ok(Self::new(client))
    }

    fn apply_params() -> PatchParams {
        PatchParams::apply(FIELD_MANAGER).force()
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ObservedServiceAccount>> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let account = get_optional(&api, name, "cluster.get_service_account").await?;
        Ok(account.map(|sa| ObservedServiceAccount {
            role_arn: sa
                .metadata
                .annotations
                .and_then(|annotations| annotations.get(IRSA_ROLE_ANNOTATION).cloned()),
        }))
    }

    async fn apply_service_account(&self, namespace: &str, name: &str, role_arn: &str) -> Result<()> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({
            "apiVersion": "v1",
            "kind": "ServiceAccount",
            "metadata": {
                "name": name,
                "namespace": namespace,
                "annotations": { IRSA_ROLE_ANNOTATION: role_arn }
            }
        });
        api.patch(name, &Self::apply_params(), &Patch::Apply(patch))
            .await
            .map_err(|e| classify("cluster.apply_service_account", e))?;
        debug!("Applied service account {}/{} -> {}", namespace, name, role_arn);
        Ok(())
    }

    async fn get_store_binding(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ObservedStoreBinding>> {
        let api: Api<SecretStore> = Api::namespaced(self.client.clone(), namespace);
        let store = get_optional(&api, name, "cluster.get_store_binding").await?;
        Ok(store.map(|store| ObservedStoreBinding {
            binding: store.to_binding(),
            managed: is_managed(&store),
            readiness: store.readiness(),
        }))
    }

    async fn apply_store_binding(&self, binding: &StoreBinding) -> Result<()> {
        let api: Api<SecretStore> = Api::namespaced(self.client.clone(), &binding.namespace);
        api.patch(
            &binding.name,
            &Self::apply_params(),
            &Patch::Apply(SecretStore::from(binding)),
        )
        .await
        .map_err(|e| classify("cluster.apply_store_binding", e))?;
        debug!("Applied SecretStore {}", binding.key());
        Ok(())
    }

    async fn get_sync_request(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ObservedSyncRequest>> {
        let api: Api<ExternalSecret> = Api::namespaced(self.client.clone(), namespace);
        let external = get_optional(&api, name, "cluster.get_sync_request").await?;
        Ok(external.map(|external| ObservedSyncRequest {
            request: external.to_request(),
            managed: is_managed(&external),
            status: external.sync_status(),
        }))
    }

    async fn apply_sync_request(&self, request: &SecretSyncRequest) -> Result<()> {
        let api: Api<ExternalSecret> = Api::namespaced(self.client.clone(), &request.namespace);
        api.patch(
            &request.target_secret,
            &Self::apply_params(),
            &Patch::Apply(ExternalSecret::from(request)),
        )
        .await
        .map_err(|e| classify("cluster.apply_sync_request", e))?;
        debug!("Applied ExternalSecret {}", request.key());
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<ClusterSecret>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = get_optional(&api, name, "cluster.get_secret").await?;
        Ok(secret.map(|secret| ClusterSecret {
            data: secret
                .data
                .unwrap_or_default()
                .into_iter()
                .map(|(key, bytes)| (key, bytes.0))
                .collect(),
            labels: secret.metadata.labels.unwrap_or_default(),
            owner_references: secret.metadata.owner_references.unwrap_or_default(),
        }))
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!("Deleted secret {}/{} for re-sync", namespace, name);
                Ok(())
            }
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(()),
            Err(e) => Err(classify("cluster.delete_secret", e)),
        }
    }

    async fn restore_secret(&self, namespace: &str, name: &str, secret: &ClusterSecret) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let restored = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: (!secret.labels.is_empty()).then(|| secret.labels.clone()),
                owner_references: (!secret.owner_references.is_empty())
                    .then(|| secret.owner_references.clone()),
                ..Default::default()
            },
            data: Some(
                secret
                    .data
                    .iter()
                    .map(|(key, bytes)| (key.clone(), ByteString(bytes.clone())))
                    .collect(),
            ),
            type_: Some("Opaque".to_string()),
            ..Default::default()
        };
        api.patch(name, &Self::apply_params(), &Patch::Apply(restored))
            .await
            .map_err(|e| classify("cluster.restore_secret", e))?;
        info!("Restored secret {}/{} from snapshot", namespace, name);
        Ok(())
    }

    async fn restart_workload(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({
            "spec": {
                "template": {
                    "metadata": {
                        "annotations": {
                            RESTARTED_AT_ANNOTATION: chrono::Utc::now().to_rfc3339()
                        }
                    }
                }
            }
        });
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
            .await
            .map_err(|e| classify("cluster.restart_workload", e))?;
        info!("Triggered rolling restart of deployment {}/{}", namespace, name);
        Ok(())
    }
}
