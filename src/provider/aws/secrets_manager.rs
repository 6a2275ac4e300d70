//! # AWS Secrets Manager
//!
//! [`SecretStoreProvider`] over the official SDK. Secrets are addressed by
//! their `<app>/<resource>` name; values only ever travel as `SecretString`.

use super::errors::{classify, is_code};
use crate::constants::{MANAGED_BY_LABEL, MANAGED_BY_VALUE};
use crate::descriptor::{SecretName, SecretValue};
use crate::error::{ProvisionError, Result};
use crate::provider::{CreateOutcome, SecretMetadata, SecretStoreProvider};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_secretsmanager::types::Tag;
use aws_sdk_secretsmanager::Client as SecretsManagerClient;
use tracing::{debug, info};

const NOT_FOUND: &[&str] = &["ResourceNotFoundException"];
const ALREADY_EXISTS: &[&str] = &["ResourceExistsException"];

/// AWS Secrets Manager provider implementation
#[derive(Clone)]
pub struct AwsSecretsManager {
    client: SecretsManagerClient,
}

impl std::fmt::Debug for AwsSecretsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsSecretsManager").finish_non_exhaustive()
    }
}

impl AwsSecretsManager {
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self {
            client: SecretsManagerClient::new(sdk_config),
        }
    }
}

#[async_trait]
impl SecretStoreProvider for AwsSecretsManager {
    async fn describe_secret(&self, name: &SecretName) -> Result<Option<SecretMetadata>> {
        match self
            .client
            .describe_secret()
            .secret_id(name.to_string())
            .send()
            .await
        {
            Ok(output) => Ok(Some(SecretMetadata {
                name: output.name().unwrap_or_default().to_string(),
                arn: output.arn().unwrap_or_default().to_string(),
            })),
            Err(e) if is_code(&e, NOT_FOUND) => Ok(None),
            Err(e) => Err(classify("secretsmanager.describe_secret", e)),
        }
    }

    async fn create_secret(&self, name: &SecretName, value: &SecretValue) -> Result<CreateOutcome> {
        let tag = Tag::builder()
            .key(MANAGED_BY_LABEL)
            .value(MANAGED_BY_VALUE)
            .build();
        match self
            .client
            .create_secret()
            .name(name.to_string())
            .secret_string(value.expose())
            .tags(tag)
            .send()
            .await
        {
            Ok(_) => {
                info!("Created secret {} (hash {})", name, value.hash().short());
                Ok(CreateOutcome::Created)
            }
            Err(e) if is_code(&e, ALREADY_EXISTS) => {
                debug!("Secret {} already exists", name);
                Ok(CreateOutcome::AlreadyExists)
            }
            Err(e) => Err(classify("secretsmanager.create_secret", e)),
        }
    }

    async fn put_secret_value(&self, name: &SecretName, value: &SecretValue) -> Result<()> {
        let output = self
            .client
            .put_secret_value()
            .secret_id(name.to_string())
            .secret_string(value.expose())
            .send()
            .await
            .map_err(|e| classify("secretsmanager.put_secret_value", e))?;
        info!(
            "Stored new value for secret {} (version {}, hash {})",
            name,
            output.version_id().unwrap_or("unknown"),
            value.hash().short()
        );
        Ok(())
    }

    async fn read_secret_value(&self, name: &SecretName) -> Result<SecretValue> {
        let output = self
            .client
            .get_secret_value()
            .secret_id(name.to_string())
            .send()
            .await
            .map_err(|e| classify("secretsmanager.get_secret_value", e))?;
        output
            .secret_string()
            .map(SecretValue::new)
            .ok_or_else(|| {
                ProvisionError::provider(
                    "secretsmanager.get_secret_value",
                    anyhow::anyhow!("secret {name} has no string value"),
                )
            })
    }
}
