//! Account id and cluster OIDC issuer discovery.

use super::errors::classify;
use crate::error::{ProvisionError, Result};
use crate::provider::AccountResolver;
use async_trait::async_trait;
use aws_config::SdkConfig;
use tracing::debug;

/// Resolves ARN inputs through STS and EKS
#[derive(Clone)]
pub struct AwsAccount {
    sts: aws_sdk_sts::Client,
    eks: aws_sdk_eks::Client,
}

impl std::fmt::Debug for AwsAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsAccount").finish_non_exhaustive()
    }
}

impl AwsAccount {
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self {
            sts: aws_sdk_sts::Client::new(sdk_config),
            eks: aws_sdk_eks::Client::new(sdk_config),
        }
    }
}

#[async_trait]
impl AccountResolver for AwsAccount {
    async fn account_id(&self) -> Result<String> {
        let identity = self
            .sts
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| classify("sts.get_caller_identity", e))?;
        let account = identity.account().unwrap_or_default().to_string();
        debug!(
            "Caller identity {} in account {}",
            identity.arn().unwrap_or("unknown"),
            account
        );
        Ok(account)
    }

    async fn oidc_issuer(&self, cluster: &str) -> Result<String> {
        let output = self
            .eks
            .describe_cluster()
            .name(cluster)
            .send()
            .await
            .map_err(|e| classify("eks.describe_cluster", e))?;
        output
            .cluster()
            .and_then(|c| c.identity())
            .and_then(|identity| identity.oidc())
            .and_then(|oidc| oidc.issuer())
            .map(str::to_string)
            .ok_or_else(|| {
                ProvisionError::provider(
                    "eks.describe_cluster",
                    anyhow::anyhow!("cluster {cluster} has no OIDC issuer; enable IRSA on the cluster"),
                )
            })
    }
}
