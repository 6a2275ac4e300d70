//! # AWS IAM
//!
//! [`PolicyProvider`] and [`IdentityProvider`] over the official SDK.
//!
//! IAM returns policy and trust documents URL-encoded; they are decoded
//! before parsing. Managed policies are updated by adding a new default
//! version, so the read path reports non-default versions oldest first for
//! pruning.

use super::errors::{classify, is_code};
use crate::descriptor::{parse_statements, parse_trust_policy};
use crate::error::{ProvisionError, Result};
use crate::provider::{CreateOutcome, IdentityProvider, ObservedPolicy, ObservedRole, PolicyProvider};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_iam::Client as IamClient;
use std::collections::BTreeSet;
use tracing::{debug, info};

const NOT_FOUND: &[&str] = &["NoSuchEntity"];
const ALREADY_EXISTS: &[&str] = &["EntityAlreadyExists"];

fn decode_document(operation: &str, raw: &str) -> Result<String> {
    urlencoding::decode(raw)
        .map(std::borrow::Cow::into_owned)
        .map_err(|e| ProvisionError::provider(operation, anyhow::Error::new(e)))
}

/// IAM policies and roles
#[derive(Clone)]
pub struct AwsIam {
    client: IamClient,
    account_id: String,
}

impl std::fmt::Debug for AwsIam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsIam")
            .field("account_id", &self.account_id)
            .finish_non_exhaustive()
    }
}

impl AwsIam {
    pub fn new(sdk_config: &SdkConfig, account_id: &str) -> Self {
        Self {
            client: IamClient::new(sdk_config),
            account_id: account_id.to_string(),
        }
    }

    fn policy_arn(&self, name: &str) -> String {
        format!("arn:aws:iam::{}:policy/{name}", self.account_id)
    }
}

#[async_trait]
impl PolicyProvider for AwsIam {
    async fn get_policy(&self, arn: &str) -> Result<Option<ObservedPolicy>> {
        let policy = match self.client.get_policy().policy_arn(arn).send().await {
            Ok(output) => output.policy,
            Err(e) if is_code(&e, NOT_FOUND) => return Ok(None),
            Err(e) => return Err(classify("iam.get_policy", e)),
        };
        let Some(default_version) = policy.and_then(|p| p.default_version_id) else {
            return Ok(None);
        };

        let version = self
            .client
            .get_policy_version()
            .policy_arn(arn)
            .version_id(&default_version)
            .send()
            .await
            .map_err(|e| classify("iam.get_policy_version", e))?;
        let document = version
            .policy_version
            .and_then(|v| v.document)
            .unwrap_or_default();
        let statements = parse_statements(&decode_document("iam.get_policy_version", &document)?)?;

        let versions = self
            .client
            .list_policy_versions()
            .policy_arn(arn)
            .send()
            .await
            .map_err(|e| classify("iam.list_policy_versions", e))?;
        let mut others: Vec<(i64, String)> = versions
            .versions()
            .iter()
            .filter(|v| !v.is_default_version())
            .filter_map(|v| {
                let id = v.version_id()?.to_string();
                Some((v.create_date().map(|d| d.secs()).unwrap_or_default(), id))
            })
            .collect();
        others.sort();

        Ok(Some(ObservedPolicy {
            arn: arn.to_string(),
            default_version,
            statements,
            other_versions: others.into_iter().map(|(_, id)| id).collect(),
        }))
    }

    async fn create_policy(&self, name: &str, document: &str) -> Result<CreateOutcome> {
        match self
            .client
            .create_policy()
            .policy_name(name)
            .policy_document(document)
            .description("Read access to one application secret, managed by provisionctl")
            .send()
            .await
        {
            Ok(_) => {
                info!("Created IAM policy {}", self.policy_arn(name));
                Ok(CreateOutcome::Created)
            }
            Err(e) if is_code(&e, ALREADY_EXISTS) => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(classify("iam.create_policy", e)),
        }
    }

    async fn create_policy_version(&self, arn: &str, document: &str) -> Result<()> {
        let output = self
            .client
            .create_policy_version()
            .policy_arn(arn)
            .policy_document(document)
            .set_as_default(true)
            .send()
            .await
            .map_err(|e| classify("iam.create_policy_version", e))?;
        info!(
            "Created policy version {} for {}",
            output
                .policy_version()
                .and_then(|v| v.version_id())
                .unwrap_or("unknown"),
            arn
        );
        Ok(())
    }

    async fn delete_policy_version(&self, arn: &str, version_id: &str) -> Result<()> {
        match self
            .client
            .delete_policy_version()
            .policy_arn(arn)
            .version_id(version_id)
            .send()
            .await
        {
            Ok(_) => {
                debug!("Deleted policy version {} of {}", version_id, arn);
                Ok(())
            }
            Err(e) if is_code(&e, NOT_FOUND) => Ok(()),
            Err(e) => Err(classify("iam.delete_policy_version", e)),
        }
    }
}

#[async_trait]
impl IdentityProvider for AwsIam {
    async fn get_role(&self, name: &str) -> Result<Option<ObservedRole>> {
        let role = match self.client.get_role().role_name(name).send().await {
            Ok(output) => output.role,
            Err(e) if is_code(&e, NOT_FOUND) => return Ok(None),
            Err(e) => return Err(classify("iam.get_role", e)),
        };
        let Some(role) = role else {
            return Ok(None);
        };

        let trust_document = role.assume_role_policy_document().unwrap_or_default();
        let trust = parse_trust_policy(&decode_document("iam.get_role", trust_document)?)?;

        let attached = self
            .client
            .list_attached_role_policies()
            .role_name(name)
            .send()
            .await
            .map_err(|e| classify("iam.list_attached_role_policies", e))?;
        let attached_policies: BTreeSet<String> = attached
            .attached_policies()
            .iter()
            .filter_map(|p| p.policy_arn().map(str::to_string))
            .collect();

        Ok(Some(ObservedRole {
            arn: role.arn().to_string(),
            trust,
            attached_policies,
        }))
    }

    async fn create_role(&self, name: &str, trust_policy: &str) -> Result<CreateOutcome> {
        match self
            .client
            .create_role()
            .role_name(name)
            .assume_role_policy_document(trust_policy)
            .description("Federated identity for a cluster service account, managed by provisionctl")
            .send()
            .await
        {
            Ok(_) => {
                info!("Created IAM role {}", name);
                Ok(CreateOutcome::Created)
            }
            Err(e) if is_code(&e, ALREADY_EXISTS) => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(classify("iam.create_role", e)),
        }
    }

    async fn update_trust_policy(&self, name: &str, trust_policy: &str) -> Result<()> {
        self.client
            .update_assume_role_policy()
            .role_name(name)
            .policy_document(trust_policy)
            .send()
            .await
            .map_err(|e| classify("iam.update_assume_role_policy", e))?;
        info!("Updated trust policy of IAM role {}", name);
        Ok(())
    }

    async fn attach_policy(&self, role_name: &str, policy_arn: &str) -> Result<()> {
        self.client
            .attach_role_policy()
            .role_name(role_name)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|e| classify("iam.attach_role_policy", e))?;
        info!("Attached {} to IAM role {}", policy_arn, role_name);
        Ok(())
    }
}
