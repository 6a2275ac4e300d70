//! # Policy Descriptor
//!
//! IAM access policy granting the identity binding read access to the
//! application's secrets, and the scope checks that keep it there.

use crate::error::{ProvisionError, ResourceKind};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;

/// A single (effect, actions, resource-pattern) statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyStatement {
    pub effect: String,
    pub actions: BTreeSet<String>,
    pub resources: BTreeSet<String>,
}

/// Desired access policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDescriptor {
    pub name: String,
    pub actions: BTreeSet<String>,
    pub resource_pattern: String,
}

impl PolicyDescriptor {
    /// Secret ARN prefix every pattern of `app` must stay under
    pub fn scope_prefix(region: &str, account_id: &str, app: &str) -> String {
        format!("arn:aws:secretsmanager:{region}:{account_id}:secret:{app}/")
    }

    /// Reject patterns that reach outside the application's secret namespace
    pub fn validate(&self, region: &str, account_id: &str, app: &str) -> Result<(), ProvisionError> {
        if self.name.trim().is_empty() {
            return Err(ProvisionError::invalid(ResourceKind::Policy, "policy name is empty"));
        }
        if self.actions.is_empty() {
            return Err(ProvisionError::invalid(
                ResourceKind::Policy,
                format!("policy '{}' grants no actions", self.name),
            ));
        }
        for action in &self.actions {
            let Some(verb) = action.strip_prefix("secretsmanager:") else {
                return Err(ProvisionError::invalid(
                    ResourceKind::Policy,
                    format!("action '{action}' is outside the secretsmanager service"),
                ));
            };
            if verb.is_empty() || verb.contains('*') {
                return Err(ProvisionError::invalid(
                    ResourceKind::Policy,
                    format!("wildcard action '{action}' is not allowed"),
                ));
            }
        }

        let prefix = Self::scope_prefix(region, account_id, app);
        let Some(remainder) = self.resource_pattern.strip_prefix(&prefix) else {
            return Err(ProvisionError::invalid(
                ResourceKind::Policy,
                format!(
                    "resource pattern '{}' is not scoped to '{prefix}'",
                    self.resource_pattern
                ),
            ));
        };
        if remainder.is_empty() {
            return Err(ProvisionError::invalid(
                ResourceKind::Policy,
                format!("resource pattern '{}' has no resource", self.resource_pattern),
            ));
        }
        Ok(())
    }

    /// The statements this descriptor renders to
    pub fn statements(&self) -> Vec<PolicyStatement> {
        vec![PolicyStatement {
            effect: "Allow".to_string(),
            actions: self.actions.clone(),
            resources: BTreeSet::from([self.resource_pattern.clone()]),
        }]
    }

    /// IAM policy document JSON
    pub fn document(&self) -> String {
        let actions: Vec<&String> = self.actions.iter().collect();
        json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Action": actions,
                "Resource": self.resource_pattern,
            }]
        })
        .to_string()
    }
}

/// Parse statements out of an IAM policy document
///
/// `Action` and `Resource` may be a string or an array; documents returned by
/// IAM are URL-encoded and must be decoded by the caller.
pub fn parse_statements(document: &str) -> Result<Vec<PolicyStatement>, ProvisionError> {
    let value: serde_json::Value = serde_json::from_str(document).map_err(|e| {
        ProvisionError::provider("policy.parse_document", anyhow::Error::new(e))
    })?;

    let statements = match &value["Statement"] {
        serde_json::Value::Array(items) => items.clone(),
        serde_json::Value::Object(_) => vec![value["Statement"].clone()],
        _ => Vec::new(),
    };

    Ok(statements
        .iter()
        .map(|statement| PolicyStatement {
            effect: statement["Effect"].as_str().unwrap_or_default().to_string(),
            actions: string_or_list(&statement["Action"]),
            resources: string_or_list(&statement["Resource"]),
        })
        .collect())
}

fn string_or_list(value: &serde_json::Value) -> BTreeSet<String> {
    match value {
        serde_json::Value::String(s) => BTreeSet::from([s.clone()]),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => BTreeSet::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(pattern: &str) -> PolicyDescriptor {
        PolicyDescriptor {
            name: "app-db-url-read".to_string(),
            actions: BTreeSet::from([
                "secretsmanager:GetSecretValue".to_string(),
                "secretsmanager:DescribeSecret".to_string(),
            ]),
            resource_pattern: pattern.to_string(),
        }
    }

    #[test]
    fn test_scoped_pattern_is_valid() {
        let policy =
            descriptor("arn:aws:secretsmanager:us-east-1:123456789012:secret:app/db-url-*");
        assert!(policy.validate("us-east-1", "123456789012", "app").is_ok());

        let prefix = descriptor("arn:aws:secretsmanager:us-east-1:123456789012:secret:app/*");
        assert!(prefix.validate("us-east-1", "123456789012", "app").is_ok());
    }

    #[test]
    fn test_pattern_outside_app_namespace_rejected() {
        for pattern in [
            "arn:aws:secretsmanager:us-east-1:123456789012:secret:*",
            "arn:aws:secretsmanager:us-east-1:123456789012:secret:other/db-url-*",
            "arn:aws:secretsmanager:*:123456789012:secret:app/db-url-*",
            "arn:aws:secretsmanager:us-east-1:*:secret:app/db-url-*",
            "arn:aws:secretsmanager:us-east-1:123456789012:secret:app-*",
            "*",
        ] {
            let result = descriptor(pattern).validate("us-east-1", "123456789012", "app");
            assert!(
                matches!(result, Err(ProvisionError::InvalidDescriptor { .. })),
                "pattern {pattern} should be rejected"
            );
        }
    }

    #[test]
    fn test_wildcard_and_foreign_actions_rejected() {
        let mut policy =
            descriptor("arn:aws:secretsmanager:us-east-1:123456789012:secret:app/db-url-*");
        policy.actions = BTreeSet::from(["secretsmanager:*".to_string()]);
        assert!(policy.validate("us-east-1", "123456789012", "app").is_err());

        policy.actions = BTreeSet::from(["s3:GetObject".to_string()]);
        assert!(policy.validate("us-east-1", "123456789012", "app").is_err());

        policy.actions.clear();
        assert!(policy.validate("us-east-1", "123456789012", "app").is_err());
    }

    #[test]
    fn test_document_round_trips_through_parser() {
        let policy =
            descriptor("arn:aws:secretsmanager:us-east-1:123456789012:secret:app/db-url-*");
        let statements = parse_statements(&policy.document()).unwrap();
        assert_eq!(statements, policy.statements());
    }

    #[test]
    fn test_parse_single_statement_object_with_string_fields() {
        let document = r#"{
            "Version": "2012-10-17",
            "Statement": {"Effect": "Allow", "Action": "secretsmanager:GetSecretValue", "Resource": "arn:x"}
        }"#;
        let statements = parse_statements(document).unwrap();
        assert_eq!(statements.len(), 1);
        assert!(statements[0].actions.contains("secretsmanager:GetSecretValue"));
        assert!(statements[0].resources.contains("arn:x"));
    }
}
