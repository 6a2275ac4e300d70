//! # Identity Binding
//!
//! Maps a cluster workload identity (namespace + service account) to an IAM
//! role through a federated trust condition on the cluster's OIDC issuer.
//!
//! The trust subject must name exactly one service account. `StringLike`
//! operators and wildcards would let other workloads assume the role.

use crate::constants::IRSA_AUDIENCE;
use crate::error::{ProvisionError, ResourceKind};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::LazyLock;

const WEB_IDENTITY_ACTION: &str = "sts:AssumeRoleWithWebIdentity";

static DNS_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9.]*[a-z0-9])?$").expect("dns label regex is valid")
});

/// Desired federated identity binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityBinding {
    pub namespace: String,
    pub service_account: String,
    pub role_name: String,
    pub account_id: String,
    /// Issuer host and path, without scheme
    pub oidc_issuer: String,
    #[serde(default = "default_audience")]
    pub audience: String,
    /// Policy attached to the role
    pub policy_name: String,
}

fn default_audience() -> String {
    IRSA_AUDIENCE.to_string()
}

/// One `Allow` grant extracted from a role's trust policy
///
/// Statements with several principals or condition operators yield one
/// entry per combination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustCondition {
    /// Federated provider ARN; `None` for `AWS`, `Service` or `*` principals
    pub federated: Option<String>,
    /// Principal as written, e.g. `AWS:arn:aws:iam::999999999999:root`
    pub principal: String,
    pub actions: Vec<String>,
    pub operator: String,
    pub audience: Option<String>,
    pub subject: Option<String>,
}

/// How an existing trust policy relates to the desired binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustMatch {
    /// Exactly the desired issuer, audience and subject
    Exact,
    /// Same issuer and subject but the audience differs; safe to rewrite
    AudienceDrift,
    /// Trusts some other principal or subject
    Foreign(String),
}

impl IdentityBinding {
    /// Strip the scheme from an issuer URL
    pub fn normalize_issuer(issuer: &str) -> String {
        issuer
            .trim()
            .trim_start_matches("https://")
            .trim_end_matches('/')
            .to_string()
    }

    /// `system:serviceaccount:<namespace>:<name>`
    pub fn subject(&self) -> String {
        format!(
            "system:serviceaccount:{}:{}",
            self.namespace, self.service_account
        )
    }

    pub fn role_arn(&self) -> String {
        format!("arn:aws:iam::{}:role/{}", self.account_id, self.role_name)
    }

    pub fn provider_arn(&self) -> String {
        format!(
            "arn:aws:iam::{}:oidc-provider/{}",
            self.account_id, self.oidc_issuer
        )
    }

    pub fn policy_arn(&self) -> String {
        format!("arn:aws:iam::{}:policy/{}", self.account_id, self.policy_name)
    }

    pub fn validate(&self) -> Result<(), ProvisionError> {
        for (field, value) in [
            ("namespace", &self.namespace),
            ("service account", &self.service_account),
        ] {
            if !DNS_LABEL.is_match(value) {
                return Err(ProvisionError::invalid(
                    ResourceKind::IdentityBinding,
                    format!("{field} '{value}' is not a valid Kubernetes name"),
                ));
            }
        }
        if self.oidc_issuer.is_empty() || self.oidc_issuer.contains('*') {
            return Err(ProvisionError::invalid(
                ResourceKind::IdentityBinding,
                "OIDC issuer must be a concrete URL",
            ));
        }
        if self.role_name.is_empty() || self.role_name.len() > 64 {
            return Err(ProvisionError::invalid(
                ResourceKind::IdentityBinding,
                format!("role name '{}' must be 1-64 characters", self.role_name),
            ));
        }
        Ok(())
    }

    /// Trust policy document allowing only this service account
    pub fn trust_policy(&self) -> String {
        json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": { "Federated": self.provider_arn() },
                "Action": WEB_IDENTITY_ACTION,
                "Condition": {
                    "StringEquals": {
                        format!("{}:aud", self.oidc_issuer): self.audience,
                        format!("{}:sub", self.oidc_issuer): self.subject(),
                    }
                }
            }]
        })
        .to_string()
    }

    /// Compare an existing trust policy against this binding
    pub fn match_trust(&self, conditions: &[TrustCondition]) -> TrustMatch {
        let subject = self.subject();
        let provider = self.provider_arn();

        if conditions.is_empty() {
            return TrustMatch::Foreign("trust policy has no allow statements".to_string());
        }

        let mut audience_drift = false;
        for condition in conditions {
            let Some(federated) = condition.federated.as_deref() else {
                return TrustMatch::Foreign(format!("trusts principal '{}'", condition.principal));
            };
            if federated != provider {
                return TrustMatch::Foreign(format!("trusts provider '{federated}'"));
            }
            if condition.actions.is_empty() {
                return TrustMatch::Foreign("grant names no action".to_string());
            }
            if let Some(action) = condition
                .actions
                .iter()
                .find(|action| action.as_str() != WEB_IDENTITY_ACTION)
            {
                return TrustMatch::Foreign(format!("allows action '{action}'"));
            }
            if condition.operator != "StringEquals" {
                return TrustMatch::Foreign(format!(
                    "uses {} subject matching",
                    condition.operator
                ));
            }
            if condition.subject.as_deref() != Some(subject.as_str()) {
                return TrustMatch::Foreign(format!(
                    "trusts subject '{}'",
                    condition.subject.as_deref().unwrap_or("<any>")
                ));
            }
            if condition.audience.as_deref() != Some(self.audience.as_str()) {
                audience_drift = true;
            }
        }

        if audience_drift {
            TrustMatch::AudienceDrift
        } else {
            TrustMatch::Exact
        }
    }
}

/// Values of a policy field that may be a string or a list of strings
fn string_or_list(value: &serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::String(item) => vec![item.clone()],
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map_or_else(|| item.to_string(), str::to_string))
            .collect(),
        serde_json::Value::Null => Vec::new(),
        other => vec![other.to_string()],
    }
}

/// `(federated, display)` for every principal a statement names
fn principals(statement: &serde_json::Value) -> Vec<(Option<String>, String)> {
    if !statement["NotPrincipal"].is_null() {
        return vec![(None, format!("NotPrincipal {}", statement["NotPrincipal"]))];
    }
    match &statement["Principal"] {
        serde_json::Value::Object(map) => map
            .iter()
            .flat_map(|(kind, value)| {
                string_or_list(value).into_iter().map(move |arn| {
                    let federated = (kind == "Federated").then(|| arn.clone());
                    (federated, format!("{kind}:{arn}"))
                })
            })
            .collect(),
        serde_json::Value::Null => vec![(None, "<none>".to_string())],
        other => string_or_list(other)
            .into_iter()
            .map(|principal| (None, principal))
            .collect(),
    }
}

/// Extract every `Allow` grant from a trust policy document
///
/// `Deny` statements only narrow access and are skipped. Anything that
/// widens it (other principals, actions, unconditioned federation) is
/// kept so the caller can reject it.
pub fn parse_trust_policy(document: &str) -> Result<Vec<TrustCondition>, ProvisionError> {
    let value: serde_json::Value = serde_json::from_str(document).map_err(|e| {
        ProvisionError::provider("identity.parse_trust_policy", anyhow::Error::new(e))
    })?;

    let statements = match &value["Statement"] {
        serde_json::Value::Array(items) => items.clone(),
        serde_json::Value::Object(_) => vec![value["Statement"].clone()],
        _ => Vec::new(),
    };

    let mut conditions = Vec::new();
    for statement in statements {
        if statement["Effect"].as_str() != Some("Allow") {
            continue;
        }
        let mut actions = string_or_list(&statement["Action"]);
        if !statement["NotAction"].is_null() {
            actions.push(format!("NotAction {}", statement["NotAction"]));
        }

        let mut blocks = Vec::new();
        if let Some(operators) = statement["Condition"].as_object() {
            for (operator, block) in operators {
                let mut audience = None;
                let mut subject = None;
                if let Some(entries) = block.as_object() {
                    for (key, value) in entries {
                        if key.ends_with(":aud") {
                            audience = value.as_str().map(str::to_string);
                        } else if key.ends_with(":sub") {
                            subject = value.as_str().map(str::to_string);
                        }
                    }
                }
                if subject.is_some() || audience.is_some() {
                    blocks.push((operator.clone(), audience, subject));
                }
            }
        }
        if blocks.is_empty() {
            blocks.push(("None".to_string(), None, None));
        }

        for (federated, principal) in principals(&statement) {
            for (operator, audience, subject) in &blocks {
                conditions.push(TrustCondition {
                    federated: federated.clone(),
                    principal: principal.clone(),
                    actions: actions.clone(),
                    operator: operator.clone(),
                    audience: audience.clone(),
                    subject: subject.clone(),
                });
            }
        }
    }
    Ok(conditions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding() -> IdentityBinding {
        IdentityBinding {
            namespace: "tiles".to_string(),
            service_account: "external-secrets-sa".to_string(),
            role_name: "tiles-role".to_string(),
            account_id: "123456789012".to_string(),
            oidc_issuer: "oidc.eks.us-east-1.amazonaws.com/id/ABC".to_string(),
            audience: IRSA_AUDIENCE.to_string(),
            policy_name: "app-db-url-read".to_string(),
        }
    }

    #[test]
    fn test_subject_and_arns() {
        let b = binding();
        assert_eq!(b.subject(), "system:serviceaccount:tiles:external-secrets-sa");
        assert_eq!(b.role_arn(), "arn:aws:iam::123456789012:role/tiles-role");
        assert_eq!(
            b.provider_arn(),
            "arn:aws:iam::123456789012:oidc-provider/oidc.eks.us-east-1.amazonaws.com/id/ABC"
        );
        assert_eq!(
            IdentityBinding::normalize_issuer("https://oidc.eks.us-east-1.amazonaws.com/id/ABC/"),
            "oidc.eks.us-east-1.amazonaws.com/id/ABC"
        );
    }

    #[test]
    fn test_own_trust_policy_matches_exactly() {
        let b = binding();
        let conditions = parse_trust_policy(&b.trust_policy()).unwrap();
        assert_eq!(conditions.len(), 1);
        assert_eq!(b.match_trust(&conditions), TrustMatch::Exact);
    }

    #[test]
    fn test_other_service_account_is_foreign() {
        let mut other = binding();
        other.service_account = "someone-else".to_string();
        let conditions = parse_trust_policy(&other.trust_policy()).unwrap();
        assert!(matches!(
            binding().match_trust(&conditions),
            TrustMatch::Foreign(_)
        ));
    }

    #[test]
    fn test_string_like_wildcard_subject_is_foreign() {
        let b = binding();
        let document = json!({
            "Statement": [{
                "Effect": "Allow",
                "Principal": {"Federated": b.provider_arn()},
                "Action": "sts:AssumeRoleWithWebIdentity",
                "Condition": {"StringLike": {
                    format!("{}:sub", b.oidc_issuer): "system:serviceaccount:tiles:*",
                    format!("{}:aud", b.oidc_issuer): IRSA_AUDIENCE,
                }}
            }]
        })
        .to_string();
        let conditions = parse_trust_policy(&document).unwrap();
        assert!(matches!(b.match_trust(&conditions), TrustMatch::Foreign(_)));
    }

    #[test]
    fn test_extra_aws_principal_is_foreign() {
        let b = binding();
        let mut document: serde_json::Value = serde_json::from_str(&b.trust_policy()).unwrap();
        document["Statement"].as_array_mut().unwrap().push(json!({
            "Effect": "Allow",
            "Principal": {"AWS": "arn:aws:iam::999999999999:root"},
            "Action": "sts:AssumeRole"
        }));
        let conditions = parse_trust_policy(&document.to_string()).unwrap();
        assert_eq!(conditions.len(), 2);
        assert_eq!(
            b.match_trust(&conditions),
            TrustMatch::Foreign("trusts principal 'AWS:arn:aws:iam::999999999999:root'".to_string())
        );
    }

    #[test]
    fn test_unconditioned_or_wrong_action_grant_is_foreign() {
        let b = binding();
        let unconditioned = json!({
            "Statement": [{
                "Effect": "Allow",
                "Principal": {"Federated": b.provider_arn()},
                "Action": "sts:AssumeRoleWithWebIdentity"
            }]
        })
        .to_string();
        let conditions = parse_trust_policy(&unconditioned).unwrap();
        assert_eq!(conditions[0].operator, "None");
        assert!(matches!(b.match_trust(&conditions), TrustMatch::Foreign(_)));

        let wrong_action = b.trust_policy().replace(WEB_IDENTITY_ACTION, "sts:AssumeRole");
        let conditions = parse_trust_policy(&wrong_action).unwrap();
        assert_eq!(
            b.match_trust(&conditions),
            TrustMatch::Foreign("allows action 'sts:AssumeRole'".to_string())
        );
    }

    #[test]
    fn test_deny_statements_are_ignored() {
        let b = binding();
        let mut document: serde_json::Value = serde_json::from_str(&b.trust_policy()).unwrap();
        document["Statement"].as_array_mut().unwrap().push(json!({
            "Effect": "Deny",
            "Principal": "*",
            "Action": "sts:AssumeRole"
        }));
        let conditions = parse_trust_policy(&document.to_string()).unwrap();
        assert_eq!(b.match_trust(&conditions), TrustMatch::Exact);
    }

    #[test]
    fn test_audience_drift_detected() {
        let mut other = binding();
        other.audience = "sts.example.com".to_string();
        let conditions = parse_trust_policy(&other.trust_policy()).unwrap();
        assert_eq!(binding().match_trust(&conditions), TrustMatch::AudienceDrift);
    }

    #[test]
    fn test_validate_rejects_wildcards() {
        let mut b = binding();
        b.service_account = "*".to_string();
        assert!(b.validate().is_err());

        let mut b = binding();
        b.namespace = "Tiles".to_string();
        assert!(b.validate().is_err());

        assert!(binding().validate().is_ok());
    }
}
