//! Identity binding: IAM role trust, policy attachment and the service
//! account annotation, planned together so a conflict in any part is found
//! before anything is written.

use super::{Plan, ReconcileOutcome, Reconciler};
use crate::descriptor::{IdentityBinding, TrustMatch};
use crate::error::{ProvisionError, ResourceKind, Result};
use crate::provider::{CreateOutcome, ObservedRole, ObservedServiceAccount};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityPlan {
    pub role: Plan,
    pub attach_policy: bool,
    pub service_account: Plan,
}

impl IdentityPlan {
    /// Strongest action across the three parts
    pub fn summary(&self) -> Plan {
        if self.role == Plan::Create {
            return Plan::Create;
        }
        let mut changes = Vec::new();
        if let Plan::Update(reason) = &self.role {
            changes.push(reason.clone());
        }
        if self.attach_policy {
            changes.push("attach policy".to_string());
        }
        match &self.service_account {
            Plan::Create => changes.push("create service account".to_string()),
            Plan::Update(reason) => changes.push(reason.clone()),
            Plan::Noop => {}
        }
        if changes.is_empty() {
            Plan::Noop
        } else {
            Plan::Update(changes.join(", "))
        }
    }
}

pub fn plan_identity(
    role: Option<&ObservedRole>,
    service_account: Option<&ObservedServiceAccount>,
    desired: &IdentityBinding,
) -> Result<IdentityPlan> {
    let policy_arn = desired.policy_arn();
    let (role_plan, attach_policy) = match role {
        None => (Plan::Create, true),
        Some(role) => {
            let plan = match desired.match_trust(&role.trust) {
                TrustMatch::Exact => Plan::Noop,
                TrustMatch::AudienceDrift => Plan::Update("trust audience drifted".to_string()),
                TrustMatch::Foreign(reason) => {
                    return Err(ProvisionError::conflict(
                        ResourceKind::IdentityBinding,
                        &desired.role_name,
                        format!("existing role {reason}, expected {}", desired.subject()),
                    ));
                }
            };
            (plan, !role.attached_policies.contains(&policy_arn))
        }
    };

    let sa_key = format!("{}/{}", desired.namespace, desired.service_account);
    let service_account_plan = match service_account {
        None => Plan::Create,
        Some(ObservedServiceAccount { role_arn: None }) => {
            Plan::Update("annotate service account".to_string())
        }
        Some(ObservedServiceAccount {
            role_arn: Some(existing),
        }) if *existing == desired.role_arn() => Plan::Noop,
        Some(ObservedServiceAccount {
            role_arn: Some(existing),
        }) => {
            return Err(ProvisionError::conflict(
                ResourceKind::ServiceAccount,
                sa_key,
                format!("already bound to role {existing}"),
            ));
        }
    };

    Ok(IdentityPlan {
        role: role_plan,
        attach_policy,
        service_account: service_account_plan,
    })
}

impl Reconciler {
    pub async fn reconcile_identity(&self, desired: &IdentityBinding) -> Result<ReconcileOutcome> {
        let identities = &self.providers.identities;
        let cluster = &self.providers.cluster;
        let key = desired.role_name.clone();

        let mut role = self
            .call("iam.get_role", || identities.get_role(&desired.role_name))
            .await?;
        let service_account = self
            .call("cluster.get_service_account", || {
                cluster.get_service_account(&desired.namespace, &desired.service_account)
            })
            .await?;
        let mut plan = plan_identity(role.as_ref(), service_account.as_ref(), desired)?;
        let mut summary = plan.summary();

        if self.dry_run || summary.is_noop() {
            return Ok(self.finish(ResourceKind::IdentityBinding, &key, &summary, None));
        }

        let trust_policy = desired.trust_policy();
        let mut detail = None;
        if plan.role == Plan::Create {
            let created = self
                .call("iam.create_role", || {
                    identities.create_role(&desired.role_name, &trust_policy)
                })
                .await?;
            if created == CreateOutcome::AlreadyExists {
                role = self
                    .call("iam.get_role", || identities.get_role(&desired.role_name))
                    .await?;
                let replanned = plan_identity(role.as_ref(), service_account.as_ref(), desired)?;
                plan.attach_policy = replanned.attach_policy;
                plan.role = if replanned.role == Plan::Create {
                    // Created by a concurrent run and not yet readable
                    Plan::Noop
                } else {
                    replanned.role
                };
                summary = plan.summary();
                detail = Some("role created concurrently".to_string());
            }
        }
        if matches!(plan.role, Plan::Update(_)) {
            self.call("iam.update_trust_policy", || {
                identities.update_trust_policy(&desired.role_name, &trust_policy)
            })
            .await?;
        }
        if plan.attach_policy {
            let policy_arn = desired.policy_arn();
            self.call("iam.attach_policy", || {
                identities.attach_policy(&desired.role_name, &policy_arn)
            })
            .await?;
        }
        if !plan.service_account.is_noop() {
            let role_arn = desired.role_arn();
            self.call("cluster.apply_service_account", || {
                cluster.apply_service_account(&desired.namespace, &desired.service_account, &role_arn)
            })
            .await?;
        }

        Ok(self.finish(ResourceKind::IdentityBinding, &key, &summary, detail))
    }
}
