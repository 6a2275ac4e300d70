//! Managed access policy.
//!
//! Scope is immutable: a stored policy whose resources differ from the
//! descriptor belongs to someone else. An action-set change is published as a
//! new default policy version rather than an in-place edit.

use super::{Plan, ReconcileOutcome, Reconciler};
use crate::constants::MAX_POLICY_VERSIONS;
use crate::descriptor::PolicyDescriptor;
use crate::error::{ProvisionError, ResourceKind, Result};
use crate::provider::{CreateOutcome, ObservedPolicy};
use std::collections::BTreeSet;
use tracing::info;

pub fn plan_policy(observed: Option<&ObservedPolicy>, desired: &PolicyDescriptor) -> Result<Plan> {
    let Some(observed) = observed else {
        return Ok(Plan::Create);
    };
    let conflict = |reason: String| ProvisionError::conflict(ResourceKind::Policy, &desired.name, reason);

    let [statement] = observed.statements.as_slice() else {
        return Err(conflict(format!(
            "existing policy has {} statements, expected exactly one",
            observed.statements.len()
        )));
    };
    if statement.effect != "Allow" {
        return Err(conflict(format!(
            "existing statement effect is '{}'",
            statement.effect
        )));
    }
    let desired_resources = BTreeSet::from([desired.resource_pattern.clone()]);
    if statement.resources != desired_resources {
        return Err(conflict(format!(
            "existing policy is scoped to {:?}, desired {}",
            statement.resources, desired.resource_pattern
        )));
    }
    if statement.actions != desired.actions {
        let added: Vec<&String> = desired.actions.difference(&statement.actions).collect();
        let removed: Vec<&String> = statement.actions.difference(&desired.actions).collect();
        return Ok(Plan::Update(format!(
            "actions changed (added {added:?}, removed {removed:?})"
        )));
    }
    Ok(Plan::Noop)
}

impl Reconciler {
    /// Reconcile the policy stored under `arn`
    pub async fn reconcile_policy(
        &self,
        desired: &PolicyDescriptor,
        arn: &str,
    ) -> Result<ReconcileOutcome> {
        let policies = &self.providers.policies;
        let observed = self.call("iam.get_policy", || policies.get_policy(arn)).await?;
        let mut plan = plan_policy(observed.as_ref(), desired)?;

        if self.dry_run || plan.is_noop() {
            return Ok(self.finish(ResourceKind::Policy, &desired.name, &plan, None));
        }

        let document = desired.document();
        let mut observed = observed;
        if plan == Plan::Create {
            let created = self
                .call("iam.create_policy", || policies.create_policy(&desired.name, &document))
                .await?;
            if created == CreateOutcome::Created {
                return Ok(self.finish(ResourceKind::Policy, &desired.name, &plan, None));
            }
            observed = self.call("iam.get_policy", || policies.get_policy(arn)).await?;
            plan = plan_policy(observed.as_ref(), desired)?;
            if !matches!(plan, Plan::Update(_)) {
                return Ok(self.finish(
                    ResourceKind::Policy,
                    &desired.name,
                    &Plan::Noop,
                    Some("created concurrently".to_string()),
                ));
            }
        }

        if let Some(observed) = observed.as_ref() {
            if observed.other_versions.len() + 1 >= MAX_POLICY_VERSIONS {
                if let Some(oldest) = observed.other_versions.first() {
                    info!(
                        "Pruning policy version {} of {} to stay under the version limit",
                        oldest, desired.name
                    );
                    self.call("iam.delete_policy_version", || {
                        policies.delete_policy_version(arn, oldest)
                    })
                    .await?;
                }
            }
        }
        self.call("iam.create_policy_version", || {
            policies.create_policy_version(arn, &document)
        })
        .await?;
        Ok(self.finish(ResourceKind::Policy, &desired.name, &plan, None))
    }
}
