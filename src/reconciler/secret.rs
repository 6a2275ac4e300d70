//! Upstream secret: seeded once, never overwritten by provisioning.

use super::{Plan, ReconcileOutcome, Reconciler};
use crate::descriptor::SecretDescriptor;
use crate::error::{ProvisionError, ResourceKind, Result};
use crate::orchestrator::ProvisionState;
use crate::provider::{CreateOutcome, SecretMetadata};

pub fn plan_secret(observed: Option<&SecretMetadata>, desired: &SecretDescriptor) -> Result<Plan> {
    if observed.is_some() {
        return Ok(Plan::Noop);
    }
    match &desired.value {
        Some(value) if value.is_empty() => Err(ProvisionError::invalid(
            ResourceKind::Secret,
            format!("value supplied for {} is empty", desired.name),
        )),
        Some(_) => Ok(Plan::Create),
        None => Err(ProvisionError::PreconditionUnmet {
            required: ProvisionState::PolicyReady,
            reached: ProvisionState::Unprovisioned,
            message: format!(
                "secret {} does not exist and no value was supplied (use --value-env, --value-file or stdin)",
                desired.name
            ),
        }),
    }
}

impl Reconciler {
    pub async fn reconcile_secret(&self, desired: &SecretDescriptor) -> Result<ReconcileOutcome> {
        let key = desired.name.to_string();
        let secrets = &self.providers.secrets;
        let observed = self
            .call("secrets.describe", || secrets.describe_secret(&desired.name))
            .await?;
        let plan = plan_secret(observed.as_ref(), desired)?;

        if self.dry_run || plan.is_noop() {
            return Ok(self.finish(ResourceKind::Secret, &key, &plan, None));
        }

        // plan_secret only returns Create when a value is present
        let Some(value) = desired.value.as_ref() else {
            return Ok(self.finish(ResourceKind::Secret, &key, &Plan::Noop, None));
        };
        let created = self
            .call("secrets.create", || secrets.create_secret(&desired.name, value))
            .await?;
        match created {
            CreateOutcome::Created => Ok(self.finish(
                ResourceKind::Secret,
                &key,
                &plan,
                Some(format!("hash {}", value.hash().short())),
            )),
            CreateOutcome::AlreadyExists => Ok(self.finish(
                ResourceKind::Secret,
                &key,
                &Plan::Noop,
                Some("created concurrently".to_string()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::SecretValue;

    fn descriptor(value: Option<&str>) -> SecretDescriptor {
        SecretDescriptor {
            name: "app/db-url".parse().unwrap(),
            region: "us-east-1".to_string(),
            cluster: "tiles".to_string(),
            value: value.map(SecretValue::new),
        }
    }

    #[test]
    fn test_existing_secret_is_never_overwritten() {
        let observed = SecretMetadata {
            name: "app/db-url".to_string(),
            arn: "arn:aws:secretsmanager:us-east-1:1:secret:app/db-url-AbC".to_string(),
        };
        assert_eq!(
            plan_secret(Some(&observed), &descriptor(Some("postgres://new"))).unwrap(),
            Plan::Noop
        );
    }

    #[test]
    fn test_absent_secret_needs_value() {
        assert_eq!(
            plan_secret(None, &descriptor(Some("postgres://x"))).unwrap(),
            Plan::Create
        );
        assert!(matches!(
            plan_secret(None, &descriptor(None)),
            Err(ProvisionError::PreconditionUnmet { .. })
        ));
        assert!(matches!(
            plan_secret(None, &descriptor(Some(""))),
            Err(ProvisionError::InvalidDescriptor { .. })
        ));
    }
}
