//! Namespaced secret-store binding.

use super::{Plan, ReconcileOutcome, Reconciler};
use crate::descriptor::StoreBinding;
use crate::error::{ProvisionError, ResourceKind, Result};
use crate::provider::ObservedStoreBinding;

pub fn plan_store(observed: Option<&ObservedStoreBinding>, desired: &StoreBinding) -> Result<Plan> {
    let Some(observed) = observed else {
        return Ok(Plan::Create);
    };
    if !observed.managed {
        return Err(ProvisionError::conflict(
            ResourceKind::StoreBinding,
            desired.key(),
            "existing SecretStore is not managed by provisionctl",
        ));
    }

    let current = &observed.binding;
    let mut drift = Vec::new();
    if current.region != desired.region {
        drift.push(format!("region {} -> {}", current.region, desired.region));
    }
    if current.service != desired.service {
        drift.push(format!("service {} -> {}", current.service, desired.service));
    }
    if current.service_account != desired.service_account {
        drift.push(format!(
            "service account {} -> {}",
            current.service_account, desired.service_account
        ));
    }
    if drift.is_empty() {
        Ok(Plan::Noop)
    } else {
        Ok(Plan::Update(drift.join(", ")))
    }
}

impl Reconciler {
    pub async fn reconcile_store(&self, desired: &StoreBinding) -> Result<ReconcileOutcome> {
        let cluster = &self.providers.cluster;
        let observed = self
            .call("cluster.get_store_binding", || {
                cluster.get_store_binding(&desired.namespace, &desired.name)
            })
            .await?;
        let plan = plan_store(observed.as_ref(), desired)?;

        if !self.dry_run && !plan.is_noop() {
            self.call("cluster.apply_store_binding", || cluster.apply_store_binding(desired))
                .await?;
        }
        Ok(self.finish(ResourceKind::StoreBinding, &desired.key(), &plan, None))
    }
}
