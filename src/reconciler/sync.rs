//! Secret sync request.
//!
//! The upstream mapping (remote key and store) is the request's identity:
//! repointing an existing target secret at another source is a conflict.
//! Target key and refresh interval are safe to update.

use super::{Plan, ReconcileOutcome, Reconciler};
use crate::descriptor::SecretSyncRequest;
use crate::error::{ProvisionError, ResourceKind, Result};
use crate::provider::ObservedSyncRequest;

pub fn plan_sync(observed: Option<&ObservedSyncRequest>, desired: &SecretSyncRequest) -> Result<Plan> {
    let Some(observed) = observed else {
        return Ok(Plan::Create);
    };
    let conflict = |reason: String| ProvisionError::conflict(ResourceKind::SyncRequest, desired.key(), reason);

    if !observed.managed {
        return Err(conflict(
            "existing ExternalSecret is not managed by provisionctl".to_string(),
        ));
    }
    let current = &observed.request;
    if current.remote_key != desired.remote_key {
        return Err(conflict(format!(
            "already syncs from '{}', refusing to repoint to '{}'",
            current.remote_key, desired.remote_key
        )));
    }
    if current.store_name != desired.store_name {
        return Err(conflict(format!(
            "already reads through store '{}', refusing to repoint to '{}'",
            current.store_name, desired.store_name
        )));
    }

    let mut drift = Vec::new();
    if current.target_key != desired.target_key {
        drift.push(format!("target key {} -> {}", current.target_key, desired.target_key));
    }
    if current.refresh_interval != desired.refresh_interval {
        drift.push(format!(
            "refresh interval {} -> {}",
            current.refresh_interval_string(),
            desired.refresh_interval_string()
        ));
    }
    if drift.is_empty() {
        Ok(Plan::Noop)
    } else {
        Ok(Plan::Update(drift.join(", ")))
    }
}

impl Reconciler {
    pub async fn reconcile_sync(&self, desired: &SecretSyncRequest) -> Result<ReconcileOutcome> {
        let cluster = &self.providers.cluster;
        let observed = self
            .call("cluster.get_sync_request", || {
                cluster.get_sync_request(&desired.namespace, &desired.target_secret)
            })
            .await?;
        let plan = plan_sync(observed.as_ref(), desired)?;

        if !self.dry_run && !plan.is_noop() {
            self.call("cluster.apply_sync_request", || cluster.apply_sync_request(desired))
                .await?;
        }
        Ok(self.finish(ResourceKind::SyncRequest, &desired.key(), &plan, None))
    }
}
