//! # Rotation Controller
//!
//! Re-walks the tail of the pipeline for a new secret value:
//!
//! 1. Refuse unless the pipeline has reached `SecretSynced` (no mutation)
//! 2. Snapshot the cluster secret
//! 3. Write the new value upstream under the existing name, unless the
//!    store already holds it
//! 4. Forced: delete the cluster secret so the operator recreates it.
//!    Passive: wait for the scheduled refresh
//! 5. Wait until the cluster key hash equals the new value's hash
//! 6. Restart the consumer once, only after step 5
//!
//! If step 5 times out, the cluster secret is put back to the snapshot when
//! it is missing or holds neither the old nor the new value, and no restart
//! is issued.

use crate::constants::PASSIVE_REFRESH_SLACK_SECS;
use crate::descriptor::{ContentHash, DescriptorSet, SecretValue};
use crate::error::{ProvisionError, ResourceKind, Result};
use crate::observability::metrics;
use crate::orchestrator::{Orchestrator, ProvisionState};
use crate::provider::ClusterSecret;
use crate::verifier::{Probe, WaitOutcome};
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, warn};

/// How the cluster copy picks up the new value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMode {
    /// Delete the cluster secret so the operator re-syncs immediately
    #[default]
    Forced,
    /// Wait for the next scheduled refresh
    Passive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RotationOutcome {
    Completed {
        /// Short content hash now in the cluster
        hash: String,
        reload_signaled: bool,
    },
    /// The cluster never picked up the new value; the prior value stays in place
    Incomplete {
        last_observed: String,
        /// Short content hash left in the cluster
        hash: String,
        restored: bool,
    },
}

impl RotationOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RotationOutcome::Completed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct RotationController {
    orchestrator: Orchestrator,
    consumer: Option<String>,
}

impl RotationController {
    /// `consumer` is the Deployment restarted after a successful rotation
    pub fn new(orchestrator: Orchestrator, consumer: Option<String>) -> Self {
        Self {
            orchestrator,
            consumer,
        }
    }

    fn wait_timeout(&self, set: &DescriptorSet, mode: RefreshMode) -> Duration {
        match mode {
            RefreshMode::Forced => self.orchestrator.sync_timeout(),
            RefreshMode::Passive => {
                set.sync.refresh_interval + Duration::from_secs(PASSIVE_REFRESH_SLACK_SECS)
            }
        }
    }

    async fn cluster_hash(&self, set: &DescriptorSet) -> Result<Option<ContentHash>> {
        let secret = self
            .orchestrator
            .reconciler()
            .providers()
            .cluster
            .get_secret(&set.sync.namespace, &set.sync.target_secret)
            .await?;
        Ok(secret.and_then(|s| s.key_hash(&set.sync.target_key)))
    }

    pub async fn rotate(
        &self,
        set: &DescriptorSet,
        new_value: &SecretValue,
        mode: RefreshMode,
    ) -> Result<RotationOutcome> {
        let result = self.rotate_inner(set, new_value, mode).await;
        let label = match &result {
            Ok(RotationOutcome::Completed { .. }) => "completed",
            Ok(RotationOutcome::Incomplete { .. }) => "incomplete",
            Err(ProvisionError::PreconditionUnmet { .. }) => "refused",
            Err(_) => "failed",
        };
        metrics::increment_rotations(label);
        if let Err(e) = &result {
            metrics::increment_errors(e.as_str());
        }
        result
    }

    /// State the pipeline holds after `rotate` returned `error`
    ///
    /// A refusal carries it; any other failure is followed by a read-only
    /// observation. `None` when that observation fails too.
    pub async fn reached_after(
        &self,
        set: &DescriptorSet,
        error: &ProvisionError,
    ) -> Option<ProvisionState> {
        if let ProvisionError::PreconditionUnmet { reached, .. } = error {
            return Some(*reached);
        }
        match self.orchestrator.observe(set).await {
            Ok(status) => Some(status.reached),
            Err(e) => {
                warn!("Could not observe the pipeline after a failed rotation: {e}");
                None
            }
        }
    }

    async fn rotate_inner(
        &self,
        set: &DescriptorSet,
        new_value: &SecretValue,
        mode: RefreshMode,
    ) -> Result<RotationOutcome> {
        if new_value.is_empty() {
            return Err(ProvisionError::invalid(
                ResourceKind::Secret,
                "rotation value is empty",
            ));
        }

        let status = self.orchestrator.observe(set).await?;
        if status.reached < ProvisionState::SecretSynced {
            warn!(
                "Refusing to rotate {}: pipeline has only reached {}",
                set.secret.name, status.reached
            );
            return Err(ProvisionError::PreconditionUnmet {
                required: ProvisionState::SecretSynced,
                reached: status.reached,
                message: format!(
                    "rotation needs the cluster secret {} to be synced first",
                    set.sync.key()
                ),
            });
        }

        let providers = self.orchestrator.reconciler().providers();
        let cluster = &providers.cluster;
        let (namespace, target) = (&set.sync.namespace, &set.sync.target_secret);

        let snapshot: ClusterSecret = cluster.get_secret(namespace, target).await?.ok_or_else(|| {
            ProvisionError::PreconditionUnmet {
                required: ProvisionState::SecretSynced,
                reached: ProvisionState::SyncRequested,
                message: format!("cluster secret {} disappeared", set.sync.key()),
            }
        })?;
        let old_hash = snapshot.key_hash(&set.sync.target_key);
        let new_hash = new_value.hash();
        info!(
            secret = %set.secret.name,
            mode = ?mode,
            old_hash = old_hash.as_ref().map_or("none", ContentHash::short),
            new_hash = new_hash.short(),
            "Rotating secret"
        );

        let reconciler = self.orchestrator.reconciler();
        let cluster_current = old_hash.as_ref() == Some(&new_hash);
        let upstream_hash = reconciler
            .call("secrets.read", || {
                providers.secrets.read_secret_value(&set.secret.name)
            })
            .await?
            .hash();
        if cluster_current && upstream_hash == new_hash {
            info!("Store and cluster already hold the requested value; nothing to rotate");
            return Ok(RotationOutcome::Completed {
                hash: new_hash.short().to_string(),
                reload_signaled: false,
            });
        }

        if upstream_hash != new_hash {
            reconciler
                .call("secrets.put", || {
                    providers.secrets.put_secret_value(&set.secret.name, new_value)
                })
                .await?;
        }

        if mode == RefreshMode::Forced && !cluster_current {
            reconciler
                .call("cluster.delete_secret", || cluster.delete_secret(namespace, target))
                .await?;
        }

        let expected = &new_hash;
        let waited = self
            .orchestrator
            .verifier()
            .await_condition("RotationSynced", self.wait_timeout(set, mode), move || async move {
                Ok(match self.cluster_hash(set).await? {
                    Some(hash) if hash == *expected => Probe::Ready(hash),
                    Some(hash) => Probe::Pending(format!("cluster hash {}", hash.short())),
                    None => Probe::Pending(format!("{} not recreated yet", set.sync.key())),
                })
            })
            .await;

        let last_observed = match waited {
            Ok(WaitOutcome::Ready { .. }) => return self.signal_reload(set, &new_hash).await,
            Ok(WaitOutcome::TimedOut { last_observed, .. }) => last_observed,
            Err(e) => {
                self.restore_if_needed(set, &snapshot, old_hash.as_ref(), &new_hash)
                    .await?;
                return Err(e);
            }
        };

        let current = self.cluster_hash(set).await?;
        if current.as_ref() == Some(&new_hash) {
            return self.signal_reload(set, &new_hash).await;
        }
        let restored = self
            .restore_if_needed(set, &snapshot, old_hash.as_ref(), &new_hash)
            .await?;
        error!(
            "Rotation of {} incomplete: cluster secret {} did not pick up the new value ({}). \
             The prior value is in place and {} was not restarted. \
             Check: kubectl describe externalsecret {} -n {}",
            set.secret.name,
            set.sync.key(),
            last_observed,
            self.consumer.as_deref().unwrap_or("no consumer"),
            target,
            namespace
        );
        Ok(RotationOutcome::Incomplete {
            last_observed,
            hash: old_hash
                .as_ref()
                .map_or_else(String::new, |h| h.short().to_string()),
            restored,
        })
    }

    /// Put the snapshot back unless the cluster holds the old or new value
    async fn restore_if_needed(
        &self,
        set: &DescriptorSet,
        snapshot: &ClusterSecret,
        old_hash: Option<&ContentHash>,
        new_hash: &ContentHash,
    ) -> Result<bool> {
        let current = self.cluster_hash(set).await?;
        let intact = current
            .as_ref()
            .is_some_and(|hash| Some(hash) == old_hash || hash == new_hash);
        if intact {
            return Ok(false);
        }
        warn!(
            "Restoring cluster secret {} from the pre-rotation snapshot",
            set.sync.key()
        );
        self.orchestrator
            .reconciler()
            .providers()
            .cluster
            .restore_secret(&set.sync.namespace, &set.sync.target_secret, snapshot)
            .await?;
        Ok(true)
    }

    async fn signal_reload(&self, set: &DescriptorSet, new_hash: &ContentHash) -> Result<RotationOutcome> {
        let Some(consumer) = self.consumer.as_deref() else {
            info!(
                "Rotation of {} complete (hash {}); no consumer configured to reload",
                set.secret.name,
                new_hash.short()
            );
            return Ok(RotationOutcome::Completed {
                hash: new_hash.short().to_string(),
                reload_signaled: false,
            });
        };
        let reconciler = self.orchestrator.reconciler();
        reconciler
            .call("cluster.restart_workload", || {
                reconciler
                    .providers()
                    .cluster
                    .restart_workload(&set.sync.namespace, consumer)
            })
            .await?;
        info!(
            "Rotation of {} complete (hash {}); restarted deployment {}/{}",
            set.secret.name,
            new_hash.short(),
            set.sync.namespace,
            consumer
        );
        Ok(RotationOutcome::Completed {
            hash: new_hash.short().to_string(),
            reload_signaled: true,
        })
    }
}
