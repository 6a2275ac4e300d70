//! # Provisioning Orchestrator
//!
//! Walks the descriptor set through the state machine in [`state`]. Each
//! state is first reconciled, then verified, and the run only advances once
//! the verifier confirms readiness:
//!
//! | State | Reconciled | Ready when |
//! |---|---|---|
//! | `PolicyReady` | upstream secret, policy | stored policy matches the descriptor |
//! | `IdentityBound` | role trust, attachment, service account | all three match |
//! | `StoreReady` | SecretStore | operator reports `Ready=True` |
//! | `SyncRequested` | ExternalSecret | request matches the descriptor |
//! | `SecretSynced` | | status `Synced` and the target key exists |
//! | `Verified` | | cluster key hash equals the store value hash |
//!
//! A hard failure halts at the last verified state; nothing is torn down.
//! Re-running resumes, because satisfied states reconcile to `AlreadyPresent`.
//! Provisioning never restarts the consumer workload.

mod report;
mod state;

pub use report::{FailureReport, LayerStatus, ProvisionReport, StatusReport, StepReport, Verification};
pub use state::ProvisionState;

use crate::config::ProvisionerConfig;
use crate::descriptor::{DescriptorSet, SyncStatus};
use crate::error::{ProvisionError, Result};
use crate::observability::metrics;
use crate::provider::Readiness;
use crate::reconciler::{plan_identity, plan_policy, plan_sync, Plan, ReconcileOutcome, Reconciler};
use crate::verifier::{Probe, Verifier, WaitOutcome};
use std::time::Duration;
use tracing::{error, info, info_span, warn, Instrument};

#[derive(Debug, Clone)]
pub struct Orchestrator {
    reconciler: Reconciler,
    verifier: Verifier,
    identity_timeout: Duration,
    sync_timeout: Duration,
}

impl Orchestrator {
    pub fn new(reconciler: Reconciler, verifier: Verifier, config: &ProvisionerConfig) -> Self {
        Self {
            reconciler,
            verifier,
            identity_timeout: config.identity_timeout,
            sync_timeout: config.sync_timeout,
        }
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    pub fn sync_timeout(&self) -> Duration {
        self.sync_timeout
    }

    fn timeout_for(&self, state: ProvisionState) -> Duration {
        match state {
            ProvisionState::PolicyReady | ProvisionState::IdentityBound => self.identity_timeout,
            _ => self.sync_timeout,
        }
    }

    fn diagnostics(state: ProvisionState, set: &DescriptorSet) -> Vec<String> {
        state.diagnostics(&set.sync.namespace, &set.store.name, &set.sync.target_secret)
    }

    /// Reconcile the resources owned by `state`, appending outcomes as they complete
    async fn reconcile_step(
        &self,
        state: ProvisionState,
        set: &DescriptorSet,
        outcomes: &mut Vec<ReconcileOutcome>,
    ) -> Result<()> {
        let reconciler = &self.reconciler;
        match state {
            ProvisionState::Unprovisioned => {}
            ProvisionState::PolicyReady => {
                outcomes.push(reconciler.reconcile_secret(&set.secret).await?);
                outcomes.push(
                    reconciler
                        .reconcile_policy(&set.policy, &set.identity.policy_arn())
                        .await?,
                );
            }
            ProvisionState::IdentityBound => {
                outcomes.push(reconciler.reconcile_identity(&set.identity).await?);
            }
            ProvisionState::StoreReady => {
                outcomes.push(reconciler.reconcile_store(&set.store).await?);
            }
            ProvisionState::SyncRequested => {
                outcomes.push(reconciler.reconcile_sync(&set.sync).await?);
            }
            ProvisionState::SecretSynced | ProvisionState::Verified => {}
        }
        Ok(())
    }

    /// Single readiness check of one state, read-only
    pub async fn probe(&self, state: ProvisionState, set: &DescriptorSet) -> Result<Probe<String>> {
        let providers = self.reconciler.providers();
        match state {
            ProvisionState::Unprovisioned => Ok(Probe::Ready("nothing required".to_string())),
            ProvisionState::PolicyReady => {
                let observed = providers
                    .policies
                    .get_policy(&set.identity.policy_arn())
                    .await?;
                let Some(policy) = observed else {
                    return Ok(Probe::Pending(format!("policy {} not visible", set.policy.name)));
                };
                Ok(match plan_policy(Some(&policy), &set.policy)? {
                    Plan::Noop => Probe::Ready(format!(
                        "policy {} at version {}",
                        set.policy.name, policy.default_version
                    )),
                    Plan::Update(reason) => Probe::Pending(format!("policy pending update: {reason}")),
                    Plan::Create => Probe::Pending(format!("policy {} not visible", set.policy.name)),
                })
            }
            ProvisionState::IdentityBound => {
                let identity = &set.identity;
                let role = providers.identities.get_role(&identity.role_name).await?;
                if role.is_none() {
                    return Ok(Probe::Pending(format!("role {} not visible", identity.role_name)));
                }
                let account = providers
                    .cluster
                    .get_service_account(&identity.namespace, &identity.service_account)
                    .await?;
                Ok(match plan_identity(role.as_ref(), account.as_ref(), identity)?.summary() {
                    Plan::Noop => Probe::Ready(format!(
                        "{} bound to {}/{}",
                        identity.role_arn(),
                        identity.namespace,
                        identity.service_account
                    )),
                    Plan::Update(reason) => Probe::Pending(reason),
                    Plan::Create => Probe::Pending("identity binding incomplete".to_string()),
                })
            }
            ProvisionState::StoreReady => {
                let observed = providers
                    .cluster
                    .get_store_binding(&set.store.namespace, &set.store.name)
                    .await?;
                Ok(match observed {
                    None => Probe::Pending(format!("SecretStore {} not found", set.store.key())),
                    Some(store) if store.readiness == Readiness::Ready => {
                        Probe::Ready(format!("SecretStore {} ready", set.store.key()))
                    }
                    Some(store) => Probe::Pending(format!(
                        "SecretStore {} {}",
                        set.store.key(),
                        store.readiness
                    )),
                })
            }
            ProvisionState::SyncRequested => {
                let observed = providers
                    .cluster
                    .get_sync_request(&set.sync.namespace, &set.sync.target_secret)
                    .await?;
                let Some(request) = observed else {
                    return Ok(Probe::Pending(format!("ExternalSecret {} not found", set.sync.key())));
                };
                Ok(match plan_sync(Some(&request), &set.sync)? {
                    Plan::Noop => Probe::Ready(format!(
                        "ExternalSecret {} status {}",
                        set.sync.key(),
                        request.status
                    )),
                    Plan::Update(reason) => Probe::Pending(reason),
                    Plan::Create => Probe::Pending("ExternalSecret not found".to_string()),
                })
            }
            ProvisionState::SecretSynced => {
                let observed = providers
                    .cluster
                    .get_sync_request(&set.sync.namespace, &set.sync.target_secret)
                    .await?;
                let status = observed.map_or(SyncStatus::Pending, |request| request.status);
                if status != SyncStatus::Synced {
                    return Ok(Probe::Pending(format!("sync status {status}")));
                }
                let secret = providers
                    .cluster
                    .get_secret(&set.sync.namespace, &set.sync.target_secret)
                    .await?;
                Ok(match secret {
                    Some(secret) if secret.data.contains_key(&set.sync.target_key) => {
                        Probe::Ready(format!("{} has key {}", set.sync.key(), set.sync.target_key))
                    }
                    Some(_) => Probe::Pending(format!(
                        "{} is missing key {}",
                        set.sync.key(),
                        set.sync.target_key
                    )),
                    None => Probe::Pending(format!("secret {} not created yet", set.sync.key())),
                })
            }
            ProvisionState::Verified => {
                let secret = providers
                    .cluster
                    .get_secret(&set.sync.namespace, &set.sync.target_secret)
                    .await?;
                let Some(cluster_hash) = secret.and_then(|s| s.key_hash(&set.sync.target_key))
                else {
                    return Ok(Probe::Pending(format!(
                        "{} has no key {}",
                        set.sync.key(),
                        set.sync.target_key
                    )));
                };
                let store_hash = providers
                    .secrets
                    .read_secret_value(&set.secret.name)
                    .await?
                    .hash();
                Ok(if cluster_hash == store_hash {
                    Probe::Ready(format!("content hash {}", cluster_hash.short()))
                } else {
                    Probe::Pending(format!(
                        "cluster hash {} differs from store hash {}",
                        cluster_hash.short(),
                        store_hash.short()
                    ))
                })
            }
        }
    }

    async fn wait_for(&self, state: ProvisionState, set: &DescriptorSet) -> Result<Verification> {
        let outcome = self
            .verifier
            .await_condition(state.as_str(), self.timeout_for(state), || self.probe(state, set))
            .await?;
        Ok(match outcome {
            WaitOutcome::Ready { value, attempts } => Verification::Ready {
                attempts,
                observed: value,
            },
            WaitOutcome::TimedOut {
                last_observed,
                attempts,
            } => Verification::TimedOut {
                attempts,
                last_observed,
            },
        })
    }

    fn halt(state: ProvisionState, set: &DescriptorSet, error: ProvisionError) -> FailureReport {
        metrics::increment_errors(error.as_str());
        if error.is_soft() {
            warn!(
                state = %state,
                error = %error,
                "Provisioning paused before {}; re-run to resume",
                state
            );
        } else {
            error!(
                state = %state,
                error = %error,
                "Provisioning halted before {}. {}",
                state,
                error.remediation()
            );
        }
        FailureReport::new(state, error, Self::diagnostics(state, set))
    }

    /// Reconcile and verify every state in order
    pub async fn provision(&self, set: &DescriptorSet) -> ProvisionReport {
        let dry_run = self.reconciler.is_dry_run();
        let mut reached = ProvisionState::Unprovisioned;
        let mut steps = Vec::new();
        let mut failure = None;

        for state in ProvisionState::STEPS {
            let span = info_span!("provision.step", state = %state, dry_run = dry_run);
            let (step, halted) = async {
                let mut reconciled = Vec::new();
                if let Err(e) = self.reconcile_step(state, set, &mut reconciled).await {
                    return (
                        StepReport {
                            state,
                            reconciled,
                            verification: Verification::Skipped,
                        },
                        Some(e),
                    );
                }
                if dry_run {
                    return (
                        StepReport {
                            state,
                            reconciled,
                            verification: Verification::Skipped,
                        },
                        None,
                    );
                }
                match self.wait_for(state, set).await {
                    Ok(verification) => {
                        let timed_out = match &verification {
                            Verification::TimedOut { last_observed, .. } => {
                                Some(ProvisionError::PropagationTimeout {
                                    state,
                                    last_observed: last_observed.clone(),
                                })
                            }
                            _ => None,
                        };
                        (
                            StepReport {
                                state,
                                reconciled,
                                verification,
                            },
                            timed_out,
                        )
                    }
                    Err(e) => (
                        StepReport {
                            state,
                            reconciled,
                            verification: Verification::Skipped,
                        },
                        Some(e),
                    ),
                }
            }
            .instrument(span)
            .await;

            steps.push(step);
            if let Some(error) = halted {
                failure = Some(Self::halt(state, set, error));
                break;
            }
            if !dry_run {
                reached = state;
                info!("Reached {}", state);
            }
        }

        if dry_run {
            reached = match self.observe(set).await {
                Ok(status) => status.reached,
                Err(_) => ProvisionState::Unprovisioned,
            };
        }
        metrics::set_reached_state(reached);

        ProvisionReport {
            reached,
            dry_run,
            steps,
            failure,
        }
    }

    /// Run the verifier over every state without mutating anything
    pub async fn verify(&self, set: &DescriptorSet) -> ProvisionReport {
        let mut reached = ProvisionState::Unprovisioned;
        let mut steps = Vec::new();
        let mut failure = None;

        for state in ProvisionState::STEPS {
            let span = info_span!("verify.step", state = %state);
            let result = self.wait_for(state, set).instrument(span).await;
            match result {
                Ok(Verification::TimedOut { last_observed, attempts }) => {
                    steps.push(StepReport {
                        state,
                        reconciled: Vec::new(),
                        verification: Verification::TimedOut {
                            attempts,
                            last_observed: last_observed.clone(),
                        },
                    });
                    failure = Some(Self::halt(
                        state,
                        set,
                        ProvisionError::PropagationTimeout {
                            state,
                            last_observed,
                        },
                    ));
                    break;
                }
                Ok(verification) => {
                    steps.push(StepReport {
                        state,
                        reconciled: Vec::new(),
                        verification,
                    });
                    reached = state;
                }
                Err(e) => {
                    steps.push(StepReport {
                        state,
                        reconciled: Vec::new(),
                        verification: Verification::Skipped,
                    });
                    failure = Some(Self::halt(state, set, e));
                    break;
                }
            }
        }
        metrics::set_reached_state(reached);

        ProvisionReport {
            reached,
            dry_run: false,
            steps,
            failure,
        }
    }

    /// Probe every layer once and report the highest contiguous state
    pub async fn observe(&self, set: &DescriptorSet) -> Result<StatusReport> {
        let mut reached = ProvisionState::Unprovisioned;
        let mut contiguous = true;
        let mut layers = Vec::new();

        for state in ProvisionState::STEPS {
            let (ready, observed) = match self.probe(state, set).await {
                Ok(Probe::Ready(observed)) => (true, observed),
                Ok(Probe::Pending(observed)) => (false, observed),
                Err(ProvisionError::Cancelled(reason)) => {
                    return Err(ProvisionError::Cancelled(reason));
                }
                Err(e) => (false, format!("error: {e}")),
            };
            if ready && contiguous {
                reached = state;
            } else {
                contiguous = false;
            }
            layers.push(LayerStatus {
                state,
                ready,
                observed,
            });
        }

        Ok(StatusReport { reached, layers })
    }
}
