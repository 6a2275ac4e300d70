//! # Idempotent Resource Reconciler
//!
//! Converges one descriptor at a time:
//!
//! 1. Look the resource up by its stable key
//! 2. Plan: absent → create, drifted → update, identical → no-op, incompatible → conflict
//! 3. Apply the plan (skipped in dry-run mode)
//!
//! Planning is pure (`plan_*` functions per kind) so conflict rules are
//! tested without providers. A create that races with another run and gets
//! "already exists" back re-reads the resource and re-plans once.
//!
//! Every reconcile is logged with kind, key and action. Values never are.

mod identity;
mod policy;
mod secret;
mod store;
mod sync;

pub use identity::{plan_identity, IdentityPlan};
pub use policy::plan_policy;
pub use secret::plan_secret;
pub use store::plan_store;
pub use sync::plan_sync;

use crate::error::{ResourceKind, Result};
use crate::observability::metrics;
use crate::provider::Providers;
use crate::retry::{retry_transient, RetryConfig};
use serde::Serialize;
use std::future::Future;
use tracing::info;

/// What a reconcile has to do for one resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    Create,
    /// Present but drifted; carries what differs
    Update(String),
    Noop,
}

impl Plan {
    pub fn action(&self) -> ReconcileAction {
        match self {
            Plan::Create => ReconcileAction::Created,
            Plan::Update(_) => ReconcileAction::Updated,
            Plan::Noop => ReconcileAction::AlreadyPresent,
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Plan::Noop)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ReconcileAction {
    AlreadyPresent,
    Updated,
    Created,
}

impl ReconcileAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ReconcileAction::AlreadyPresent => "already_present",
            ReconcileAction::Updated => "updated",
            ReconcileAction::Created => "created",
        }
    }
}

impl std::fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of reconciling one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub kind: ResourceKind,
    pub key: String,
    pub action: ReconcileAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// False when the plan was only computed (dry run)
    pub applied: bool,
}

/// Applies descriptors through the provider seams
#[derive(Debug, Clone)]
pub struct Reconciler {
    providers: Providers,
    retry: RetryConfig,
    dry_run: bool,
}

impl Reconciler {
    pub fn new(providers: Providers) -> Self {
        Self {
            providers,
            retry: RetryConfig::default(),
            dry_run: false,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn providers(&self) -> &Providers {
        &self.providers
    }

    /// Run a provider call with transient retries
    pub(crate) async fn call<T, F, Fut>(&self, operation: &str, f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        retry_transient(&self.retry, operation, f).await
    }

    fn finish(
        &self,
        kind: ResourceKind,
        key: &str,
        plan: &Plan,
        detail: Option<String>,
    ) -> ReconcileOutcome {
        let action = plan.action();
        let detail = detail.or_else(|| match plan {
            Plan::Update(reason) => Some(reason.clone()),
            _ => None,
        });
        info!(
            resource.kind = %kind,
            resource.key = %key,
            action = %action,
            dry_run = self.dry_run,
            detail = detail.as_deref().unwrap_or(""),
            "Reconciled resource"
        );
        if !self.dry_run {
            metrics::increment_reconcile_actions(kind.as_str(), action.as_str());
        }
        ReconcileOutcome {
            kind,
            key: key.to_string(),
            action,
            detail,
            applied: !self.dry_run,
        }
    }
}
