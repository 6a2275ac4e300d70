//! Run reports printed by the CLI (text or JSON).

use super::ProvisionState;
use crate::error::ProvisionError;
use crate::reconciler::ReconcileOutcome;
use serde::Serialize;

/// How a state's readiness check ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Verification {
    Ready { attempts: u32, observed: String },
    TimedOut { attempts: u32, last_observed: String },
    /// Dry run, or the step failed before verification
    Skipped,
}

/// One state of a run
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub state: ProvisionState,
    pub reconciled: Vec<ReconcileOutcome>,
    pub verification: Verification,
}

/// Why a run stopped before `Verified`
#[derive(Debug, Serialize)]
pub struct FailureReport {
    /// State that could not be reached
    pub state: ProvisionState,
    pub kind: &'static str,
    pub message: String,
    pub remediation: String,
    pub diagnostics: Vec<String>,
    /// Soft failures converge on their own or on re-run
    pub soft: bool,
    #[serde(skip)]
    pub error: ProvisionError,
}

impl FailureReport {
    pub fn new(state: ProvisionState, error: ProvisionError, diagnostics: Vec<String>) -> Self {
        Self {
            state,
            kind: error.as_str(),
            message: error.to_string(),
            remediation: error.remediation(),
            diagnostics,
            soft: error.is_soft(),
            error,
        }
    }
}

/// Outcome of `provision` or `verify`
#[derive(Debug, Serialize)]
pub struct ProvisionReport {
    /// Highest state confirmed by the verifier
    pub reached: ProvisionState,
    pub dry_run: bool,
    pub steps: Vec<StepReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReport>,
}

impl ProvisionReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none() && (self.dry_run || self.reached == ProvisionState::Verified)
    }

    /// Every reconcile outcome of the run, in order
    pub fn outcomes(&self) -> impl Iterator<Item = &ReconcileOutcome> {
        self.steps.iter().flat_map(|step| step.reconciled.iter())
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for step in &self.steps {
            for outcome in &step.reconciled {
                out.push_str(&format!(
                    "  {:<16} {:<44} {}{}\n",
                    outcome.kind.as_str(),
                    outcome.key,
                    outcome.action,
                    if outcome.applied { "" } else { " (planned)" }
                ));
            }
            let verification = match &step.verification {
                Verification::Ready { attempts, .. } => format!("ready after {attempts} check(s)"),
                Verification::TimedOut { last_observed, .. } => {
                    format!("not ready: {last_observed}")
                }
                Verification::Skipped => "skipped".to_string(),
            };
            out.push_str(&format!("{:<14} {}\n", step.state.as_str(), verification));
        }
        if let Some(failure) = &self.failure {
            out.push_str(&format!(
                "\nstopped before {}: {}\n{}\n",
                failure.state, failure.message, failure.remediation
            ));
            for line in &failure.diagnostics {
                out.push_str(&format!("  $ {line}\n"));
            }
        }
        out.push_str(&format!("reached: {}\n", self.reached));
        out
    }
}

/// Single-shot observation of one layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerStatus {
    pub state: ProvisionState,
    pub ready: bool,
    pub observed: String,
}

/// Outcome of `status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    /// Highest state whose predecessors are all satisfied
    pub reached: ProvisionState,
    pub layers: Vec<LayerStatus>,
}

impl StatusReport {
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for layer in &self.layers {
            out.push_str(&format!(
                "{:<14} {:<5} {}\n",
                layer.state.as_str(),
                if layer.ready { "ok" } else { "--" },
                layer.observed
            ));
        }
        out.push_str(&format!("reached: {}\n", self.reached));
        out
    }
}
