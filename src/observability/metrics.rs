//! # Provisioning Metrics
//!
//! Counters and histograms for reconcile actions, readiness waits and
//! rotations. A one-shot CLI has no scrape endpoint, so the registry is
//! rendered in the Prometheus text format and optionally written to a
//! textfile-collector path at the end of a run.

use crate::orchestrator::ProvisionState;
use anyhow::{Context, Result};
use prometheus::{Encoder, HistogramVec, IntCounterVec, IntGauge, Registry, TextEncoder};
use std::path::Path;
use std::sync::{LazyLock, Once};

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILE_ACTIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "secret_provisioner_reconcile_actions_total",
            "Resources reconciled, by resource kind and action taken",
        ),
        &["kind", "action"],
    )
    .expect("Failed to create RECONCILE_ACTIONS_TOTAL metric - this should never happen")
});

static VERIFIER_ATTEMPTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "secret_provisioner_verifier_attempts_total",
            "Readiness checks issued, by condition",
        ),
        &["condition"],
    )
    .expect("Failed to create VERIFIER_ATTEMPTS_TOTAL metric - this should never happen")
});

static VERIFIER_TIMEOUTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "secret_provisioner_verifier_timeouts_total",
            "Readiness waits that ran out of time, by condition",
        ),
        &["condition"],
    )
    .expect("Failed to create VERIFIER_TIMEOUTS_TOTAL metric - this should never happen")
});

static VERIFIER_WAIT_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "secret_provisioner_verifier_wait_seconds",
            "Time until a condition was observed ready, in seconds",
        )
        .buckets(vec![0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]),
        &["condition"],
    )
    .expect("Failed to create VERIFIER_WAIT_SECONDS metric - this should never happen")
});

static ROTATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "secret_provisioner_rotations_total",
            "Rotation attempts, by result",
        ),
        &["result"],
    )
    .expect("Failed to create ROTATIONS_TOTAL metric - this should never happen")
});

static ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "secret_provisioner_errors_total",
            "Runs that stopped on an error, by error kind",
        ),
        &["kind"],
    )
    .expect("Failed to create ERRORS_TOTAL metric - this should never happen")
});

static REACHED_STATE: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "secret_provisioner_reached_state",
        "Ordinal of the highest provisioning state reached (0 = Unprovisioned, 6 = Verified)",
    )
    .expect("Failed to create REACHED_STATE metric - this should never happen")
});

static REGISTER: Once = Once::new();

/// Register all collectors with [`REGISTRY`]. Safe to call more than once.
pub fn register_metrics() -> Result<()> {
    let mut result = Ok(());
    REGISTER.call_once(|| {
        result = register_all();
    });
    result
}

fn register_all() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILE_ACTIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(VERIFIER_ATTEMPTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(VERIFIER_TIMEOUTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(VERIFIER_WAIT_SECONDS.clone()))?;
    REGISTRY.register(Box::new(ROTATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REACHED_STATE.clone()))?;
    Ok(())
}

pub fn increment_reconcile_actions(kind: &str, action: &str) {
    RECONCILE_ACTIONS_TOTAL.with_label_values(&[kind, action]).inc();
}

pub fn increment_verifier_attempts(condition: &str) {
    VERIFIER_ATTEMPTS_TOTAL.with_label_values(&[condition]).inc();
}

pub fn increment_verifier_timeouts(condition: &str) {
    VERIFIER_TIMEOUTS_TOTAL.with_label_values(&[condition]).inc();
}

pub fn observe_verifier_wait(condition: &str, seconds: f64) {
    VERIFIER_WAIT_SECONDS
        .with_label_values(&[condition])
        .observe(seconds);
}

pub fn increment_rotations(result: &str) {
    ROTATIONS_TOTAL.with_label_values(&[result]).inc();
}

pub fn increment_errors(kind: &str) {
    ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn set_reached_state(state: ProvisionState) {
    REACHED_STATE.set(state as i64);
}

/// Registry contents in the Prometheus text exposition format
pub fn render() -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&REGISTRY.gather(), &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics output is not UTF-8")
}

/// Write the registry to `path` for a node-exporter textfile collector
pub fn write_textfile(path: &Path) -> Result<()> {
    let rendered = render()?;
    std::fs::write(path, rendered)
        .with_context(|| format!("Failed to write metrics to {}", path.display()))
}
