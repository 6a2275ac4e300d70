//! # Verifier
//!
//! Polls a readiness probe until it reports ready, the per-state timeout
//! elapses, or the invocation is cancelled.
//!
//! - A probe that fails with a retryable error counts as "not ready yet"
//! - Any other probe error aborts the wait
//! - Sleeps between probes follow [`ExponentialBackoff`] and never overshoot the timeout
//! - Cancellation (Ctrl-C or the invocation deadline) interrupts a sleep immediately
//!
//! Timing out is not an error here. Callers decide whether a
//! [`WaitOutcome::TimedOut`] becomes a soft `PropagationTimeout`.

mod backoff;

pub use backoff::ExponentialBackoff;

use crate::error::{ProvisionError, Result};
use crate::observability::metrics;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Single observation of a condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T> {
    Ready(T),
    /// Not ready yet, with what was observed
    Pending(String),
}

/// Result of waiting on a condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome<T> {
    Ready { value: T, attempts: u32 },
    TimedOut { last_observed: String, attempts: u32 },
}

#[derive(Debug, Clone)]
pub struct Verifier {
    backoff: ExponentialBackoff,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Verifier {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            backoff: ExponentialBackoff::default(),
            cancel,
            deadline: None,
        }
    }

    /// Abort every wait once `timeout` has passed since now
    pub fn with_invocation_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ProvisionError::Cancelled("interrupted".to_string()));
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(ProvisionError::Cancelled(
                "invocation deadline exceeded".to_string(),
            ));
        }
        Ok(())
    }

    /// Poll `probe` until it is ready or `timeout` elapses
    pub async fn await_condition<T, F, Fut>(
        &self,
        what: &str,
        timeout: Duration,
        mut probe: F,
    ) -> Result<WaitOutcome<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Probe<T>>>,
    {
        let started = Instant::now();
        let wait_deadline = started + timeout;
        let mut attempts = 0u32;
        let mut last_observed = "not yet observed".to_string();

        loop {
            self.check_cancelled()?;
            attempts += 1;
            metrics::increment_verifier_attempts(what);

            match probe().await {
                Ok(Probe::Ready(value)) => {
                    metrics::observe_verifier_wait(what, started.elapsed().as_secs_f64());
                    info!(
                        condition = %what,
                        attempts = attempts,
                        elapsed_ms = started.elapsed().as_millis(),
                        "Condition ready"
                    );
                    return Ok(WaitOutcome::Ready { value, attempts });
                }
                Ok(Probe::Pending(observed)) => last_observed = observed,
                Err(e) if e.is_retryable() => last_observed = e.to_string(),
                Err(e) => return Err(e),
            }

            let now = Instant::now();
            if now >= wait_deadline {
                metrics::increment_verifier_timeouts(what);
                return Ok(WaitOutcome::TimedOut {
                    last_observed,
                    attempts,
                });
            }

            let mut delay = self.backoff.delay(attempts - 1).min(wait_deadline - now);
            if let Some(deadline) = self.deadline {
                delay = delay.min(deadline.saturating_duration_since(now));
            }
            debug!(
                condition = %what,
                attempt = attempts,
                observed = %last_observed,
                delay_ms = delay.as_millis(),
                "Condition not ready, polling again"
            );

            tokio::select! {
                () = self.cancel.cancelled() => {
                    return Err(ProvisionError::Cancelled("interrupted".to_string()));
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn counting_probe(
        ready_after: u32,
    ) -> (Arc<AtomicU32>, impl FnMut() -> std::future::Ready<Result<Probe<u32>>>) {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let probe = move || {
            let n = c.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(Ok(if n >= ready_after {
                Probe::Ready(n)
            } else {
                Probe::Pending(format!("attempt {n}"))
            }))
        };
        (calls, probe)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_polling() {
        let verifier = Verifier::new(CancellationToken::new());
        let (_, probe) = counting_probe(3);

        let outcome = verifier
            .await_condition("PolicyReady", Duration::from_secs(60), probe)
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Ready { value: 3, attempts: 3 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_with_last_observation() {
        let verifier = Verifier::new(CancellationToken::new());
        let (calls, probe) = counting_probe(u32::MAX);
        let started = Instant::now();

        let outcome = verifier
            .await_condition("StoreReady", Duration::from_secs(20), probe)
            .await
            .unwrap();

        let WaitOutcome::TimedOut { last_observed, attempts } = outcome else {
            panic!("expected timeout");
        };
        assert_eq!(attempts, calls.load(Ordering::SeqCst));
        assert_eq!(last_observed, format!("attempt {attempts}"));
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(20));
        assert!(waited < Duration::from_secs(21));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_probe_errors_keep_polling() {
        let verifier = Verifier::new(CancellationToken::new());
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);

        let outcome = verifier
            .await_condition("SecretSynced", Duration::from_secs(60), || {
                let n = c.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(ProvisionError::transient("cluster.get_secret", "503"))
                    } else {
                        Ok(Probe::Ready(()))
                    }
                }
            })
            .await
            .unwrap();
        assert!(matches!(outcome, WaitOutcome::Ready { attempts: 2, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_probe_error_aborts() {
        let verifier = Verifier::new(CancellationToken::new());
        let result: Result<WaitOutcome<()>> = verifier
            .await_condition("IdentityBound", Duration::from_secs(60), || async {
                Err(ProvisionError::provider(
                    "iam.get_role",
                    anyhow::anyhow!("AccessDenied"),
                ))
            })
            .await;
        assert!(matches!(result, Err(ProvisionError::Provider { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_sleep() {
        let cancel = CancellationToken::new();
        let verifier = Verifier::new(cancel.clone());
        let (_, probe) = counting_probe(u32::MAX);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result = verifier
            .await_condition("SecretSynced", Duration::from_secs(120), probe)
            .await;
        assert!(matches!(result, Err(ProvisionError::Cancelled(_))));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invocation_deadline_cancels() {
        let verifier = Verifier::new(CancellationToken::new())
            .with_invocation_timeout(Duration::from_secs(10));
        let (_, probe) = counting_probe(u32::MAX);

        let result = verifier
            .await_condition("SecretSynced", Duration::from_secs(120), probe)
            .await;
        match result {
            Err(ProvisionError::Cancelled(reason)) => {
                assert_eq!(reason, "invocation deadline exceeded");
            }
            other => panic!("expected deadline cancellation, got {other:?}"),
        }
    }
}
