//! Exponential backoff with proportional jitter for readiness polling.

use crate::constants::{VERIFIER_BACKOFF_BASE_SECS, VERIFIER_BACKOFF_CAP_SECS, VERIFIER_JITTER_RATIO};
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub cap: Duration,
    /// Fraction of the delay added or removed at random, e.g. 0.2 for ±20%
    pub jitter: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(VERIFIER_BACKOFF_BASE_SECS),
            cap: Duration::from_secs(VERIFIER_BACKOFF_CAP_SECS),
            jitter: VERIFIER_JITTER_RATIO,
        }
    }
}

impl ExponentialBackoff {
    /// Delay before the retry following `attempt` (0-based); never exceeds `cap`
    ///
    /// `cap` is a hard ceiling, so once the nominal delay reaches it jitter
    /// can only shorten the sleep: capped delays fall in `[cap * (1 - jitter), cap]`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let raw = self.base.as_secs_f64() * f64::from(1u32 << exponent);
        let bounded = raw.min(self.cap.as_secs_f64());
        let factor = if self.jitter > 0.0 {
            rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter))
        } else {
            1.0
        };
        Duration::from_secs_f64((bounded * factor).min(self.cap.as_secs_f64()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_then_caps() {
        let backoff = ExponentialBackoff {
            jitter: 0.0,
            ..Default::default()
        };
        assert_eq!(backoff.delay(0), Duration::from_secs(2));
        assert_eq!(backoff.delay(1), Duration::from_secs(4));
        assert_eq!(backoff.delay(3), Duration::from_secs(16));
        assert_eq!(backoff.delay(4), Duration::from_secs(30));
        assert_eq!(backoff.delay(40), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let backoff = ExponentialBackoff::default();
        for attempt in 0..8 {
            let delay = backoff.delay(attempt).as_secs_f64();
            let nominal = (2.0 * f64::from(1u32 << attempt)).min(30.0);
            assert!(delay >= nominal * 0.8 - 1e-9, "attempt {attempt}: {delay}");
            assert!(delay <= 30.0 + 1e-9, "attempt {attempt}: {delay}");
        }
    }

    #[test]
    fn test_capped_delay_only_jitters_downward() {
        let backoff = ExponentialBackoff::default();
        for _ in 0..50 {
            let delay = backoff.delay(10).as_secs_f64();
            assert!((24.0 - 1e-9..=30.0 + 1e-9).contains(&delay), "{delay}");
        }
    }
}
