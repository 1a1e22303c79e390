//! Connection Retry Policy
//!
//! Bounded retry with exponential backoff and jitter, used while the broker
//! adapter comes up at startup.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Backoff settings for startup connection attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. At least one attempt is made.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor per failure (1.0 keeps the delay constant).
    pub multiplier: f64,
    /// Random spread as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            multiplier: 1.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Constant-delay policy.
    #[must_use]
    pub const fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            jitter_factor: 0.1,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based), before
    /// jitter.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        #[allow(clippy::cast_precision_loss)]
        let scaled_ms =
            (self.initial_delay.as_millis() as f64 * self.multiplier.max(1.0).powi(exponent))
                .round();
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        if !scaled_ms.is_finite() || scaled_ms < 0.0 {
            return self.max_delay;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let scaled_ms = scaled_ms as u64;
        Duration::from_millis(scaled_ms.min(max_ms))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter_factor <= 0.0 || delay.is_zero() {
            return delay;
        }
        let base = delay.as_secs_f64();
        let spread = base * self.jitter_factor;
        let offset: f64 = rand::rng().random_range(-spread..=spread);
        Duration::from_secs_f64((base + offset).max(0.0))
    }

    /// Run `attempt` until it succeeds or the attempts run out.
    ///
    /// `label` names the operation in log lines.
    ///
    /// # Errors
    ///
    /// Returns the error from the final attempt.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut attempt: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut tried = 1;
        loop {
            match attempt().await {
                Ok(value) => {
                    if tried > 1 {
                        tracing::info!(operation = label, attempts = tried, "Connected after retry");
                    }
                    return Ok(value);
                }
                Err(e) if tried >= max_attempts => {
                    tracing::error!(
                        operation = label,
                        attempts = tried,
                        error = %e,
                        "Giving up after final attempt"
                    );
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.jittered(self.base_delay(tried));
                    tracing::warn!(
                        operation = label,
                        attempt = tried,
                        max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    tried += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn no_jitter(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn default_matches_startup_settings() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 30);
        assert_eq!(policy.base_delay(1), Duration::from_secs(2));
        assert_eq!(policy.base_delay(10), Duration::from_secs(2));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = no_jitter(10);
        assert_eq!(policy.base_delay(1), Duration::from_millis(100));
        assert_eq!(policy.base_delay(2), Duration::from_millis(200));
        assert_eq!(policy.base_delay(3), Duration::from_millis(400));
        assert_eq!(policy.base_delay(4), Duration::from_millis(500));
        assert_eq!(policy.base_delay(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_in_band() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(1000));
        for _ in 0..100 {
            let delay = policy.jittered(Duration::from_millis(1000));
            assert!(delay >= Duration::from_millis(899));
            assert!(delay <= Duration::from_millis(1101));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<&str, String> = no_jitter(5)
            .run("test", || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("not yet".to_string())
                    } else {
                        Ok("up")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "up");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), String> = no_jitter(4)
            .run("test", || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    Err(format!("failure {n}"))
                }
            })
            .await;

        assert_eq!(result.unwrap_err(), "failure 4");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_still_tries_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), String> = no_jitter(0)
            .run("test", || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err("down".to_string()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
