use std::time::Duration;

use serde::Deserialize;

/// How often, and how patiently, to retry an operation the printer spuriously fails.
///
/// The P-touch USB interface is buggy: it likes to signal end-of-stream while a status frame is
/// still on its way. Reads that run into this are retried according to this policy.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,

    /// Pause between two attempts in milliseconds.
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay_ms: 100,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay_ms: delay.as_millis() as u64,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Start counting attempts for one operation.
    pub fn start(&self) -> Attempts {
        Attempts {
            policy: *self,
            failed: 0,
        }
    }
}

/// The attempt counter of a single operation under a [`RetryPolicy`].
#[derive(Debug)]
pub struct Attempts {
    policy: RetryPolicy,
    failed: u32,
}

impl Attempts {
    /// Record a failed attempt.
    /// If the policy allows another one, wait for the configured delay and return `true`.
    pub async fn backoff(&mut self) -> bool {
        self.failed += 1;

        if self.failed >= self.policy.max_attempts.max(1) {
            return false;
        }

        tokio::time::sleep(self.policy.delay()).await;
        true
    }

    /// Number of attempts that have failed so far.
    pub fn failed(&self) -> u32 {
        self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let policy = RetryPolicy::default();
        let mut attempts = policy.start();
        let started = Instant::now();

        let mut retries = 0;
        while attempts.backoff().await {
            retries += 1;
        }

        assert_eq!(retries, 9);
        assert_eq!(attempts.failed(), 10);
        assert_eq!(started.elapsed(), Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_never_waits() {
        let policy = RetryPolicy::new(1, Duration::from_secs(5));
        let mut attempts = policy.start();
        let started = Instant::now();

        assert!(!attempts.backoff().await);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[test]
    fn zero_attempts_are_clamped() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }
}
