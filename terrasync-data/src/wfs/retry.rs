//! Exponential backoff with full jitter.

use std::time::Duration;

use rand::Rng;

/// Attempt and time budget for one page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed, the first one included.
    pub max_attempts: u32,
    /// Wall-clock budget across all attempts and delays.
    pub max_elapsed: Duration,
    /// Delay ceiling before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Draw each delay uniformly from `[0, ceiling]` instead of using the
    /// ceiling itself.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_elapsed: Duration::from_secs(60),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy that makes exactly one attempt.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set the attempt limit.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the total time budget.
    #[must_use]
    pub const fn with_max_elapsed(mut self, budget: Duration) -> Self {
        self.max_elapsed = budget;
        self
    }

    /// Set the first delay ceiling.
    #[must_use]
    pub const fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before the next attempt after `attempts` have failed and
    /// `elapsed` has passed, or `None` when the budget is spent.
    #[must_use]
    pub fn next_delay(&self, attempts: u32, elapsed: Duration) -> Option<Duration> {
        if attempts >= self.max_attempts || elapsed >= self.max_elapsed {
            return None;
        }
        let remaining = self.max_elapsed - elapsed;
        let exponent = attempts.saturating_sub(1).min(31);
        let ceiling = self
            .base_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.max_delay)
            .min(remaining);
        Some(if self.jitter { full_jitter(ceiling) } else { ceiling })
    }
}

fn full_jitter(ceiling: Duration) -> Duration {
    let millis = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, Some(Duration::from_secs(1)))]
    #[case(2, Some(Duration::from_secs(2)))]
    #[case(3, None)]
    fn doubles_until_attempts_run_out(#[case] attempts: u32, #[case] expected: Option<Duration>) {
        let policy = RetryPolicy::default().with_jitter(false);
        assert_eq!(policy.next_delay(attempts, Duration::ZERO), expected);
    }

    #[rstest]
    fn delays_are_capped() {
        let policy = RetryPolicy::default()
            .with_jitter(false)
            .with_max_attempts(20)
            .with_max_elapsed(Duration::from_secs(600));
        assert_eq!(
            policy.next_delay(12, Duration::ZERO),
            Some(Duration::from_secs(30))
        );
    }

    #[rstest]
    fn delay_never_exceeds_remaining_budget() {
        let policy = RetryPolicy::default()
            .with_jitter(false)
            .with_base_delay(Duration::from_secs(10));
        assert_eq!(
            policy.next_delay(1, Duration::from_secs(57)),
            Some(Duration::from_secs(3))
        );
        assert_eq!(policy.next_delay(1, Duration::from_secs(60)), None);
    }

    #[rstest]
    fn jitter_stays_below_ceiling() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let delay = policy.next_delay(2, Duration::ZERO).expect("budget left");
            assert!(delay <= Duration::from_secs(2));
        }
    }

    #[rstest]
    fn no_retry_makes_one_attempt() {
        assert_eq!(RetryPolicy::no_retry().next_delay(1, Duration::ZERO), None);
    }
}
