//! Pure reconnection backoff policy
//!
//! The delay doubles after every failed attempt, capped at `max_delay`, and the
//! attempt counter never passes `max_attempts`: once it gets there the policy
//! tells the state machine to stop retrying.

use std::time::Duration;

/// Outcome of asking the policy for another attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectionDecision {
    /// Retry after `delay`; `attempt` is the 1-based retry number
    Proceed { attempt: u32, delay: Duration },
    /// `max_attempts` retries already spent
    AbortMaxAttemptsExceeded,
}

/// Exponential backoff state for one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    attempt: u32,
    max_attempts: u32,
    base_delay: Duration,
    current_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        let max_delay = max_delay.max(base_delay);
        Self {
            attempt: 0,
            max_attempts,
            base_delay,
            current_delay: base_delay,
            max_delay,
        }
    }

    /// Decide whether to retry (pure state transition)
    ///
    /// On `Proceed` the returned delay is the current one; the next call will
    /// see it doubled.
    pub fn next_attempt(&mut self) -> ReconnectionDecision {
        if self.attempt >= self.max_attempts {
            return ReconnectionDecision::AbortMaxAttemptsExceeded;
        }

        self.attempt += 1;
        let delay = self.current_delay;
        self.current_delay = self.current_delay.saturating_mul(2).min(self.max_delay);

        ReconnectionDecision::Proceed {
            attempt: self.attempt,
            delay,
        }
    }

    /// Back to `attempt = 0`, `current_delay = base_delay`
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current_delay = self.base_delay;
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Every delay a fresh policy would hand out before giving up
    pub fn delay_schedule(&self) -> Vec<Duration> {
        let mut fresh = self.clone();
        fresh.reset();
        let mut delays = Vec::with_capacity(self.max_attempts as usize);
        while let ReconnectionDecision::Proceed { delay, .. } = fresh.next_attempt() {
            delays.push(delay);
        }
        delays
    }

    /// Worst-case time spent waiting between attempts
    pub fn total_backoff(&self) -> Duration {
        self.delay_schedule().into_iter().sum()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(3000), Duration::from_millis(30_000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn test_doubling_with_cap() {
        let mut policy = RetryPolicy::new(10, ms(3000), ms(30_000));
        let delays: Vec<_> = (0..7)
            .map(|_| match policy.next_attempt() {
                ReconnectionDecision::Proceed { delay, .. } => delay.as_millis() as u64,
                ReconnectionDecision::AbortMaxAttemptsExceeded => 0,
            })
            .collect();

        assert_eq!(delays, vec![3000, 6000, 12000, 24000, 30000, 30000, 30000]);
    }

    #[test]
    fn test_abort_after_max_attempts() {
        let mut policy = RetryPolicy::new(3, ms(100), ms(1000));

        for expected in 1..=3 {
            assert!(matches!(
                policy.next_attempt(),
                ReconnectionDecision::Proceed { attempt, .. } if attempt == expected
            ));
        }
        assert!(policy.is_exhausted());
        assert_eq!(
            policy.next_attempt(),
            ReconnectionDecision::AbortMaxAttemptsExceeded
        );
        // Aborting does not move the counter past the ceiling
        assert_eq!(policy.attempt(), 3);
    }

    #[test]
    fn test_reset() {
        let mut policy = RetryPolicy::new(5, ms(3000), ms(30_000));
        policy.next_attempt();
        policy.next_attempt();
        assert_eq!(policy.attempt(), 2);
        assert_eq!(policy.current_delay(), ms(12_000));

        policy.reset();
        assert_eq!(policy.attempt(), 0);
        assert_eq!(policy.current_delay(), ms(3000));
    }

    #[test]
    fn test_default_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_schedule(),
            vec![ms(3000), ms(6000), ms(12_000), ms(24_000), ms(30_000)]
        );
        assert_eq!(policy.total_backoff(), ms(75_000));
    }

    #[test]
    fn test_max_delay_never_below_base() {
        let policy = RetryPolicy::new(2, ms(5000), ms(1000));
        assert_eq!(policy.max_delay(), ms(5000));
        assert_eq!(policy.delay_schedule(), vec![ms(5000), ms(5000)]);
    }

    proptest! {
        #[test]
        fn delays_are_monotonic_and_bounded(
            max_attempts in 1u32..40,
            base in 1u64..10_000,
            extra in 0u64..100_000,
        ) {
            let policy = RetryPolicy::new(max_attempts, ms(base), ms(base + extra));
            let schedule = policy.delay_schedule();

            prop_assert_eq!(schedule.len(), max_attempts as usize);
            prop_assert_eq!(schedule[0], ms(base));
            for pair in schedule.windows(2) {
                prop_assert!(pair[0] <= pair[1]);
            }
            for delay in &schedule {
                prop_assert!(*delay <= ms(base + extra));
            }
        }

        #[test]
        fn attempt_never_exceeds_max(max_attempts in 0u32..20, calls in 0usize..60) {
            let mut policy = RetryPolicy::new(max_attempts, ms(10), ms(100));
            for _ in 0..calls {
                policy.next_attempt();
            }
            prop_assert!(policy.attempt() <= max_attempts);
        }
    }
}
