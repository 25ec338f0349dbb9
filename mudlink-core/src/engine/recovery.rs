//! Backoff schedule for reconnecting after an unexpected loss.

use std::time::Duration;

use rand::Rng;

use crate::network::ConnectTarget;

/// Delay before attempt `n` is `min(base * 2^(n-1), cap)` plus a uniform
/// jitter in `[0, jitter]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub jitter: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1_000),
            cap: Duration::from_millis(30_000),
            jitter: Duration::from_millis(1_000),
            max_attempts: 3,
        }
    }
}

impl BackoffPolicy {
    /// Capped exponential delay for 1-based `attempt`, without jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base.saturating_mul(1u32 << exponent).min(self.cap)
    }

    pub fn jittered<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let max = self.jitter.as_millis() as u64;
        let extra = if max == 0 { 0 } else { rng.gen_range(0..=max) };
        self.delay(attempt) + Duration::from_millis(extra)
    }

    /// Sum of the un-jittered delays of attempts `1..=attempts`.
    pub fn total_delay(&self, attempts: u32) -> Duration {
        (1..=attempts).map(|n| self.delay(n)).sum()
    }

    pub fn allows(&self, attempt: u32) -> bool {
        attempt >= 1 && attempt <= self.max_attempts
    }
}

/// A recovery in progress. Created when a live session is lost, dropped on
/// success or when the attempt budget runs out.
#[derive(Debug, Clone)]
pub struct ReconnectAttempt {
    pub attempt: u32,
    pub target: ConnectTarget,
}

impl ReconnectAttempt {
    pub fn first(target: ConnectTarget) -> Self {
        Self { attempt: 1, target }
    }

    pub fn next(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            target: self.target.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_attempts_total_seven_seconds() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_millis(1_000));
        assert_eq!(policy.delay(2), Duration::from_millis(2_000));
        assert_eq!(policy.delay(3), Duration::from_millis(4_000));
        assert_eq!(policy.total_delay(3), Duration::from_millis(7_000));
    }

    #[test]
    fn delay_is_capped() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(6), Duration::from_millis(30_000));
        assert_eq!(policy.delay(200), Duration::from_millis(30_000));
    }

    #[test]
    fn jitter_stays_in_range() {
        let policy = BackoffPolicy::default();
        let mut rng = rand::thread_rng();
        for attempt in 1..=5 {
            let base = policy.delay(attempt);
            for _ in 0..50 {
                let d = policy.jittered(attempt, &mut rng);
                assert!(d >= base && d <= base + policy.jitter, "{d:?}");
            }
        }
    }

    #[test]
    fn zero_jitter_is_exact() {
        let policy = BackoffPolicy {
            jitter: Duration::ZERO,
            ..BackoffPolicy::default()
        };
        assert_eq!(policy.jittered(2, &mut rand::thread_rng()), policy.delay(2));
    }

    #[test]
    fn attempt_budget() {
        let policy = BackoffPolicy::default();
        assert!(!policy.allows(0));
        assert!(policy.allows(1));
        assert!(policy.allows(3));
        assert!(!policy.allows(4));
    }

    #[test]
    fn attempts_carry_the_target() {
        let first = ReconnectAttempt::first(ConnectTarget::new("mud.example.org", 4000));
        let second = first.next();
        assert_eq!(second.attempt, 2);
        assert_eq!(second.target.port, 4000);
    }
}
