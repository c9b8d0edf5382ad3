//! Reconnect policy for restart-required disconnects.

use std::time::Duration;

use tokio::time::Instant;

/// Stand-in deadline for delays too large to add to an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Bounded exponential backoff.
///
/// The first attempt after a disconnect runs immediately, the second waits
/// `initial_backoff`, and each further attempt doubles the wait up to
/// `max_backoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts before giving up. Zero retries forever.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl ReconnectPolicy {
    /// Whether attempt number `attempt` (1-based) may run.
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts == 0 || attempt <= self.max_attempts
    }

    /// Delay before attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }

    /// When attempt number `attempt` is due, counted from `now`.
    ///
    /// Delays past the representable range are clamped to a far-future
    /// deadline.
    pub fn deadline_for(&self, attempt: u32, now: Instant) -> Instant {
        let delay = self.delay_for(attempt);
        now.checked_add(delay)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_is_immediate() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::ZERO);
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u64> = (2..=9).map(|n| policy.delay_for(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn huge_attempt_numbers_saturate() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn deadline_adds_delay() {
        let policy = ReconnectPolicy::default();
        let now = Instant::now();
        assert_eq!(policy.deadline_for(1, now), now);
        assert_eq!(policy.deadline_for(3, now), now + Duration::from_secs(2));
    }

    #[test]
    fn oversized_backoff_does_not_overflow() {
        let policy = ReconnectPolicy {
            max_attempts: 0,
            initial_backoff: Duration::MAX,
            max_backoff: Duration::MAX,
        };
        let now = Instant::now();

        assert_eq!(policy.delay_for(4), Duration::MAX);
        assert!(policy.deadline_for(4, now) > now + Duration::from_secs(86_400 * 365));
    }

    #[test]
    fn allows_respects_limit() {
        let policy = ReconnectPolicy::default();
        assert!(policy.allows(5));
        assert!(!policy.allows(6));

        let unbounded = ReconnectPolicy {
            max_attempts: 0,
            ..policy
        };
        assert!(unbounded.allows(1_000));
    }
}
