//! Reconnect scheduling.
//!
//! The schedule only computes delays. Arming and cancelling the timer is the
//! connection driver's job.

use std::time::Duration;

use backoff::backoff::Backoff;

/// Bounded exponential backoff with a retry ceiling.
///
/// The `n`-th retry waits `base_delay * 2^(n - 1)`; retries past `ceiling` are refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectSchedule {
    attempts: u32,
    ceiling: u32,
    base_delay: Duration,
    max_delay: Option<Duration>,
}

impl ReconnectSchedule {
    #[must_use]
    pub const fn new(ceiling: u32, base_delay: Duration) -> Self {
        Self {
            attempts: 0,
            ceiling,
            base_delay,
            max_delay: None,
        }
    }

    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Option<Duration>) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Number of retries scheduled since the last successful open.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    #[must_use]
    pub const fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let delay = if self.base_delay.is_zero() {
            Duration::ZERO
        } else {
            1_u128
                .checked_shl(exponent)
                .and_then(|factor| self.base_delay.as_nanos().checked_mul(factor))
                .and_then(duration_from_nanos)
                .unwrap_or(Duration::MAX)
        };

        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.ceiling
    }
}

/// `None` when `nanos` does not fit in a [`Duration`].
fn duration_from_nanos(nanos: u128) -> Option<Duration> {
    const NANOS_PER_SEC: u128 = 1_000_000_000;

    let secs = u64::try_from(nanos / NANOS_PER_SEC).ok()?;
    let subsec = u32::try_from(nanos % NANOS_PER_SEC).ok()?;
    Some(Duration::new(secs, subsec))
}

impl Backoff for ReconnectSchedule {
    fn reset(&mut self) {
        self.attempts = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        let attempt = self.attempts.saturating_add(1);
        if !self.should_retry(attempt) {
            return None;
        }

        self.attempts = attempt;
        Some(self.delay_for(attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_secs(5);

    #[test]
    fn delay_doubles_per_attempt() {
        let schedule = ReconnectSchedule::new(5, BASE);

        for attempt in 1..=5 {
            assert_eq!(
                schedule.delay_for(attempt),
                BASE * 2_u32.pow(attempt - 1),
                "attempt {attempt}"
            );
        }
    }

    #[test]
    fn should_retry_up_to_ceiling() {
        let schedule = ReconnectSchedule::new(5, BASE);

        assert!(schedule.should_retry(1), "first retry is allowed");
        assert!(schedule.should_retry(5), "ceiling itself is allowed");
        assert!(!schedule.should_retry(6), "past the ceiling is refused");
    }

    #[test]
    fn next_backoff_stops_at_ceiling_without_counting() {
        let mut schedule = ReconnectSchedule::new(2, BASE);

        assert_eq!(schedule.next_backoff(), Some(Duration::from_secs(5)));
        assert_eq!(schedule.next_backoff(), Some(Duration::from_secs(10)));
        assert_eq!(schedule.next_backoff(), None);
        assert_eq!(schedule.attempts(), 2);
    }

    #[test]
    fn reset_restarts_sequence() {
        let mut schedule = ReconnectSchedule::new(5, BASE);
        let _first = schedule.next_backoff();
        let _second = schedule.next_backoff();

        schedule.reset();

        assert_eq!(schedule.attempts(), 0);
        assert_eq!(schedule.next_backoff(), Some(BASE));
    }

    #[test]
    fn large_attempts_saturate_instead_of_overflowing() {
        let schedule = ReconnectSchedule::new(u32::MAX, Duration::from_secs(u64::MAX / 2));

        assert_eq!(schedule.delay_for(64), Duration::MAX);
    }

    #[test]
    fn delay_keeps_doubling_past_thirty_two_attempts() {
        let schedule = ReconnectSchedule::new(64, Duration::from_nanos(1));

        assert_eq!(schedule.delay_for(33), Duration::from_nanos(1 << 32));
        assert_eq!(schedule.delay_for(40), Duration::from_nanos(1 << 39));
        assert_eq!(schedule.delay_for(64), Duration::from_nanos(1 << 63));
    }

    #[test]
    fn zero_base_delay_stays_zero() {
        let schedule = ReconnectSchedule::new(u32::MAX, Duration::ZERO);

        assert_eq!(schedule.delay_for(u32::MAX), Duration::ZERO);
    }

    #[test]
    fn max_delay_caps_growth() {
        let schedule =
            ReconnectSchedule::new(10, BASE).with_max_delay(Some(Duration::from_secs(30)));

        assert_eq!(schedule.delay_for(3), Duration::from_secs(20));
        assert_eq!(schedule.delay_for(4), Duration::from_secs(30));
        assert_eq!(schedule.delay_for(9), Duration::from_secs(30));
    }
}
