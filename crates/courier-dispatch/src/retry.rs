//! Retry policy: maps a failed attempt to the next action.

use chrono::{DateTime, Duration, Utc};

/// Default number of delivery attempts before a message is dead-lettered.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// What to do with a message after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule another attempt at the given time.
    RetryAt(DateTime<Utc>),
    /// Give up and move the message to the dead-letter table.
    DeadLetter(String),
}

/// Pure policy deciding between retry and dead-letter.
///
/// Backoff is quadratic: attempt N schedules the next try N² minutes out
/// (1, 4, 9, 16 minutes for attempts 1 through 4 with the default budget
/// of 5).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Decide the next action after attempt `attempt` failed with `error`.
    ///
    /// `attempt` is 1-based: the first delivery attempt is attempt 1.
    #[must_use]
    pub fn decide(&self, attempt: u32, error: &str) -> RetryDecision {
        if attempt >= self.max_retries {
            return RetryDecision::DeadLetter(format!("exceeded max retries: {error}"));
        }

        RetryDecision::RetryAt(Utc::now() + Self::backoff_delay(attempt))
    }

    /// Delay before the attempt following failed attempt `attempt`.
    #[must_use]
    pub fn backoff_delay(attempt: u32) -> Duration {
        Duration::minutes(i64::from(attempt.saturating_mul(attempt)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_quadratic_minutes() {
        assert_eq!(RetryPolicy::backoff_delay(1), Duration::minutes(1));
        assert_eq!(RetryPolicy::backoff_delay(2), Duration::minutes(4));
        assert_eq!(RetryPolicy::backoff_delay(3), Duration::minutes(9));
        assert_eq!(RetryPolicy::backoff_delay(4), Duration::minutes(16));
    }

    #[test]
    fn backoff_strictly_increases() {
        for attempt in 1..10 {
            assert!(RetryPolicy::backoff_delay(attempt + 1) > RetryPolicy::backoff_delay(attempt));
        }
    }

    #[test]
    fn retries_below_budget() {
        let policy = RetryPolicy::default();

        for attempt in 1..DEFAULT_MAX_RETRIES {
            let decision = policy.decide(attempt, "boom");
            let RetryDecision::RetryAt(when) = decision else {
                panic!("attempt {attempt} should schedule a retry");
            };
            let delta = when - Utc::now();
            let expected = RetryPolicy::backoff_delay(attempt);
            assert!(delta <= expected);
            assert!(delta > expected - Duration::seconds(5));
        }
    }

    #[test]
    fn dead_letters_at_budget() {
        let policy = RetryPolicy::default();

        let decision = policy.decide(DEFAULT_MAX_RETRIES, "connection refused");
        assert_eq!(
            decision,
            RetryDecision::DeadLetter("exceeded max retries: connection refused".to_string())
        );
    }

    #[test]
    fn dead_letters_past_budget() {
        let policy = RetryPolicy::new(3);
        assert!(matches!(
            policy.decide(7, "x"),
            RetryDecision::DeadLetter(_)
        ));
    }

    #[test]
    fn scheduled_times_increase_across_consecutive_failures() {
        let policy = RetryPolicy::new(10);
        let mut previous: Option<DateTime<Utc>> = None;

        for attempt in 1..5 {
            let RetryDecision::RetryAt(when) = policy.decide(attempt, "e") else {
                panic!("should retry");
            };
            if let Some(previous) = previous {
                assert!(when > previous);
            }
            previous = Some(when);
        }
    }
}
