//! Retry policy shared by speech synthesis and voice connection setup.

use std::time::Duration;

/// How the delay between attempts evolves
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Same delay after every failed attempt
    Fixed(Duration),
    /// `base * 2^(attempt-1)`, never more than `cap`
    Exponential { base: Duration, cap: Duration },
}

/// Bounded retry policy: a total attempt budget plus a delay function.
///
/// `max_attempts` counts every attempt, the first one included, so a policy
/// of 10 makes at most 10 calls and sleeps at most 9 times.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(10, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Fixed(delay),
        }
    }

    pub fn exponential(max_attempts: u32, base: Duration, cap: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Exponential { base, cap },
        }
    }

    /// Single attempt, no waiting
    pub fn none() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Delay to sleep after failed attempt number `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(d) => d,
            Backoff::Exponential { base, cap } => {
                let shift = attempt.saturating_sub(1).min(16);
                base.saturating_mul(1u32 << shift).min(cap)
            }
        }
    }

    /// Whether another attempt is allowed after `attempt` failures
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
