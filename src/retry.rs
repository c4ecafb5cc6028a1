//! Reconnect backoff shared by the upstream WebSocket clients

use std::time::Duration;

use rand::Rng;

/// Exponential backoff policy for reconnecting to an upstream service
///
/// Delays follow `min(base_delay * 2^attempt, max_delay)`, optionally with
/// up to 25% added jitter (still capped at `max_delay`).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts before giving up (`None` retries forever)
    pub max_attempts: Option<u32>,
    /// Base delay before the first retry (doubles each attempt)
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Add random jitter to each delay
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(5),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(16),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Policy that never gives up, used by process-wide feeds
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            jitter: true,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (zero-based)
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);

        if !self.jitter {
            return base;
        }

        let fraction: f64 = rand::thread_rng().gen_range(0.0..0.25);
        (base + base.mul_f64(fraction)).min(self.max_delay)
    }

    /// Whether another attempt is allowed after `attempts` have been made
    #[must_use]
    pub fn allows(&self, attempts: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempts < max)
    }
}

/// Running attempt counter over a [`RetryPolicy`]
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    attempts: u32,
}

impl Backoff {
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Next delay to wait, or `None` once the policy is exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.policy.allows(self.attempts) {
            return None;
        }
        let delay = self.policy.delay_for_attempt(self.attempts);
        self.attempts += 1;
        Some(delay)
    }

    /// Forget previous failures after a successful connection
    pub const fn reset(&mut self) {
        self.attempts = 0;
    }

    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Whether an HTTP status from a WebSocket upgrade means "stop retrying"
#[must_use]
pub const fn is_auth_failure(status: u16) -> bool {
    matches!(status, 401 | 403)
}

/// Determine whether an HTTP status is worth retrying
///
/// Rate limits (429) and server errors (5xx) are transient.
#[must_use]
pub fn is_recoverable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}
