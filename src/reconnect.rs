//! Exponential backoff between reconnect attempts.

use std::time::Duration;

use rand::Rng;

use crate::config::ReconnectConfig;

/// Floor for the configured base delay so a zero setting cannot spin.
const MIN_BASE_DELAY: Duration = Duration::from_millis(10);

/// Delay schedule and attempt limit for automatic reconnection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    base: Duration,
    cap: Duration,
    max_attempts: Option<u32>,
    jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}

impl ReconnectPolicy {
    #[must_use]
    pub fn new(base: Duration, cap: Duration, max_attempts: Option<u32>, jitter: bool) -> Self {
        Self {
            base,
            cap: cap.max(base),
            max_attempts,
            jitter,
        }
    }

    #[must_use]
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms).max(MIN_BASE_DELAY),
            Duration::from_millis(config.max_delay_ms),
            config.attempt_limit(),
            config.jitter,
        )
    }

    /// Delay before attempt number `attempt` (zero-based): `base * 2^attempt`
    /// capped at the maximum. With jitter the result is drawn from
    /// `[delay / 2, delay]`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        let delay = self.base.saturating_mul(factor).min(self.cap);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        let jittered = rand::thread_rng().gen_range(millis / 2..=millis);
        Duration::from_millis(jittered)
    }

    /// `true` once `attempts` failed attempts use up the budget.
    #[must_use]
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}
