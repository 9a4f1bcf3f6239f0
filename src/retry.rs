//! Exponential backoff for rate-limited retries.

use crate::error::{GovernorError, Result};
use crate::throttle_config::non_zero_duration;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "backoff_bounds"))]
pub struct RetryConfig {
    #[validate(range(min = 1))]
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    #[validate(custom(function = "non_zero_duration"))]
    pub base_delay: Duration,
    #[serde(with = "humantime_serde")]
    #[validate(custom(function = "non_zero_duration"))]
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30000),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

fn backoff_bounds(config: &RetryConfig) -> std::result::Result<(), ValidationError> {
    if config.backoff_multiplier.is_nan() || config.backoff_multiplier < 1.0 {
        return Err(ValidationError::new("backoff_multiplier_below_one"));
    }
    if config.max_delay < config.base_delay {
        return Err(ValidationError::new("max_delay_below_base_delay"));
    }
    Ok(())
}

impl RetryConfig {
    /// Check field bounds: retries and delays above zero, multiplier at
    /// least 1.0, and `max_delay` not below `base_delay`.
    pub fn check(&self) -> Result<()> {
        self.validate().map_err(GovernorError::from)
    }

    /// Delay before retry `attempt` (1-based), without jitter:
    /// `min(base_delay * multiplier^(attempt - 1), max_delay)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.base_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Full delay for retry `attempt`: backoff, scaled into [0.5, 1.0] of
    /// itself when jitter is on, raised to the server hint if that is longer.
    pub fn delay_for_attempt(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let mut delay = self.backoff_delay(attempt);
        if self.jitter {
            let factor = rand::thread_rng().gen_range(0.5..=1.0);
            delay = delay.mul_f64(factor);
        }

        match retry_after {
            Some(hint) if hint > delay => hint,
            _ => delay,
        }
    }
}

/// Delay before the invoker retries after a 429:
/// `retry_delay * 2^(attempt - 1)`.
pub fn doubling_delay(retry_delay: Duration, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    retry_delay.saturating_mul(1 << shift)
}
