//! Retry delay policy for failed polls

use std::time::Duration;

use crate::config::BackoffConfig;

/// Exponential backoff with downward jitter.
///
/// The nominal delay doubles per consecutive failure up to `max`. Jitter only
/// ever shortens a delay, and never below the previous attempt's nominal
/// delay, so successive delays are non-decreasing for any jitter in `0..=1`.
/// Once the cap is reached the delay is exactly `max`.
#[derive(Clone, Debug)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
    jitter: f64,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            base,
            max: max.max(base),
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_ms),
            Duration::from_millis(config.max_ms),
            config.jitter,
        )
    }

    /// Un-jittered delay for the given consecutive failure (1-indexed)
    pub fn nominal(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 1).min(31);
        let delay = self.base.saturating_mul(1u32 << exponent);
        delay.min(self.max)
    }

    /// Inclusive range a jittered delay for `attempt` falls into.
    ///
    /// The floor is `(1 - jitter)` of nominal, raised to the previous
    /// attempt's nominal delay.
    pub fn bounds(&self, attempt: u32) -> (Duration, Duration) {
        let nominal = self.nominal(attempt);
        let jittered = nominal.mul_f64(1.0 - self.jitter);
        let previous = self.nominal(attempt.saturating_sub(1));
        (jittered.max(previous), nominal)
    }

    /// Jittered delay for the given consecutive failure (1-indexed)
    pub fn delay(&self, attempt: u32) -> Duration {
        let (low, high) = self.bounds(attempt);
        if self.jitter == 0.0 || low == high {
            return high;
        }
        high - (high - low).mul_f64(rand::random::<f64>())
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&BackoffConfig::default())
    }
}
