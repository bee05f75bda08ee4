//! Subscription admission throttle
//!
//! Paces how fast new long-polls may *start*. It does not care how long a
//! poll runs once admitted. Admission slots are handed out in call order, one
//! per `min_interval`, so no caller can be starved by busier services.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, WatchError};

/// Proof of admission. Consumed right before a poll is issued.
#[must_use = "a subscription token should be held until the poll is issued"]
#[derive(Debug)]
pub struct SubscriptionToken {
    admitted_at: Instant,
}

impl SubscriptionToken {
    pub fn admitted_at(&self) -> Instant {
        self.admitted_at
    }
}

/// Rate limiter for watch (re)subscriptions
pub struct SubscriptionThrottle {
    min_interval: Duration,
    /// Earliest instant the next reservation may be admitted
    next_admission: Mutex<Option<Instant>>,
    admitted: AtomicU64,
}

impl SubscriptionThrottle {
    /// Create a throttle admitting at most one subscription per `min_interval`
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_admission: Mutex::new(None),
            admitted: AtomicU64::new(0),
        }
    }

    /// Create a throttle from a rate in admissions per second
    pub fn per_second(rate: f64) -> Self {
        let interval = if rate > 0.0 {
            Duration::from_secs_f64(1.0 / rate)
        } else {
            Duration::ZERO
        };
        Self::new(interval)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Total number of admissions granted so far
    pub fn admitted(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }

    /// Wait for admission.
    ///
    /// Returns `ThrottleCanceled` if `cancel` fires first. A canceled waiter
    /// forfeits its reserved slot instead of handing it back, which can only
    /// lower the admission rate.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<SubscriptionToken> {
        if cancel.is_cancelled() {
            return Err(WatchError::ThrottleCanceled);
        }

        let at = self.reserve();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WatchError::ThrottleCanceled),
            _ = tokio::time::sleep_until(at) => {
                self.admitted.fetch_add(1, Ordering::Relaxed);
                Ok(SubscriptionToken { admitted_at: at })
            }
        }
    }

    /// Reserve the next free admission slot and return its instant.
    fn reserve(&self) -> Instant {
        let mut next = self.next_admission.lock();
        let now = Instant::now();
        let at = match *next {
            Some(slot) if slot > now => slot,
            _ => now,
        };
        *next = Some(at + self.min_interval);
        at
    }
}
