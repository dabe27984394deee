//! Retry delay policy shared by stall recovery and process/driver polling.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff with a ceiling.
///
/// `delay(1)` is `initial`; every further attempt multiplies by `multiplier`
/// until `cap` is reached.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    pub initial_ms: u64,
    pub multiplier: f64,
    pub cap_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_ms: 250,
            multiplier: 2.0,
            cap_ms: 2_000,
        }
    }
}

impl BackoffPolicy {
    pub fn new(initial: Duration, multiplier: f64, cap: Duration) -> Self {
        Self {
            initial_ms: initial.as_millis() as u64,
            multiplier,
            cap_ms: cap.as_millis() as u64,
        }
    }

    /// Delay before retry number `attempt` (1-based). Attempt 0 is treated as 1.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let multiplier = if self.multiplier.is_finite() && self.multiplier >= 1.0 {
            self.multiplier
        } else {
            1.0
        };
        let millis = (self.initial_ms as f64) * multiplier.powi(exponent);
        Duration::from_millis(millis.min(self.cap_ms as f64) as u64)
    }

    pub fn cap(&self) -> Duration {
        Duration::from_millis(self.cap_ms)
    }
}
