//! Retry configuration for optimistic-lock conflicts
//!
//! Contains RetryConfig for command retry behavior and the backoff it
//! computes. The same curve drives job retry backoff in the async executor.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Retry Configuration
// ============================================================================

/// Configuration for retry behavior
///
/// # Example
/// ```
/// use kestrel_executor::RetryConfig;
///
/// let config = RetryConfig::new()
///     .with_max_retries(5)
///     .with_base_delay_ms(10)
///     .with_max_delay_ms(200);
/// assert_eq!(config.calculate_delay(0).as_millis(), 10);
/// assert_eq!(config.calculate_delay(10).as_millis(), 200);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries)
    pub max_retries: usize,
    /// Base delay between retries in milliseconds (exponential backoff)
    pub base_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 10,
            max_delay_ms: 100,
        }
    }
}

impl RetryConfig {
    /// Create a new RetryConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a RetryConfig with no retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Set maximum number of retries
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set base delay for exponential backoff
    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Set maximum delay between retries
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Calculate delay for a given attempt (exponential backoff, capped)
    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        // Cap the shift to prevent overflow (1 << 63 is the max for u64)
        let shift = attempt.min(63);
        let multiplier = 1u64 << shift;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_until_cap() {
        let config = RetryConfig::new()
            .with_base_delay_ms(10)
            .with_max_delay_ms(75);
        let delays: Vec<u128> = (0..5).map(|a| config.calculate_delay(a).as_millis()).collect();
        assert_eq!(delays, vec![10, 20, 40, 75, 75]);
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let config = RetryConfig::new().with_max_delay_ms(u64::MAX);
        assert_eq!(config.calculate_delay(500), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_no_retry() {
        assert_eq!(RetryConfig::no_retry().max_retries, 0);
    }
}
