//! Reconnection Policy
//!
//! Fixed-delay reconnection for the upstream feed: every disconnect waits the
//! same delay before the next connect attempt, with no backoff and no attempt
//! cap. The attempt counter exists for logging and health reporting and is
//! reset once a connection reaches the subscribed state.

use std::time::Duration;

/// Default delay between a disconnect and the next connect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(5000);

/// Fixed-delay reconnection policy.
///
/// # Example
///
/// ```rust
/// use price_stream_hub::infrastructure::feed::reconnect::ReconnectPolicy;
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(Duration::from_secs(5));
///
/// assert_eq!(policy.next_delay(), Duration::from_secs(5));
/// assert_eq!(policy.next_delay(), Duration::from_secs(5));
/// assert_eq!(policy.attempt_count(), 2);
///
/// // Simulate successful connection
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    delay: Duration,
    attempt_count: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_DELAY)
    }
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self {
            delay,
            attempt_count: 0,
        }
    }

    /// Register an attempt and return the delay to wait before it.
    pub const fn next_delay(&mut self) -> Duration {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.delay
    }

    /// Reset the policy after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Get the current attempt count.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Get the configured delay.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_delay_is_five_seconds() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay(), Duration::from_millis(5000));
        assert_eq!(policy.attempt_count(), 0);
    }

    #[test]
    fn delay_never_grows() {
        let mut policy = ReconnectPolicy::new(Duration::from_millis(250));
        for _ in 0..1000 {
            assert_eq!(policy.next_delay(), Duration::from_millis(250));
        }
        assert_eq!(policy.attempt_count(), 1000);
    }

    #[test]
    fn reset_clears_attempts() {
        let mut policy = ReconnectPolicy::new(Duration::from_millis(100));
        let _ = policy.next_delay();
        let _ = policy.next_delay();
        assert_eq!(policy.attempt_count(), 2);

        policy.reset();
        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn attempt_counter_saturates() {
        let mut policy = ReconnectPolicy::new(Duration::ZERO);
        policy.attempt_count = u32::MAX;
        let _ = policy.next_delay();
        assert_eq!(policy.attempt_count(), u32::MAX);
    }
}
