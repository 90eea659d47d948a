//! Exponential backoff driven by consecutive rate-limit failures.
//!
//! One controller is shared by every endpoint: the upstream enforces a
//! single rate limit for the whole client.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Exponent ceiling; the cap is reached long before this
const MAX_EXPONENT: u32 = 20;

/// Backoff state: `delay = min(base * 2^failures, cap)`
#[derive(Debug, Clone)]
pub struct BackoffController {
    /// Delay with no outstanding failures (plain request pacing)
    base: Duration,
    /// Hard ceiling for the delay
    cap: Duration,
    /// Failures forgiven per success
    success_decay: u32,
    consecutive_failures: u32,
}

impl BackoffController {
    /// Create a new controller
    pub fn new(base: Duration, cap: Duration, success_decay: u32) -> Self {
        Self {
            base,
            cap,
            success_decay: success_decay.max(1),
            consecutive_failures: 0,
        }
    }

    /// Delay to wait before the next request
    pub fn next_delay(&self) -> Duration {
        let exponent = self.consecutive_failures.min(MAX_EXPONENT);
        self.base.saturating_mul(1u32 << exponent).min(self.cap)
    }

    /// Record a rate-limit failure
    pub fn on_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    /// Record a success; decays the failure count instead of resetting it
    pub fn on_success(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_sub(self.success_decay);
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

impl Default for BackoffController {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(10), 1)
    }
}

/// Process-wide handle to a [`BackoffController`]
#[derive(Debug, Clone, Default)]
pub struct SharedBackoff {
    inner: Arc<Mutex<BackoffController>>,
}

impl SharedBackoff {
    pub fn new(controller: BackoffController) -> Self {
        Self {
            inner: Arc::new(Mutex::new(controller)),
        }
    }

    pub fn next_delay(&self) -> Duration {
        self.inner.lock().next_delay()
    }

    pub fn on_failure(&self) {
        let mut controller = self.inner.lock();
        controller.on_failure();
        tracing::debug!(
            failures = controller.consecutive_failures(),
            delay_ms = controller.next_delay().as_millis(),
            "Backoff increased"
        );
    }

    pub fn on_success(&self) {
        self.inner.lock().on_success();
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> BackoffController {
        BackoffController::new(Duration::from_millis(500), Duration::from_secs(10), 1)
    }

    fn after_failures(n: u32) -> Duration {
        let mut backoff = controller();
        for _ in 0..n {
            backoff.on_failure();
        }
        backoff.next_delay()
    }

    #[test]
    fn test_base_delay_without_failures() {
        assert_eq!(controller().next_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_delay_grows_exponentially() {
        assert_eq!(after_failures(1), Duration::from_millis(1000));
        assert_eq!(after_failures(2), Duration::from_millis(2000));
        assert_eq!(after_failures(3), Duration::from_millis(4000));
        assert!(after_failures(3) > after_failures(1));
    }

    #[test]
    fn test_delay_is_capped() {
        assert_eq!(after_failures(5), Duration::from_secs(10));
        assert_eq!(after_failures(10), after_failures(5));
        assert_eq!(after_failures(1000), Duration::from_secs(10));
    }

    #[test]
    fn test_success_decays_gradually() {
        let mut backoff = controller();
        for _ in 0..3 {
            backoff.on_failure();
        }

        backoff.on_success();
        assert_eq!(backoff.consecutive_failures(), 2);
        assert_eq!(backoff.next_delay(), Duration::from_millis(2000));

        backoff.on_success();
        backoff.on_success();
        backoff.on_success();
        assert_eq!(backoff.consecutive_failures(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_large_decay_acts_as_reset() {
        let mut backoff =
            BackoffController::new(Duration::from_millis(100), Duration::from_secs(5), u32::MAX);
        backoff.on_failure();
        backoff.on_failure();
        backoff.on_success();
        assert_eq!(backoff.consecutive_failures(), 0);
    }

    #[test]
    fn test_shared_handle_sees_same_state() {
        let shared = SharedBackoff::new(controller());
        let clone = shared.clone();

        clone.on_failure();
        assert_eq!(shared.consecutive_failures(), 1);
        assert_eq!(shared.next_delay(), Duration::from_millis(1000));

        shared.on_success();
        assert_eq!(clone.consecutive_failures(), 0);
    }
}
