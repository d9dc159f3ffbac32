//! Retry policy shared with handlers through the run context.

use super::Backoff;
use crate::pool::Poolable;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default, Clone, Copy)]
struct RetryState {
    attempt: u32,
    last_delay: Duration,
    requested: bool,
}

/// Lets a handler ask for the current event to be redelivered.
///
/// The same instance is seen by every attempt for one (event, pipeline)
/// pair, so `attempt` counts the executions that came before the current
/// one. Requests are cleared when the broker schedules the retry; the last
/// request made during an execution wins.
#[derive(Debug, Default)]
pub struct RetryPolicy {
    state: Mutex<RetryState>,
}

impl RetryPolicy {
    /// Creates a policy at attempt zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of executions before the current one.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.state.lock().attempt
    }

    /// Returns the most recently requested delay.
    #[must_use]
    pub fn last_delay(&self) -> Duration {
        self.state.lock().last_delay
    }

    /// Returns true if a retry has been requested during this execution.
    #[must_use]
    pub fn is_retry_requested(&self) -> bool {
        self.state.lock().requested
    }

    /// Requests redelivery after a fixed delay.
    pub fn retry_after(&self, delay: Duration) {
        self.request(delay);
    }

    /// Requests redelivery after a delay computed from the current attempt
    /// and the previous delay.
    pub fn retry_after_with<F>(&self, compute: F)
    where
        F: FnOnce(u32, Duration) -> Duration,
    {
        let (attempt, previous) = self.snapshot();
        let delay = compute(attempt, previous);
        self.request(delay);
    }

    /// Requests redelivery on a backoff schedule and returns the delay.
    pub fn retry_with(&self, backoff: &Backoff) -> Duration {
        let (attempt, previous) = self.snapshot();
        let delay = backoff.delay_for(attempt, previous);
        self.request(delay);
        delay
    }

    // The lock is never held while caller code runs.
    fn snapshot(&self) -> (u32, Duration) {
        let state = self.state.lock();
        (state.attempt, state.last_delay)
    }

    fn request(&self, delay: Duration) {
        let mut state = self.state.lock();
        state.last_delay = delay;
        state.requested = true;
    }

    /// Consumes a pending request, advancing to the next attempt.
    ///
    /// Returns the delay to wait, or `None` if no retry was requested.
    pub(crate) fn begin_next_attempt(&self) -> Option<Duration> {
        let mut state = self.state.lock();
        if !state.requested {
            return None;
        }
        state.requested = false;
        state.attempt = state.attempt.saturating_add(1);
        Some(state.last_delay)
    }
}

impl Poolable for Arc<RetryPolicy> {
    fn reset(&mut self) -> bool {
        match Arc::get_mut(self) {
            Some(policy) => {
                *policy.state.get_mut() = RetryState::default();
                true
            }
            None => false,
        }
    }
}
