//! Backoff strategies for computing retry delays.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the delay grows with the attempt number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackoffStrategy {
    /// delay = base * 2^attempt
    #[default]
    Exponential,
    /// delay = base * (attempt + 1)
    Linear,
    /// delay = base
    Constant,
}

/// Randomization applied on top of the computed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
    /// min(max, random(base, prev * 3))
    Decorrelated,
}

/// A delay schedule for [`RetryPolicy::retry_with`](super::RetryPolicy::retry_with).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    /// Growth strategy.
    pub strategy: BackoffStrategy,
    /// Jitter strategy.
    pub jitter: JitterStrategy,
    /// Base delay.
    pub base: Duration,
    /// Upper bound on any computed delay.
    pub max: Duration,
}

impl Backoff {
    const DEFAULT_MAX: Duration = Duration::from_secs(30);

    /// Constant delay.
    #[must_use]
    pub const fn constant(base: Duration) -> Self {
        Self::with_strategy(BackoffStrategy::Constant, base)
    }

    /// Linearly growing delay.
    #[must_use]
    pub const fn linear(base: Duration) -> Self {
        Self::with_strategy(BackoffStrategy::Linear, base)
    }

    /// Exponentially growing delay.
    #[must_use]
    pub const fn exponential(base: Duration) -> Self {
        Self::with_strategy(BackoffStrategy::Exponential, base)
    }

    const fn with_strategy(strategy: BackoffStrategy, base: Duration) -> Self {
        Self {
            strategy,
            jitter: JitterStrategy::None,
            base,
            max: Self::DEFAULT_MAX,
        }
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub const fn with_max(mut self, max: Duration) -> Self {
        self.max = max;
        self
    }

    /// Computes the delay for a zero-based attempt given the previous delay.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, previous: Duration) -> Duration {
        let base = millis(self.base);
        let max = millis(self.max);

        let delay = match self.strategy {
            BackoffStrategy::Exponential => base.saturating_mul(2u64.saturating_pow(attempt)),
            BackoffStrategy::Linear => base.saturating_mul(u64::from(attempt) + 1),
            BackoffStrategy::Constant => base,
        }
        .min(max);

        let jittered = match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
            JitterStrategy::Decorrelated => {
                let prev = if previous.is_zero() { base } else { millis(previous) };
                let upper = prev.saturating_mul(3).min(max);
                if upper <= base {
                    base.min(max)
                } else {
                    rand::thread_rng().gen_range(base..=upper)
                }
            }
        };

        Duration::from_millis(jittered)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_millis(100);

    #[test]
    fn test_strategies_without_jitter() {
        assert_eq!(Backoff::constant(BASE).delay_for(3, Duration::ZERO), BASE);
        assert_eq!(
            Backoff::linear(BASE).delay_for(2, Duration::ZERO),
            Duration::from_millis(300)
        );
        assert_eq!(
            Backoff::exponential(BASE).delay_for(3, Duration::ZERO),
            Duration::from_millis(800)
        );
    }

    #[test]
    fn test_delay_is_capped() {
        let backoff = Backoff::exponential(BASE).with_max(Duration::from_millis(250));

        assert_eq!(backoff.delay_for(10, Duration::ZERO), Duration::from_millis(250));
    }

    #[test]
    fn test_full_jitter_stays_in_range() {
        let backoff = Backoff::constant(BASE).with_jitter(JitterStrategy::Full);

        for _ in 0..50 {
            assert!(backoff.delay_for(0, Duration::ZERO) <= BASE);
        }
    }

    #[test]
    fn test_decorrelated_jitter_uses_previous_delay() {
        let backoff = Backoff::constant(BASE).with_jitter(JitterStrategy::Decorrelated);

        for _ in 0..50 {
            let delay = backoff.delay_for(1, Duration::from_millis(200));
            assert!(delay >= BASE && delay <= Duration::from_millis(600));
        }
    }
}
