//! Capped retry schedules
//!
//! A [`BackoffStrategy`] answers one question: given the number of attempts
//! already made, how long to wait before the next one, or whether to give up.
//! Two places consult it:
//!
//! - the reconnection gate, which polls the identity store while the link is
//!   down (default: [`FixedDelay`] of 200 ms, 10 attempts)
//! - the WebSocket transport, which redials a dropped socket
//!   (default: [`ExponentialBackoff`])
//!
//! Strategies are stateless. The attempt counter lives with the caller, so one
//! strategy can be shared by concurrent waiters.
//!
//! # Examples
//!
//! ```rust
//! use cnxlink_client::{BackoffStrategy, ExponentialBackoff, FixedDelay};
//! use std::time::Duration;
//!
//! let gate = FixedDelay::new(Duration::from_millis(200)).with_max_attempts(10);
//! assert_eq!(gate.next_delay(0), Some(Duration::from_millis(200)));
//! assert_eq!(gate.next_delay(10), None);
//!
//! let redial = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(60));
//! assert_eq!(redial.next_delay(2), Some(Duration::from_secs(4)));
//! ```

use std::time::Duration;

/// Retry schedule
pub trait BackoffStrategy: Send + Sync {
    /// Delay before the next attempt, given `attempt` attempts already failed
    ///
    /// `None` means give up.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

/// Exponentially increasing delays with optional jitter
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    min_delay: Duration,
    max_delay: Duration,
    max_attempts: Option<u32>,
    jitter: bool,
}

impl ExponentialBackoff {
    /// Delays from `min_delay` doubling up to `max_delay`, unlimited attempts
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay,
            max_attempts: None,
            jitter: false,
        }
    }

    /// Give up after `max_attempts` attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Add up to 25% random jitter to each delay
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(30))
            .with_max_attempts(10)
            .with_jitter()
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt >= max {
                return None;
            }
        }

        let base = self.min_delay.as_millis() as u64;
        let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
        let delay = base.saturating_mul(factor).min(self.max_delay.as_millis() as u64);

        if self.jitter {
            use rand::Rng;
            let jitter_ms = rand::thread_rng().gen_range(0..=(delay / 4));
            return Some(Duration::from_millis(delay + jitter_ms));
        }

        Some(Duration::from_millis(delay))
    }
}

/// Constant delay between attempts
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
    max_attempts: Option<u32>,
}

impl FixedDelay {
    /// Constant `delay`, unlimited attempts
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    /// Give up after `max_attempts` attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl BackoffStrategy for FixedDelay {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt >= max {
                return None;
            }
        }
        Some(self.delay)
    }
}

/// Never retry
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl BackoffStrategy for NoRetry {
    fn next_delay(&self, _attempt: u32) -> Option<Duration> {
        None
    }
}
