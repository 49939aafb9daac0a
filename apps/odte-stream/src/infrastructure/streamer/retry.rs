//! Retry Policies
//!
//! Backoff between supervisor restarts. The supervisor never gives up, so a
//! policy only decides how long to wait before the next attempt.
//!
//! - `ConstantBackoff`: fixed delay, 5 s by default
//! - `ExponentialBackoff`: doubling delay with a cap and ±jitter

use std::time::Duration;

use rand::Rng;

/// Delay policy between session attempts.
pub trait RetryPolicy: Send + Sync {
    /// Delay before the next attempt.
    fn next_delay(&mut self) -> Duration;

    /// Called once a session reaches the subscribed state.
    fn reset(&mut self);
}

// =============================================================================
// Constant
// =============================================================================

/// Fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantBackoff {
    delay: Duration,
}

impl ConstantBackoff {
    /// Create a constant policy.
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for ConstantBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl RetryPolicy for ConstantBackoff {
    fn next_delay(&mut self) -> Duration {
        self.delay
    }

    fn reset(&mut self) {}
}

// =============================================================================
// Exponential
// =============================================================================

/// Configuration for exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
}

impl Default for ExponentialConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(64),
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// Exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: ExponentialConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl ExponentialBackoff {
    /// Create an exponential policy.
    #[must_use]
    pub const fn new(config: ExponentialConfig) -> Self {
        let initial_delay = config.initial_delay;
        Self {
            config,
            current_delay: initial_delay,
            attempt_count: 0,
        }
    }

    /// Attempts since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis(adjusted_millis as u64)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(ExponentialConfig::default())
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn next_delay(&mut self) -> Duration {
        self.attempt_count = self.attempt_count.saturating_add(1);
        let delay = self.apply_jitter(self.current_delay);

        let next = self
            .current_delay
            .mul_f64(self.config.multiplier.max(1.0))
            .min(self.config.max_delay);
        self.current_delay = next;

        delay
    }

    fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempt_count = 0;
    }
}
