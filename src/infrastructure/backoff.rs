//! Reconnect delay schedule

use std::time::Duration;

use rand::Rng;

use crate::config::RealtimeConfig;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first reconnect in milliseconds
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay in milliseconds
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Fraction of the delay to randomize by (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig::from(&RealtimeConfig::default())
    }
}

impl From<&RealtimeConfig> for BackoffConfig {
    fn from(config: &RealtimeConfig) -> Self {
        Self {
            initial_delay_ms: config.initial_delay_ms.max(1),
            max_delay_ms: config.max_delay_ms.max(1),
            // Delays never shrink; NaN falls back to a constant schedule
            multiplier: config.multiplier.max(1.0),
            jitter_factor: if config.jitter_factor.is_nan() {
                0.0
            } else {
                config.jitter_factor.clamp(0.0, 1.0)
            },
        }
    }
}

/// Stateless exponential backoff.
///
/// The delay before reconnect attempt `n` (0-based) is
/// `min(initial_delay_ms * multiplier^n, max_delay_ms)`, optionally jittered.
/// The caller owns the attempt counter.
#[derive(Debug, Clone, Default)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
}

impl ExponentialBackoff {
    pub fn with_config(config: BackoffConfig) -> Self {
        Self { config }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let ceiling = self.config.max_delay_ms.max(1) as f64;
        let delay = (self.config.initial_delay_ms as f64 * self.config.multiplier.powi(exponent))
            .max(1.0)
            .min(ceiling);

        let delay = match self.config.jitter_factor {
            jitter if jitter > 0.0 => {
                let spread = delay * jitter;
                delay + rand::rng().random_range(-spread..=spread)
            }
            _ => delay,
        };

        Duration::from_millis(delay.clamp(1.0, ceiling) as u64)
    }

    /// The first `attempts` delays in order
    pub fn schedule(&self, attempts: u32) -> impl Iterator<Item = Duration> + '_ {
        (0..attempts).map(move |attempt| self.delay_for_attempt(attempt))
    }
}
