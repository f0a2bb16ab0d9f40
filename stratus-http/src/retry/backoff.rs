//! Delay schedules between attempts.

use std::time::Duration;

/// How long to wait before the next attempt.
///
/// Attempts are numbered from 1: the delay for attempt `n` is the pause after
/// the `n`th failure.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// Retry immediately.
    None,
    /// The same pause every time.
    Constant(Duration),
    /// `start × n²`, capped at `max`.
    Quadratic {
        /// Delay after the first failure.
        start: Duration,
        /// Upper bound.
        max: Duration,
    },
    /// `initial × multiplier^(n-1)`, capped at `max`.
    Exponential {
        /// Delay after the first failure.
        initial: Duration,
        /// Upper bound.
        max: Duration,
        /// Growth factor.
        multiplier: f64,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Quadratic {
            start: Duration::from_millis(50),
            max: Duration::from_secs(10),
        }
    }
}

impl BackoffStrategy {
    /// Delay after the `attempt`th failure.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self {
            Self::None => Duration::ZERO,
            Self::Constant(delay) => *delay,
            Self::Quadratic { start, max } => start
                .saturating_mul(attempt.saturating_mul(attempt))
                .min(*max),
            Self::Exponential {
                initial,
                max,
                multiplier,
            } => {
                let factor = multiplier.powi(attempt as i32 - 1);
                let millis = initial.as_millis() as f64 * factor;
                if !millis.is_finite() || millis >= max.as_millis() as f64 {
                    *max
                } else {
                    Duration::from_millis(millis as u64)
                }
            }
        }
    }
}
