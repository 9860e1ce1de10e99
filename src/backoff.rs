//! Backoff strategies for retry policies

use std::time::Duration;

/// Backoff strategy for retries
#[derive(Debug, Clone)]
pub enum Backoff {
    /// Fixed delay between retries
    Constant { delay: Duration },
    /// Linearly increasing delay
    Linear { base: Duration, max: Option<Duration> },
    /// Exponentially increasing delay with optional cap
    Exponential { base: Duration, max: Option<Duration> },
}

impl Backoff {
    /// Create a constant backoff strategy
    pub fn constant(delay: Duration) -> Self {
        Backoff::Constant { delay }
    }

    /// Create a linear backoff strategy
    pub fn linear(base: Duration) -> Self {
        Backoff::Linear { base, max: None }
    }

    /// Create an exponential backoff strategy
    pub fn exponential(base: Duration) -> Self {
        Backoff::Exponential { base, max: None }
    }

    /// Set a maximum delay for exponential backoff
    pub fn with_max(mut self, max: Duration) -> Self {
        match &mut self {
            Backoff::Exponential { max: m, .. } => *m = Some(max),
            Backoff::Linear { max: m, .. } => *m = Some(max),
            Backoff::Constant { .. } => {}
        }
        self
    }

    /// Calculate the delay for a given attempt number (1-indexed)
    pub fn delay(&self, attempt: usize) -> Duration {
        match self {
            Backoff::Constant { delay } => *delay,
            Backoff::Linear { base, max } => {
                // Use checked_mul to prevent overflow
                let delay = base
                    .checked_mul(attempt as u32)
                    .unwrap_or(Duration::from_secs(u64::MAX));
                if let Some(max) = max {
                    delay.min(*max)
                } else {
                    delay
                }
            }
            Backoff::Exponential { base, max } => {
                // Calculate 2^(attempt-1) with overflow protection
                let exponent = (attempt.saturating_sub(1)) as u32;
                let multiplier = 2u32.saturating_pow(exponent);

                let exp_delay = base.checked_mul(multiplier)
                    .unwrap_or(Duration::from_secs(u64::MAX));

                if let Some(max) = max {
                    exp_delay.min(*max)
                } else {
                    exp_delay
                }
            }
        }
    }
}
