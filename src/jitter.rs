//! Jitter strategies to prevent thundering herd

use rand::Rng;
use std::time::Duration;

/// Jitter strategy for randomizing retry delays
#[derive(Debug, Clone)]
pub enum Jitter {
    /// No jitter - use exact backoff delay
    None,
    /// Full jitter: random between 0 and delay
    Full,
    /// Equal jitter: random between delay/2 and delay
    Equal,
    /// Decorrelated jitter: AWS-style with state
    Decorrelated { base: Duration, max: Duration },
    /// Bounded jitter: uniform random perturbation within `±fraction` of the delay.
    Bounded { fraction: f64 },
}

impl Jitter {
    /// Create a full jitter strategy
    pub fn full() -> Self {
        Jitter::Full
    }

    /// Create an equal jitter strategy
    pub fn equal() -> Self {
        Jitter::Equal
    }

    /// Create a decorrelated jitter strategy
    pub fn decorrelated(base: Duration, max: Duration) -> Self {
        Jitter::Decorrelated { base, max }
    }

    /// Create a bounded jitter strategy: uniform random within `±fraction` of the delay.
    ///
    /// `fraction` is clamped to `[0.0, 1.0]`. A fraction of `0.25` matches a `±25%` band.
    pub fn bounded(fraction: f64) -> Self {
        Jitter::Bounded { fraction: fraction.clamp(0.0, 1.0) }
    }

    /// Apply jitter to a delay duration
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            Jitter::None => delay,
            Jitter::Full => {
                let millis = delay.as_millis() as u64;
                if millis == 0 {
                    return Duration::from_millis(0);
                }
                let jittered = rand::thread_rng().gen_range(0..=millis);
                Duration::from_millis(jittered)
            }
            Jitter::Equal => {
                let millis = delay.as_millis() as u64;
                if millis == 0 {
                    return Duration::from_millis(0);
                }
                let half = millis / 2;
                let jittered = rand::thread_rng().gen_range(half..=millis);
                Duration::from_millis(jittered)
            }
            Jitter::Decorrelated { base, max } => {
                // Decorrelated jitter: sleep = min(cap, random(base, sleep * 3))
                // For simplicity, we use the delay as previous sleep
                let base_millis = base.as_millis() as u64;
                let delay_millis = delay.as_millis() as u64;
                let max_millis = max.as_millis() as u64;

                let upper = delay_millis.saturating_mul(3);
                let range_max = upper.min(max_millis);

                if base_millis >= range_max {
                    return Duration::from_millis(base_millis);
                }

                let jittered = rand::thread_rng().gen_range(base_millis..=range_max);
                Duration::from_millis(jittered)
            }
            Jitter::Bounded { fraction } => {
                let millis = delay.as_millis() as u64;
                if millis == 0 {
                    return Duration::from_millis(0);
                }
                let band = (millis as f64 * fraction) as u64;
                let low = millis.saturating_sub(band);
                let high = millis.saturating_add(band);
                let jittered = rand::thread_rng().gen_range(low..=high);
                Duration::from_millis(jittered)
            }
        }
    }

    /// Apply jitter with a custom RNG (for testing)
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        match self {
            Jitter::None => delay,
            Jitter::Full => {
                let millis = delay.as_millis() as u64;
                if millis == 0 {
                    return Duration::from_millis(0);
                }
                let jittered = rng.gen_range(0..=millis);
                Duration::from_millis(jittered)
            }
            Jitter::Equal => {
                let millis = delay.as_millis() as u64;
                if millis == 0 {
                    return Duration::from_millis(0);
                }
                let half = millis / 2;
                let jittered = rng.gen_range(half..=millis);
                Duration::from_millis(jittered)
            }
            Jitter::Decorrelated { base, max } => {
                let base_millis = base.as_millis() as u64;
                let delay_millis = delay.as_millis() as u64;
                let max_millis = max.as_millis() as u64;

                let upper = delay_millis.saturating_mul(3);
                let range_max = upper.min(max_millis);

                if base_millis >= range_max {
                    return Duration::from_millis(base_millis);
                }

                let jittered = rng.gen_range(base_millis..=range_max);
                Duration::from_millis(jittered)
            }
            Jitter::Bounded { fraction } => {
                let millis = delay.as_millis() as u64;
                if millis == 0 {
                    return Duration::from_millis(0);
                }
                let band = (millis as f64 * fraction) as u64;
                let low = millis.saturating_sub(band);
                let high = millis.saturating_add(band);
                Duration::from_millis(rng.gen_range(low..=high))
            }
        }
    }
}
