//! # Jitter applied to start-retry delays.
//!
//! When a shared dependency (say, the API connection) goes away, every manifold
//! below it fails at once. [`JitterPolicy`] spreads their retries apart:
//!
//! - [`JitterPolicy::None`]: exact delay
//! - [`JitterPolicy::Full`]: uniform in `[0, delay]`
//! - [`JitterPolicy::Equal`]: `delay/2 + uniform[0, delay/2]`

use std::time::Duration;

use rand::Rng;

/// Randomization strategy for retry delays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitterPolicy {
    /// Use the computed delay unchanged.
    None,
    /// Uniform random delay in `[0, delay]`.
    Full,
    /// Half the delay plus a uniform random share of the other half.
    #[default]
    Equal,
}

impl JitterPolicy {
    /// Applies the policy to `delay`.
    pub fn apply(self, delay: Duration) -> Duration {
        let ms = delay.as_millis().min(u128::from(u64::MAX)) as u64;
        if ms == 0 {
            return delay;
        }
        match self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => Duration::from_millis(rand::rng().random_range(0..=ms)),
            JitterPolicy::Equal => {
                let floor = ms / 2;
                let spread = ms - floor;
                Duration::from_millis(floor + rand::rng().random_range(0..=spread))
            }
        }
    }
}
