//! # Backoff between failed start attempts.
//!
//! The engine retries a failing manifold forever; [`BackoffPolicy`] decides how long
//! it waits before each retry. The `n`-th consecutive failure (0-based) waits
//!
//! ```text
//! jitter( min(first × factor^n, max) )
//! ```
//!
//! The base is derived from the failure count alone, so jitter never compounds
//! across attempts.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use depvisor::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(100),
//!     max: Duration::from_secs(1),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.delay(0), Duration::from_millis(100));
//! assert_eq!(backoff.delay(2), Duration::from_millis(400));
//! assert_eq!(backoff.delay(9), Duration::from_secs(1));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Exponential, capped, jittered retry delay.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub first: Duration,
    /// Upper bound for the un-jittered delay.
    pub max: Duration,
    /// Growth factor per consecutive failure (`1.0` = constant).
    pub factor: f64,
    /// Randomization applied on top of the capped delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// `first = 250ms`, `factor = 2.0`, `max = 30s`, `jitter = Equal`.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(250),
            max: Duration::from_secs(30),
            factor: 2.0,
            jitter: JitterPolicy::Equal,
        }
    }
}

impl BackoffPolicy {
    /// Constant delay without jitter; handy in tests.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            first: delay,
            max: delay,
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Delay to wait after `failures` previous consecutive failures.
    pub fn delay(&self, failures: u32) -> Duration {
        self.jitter.apply(self.base(failures))
    }

    /// Capped delay before jitter.
    pub fn base(&self, failures: u32) -> Duration {
        let exp = failures.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);
        if !secs.is_finite() || secs < 0.0 || secs >= self.max.as_secs_f64() {
            return self.max;
        }
        Duration::from_secs_f64(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(first_ms: u64, max_ms: u64, factor: f64) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(first_ms),
            max: Duration::from_millis(max_ms),
            factor,
            jitter: JitterPolicy::None,
        }
    }

    #[test]
    fn grows_until_capped() {
        let p = plain(100, 1_000, 2.0);
        let got: Vec<u64> = (0..6).map(|n| p.delay(n).as_millis() as u64).collect();
        assert_eq!(got, vec![100, 200, 400, 800, 1_000, 1_000]);
    }

    #[test]
    fn first_above_max_is_capped() {
        assert_eq!(plain(5_000, 1_000, 2.0).delay(0), Duration::from_secs(1));
    }

    #[test]
    fn overflow_saturates_at_max() {
        assert_eq!(plain(100, 10_000, 2.0).delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn fixed_is_constant() {
        let p = BackoffPolicy::fixed(Duration::from_millis(50));
        assert!((0..20).all(|n| p.delay(n) == Duration::from_millis(50)));
    }

    #[test]
    fn default_is_jittered_within_base() {
        let p = BackoffPolicy::default();
        for n in 0..12 {
            let base = p.base(n);
            let d = p.delay(n);
            assert!(d <= base && d >= base / 2, "failure {n}: {d:?} vs {base:?}");
        }
    }
}
