//! # Engine configuration.
//!
//! [`EngineConfig`] gathers the few knobs the engine loop needs. All fields are public;
//! the accessors below interpret sentinel values so the loop never checks for `0`
//! itself.
//!
//! ## Sentinel values
//! - `grace = 0s` → do not wait for workers on shutdown; anything still running is stuck
//! - `bounce_delay = 0s` → restart a cleanly exited worker immediately
//! - `bus_capacity = 0` → treated as 1

use std::time::Duration;

use crate::policies::BackoffPolicy;

/// Engine settings.
///
/// ## Field semantics
/// - `grace`: maximum wait for workers to exit once the engine is stopping
/// - `bus_capacity`: event bus ring buffer size (min 1)
/// - `backoff`: delay between failed start attempts / failed worker exits of one manifold
/// - `bounce_delay`: delay before restarting a worker that exited without error
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Maximum time to wait for workers to stop after `kill`, a signal or a fatal error.
    ///
    /// If exceeded, [`Engine::wait`](crate::Engine::wait) returns
    /// [`EngineError::GraceExceeded`](crate::EngineError::GraceExceeded).
    pub grace: Duration,

    /// Capacity of the event bus broadcast channel ring buffer.
    pub bus_capacity: usize,

    /// Retry delay policy for failing manifolds.
    ///
    /// The failure counter is per manifold and resets once a worker is running.
    pub backoff: BackoffPolicy,

    /// Delay before restarting a worker that returned `Ok(())` on its own.
    pub bounce_delay: Duration,
}

impl EngineConfig {
    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Returns the clean-exit restart delay as an `Option`.
    ///
    /// - `None` → restart immediately
    /// - `Some(d)` → wait `d` first
    #[inline]
    pub fn restart_delay(&self) -> Option<Duration> {
        if self.bounce_delay.is_zero() {
            None
        } else {
            Some(self.bounce_delay)
        }
    }
}

impl Default for EngineConfig {
    /// Default configuration:
    ///
    /// - `grace = 30s`
    /// - `bus_capacity = 1024`
    /// - `backoff = BackoffPolicy::default()` (250ms doubling to 30s, equal jitter)
    /// - `bounce_delay = 10ms`
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(30),
            bus_capacity: 1024,
            backoff: BackoffPolicy::default(),
            bounce_delay: Duration::from_millis(10),
        }
    }
}
