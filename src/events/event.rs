//! # Events emitted by the engine and its subscriber workers.
//!
//! [`EventKind`] covers four groups:
//! - **Engine lifecycle**: graph installed, shutdown requested, shutdown outcome
//! - **Manifold lifecycle**: starting, started, start failed, backoff, stopping, exited
//! - **Terminal states**: manifold uninstalled, engine failed
//! - **Subscriber health**: overflow, panic
//!
//! [`Event`] carries optional metadata (manifold name, generation, attempt, delay,
//! reason) depending on the kind.
//!
//! ## Ordering guarantees
//! Each event has a process-wide, monotonically increasing `seq`. Events published by
//! the engine loop are already in order; `seq` restores order for events that raced
//! through different subscriber queues.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use depvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::BackoffScheduled)
//!     .with_manifold("api-caller")
//!     .with_attempt(3)
//!     .with_delay(Duration::from_millis(500))
//!     .with_reason("connection refused");
//!
//! assert_eq!(ev.manifold.as_deref(), Some("api-caller"));
//! assert_eq!(ev.delay_ms, Some(500));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of engine events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked while handling an event.
    ///
    /// Sets: `manifold` (subscriber name), `reason` (panic message).
    SubscriberPanicked,

    /// Subscriber queue was full or closed; the event was dropped for it.
    ///
    /// Sets: `manifold` (subscriber name), `reason`.
    SubscriberOverflow,

    // === Engine events ===
    /// Graph validated and installed; the loop is running.
    ///
    /// Sets: `attempt` (number of manifolds).
    EngineStarted,

    /// Stop requested (kill or OS signal).
    ShutdownRequested,

    /// All workers exited within the grace period.
    AllStoppedWithin,

    /// Grace period exceeded; `reason` lists stuck manifolds.
    GraceExceeded,

    /// The engine hit a fatal internal error and is stopping.
    ///
    /// Sets: `reason`.
    EngineFailed,

    // === Manifold lifecycle ===
    /// `start` invoked.
    ///
    /// Sets: `manifold`, `generation`, `attempt` (start count, 1-based).
    ManifoldStarting,

    /// `start` returned a worker; the manifold is running and dependents may start.
    ///
    /// Sets: `manifold`, `generation`.
    ManifoldStarted,

    /// `start` returned an error.
    ///
    /// Sets: `manifold`, `generation`, `reason`.
    StartFailed,

    /// A retry was scheduled after a failure.
    ///
    /// Sets: `manifold`, `attempt` (consecutive failures), `delay_ms`, `reason`.
    BackoffScheduled,

    /// The engine is stopping a running worker because an input went away
    /// or the engine is shutting down.
    ///
    /// Sets: `manifold`, `generation`, `reason`.
    ManifoldStopping,

    /// A worker exited (on its own or after being stopped).
    ///
    /// Sets: `manifold`, `generation`, `reason` (error, if any).
    WorkerExited,

    /// The manifold asked to be uninstalled and will not start again.
    ///
    /// Sets: `manifold`.
    ManifoldUninstalled,
}

/// Engine event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Process-wide monotonic sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Manifold (or subscriber) name, if applicable.
    pub manifold: Option<Arc<str>>,
    /// Slot generation of the worker involved.
    pub generation: Option<u64>,
    /// Attempt / counter value, meaning depends on `kind`.
    pub attempt: Option<u32>,
    /// Retry delay in milliseconds.
    pub delay_ms: Option<u32>,
    /// Human-readable reason (errors, stuck lists, ...).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates an event with the current time and the next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            manifold: None,
            generation: None,
            attempt: None,
            delay_ms: None,
            reason: None,
        }
    }

    #[inline]
    pub fn with_manifold(mut self, name: impl Into<Arc<str>>) -> Self {
        self.manifold = Some(name.into());
        self
    }

    #[inline]
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = Some(generation);
        self
    }

    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a delay (stored as milliseconds, saturating).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(d.as_millis().min(u128::from(u32::MAX)) as u32);
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates a subscriber overflow event.
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_manifold(subscriber)
            .with_reason(reason)
    }

    /// Creates a subscriber panic event.
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_manifold(subscriber)
            .with_reason(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_is_monotonic() {
        let a = Event::new(EventKind::ManifoldStarting);
        let b = Event::new(EventKind::ManifoldStarted);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn delay_saturates() {
        let ev = Event::new(EventKind::BackoffScheduled).with_delay(Duration::from_secs(u64::MAX));
        assert_eq!(ev.delay_ms, Some(u32::MAX));
    }
}
