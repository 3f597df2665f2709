//! # Broadcast bus for engine events.
//!
//! [`Bus`] wraps [`tokio::sync::broadcast`]. The engine loop and the subscriber workers
//! publish; one listener inside the engine forwards everything to the
//! [`SubscriberSet`](crate::SubscriberSet), and tests may subscribe directly.
//!
//! ```text
//!   engine loop ──┐
//!   start tasks ──┼──► Bus ──► engine listener ──► SubscriberSet
//!   subscribers ──┘                          └──► (direct receivers)
//! ```
//!
//! ## Rules
//! - `publish()` never blocks; events with no receiver are dropped.
//! - One shared ring buffer; slow receivers observe `RecvError::Lagged(n)`.

use tokio::sync::broadcast;

use super::event::Event;

/// Cloneable, non-blocking event publisher.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a bus; `capacity` is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishes to every current receiver.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// New receiver observing events sent from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}
