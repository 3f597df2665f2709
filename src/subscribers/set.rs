//! # Non-blocking fan-out to subscribers.
//!
//! ```text
//! emit(event)
//!     ├──► [queue 1] ──► worker 1 ──► sub1.on_event()
//!     │                       └────► panic → SubscriberPanicked
//!     └──► [queue N] ──► worker N ──► subN.on_event()
//! ```
//!
//! ## Rules
//! - `emit()` uses `try_send` and returns immediately
//! - per-subscriber FIFO, no ordering across subscribers
//! - a full or closed queue drops the event for that subscriber and publishes
//!   `SubscriberOverflow` (never for overflow events themselves)
//! - a panicking subscriber is reported and keeps receiving events

use std::sync::Arc;

use futures::FutureExt;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::error::panic_message;
use crate::events::{Bus, Event, EventKind};
use crate::subscribers::Subscribe;

struct Channel {
    name: &'static str,
    sender: mpsc::Sender<Arc<Event>>,
}

/// Per-subscriber queues and their worker tasks.
pub struct SubscriberSet {
    channels: Vec<Channel>,
    workers: Vec<JoinHandle<()>>,
    bus: Bus,
}

impl SubscriberSet {
    /// Spawns one worker per subscriber. Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>, bus: Bus) -> Self {
        let mut channels = Vec::with_capacity(subs.len());
        let mut workers = Vec::with_capacity(subs.len());

        for sub in subs {
            let (tx, rx) = mpsc::channel::<Arc<Event>>(sub.queue_capacity().max(1));
            channels.push(Channel {
                name: sub.name(),
                sender: tx,
            });
            workers.push(tokio::spawn(drive(sub, rx, bus.clone())));
        }

        Self {
            channels,
            workers,
            bus,
        }
    }

    /// Delivers `event` to every subscriber queue.
    pub fn emit(&self, event: &Event) {
        let shared = Arc::new(event.clone());
        let is_overflow = matches!(event.kind, EventKind::SubscriberOverflow);

        for channel in &self.channels {
            let reason = match channel.sender.try_send(Arc::clone(&shared)) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Full(_)) => "full",
                Err(mpsc::error::TrySendError::Closed(_)) => "closed",
            };
            if !is_overflow {
                self.bus
                    .publish(Event::subscriber_overflow(channel.name, reason));
            }
        }
    }

    /// Number of subscribers.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// True if there are no subscribers.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Closes every queue and waits for the workers to drain them.
    pub async fn shutdown(self) {
        drop(self.channels);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

async fn drive(sub: Arc<dyn Subscribe>, mut rx: mpsc::Receiver<Arc<Event>>, bus: Bus) {
    while let Some(ev) = rx.recv().await {
        let handled = std::panic::AssertUnwindSafe(sub.on_event(ev.as_ref()))
            .catch_unwind()
            .await;
        if let Err(panic) = handled {
            bus.publish(Event::subscriber_panicked(sub.name(), panic_message(&*panic)));
        }
    }
}
