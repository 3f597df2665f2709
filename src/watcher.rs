//! # Change notification source.
//!
//! Facades that can be watched (flag sources, the migration status) hand out a
//! [`Watcher`]: a receive-only stream of "something changed, go re-read the state"
//! notifications. Notifications carry no payload and may be coalesced.
//!
//! Implementations must deliver one notification right after creation so a consumer
//! that reads the state and then starts watching cannot miss a change in between.
//!
//! [`channel`] builds an in-process watcher and its [`Notifier`]:
//!
//! ```rust
//! use depvisor::watcher::{self, Watcher};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (notifier, mut watcher) = watcher::channel();
//! notifier.notify();
//! notifier.notify(); // coalesced with the pending one
//! assert_eq!(watcher.changes().recv().await, Some(()));
//!
//! notifier.close(Some(depvisor::WorkerError::fail("connection lost")));
//! assert_eq!(watcher.changes().recv().await, None);
//! assert!(watcher.err().is_some());
//! # }
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::WorkerError;

/// Receive-only notification source.
pub trait Watcher: Send + 'static {
    /// Notification stream; `None` once the source closed.
    fn changes(&mut self) -> &mut mpsc::Receiver<()>;

    /// Stops the source. Idempotent; fails when the source could not be released.
    fn stop(&mut self) -> Result<(), WorkerError>;

    /// Terminal error of a closed source, if it failed.
    fn err(&self) -> Option<WorkerError>;
}

/// Sending half of [`channel`].
#[derive(Clone, Debug)]
pub struct Notifier {
    tx: mpsc::Sender<()>,
    err: Arc<Mutex<Option<WorkerError>>>,
}

impl Notifier {
    /// Signals a change. Never blocks; coalesces with a pending notification.
    pub fn notify(&self) {
        let _ = self.tx.try_send(());
    }

    /// True once the watcher stopped or was dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Drops this notifier, recording `err` as the terminal error.
    ///
    /// The watcher closes when every clone of the notifier is gone.
    pub fn close(self, err: Option<WorkerError>) {
        if let Some(err) = err {
            *self.err.lock() = Some(err);
        }
    }
}

/// Watcher returned by [`channel`].
#[derive(Debug)]
pub struct ChannelWatcher {
    rx: mpsc::Receiver<()>,
    err: Arc<Mutex<Option<WorkerError>>>,
}

impl Watcher for ChannelWatcher {
    fn changes(&mut self) -> &mut mpsc::Receiver<()> {
        &mut self.rx
    }

    fn stop(&mut self) -> Result<(), WorkerError> {
        self.rx.close();
        Ok(())
    }

    fn err(&self) -> Option<WorkerError> {
        self.err.lock().clone()
    }
}

/// In-process watcher with a single-slot, coalescing queue.
pub fn channel() -> (Notifier, ChannelWatcher) {
    let (tx, rx) = mpsc::channel(1);
    let err = Arc::new(Mutex::new(None));
    (
        Notifier {
            tx,
            err: Arc::clone(&err),
        },
        ChannelWatcher { rx, err },
    )
}
