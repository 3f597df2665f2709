//! # Gate: one-shot latch.
//!
//! A [`Lock`] starts locked and can be unlocked exactly once; it never re-locks. The
//! gate [`manifold`] turns it into a dependency edge: its start suspends until the
//! lock is unlocked, then resolves to a [`GateWorker`] that runs until killed.
//! Dependents of a resolved gate therefore see it as perpetually satisfied.
//!
//! ```text
//!   upgrade steps ── lock.unlock() ──► gate start resolves ──► dependents start
//! ```
//!
//! The gate output provides the [`Lock`] itself and a [`FlagRef`] that is always set,
//! so the gate can be listed among a [`Housing`](crate::Housing)'s flags directly.
//!
//! ```rust
//! use depvisor::gate::Lock;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let lock = Lock::new();
//! let waiter = tokio::spawn({
//!     let lock = lock.clone();
//!     async move { lock.unlocked().await }
//! });
//! lock.unlock();
//! lock.unlock(); // idempotent
//! waiter.await.unwrap();
//! assert!(lock.is_unlocked());
//! # }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::WorkerError;
use crate::flag::{Flag, FlagRef};
use crate::manifold::{Manifold, Output};
use crate::worker::value::ValueWorker;
use crate::worker::{Worker, WorkerRef};

/// One-shot latch shared by everyone holding a clone.
#[derive(Clone, Debug)]
pub struct Lock {
    tx: Arc<watch::Sender<bool>>,
}

impl Lock {
    /// Creates a locked lock.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Unlocks for good. Later calls do nothing.
    pub fn unlock(&self) {
        self.tx.send_if_modified(|unlocked| {
            if *unlocked {
                false
            } else {
                *unlocked = true;
                true
            }
        });
    }

    pub fn is_unlocked(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once unlocked; immediately if already unlocked.
    pub async fn unlocked(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|unlocked| *unlocked).await;
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

impl Flag for Lock {
    fn check(&self) -> bool {
        self.is_unlocked()
    }
}

/// Worker of a resolved gate; does nothing until killed.
#[derive(Debug)]
pub struct GateWorker {
    lock: Lock,
    token: CancellationToken,
}

impl GateWorker {
    pub fn lock(&self) -> &Lock {
        &self.lock
    }
}

#[async_trait]
impl Worker for GateWorker {
    fn kill(&self) {
        self.token.cancel();
    }

    async fn wait(&self) -> Result<(), WorkerError> {
        self.token.cancelled().await;
        Ok(())
    }
}

/// Gate manifold around `lock`.
///
/// Start suspends until `lock` is unlocked or the engine aborts the attempt
/// ([`WorkerError::Canceled`]).
pub fn manifold(name: impl Into<String>, lock: Lock) -> Manifold {
    Manifold::new(name, move |ctx| {
        let lock = lock.clone();
        async move {
            tokio::select! {
                _ = lock.unlocked() => {}
                _ = ctx.aborted() => return Err(WorkerError::Canceled),
            }
            Ok(WorkerRef::new(GateWorker {
                lock,
                token: CancellationToken::new(),
            }))
        }
    })
    .with_output(
        Output::of::<GateWorker>()
            .provide(|w: &GateWorker| w.lock.clone())
            .provide(|w: &GateWorker| Arc::new(w.lock.clone()) as FlagRef),
    )
}

/// Flag manifold reporting whether the gate named `gate` is resolved.
///
/// It only runs while the gate runs, so its flag is always set; use it when
/// dependents should name a flag rather than the gate itself.
pub fn flag_manifold(name: impl Into<String>, gate: impl Into<String>) -> Manifold {
    let gate: String = gate.into();
    Manifold::new(name, {
        let gate = gate.clone();
        move |ctx| {
            let gate = gate.clone();
            async move {
                let lock: Lock = ctx.get(&gate)?;
                let flag: FlagRef = Arc::new(lock);
                Ok(WorkerRef::new(ValueWorker::new(flag)))
            }
        }
    })
    .with_typed_input::<Lock>(gate)
    .with_output(
        Output::of::<ValueWorker<FlagRef>>()
            .provide(|w: &ValueWorker<FlagRef>| w.value().clone()),
    )
}
