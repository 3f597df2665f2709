//! # Fortress: shared visits, exclusive lockdown.
//!
//! A [`Fortress`] lets many visitors work concurrently until a guard asks for a
//! lockdown. From that moment no new visit may enter; the lockdown completes once
//! every visit in progress has left. Visitors are told a lockdown was requested so
//! that long visits can wind down.
//!
//! ```text
//!              lockdown()                  last visitor leaves
//!   Unlocked ─────────────► Requested ────────────────────────► LockedDown
//!       ▲                       │ abort, unlock()                     │
//!       └───────────────────────┘◄──────────── unlock() ──────────────┘
//!
//!   enter()/visit(): Unlocked → Ok(visit) ; Requested | LockedDown → Err(LockedDown)
//! ```
//!
//! The [`FortressWorker`] owns one fortress for the lifetime of its manifold and
//! exposes a [`Guest`] (visits) and a [`Guard`] (lockdown/unlock) to dependents. When
//! the worker stops, new visits and lockdowns fail with [`FortressError::Shutdown`].
//!
//! ## Example
//! ```rust
//! use depvisor::{Fortress, FortressError};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let fortress = Fortress::new();
//! let (guest, guard) = (fortress.guest(), fortress.guard());
//!
//! let visit = guest.enter().unwrap();
//! let lockdown = tokio::spawn({
//!     let guard = guard.clone();
//!     async move { guard.lockdown(&CancellationToken::new()).await }
//! });
//!
//! visit.lockdown_requested().await;
//! assert_eq!(guest.enter().err(), Some(FortressError::LockedDown));
//! drop(visit);
//!
//! assert_eq!(lockdown.await.unwrap(), Ok(()));
//! guard.unlock();
//! assert!(guest.enter().is_ok());
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::error::{FortressError, WorkerError};
use crate::manifold::{Manifold, Output};
use crate::worker::{Worker, WorkerRef};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lockdown {
    None,
    Requested,
    Complete,
}

struct State {
    lockdown: Lockdown,
    visitors: usize,
    shutdown: bool,
    /// Bumped by every lockdown request and every unlock.
    epoch: u64,
    /// Cancelled when a lockdown is requested; replaced on unlock or abort.
    requested: CancellationToken,
}

/// Visit/lockdown barrier.
pub struct Fortress {
    state: Mutex<State>,
    drained: Notify,
}

impl Fortress {
    /// Creates an unlocked fortress.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                lockdown: Lockdown::None,
                visitors: 0,
                shutdown: false,
                epoch: 0,
                requested: CancellationToken::new(),
            }),
            drained: Notify::new(),
        })
    }

    pub fn guest(self: &Arc<Self>) -> Guest {
        Guest {
            fortress: Arc::clone(self),
        }
    }

    pub fn guard(self: &Arc<Self>) -> Guard {
        Guard {
            fortress: Arc::clone(self),
        }
    }

    /// Visits in progress.
    pub fn visitors(&self) -> usize {
        self.state.lock().visitors
    }

    /// True once a lockdown completed and until `unlock`.
    pub fn is_locked_down(&self) -> bool {
        self.state.lock().lockdown == Lockdown::Complete
    }

    /// True while a lockdown is requested but still draining.
    pub fn is_lockdown_requested(&self) -> bool {
        self.state.lock().lockdown == Lockdown::Requested
    }

    fn enter(self: &Arc<Self>) -> Result<Visit, FortressError> {
        let mut st = self.state.lock();
        if st.shutdown {
            return Err(FortressError::Shutdown);
        }
        if st.lockdown != Lockdown::None {
            return Err(FortressError::LockedDown);
        }
        st.visitors += 1;
        Ok(Visit {
            fortress: Arc::clone(self),
            requested: st.requested.clone(),
        })
    }

    fn leave(&self) {
        let drained = {
            let mut st = self.state.lock();
            st.visitors = st.visitors.saturating_sub(1);
            st.visitors == 0
        };
        if drained {
            self.drained.notify_waiters();
        }
    }

    async fn lockdown(&self, abort: &CancellationToken) -> Result<(), FortressError> {
        let epoch = {
            let mut st = self.state.lock();
            if st.shutdown {
                return Err(FortressError::Shutdown);
            }
            if st.lockdown != Lockdown::None {
                return Err(FortressError::LockdownInProgress);
            }
            st.lockdown = Lockdown::Requested;
            st.epoch += 1;
            st.requested.cancel();
            st.epoch
        };

        let mut pending = PendingLockdown {
            fortress: self,
            epoch,
            armed: true,
        };
        loop {
            let drained = self.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();
            {
                let mut st = self.state.lock();
                if st.shutdown {
                    return Err(FortressError::Shutdown);
                }
                // Unlocked while draining; the request no longer exists.
                if st.epoch != epoch || st.lockdown != Lockdown::Requested {
                    pending.armed = false;
                    return Err(FortressError::Aborted);
                }
                if st.visitors == 0 {
                    st.lockdown = Lockdown::Complete;
                    pending.armed = false;
                    return Ok(());
                }
            }
            tokio::select! {
                _ = &mut drained => {}
                _ = abort.cancelled() => return Err(FortressError::Aborted),
            }
        }
    }

    fn unlock(&self) {
        {
            let mut st = self.state.lock();
            st.epoch += 1;
            Self::reopen(&mut st);
        }
        self.drained.notify_waiters();
    }

    /// Withdraws the request made under `epoch`, if it is still the pending one.
    fn withdraw(&self, epoch: u64) {
        let mut st = self.state.lock();
        if st.epoch == epoch && st.lockdown == Lockdown::Requested {
            Self::reopen(&mut st);
        }
    }

    fn reopen(st: &mut State) {
        st.lockdown = Lockdown::None;
        if st.requested.is_cancelled() {
            st.requested = CancellationToken::new();
        }
    }

    fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.drained.notify_waiters();
    }
}

/// Reverts a lockdown request that did not complete.
struct PendingLockdown<'a> {
    fortress: &'a Fortress,
    epoch: u64,
    armed: bool,
}

impl Drop for PendingLockdown<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.fortress.withdraw(self.epoch);
        }
    }
}

/// Visiting side of a fortress.
#[derive(Clone)]
pub struct Guest {
    fortress: Arc<Fortress>,
}

impl Guest {
    /// Enters the fortress; the returned [`Visit`] leaves it when dropped.
    ///
    /// Fails with [`FortressError::LockedDown`] if a lockdown was requested or is
    /// complete, and with [`FortressError::Shutdown`] once the fortress stopped.
    pub fn enter(&self) -> Result<Visit, FortressError> {
        self.fortress.enter()
    }

    /// Runs `f` inside a visit. `f` gets a token cancelled when a lockdown is
    /// requested.
    pub async fn visit<F, Fut, T>(&self, f: F) -> Result<T, FortressError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = T>,
    {
        let visit = self.enter()?;
        let out = f(visit.requested.clone()).await;
        drop(visit);
        Ok(out)
    }
}

/// Locking side of a fortress.
#[derive(Clone)]
pub struct Guard {
    fortress: Arc<Fortress>,
}

impl Guard {
    /// Blocks new visits, then waits until every visit in progress has left.
    ///
    /// ### Errors
    /// - [`FortressError::LockdownInProgress`] if a lockdown is requested or complete
    /// - [`FortressError::Aborted`] if `abort` fires first, or [`Guard::unlock`] withdraws
    ///   the request while it drains
    /// - [`FortressError::Shutdown`] once the fortress stopped
    ///
    /// Dropping the future before it completes withdraws the request too.
    pub async fn lockdown(&self, abort: &CancellationToken) -> Result<(), FortressError> {
        self.fortress.lockdown(abort).await
    }

    /// Returns the fortress to unlocked; visits may enter again. A lockdown still
    /// draining is withdrawn and fails with [`FortressError::Aborted`].
    pub fn unlock(&self) {
        self.fortress.unlock();
    }

    pub fn is_locked_down(&self) -> bool {
        self.fortress.is_locked_down()
    }
}

/// One visit in progress; leaves the fortress on drop.
pub struct Visit {
    fortress: Arc<Fortress>,
    requested: CancellationToken,
}

impl Visit {
    /// Resolves when a lockdown is requested.
    pub fn lockdown_requested(&self) -> WaitForCancellationFuture<'_> {
        self.requested.cancelled()
    }

    pub fn is_lockdown_requested(&self) -> bool {
        self.requested.is_cancelled()
    }
}

impl Drop for Visit {
    fn drop(&mut self) {
        self.fortress.leave();
    }
}

/// Worker owning a fortress until killed.
pub struct FortressWorker {
    fortress: Arc<Fortress>,
    token: CancellationToken,
}

impl FortressWorker {
    pub fn new() -> Self {
        Self {
            fortress: Fortress::new(),
            token: CancellationToken::new(),
        }
    }

    pub fn guest(&self) -> Guest {
        self.fortress.guest()
    }

    pub fn guard(&self) -> Guard {
        self.fortress.guard()
    }
}

impl Default for FortressWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Worker for FortressWorker {
    fn kill(&self) {
        self.fortress.shutdown();
        self.token.cancel();
    }

    async fn wait(&self) -> Result<(), WorkerError> {
        self.token.cancelled().await;
        Ok(())
    }
}

/// Fortress manifold; every start creates a fresh, unlocked fortress.
pub fn manifold(name: impl Into<String>) -> Manifold {
    Manifold::new(name, |_ctx| async { Ok(WorkerRef::new(FortressWorker::new())) }).with_output(
        Output::of::<FortressWorker>()
            .provide(FortressWorker::guest)
            .provide(FortressWorker::guard),
    )
}
