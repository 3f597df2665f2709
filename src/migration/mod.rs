//! # Migration coordination.
//!
//! Two manifolds cooperate around the migration fortress:
//!
//! - the **inactive flag** ([`inactive_flag`]) is set while no migration runs; workers
//!   housed "if not migrating" depend on it and occupy the fortress;
//! - the **minion** ([`minion`]) follows the migration phase; once a migration is
//!   underway it locks the fortress down (waiting for every housed worker to leave),
//!   then reports the phase back. A finished migration unlocks the fortress.
//!
//! Both read the phase through a [`MigrationFacade`] built from the API caller.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::WorkerError;
use crate::watcher::Watcher;

mod flag;
mod minion;
mod phase;

pub use flag::inactive_flag;
pub use minion::{Minion, MinionConfig, minion};
pub use phase::{ParsePhaseError, Phase, is_inactive};

/// Controller-side view of the model's migration.
#[async_trait]
pub trait MigrationFacade: Send + Sync + 'static {
    /// Current phase.
    async fn phase(&self) -> Result<Phase, WorkerError>;

    /// Watches the phase; notifies once right away.
    async fn watch(&self) -> Result<Box<dyn Watcher>, WorkerError>;

    /// Reports whether this agent completed its part of `phase`.
    async fn report(&self, phase: Phase, success: bool) -> Result<(), WorkerError>;
}

/// Builds a migration facade from the API caller.
pub type NewMigrationFacade<C, M> = Arc<dyn Fn(C) -> Result<M, WorkerError> + Send + Sync>;

#[cfg(test)]
pub(crate) mod testing {
    //! In-process migration status.

    use parking_lot::Mutex;
    use tokio::sync::watch;

    use super::*;
    use crate::watcher::{self, Notifier};

    #[derive(Clone)]
    pub(crate) struct Status {
        phase: Arc<Mutex<Phase>>,
        notifiers: Arc<Mutex<Vec<Notifier>>>,
        reports: Arc<watch::Sender<Vec<(Phase, bool)>>>,
    }

    impl Status {
        pub(crate) fn new(phase: Phase) -> Self {
            Self {
                phase: Arc::new(Mutex::new(phase)),
                notifiers: Arc::default(),
                reports: Arc::new(watch::channel(Vec::new()).0),
            }
        }

        pub(crate) fn set(&self, phase: Phase) {
            *self.phase.lock() = phase;
            self.notifiers.lock().retain(|n| {
                n.notify();
                !n.is_closed()
            });
        }

        pub(crate) fn reports(&self) -> watch::Receiver<Vec<(Phase, bool)>> {
            self.reports.subscribe()
        }
    }

    #[async_trait]
    impl MigrationFacade for Status {
        async fn phase(&self) -> Result<Phase, WorkerError> {
            Ok(*self.phase.lock())
        }

        async fn watch(&self) -> Result<Box<dyn Watcher>, WorkerError> {
            let (notifier, watcher) = watcher::channel();
            notifier.notify();
            self.notifiers.lock().push(notifier);
            Ok(Box::new(watcher))
        }

        async fn report(&self, phase: Phase, success: bool) -> Result<(), WorkerError> {
            self.reports.send_modify(|r| r.push((phase, success)));
            Ok(())
        }
    }
}
