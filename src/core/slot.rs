//! # Per-manifold slot owned by the engine loop.
//!
//! ```text
//!             start                Ok(worker)
//!   Stopped ────────► Starting ─────────────► Started
//!      ▲   ▲              │ Err                  │ input lost / shutdown
//!      │   └── Backoff ◄──┤                      ▼
//!      │        (timer)   │ Uninstall         Stopping ── exited ──► Stopped
//!      │                  ▼
//!      │             Uninstalled
//!      └──────────── exited on its own (Started → Backoff / Stopped)
//! ```
//!
//! `generation` grows by one per start attempt. Messages from tasks spawned for an
//! older generation are stale and ignored.

use tokio_util::sync::CancellationToken;

use crate::core::report::{ManifoldReport, ManifoldState};
use crate::error::WorkerError;
use crate::manifold::Manifold;
use crate::worker::WorkerRef;

pub(crate) enum Phase {
    Stopped,
    Starting { abort: CancellationToken },
    Started { worker: WorkerRef },
    /// Killed; waiting for the exit.
    Stopping,
    Backoff,
    Uninstalled,
}

pub(crate) struct Slot {
    pub(crate) manifold: Manifold,
    pub(crate) phase: Phase,
    pub(crate) generation: u64,
    pub(crate) start_count: u32,
    pub(crate) failures: u32,
    pub(crate) last_error: Option<WorkerError>,
}

impl Slot {
    pub(crate) fn new(manifold: Manifold) -> Self {
        Self {
            manifold,
            phase: Phase::Stopped,
            generation: 0,
            start_count: 0,
            failures: 0,
            last_error: None,
        }
    }

    /// Running worker, if the slot is started.
    pub(crate) fn worker(&self) -> Option<&WorkerRef> {
        match &self.phase {
            Phase::Started { worker } => Some(worker),
            _ => None,
        }
    }

    /// True while a start or a worker belongs to this slot.
    pub(crate) fn is_active(&self) -> bool {
        matches!(
            self.phase,
            Phase::Starting { .. } | Phase::Started { .. } | Phase::Stopping
        )
    }

    pub(crate) fn state(&self) -> ManifoldState {
        match self.phase {
            Phase::Stopped => ManifoldState::Stopped,
            Phase::Starting { .. } => ManifoldState::Starting,
            Phase::Started { .. } => ManifoldState::Started,
            Phase::Stopping => ManifoldState::Stopping,
            Phase::Backoff => ManifoldState::Backoff,
            Phase::Uninstalled => ManifoldState::Uninstalled,
        }
    }

    pub(crate) fn report(&self) -> ManifoldReport {
        ManifoldReport {
            inputs: self.manifold.input_names().map(str::to_string).collect(),
            state: self.state(),
            start_count: self.start_count,
            generation: self.generation,
            failures: self.failures,
            last_error: self.last_error.clone(),
        }
    }
}
