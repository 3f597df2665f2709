//! # Engine report.
//!
//! [`Engine::report`](crate::Engine::report) returns a [`Report`]: a point-in-time
//! snapshot of the engine and every manifold it supervises, taken by the engine loop
//! between two messages.

use std::collections::BTreeMap;

use crate::error::WorkerError;

/// Lifecycle state of the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    /// Built, `start` not called yet.
    Idle,
    /// The loop is running.
    Running,
    /// Shutting down; waiting for workers to exit.
    Stopping,
    /// The loop has finished.
    Stopped,
}

/// Lifecycle state of one manifold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManifoldState {
    /// Not running; waiting for inputs.
    Stopped,
    /// `start` is in flight.
    Starting,
    /// Worker is running; dependents may use its output.
    Started,
    /// Worker was asked to stop and has not exited yet.
    Stopping,
    /// Waiting before the next start attempt.
    Backoff,
    /// Removed for good.
    Uninstalled,
}

impl ManifoldState {
    /// Stable snake_case label.
    pub fn as_label(&self) -> &'static str {
        match self {
            ManifoldState::Stopped => "stopped",
            ManifoldState::Starting => "starting",
            ManifoldState::Started => "started",
            ManifoldState::Stopping => "stopping",
            ManifoldState::Backoff => "backoff",
            ManifoldState::Uninstalled => "uninstalled",
        }
    }
}

/// Snapshot of one manifold.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifoldReport {
    /// Declared inputs, in declaration order.
    pub inputs: Vec<String>,
    pub state: ManifoldState,
    /// Number of `start` invocations so far.
    pub start_count: u32,
    /// Generation of the current or last worker.
    pub generation: u64,
    /// Consecutive failures since the last successful start.
    pub failures: u32,
    /// Most recent start or worker error.
    pub last_error: Option<WorkerError>,
}

/// Snapshot of the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Report {
    pub state: EngineState,
    /// Per-manifold snapshots, by name.
    pub manifolds: BTreeMap<String, ManifoldReport>,
}

impl Report {
    pub(crate) fn empty(state: EngineState) -> Self {
        Self {
            state,
            manifolds: BTreeMap::new(),
        }
    }

    /// Snapshot of manifold `name`, if registered.
    pub fn manifold(&self, name: &str) -> Option<&ManifoldReport> {
        self.manifolds.get(name)
    }

    /// Names of manifolds currently in `state`, sorted.
    pub fn in_state(&self, state: ManifoldState) -> Vec<&str> {
        self.manifolds
            .iter()
            .filter(|(_, m)| m.state == state)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}
