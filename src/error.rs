//! Error types used by the depvisor engine, its workers and primitives.
//!
//! - [`EngineError`]: errors raised by the engine itself (bad wiring, broken bookkeeping,
//!   slow shutdown). These are the only errors that ever leave [`Engine::wait`](crate::Engine::wait).
//! - [`WorkerError`]: errors raised by start functions and running workers. They are
//!   contained at the failing slot; the engine restarts the slot.
//! - [`FortressError`]: contention errors returned synchronously by a [`Fortress`](crate::Fortress).
//!
//! All types provide `as_label` for logs/metrics.

use std::any::Any;
use std::time::Duration;

use thiserror::Error;

/// # Errors produced by the engine.
///
/// Configuration errors are detected by [`Engine::start`](crate::Engine::start) before
/// any worker runs; they are never retried.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Two manifolds were registered under the same name.
    #[error("duplicate manifold {name:?}")]
    DuplicateManifold {
        /// The repeated name.
        name: String,
    },

    /// A manifold declares a required input that no manifold provides.
    #[error("manifold {manifold:?} depends on unknown input {input:?}")]
    UnknownInput {
        /// Dependent manifold.
        manifold: String,
        /// Missing input name.
        input: String,
    },

    /// The input graph contains a cycle (a self-dependency is a cycle of one).
    #[error("dependency cycle: {}", path.join(" -> "))]
    Cycle {
        /// Names along the cycle, first name repeated at the end.
        path: Vec<String>,
    },

    /// An input expects a capability its target manifold does not output.
    #[error("manifold {manifold:?} expects {expected} from input {input:?}, which does not provide it")]
    IncompatibleInput {
        /// Dependent manifold.
        manifold: String,
        /// Input name.
        input: String,
        /// Expected capability type name.
        expected: &'static str,
    },

    /// `start` was called on an engine that already has a graph.
    #[error("engine already started")]
    AlreadyStarted,

    /// The engine's own bookkeeping is broken.
    #[error("engine invariant violated: {detail}")]
    Internal {
        /// What went wrong.
        detail: String,
    },

    /// Shutdown grace period was exceeded; some workers never exited.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Manifolds whose workers did not stop in time.
        stuck: Vec<String>,
    },
}

impl EngineError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use depvisor::EngineError;
    ///
    /// let err = EngineError::DuplicateManifold { name: "clock".into() };
    /// assert_eq!(err.as_label(), "engine_duplicate_manifold");
    /// assert!(err.is_config());
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            EngineError::DuplicateManifold { .. } => "engine_duplicate_manifold",
            EngineError::UnknownInput { .. } => "engine_unknown_input",
            EngineError::Cycle { .. } => "engine_cycle",
            EngineError::IncompatibleInput { .. } => "engine_incompatible_input",
            EngineError::AlreadyStarted => "engine_already_started",
            EngineError::Internal { .. } => "engine_internal",
            EngineError::GraceExceeded { .. } => "engine_grace_exceeded",
        }
    }

    /// True for errors caused by the registered manifold graph.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            EngineError::DuplicateManifold { .. }
                | EngineError::UnknownInput { .. }
                | EngineError::Cycle { .. }
                | EngineError::IncompatibleInput { .. }
        )
    }
}

/// # Errors produced by the fortress.
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FortressError {
    /// A lockdown was requested or completed; the visit was not entered.
    #[error("fortress locked down")]
    LockedDown,

    /// Another guard already holds the lockdown intent.
    #[error("fortress lockdown already in progress")]
    LockdownInProgress,

    /// The lockdown wait was aborted before the visitors drained.
    #[error("fortress operation aborted")]
    Aborted,

    /// The fortress worker has been stopped.
    #[error("fortress shut down")]
    Shutdown,
}

impl FortressError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            FortressError::LockedDown => "fortress_locked_down",
            FortressError::LockdownInProgress => "fortress_lockdown_in_progress",
            FortressError::Aborted => "fortress_aborted",
            FortressError::Shutdown => "fortress_shutdown",
        }
    }
}

/// # Errors produced by start functions and workers.
///
/// Besides plain failures, a few variants are instructions to the engine:
///
/// | variant      | engine reaction                                          |
/// |--------------|----------------------------------------------------------|
/// | `Missing`    | wait for an input to change, no backoff                  |
/// | `Bounce`     | restart right away, no backoff                           |
/// | `Uninstall`  | never start this manifold again                          |
/// | anything else| record, back off, retry                                  |
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// A declared input is not running (or the housing flag it names is false).
    #[error("input {input:?} not available")]
    Missing {
        /// The unavailable input.
        input: String,
    },

    /// The worker asks to be restarted immediately.
    #[error("restart requested")]
    Bounce,

    /// The worker asks to be removed from the engine for good.
    #[error("uninstall requested")]
    Uninstall,

    /// `Context::get` asked for an input the manifold never declared.
    #[error("input {input:?} was not declared")]
    Undeclared {
        /// The requested name.
        input: String,
    },

    /// The input is running but does not output the requested capability.
    #[error("input {input:?} does not provide {wanted}")]
    Incompatible {
        /// The requested input.
        input: String,
        /// Requested capability type name.
        wanted: &'static str,
    },

    /// Fortress contention or shutdown.
    #[error(transparent)]
    Fortress(#[from] FortressError),

    /// Worker or start function failed; retried with backoff.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Worker stopped because it was asked to.
    #[error("worker cancelled")]
    Canceled,
}

impl WorkerError {
    /// Convenience constructor for [`WorkerError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        WorkerError::Fail {
            error: error.into(),
        }
    }

    /// Convenience constructor for [`WorkerError::Missing`].
    pub fn missing(input: impl Into<String>) -> Self {
        WorkerError::Missing {
            input: input.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use depvisor::{FortressError, WorkerError};
    ///
    /// assert_eq!(WorkerError::Bounce.as_label(), "worker_bounce");
    /// let err: WorkerError = FortressError::LockedDown.into();
    /// assert_eq!(err.as_label(), "fortress_locked_down");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerError::Missing { .. } => "worker_missing_input",
            WorkerError::Bounce => "worker_bounce",
            WorkerError::Uninstall => "worker_uninstall",
            WorkerError::Undeclared { .. } => "worker_undeclared_input",
            WorkerError::Incompatible { .. } => "worker_incompatible_input",
            WorkerError::Fortress(e) => e.as_label(),
            WorkerError::Fail { .. } => "worker_failed",
            WorkerError::Canceled => "worker_canceled",
        }
    }

    /// True when the result should be retried with backoff.
    ///
    /// `Missing`, `Bounce`, `Uninstall` and `Canceled` are handled without backoff.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            WorkerError::Missing { .. }
                | WorkerError::Bounce
                | WorkerError::Uninstall
                | WorkerError::Canceled
        )
    }
}

/// Extracts a printable message from a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_path() {
        let err = EngineError::Cycle {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle: a -> b -> a");
        assert!(err.is_config());
        assert!(!EngineError::AlreadyStarted.is_config());
    }

    #[test]
    fn sentinels_skip_backoff() {
        assert!(!WorkerError::missing("api").is_retryable());
        assert!(!WorkerError::Bounce.is_retryable());
        assert!(!WorkerError::Uninstall.is_retryable());
        assert!(WorkerError::fail("boom").is_retryable());
        assert!(WorkerError::from(FortressError::LockedDown).is_retryable());
    }
}
