//! # Worker abstraction.
//!
//! A [`Worker`] is anything that runs until asked to stop or until it fails. The engine
//! only ever talks to it through two calls:
//!
//! - [`Worker::kill`] requests a stop without blocking;
//! - [`Worker::wait`] resolves once stopped, with the terminal error (if any).
//!
//! [`WorkerRef`] is the owned, type-erased handle a start function hands to the
//! engine. It remembers the concrete worker type so a manifold's
//! [`Output`](crate::Output) can be checked against it and can borrow typed state
//! from it.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::WorkerError;

/// # Stoppable unit of work.
///
/// `wait` may be called more than once and from several tasks; every call resolves
/// to the same result.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use tokio_util::sync::CancellationToken;
/// use depvisor::{Worker, WorkerError};
///
/// struct Idle(CancellationToken);
///
/// #[async_trait]
/// impl Worker for Idle {
///     fn kill(&self) {
///         self.0.cancel();
///     }
///
///     async fn wait(&self) -> Result<(), WorkerError> {
///         self.0.cancelled().await;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    /// Requests the worker to stop. Must not block.
    fn kill(&self);

    /// Waits until the worker stopped and returns its terminal result.
    async fn wait(&self) -> Result<(), WorkerError>;
}

/// Shared, type-erased handle to a running worker.
#[derive(Clone)]
pub struct WorkerRef {
    worker: Arc<dyn Worker>,
    any: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl WorkerRef {
    /// Wraps a concrete worker.
    pub fn new<W: Worker>(worker: W) -> Self {
        Self::from_arc(Arc::new(worker))
    }

    /// Wraps a worker that is already shared.
    pub fn from_arc<W: Worker>(worker: Arc<W>) -> Self {
        Self {
            any: worker.clone(),
            worker,
            type_name: std::any::type_name::<W>(),
        }
    }

    /// Borrows the concrete worker if it is a `W`.
    pub fn downcast_ref<W: Worker>(&self) -> Option<&W> {
        self.any.downcast_ref::<W>()
    }

    /// `TypeId` of the concrete worker.
    pub fn worker_type_id(&self) -> TypeId {
        (*self.any).type_id()
    }

    /// Type name of the concrete worker.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// See [`Worker::kill`].
    pub fn kill(&self) {
        self.worker.kill();
    }

    /// See [`Worker::wait`].
    pub async fn wait(&self) -> Result<(), WorkerError> {
        self.worker.wait().await
    }
}

impl fmt::Debug for WorkerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerRef")
            .field("type", &self.type_name)
            .finish()
    }
}
