//! # Value workers.
//!
//! Some manifolds exist only to hand a value to their dependents: the agent
//! configuration, a clock, an already-open connection. A [`ValueWorker`] holds the
//! value and does nothing else until it is killed.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::WorkerError;
use crate::manifold::{Manifold, Output};
use crate::worker::{Worker, WorkerRef};

/// Worker that exposes `value` until stopped.
#[derive(Debug)]
pub struct ValueWorker<T> {
    value: T,
    token: CancellationToken,
}

impl<T: Clone + Send + Sync + 'static> ValueWorker<T> {
    /// Wraps `value`.
    pub fn new(value: T) -> Self {
        Self {
            value,
            token: CancellationToken::new(),
        }
    }

    /// Borrows the held value.
    pub fn value(&self) -> &T {
        &self.value
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Worker for ValueWorker<T> {
    fn kill(&self) {
        self.token.cancel();
    }

    async fn wait(&self) -> Result<(), WorkerError> {
        self.token.cancelled().await;
        Ok(())
    }
}

/// Manifold without inputs whose output is a clone of `value`.
///
/// ```rust
/// use depvisor::value;
///
/// let clock = value::manifold("clock", std::time::Duration::from_secs(1));
/// assert_eq!(clock.name(), "clock");
/// assert!(clock.inputs().is_empty());
/// ```
pub fn manifold<T: Clone + Send + Sync + 'static>(name: impl Into<String>, value: T) -> Manifold {
    Manifold::new(name, move |_ctx| {
        let value = value.clone();
        async move { Ok(WorkerRef::new(ValueWorker::new(value))) }
    })
    .with_output(Output::of::<ValueWorker<T>>().provide(|w: &ValueWorker<T>| w.value.clone()))
}
