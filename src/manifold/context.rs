//! # Start context.
//!
//! Every start attempt receives a fresh [`Context`]: a snapshot of the manifold's
//! declared inputs taken by the engine loop at the moment the attempt was launched.
//! An input is either fully running (its output can be borrowed) or absent; there
//! is no in-between state.
//!
//! The context also carries an abort token. The engine cancels it when any input
//! changes availability while `start` is still running, or when the engine stops, so
//! slow or blocking starts can give up promptly.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::error::WorkerError;
use crate::manifold::output::Output;
use crate::worker::WorkerRef;

/// Running input as seen by a start attempt.
#[derive(Clone)]
pub(crate) struct Running {
    pub(crate) worker: WorkerRef,
    pub(crate) output: Option<Output>,
}

/// Read-only view handed to a manifold's start function.
#[derive(Clone)]
pub struct Context {
    manifold: Arc<str>,
    inputs: Arc<HashMap<String, Option<Running>>>,
    abort: CancellationToken,
}

impl Context {
    pub(crate) fn new(
        manifold: Arc<str>,
        inputs: HashMap<String, Option<Running>>,
        abort: CancellationToken,
    ) -> Self {
        Self {
            manifold,
            inputs: Arc::new(inputs),
            abort,
        }
    }

    /// Name of the manifold being started.
    pub fn manifold(&self) -> &str {
        &self.manifold
    }

    /// Borrows capability `T` from the running input `input`.
    ///
    /// ### Errors
    /// - [`WorkerError::Undeclared`] if `input` is not one of the manifold's inputs
    /// - [`WorkerError::Missing`] if the input is not running
    /// - [`WorkerError::Incompatible`] if the input does not output a `T`
    pub fn get<T: Clone + Send + Sync + 'static>(&self, input: &str) -> Result<T, WorkerError> {
        let running = self.running(input)?;
        running
            .output
            .as_ref()
            .and_then(|out| out.extract::<T>(&running.worker))
            .ok_or_else(|| WorkerError::Incompatible {
                input: input.to_string(),
                wanted: std::any::type_name::<T>(),
            })
    }

    /// Succeeds if `input` is declared and running, without borrowing anything.
    pub fn require(&self, input: &str) -> Result<(), WorkerError> {
        self.running(input).map(|_| ())
    }

    /// True if `input` is declared and running.
    pub fn is_available(&self, input: &str) -> bool {
        self.require(input).is_ok()
    }

    /// Token cancelled when this start attempt should give up.
    pub fn abort(&self) -> &CancellationToken {
        &self.abort
    }

    /// Resolves when this start attempt should give up.
    pub fn aborted(&self) -> WaitForCancellationFuture<'_> {
        self.abort.cancelled()
    }

    fn running(&self, input: &str) -> Result<&Running, WorkerError> {
        match self.inputs.get(input) {
            None => Err(WorkerError::Undeclared {
                input: input.to_string(),
            }),
            Some(None) => Err(WorkerError::missing(input)),
            Some(Some(running)) => Ok(running),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::context;
    use super::*;
    use crate::worker::value::ValueWorker;

    #[test]
    fn get_distinguishes_undeclared_missing_and_incompatible() {
        let out: Output = Output::of::<ValueWorker<u8>>()
            .provide(|w: &ValueWorker<u8>| *w.value())
            .into();
        let ctx = context(
            "dependent",
            vec![("clock", WorkerRef::new(ValueWorker::new(3u8)), Some(out))],
            &["api-caller"],
        );

        assert_eq!(ctx.manifold(), "dependent");
        assert_eq!(ctx.get::<u8>("clock"), Ok(3));
        assert_eq!(ctx.get::<u8>("api-caller"), Err(WorkerError::missing("api-caller")));
        assert!(matches!(ctx.get::<u8>("agent"), Err(WorkerError::Undeclared { .. })));
        assert!(matches!(ctx.get::<String>("clock"), Err(WorkerError::Incompatible { .. })));
        assert!(ctx.is_available("clock"));
        assert!(!ctx.is_available("api-caller"));
        assert!(!ctx.abort().is_cancelled());
    }
}
