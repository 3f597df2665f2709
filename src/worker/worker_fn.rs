//! # Closure-backed worker (`WorkerFn`)
//!
//! [`WorkerFn::spawn`] runs `f(token)` on its own tokio task. `kill` cancels the
//! token; `wait` resolves with the closure's result. A panic inside the closure is
//! reported as a [`WorkerError::Fail`].
//!
//! ## Example
//! ```rust
//! use depvisor::{Worker, WorkerFn, WorkerError};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let worker = WorkerFn::spawn(|token| async move {
//!     token.cancelled().await;
//!     Ok::<_, WorkerError>(())
//! });
//! worker.kill();
//! assert_eq!(worker.wait().await, Ok(()));
//! # }
//! ```

use std::future::Future;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::WorkerError;
use crate::worker::Worker;

type Outcome = Option<Result<(), WorkerError>>;

/// Worker driven by a spawned future.
#[derive(Debug)]
pub struct WorkerFn {
    token: CancellationToken,
    done: watch::Receiver<Outcome>,
}

impl WorkerFn {
    /// Spawns `f` with a fresh cancellation token.
    pub fn spawn<F, Fut>(f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), WorkerError>> + Send + 'static,
    {
        Self::spawn_with(CancellationToken::new(), f)
    }

    /// Spawns `f` with the given token; cancelling it from outside stops the worker too.
    pub fn spawn_with<F, Fut>(token: CancellationToken, f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), WorkerError>> + Send + 'static,
    {
        let (tx, done) = watch::channel::<Outcome>(None);
        let fut = f(token.clone());
        tokio::spawn(async move {
            let res = fut.await;
            let _ = tx.send(Some(res));
        });
        Self { token, done }
    }

    /// Token observed by the running future.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// True once the future has finished.
    pub fn is_finished(&self) -> bool {
        self.done.borrow().is_some()
    }
}

#[async_trait]
impl Worker for WorkerFn {
    fn kill(&self) {
        self.token.cancel();
    }

    async fn wait(&self) -> Result<(), WorkerError> {
        let mut done = self.done.clone();
        match done.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(Ok(())),
            // Sender dropped without a result: the future panicked.
            Err(_) => Err(WorkerError::fail("worker panicked")),
        }
    }
}
