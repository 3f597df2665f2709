//! # Flag: a boolean condition as a worker.
//!
//! A flag worker exists only while its condition holds. Its exit means "the condition
//! changed": the engine tears down every dependent and restarts the flag, which then
//! re-evaluates the condition from scratch.
//!
//! While the condition is false the flag's start stays pending on the watcher, so
//! its dependents are simply not startable; nothing is retried and nothing counts as
//! a failure. The start resolves on the first notification that makes it true.
//!
//! ```text
//! start:  caller = ctx.get(api_caller)
//!         facade = new_facade(caller)
//!         check(facade.state())? ── false ──► watcher = facade.watch()
//!              │ true                         loop { change ──► check ── true ──► break }
//!              ▼                                     aborted ──► Err(Canceled)
//!         watcher = facade.watch()      (pull, then push)
//! worker: loop { change ──► check(facade.state()) ── false ──► exit Ok }
//!                killed ──► exit Ok
//!                watcher closed ──► exit with watcher.err()
//! ```
//!
//! Dependents borrow the flag as a [`FlagRef`]; a [`Housing`](crate::Housing) refuses
//! to start its manifold unless every listed flag is set.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::error::WorkerError;
use crate::manifold::{Context, Manifold, Output};
use crate::watcher::Watcher;
use crate::worker::{Worker, WorkerFn, WorkerRef};

/// Boolean condition dependents can check.
pub trait Flag: Send + Sync + 'static {
    fn check(&self) -> bool;
}

/// Capability exposed by flag manifolds.
pub type FlagRef = Arc<dyn Flag>;

impl Flag for AtomicBool {
    fn check(&self) -> bool {
        self.load(Ordering::Acquire)
    }
}

/// Source of the state a flag is derived from.
#[async_trait]
pub trait FlagFacade: Send + Sync + 'static {
    /// State the predicate runs on.
    type State: Send + Sync + 'static;

    /// Reads the current state.
    async fn state(&self) -> Result<Self::State, WorkerError>;

    /// Watches the state; see [`Watcher`] for the initial-notification contract.
    async fn watch(&self) -> Result<Box<dyn Watcher>, WorkerError>;
}

/// Builds a facade from the API caller borrowed from the flag's input.
pub type NewFacade<C, F> = Arc<dyn Fn(C) -> Result<F, WorkerError> + Send + Sync>;

/// Predicate over the facade state.
pub type Check<S> = Arc<dyn Fn(&S) -> bool + Send + Sync>;

/// Wiring of a flag manifold.
///
/// `C` is the API caller capability the input named `api_caller` provides.
pub struct FlagConfig<C, F: FlagFacade> {
    pub api_caller: String,
    pub new_facade: NewFacade<C, F>,
    pub check: Check<F::State>,
}

impl<C, F: FlagFacade> Clone for FlagConfig<C, F> {
    fn clone(&self) -> Self {
        Self {
            api_caller: self.api_caller.clone(),
            new_facade: Arc::clone(&self.new_facade),
            check: Arc::clone(&self.check),
        }
    }
}

/// Running flag; its condition held when it started.
pub struct FlagWorker {
    set: Arc<AtomicBool>,
    inner: WorkerFn,
}

impl FlagWorker {
    /// Current value; drops to false just before the worker exits on a change.
    pub fn flag(&self) -> FlagRef {
        self.set.clone()
    }
}

#[async_trait]
impl Worker for FlagWorker {
    fn kill(&self) {
        self.inner.kill();
    }

    async fn wait(&self) -> Result<(), WorkerError> {
        self.inner.wait().await
    }
}

/// Flag manifold named `name`.
pub fn manifold<C, F>(name: impl Into<String>, config: FlagConfig<C, F>) -> Manifold
where
    C: Clone + Send + Sync + 'static,
    F: FlagFacade,
{
    let api_caller = config.api_caller.clone();
    Manifold::new(name, move |ctx| {
        let config = config.clone();
        async move {
            let caller: C = ctx.get(&config.api_caller)?;
            let facade = (config.new_facade)(caller)?;
            let state = facade.state().await?;
            let mut watcher = facade.watch().await?;
            if !(config.check)(&state) {
                if let Err(e) = until_set(&ctx, &facade, &config.check, watcher.as_mut()).await {
                    let _ = watcher.stop();
                    return Err(e);
                }
            }
            Ok(WorkerRef::new(spawn(facade, config.check, watcher)))
        }
    })
    .with_typed_input::<C>(api_caller)
    .with_output(Output::of::<FlagWorker>().provide(FlagWorker::flag))
}

/// Waits for a change that makes the condition hold.
async fn until_set<F: FlagFacade>(
    ctx: &Context,
    facade: &F,
    check: &Check<F::State>,
    watcher: &mut dyn Watcher,
) -> Result<(), WorkerError> {
    loop {
        tokio::select! {
            _ = ctx.aborted() => return Err(WorkerError::Canceled),
            change = watcher.changes().recv() => {
                if change.is_none() {
                    return Err(watcher
                        .err()
                        .unwrap_or_else(|| WorkerError::fail("flag watcher closed")));
                }
                if check(&facade.state().await?) {
                    return Ok(());
                }
            }
        }
    }
}

fn spawn<F: FlagFacade>(
    facade: F,
    check: Check<F::State>,
    mut watcher: Box<dyn Watcher>,
) -> FlagWorker {
    let set = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&set);
    let inner = WorkerFn::spawn(move |token| async move {
        let result = loop {
            tokio::select! {
                _ = token.cancelled() => break Ok(()),
                change = watcher.changes().recv() => match change {
                    Some(()) => match facade.state().await {
                        Ok(state) if check(&state) => continue,
                        Ok(_) => {
                            flag.store(false, Ordering::Release);
                            break Ok(());
                        }
                        Err(e) => break Err(e),
                    },
                    None => {
                        break Err(watcher
                            .err()
                            .unwrap_or_else(|| WorkerError::fail("flag watcher closed")));
                    }
                },
            }
        };
        let stopped = watcher.stop();
        result.and(stopped)
    });
    FlagWorker { set, inner }
}


#[cfg(test)]
mod tests {
    use super::testing::{Switch, switch_flag};
    use super::*;
    use crate::manifold::testing::context;
    use crate::worker::value;

    fn api_caller() -> (WorkerRef, Option<Output>) {
        let m = value::manifold("api-caller", ());
        (
            WorkerRef::new(value::ValueWorker::new(())),
            m.output().cloned(),
        )
    }

    #[tokio::test]
    async fn false_at_start_waits_for_set() {
        let switch = Switch::new(false);
        let flag = switch_flag("flag", "api-caller", switch.clone());
        let (worker, output) = api_caller();
        let ctx = context("flag", vec![("api-caller", worker, output)], &[]);

        let start = tokio::spawn({
            let flag = flag.clone();
            async move { flag.start(ctx).await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!start.is_finished());

        // Still false: keeps waiting.
        switch.set(false);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!start.is_finished());

        switch.set(true);
        let worker = start.await.unwrap().unwrap();
        let value = flag.output().unwrap().extract::<FlagRef>(&worker).unwrap();
        assert!(value.check());
        worker.kill();
        assert_eq!(worker.wait().await, Ok(()));
    }

    #[tokio::test]
    async fn pending_start_gives_up_on_abort() {
        let flag = switch_flag("flag", "api-caller", Switch::new(false));
        let (worker, output) = api_caller();
        let ctx = context("flag", vec![("api-caller", worker, output)], &[]);
        let abort = ctx.abort().clone();

        let start = tokio::spawn(async move { flag.start(ctx).await });
        tokio::task::yield_now().await;
        abort.cancel();
        assert_eq!(start.await.unwrap().unwrap_err(), WorkerError::Canceled);
    }

    #[tokio::test]
    async fn missing_api_caller_is_missing() {
        let flag = switch_flag("flag", "api-caller", Switch::new(true));
        let ctx = context("flag", vec![], &["api-caller"]);
        assert_eq!(
            flag.start(ctx).await.unwrap_err(),
            WorkerError::missing("api-caller")
        );
    }

    #[tokio::test]
    async fn exits_when_condition_flips() {
        let switch = Switch::new(true);
        let flag = switch_flag("flag", "api-caller", switch.clone());
        let (worker, output) = api_caller();
        let ctx = context("flag", vec![("api-caller", worker, output)], &[]);

        let worker = flag.start(ctx).await.unwrap();
        let value = flag.output().unwrap().extract::<FlagRef>(&worker).unwrap();
        assert!(value.check());

        // A notification without a change keeps it running.
        switch.set(true);
        tokio::task::yield_now().await;
        assert!(value.check());

        switch.set(false);
        assert_eq!(worker.wait().await, Ok(()));
        assert!(!value.check());
    }

    /// Watcher whose transport fails to release.
    struct Stuck {
        rx: tokio::sync::mpsc::Receiver<()>,
        _tx: tokio::sync::mpsc::Sender<()>,
    }

    impl Watcher for Stuck {
        fn changes(&mut self) -> &mut tokio::sync::mpsc::Receiver<()> {
            &mut self.rx
        }

        fn stop(&mut self) -> Result<(), WorkerError> {
            Err(WorkerError::fail("stop: connection reset"))
        }

        fn err(&self) -> Option<WorkerError> {
            None
        }
    }

    #[tokio::test]
    async fn stop_error_becomes_the_exit_error() {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let worker = spawn(
            Switch::new(true),
            Arc::new(|on: &bool| *on),
            Box::new(Stuck { rx, _tx: tx }),
        );
        worker.kill();
        assert_eq!(
            worker.wait().await,
            Err(WorkerError::fail("stop: connection reset"))
        );
    }

    #[tokio::test]
    async fn kill_stops_watching() {
        let flag = switch_flag("flag", "api-caller", Switch::new(true));
        let (worker, output) = api_caller();
        let ctx = context("flag", vec![("api-caller", worker, output)], &[]);

        let worker = flag.start(ctx).await.unwrap();
        worker.kill();
        assert_eq!(worker.wait().await, Ok(()));
    }
}
