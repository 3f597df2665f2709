use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{FortressError, WorkerError};
use crate::fortress::Guard;
use crate::manifold::Manifold;
use crate::migration::{MigrationFacade, NewMigrationFacade, Phase};
use crate::watcher::Watcher;
use crate::worker::{Worker, WorkerFn, WorkerRef};

/// Wiring of the migration minion.
pub struct MinionConfig<C, M> {
    /// Input providing the API caller `C`.
    pub api_caller: String,
    /// Input providing the fortress [`Guard`].
    pub fortress: String,
    pub new_facade: NewMigrationFacade<C, M>,
}

impl<C, M> Clone for MinionConfig<C, M> {
    fn clone(&self) -> Self {
        Self {
            api_caller: self.api_caller.clone(),
            fortress: self.fortress.clone(),
            new_facade: Arc::clone(&self.new_facade),
        }
    }
}

/// Worker following the migration phase.
pub struct Minion {
    inner: WorkerFn,
}

#[async_trait]
impl Worker for Minion {
    fn kill(&self) {
        self.inner.kill();
    }

    async fn wait(&self) -> Result<(), WorkerError> {
        self.inner.wait().await
    }
}

/// Migration minion manifold.
///
/// While a migration runs the minion holds the fortress locked down; the first time
/// it sees each active phase (after the lockdown completed) it reports success for
/// it. A terminal phase, or no migration at all, unlocks the fortress.
pub fn minion<C, M>(name: impl Into<String>, config: MinionConfig<C, M>) -> Manifold
where
    C: Clone + Send + Sync + 'static,
    M: MigrationFacade,
{
    let (api_caller, fortress) = (config.api_caller.clone(), config.fortress.clone());
    Manifold::new(name, move |ctx| {
        let config = config.clone();
        async move {
            let caller: C = ctx.get(&config.api_caller)?;
            let guard: Guard = ctx.get(&config.fortress)?;
            let facade = (config.new_facade)(caller)?;
            let watcher = facade.watch().await?;
            let inner = WorkerFn::spawn(move |token| run(facade, guard, watcher, token));
            Ok(WorkerRef::new(Minion { inner }))
        }
    })
    .with_typed_input::<C>(api_caller)
    .with_typed_input::<Guard>(fortress)
}

async fn run<M: MigrationFacade>(
    facade: M,
    guard: Guard,
    mut watcher: Box<dyn Watcher>,
    token: CancellationToken,
) -> Result<(), WorkerError> {
    let mut reported = None;
    let result = loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break Ok(()),
            change = watcher.changes().recv() => {
                if change.is_none() {
                    break Err(watcher
                        .err()
                        .unwrap_or_else(|| WorkerError::fail("migration watcher closed")));
                }
                if let Err(e) = step(&facade, &guard, &token, &mut reported).await {
                    break Err(e);
                }
            }
        }
    };
    let stopped = watcher.stop();
    result.and(stopped)
}

async fn step<M: MigrationFacade>(
    facade: &M,
    guard: &Guard,
    token: &CancellationToken,
    reported: &mut Option<Phase>,
) -> Result<(), WorkerError> {
    let phase = facade.phase().await?;
    if !phase.is_running() {
        guard.unlock();
        *reported = None;
        return Ok(());
    }

    if !guard.is_locked_down() {
        match guard.lockdown(token).await {
            Ok(()) => {}
            // Killed while draining; the loop sees the token next.
            Err(FortressError::Aborted) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }
    if *reported != Some(phase) {
        facade.report(phase, true).await?;
        *reported = Some(phase);
    }
    Ok(())
}
