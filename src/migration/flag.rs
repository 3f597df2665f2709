use std::sync::Arc;

use async_trait::async_trait;

use crate::error::WorkerError;
use crate::flag::{self, FlagConfig, FlagFacade};
use crate::manifold::Manifold;
use crate::migration::{MigrationFacade, NewMigrationFacade, Phase, is_inactive};
use crate::watcher::Watcher;

/// Reads a migration facade as a flag source.
struct PhaseSource<M>(M);

#[async_trait]
impl<M: MigrationFacade> FlagFacade for PhaseSource<M> {
    type State = Phase;

    async fn state(&self) -> Result<Phase, WorkerError> {
        self.0.phase().await
    }

    async fn watch(&self) -> Result<Box<dyn Watcher>, WorkerError> {
        self.0.watch().await
    }
}

/// Flag manifold set while no migration is underway.
pub fn inactive_flag<C, M>(
    name: impl Into<String>,
    api_caller: impl Into<String>,
    new_facade: NewMigrationFacade<C, M>,
) -> Manifold
where
    C: Clone + Send + Sync + 'static,
    M: MigrationFacade,
{
    flag::manifold(
        name,
        FlagConfig::<C, PhaseSource<M>> {
            api_caller: api_caller.into(),
            new_facade: Arc::new(move |caller| new_facade(caller).map(PhaseSource)),
            check: Arc::new(|phase: &Phase| is_inactive(*phase)),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flag::FlagRef;
    use crate::manifold::testing::context;
    use crate::migration::testing::Status;
    use crate::worker::value;

    fn start(status: &Status) -> (Manifold, crate::manifold::Context) {
        let status = status.clone();
        let m = inactive_flag::<(), Status>(
            "migration-inactive-flag",
            "api-caller",
            Arc::new(move |()| Ok(status.clone())),
        );
        let caller = value::manifold("api-caller", ());
        let ctx = context(
            "migration-inactive-flag",
            vec![(
                "api-caller",
                crate::WorkerRef::new(value::ValueWorker::new(())),
                caller.output().cloned(),
            )],
            &[],
        );
        (m, ctx)
    }

    #[tokio::test]
    async fn starts_once_migration_ends() {
        let status = Status::new(Phase::Import);
        let (m, ctx) = start(&status);
        let pending = tokio::spawn({
            let m = m.clone();
            async move { m.start(ctx).await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!pending.is_finished());

        status.set(Phase::Validation);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!pending.is_finished());

        status.set(Phase::Done);
        let worker = pending.await.unwrap().unwrap();
        let flag = m.output().unwrap().extract::<FlagRef>(&worker).unwrap();
        assert!(flag.check());
        worker.kill();
        assert_eq!(worker.wait().await, Ok(()));
    }

    #[tokio::test]
    async fn exits_when_migration_begins() {
        let status = Status::new(Phase::Done);
        let (m, ctx) = start(&status);
        let worker = m.start(ctx).await.unwrap();
        let flag = m.output().unwrap().extract::<FlagRef>(&worker).unwrap();
        assert!(flag.check());

        status.set(Phase::None);
        tokio::task::yield_now().await;
        assert!(flag.check());

        status.set(Phase::Quiesce);
        assert_eq!(worker.wait().await, Ok(()));
        assert!(!flag.check());
    }
}
