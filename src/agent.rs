//! # Agent wiring.
//!
//! [`manifolds`] assembles the manifolds a migration-aware agent runs, around the
//! caller's own business workers:
//!
//! ```text
//!   agent ──► api-caller ──► migration-inactive-flag ─┐
//!   clock       │                                     │ if not migrating
//!               └──────────► migration-minion         ▼
//!   upgrade-steps-gate ──► upgrade-steps-flag    charm-dir, workers...
//!                                │ if fully upgraded   ▲ occupy
//!                                ▼                     │
//!                         migration-fortress ──────────┘
//! ```
//!
//! Every name comes from [`Names`]; the defaults match the usual agent layout.

use std::sync::Arc;
use std::time::SystemTime;

use futures::future::BoxFuture;

use crate::error::WorkerError;
use crate::fortress;
use crate::gate::{self, Lock};
use crate::housing::Housing;
use crate::manifold::{Manifold, Output};
use crate::migration::{self, MigrationFacade, MinionConfig, NewMigrationFacade};
use crate::worker::WorkerRef;
use crate::worker::value::{self, ValueWorker};

/// Manifold names used by [`manifolds`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Names {
    pub agent: String,
    pub api_caller: String,
    pub clock: String,
    pub upgrade_steps_gate: String,
    pub upgrade_steps_flag: String,
    pub migration_fortress: String,
    pub migration_inactive_flag: String,
    pub migration_minion: String,
    pub charm_dir: String,
}

impl Default for Names {
    fn default() -> Self {
        Self {
            agent: "agent".into(),
            api_caller: "api-caller".into(),
            clock: "clock".into(),
            upgrade_steps_gate: "upgrade-steps-gate".into(),
            upgrade_steps_flag: "upgrade-steps-flag".into(),
            migration_fortress: "migration-fortress".into(),
            migration_inactive_flag: "migration-inactive-flag".into(),
            migration_minion: "migration-minion".into(),
            charm_dir: "charm-dir".into(),
        }
    }
}

impl Names {
    /// Workers housed this way run only once upgrade steps completed.
    pub fn if_fully_upgraded(&self) -> Housing {
        Housing::new().with_flag(self.upgrade_steps_flag.clone())
    }

    /// Workers housed this way stop during a migration and hold it off while running.
    pub fn if_not_migrating(&self) -> Housing {
        Housing::new()
            .with_flag(self.migration_inactive_flag.clone())
            .occupying(self.migration_fortress.clone())
    }
}

/// Time source shared through the clock manifold.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> SystemTime;
}

/// Capability of the clock manifold.
pub type ClockRef = Arc<dyn Clock>;

/// The system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct WallClock;

impl Clock for WallClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Opens an API connection for the agent.
pub type OpenApi<A, C> = Arc<dyn Fn(A) -> BoxFuture<'static, Result<C, WorkerError>> + Send + Sync>;

/// Inputs of [`manifolds`].
///
/// `A` is the agent handle, `C` the API caller, `M` the migration facade.
pub struct ManifoldsConfig<A, C, M> {
    pub names: Names,
    pub agent: A,
    pub clock: ClockRef,
    /// Unlocked once upgrade steps have completed.
    pub upgrade_steps_lock: Lock,
    pub open_api: OpenApi<A, C>,
    pub new_migration_facade: NewMigrationFacade<C, M>,
    /// Business manifolds; each is housed "if not migrating".
    pub workers: Vec<Manifold>,
}

/// Builds the agent's manifolds.
pub fn manifolds<A, C, M>(config: ManifoldsConfig<A, C, M>) -> Vec<Manifold>
where
    A: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
    M: MigrationFacade,
{
    let ManifoldsConfig {
        names,
        agent,
        clock,
        upgrade_steps_lock,
        open_api,
        new_migration_facade,
        workers,
    } = config;
    let if_fully_upgraded = names.if_fully_upgraded();
    let if_not_migrating = names.if_not_migrating();

    let mut all = vec![
        value::manifold(names.agent.clone(), agent),
        api_caller::<A, C>(&names.api_caller, &names.agent, open_api),
        value::manifold(names.clock.clone(), clock),
        gate::manifold(names.upgrade_steps_gate.clone(), upgrade_steps_lock),
        gate::flag_manifold(
            names.upgrade_steps_flag.clone(),
            names.upgrade_steps_gate.clone(),
        ),
        if_fully_upgraded.decorate(fortress::manifold(names.migration_fortress.clone())),
        migration::inactive_flag(
            names.migration_inactive_flag.clone(),
            names.api_caller.clone(),
            Arc::clone(&new_migration_facade),
        ),
        migration::minion(
            names.migration_minion.clone(),
            MinionConfig {
                api_caller: names.api_caller.clone(),
                fortress: names.migration_fortress.clone(),
                new_facade: new_migration_facade,
            },
        ),
        if_not_migrating.decorate(fortress::manifold(names.charm_dir.clone())),
    ];
    all.extend(workers.into_iter().map(|m| if_not_migrating.decorate(m)));
    all
}

/// API caller manifold: opens a connection with the agent value.
fn api_caller<A, C>(name: &str, agent: &str, open: OpenApi<A, C>) -> Manifold
where
    A: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    let agent_input = agent.to_string();
    Manifold::new(name, move |ctx| {
        let open = Arc::clone(&open);
        let agent_input = agent_input.clone();
        async move {
            let agent: A = ctx.get(&agent_input)?;
            let caller = tokio::select! {
                opened = open(agent) => opened?,
                _ = ctx.aborted() => return Err(WorkerError::Canceled),
            };
            Ok(WorkerRef::new(ValueWorker::new(caller)))
        }
    })
    .with_typed_input::<A>(agent)
    .with_output(Output::of::<ValueWorker<C>>().provide(|w: &ValueWorker<C>| w.value().clone()))
}
