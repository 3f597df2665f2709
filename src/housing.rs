//! # Housing: run a manifold behind flags and inside a fortress.
//!
//! [`Housing::decorate`] wraps a manifold so that:
//!
//! - every flag in `flags` becomes an input expecting a [`FlagRef`]; start fails with
//!   [`WorkerError::Missing`] unless every flag is set;
//! - if `occupy` names a fortress, the inner start and the whole life of the worker
//!   happen inside one visit of that fortress (its input must provide a [`Guest`]).
//!
//! When a lockdown is requested the housed worker is killed and, once it has fully
//! exited, leaves the fortress and reports [`FortressError::LockedDown`]. The engine
//! treats that like any other worker failure.
//!
//! ```text
//!   start ──► flags set? ── no ──► Err(Missing)
//!               │ yes
//!               ▼
//!          guest.enter() ── locked down ──► Err(LockedDown)
//!               │
//!               ▼
//!          inner start ─────────────┐
//!               │ lockdown requested └──► Err(LockedDown)
//!               ▼
//!          Housed { inner, visit } ──► lockdown requested ──► kill inner, wait, leave
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{FortressError, WorkerError};
use crate::flag::FlagRef;
use crate::fortress::{Guest, Visit};
use crate::manifold::{Context, Input, Manifold, StartFuture};
use crate::worker::{Worker, WorkerFn, WorkerRef};

/// Flags and fortress a manifold runs behind.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Housing {
    /// Flag manifolds that must all be set.
    pub flags: Vec<String>,
    /// Fortress manifold to occupy for the worker's lifetime.
    pub occupy: Option<String>,
}

impl Housing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.push(flag.into());
        self
    }

    pub fn occupying(mut self, fortress: impl Into<String>) -> Self {
        self.occupy = Some(fortress.into());
        self
    }

    /// Returns `manifold` wrapped in this housing.
    pub fn decorate(&self, mut manifold: Manifold) -> Manifold {
        for flag in &self.flags {
            manifold.add_input(Input::required(flag.clone()).expecting::<FlagRef>());
        }
        if let Some(fortress) = &self.occupy {
            manifold.add_input(Input::required(fortress.clone()).expecting::<Guest>());
            manifold.output = manifold
                .output
                .take()
                .map(|output| output.wrapped::<Housed>(Housed::inner));
        }

        let inner = Arc::clone(&manifold.start);
        let flags = self.flags.clone();
        let occupy = self.occupy.clone();
        manifold.start = Arc::new(move |ctx: Context| -> StartFuture {
            let inner = Arc::clone(&inner);
            let flags = flags.clone();
            let occupy = occupy.clone();
            Box::pin(async move {
                for flag in &flags {
                    let value: FlagRef = ctx.get(flag)?;
                    if !value.check() {
                        return Err(WorkerError::missing(flag.clone()));
                    }
                }

                let Some(fortress) = occupy else {
                    return inner(ctx).await;
                };
                let guest: Guest = ctx.get(&fortress)?;
                let visit = guest.enter()?;
                let worker = tokio::select! {
                    started = inner(ctx) => started?,
                    _ = visit.lockdown_requested() => {
                        return Err(FortressError::LockedDown.into());
                    }
                };
                Ok(WorkerRef::new(Housed::spawn(worker, visit)))
            })
        });
        manifold
    }
}

/// Worker running inside a fortress visit.
pub struct Housed {
    inner: WorkerRef,
    run: WorkerFn,
}

impl Housed {
    /// The decorated manifold's own worker.
    pub fn inner(&self) -> &WorkerRef {
        &self.inner
    }

    fn spawn(inner: WorkerRef, visit: Visit) -> Self {
        let worker = inner.clone();
        let run = WorkerFn::spawn(move |token| async move {
            let result = tokio::select! {
                exited = worker.wait() => exited,
                _ = visit.lockdown_requested() => {
                    worker.kill();
                    let _ = worker.wait().await;
                    Err(FortressError::LockedDown.into())
                }
                _ = token.cancelled() => {
                    worker.kill();
                    worker.wait().await
                }
            };
            drop(visit);
            result
        });
        Self { inner, run }
    }
}

#[async_trait]
impl Worker for Housed {
    fn kill(&self) {
        self.run.kill();
    }

    async fn wait(&self) -> Result<(), WorkerError> {
        self.run.wait().await
    }
}
