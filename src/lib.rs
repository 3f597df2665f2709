//! # depvisor
//!
//! **depvisor** runs a set of long-lived workers whose lifetimes follow their
//! dependencies. Each component is described by a [`Manifold`]: a name, the names of
//! the manifolds it needs (its inputs), and a start function. The [`Engine`] starts a
//! manifold once all of its inputs are running, stops it as soon as one of them goes
//! away, and restarts failed workers with backoff.
//!
//! On top of the engine sit a few primitives that turn coordination into dependency
//! edges:
//!
//! - [`gate`]: a one-shot latch; dependents wait until it is unlocked;
//! - [`flag`]: a boolean condition that exists as a worker only while it holds;
//! - [`fortress`]: shared visits with an exclusive, draining lockdown;
//! - [`Housing`]: runs a manifold behind flags and inside a fortress visit.
//!
//! [`migration`] and [`agent`] assemble them into the manifold set of a
//! migration-aware agent.
//!
//! ## Architecture
//! ```text
//!   Vec<Manifold> ──► Engine::start ──► graph validation
//!                                            │
//!                                            ▼
//!   ┌─────────────────────────── engine loop ───────────────────────────┐
//!   │ slots: Stopped ─► Starting ─► Started ─► Stopping ─► Stopped      │
//!   │                      │ Err                                        │
//!   │                      └─► Backoff ─► (timer) ─► Stopped            │
//!   │ input started/stopped ─► re-evaluate dependents                   │
//!   └───────┬───────────────────────────────────────────────────────────┘
//!           │ publish
//!           ▼
//!          Bus ──► SubscriberSet ──► LogWriter, custom subscribers
//! ```
//!
//! ## Features
//! | Area              | Description                                              | Key types / traits                            |
//! |-------------------|----------------------------------------------------------|-----------------------------------------------|
//! | **Engine**        | Dependency-ordered start, teardown and restart.          | [`Engine`], [`EngineBuilder`], [`Report`]     |
//! | **Manifolds**     | Declarative components with typed inputs and outputs.    | [`Manifold`], [`Input`], [`Context`], [`Output`] |
//! | **Workers**       | `kill` / `wait` lifecycle, closures and value holders.   | [`Worker`], [`WorkerRef`], [`WorkerFn`]       |
//! | **Coordination**  | Gates, flags, fortresses and housing.                    | [`Lock`], [`Flag`], [`Fortress`], [`Housing`] |
//! | **Subscriber API**| Hook into engine events (logging, metrics, ...).         | [`Subscribe`]                                 |
//! | **Policies**      | Retry delays for failing manifolds.                      | [`BackoffPolicy`], [`JitterPolicy`]           |
//! | **Errors**        | Typed errors for wiring, workers and fortresses.         | [`EngineError`], [`WorkerError`], [`FortressError`] |
//!
//! ## Optional features
//! - `logging` (default): exports the built-in [`LogWriter`] subscriber, which renders
//!   events as `tracing` records.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use depvisor::{Engine, EngineConfig, Lock, Manifold, WorkerFn, WorkerRef, gate};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), depvisor::EngineError> {
//!     #[cfg(feature = "logging")]
//!     let subs: Vec<Arc<dyn depvisor::Subscribe>> = vec![Arc::new(depvisor::LogWriter)];
//!     #[cfg(not(feature = "logging"))]
//!     let subs: Vec<Arc<dyn depvisor::Subscribe>> = Vec::new();
//!
//!     let engine = Engine::builder(EngineConfig::default())
//!         .with_subscribers(subs)
//!         .build();
//!
//!     let ready = Lock::new();
//!     let worker = Manifold::new("worker", |_ctx| async {
//!         Ok(WorkerRef::new(WorkerFn::spawn(|token| async move {
//!             token.cancelled().await;
//!             Ok(())
//!         })))
//!     })
//!     .with_input("ready");
//!
//!     engine.start(vec![gate::manifold("ready", ready.clone()), worker])?;
//!     ready.unlock();
//!
//!     tokio::time::sleep(Duration::from_millis(20)).await;
//!     engine.kill();
//!     engine.wait().await
//! }
//! ```
pub mod agent;
mod core;
mod error;
mod events;
pub mod flag;
pub mod fortress;
pub mod gate;
mod housing;
mod manifold;
pub mod migration;
mod policies;
mod subscribers;
pub mod watcher;
mod worker;

// ---- Public re-exports ----

pub use crate::core::{
    Engine, EngineBuilder, EngineConfig, EngineState, ManifoldReport, ManifoldState, Report,
};
pub use error::{EngineError, FortressError, WorkerError};
pub use events::{Bus, Event, EventKind};
pub use flag::{Flag, FlagRef};
pub use fortress::{Fortress, Guard, Guest, Visit};
pub use gate::Lock;
pub use housing::{Housed, Housing};
pub use manifold::{Capability, Context, Input, Manifold, Output, OutputBuilder, StartFn, StartFuture};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use subscribers::{Subscribe, SubscriberSet};
pub use worker::value;
pub use worker::{Worker, WorkerFn, WorkerRef};

// Optional: expose a simple built-in logger subscriber.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
