//! # Engine: dependency-driven supervision of manifolds.
//!
//! The [`Engine`] owns the event bus, the [`SubscriberSet`] and the engine loop. Its
//! public surface is small:
//!
//! - [`Engine::start`] validates and installs the manifold graph (once);
//! - [`Engine::kill`] / [`Engine::wait`] stop it and collect the outcome;
//! - [`Engine::run`] does both, stopping on OS termination signals;
//! - [`Engine::report`] snapshots every manifold.
//!
//! ## Architecture
//! ```text
//! Vec<Manifold> ──► Engine::start ──► Graph::build (duplicates, unknown inputs,
//!                        │                          typed inputs, cycles)
//!                        ▼
//!                spawn Registry::run ◄── Started / Exited / RetryDue / Report
//!                        │
//!                        ├─► start tasks (child abort tokens)
//!                        ├─► exit waiters
//!                        └─► Bus ──► listener ──► SubscriberSet ──► LogWriter, ...
//!
//! Shutdown path:
//!   kill() / signal / fatal error
//!        └─► token.cancel() → in-flight starts see ctx.abort()
//!        └─► kill every worker, wait up to cfg.grace
//!               ├─ all exited  → AllStoppedWithin, Ok(())
//!               └─ timed out   → GraceExceeded, EngineError::GraceExceeded{stuck}
//! ```
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use depvisor::{Engine, EngineConfig, Manifold, WorkerFn, WorkerRef, value};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), depvisor::EngineError> {
//!     let engine = Engine::builder(EngineConfig::default()).build();
//!
//!     let ticker = Manifold::new("ticker", |ctx| async move {
//!         let every: Duration = ctx.get("interval")?;
//!         Ok(WorkerRef::new(WorkerFn::spawn(move |token| async move {
//!             loop {
//!                 tokio::select! {
//!                     _ = token.cancelled() => return Ok(()),
//!                     _ = tokio::time::sleep(every) => {}
//!                 }
//!             }
//!         })))
//!     })
//!     .with_typed_input::<Duration>("interval");
//!
//!     engine.start(vec![
//!         value::manifold("interval", Duration::from_millis(10)),
//!         ticker,
//!     ])?;
//!
//!     tokio::time::sleep(Duration::from_millis(50)).await;
//!     engine.kill();
//!     engine.wait().await
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::core::builder::EngineBuilder;
use crate::core::config::EngineConfig;
use crate::core::graph::Graph;
use crate::core::registry::{Msg, Registry};
use crate::core::report::{EngineState, Report};
use crate::core::shutdown;
use crate::error::{EngineError, WorkerError};
use crate::events::{Bus, Event};
use crate::manifold::Manifold;
use crate::subscribers::SubscriberSet;
use crate::worker::Worker;

type Outcome = Option<Result<(), EngineError>>;

/// Dependency engine.
pub struct Engine {
    cfg: EngineConfig,
    bus: Bus,
    subs: Arc<SubscriberSet>,
    token: CancellationToken,
    tx: mpsc::UnboundedSender<Msg>,
    /// Taken by `start`; `Some` means the loop never ran.
    rx: Mutex<Option<mpsc::UnboundedReceiver<Msg>>>,
    last: Arc<Mutex<Option<Report>>>,
    done: Arc<watch::Sender<Outcome>>,
}

impl Engine {
    /// Returns a builder.
    pub fn builder(cfg: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(cfg)
    }

    /// Engine without subscribers. Must be called inside a tokio runtime.
    pub fn new(cfg: EngineConfig) -> Arc<Self> {
        EngineBuilder::new(cfg).build()
    }

    pub(crate) fn new_internal(cfg: EngineConfig, bus: Bus, subs: Arc<SubscriberSet>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (done, _) = watch::channel(None);
        Self {
            cfg,
            bus,
            subs,
            token: CancellationToken::new(),
            tx,
            rx: Mutex::new(Some(rx)),
            last: Arc::new(Mutex::new(None)),
            done: Arc::new(done),
        }
    }

    /// Validates `manifolds` and starts supervising them.
    ///
    /// Returns immediately; workers start in the background in dependency order.
    ///
    /// ### Errors
    /// - [`EngineError::AlreadyStarted`] on a second call
    /// - a configuration error ([`EngineError::is_config`]); the engine is then
    ///   finished and [`Engine::wait`] returns the same error
    pub fn start(&self, manifolds: Vec<Manifold>) -> Result<(), EngineError> {
        let Some(rx) = self.rx.lock().take() else {
            return Err(EngineError::AlreadyStarted);
        };

        let graph = match Graph::build(manifolds) {
            Ok(graph) => graph,
            Err(e) => {
                self.token.cancel();
                self.finish(Err(e.clone()));
                return Err(e);
            }
        };
        if self.token.is_cancelled() {
            self.finish(Ok(()));
            return Ok(());
        }

        let registry = Registry::new(
            graph,
            self.cfg.clone(),
            self.bus.clone(),
            self.token.clone(),
            self.tx.clone(),
            rx,
        );
        let last = Arc::clone(&self.last);
        let done = Arc::clone(&self.done);
        tokio::spawn(async move {
            let (outcome, report) = registry.run().await;
            *last.lock() = Some(report);
            finish(&done, outcome);
        });
        Ok(())
    }

    /// Requests shutdown. Never blocks; idempotent.
    pub fn kill(&self) {
        self.token.cancel();
        if self.rx.lock().is_some() {
            self.finish(Ok(()));
        }
    }

    /// Waits until the engine has stopped.
    ///
    /// Returns the first fatal error, [`EngineError::GraceExceeded`] if workers did
    /// not stop in time, or `Ok(())`.
    pub async fn wait(&self) -> Result<(), EngineError> {
        let mut done = self.done.subscribe();
        match done.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(Ok(())),
            Err(_) => Ok(()),
        }
    }

    /// Starts `manifolds` and waits until the engine stops, stopping it gracefully on
    /// SIGINT/SIGTERM/SIGQUIT (Ctrl-C on other platforms).
    pub async fn run(&self, manifolds: Vec<Manifold>) -> Result<(), EngineError> {
        self.start(manifolds)?;
        let signal = tokio::select! {
            res = self.wait() => return res,
            signal = shutdown::wait_for_shutdown_signal() => signal,
        };
        if signal.is_ok() {
            self.kill();
        }
        self.wait().await
    }

    /// Snapshot of the engine and every manifold.
    pub async fn report(&self) -> Report {
        if self.rx.lock().is_some() {
            let state = if self.token.is_cancelled() {
                EngineState::Stopped
            } else {
                EngineState::Idle
            };
            return Report::empty(state);
        }

        let (reply, rx) = oneshot::channel();
        if self.tx.send(Msg::Report(reply)).is_ok() {
            if let Ok(report) = rx.await {
                return report;
            }
        }
        self.last
            .lock()
            .clone()
            .unwrap_or_else(|| Report::empty(EngineState::Stopped))
    }

    /// Receiver for every event published from now on.
    ///
    /// Subscribe before [`Engine::start`] to see the whole lifecycle.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subs.len()
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    fn finish(&self, outcome: Result<(), EngineError>) {
        finish(&self.done, outcome);
    }
}

/// Records the first outcome; later ones are dropped.
fn finish(done: &watch::Sender<Outcome>, outcome: Result<(), EngineError>) {
    done.send_if_modified(|slot| {
        if slot.is_none() {
            *slot = Some(outcome);
            true
        } else {
            false
        }
    });
}

/// An engine can be supervised by another engine.
#[async_trait]
impl Worker for Engine {
    fn kill(&self) {
        Engine::kill(self);
    }

    async fn wait(&self) -> Result<(), WorkerError> {
        Engine::wait(self)
            .await
            .map_err(|e| WorkerError::fail(e.to_string()))
    }
}
