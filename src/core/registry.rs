//! # Engine loop: single owner of every slot.
//!
//! All graph state lives in [`Registry`] and is only touched by the task running
//! [`Registry::run`]. Start attempts, worker waiters and retry timers are separate
//! tokio tasks that report back through one unbounded queue:
//!
//! ```text
//!   start task ──── Started{name, gen, result} ──┐
//!   exit waiter ─── Exited{name, gen, result} ───┤
//!   retry timer ─── RetryDue{name, gen} ─────────┼──► Registry::run ──► Bus
//!   Engine::report ─ Report(reply) ──────────────┘         │
//!                                                          ▼
//!                                          evaluate(name) for every queued name
//! ```
//!
//! ## Evaluation
//! A manifold is *startable* when every input is either running or optional and
//! unregistered. Evaluating a queued name:
//! - startable and stopped → new generation, spawn `start` with a fresh [`Context`]
//! - not startable and starting → cancel the start's abort token
//! - not startable and started → kill the worker, enqueue dependents
//!
//! Whenever a manifold enters or leaves the started state, its dependents are queued.
//!
//! ## Rules
//! - at most one start attempt or worker per manifold at any time
//! - a dependent's context only ever contains started inputs
//! - start failures are retried forever with [`BackoffPolicy`](crate::BackoffPolicy)
//! - messages naming an unknown slot or a wrong generation are fatal

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::core::config::EngineConfig;
use crate::core::graph::Graph;
use crate::core::report::{EngineState, Report};
use crate::core::slot::{Phase, Slot};
use crate::error::{EngineError, WorkerError, panic_message};
use crate::events::{Bus, Event, EventKind};
use crate::manifold::{Context, Running};
use crate::worker::WorkerRef;

/// Messages handled by the engine loop.
pub(crate) enum Msg {
    Started {
        name: Arc<str>,
        generation: u64,
        result: Result<WorkerRef, WorkerError>,
    },
    Exited {
        name: Arc<str>,
        generation: u64,
        result: Result<(), WorkerError>,
    },
    RetryDue {
        name: Arc<str>,
        generation: u64,
    },
    Report(oneshot::Sender<Report>),
}

/// Where a worker result came from.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Origin {
    Start,
    Exit,
}

pub(crate) struct Registry {
    cfg: EngineConfig,
    bus: Bus,
    token: CancellationToken,
    order: Vec<Arc<str>>,
    slots: HashMap<Arc<str>, Slot>,
    dependents: HashMap<Arc<str>, Vec<Arc<str>>>,
    queue: VecDeque<Arc<str>>,
    queued: HashSet<Arc<str>>,
    tx: mpsc::UnboundedSender<Msg>,
    rx: mpsc::UnboundedReceiver<Msg>,
    stopping: bool,
}

impl Registry {
    pub(crate) fn new(
        graph: Graph,
        cfg: EngineConfig,
        bus: Bus,
        token: CancellationToken,
        tx: mpsc::UnboundedSender<Msg>,
        rx: mpsc::UnboundedReceiver<Msg>,
    ) -> Self {
        let Graph {
            order,
            mut manifolds,
            dependents,
        } = graph;
        let slots = order
            .iter()
            .filter_map(|name| manifolds.remove(name).map(|m| (name.clone(), Slot::new(m))))
            .collect();
        Self {
            cfg,
            bus,
            token,
            order,
            slots,
            dependents,
            queue: VecDeque::new(),
            queued: HashSet::new(),
            tx,
            rx,
            stopping: false,
        }
    }

    /// Drives the graph until the token is cancelled or a fatal error occurs, then
    /// stops every worker within the grace period.
    ///
    /// Returns the first fatal error (if any) and the final report.
    pub(crate) async fn run(mut self) -> (Result<(), EngineError>, Report) {
        self.bus.publish(
            Event::new(EventKind::EngineStarted)
                .with_attempt(u32::try_from(self.slots.len()).unwrap_or(u32::MAX)),
        );
        for name in self.order.clone() {
            self.enqueue(&name);
        }

        let outcome = self.drive().await;
        match &outcome {
            Ok(()) => self.bus.publish(Event::new(EventKind::ShutdownRequested)),
            Err(e) => self
                .bus
                .publish(Event::new(EventKind::EngineFailed).with_reason(e.to_string())),
        }

        let stopped = self.shutdown().await;
        let report = self.report(EngineState::Stopped);
        (outcome.and(stopped), report)
    }

    async fn drive(&mut self) -> Result<(), EngineError> {
        let token = self.token.clone();
        loop {
            self.process_queue()?;
            tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(()),
                msg = self.rx.recv() => match msg {
                    Some(msg) => self.handle(msg)?,
                    None => return Ok(()),
                },
            }
        }
    }

    fn handle(&mut self, msg: Msg) -> Result<(), EngineError> {
        match msg {
            Msg::Started {
                name,
                generation,
                result,
            } => self.on_started(name, generation, result),
            Msg::Exited {
                name,
                generation,
                result,
            } => self.on_exited(name, generation, result),
            Msg::RetryDue { name, generation } => self.on_retry_due(name, generation),
            Msg::Report(reply) => {
                let _ = reply.send(self.report(EngineState::Running));
                Ok(())
            }
        }
    }

    fn process_queue(&mut self) -> Result<(), EngineError> {
        while let Some(name) = self.queue.pop_front() {
            self.queued.remove(&name);
            self.evaluate(&name)?;
        }
        Ok(())
    }

    fn evaluate(&mut self, name: &Arc<str>) -> Result<(), EngineError> {
        if self.stopping {
            return Ok(());
        }
        let startable = self.is_startable(name);
        let slot = lookup(&self.slots, name)?;
        match &slot.phase {
            Phase::Stopped if startable => self.launch(name),
            Phase::Starting { abort } if !startable => {
                abort.cancel();
                Ok(())
            }
            Phase::Started { .. } if !startable => self.stop(name, "input unavailable"),
            _ => Ok(()),
        }
    }

    fn is_startable(&self, name: &str) -> bool {
        let Some(slot) = self.slots.get(name) else {
            return false;
        };
        slot.manifold
            .inputs()
            .iter()
            .all(|input| match self.slots.get(input.name()) {
                None => input.is_optional(),
                Some(dep) => dep.worker().is_some(),
            })
    }

    /// Running inputs of `name`, as handed to its start function.
    fn snapshot(&self, name: &str) -> Result<HashMap<String, Option<Running>>, EngineError> {
        let slot = lookup(&self.slots, name)?;
        Ok(slot
            .manifold
            .inputs()
            .iter()
            .map(|input| {
                let running = self.slots.get(input.name()).and_then(|dep| {
                    dep.worker().map(|worker| Running {
                        worker: worker.clone(),
                        output: dep.manifold.output.clone(),
                    })
                });
                (input.name().to_string(), running)
            })
            .collect())
    }

    fn launch(&mut self, name: &Arc<str>) -> Result<(), EngineError> {
        let inputs = self.snapshot(name)?;
        let abort = self.token.child_token();

        let slot = lookup_mut(&mut self.slots, name)?;
        slot.generation += 1;
        slot.start_count = slot.start_count.saturating_add(1);
        slot.phase = Phase::Starting {
            abort: abort.clone(),
        };
        let generation = slot.generation;
        let start = slot.manifold.start.clone();

        self.bus.publish(
            Event::new(EventKind::ManifoldStarting)
                .with_manifold(name.clone())
                .with_generation(generation)
                .with_attempt(slot.start_count),
        );

        let ctx = Context::new(name.clone(), inputs, abort);
        let tx = self.tx.clone();
        let name = name.clone();
        tokio::spawn(async move {
            let result = match AssertUnwindSafe(async move { start(ctx).await })
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(panic) => Err(WorkerError::fail(format!(
                    "start panicked: {}",
                    panic_message(&*panic)
                ))),
            };
            let _ = tx.send(Msg::Started {
                name,
                generation,
                result,
            });
        });
        Ok(())
    }

    fn stop(&mut self, name: &Arc<str>, reason: &'static str) -> Result<(), EngineError> {
        let slot = lookup_mut(&mut self.slots, name)?;
        let Phase::Started { worker } = std::mem::replace(&mut slot.phase, Phase::Stopped) else {
            return Err(internal(format!("stop requested for {name:?} which is not started")));
        };
        worker.kill();
        slot.phase = Phase::Stopping;
        self.bus.publish(
            Event::new(EventKind::ManifoldStopping)
                .with_manifold(name.clone())
                .with_generation(slot.generation)
                .with_reason(reason),
        );
        self.enqueue_dependents(name);
        Ok(())
    }

    fn on_started(
        &mut self,
        name: Arc<str>,
        generation: u64,
        result: Result<WorkerRef, WorkerError>,
    ) -> Result<(), EngineError> {
        let startable = self.is_startable(&name);
        let slot = lookup_mut(&mut self.slots, &name)?;
        let Phase::Starting { abort } = &slot.phase else {
            return Err(internal(format!("start result for {name:?} which is not starting")));
        };
        if slot.generation != generation {
            return Err(internal(format!(
                "start result for {name:?} generation {generation}, slot is at {}",
                slot.generation
            )));
        }
        let aborted = abort.is_cancelled() || !startable;

        match result {
            Ok(worker) if aborted => {
                worker.kill();
                slot.phase = Phase::Stopping;
                self.watch_exit(name, generation, worker);
                Ok(())
            }
            Ok(worker) => {
                if let Some(output) = &slot.manifold.output {
                    if !output.accepts(&worker) {
                        worker.kill();
                        return Err(internal(format!(
                            "manifold {name:?} started a {}, its output declares {}",
                            worker.type_name(),
                            output.worker_type()
                        )));
                    }
                }
                slot.phase = Phase::Started {
                    worker: worker.clone(),
                };
                slot.failures = 0;
                self.bus.publish(
                    Event::new(EventKind::ManifoldStarted)
                        .with_manifold(name.clone())
                        .with_generation(generation),
                );
                self.enqueue_dependents(&name);
                self.watch_exit(name, generation, worker);
                Ok(())
            }
            Err(err) => {
                self.bus.publish(
                    Event::new(EventKind::StartFailed)
                        .with_manifold(name.clone())
                        .with_generation(generation)
                        .with_reason(err.to_string()),
                );
                if aborted {
                    slot.phase = Phase::Stopped;
                    self.enqueue(&name);
                    return Ok(());
                }
                self.settle(&name, Err(err), Origin::Start)
            }
        }
    }

    fn on_exited(
        &mut self,
        name: Arc<str>,
        generation: u64,
        result: Result<(), WorkerError>,
    ) -> Result<(), EngineError> {
        let slot = lookup_mut(&mut self.slots, &name)?;
        if slot.generation != generation {
            return Err(internal(format!(
                "exit of {name:?} generation {generation}, slot is at {}",
                slot.generation
            )));
        }

        let mut event = Event::new(EventKind::WorkerExited)
            .with_manifold(name.clone())
            .with_generation(generation);
        if let Err(err) = &result {
            event = event.with_reason(err.to_string());
        }

        match std::mem::replace(&mut slot.phase, Phase::Stopped) {
            Phase::Stopping => {
                if let Err(err) = result {
                    if err != WorkerError::Canceled {
                        slot.last_error = Some(err);
                    }
                }
                self.bus.publish(event);
                self.enqueue(&name);
                Ok(())
            }
            Phase::Started { .. } => {
                self.bus.publish(event);
                self.enqueue_dependents(&name);
                self.settle(&name, result, Origin::Exit)
            }
            other => {
                slot.phase = other;
                Err(internal(format!("exit of {name:?} which has no worker")))
            }
        }
    }

    fn on_retry_due(&mut self, name: Arc<str>, generation: u64) -> Result<(), EngineError> {
        let slot = lookup_mut(&mut self.slots, &name)?;
        if slot.generation == generation && matches!(slot.phase, Phase::Backoff) {
            slot.phase = Phase::Stopped;
            self.enqueue(&name);
        }
        Ok(())
    }

    /// Decides what happens to a slot after its start failed or its worker exited on
    /// its own.
    fn settle(
        &mut self,
        name: &Arc<str>,
        result: Result<(), WorkerError>,
        origin: Origin,
    ) -> Result<(), EngineError> {
        let restart_delay = self.cfg.restart_delay();
        let backoff = self.cfg.backoff;
        let slot = lookup_mut(&mut self.slots, name)?;
        let generation = slot.generation;

        let delay = match result {
            Ok(()) | Err(WorkerError::Canceled) => restart_delay,
            Err(err @ WorkerError::Missing { .. }) => {
                slot.last_error = Some(err);
                slot.phase = Phase::Stopped;
                if origin == Origin::Start {
                    // Nothing to do until an input changes.
                    return Ok(());
                }
                restart_delay
            }
            Err(WorkerError::Bounce) => None,
            Err(WorkerError::Uninstall) => {
                slot.phase = Phase::Uninstalled;
                self.bus
                    .publish(Event::new(EventKind::ManifoldUninstalled).with_manifold(name.clone()));
                return Ok(());
            }
            Err(err) => {
                slot.failures = slot.failures.saturating_add(1);
                let delay = backoff.delay(slot.failures - 1);
                self.bus.publish(
                    Event::new(EventKind::BackoffScheduled)
                        .with_manifold(name.clone())
                        .with_attempt(slot.failures)
                        .with_delay(delay)
                        .with_reason(err.to_string()),
                );
                slot.last_error = Some(err);
                Some(delay)
            }
        };

        match delay {
            Some(delay) => {
                slot.phase = Phase::Backoff;
                self.schedule_retry(name.clone(), generation, delay);
            }
            None => {
                slot.phase = Phase::Stopped;
                self.enqueue(name);
            }
        }
        Ok(())
    }

    fn watch_exit(&self, name: Arc<str>, generation: u64, worker: WorkerRef) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = worker.wait().await;
            let _ = tx.send(Msg::Exited {
                name,
                generation,
                result,
            });
        });
    }

    fn schedule_retry(&self, name: Arc<str>, generation: u64, delay: Duration) {
        let tx = self.tx.clone();
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(Msg::RetryDue { name, generation });
                }
            }
        });
    }

    fn enqueue(&mut self, name: &Arc<str>) {
        if self.queued.insert(name.clone()) {
            self.queue.push_back(name.clone());
        }
    }

    fn enqueue_dependents(&mut self, name: &str) {
        let Some(dependents) = self.dependents.get(name) else {
            return;
        };
        for dep in dependents {
            if self.queued.insert(dep.clone()) {
                self.queue.push_back(dep.clone());
            }
        }
    }

    /// Stops everything and waits up to `grace` for workers and in-flight starts.
    async fn shutdown(&mut self) -> Result<(), EngineError> {
        self.stopping = true;
        self.token.cancel();
        self.queue.clear();
        self.queued.clear();

        for name in &self.order {
            let Some(slot) = self.slots.get_mut(name) else {
                continue;
            };
            match std::mem::replace(&mut slot.phase, Phase::Stopped) {
                Phase::Started { worker } => {
                    worker.kill();
                    self.bus.publish(
                        Event::new(EventKind::ManifoldStopping)
                            .with_manifold(name.clone())
                            .with_generation(slot.generation)
                            .with_reason("engine stopping"),
                    );
                    slot.phase = Phase::Stopping;
                }
                Phase::Backoff => {}
                other => slot.phase = other,
            }
        }

        let grace = self.cfg.grace;
        match tokio::time::timeout(grace, self.drain()).await {
            Ok(()) => {
                self.bus.publish(Event::new(EventKind::AllStoppedWithin));
                Ok(())
            }
            Err(_elapsed) => {
                let stuck: Vec<String> = self
                    .order
                    .iter()
                    .filter(|name| self.slots.get(*name).is_some_and(Slot::is_active))
                    .map(|name| name.to_string())
                    .collect();
                self.bus.publish(
                    Event::new(EventKind::GraceExceeded).with_reason(stuck.join(", ")),
                );
                Err(EngineError::GraceExceeded { grace, stuck })
            }
        }
    }

    /// Handles messages until no slot has a start in flight or a worker alive.
    async fn drain(&mut self) {
        while self.slots.values().any(Slot::is_active) {
            let Some(msg) = self.rx.recv().await else {
                return;
            };
            match msg {
                Msg::Started {
                    name,
                    generation,
                    result,
                } => {
                    let Some(slot) = self.slots.get_mut(&name) else {
                        continue;
                    };
                    if slot.generation != generation {
                        continue;
                    }
                    match result {
                        Ok(worker) => {
                            worker.kill();
                            slot.phase = Phase::Stopping;
                            self.watch_exit(name, generation, worker);
                        }
                        Err(_) => slot.phase = Phase::Stopped,
                    }
                }
                Msg::Exited {
                    name,
                    generation,
                    result,
                } => {
                    let Some(slot) = self.slots.get_mut(&name) else {
                        continue;
                    };
                    if slot.generation != generation {
                        continue;
                    }
                    slot.phase = Phase::Stopped;
                    let mut event = Event::new(EventKind::WorkerExited)
                        .with_manifold(name)
                        .with_generation(generation);
                    if let Err(err) = result {
                        event = event.with_reason(err.to_string());
                    }
                    self.bus.publish(event);
                }
                Msg::RetryDue { .. } => {}
                Msg::Report(reply) => {
                    let _ = reply.send(self.report(EngineState::Stopping));
                }
            }
        }
    }

    fn report(&self, state: EngineState) -> Report {
        let mut report = Report::empty(state);
        for (name, slot) in &self.slots {
            report.manifolds.insert(name.to_string(), slot.report());
        }
        report
    }
}

fn lookup<'a>(slots: &'a HashMap<Arc<str>, Slot>, name: &str) -> Result<&'a Slot, EngineError> {
    slots
        .get(name)
        .ok_or_else(|| internal(format!("no slot for manifold {name:?}")))
}

fn lookup_mut<'a>(
    slots: &'a mut HashMap<Arc<str>, Slot>,
    name: &str,
) -> Result<&'a mut Slot, EngineError> {
    slots
        .get_mut(name)
        .ok_or_else(|| internal(format!("no slot for manifold {name:?}")))
}

fn internal(detail: String) -> EngineError {
    EngineError::Internal { detail }
}
