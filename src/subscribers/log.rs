//! # Logging subscriber.
//!
//! [`LogWriter`] renders engine events as structured `tracing` records. Start
//! failures, retries and fatal engine errors are `warn`/`error`; ordinary lifecycle
//! transitions are `info`/`debug`.
//!
//! ```text
//! INFO  manifold=api-caller generation=3 attempt=3 manifold starting
//! WARN  manifold=api-caller generation=3 reason="connection refused" start failed
//! WARN  manifold=api-caller attempt=1 delay_ms=250 reason="connection refused" retry scheduled
//! ```

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// `tracing`-backed event logger.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogWriter;

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let manifold = e.manifold.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");
        match e.kind {
            EventKind::EngineStarted => {
                info!(manifolds = e.attempt, "engine started");
            }
            EventKind::ShutdownRequested => info!("engine shutdown requested"),
            EventKind::AllStoppedWithin => info!("all workers stopped within grace"),
            EventKind::GraceExceeded => warn!(stuck = reason, "shutdown grace exceeded"),
            EventKind::EngineFailed => error!(reason, "engine failed"),
            EventKind::ManifoldStarting => {
                debug!(manifold, generation = e.generation, attempt = e.attempt, "manifold starting");
            }
            EventKind::ManifoldStarted => {
                info!(manifold, generation = e.generation, "manifold started");
            }
            EventKind::StartFailed => {
                warn!(manifold, generation = e.generation, reason, "start failed");
            }
            EventKind::BackoffScheduled => {
                warn!(manifold, attempt = e.attempt, delay_ms = e.delay_ms, reason, "retry scheduled");
            }
            EventKind::ManifoldStopping => {
                debug!(manifold, generation = e.generation, reason, "manifold stopping");
            }
            EventKind::WorkerExited => {
                info!(manifold, generation = e.generation, reason, "worker exited");
            }
            EventKind::ManifoldUninstalled => info!(manifold, "manifold uninstalled"),
            EventKind::SubscriberOverflow => {
                warn!(subscriber = manifold, reason, "subscriber dropped event");
            }
            EventKind::SubscriberPanicked => {
                error!(subscriber = manifold, reason, "subscriber panicked");
            }
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
