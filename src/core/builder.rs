use std::sync::Arc;

use crate::core::{EngineConfig, engine::Engine};
use crate::events::Bus;
use crate::subscribers::{Subscribe, SubscriberSet};

/// Builder for an [`Engine`].
pub struct EngineBuilder {
    cfg: EngineConfig,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl EngineBuilder {
    /// Creates a builder with the given configuration and no subscribers.
    pub fn new(cfg: EngineConfig) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
        }
    }

    /// Sets event subscribers.
    ///
    /// Each subscriber gets its own worker and bounded queue; see [`SubscriberSet`].
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Adds one subscriber.
    pub fn with_subscriber(mut self, subscriber: Arc<dyn Subscribe>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    /// Builds the engine and spawns the bus listener feeding the subscribers.
    ///
    /// Must be called inside a tokio runtime. Workers do not start until
    /// [`Engine::start`] or [`Engine::run`].
    pub fn build(self) -> Arc<Engine> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subs = Arc::new(SubscriberSet::new(self.subscribers, bus.clone()));

        if !subs.is_empty() {
            let mut rx = bus.subscribe();
            let set = Arc::clone(&subs);
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(ev) => set.emit(&ev),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
        }

        Arc::new(Engine::new_internal(self.cfg, bus, subs))
    }
}
