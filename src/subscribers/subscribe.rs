//! # Subscriber trait
//!
//! [`Subscribe`] is the extension point for observing the engine: logging, metrics,
//! status pages. Each subscriber gets its own bounded queue and worker task inside
//! the [`SubscriberSet`](crate::SubscriberSet), so a slow subscriber never stalls the
//! engine loop or its peers.

use async_trait::async_trait;

use crate::events::Event;

/// Contract for event subscribers.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handles one event.
    async fn on_event(&self, event: &Event);

    /// Name used in overflow/panic events.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Capacity of this subscriber's queue; events beyond it are dropped.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
