//! Engine events: data model and broadcast bus.
//!
//! - [`EventKind`], [`Event`] classification and payload
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! Publishers: the engine loop (`core::registry`), start/exit tasks it spawns, and
//! `SubscriberSet` workers (overflow/panic). Consumer: the engine's subscriber
//! listener, which fans events out to user subscribers.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
