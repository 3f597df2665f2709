//! Event subscribers.
//!
//! ```text
//! engine loop ── publish(Event) ──► Bus ──► engine listener ──► SubscriberSet::emit
//!                                                                ├──► LogWriter
//!                                                                └──► custom ...
//! ```
//!
//! Implement [`Subscribe`] for metrics, alerting or status reporting and pass the
//! subscribers to [`EngineBuilder::with_subscribers`](crate::EngineBuilder::with_subscribers).

#[cfg(feature = "logging")]
mod log;
mod set;
mod subscribe;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
