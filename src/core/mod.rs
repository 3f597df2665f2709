//! Engine core: graph validation, the engine loop and shutdown.
//!
//! The public API from this module is [`Engine`], its [`EngineBuilder`] and
//! [`EngineConfig`], plus the [`Report`] types.
//!
//! Internal modules:
//! - [`graph`]: validates the manifold set and computes dependents;
//! - [`registry`]: the engine loop owning every slot;
//! - [`slot`]: per-manifold state machine;
//! - [`shutdown`]: OS termination signals for [`Engine::run`].

mod builder;
mod config;
mod engine;
mod graph;
mod registry;
mod report;
mod shutdown;
mod slot;

#[cfg(test)]
mod tests;

pub use builder::EngineBuilder;
pub use config::EngineConfig;
pub use engine::Engine;
pub use report::{EngineState, ManifoldReport, ManifoldState, Report};
