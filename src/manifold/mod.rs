//! # Manifolds and the start-time contract.
//!
//! - [`Manifold`] - name, inputs, start function, output
//! - [`Input`] - one dependency edge, optionally typed
//! - [`Output`], [`Capability`] - what dependents may borrow from a running worker
//! - [`Context`] - snapshot of running inputs handed to `start`

mod context;
mod manifold;
mod output;

pub use context::Context;
pub use manifold::{Input, Manifold, StartFn, StartFuture};
pub use output::{Capability, Output, OutputBuilder};

pub(crate) use context::Running;
#[cfg(test)]
pub(crate) use context::testing;
