//! # Workers
//!
//! - [`Worker`] - `kill` / `wait` lifecycle every supervised component implements
//! - [`WorkerRef`] - owned, type-erased handle returned by start functions
//! - [`WorkerFn`] - worker backed by a spawned closure
//! - [`value`] - workers that only expose a value

pub mod value;
mod worker;
mod worker_fn;

pub use worker::{Worker, WorkerRef};
pub use worker_fn::WorkerFn;
