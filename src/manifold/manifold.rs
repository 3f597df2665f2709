//! # Manifold: declarative description of one supervised component.
//!
//! A [`Manifold`] bundles:
//! - a unique name,
//! - an ordered set of [`Input`]s (names of other manifolds, optionally typed),
//! - a start function `Context -> Future<Result<WorkerRef, WorkerError>>`,
//! - an optional [`Output`] dependents can borrow from.
//!
//! Manifolds are immutable once handed to [`Engine::start`](crate::Engine::start).
//!
//! ## Example
//! ```rust
//! use depvisor::{Manifold, WorkerFn, WorkerRef};
//!
//! let ticker = Manifold::new("ticker", |ctx| async move {
//!     ctx.require("clock")?;
//!     Ok(WorkerRef::new(WorkerFn::spawn(|token| async move {
//!         token.cancelled().await;
//!         Ok(())
//!     })))
//! })
//! .with_input("clock");
//!
//! assert_eq!(ticker.name(), "ticker");
//! assert_eq!(ticker.input_names().collect::<Vec<_>>(), vec!["clock"]);
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::WorkerError;
use crate::manifold::{Capability, Context, Output};
use crate::worker::WorkerRef;

/// Future returned by a start function.
pub type StartFuture = BoxFuture<'static, Result<WorkerRef, WorkerError>>;

/// Type-erased start function.
pub type StartFn = Arc<dyn Fn(Context) -> StartFuture + Send + Sync>;

/// One declared dependency.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Input {
    name: String,
    optional: bool,
    expects: Option<Capability>,
}

impl Input {
    /// Required input: must be registered, must be running for the manifold to start.
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            optional: false,
            expects: None,
        }
    }

    /// Optional input: may be absent from the graph (then it is never available).
    /// If it is registered it still has to be running.
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            optional: true,
            ..Self::required(name)
        }
    }

    /// Declares that the input must output capability `T`; checked at registration.
    pub fn expecting<T: 'static>(mut self) -> Self {
        self.expects = Some(Capability::of::<T>());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn expects(&self) -> Option<Capability> {
        self.expects
    }
}

/// Declarative description of one supervised component.
#[derive(Clone)]
pub struct Manifold {
    pub(crate) name: Arc<str>,
    pub(crate) inputs: Vec<Input>,
    pub(crate) start: StartFn,
    pub(crate) output: Option<Output>,
}

impl Manifold {
    /// Creates a manifold without inputs or output.
    pub fn new<F, Fut>(name: impl Into<String>, start: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<WorkerRef, WorkerError>> + Send + 'static,
    {
        let name: String = name.into();
        Self {
            name: name.into(),
            inputs: Vec::new(),
            start: Arc::new(move |ctx| -> StartFuture { Box::pin(start(ctx)) }),
            output: None,
        }
    }

    /// Adds an input; a name already present is replaced in place.
    pub fn with(mut self, input: Input) -> Self {
        self.add_input(input);
        self
    }

    /// Adds a required, untyped input.
    pub fn with_input(self, name: impl Into<String>) -> Self {
        self.with(Input::required(name))
    }

    /// Adds a required input that must output `T`.
    pub fn with_typed_input<T: 'static>(self, name: impl Into<String>) -> Self {
        self.with(Input::required(name).expecting::<T>())
    }

    /// Adds an optional input.
    pub fn with_optional_input(self, name: impl Into<String>) -> Self {
        self.with(Input::optional(name))
    }

    /// Sets the output declaration.
    pub fn with_output(mut self, output: impl Into<Output>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }

    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().map(Input::name)
    }

    pub fn output(&self) -> Option<&Output> {
        self.output.as_ref()
    }

    /// Invokes the start function.
    pub fn start(&self, ctx: Context) -> StartFuture {
        (self.start)(ctx)
    }

    pub(crate) fn add_input(&mut self, input: Input) {
        match self.inputs.iter_mut().find(|i| i.name == input.name) {
            Some(existing) => *existing = input,
            None => self.inputs.push(input),
        }
    }
}

impl fmt::Debug for Manifold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manifold")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("output", &self.output)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::WorkerFn;

    fn noop(name: &str) -> Manifold {
        Manifold::new(name, |_ctx| async {
            Ok(WorkerRef::new(WorkerFn::spawn(|t| async move {
                t.cancelled().await;
                Ok(())
            })))
        })
    }

    #[test]
    fn inputs_are_an_ordered_set() {
        let m = noop("m")
            .with_input("b")
            .with_input("a")
            .with_typed_input::<u32>("b");

        assert_eq!(m.input_names().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(m.inputs()[0].expects(), Some(Capability::of::<u32>()));
        assert!(!m.inputs()[1].is_optional());
    }

    #[test]
    fn optional_inputs_are_marked() {
        let m = noop("m").with_optional_input("metrics");
        assert!(m.inputs()[0].is_optional());
        assert!(m.output().is_none());
    }
}
