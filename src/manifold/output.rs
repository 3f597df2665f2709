//! # Typed outputs.
//!
//! A manifold's [`Output`] declares which worker type its start function returns and
//! which capability types dependents may borrow from that worker. Nothing here uses
//! reflection: each capability is a plain closure keyed by `TypeId`.
//!
//! - at registration the engine checks every typed input against the capabilities of
//!   its target ([`EngineError::IncompatibleInput`](crate::EngineError::IncompatibleInput));
//! - at install the engine checks the returned worker against the declared worker type
//!   (a mismatch is an engine-fatal wiring bug);
//! - at start time [`Context::get`](crate::Context::get) runs the matching closure.
//!
//! ```rust
//! use std::sync::Arc;
//! use depvisor::{Capability, Fortress, Guard, Guest, Output, fortress::FortressWorker};
//!
//! let out: Output = Output::of::<FortressWorker>()
//!     .provide(|w: &FortressWorker| w.guest())
//!     .provide(|w: &FortressWorker| w.guard())
//!     .into();
//! assert!(out.provides(Capability::of::<Guest>()));
//! assert!(!out.provides(Capability::of::<Arc<Fortress>>()));
//! ```

use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::worker::{Worker, WorkerRef};

pub(crate) type Resource = Arc<dyn Any + Send + Sync>;
type Extract = Arc<dyn Fn(&WorkerRef) -> Option<Resource> + Send + Sync>;
type Accepts = Arc<dyn Fn(&WorkerRef) -> bool + Send + Sync>;

/// Identity of a capability type that can flow from an output to an input.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Capability {
    id: TypeId,
    name: &'static str,
}

impl Capability {
    /// Capability of type `T`.
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Type name, for messages.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

#[derive(Clone)]
struct Provided {
    capability: Capability,
    extract: Extract,
}

/// Declared output of a manifold.
#[derive(Clone)]
pub struct Output {
    worker_type: &'static str,
    accepts: Accepts,
    provided: Vec<Provided>,
}

impl Output {
    /// Starts declaring the output of manifolds whose start returns a `W`.
    pub fn of<W: Worker>() -> OutputBuilder<W> {
        OutputBuilder {
            provided: Vec::new(),
            _worker: PhantomData,
        }
    }

    /// True if dependents can borrow `capability` from this output.
    pub fn provides(&self, capability: Capability) -> bool {
        self.provided.iter().any(|p| p.capability == capability)
    }

    /// Declared capabilities.
    pub fn capabilities(&self) -> impl Iterator<Item = Capability> + '_ {
        self.provided.iter().map(|p| p.capability)
    }

    /// Declared worker type name.
    pub fn worker_type(&self) -> &'static str {
        self.worker_type
    }

    /// True if `worker` is of the declared worker type.
    pub(crate) fn accepts(&self, worker: &WorkerRef) -> bool {
        (self.accepts)(worker)
    }

    /// Borrows a `T` from `worker`.
    pub(crate) fn extract<T: Clone + 'static>(&self, worker: &WorkerRef) -> Option<T> {
        let capability = Capability::of::<T>();
        let provided = self.provided.iter().find(|p| p.capability == capability)?;
        let resource = (provided.extract)(worker)?;
        resource.downcast_ref::<T>().cloned()
    }

    /// Re-targets this output at a worker `H` that wraps the originally declared one.
    pub(crate) fn wrapped<H: Worker>(self, inner: fn(&H) -> &WorkerRef) -> Output {
        let accepts = self.accepts.clone();
        let provided = self
            .provided
            .into_iter()
            .map(|p| {
                let extract = p.extract.clone();
                Provided {
                    capability: p.capability,
                    extract: Arc::new(move |w: &WorkerRef| {
                        w.downcast_ref::<H>().and_then(|h| extract(inner(h)))
                    }),
                }
            })
            .collect();
        Output {
            worker_type: self.worker_type,
            accepts: Arc::new(move |w: &WorkerRef| {
                w.downcast_ref::<H>().is_some_and(|h| accepts(inner(h)))
            }),
            provided,
        }
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Output")
            .field("worker", &self.worker_type)
            .field("provides", &self.capabilities().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder returned by [`Output::of`].
pub struct OutputBuilder<W> {
    provided: Vec<Provided>,
    _worker: PhantomData<fn() -> W>,
}

impl<W: Worker> OutputBuilder<W> {
    /// Lets dependents borrow a `T` computed from the running `W`.
    ///
    /// Declaring the same capability twice keeps the last closure.
    pub fn provide<T, F>(mut self, f: F) -> Self
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&W) -> T + Send + Sync + 'static,
    {
        let capability = Capability::of::<T>();
        self.provided.retain(|p| p.capability != capability);
        self.provided.push(Provided {
            capability,
            extract: Arc::new(move |w: &WorkerRef| {
                w.downcast_ref::<W>()
                    .map(|w| Arc::new(f(w)) as Resource)
            }),
        });
        self
    }
}

impl<W: Worker> From<OutputBuilder<W>> for Output {
    fn from(b: OutputBuilder<W>) -> Self {
        Output {
            worker_type: std::any::type_name::<W>(),
            accepts: Arc::new(|w: &WorkerRef| w.downcast_ref::<W>().is_some()),
            provided: b.provided,
        }
    }
}
