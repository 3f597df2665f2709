//! # Manifold graph validation.
//!
//! [`Graph::build`] turns the manifolds passed to [`Engine::start`](crate::Engine::start)
//! into the immutable graph the engine loop works on, or rejects them with a
//! configuration error:
//!
//! - duplicate names → [`EngineError::DuplicateManifold`]
//! - required input naming no manifold → [`EngineError::UnknownInput`]
//! - typed input whose target does not provide the capability → [`EngineError::IncompatibleInput`]
//! - cycle, self-dependency included → [`EngineError::Cycle`]
//!
//! Optional inputs that name no manifold are kept on the manifold (they are simply
//! never available) but produce no edge.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::EngineError;
use crate::manifold::Manifold;

/// Validated manifold graph.
pub(crate) struct Graph {
    /// Names in registration order.
    pub(crate) order: Vec<Arc<str>>,
    pub(crate) manifolds: HashMap<Arc<str>, Manifold>,
    /// input → manifolds declaring it.
    pub(crate) dependents: HashMap<Arc<str>, Vec<Arc<str>>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Fresh,
    OnPath,
    Done,
}

impl Graph {
    pub(crate) fn build(manifolds: Vec<Manifold>) -> Result<Self, EngineError> {
        let mut order = Vec::with_capacity(manifolds.len());
        let mut by_name: HashMap<Arc<str>, Manifold> = HashMap::with_capacity(manifolds.len());
        for m in manifolds {
            if by_name.contains_key(&m.name) {
                return Err(EngineError::DuplicateManifold {
                    name: m.name.to_string(),
                });
            }
            order.push(m.name.clone());
            by_name.insert(m.name.clone(), m);
        }

        let mut dependents: HashMap<Arc<str>, Vec<Arc<str>>> = HashMap::new();
        for name in &order {
            let m = &by_name[name];
            for input in m.inputs() {
                let Some((target_name, target)) = by_name.get_key_value(input.name()) else {
                    if input.is_optional() {
                        continue;
                    }
                    return Err(EngineError::UnknownInput {
                        manifold: name.to_string(),
                        input: input.name().to_string(),
                    });
                };
                if let Some(expected) = input.expects() {
                    let provided = target.output().is_some_and(|out| out.provides(expected));
                    if !provided {
                        return Err(EngineError::IncompatibleInput {
                            manifold: name.to_string(),
                            input: input.name().to_string(),
                            expected: expected.name(),
                        });
                    }
                }
                dependents
                    .entry(target_name.clone())
                    .or_default()
                    .push(name.clone());
            }
        }

        let graph = Self {
            order,
            manifolds: by_name,
            dependents,
        };
        graph.check_acyclic()?;
        Ok(graph)
    }

    /// Manifolds declaring `name` as an input.
    #[cfg(test)]
    fn dependents(&self, name: &str) -> &[Arc<str>] {
        self.dependents.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    fn check_acyclic(&self) -> Result<(), EngineError> {
        let mut marks: HashMap<&str, Mark> =
            self.order.iter().map(|n| (&**n, Mark::Fresh)).collect();
        let mut path: Vec<&str> = Vec::new();
        for name in &self.order {
            self.visit(name, &mut marks, &mut path)?;
        }
        Ok(())
    }

    fn visit<'a>(
        &'a self,
        name: &'a str,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Result<(), EngineError> {
        match marks.get(name).copied() {
            Some(Mark::Done) | None => return Ok(()),
            Some(Mark::OnPath) => {
                let start = path.iter().position(|n| *n == name).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
                cycle.push(name.to_string());
                return Err(EngineError::Cycle { path: cycle });
            }
            Some(Mark::Fresh) => {}
        }

        marks.insert(name, Mark::OnPath);
        path.push(name);
        for input in self.manifolds[name].input_names() {
            self.visit(input, marks, path)?;
        }
        path.pop();
        marks.insert(name, Mark::Done);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::value::{self, ValueWorker};
    use crate::{Manifold, Output, WorkerFn, WorkerRef};

    fn m(name: &str, inputs: &[&str]) -> Manifold {
        inputs.iter().fold(
            Manifold::new(name, |_ctx| async {
                Ok(WorkerRef::new(WorkerFn::spawn(|t| async move {
                    t.cancelled().await;
                    Ok(())
                })))
            }),
            |acc, input| acc.with_input(*input),
        )
    }

    fn err(manifolds: Vec<Manifold>) -> EngineError {
        match Graph::build(manifolds) {
            Ok(_) => panic!("graph unexpectedly valid"),
            Err(e) => e,
        }
    }

    #[test]
    fn records_dependents_in_registration_order() {
        let g = Graph::build(vec![
            m("agent", &[]),
            m("api-caller", &["agent"]),
            m("clock", &[]),
            m("operator", &["api-caller", "clock"]),
            m("logger", &["agent", "api-caller"]),
        ])
        .expect("valid graph");

        assert_eq!(g.order.len(), 5);
        let deps: Vec<&str> = g.dependents("api-caller").iter().map(|n| &**n).collect();
        assert_eq!(deps, vec!["operator", "logger"]);
        assert!(g.dependents("operator").is_empty());
    }

    #[test]
    fn rejects_duplicates_and_unknown_inputs() {
        assert_eq!(
            err(vec![m("a", &[]), m("a", &[])]),
            EngineError::DuplicateManifold { name: "a".into() }
        );
        assert_eq!(
            err(vec![m("a", &["ghost"])]),
            EngineError::UnknownInput {
                manifold: "a".into(),
                input: "ghost".into()
            }
        );
    }

    #[test]
    fn optional_unknown_input_adds_no_edge() {
        let g = Graph::build(vec![m("a", &[]).with_optional_input("ghost")]).expect("valid graph");
        assert!(g.dependents("ghost").is_empty());
    }

    #[test]
    fn reports_cycle_path() {
        assert_eq!(
            err(vec![m("a", &["b"]), m("b", &["c"]), m("c", &["a"])]),
            EngineError::Cycle {
                path: vec!["a".into(), "b".into(), "c".into(), "a".into()]
            }
        );
        assert_eq!(
            err(vec![m("self", &["self"])]),
            EngineError::Cycle {
                path: vec!["self".into(), "self".into()]
            }
        );
    }

    #[test]
    fn checks_typed_inputs_against_outputs() {
        let clock = value::manifold("clock", 5u64);
        let ok = m("user", &[]).with_typed_input::<u64>("clock");
        assert!(Graph::build(vec![clock.clone(), ok]).is_ok());

        let bad = m("user", &[]).with_typed_input::<String>("clock");
        assert!(matches!(
            err(vec![clock.clone(), bad]),
            EngineError::IncompatibleInput { expected, .. } if expected == std::any::type_name::<String>()
        ));

        let no_output = m("user", &[]).with_typed_input::<u64>("plain");
        assert!(matches!(
            err(vec![m("plain", &[]), no_output]),
            EngineError::IncompatibleInput { .. }
        ));

        // Output declared by hand provides the same capability.
        let by_hand = m("hand", &[])
            .with_output(Output::of::<ValueWorker<u64>>().provide(|w: &ValueWorker<u64>| *w.value()));
        let user = m("user", &[]).with_typed_input::<u64>("hand");
        assert!(Graph::build(vec![by_hand, user]).is_ok());
    }
}
