//! A whole walk wrapped as a single transition.
//!
//! The inner graph is walked when the outer transition derives; the outer
//! requirements are handed to the inner walk as already-reached inputs.
//! Releasing the outer node releases the inner walk.

use crate::walker::Walker;
use rewind_core::{
    DependencyError, Dependencies, Materialization, StateId, StateKey, Transition, TransitionGraph,
    TransitionKind,
};
use std::any::Any;

pub struct Nested<T> {
    graph: TransitionGraph,
    target: StateId<T>,
    produces: StateId<T>,
    inputs: Vec<(StateKey, StateKey)>,
}

impl<T: Any + Send + Sync> Nested<T> {
    /// Reach `target` in `graph`. The outer transition produces the same
    /// state unless [`Nested::produces`] says otherwise.
    pub fn new(graph: TransitionGraph, target: StateId<T>) -> Self {
        Self {
            graph,
            produces: target.clone(),
            target,
            inputs: Vec::new(),
        }
    }

    /// Pass the outer value of `id` to the inner walk under the same state.
    pub fn with_input<I>(self, id: &StateId<I>) -> Self {
        self.with_input_as(id, id)
    }

    /// Pass the outer value of `outer` to the inner walk as `inner`.
    pub fn with_input_as<I>(mut self, outer: &StateId<I>, inner: &StateId<I>) -> Self {
        self.inputs.push((outer.key().clone(), inner.key().clone()));
        self
    }

    pub fn produces(mut self, id: StateId<T>) -> Self {
        self.produces = id;
        self
    }

    pub fn into_transition(self) -> Transition {
        let Nested {
            graph,
            target,
            produces,
            inputs,
        } = self;

        let mut builder = Transition::builder(produces).kind(TransitionKind::Nested);
        for (outer, _) in &inputs {
            builder = builder.requires_key(outer.clone());
        }

        let walker = Walker::new(graph);
        builder.materialize_with(move |deps: Dependencies| {
            let walker = walker.clone();
            let target = target.clone();
            let inner = map_inputs(&inputs, &deps);
            async move {
                let mut reached = walker.reach_with(inner?, target).await?;
                let value = reached.shared_value()?;
                Ok(Materialization::shared(value).with_release(move || {
                    reached.release().map_err(anyhow::Error::from)
                }))
            }
        })
    }
}

impl<T: Any + Send + Sync> From<Nested<T>> for Transition {
    fn from(nested: Nested<T>) -> Self {
        nested.into_transition()
    }
}

fn map_inputs(
    inputs: &[(StateKey, StateKey)],
    outer: &Dependencies,
) -> Result<Dependencies, DependencyError> {
    let mut inner = Dependencies::new();
    for (outer_key, inner_key) in inputs {
        let value = outer
            .get_any(outer_key)
            .ok_or_else(|| DependencyError::Missing {
                state: outer_key.clone(),
            })?;
        inner.insert(inner_key.clone(), value.clone());
    }
    Ok(inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Debug, PartialEq)]
    struct Port(u16);
    #[derive(Debug, PartialEq)]
    struct Server(u16);
    #[derive(Debug, PartialEq)]
    struct Report(String);

    fn inner_graph(log: &Arc<Mutex<Vec<String>>>) -> TransitionGraph {
        let release_log = log.clone();
        TransitionGraph::build([
            Transition::supplied(StateId::of(), Port(1)),
            Transition::builder(StateId::<Server>::of())
                .requires(&StateId::<Port>::of())
                .on_release(move |s: &Server| {
                    release_log.lock().push(format!("stop {}", s.0));
                    Ok(())
                })
                .derive_with(|deps: Dependencies| async move {
                    let port = deps.get(&StateId::<Port>::of())?;
                    Ok(Server(port.0))
                }),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_nested_walk_uses_outer_inputs() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let outer_port = StateId::<Port>::labeled("outer");
        let outer = TransitionGraph::build([
            Transition::supplied(outer_port.clone(), Port(4000)),
            Nested::new(inner_graph(&log), StateId::<Server>::of())
                .with_input_as(&outer_port, &StateId::of())
                .into_transition(),
            Transition::derived(StateId::<Server>::of(), StateId::<Report>::of(), |s: &Server| {
                Ok(Report(format!("server on {}", s.0)))
            }),
        ])
        .unwrap();

        assert_eq!(
            outer.get(&StateKey::of::<Server>()).map(|t| t.kind()),
            Some(TransitionKind::Nested)
        );

        let mut reached = Walker::new(outer)
            .reach(StateId::<Report>::of())
            .await
            .unwrap();
        assert_eq!(reached.value().unwrap(), &Report("server on 4000".into()));
        assert!(log.lock().is_empty());

        reached.release().unwrap();
        assert_eq!(*log.lock(), vec!["stop 4000"]);
    }

    #[tokio::test]
    async fn test_nested_failure_surfaces_inner_cause() {
        let failing = TransitionGraph::build([Transition::builder(StateId::<Server>::of())
            .derive_with(|_deps| async { Err::<Server, _>(anyhow::anyhow!("no binary")) })])
        .unwrap();
        let outer = TransitionGraph::build([Nested::new(failing, StateId::<Server>::of())
            .produces(StateId::labeled("primary"))
            .into_transition()])
        .unwrap();

        let err = Walker::new(outer)
            .reach(StateId::<Server>::labeled("primary"))
            .await
            .unwrap_err();
        assert_eq!(err.failed_state(), Some(&StateKey::labeled::<Server>("primary")));
        assert!(format!("{err}").contains("no binary"));
    }
}
