//! # TransitionGraph
//!
//! An immutable, ordered set of transitions keyed by the state they produce.
//! Every constructor validates the whole graph, so a `TransitionGraph` value is
//! always free of duplicate producers and dependency cycles.
//!
//! Composition never mutates: `union`, `add` and `replace` return new graphs
//! and leave the receiver untouched. Clones share storage.

use crate::error::GraphError;
use crate::state::StateKey;
use crate::transition::Transition;
use crate::view::DependencyView;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct TransitionGraph {
    transitions: Arc<Vec<Transition>>,
    index: Arc<HashMap<StateKey, usize>>,
}

impl TransitionGraph {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Validate and build a graph. Declaration order is kept and used to break
    /// ties when a walk orders independent transitions.
    pub fn build(transitions: impl IntoIterator<Item = Transition>) -> Result<Self, GraphError> {
        let transitions: Vec<Transition> = transitions.into_iter().collect();
        let index = index_by_production(&transitions)?;
        ensure_acyclic(&transitions, &index)?;

        Ok(Self {
            transitions: Arc::new(transitions),
            index: Arc::new(index),
        })
    }

    /// All transitions of both graphs. A transition present on both sides
    /// (same identity) is kept once; two different producers of one state are
    /// a conflict.
    pub fn union(&self, other: &TransitionGraph) -> Result<Self, GraphError> {
        let mut merged = self.transitions.to_vec();
        for transition in other.transitions.iter() {
            match self.index.get(transition.produces()) {
                Some(&existing) if self.transitions[existing].same_as(transition) => {}
                Some(_) => {
                    return Err(GraphError::ConflictingProduction {
                        state: transition.produces().clone(),
                    });
                }
                None => merged.push(transition.clone()),
            }
        }
        Self::build(merged)
    }

    pub fn add(&self, transition: Transition) -> Result<Self, GraphError> {
        self.union(&Self::build([transition])?)
    }

    /// Substitute the producer of `transition.produces()`, keeping its position.
    /// A transition for a state the graph does not produce yet is appended.
    pub fn replace(&self, transition: Transition) -> Result<Self, GraphError> {
        let mut transitions = self.transitions.to_vec();
        match self.index.get(transition.produces()) {
            Some(&position) => {
                tracing::debug!(state = %transition.produces(), "replacing transition");
                transitions[position] = transition;
            }
            None => {
                tracing::debug!(state = %transition.produces(), "replace appends new transition");
                transitions.push(transition);
            }
        }
        Self::build(transitions)
    }

    pub fn get(&self, state: &StateKey) -> Option<&Transition> {
        self.index.get(state).map(|&i| &self.transitions[i])
    }

    /// Declaration index of the producer of `state`.
    pub fn position(&self, state: &StateKey) -> Option<usize> {
        self.index.get(state).copied()
    }

    pub fn produces(&self, state: &StateKey) -> bool {
        self.index.contains_key(state)
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    /// Read-only view of the dependency edges, for diagnostics.
    pub fn dependency_view(&self) -> DependencyView<'_> {
        DependencyView::new(self)
    }
}

impl std::fmt::Debug for TransitionGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.transitions.iter()).finish()
    }
}

fn index_by_production(transitions: &[Transition]) -> Result<HashMap<StateKey, usize>, GraphError> {
    let mut index = HashMap::with_capacity(transitions.len());
    for (position, transition) in transitions.iter().enumerate() {
        if index.insert(transition.produces().clone(), position).is_some() {
            return Err(GraphError::ConflictingProduction {
                state: transition.produces().clone(),
            });
        }
    }
    Ok(index)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

fn ensure_acyclic(
    transitions: &[Transition],
    index: &HashMap<StateKey, usize>,
) -> Result<(), GraphError> {
    let mut marks = vec![Mark::Unvisited; transitions.len()];
    let mut path = Vec::new();
    for start in 0..transitions.len() {
        visit(start, transitions, index, &mut marks, &mut path)?;
    }
    Ok(())
}

fn visit(
    node: usize,
    transitions: &[Transition],
    index: &HashMap<StateKey, usize>,
    marks: &mut [Mark],
    path: &mut Vec<usize>,
) -> Result<(), GraphError> {
    match marks[node] {
        Mark::Done => return Ok(()),
        Mark::InProgress => {
            // `node` is on the current path: the path from it back to here is the cycle.
            let from = path.iter().position(|&p| p == node).unwrap_or(0);
            let mut cycle: Vec<StateKey> = path[from..]
                .iter()
                .map(|&p| transitions[p].produces().clone())
                .collect();
            cycle.push(transitions[node].produces().clone());
            return Err(GraphError::CyclicDependency { path: cycle });
        }
        Mark::Unvisited => {}
    }

    marks[node] = Mark::InProgress;
    path.push(node);
    for required in transitions[node].requires() {
        if let Some(&dependency) = index.get(required) {
            visit(dependency, transitions, index, marks, path)?;
        }
    }
    path.pop();
    marks[node] = Mark::Done;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateId;

    #[derive(Debug)]
    struct A;
    #[derive(Debug)]
    struct B;
    #[derive(Debug)]
    struct C;

    fn a() -> StateId<A> {
        StateId::of()
    }
    fn b() -> StateId<B> {
        StateId::of()
    }
    fn c() -> StateId<C> {
        StateId::of()
    }

    #[test]
    fn test_build_rejects_duplicate_producer() {
        let err = TransitionGraph::build([
            Transition::supplied(a(), A),
            Transition::supplied(a(), A),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            GraphError::ConflictingProduction {
                state: a().into_key()
            }
        );
    }

    #[test]
    fn test_build_rejects_self_loop() {
        let looped = Transition::builder(a())
            .requires(&a())
            .derive_with(|_| async { Ok(A) });
        let err = TransitionGraph::build([looped]).unwrap_err();
        assert!(matches!(err, GraphError::CyclicDependency { ref path } if path.len() == 2));
    }

    #[test]
    fn test_build_rejects_indirect_cycle() {
        let graph = TransitionGraph::build([
            Transition::derived(c(), a(), |_| Ok(A)),
            Transition::derived(a(), b(), |_| Ok(B)),
            Transition::derived(b(), c(), |_| Ok(C)),
        ]);
        match graph {
            Err(GraphError::CyclicDependency { path }) => {
                assert_eq!(path.len(), 4);
                assert_eq!(path.first(), path.last());
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_unresolved_requirements_are_allowed() {
        let graph = TransitionGraph::build([Transition::derived(a(), b(), |_| Ok(B))]).unwrap();
        assert!(graph.produces(b().key()));
        assert!(!graph.produces(a().key()));
    }

    #[test]
    fn test_union_keeps_shared_transition_once() {
        let shared = Transition::supplied(a(), A);
        let left = TransitionGraph::build([shared.clone()]).unwrap();
        let right =
            TransitionGraph::build([shared, Transition::derived(a(), b(), |_| Ok(B))]).unwrap();

        let merged = left.union(&right).unwrap();
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_union_rejects_different_producers() {
        let left = TransitionGraph::build([Transition::supplied(a(), A)]).unwrap();
        let right = TransitionGraph::build([Transition::supplied(a(), A)]).unwrap();
        assert!(matches!(
            left.union(&right),
            Err(GraphError::ConflictingProduction { .. })
        ));
    }

    #[test]
    fn test_union_detects_cycle_across_graphs() {
        let left = TransitionGraph::build([Transition::derived(b(), a(), |_| Ok(A))]).unwrap();
        let right = TransitionGraph::build([Transition::derived(a(), b(), |_| Ok(B))]).unwrap();
        assert!(matches!(
            left.union(&right),
            Err(GraphError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn test_replace_keeps_position_and_original() {
        let original = TransitionGraph::build([
            Transition::supplied(a(), A),
            Transition::derived(a(), b(), |_| Ok(B)),
        ])
        .unwrap();
        let replacement = Transition::supplied(a(), A);
        let replaced = original.replace(replacement.clone()).unwrap();

        assert_eq!(replaced.position(a().key()), Some(0));
        assert!(replaced.get(a().key()).unwrap().same_as(&replacement));
        assert!(!original.get(a().key()).unwrap().same_as(&replacement));
    }

    #[test]
    fn test_replace_appends_missing_state() {
        let graph = TransitionGraph::build([Transition::derived(a(), b(), |_| Ok(B))]).unwrap();
        let graph = graph.replace(Transition::supplied(a(), A)).unwrap();
        assert_eq!(graph.position(a().key()), Some(1));
    }

    #[test]
    fn test_add_rejects_existing_state() {
        let graph = TransitionGraph::build([Transition::supplied(a(), A)]).unwrap();
        assert!(graph.add(Transition::supplied(a(), A)).is_err());
        assert_eq!(graph.add(Transition::supplied(c(), C)).unwrap().len(), 2);
    }
}
