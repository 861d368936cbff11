use crate::state::StateKey;
use thiserror::Error;

/// Construction-time graph errors. A failed build never yields a graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("state {state} is produced by more than one transition")]
    ConflictingProduction { state: StateKey },

    #[error("cyclic dependency: {}", format_cycle(.path))]
    CyclicDependency { path: Vec<StateKey> },
}

fn format_cycle(path: &[StateKey]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Errors raised when a derivation looks up one of its dependencies.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DependencyError {
    #[error("dependency {state} was not provided")]
    Missing { state: StateKey },

    #[error("dependency {state} does not hold a value of type {expected}")]
    TypeMismatch {
        state: StateKey,
        expected: &'static str,
    },
}
