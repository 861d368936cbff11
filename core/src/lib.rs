//! # Rewind Core
//!
//! Protocol-agnostic building blocks for reversible setup graphs:
//!
//! * [`StateId`] / [`StateKey`]: typed names of values a graph can produce
//! * [`Transition`]: one node, deriving a value from its dependencies
//! * [`TransitionGraph`]: immutable, validated set of transitions
//! * [`DependencyView`]: read-only edges, DOT and [`Schematic`] export
//!
//! Executing a graph lives in `rewind-runtime`.

pub mod error;
pub mod graph;
pub mod schematic;
pub mod state;
pub mod transition;
pub mod view;

pub use error::{DependencyError, GraphError};
pub use graph::TransitionGraph;
pub use schematic::Schematic;
pub use state::{StateId, StateKey};
pub use transition::{
    AnyValue, BoxFuture, Dependencies, Materialization, ReleaseFn, Transition, TransitionBuilder,
    TransitionKind,
};
pub use view::{DependencyEdge, DependencyView};

pub mod prelude {
    pub use crate::error::{DependencyError, GraphError};
    pub use crate::graph::TransitionGraph;
    pub use crate::state::{StateId, StateKey};
    pub use crate::transition::{Dependencies, Materialization, Transition, TransitionKind};
}
