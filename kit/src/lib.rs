//! Rewind facade crate.
//!
//! Re-exports the graph model, the runtime and (behind default features) the
//! process transitions and tracing setup under a single entry point.

pub use rewind_core as core;
#[cfg(feature = "observe")]
pub use rewind_observe as observe;
#[cfg(feature = "process")]
pub use rewind_process as process;
pub use rewind_runtime as runtime;

pub use rewind_core::{StateId, StateKey, Transition, TransitionGraph};
pub use rewind_runtime::{ReachedState, Walker};

pub mod prelude {
    #[cfg(feature = "process")]
    pub use rewind_process::prelude::*;
    pub use rewind_runtime::prelude::*;
}
