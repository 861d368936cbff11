//! # Rewind Runtime
//!
//! Executes [`TransitionGraph`](rewind_core::TransitionGraph)s.
//!
//! * [`Walker`]: plans and runs the transitions a target needs
//! * [`ReachedState`]: the live result of a walk, released on drop
//! * [`Nested`]: a whole walk packaged as one transition
//! * [`CancelToken`]: stops a walk between or during derivations
//!
//! ```rust,ignore
//! let graph = TransitionGraph::build(transitions)?;
//! let server = Walker::new(graph).reach(states::running_server()).await?;
//! let client = server.reach(states::client_endpoint()).await?;
//! // dropping `client`, then `server`, stops everything in reverse order
//! ```

pub mod cancel;
pub mod error;
pub mod nested;
pub mod reached;
mod scope;
pub mod walker;

pub use cancel::CancelToken;
pub use error::{ReleaseFailure, WalkError};
pub use nested::Nested;
pub use reached::ReachedState;
pub use walker::Walker;

pub mod prelude {
    pub use crate::cancel::CancelToken;
    pub use crate::error::WalkError;
    pub use crate::nested::Nested;
    pub use crate::reached::ReachedState;
    pub use crate::walker::Walker;
    pub use rewind_core::prelude::*;
}
