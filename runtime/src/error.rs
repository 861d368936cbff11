use rewind_core::StateKey;
use std::fmt;
use thiserror::Error;

/// A release that returned an error (or panicked) during teardown.
#[derive(Debug)]
pub struct ReleaseFailure {
    pub state: StateKey,
    pub error: anyhow::Error,
}

impl fmt::Display for ReleaseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "release of {} failed: {:#}", self.state, self.error)
    }
}

#[derive(Error, Debug)]
pub enum WalkError {
    #[error("no transition produces state {state}{}", required_by_suffix(.required_by))]
    UnknownState {
        state: StateKey,
        required_by: Option<StateKey>,
    },

    /// A derivation failed. Everything the walk had materialized was released
    /// before this error was returned; failures of those releases are in
    /// `rollback`.
    #[error("transition for {state} failed: {cause:#}{}", rollback_suffix(.rollback))]
    TransitionFailed {
        state: StateKey,
        cause: anyhow::Error,
        rollback: Vec<ReleaseFailure>,
    },

    #[error("walk cancelled before {pending} could be reached{}", rollback_suffix(.rollback))]
    Cancelled {
        pending: StateKey,
        rollback: Vec<ReleaseFailure>,
    },

    #[error("reached state was already released")]
    AlreadyReleased,

    #[error("cannot release while {open_children} child state(s) are still open")]
    ParentReleasedBeforeChild { open_children: usize },

    #[error("{} release(s) failed: {}", .0.len(), join_failures(.0))]
    ReleaseFailed(Vec<ReleaseFailure>),
}

impl WalkError {
    /// Release failures attached to this error.
    pub fn release_failures(&self) -> &[ReleaseFailure] {
        match self {
            WalkError::TransitionFailed { rollback, .. }
            | WalkError::Cancelled { rollback, .. } => rollback,
            WalkError::ReleaseFailed(failures) => failures,
            _ => &[],
        }
    }

    /// State whose derivation failed, if this is a `TransitionFailed`.
    pub fn failed_state(&self) -> Option<&StateKey> {
        match self {
            WalkError::TransitionFailed { state, .. } => Some(state),
            _ => None,
        }
    }

    /// Find an error of type `E` in the cause chain of a failed transition.
    ///
    /// ```rust,ignore
    /// match err.cause_downcast::<ProcessError>() {
    ///     Some(ProcessError::PortUnavailable { .. }) => retry_with_other_port(),
    ///     _ => return Err(err.into()),
    /// }
    /// ```
    pub fn cause_downcast<E>(&self) -> Option<&E>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        match self {
            WalkError::TransitionFailed { cause, .. } => {
                cause.chain().find_map(|err| err.downcast_ref::<E>())
            }
            _ => None,
        }
    }
}

fn required_by_suffix(required_by: &Option<StateKey>) -> String {
    match required_by {
        Some(key) => format!(" (required by {key})"),
        None => String::new(),
    }
}

fn rollback_suffix(rollback: &[ReleaseFailure]) -> String {
    if rollback.is_empty() {
        String::new()
    } else {
        format!("; rollback: {}", join_failures(rollback))
    }
}

fn join_failures(failures: &[ReleaseFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
