//! # ReachedState
//!
//! The handle a walk returns. It keeps the target value, every value the walk
//! could see, and the releases of what the walk materialized. Dropping it (or
//! calling [`ReachedState::release`]) runs those releases in reverse order.
//!
//! Reaching further from a state creates a child that reuses the parent's
//! values and owns only what it materializes itself. A parent cannot be
//! released while one of its children is open.

use crate::cancel::CancelToken;
use crate::error::WalkError;
use crate::scope::Scope;
use crate::walker::{WalkOutcome, run};
use rewind_core::{Dependencies, StateId, StateKey, TransitionGraph};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

pub struct ReachedState<T> {
    target: StateKey,
    value: Arc<T>,
    available: Dependencies,
    graph: TransitionGraph,
    cancel: Option<CancelToken>,
    scope: Arc<Scope>,
}

impl<T: Any + Send + Sync> ReachedState<T> {
    pub(crate) fn from_outcome(
        id: StateId<T>,
        outcome: WalkOutcome,
        graph: TransitionGraph,
        cancel: Option<CancelToken>,
        parent: Option<Arc<Scope>>,
    ) -> Result<Self, WalkError> {
        let value = match outcome.available.get(&id) {
            Ok(value) => value,
            Err(err) => {
                let state = id.into_key();
                return Err(WalkError::TransitionFailed {
                    state,
                    cause: err.into(),
                    rollback: outcome.abandon(),
                });
            }
        };

        let scope = Scope::new(parent, outcome.materialized);
        tracing::debug!(scope = %scope.id(), state = %id, "state reached");
        Ok(Self {
            target: id.into_key(),
            value,
            available: outcome.available,
            graph,
            cancel,
            scope,
        })
    }

    /// The target value. Fails once this state has been released.
    pub fn value(&self) -> Result<&T, WalkError> {
        self.ensure_open()?;
        Ok(self.value.as_ref())
    }

    /// The target value as a shared handle.
    pub fn shared_value(&self) -> Result<Arc<T>, WalkError> {
        self.ensure_open()?;
        Ok(self.value.clone())
    }

    /// Reach `id` from here. The child reuses every value visible to this
    /// state and owns only the transitions it materializes.
    pub async fn reach<U: Any + Send + Sync>(
        &self,
        id: StateId<U>,
    ) -> Result<ReachedState<U>, WalkError> {
        let child = OpenChild::register(&self.scope)?;
        let outcome = run(
            &self.graph,
            &self.available,
            std::slice::from_ref(id.key()),
            self.cancel.as_ref(),
        )
        .await?;
        let reached = ReachedState::from_outcome(
            id,
            outcome,
            self.graph.clone(),
            self.cancel.clone(),
            Some(self.scope.clone()),
        )?;
        child.adopted();
        Ok(reached)
    }

    /// Reach several targets from here in one child walk.
    pub async fn reach_all(
        &self,
        targets: impl IntoIterator<Item = StateKey>,
    ) -> Result<ReachedState<Dependencies>, WalkError> {
        let targets: Vec<StateKey> = targets.into_iter().collect();
        let child = OpenChild::register(&self.scope)?;
        let outcome = run(&self.graph, &self.available, &targets, self.cancel.as_ref()).await?;
        let reached = ReachedState::from_targets(
            &targets,
            outcome,
            self.graph.clone(),
            self.cancel.clone(),
            Some(self.scope.clone()),
        );
        child.adopted();
        Ok(reached)
    }
}

impl ReachedState<Dependencies> {
    pub(crate) fn from_targets(
        targets: &[StateKey],
        outcome: WalkOutcome,
        graph: TransitionGraph,
        cancel: Option<CancelToken>,
        parent: Option<Arc<Scope>>,
    ) -> Self {
        let value = Arc::new(outcome.available.select(targets));
        let scope = Scope::new(parent, outcome.materialized);
        tracing::debug!(scope = %scope.id(), targets = targets.len(), "states reached");
        Self {
            target: StateKey::of::<Dependencies>(),
            value,
            available: outcome.available,
            graph,
            cancel,
            scope,
        }
    }
}

impl<T> ReachedState<T> {
    pub fn target(&self) -> &StateKey {
        &self.target
    }

    /// Any value visible to this state, including those of its ancestors.
    pub fn get<U: Any + Send + Sync>(&self, id: &StateId<U>) -> Result<Arc<U>, WalkError> {
        self.ensure_open()?;
        self.available.get(id).map_err(|_| WalkError::UnknownState {
            state: id.key().clone(),
            required_by: None,
        })
    }

    /// States this walk materialized (not those reused from a parent), in
    /// materialization order. Empty once released.
    pub fn materialized(&self) -> Vec<StateKey> {
        self.scope.states()
    }

    pub fn is_released(&self) -> bool {
        self.scope.is_released()
    }

    /// Release everything this state materialized, newest first.
    ///
    /// Every release is attempted; failures are collected into
    /// [`WalkError::ReleaseFailed`]. A second call fails with
    /// [`WalkError::AlreadyReleased`] and does nothing.
    ///
    /// Releases run synchronously on the calling thread. From async code,
    /// releases that block (stopping a process) belong in
    /// `tokio::task::spawn_blocking` or `tokio::task::block_in_place`.
    pub fn release(&mut self) -> Result<(), WalkError> {
        tracing::debug!(scope = %self.scope.id(), state = %self.target, "releasing reached state");
        self.scope.release()
    }

    fn ensure_open(&self) -> Result<(), WalkError> {
        if self.scope.is_released() {
            Err(WalkError::AlreadyReleased)
        } else {
            Ok(())
        }
    }
}

impl<T> Drop for ReachedState<T> {
    fn drop(&mut self) {
        self.scope.release_on_drop();
    }
}

impl<T> fmt::Debug for ReachedState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReachedState")
            .field("target", &self.target)
            .field("scope", &self.scope.id())
            .field("materialized", &self.scope.states())
            .field("released", &self.scope.is_released())
            .finish()
    }
}

/// A child registered with its parent scope. Unless the child's own scope
/// takes over, dropping this closes the registration again.
struct OpenChild {
    parent: Arc<Scope>,
    adopted: bool,
}

impl OpenChild {
    fn register(parent: &Arc<Scope>) -> Result<Self, WalkError> {
        parent.open_child()?;
        Ok(Self {
            parent: parent.clone(),
            adopted: false,
        })
    }

    fn adopted(mut self) {
        self.adopted = true;
    }
}

impl Drop for OpenChild {
    fn drop(&mut self) {
        if !self.adopted {
            self.parent.close_child();
        }
    }
}
