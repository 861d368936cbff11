//! Release bookkeeping shared between a reached state and its children.
//!
//! A `Scope` owns the release actions of the transitions one walk
//! materialized. Children hold an `Arc` to their parent's scope only to keep
//! the open-child count: release authority never flows upward.

use crate::error::{ReleaseFailure, WalkError};
use parking_lot::Mutex;
use rewind_core::{ReleaseFn, StateKey};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use uuid::Uuid;

pub(crate) struct Materialized {
    pub(crate) state: StateKey,
    pub(crate) release: Option<ReleaseFn>,
}

#[derive(Default)]
struct ScopeInner {
    materialized: Vec<Materialized>,
    open_children: usize,
    released: bool,
    /// Dropped while children were open; release when the last one closes.
    release_on_last_child: bool,
}

pub(crate) struct Scope {
    id: Uuid,
    parent: Option<Arc<Scope>>,
    inner: Mutex<ScopeInner>,
}

impl Scope {
    pub(crate) fn new(parent: Option<Arc<Scope>>, materialized: Vec<Materialized>) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            parent,
            inner: Mutex::new(ScopeInner {
                materialized,
                ..Default::default()
            }),
        })
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn is_released(&self) -> bool {
        self.inner.lock().released
    }

    pub(crate) fn states(&self) -> Vec<StateKey> {
        self.inner
            .lock()
            .materialized
            .iter()
            .map(|m| m.state.clone())
            .collect()
    }

    /// Register a child walk before it starts. Fails once released.
    pub(crate) fn open_child(&self) -> Result<(), WalkError> {
        let mut inner = self.inner.lock();
        if inner.released {
            return Err(WalkError::AlreadyReleased);
        }
        inner.open_children += 1;
        Ok(())
    }

    /// A child walk failed or its state was released.
    pub(crate) fn close_child(self: &Arc<Self>) {
        let deferred = {
            let mut inner = self.inner.lock();
            inner.open_children = inner.open_children.saturating_sub(1);
            inner.open_children == 0 && inner.release_on_last_child && !inner.released
        };

        if deferred {
            tracing::debug!(scope = %self.id, "last child closed, running deferred release");
            if let Err(err) = self.release() {
                tracing::error!(scope = %self.id, error = %err, "deferred release failed");
            }
        }
    }

    /// Run every release in reverse materialization order.
    pub(crate) fn release(self: &Arc<Self>) -> Result<(), WalkError> {
        let materialized = {
            let mut inner = self.inner.lock();
            if inner.released {
                return Err(WalkError::AlreadyReleased);
            }
            if inner.open_children > 0 {
                return Err(WalkError::ParentReleasedBeforeChild {
                    open_children: inner.open_children,
                });
            }
            inner.released = true;
            std::mem::take(&mut inner.materialized)
        };

        let failures = release_all(materialized);

        if let Some(parent) = &self.parent {
            parent.close_child();
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(WalkError::ReleaseFailed(failures))
        }
    }

    /// Release on drop of the owning reached state. With open children the
    /// release is deferred until the last child closes.
    pub(crate) fn release_on_drop(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock();
            if inner.released {
                return;
            }
            if inner.open_children > 0 {
                tracing::warn!(
                    scope = %self.id,
                    open_children = inner.open_children,
                    "reached state dropped with open children, deferring release"
                );
                inner.release_on_last_child = true;
                return;
            }
        }

        match self.release() {
            Ok(()) => {}
            Err(WalkError::ReleaseFailed(failures)) => {
                for failure in &failures {
                    tracing::error!(
                        scope = %self.id,
                        state = %failure.state,
                        error = %failure.error,
                        "release failed on drop"
                    );
                }
            }
            Err(err) => tracing::error!(scope = %self.id, error = %err, "release on drop failed"),
        }
    }
}

/// Release `materialized` in reverse order. Every entry gets its attempt even
/// when an earlier one fails or panics.
pub(crate) fn release_all(materialized: Vec<Materialized>) -> Vec<ReleaseFailure> {
    let mut failures = Vec::new();
    for Materialized { state, release } in materialized.into_iter().rev() {
        let Some(release) = release else {
            tracing::trace!(state = %state, "nothing to release");
            continue;
        };

        tracing::debug!(state = %state, "releasing");
        let outcome = catch_unwind(AssertUnwindSafe(release)).unwrap_or_else(|panic| {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "release panicked".to_string());
            Err(anyhow::anyhow!("panic: {message}"))
        });

        if let Err(error) = outcome {
            tracing::warn!(state = %state, error = %error, "release failed");
            failures.push(ReleaseFailure { state, error });
        }
    }
    failures
}
