//! # Walker
//!
//! Reaches target states of a [`TransitionGraph`]:
//!
//! 1. plan the minimal set of transitions the targets transitively need,
//! 2. order them topologically (ties broken by declaration order),
//! 3. derive each one exactly once, handing it the values of its requirements,
//! 4. on failure or cancellation, release what this walk materialized in
//!    reverse order before reporting the error.
//!
//! Walks run their transitions sequentially.

use crate::cancel::CancelToken;
use crate::error::{ReleaseFailure, WalkError};
use crate::reached::ReachedState;
use crate::scope::{Materialized, release_all};
use rewind_core::{
    DependencyError, Dependencies, Materialization, StateId, StateKey, Transition, TransitionGraph,
};
use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use tracing::Instrument;

/// Entry point for reaching states of one graph.
#[derive(Clone, Debug)]
pub struct Walker {
    graph: TransitionGraph,
    cancel: Option<CancelToken>,
}

impl Walker {
    pub fn new(graph: TransitionGraph) -> Self {
        Self {
            graph,
            cancel: None,
        }
    }

    /// Observe `token` between and during derivations. States reached from the
    /// resulting [`ReachedState`]s inherit the token.
    pub fn with_cancellation(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn graph(&self) -> &TransitionGraph {
        &self.graph
    }

    /// Order in which a walk to `targets` would derive its transitions.
    pub fn plan<'a>(
        &self,
        targets: impl IntoIterator<Item = &'a StateKey>,
    ) -> Result<Vec<StateKey>, WalkError> {
        let targets: Vec<StateKey> = targets.into_iter().cloned().collect();
        let order = plan(&self.graph, &Dependencies::new(), &targets)?;
        Ok(order
            .into_iter()
            .map(|p| self.graph.transitions()[p].produces().clone())
            .collect())
    }

    pub async fn reach<T: Any + Send + Sync>(
        &self,
        id: StateId<T>,
    ) -> Result<ReachedState<T>, WalkError> {
        self.reach_with(Dependencies::new(), id).await
    }

    /// Reach `id` treating the values in `inputs` as already materialized.
    /// Transitions producing those states are not derived and inputs are
    /// never released by this walk.
    pub async fn reach_with<T: Any + Send + Sync>(
        &self,
        inputs: Dependencies,
        id: StateId<T>,
    ) -> Result<ReachedState<T>, WalkError> {
        let outcome = run(
            &self.graph,
            &inputs,
            std::slice::from_ref(id.key()),
            self.cancel.as_ref(),
        )
        .await?;
        ReachedState::from_outcome(id, outcome, self.graph.clone(), self.cancel.clone(), None)
    }

    /// Reach several targets in one walk. The value of the returned state maps
    /// each target to its value.
    pub async fn reach_all(
        &self,
        targets: impl IntoIterator<Item = StateKey>,
    ) -> Result<ReachedState<Dependencies>, WalkError> {
        let targets: Vec<StateKey> = targets.into_iter().collect();
        let outcome = run(&self.graph, &Dependencies::new(), &targets, self.cancel.as_ref()).await?;
        Ok(ReachedState::from_targets(
            &targets,
            outcome,
            self.graph.clone(),
            self.cancel.clone(),
            None,
        ))
    }
}

/// What a successful walk leaves behind: every value visible to the walk
/// (base plus new ones) and the new ones with their releases, in
/// materialization order.
pub(crate) struct WalkOutcome {
    pub(crate) available: Dependencies,
    pub(crate) materialized: Vec<Materialized>,
}

impl WalkOutcome {
    /// Give up on the outcome, releasing what the walk materialized.
    pub(crate) fn abandon(self) -> Vec<ReleaseFailure> {
        release_all(self.materialized)
    }
}

pub(crate) async fn run(
    graph: &TransitionGraph,
    base: &Dependencies,
    targets: &[StateKey],
    cancel: Option<&CancelToken>,
) -> Result<WalkOutcome, WalkError> {
    let span = tracing::info_span!("walk", targets = ?targets);
    execute(graph, base, targets, cancel).instrument(span).await
}

async fn execute(
    graph: &TransitionGraph,
    base: &Dependencies,
    targets: &[StateKey],
    cancel: Option<&CancelToken>,
) -> Result<WalkOutcome, WalkError> {
    let order = plan(graph, base, targets)?;
    tracing::debug!(transitions = order.len(), "walk planned");

    let mut available = base.clone();
    let mut pending = Pending::default();

    for position in order {
        let transition = &graph.transitions()[position];
        let state = transition.produces().clone();

        if cancel.is_some_and(CancelToken::is_cancelled) {
            tracing::info!(pending = %state, "walk cancelled");
            return Err(WalkError::Cancelled {
                pending: state,
                rollback: pending.rollback(),
            });
        }

        let deps = available.select(transition.requires());
        let span = tracing::debug_span!("transition", state = %state, kind = ?transition.kind());
        let derived = derive(transition, deps, cancel).instrument(span).await;

        let materialization = match derived {
            Derived::Cancelled => {
                tracing::info!(pending = %state, "walk cancelled during derivation");
                return Err(WalkError::Cancelled {
                    pending: state,
                    rollback: pending.rollback(),
                });
            }
            Derived::Failed(cause) => {
                tracing::warn!(
                    state = %state,
                    error = %format!("{cause:#}"),
                    "transition failed, rolling back"
                );
                return Err(WalkError::TransitionFailed {
                    state,
                    cause,
                    rollback: pending.rollback(),
                });
            }
            Derived::Done(materialization) => materialization,
        };

        let (value, release) = materialization.into_parts();
        if (*value).type_id() != state.type_id() {
            let cause = DependencyError::TypeMismatch {
                state: state.clone(),
                expected: state.qualified_type_name(),
            };
            // The value never reaches a dependent, but whatever it holds
            // still has to be let go.
            let mut rollback = release_all(vec![Materialized {
                state: state.clone(),
                release,
            }]);
            rollback.extend(pending.rollback());
            return Err(WalkError::TransitionFailed {
                state,
                cause: cause.into(),
                rollback,
            });
        }

        tracing::debug!(state = %state, releasable = release.is_some(), "materialized");
        available.insert(state.clone(), value);
        pending.push(Materialized { state, release });
    }

    let materialized = pending.finish();
    tracing::debug!(materialized = materialized.len(), "walk complete");
    Ok(WalkOutcome {
        available,
        materialized,
    })
}

enum Derived {
    Done(Materialization),
    Failed(anyhow::Error),
    Cancelled,
}

async fn derive(
    transition: &Transition,
    deps: Dependencies,
    cancel: Option<&CancelToken>,
) -> Derived {
    let derivation = transition.derive(deps);
    let result = match cancel {
        None => derivation.await,
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => return Derived::Cancelled,
            result = derivation => result,
        },
    };
    match result {
        Ok(materialization) => Derived::Done(materialization),
        Err(cause) => Derived::Failed(cause),
    }
}

/// Materialized entries of a walk still in progress. Dropping it (because
/// the walk future was dropped) releases them.
#[derive(Default)]
struct Pending {
    materialized: Vec<Materialized>,
}

impl Pending {
    fn push(&mut self, entry: Materialized) {
        self.materialized.push(entry);
    }

    fn rollback(&mut self) -> Vec<ReleaseFailure> {
        let materialized = std::mem::take(&mut self.materialized);
        if !materialized.is_empty() {
            tracing::debug!(count = materialized.len(), "rolling back");
        }
        release_all(materialized)
    }

    fn finish(mut self) -> Vec<Materialized> {
        std::mem::take(&mut self.materialized)
    }
}

impl Drop for Pending {
    fn drop(&mut self) {
        if self.materialized.is_empty() {
            return;
        }
        tracing::warn!(count = self.materialized.len(), "walk abandoned, releasing");
        for failure in self.rollback() {
            tracing::error!(state = %failure.state, error = %failure.error, "release failed");
        }
    }
}

/// Positions of the transitions needed for `targets`, in execution order.
/// States present in `base` are treated as reached and not planned.
fn plan(
    graph: &TransitionGraph,
    base: &Dependencies,
    targets: &[StateKey],
) -> Result<Vec<usize>, WalkError> {
    let transitions = graph.transitions();

    let mut needed = BTreeSet::new();
    let mut stack: Vec<(StateKey, Option<StateKey>)> =
        targets.iter().rev().map(|t| (t.clone(), None)).collect();
    while let Some((state, required_by)) = stack.pop() {
        if base.contains(&state) {
            continue;
        }
        let Some(position) = graph.position(&state) else {
            return Err(WalkError::UnknownState { state, required_by });
        };
        if !needed.insert(position) {
            continue;
        }
        for required in transitions[position].requires() {
            stack.push((required.clone(), Some(state.clone())));
        }
    }

    // Kahn's algorithm; `ready` pops the lowest declaration index first.
    let mut waiting: HashMap<usize, usize> = HashMap::with_capacity(needed.len());
    let mut dependents: HashMap<usize, Vec<usize>> = HashMap::new();
    for &position in &needed {
        let mut count = 0;
        for required in transitions[position].requires() {
            if base.contains(required) {
                continue;
            }
            if let Some(dependency) = graph.position(required) {
                count += 1;
                dependents.entry(dependency).or_default().push(position);
            }
        }
        waiting.insert(position, count);
    }

    let mut ready: BTreeSet<usize> = waiting
        .iter()
        .filter(|&(_, &count)| count == 0)
        .map(|(&position, _)| position)
        .collect();
    let mut order = Vec::with_capacity(needed.len());
    while let Some(position) = ready.pop_first() {
        order.push(position);
        for dependent in dependents.get(&position).into_iter().flatten() {
            if let Some(count) = waiting.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug)]
    struct A(u32);
    #[derive(Debug)]
    struct B(u32);
    #[derive(Debug)]
    struct C(u32);
    #[derive(Debug)]
    struct D(u32);

    type Log = Arc<Mutex<Vec<String>>>;

    fn logged<T: Any + Send + Sync>(
        id: StateId<T>,
        requires: &[StateKey],
        log: &Log,
        make: fn(u32) -> T,
    ) -> Transition {
        let name = id.to_string();
        let derive_log = log.clone();
        let release_log = log.clone();
        let release_name = name.clone();
        let mut builder = Transition::builder(id);
        for key in requires {
            builder = builder.requires_key(key.clone());
        }
        builder
            .on_release(move |_: &T| {
                release_log.lock().push(format!("release {release_name}"));
                Ok(())
            })
            .derive_with(move |deps: Dependencies| {
                derive_log.lock().push(format!("derive {name}"));
                let value = make(deps.len() as u32);
                async move { Ok(value) }
            })
    }

    fn diamond(log: &Log) -> TransitionGraph {
        let a = StateId::<A>::of();
        let b = StateId::<B>::of();
        let c = StateId::<C>::of();
        let d = StateId::<D>::of();
        TransitionGraph::build([
            logged(d.clone(), &[b.key().clone(), c.key().clone()], log, D),
            logged(c.clone(), &[a.key().clone()], log, C),
            logged(b.clone(), &[a.key().clone()], log, B),
            logged(a, &[], log, A),
        ])
        .unwrap()
    }

    #[test]
    fn test_plan_orders_dependencies_first_with_declaration_ties() {
        let log = Log::default();
        let walker = Walker::new(diamond(&log));
        let order = walker.plan([StateId::<D>::of().key()]).unwrap();
        let names: Vec<String> = order.iter().map(ToString::to_string).collect();
        // A is the only root; C is declared before B.
        assert_eq!(names, vec!["A", "C", "B", "D"]);
    }

    #[test]
    fn test_plan_is_minimal() {
        let log = Log::default();
        let walker = Walker::new(diamond(&log));
        let order = walker.plan([StateId::<B>::of().key()]).unwrap();
        assert_eq!(order, vec![StateKey::of::<A>(), StateKey::of::<B>()]);
    }

    #[test]
    fn test_plan_reports_unknown_requirement() {
        let graph = TransitionGraph::build([Transition::derived(
            StateId::<A>::of(),
            StateId::<B>::of(),
            |a: &A| Ok(B(a.0)),
        )])
        .unwrap();
        let err = Walker::new(graph)
            .plan([StateId::<B>::of().key()])
            .unwrap_err();
        match err {
            WalkError::UnknownState { state, required_by } => {
                assert_eq!(state, StateKey::of::<A>());
                assert_eq!(required_by, Some(StateKey::of::<B>()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_failure_rolls_back_in_reverse() {
        let log = Log::default();
        let failing = Transition::builder(StateId::<D>::of())
            .requires(&StateId::<B>::of())
            .requires(&StateId::<C>::of())
            .derive_with(|_deps| async { Err::<D, _>(anyhow::anyhow!("disk full")) });
        let graph = diamond(&log).replace(failing).unwrap();

        let err = Walker::new(graph)
            .reach(StateId::<D>::of())
            .await
            .unwrap_err();

        assert_eq!(err.failed_state(), Some(&StateKey::of::<D>()));
        assert_eq!(
            *log.lock(),
            vec![
                "derive A", "derive C", "derive B", "release B", "release C", "release A"
            ]
        );
    }

    #[tokio::test]
    async fn test_mismatched_value_type_fails_the_transition() {
        let wrong = Transition::builder(StateId::<A>::of())
            .materialize_with(|_deps| async { Ok(Materialization::new(B(1))) });
        let graph = TransitionGraph::build([wrong]).unwrap();

        let err = Walker::new(graph)
            .reach(StateId::<A>::of())
            .await
            .unwrap_err();
        assert!(err.cause_downcast::<DependencyError>().is_some());
    }

    #[tokio::test]
    async fn test_cancel_during_derivation_rolls_back() {
        let log = Log::default();
        let slow = Transition::builder(StateId::<B>::of())
            .requires(&StateId::<A>::of())
            .derive_with(|_deps| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(B(0))
            });
        let graph =
            TransitionGraph::build([logged(StateId::<A>::of(), &[], &log, A), slow]).unwrap();

        let token = CancelToken::new();
        let walker = Walker::new(graph).with_cancellation(token.clone());
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let err = walker.reach(StateId::<B>::of()).await.unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(
            err,
            WalkError::Cancelled { ref pending, .. } if *pending == StateKey::of::<B>()
        ));
        assert_eq!(*log.lock(), vec!["derive A", "release A"]);
    }

    #[tokio::test]
    async fn test_cancelled_token_prevents_any_derivation() {
        let log = Log::default();
        let token = CancelToken::new();
        token.cancel();

        let err = Walker::new(diamond(&log))
            .with_cancellation(token)
            .reach(StateId::<D>::of())
            .await
            .unwrap_err();

        assert!(matches!(err, WalkError::Cancelled { .. }));
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_walk_releases_materialized() {
        let log = Log::default();
        let stuck = Transition::builder(StateId::<B>::of())
            .requires(&StateId::<A>::of())
            .derive_with(|_deps| std::future::pending::<anyhow::Result<B>>());
        let graph =
            TransitionGraph::build([logged(StateId::<A>::of(), &[], &log, A), stuck]).unwrap();
        let walker = Walker::new(graph);

        let timed_out =
            tokio::time::timeout(Duration::from_millis(20), walker.reach(StateId::<B>::of())).await;

        assert!(timed_out.is_err());
        assert_eq!(*log.lock(), vec!["derive A", "release A"]);
    }
}
