//! # Transition: one node of a transition graph
//!
//! A `Transition` declares the state it produces, the states it requires and an
//! async derivation from the required values to its own value. A derivation may
//! register a release that undoes whatever it acquired; the walker runs it
//! exactly once, in reverse materialization order.
//!
//! Two shapes recur often enough to have named constructors:
//!
//! * [`Transition::supplied`]: no requirements, returns a caller-provided value.
//! * [`Transition::derived`]: one requirement, pure mapping to a new value.

use crate::error::DependencyError;
use crate::state::{StateId, StateKey};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

/// Type alias for async boxed futures used by derivations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A materialized value, shared between the reached state and its dependents.
pub type AnyValue = Arc<dyn Any + Send + Sync>;

/// Release action bound to one materialized value. Runs at most once.
pub type ReleaseFn = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

type Deriver =
    Arc<dyn Fn(Dependencies) -> BoxFuture<'static, anyhow::Result<Materialization>> + Send + Sync>;

type TypedRelease<T> = Arc<dyn Fn(&T) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionKind {
    /// Caller-provided constant
    Supplied,
    /// Pure mapping of a single dependency
    Derived,
    /// Pure mapping of two dependencies
    Joined,
    /// A whole inner walk wrapped as one node
    Nested,
    /// Anything built with [`TransitionBuilder`]
    Custom,
}

/// Dependency values handed to a derivation.
#[derive(Clone, Default)]
pub struct Dependencies {
    values: HashMap<StateKey, AnyValue>,
}

impl Dependencies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: StateKey, value: AnyValue) {
        self.values.insert(key, value);
    }

    /// Typed lookup of a dependency value.
    pub fn get<T: Any + Send + Sync>(&self, id: &StateId<T>) -> Result<Arc<T>, DependencyError> {
        let value = self
            .values
            .get(id.key())
            .ok_or_else(|| DependencyError::Missing {
                state: id.key().clone(),
            })?;

        value
            .clone()
            .downcast::<T>()
            .map_err(|_| DependencyError::TypeMismatch {
                state: id.key().clone(),
                expected: id.key().qualified_type_name(),
            })
    }

    pub fn get_any(&self, key: &StateKey) -> Option<&AnyValue> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &StateKey) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &StateKey> {
        self.values.keys()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Copy of the entries for `keys`; keys without a value are skipped.
    pub fn select<'a>(&self, keys: impl IntoIterator<Item = &'a StateKey>) -> Dependencies {
        let values = keys
            .into_iter()
            .filter_map(|key| self.values.get(key).map(|v| (key.clone(), v.clone())))
            .collect();
        Dependencies { values }
    }

    /// Merge `other` into `self`; entries of `other` win.
    pub fn extend(&mut self, other: &Dependencies) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
    }
}

impl fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.values.keys().collect();
        keys.sort();
        f.debug_struct("Dependencies").field("keys", &keys).finish()
    }
}

/// The outcome of one derivation: the value plus an optional release.
pub struct Materialization {
    value: AnyValue,
    release: Option<ReleaseFn>,
}

impl Materialization {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::shared(Arc::new(value))
    }

    pub fn shared<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            value,
            release: None,
        }
    }

    pub fn with_release<R>(mut self, release: R) -> Self
    where
        R: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.release = Some(Box::new(release));
        self
    }

    pub fn value(&self) -> &AnyValue {
        &self.value
    }

    pub fn has_release(&self) -> bool {
        self.release.is_some()
    }

    pub fn into_parts(self) -> (AnyValue, Option<ReleaseFn>) {
        (self.value, self.release)
    }
}

impl fmt::Debug for Materialization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Materialization")
            .field("has_release", &self.release.is_some())
            .finish()
    }
}

/// A node of a [`TransitionGraph`](crate::graph::TransitionGraph).
///
/// Cloning is cheap and keeps the identity: two clones are the same transition
/// for [`TransitionGraph::union`](crate::graph::TransitionGraph::union).
#[derive(Clone)]
pub struct Transition {
    id: Uuid,
    kind: TransitionKind,
    produces: StateKey,
    requires: Vec<StateKey>,
    deriver: Deriver,
}

impl Transition {
    /// A transition without requirements that yields `value` on every walk.
    pub fn supplied<T: Any + Send + Sync>(id: StateId<T>, value: T) -> Self {
        Self::supplied_shared(id, Arc::new(value))
    }

    /// Like [`Transition::supplied`], sharing an existing allocation.
    pub fn supplied_shared<T: Any + Send + Sync>(id: StateId<T>, value: Arc<T>) -> Self {
        Self::builder(id)
            .kind(TransitionKind::Supplied)
            .materialize_with(move |_deps| {
                std::future::ready(Ok::<_, anyhow::Error>(Materialization::shared(value.clone())))
            })
    }

    /// A transition with exactly one requirement and a pure mapping.
    ///
    /// The mapping must not acquire anything that needs releasing; use
    /// [`Transition::builder`] with `on_release` for that.
    pub fn derived<A, T, F>(from: StateId<A>, to: StateId<T>, map: F) -> Self
    where
        A: Any + Send + Sync,
        T: Any + Send + Sync,
        F: Fn(&A) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self::builder(to)
            .kind(TransitionKind::Derived)
            .requires(&from)
            .derive_with(move |deps: Dependencies| {
                let result = deps
                    .get(&from)
                    .map_err(anyhow::Error::from)
                    .and_then(|a| map(a.as_ref()));
                std::future::ready(result)
            })
    }

    /// A transition with two requirements and a pure mapping.
    pub fn joined<A, B, T, F>(first: StateId<A>, second: StateId<B>, to: StateId<T>, map: F) -> Self
    where
        A: Any + Send + Sync,
        B: Any + Send + Sync,
        T: Any + Send + Sync,
        F: Fn(&A, &B) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self::builder(to)
            .kind(TransitionKind::Joined)
            .requires(&first)
            .requires(&second)
            .derive_with(move |deps: Dependencies| {
                let result = deps
                    .get(&first)
                    .and_then(|a| deps.get(&second).map(|b| (a, b)))
                    .map_err(anyhow::Error::from)
                    .and_then(|(a, b)| map(a.as_ref(), b.as_ref()));
                std::future::ready(result)
            })
    }

    pub fn builder<T: Any + Send + Sync>(produces: StateId<T>) -> TransitionBuilder<T> {
        TransitionBuilder {
            produces,
            kind: TransitionKind::Custom,
            requires: Vec::new(),
            release: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> TransitionKind {
        self.kind
    }

    pub fn produces(&self) -> &StateKey {
        &self.produces
    }

    pub fn requires(&self) -> &[StateKey] {
        &self.requires
    }

    /// Whether `other` is this transition (or a clone of it).
    pub fn same_as(&self, other: &Transition) -> bool {
        self.id == other.id
    }

    /// Run the derivation. `deps` must hold every required value.
    pub fn derive(
        &self,
        deps: Dependencies,
    ) -> BoxFuture<'static, anyhow::Result<Materialization>> {
        (self.deriver)(deps)
    }
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("produces", &self.produces)
            .field("requires", &self.requires)
            .finish()
    }
}

/// Builder for transitions with arbitrary requirements and an optional release.
///
/// ```rust,ignore
/// let server = Transition::builder(states::running_server())
///     .requires(&states::endpoint())
///     .on_release(|server: &RunningServer| server.stop().map(|_| ()).map_err(Into::into))
///     .derive_with(move |deps| async move { start(deps).await });
/// ```
pub struct TransitionBuilder<T> {
    produces: StateId<T>,
    kind: TransitionKind,
    requires: Vec<StateKey>,
    release: Option<TypedRelease<T>>,
}

impl<T: Any + Send + Sync> TransitionBuilder<T> {
    pub fn requires<D>(mut self, id: &StateId<D>) -> Self {
        if !self.requires.contains(id.key()) {
            self.requires.push(id.key().clone());
        }
        self
    }

    pub fn requires_key(mut self, key: StateKey) -> Self {
        if !self.requires.contains(&key) {
            self.requires.push(key);
        }
        self
    }

    pub fn kind(mut self, kind: TransitionKind) -> Self {
        self.kind = kind;
        self
    }

    /// Release action for the produced value, run once when the owning
    /// reached state is released.
    pub fn on_release<R>(mut self, release: R) -> Self
    where
        R: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.release = Some(Arc::new(release));
        self
    }

    /// Finish with an async derivation producing a `T`.
    pub fn derive_with<F, Fut>(self, derive: F) -> Transition
    where
        F: Fn(Dependencies) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let release = self.release;
        let deriver: Deriver = Arc::new(
            move |deps: Dependencies| -> BoxFuture<'static, anyhow::Result<Materialization>> {
                let release = release.clone();
                let pending = derive(deps);
                Box::pin(async move {
                    let value = Arc::new(pending.await?);
                    let materialization = Materialization::shared(value.clone());
                    Ok(match release {
                        Some(release) => {
                            materialization.with_release(move || release(value.as_ref()))
                        }
                        None => materialization,
                    })
                })
            },
        );

        Transition {
            id: Uuid::new_v4(),
            kind: self.kind,
            produces: self.produces.into_key(),
            requires: self.requires,
            deriver,
        }
    }

    /// Finish with a derivation that builds its own [`Materialization`],
    /// including any release. A release set through `on_release` is not used.
    pub fn materialize_with<F, Fut>(self, materialize: F) -> Transition
    where
        F: Fn(Dependencies) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Materialization>> + Send + 'static,
    {
        if self.release.is_some() {
            tracing::warn!(
                state = %self.produces,
                "on_release is ignored for transitions built with materialize_with"
            );
        }

        let deriver: Deriver = Arc::new(
            move |deps: Dependencies| -> BoxFuture<'static, anyhow::Result<Materialization>> {
                Box::pin(materialize(deps))
            },
        );

        Transition {
            id: Uuid::new_v4(),
            kind: self.kind,
            produces: self.produces.into_key(),
            requires: self.requires,
            deriver,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq)]
    struct Port(u16);

    #[derive(Debug, PartialEq)]
    struct Url(String);

    #[tokio::test]
    async fn test_supplied_returns_same_value_each_derive() {
        let t = Transition::supplied(StateId::<Port>::of(), Port(8080));
        assert!(t.requires().is_empty());
        assert_eq!(t.kind(), TransitionKind::Supplied);

        let first = t.derive(Dependencies::new()).await.unwrap();
        let second = t.derive(Dependencies::new()).await.unwrap();
        assert!(Arc::ptr_eq(first.value(), second.value()));
        assert!(!first.has_release());
    }

    #[tokio::test]
    async fn test_derived_maps_single_dependency() {
        let port = StateId::<Port>::of();
        let t = Transition::derived(port.clone(), StateId::<Url>::of(), |p: &Port| {
            Ok(Url(format!("http://localhost:{}", p.0)))
        });
        assert_eq!(t.requires(), &[port.key().clone()]);

        let mut deps = Dependencies::new();
        deps.insert(port.key().clone(), Arc::new(Port(9000)));
        let (value, release) = t.derive(deps).await.unwrap().into_parts();
        let url = value.downcast::<Url>().unwrap();
        assert_eq!(url.0, "http://localhost:9000");
        assert!(release.is_none());
    }

    #[tokio::test]
    async fn test_derived_reports_missing_dependency() {
        let t = Transition::derived(StateId::<Port>::of(), StateId::<Url>::of(), |p: &Port| {
            Ok(Url(p.0.to_string()))
        });
        let err = t.derive(Dependencies::new()).await.unwrap_err();
        let missing = err.downcast_ref::<DependencyError>().unwrap();
        assert!(matches!(missing, DependencyError::Missing { .. }));
    }

    #[tokio::test]
    async fn test_joined_requires_both_in_order() {
        let host = StateId::<String>::labeled("host");
        let port = StateId::<Port>::of();
        let t = Transition::joined(host.clone(), port.clone(), StateId::<Url>::of(), |h, p| {
            Ok(Url(format!("{}:{}", h, p.0)))
        });
        assert_eq!(t.requires(), &[host.key().clone(), port.key().clone()]);

        let mut deps = Dependencies::new();
        deps.insert(host.key().clone(), Arc::new("db".to_string()));
        deps.insert(port.key().clone(), Arc::new(Port(1)));
        let (value, _) = t.derive(deps).await.unwrap().into_parts();
        assert_eq!(value.downcast::<Url>().unwrap().0, "db:1");
    }

    #[tokio::test]
    async fn test_builder_release_runs_against_produced_value() {
        let released = Arc::new(AtomicUsize::new(0));
        let seen = released.clone();
        let t = Transition::builder(StateId::<Port>::of())
            .on_release(move |p: &Port| {
                seen.store(p.0 as usize, Ordering::SeqCst);
                Ok(())
            })
            .derive_with(|_deps| async { Ok(Port(4242)) });

        let (_, release) = t.derive(Dependencies::new()).await.unwrap().into_parts();
        release.expect("release registered")().unwrap();
        assert_eq!(released.load(Ordering::SeqCst), 4242);
    }

    #[test]
    fn test_clones_share_identity() {
        let a = Transition::supplied(StateId::<Port>::of(), Port(1));
        let b = Transition::supplied(StateId::<Port>::of(), Port(1));
        assert!(a.same_as(&a.clone()));
        assert!(!a.same_as(&b));
    }

    #[test]
    fn test_dependencies_select_skips_missing() {
        let port = StateId::<Port>::of();
        let url = StateId::<Url>::of();
        let mut deps = Dependencies::new();
        deps.insert(port.key().clone(), Arc::new(Port(1)));

        let subset = deps.select([port.key(), url.key()]);
        assert_eq!(subset.len(), 1);
        assert!(subset.contains(port.key()));
    }
}
