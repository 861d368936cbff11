//! State identifiers.
//!
//! A [`StateKey`] names one kind of value a transition graph can produce. It is
//! the pair (type tag, optional label): the type tag is the compile-time
//! `TypeId` of the value type, so two keys are equal exactly when they name the
//! same Rust type with the same label.
//!
//! [`StateId<T>`] is the typed handle over a key. Graph construction and value
//! lookup go through `StateId<T>`, so a lookup can never return the wrong type.

use std::any::{Any, TypeId, type_name};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

/// Strip the module path from every path segment of a type name, so
/// `alloc::vec::Vec<alloc::string::String>` becomes `Vec<String>`.
pub(crate) fn short_type_name(full: &str) -> String {
    let mut short = String::with_capacity(full.len());
    let mut start = 0;
    for (i, c) in full.char_indices() {
        if matches!(c, '<' | '>' | ',' | ' ' | '(' | ')' | '[' | ']' | '&' | ';' | '*') {
            short.push_str(last_segment(&full[start..i]));
            short.push(c);
            start = i + c.len_utf8();
        }
    }
    short.push_str(last_segment(&full[start..]));
    short
}

fn last_segment(path: &str) -> &str {
    path.rsplit("::").next().unwrap_or(path)
}

/// Untyped state identifier.
#[derive(Clone)]
pub struct StateKey {
    type_id: TypeId,
    qualified_name: &'static str,
    type_name: Arc<str>,
    label: Option<Arc<str>>,
}

impl StateKey {
    pub fn of<T: Any>() -> Self {
        let qualified_name = type_name::<T>();
        Self {
            type_id: TypeId::of::<T>(),
            qualified_name,
            type_name: short_type_name(qualified_name).into(),
            label: None,
        }
    }

    pub fn labeled<T: Any>(label: impl Into<Arc<str>>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::of::<T>()
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Short name of the value type, e.g. `RunningServer` or `Vec<String>`.
    /// Distinct types can share it.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Full name of the value type including module paths.
    pub fn qualified_type_name(&self) -> &'static str {
        self.qualified_name
    }

    /// Like `Display`, but with the qualified type name.
    pub fn qualified(&self) -> String {
        match &self.label {
            Some(label) => format!("{}:{}", self.qualified_name, label),
            None => self.qualified_name.to_string(),
        }
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

impl PartialEq for StateKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.label == other.label
    }
}

impl Eq for StateKey {}

impl Hash for StateKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.label.hash(state);
    }
}

impl PartialOrd for StateKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StateKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.type_name
            .cmp(&other.type_name)
            .then_with(|| self.label.cmp(&other.label))
            .then_with(|| self.type_id.cmp(&other.type_id))
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{}:{}", self.type_name, label),
            None => f.write_str(&self.type_name),
        }
    }
}

impl fmt::Debug for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateKey({self})")
    }
}

/// Typed state identifier.
///
/// ```rust,ignore
/// let endpoint = StateId::<Endpoint>::of();
/// let client = StateId::<Endpoint>::labeled("client");
/// assert_ne!(endpoint.key(), client.key());
/// ```
pub struct StateId<T> {
    key: StateKey,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any> StateId<T> {
    pub fn of() -> Self {
        Self {
            key: StateKey::of::<T>(),
            _marker: PhantomData,
        }
    }

    pub fn labeled(label: impl Into<Arc<str>>) -> Self {
        Self {
            key: StateKey::labeled::<T>(label),
            _marker: PhantomData,
        }
    }
}

impl<T> StateId<T> {
    pub fn key(&self) -> &StateKey {
        &self.key
    }

    pub fn into_key(self) -> StateKey {
        self.key
    }
}

impl<T> Clone for StateId<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for StateId<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<T> Eq for StateId<T> {}

impl<T> Hash for StateId<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl<T> fmt::Display for StateId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.key.fmt(f)
    }
}

impl<T> fmt::Debug for StateId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateId({})", self.key)
    }
}

impl<T> From<StateId<T>> for StateKey {
    fn from(id: StateId<T>) -> Self {
        id.key
    }
}

impl<T> From<&StateId<T>> for StateKey {
    fn from(id: &StateId<T>) -> Self {
        id.key.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct Endpoint;
    struct Port;

    #[test]
    fn test_equality_uses_type_and_label() {
        assert_eq!(StateKey::of::<Endpoint>(), StateKey::of::<Endpoint>());
        assert_ne!(StateKey::of::<Endpoint>(), StateKey::of::<Port>());
        assert_ne!(
            StateKey::of::<Endpoint>(),
            StateKey::labeled::<Endpoint>("client")
        );
        assert_eq!(
            StateKey::labeled::<Endpoint>("client"),
            StateKey::labeled::<Endpoint>("client")
        );
    }

    #[test]
    fn test_hash_matches_equality() {
        let mut keys = HashSet::new();
        keys.insert(StateKey::of::<Endpoint>());
        keys.insert(StateKey::of::<Endpoint>());
        keys.insert(StateKey::labeled::<Endpoint>("client"));
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_display_uses_short_type_name() {
        assert_eq!(StateKey::of::<Endpoint>().to_string(), "Endpoint");
        assert_eq!(
            StateId::<Endpoint>::labeled("client").to_string(),
            "Endpoint:client"
        );
    }

    #[test]
    fn test_typed_id_converts_to_key() {
        let id = StateId::<Port>::labeled("admin");
        let key: StateKey = (&id).into();
        assert_eq!(&key, id.key());
        assert_eq!(key.label(), Some("admin"));
        assert_eq!(key.type_name(), "Port");
    }

    #[test]
    fn test_generic_type_names_keep_their_parameters() {
        assert_eq!(StateKey::of::<Vec<String>>().to_string(), "Vec<String>");
        assert_eq!(
            StateKey::of::<(Option<Port>, u16)>().type_name(),
            "(Option<Port>, u16)"
        );
        assert_eq!(
            StateKey::of::<Vec<String>>().qualified_type_name(),
            "alloc::vec::Vec<alloc::string::String>"
        );
    }
}
