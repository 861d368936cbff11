use crate::transition::TransitionKind;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The Static Analysis View of a transition graph.
///
/// `Schematic` is the serializable counterpart of
/// [`DependencyView`](crate::view::DependencyView). It is used for
/// visualization, documentation, and verification.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Schematic {
    pub name: String,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Schematic {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    pub value_type: String,
    pub label: Option<String>,
    /// Transition producing this node; `None` for external inputs
    pub transition: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Supplied,
    Derived,
    Joined,
    Nested,
    Custom,
    External, // Required but produced outside the graph
}

impl From<TransitionKind> for NodeKind {
    fn from(kind: TransitionKind) -> Self {
        match kind {
            TransitionKind::Supplied => NodeKind::Supplied,
            TransitionKind::Derived => NodeKind::Derived,
            TransitionKind::Joined => NodeKind::Joined,
            TransitionKind::Nested => NodeKind::Nested,
            TransitionKind::Custom => NodeKind::Custom,
        }
    }
}

/// Dependency edge: `from` must be reached before `to`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
}
