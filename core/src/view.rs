//! Read-only dependency view and text export.

use crate::graph::TransitionGraph;
use crate::schematic::{Edge, Node, NodeKind, Schematic};
use crate::state::StateKey;
use crate::transition::TransitionKind;
use std::collections::{HashMap, HashSet};
use std::fmt::Write;

/// One `requires` edge: `produces` cannot be derived before `requires`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyEdge<'a> {
    pub produces: &'a StateKey,
    pub requires: &'a StateKey,
}

/// Lazy view over the edges of a [`TransitionGraph`]. Never mutates the graph.
#[derive(Clone, Copy)]
pub struct DependencyView<'a> {
    graph: &'a TransitionGraph,
}

impl<'a> DependencyView<'a> {
    pub(crate) fn new(graph: &'a TransitionGraph) -> Self {
        Self { graph }
    }

    pub fn edges(self) -> impl Iterator<Item = DependencyEdge<'a>> + 'a {
        let graph: &'a TransitionGraph = self.graph;
        graph.transitions().iter().flat_map(|transition| {
            transition
                .requires()
                .iter()
                .map(move |requires| DependencyEdge {
                    produces: transition.produces(),
                    requires,
                })
        })
    }

    /// Produced states in declaration order, then required-but-unproduced ones.
    pub fn nodes(self) -> impl Iterator<Item = &'a StateKey> + 'a {
        let graph: &'a TransitionGraph = self.graph;
        let mut seen = HashSet::new();
        graph
            .transitions()
            .iter()
            .map(|t| t.produces())
            .chain(graph.transitions().iter().flat_map(|t| t.requires().iter()))
            .filter(move |key| seen.insert(*key))
    }

    /// Required states no transition of the graph produces. A walk needs them
    /// supplied from elsewhere (a parent reached state or a later `union`).
    pub fn unresolved(self) -> impl Iterator<Item = &'a StateKey> + 'a {
        let graph = self.graph;
        self.nodes().filter(move |key| !graph.produces(key))
    }

    /// Node ids for export: the short `Display` form, or the qualified form
    /// for keys whose short form collides with another node's.
    pub fn node_ids(self) -> HashMap<&'a StateKey, String> {
        let mut seen: HashMap<String, usize> = HashMap::new();
        for key in self.nodes() {
            *seen.entry(key.to_string()).or_default() += 1;
        }
        self.nodes()
            .map(|key| {
                let short = key.to_string();
                let id = if seen.get(&short).copied().unwrap_or(0) > 1 {
                    key.qualified()
                } else {
                    short
                };
                (key, id)
            })
            .collect()
    }

    /// Render as a Graphviz digraph. Edges point from a dependency to the
    /// state derived from it.
    pub fn to_dot(&self, name: &str) -> String {
        let ids = self.node_ids();
        let mut dot = String::new();
        let _ = writeln!(dot, "digraph {} {{", quote(name));
        let _ = writeln!(dot, "\trankdir=LR;");
        let _ = writeln!(dot);

        for key in self.nodes() {
            let shape = match self.graph.get(key).map(|t| t.kind()) {
                Some(TransitionKind::Supplied) => "ellipse",
                Some(TransitionKind::Nested) => "box3d",
                Some(_) => "rectangle",
                None => "rectangle\", style=\"dashed",
            };
            let id = quote(&ids[key]);
            let label = quote(&key.to_string());
            let _ = writeln!(dot, "\t{id}[ shape=\"{shape}\", label={label} ];");
        }

        let _ = writeln!(dot);
        for edge in self.edges() {
            let _ = writeln!(
                dot,
                "\t{} -> {};",
                quote(&ids[edge.requires]),
                quote(&ids[edge.produces])
            );
        }
        dot.push_str("}\n");
        dot
    }

    /// Structured export for tooling that prefers JSON over DOT.
    pub fn schematic(&self, name: &str) -> Schematic {
        let ids = self.node_ids();
        let mut schematic = Schematic::new(name);
        for key in self.nodes() {
            let transition = self.graph.get(key);
            schematic.nodes.push(Node {
                id: ids[key].clone(),
                kind: transition
                    .map(|t| NodeKind::from(t.kind()))
                    .unwrap_or(NodeKind::External),
                value_type: key.type_name().to_string(),
                label: key.label().map(str::to_string),
                transition: transition.map(|t| t.id()),
            });
        }
        for edge in self.edges() {
            schematic.edges.push(Edge {
                from: ids[edge.requires].clone(),
                to: ids[edge.produces].clone(),
            });
        }
        schematic
    }
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateId;
    use crate::transition::Transition;

    #[derive(Debug)]
    struct Config;
    #[derive(Debug)]
    struct Server;
    #[derive(Debug)]
    struct Address;

    fn graph() -> TransitionGraph {
        TransitionGraph::build([
            Transition::supplied(StateId::<Config>::of(), Config),
            Transition::derived(StateId::<Config>::of(), StateId::<Server>::of(), |_| {
                Ok(Server)
            }),
            Transition::joined(
                StateId::<Server>::of(),
                StateId::<String>::labeled("db"),
                StateId::<Address>::of(),
                |_, _| Ok(Address),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_edges_match_declared_requirements() {
        let graph = graph();
        let edges: Vec<(String, String)> = graph
            .dependency_view()
            .edges()
            .map(|e| (e.produces.to_string(), e.requires.to_string()))
            .collect();
        assert_eq!(
            edges,
            vec![
                ("Server".to_string(), "Config".to_string()),
                ("Address".to_string(), "Server".to_string()),
                ("Address".to_string(), "String:db".to_string()),
            ]
        );
    }

    #[test]
    fn test_nodes_list_unresolved_last() {
        let graph = graph();
        let view = graph.dependency_view();
        let nodes: Vec<String> = view.nodes().map(ToString::to_string).collect();
        assert_eq!(nodes, vec!["Config", "Server", "Address", "String:db"]);

        let unresolved: Vec<String> = view.unresolved().map(ToString::to_string).collect();
        assert_eq!(unresolved, vec!["String:db"]);
    }

    #[test]
    fn test_dot_contains_nodes_and_edges() {
        let dot = graph().dependency_view().to_dot("server");
        assert!(dot.starts_with("digraph \"server\" {"));
        assert!(dot.contains("\"Config\"[ shape=\"ellipse\", label=\"Config\" ];"));
        assert!(dot.contains("\"Config\" -> \"Server\";"));
        assert!(dot.contains("\"String:db\"[ shape=\"rectangle\", style=\"dashed\""));
        assert!(dot.trim_end().ends_with('}'));
    }

    mod upstream {
        #[derive(Debug)]
        pub struct Port;
    }

    mod downstream {
        #[derive(Debug)]
        pub struct Port;
    }

    #[test]
    fn test_same_named_types_get_distinct_export_ids() {
        let graph = TransitionGraph::build([
            Transition::supplied(StateId::<upstream::Port>::of(), upstream::Port),
            Transition::derived(
                StateId::<upstream::Port>::of(),
                StateId::<downstream::Port>::of(),
                |_: &upstream::Port| Ok(downstream::Port),
            ),
            Transition::supplied(StateId::<Config>::of(), Config),
        ])
        .unwrap();
        let view = graph.dependency_view();

        let schematic = view.schematic("ports");
        let ids: HashSet<&str> = schematic.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids.len(), 3);
        assert!(ids.contains("Config"));
        assert_eq!(schematic.edges.len(), 1);
        let edge = &schematic.edges[0];
        assert_ne!(edge.from, edge.to);
        assert!(edge.from.ends_with("::upstream::Port"));
        assert!(edge.to.ends_with("::downstream::Port"));

        let dot = view.to_dot("ports");
        assert!(dot.contains(&format!("\"{}\" -> \"{}\";", edge.from, edge.to)));
        assert!(!dot.contains("\"Port\" -> \"Port\""));
    }

    #[test]
    fn test_schematic_marks_external_nodes() {
        let schematic = graph().dependency_view().schematic("server");
        assert_eq!(schematic.nodes.len(), 4);
        assert_eq!(schematic.edges.len(), 3);
        let external = schematic.nodes.iter().find(|n| n.id == "String:db").unwrap();
        assert_eq!(external.kind, NodeKind::External);
        assert!(external.transition.is_none());
    }
}
