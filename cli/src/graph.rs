//! `rewind graph` - dependency graph export

use crate::GraphCommand;
use anyhow::{Context, Result};
use clap::ValueEnum;
use rewind_core::TransitionGraph;
use rewind_process::{
    Collaborators, ImportArguments, LaunchConfig, ShellArguments, import_with_server_transitions,
    server_transitions, shell_transitions, with_nested_server,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Graphviz digraph
    Dot,
    /// Schematic JSON
    Json,
}

pub fn run_graph_command(
    config: &LaunchConfig,
    command: GraphCommand,
    format: Format,
) -> Result<()> {
    let (name, graph) = command_graph(config, command)?;
    println!("{}", render(&graph, name, format)?);
    Ok(())
}

/// The graph `rewind <command>` walks when no external server is given.
fn command_graph(
    config: &LaunchConfig,
    command: GraphCommand,
) -> Result<(&'static str, TransitionGraph)> {
    let collaborators = Collaborators::local(config);
    let graph = match command {
        GraphCommand::Server => ("server", server_transitions(config, &collaborators)?),
        GraphCommand::Import => (
            "import",
            import_with_server_transitions(
                config,
                &collaborators,
                ImportArguments::new("<db>", "<collection>", "<file>"),
            )?,
        ),
        GraphCommand::Shell => (
            "shell",
            with_nested_server(
                shell_transitions(config, &collaborators, ShellArguments::eval("<script>"))?,
                config,
                &collaborators,
            )?,
        ),
    };
    Ok(graph)
}

fn render(graph: &TransitionGraph, name: &str, format: Format) -> Result<String> {
    let view = graph.dependency_view();
    match format {
        Format::Dot => Ok(view.to_dot(name)),
        Format::Json => serde_json::to_string_pretty(&view.schematic(name))
            .context("Failed to serialize schematic"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_graph_as_dot() {
        let (name, graph) = command_graph(&LaunchConfig::default(), GraphCommand::Server).unwrap();
        let dot = render(&graph, name, Format::Dot).unwrap();
        assert!(dot.starts_with("digraph"));
        assert!(dot.contains("RunningServer"));
    }

    #[test]
    fn test_shell_graph_as_json_has_no_external_nodes() {
        let (name, graph) = command_graph(&LaunchConfig::default(), GraphCommand::Shell).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&render(&graph, name, Format::Json).unwrap()).unwrap();
        assert_eq!(json["name"], "shell");
        let kinds: Vec<&str> = json["nodes"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|n| n["kind"].as_str())
            .collect();
        assert!(!kinds.contains(&"external"));
    }
}
