//! `rewind import` and `rewind shell` - one-shot commands

use anyhow::{Context, Result, bail};
use rewind_core::{StateId, TransitionGraph};
use rewind_process::{
    Collaborators, Endpoint, ExecutedCommand, ImportArguments, LaunchConfig, ShellArguments,
    external_server, import_transitions, shell_transitions, states, with_nested_server,
};
use rewind_runtime::Walker;

/// Port assumed when `--host` has none.
const DEFAULT_PORT: u16 = 27017;

pub async fn run_import_command(
    config: &LaunchConfig,
    arguments: ImportArguments,
    host: Option<&str>,
) -> Result<()> {
    let collaborators = Collaborators::local(config);
    let graph = import_transitions(config, &collaborators, arguments)?;
    let graph = attach_server(graph, config, &collaborators, host)?;
    run_to_completion(graph, states::executed_import()).await
}

pub async fn run_shell_command(
    config: &LaunchConfig,
    arguments: ShellArguments,
    host: Option<&str>,
) -> Result<()> {
    let collaborators = Collaborators::local(config);
    let graph = shell_transitions(config, &collaborators, arguments)?;
    let graph = attach_server(graph, config, &collaborators, host)?;
    run_to_completion(graph, states::executed_shell()).await
}

/// Point the graph at `host`, or nest a temporary server when there is none.
fn attach_server(
    graph: TransitionGraph,
    config: &LaunchConfig,
    collaborators: &Collaborators,
    host: Option<&str>,
) -> Result<TransitionGraph> {
    let graph = match host {
        Some(address) => graph.add(external_server(parse_endpoint(address)?))?,
        None => with_nested_server(graph, config, collaborators)?,
    };
    Ok(graph)
}

async fn run_to_completion(graph: TransitionGraph, target: StateId<ExecutedCommand>) -> Result<()> {
    let mut reached = Walker::new(graph).reach(target).await?;
    let executed = reached.shared_value()?;
    print!("{}", executed.output);
    if let Some(path) = &executed.output_path {
        tracing::info!(path = %path.display(), "output written");
    }

    tokio::task::block_in_place(|| reached.release()).context("Teardown failed")?;

    if !executed.success() {
        bail!(
            "{} exited with code {:?}",
            executed.command.executable_name(),
            executed.exit_code
        );
    }
    Ok(())
}

/// `HOST:PORT`, `HOST`, `[V6]:PORT` or a bare IPv6 address.
fn parse_endpoint(address: &str) -> Result<Endpoint> {
    let (host, port) = match address.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') || host.ends_with(']') => {
            let port = port
                .parse::<u16>()
                .with_context(|| format!("Invalid port in {address}"))?;
            (host, port)
        }
        _ => (address, DEFAULT_PORT),
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        bail!("Missing host in {address}");
    }
    Ok(Endpoint::new(host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(parse_endpoint("localhost:27018").unwrap(), Endpoint::new("localhost", 27018));
        assert_eq!(parse_endpoint("db.internal").unwrap(), Endpoint::new("db.internal", 27017));
        assert_eq!(parse_endpoint("[::1]:4000").unwrap(), Endpoint::new("::1", 4000));
        assert_eq!(parse_endpoint("::1").unwrap(), Endpoint::new("::1", 27017));
    }

    #[test]
    fn test_parse_endpoint_rejects_bad_input() {
        assert!(parse_endpoint("localhost:http").is_err());
        assert!(parse_endpoint(":27017").is_err());
    }

    #[test]
    fn test_external_host_closes_the_graph() {
        let config = LaunchConfig::default();
        let collaborators = Collaborators::local(&config);
        let graph = shell_transitions(&config, &collaborators, ShellArguments::eval("1")).unwrap();
        let graph = attach_server(graph, &config, &collaborators, Some("127.0.0.1:27017")).unwrap();
        assert_eq!(graph.dependency_view().unresolved().count(), 0);
        assert!(!graph.produces(states::running_server().key()));
    }
}
