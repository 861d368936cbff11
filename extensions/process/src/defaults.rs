//! Default transition graphs for the server, import and shell commands.
//!
//! ```text
//! Version ─▶ Distribution:server ─┐
//! Endpoint:requested ─────────────┤
//! WorkingDirectory ───────────────┼─▶ RunningServer ─▶ Endpoint:server
//! ServerArguments ────────────────┘
//!
//! Version ─▶ Distribution:import ─┐
//! Endpoint:server ────────────────┼─▶ ExecutedCommand:import
//! ImportArguments ────────────────┘
//! ```
//!
//! The import and shell graphs need `Endpoint:server` from somewhere: add
//! [`external_server`] for a server that is already running, or
//! [`with_nested_server`] to start one for as long as the walk is reached.

use crate::command::{ImportArguments, ShellArguments, run_command};
use crate::config::LaunchConfig;
use crate::distribution::{Command, DistributionResolver, LocalDistribution, Version};
use crate::launcher::{OsLauncher, ProcessLauncher, Termination};
use crate::port::{Endpoint, EphemeralPorts, PortAllocator};
use crate::progress::{ProgressSink, TracingProgress};
use crate::server::{RunningServer, ServerArguments, start_server};
use crate::states;
use crate::workdir::WorkingDirectory;
use rewind_core::{Dependencies, GraphError, Materialization, StateId, Transition, TransitionGraph};
use rewind_runtime::Nested;
use std::any::Any;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// External services the default transitions call into.
#[derive(Clone)]
pub struct Collaborators {
    pub resolver: Arc<dyn DistributionResolver>,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub ports: Arc<dyn PortAllocator>,
    pub progress: Arc<dyn ProgressSink>,
}

impl Collaborators {
    /// Installed binaries, OS processes, ephemeral ports, progress to tracing.
    pub fn local(config: &LaunchConfig) -> Self {
        Self {
            resolver: Arc::new(LocalDistribution::from_config(config)),
            launcher: Arc::new(OsLauncher),
            ports: Arc::new(EphemeralPorts),
            progress: Arc::new(TracingProgress),
        }
    }

    pub fn with_resolver(mut self, resolver: impl DistributionResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn with_launcher(mut self, launcher: impl ProcessLauncher + 'static) -> Self {
        self.launcher = Arc::new(launcher);
        self
    }

    pub fn with_ports(mut self, ports: impl PortAllocator + 'static) -> Self {
        self.ports = Arc::new(ports);
        self
    }

    pub fn with_progress(mut self, progress: impl ProgressSink + 'static) -> Self {
        self.progress = Arc::new(progress);
        self
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Start a server on the configured endpoint and expose where it listens.
pub fn server_transitions(
    config: &LaunchConfig,
    collaborators: &Collaborators,
) -> Result<TransitionGraph, GraphError> {
    TransitionGraph::build([
        version(config),
        distribution(Command::Server, collaborators),
        Transition::supplied(states::requested_endpoint(), config.requested_endpoint()),
        working_directory(config),
        Transition::supplied(states::server_arguments(), ServerArguments::from_config(config)),
        running_server(collaborators),
        server_endpoint(),
    ])
}

/// Run one import against `Endpoint:server`, which the caller provides.
pub fn import_transitions(
    config: &LaunchConfig,
    collaborators: &Collaborators,
    arguments: ImportArguments,
) -> Result<TransitionGraph, GraphError> {
    TransitionGraph::build([
        version(config),
        distribution(Command::Import, collaborators),
        Transition::supplied(states::import_arguments(), arguments),
        one_shot(
            Command::Import,
            states::executed_import(),
            states::import_arguments(),
            ImportArguments::command_line,
            config,
            collaborators,
        ),
    ])
}

/// Run the shell once against `Endpoint:server`, which the caller provides.
pub fn shell_transitions(
    config: &LaunchConfig,
    collaborators: &Collaborators,
    arguments: ShellArguments,
) -> Result<TransitionGraph, GraphError> {
    TransitionGraph::build([
        version(config),
        distribution(Command::Shell, collaborators),
        Transition::supplied(states::shell_arguments(), arguments),
        one_shot(
            Command::Shell,
            states::executed_shell(),
            states::shell_arguments(),
            ShellArguments::command_line,
            config,
            collaborators,
        ),
    ])
}

/// The import graph plus a nested server walk providing `Endpoint:server`.
/// The server stays up until the reached state is released.
pub fn import_with_server_transitions(
    config: &LaunchConfig,
    collaborators: &Collaborators,
    arguments: ImportArguments,
) -> Result<TransitionGraph, GraphError> {
    with_nested_server(
        import_transitions(config, collaborators, arguments)?,
        config,
        collaborators,
    )
}

/// Add a nested server walk that provides `Endpoint:server` to `graph`.
pub fn with_nested_server(
    graph: TransitionGraph,
    config: &LaunchConfig,
    collaborators: &Collaborators,
) -> Result<TransitionGraph, GraphError> {
    let server = Nested::new(
        server_transitions(config, collaborators)?,
        states::running_server(),
    );
    graph.add(server.into_transition())?.add(server_endpoint())
}

/// Supplies `Endpoint:server` for a server managed elsewhere.
pub fn external_server(endpoint: Endpoint) -> Transition {
    Transition::supplied(states::server_endpoint(), endpoint)
}

fn version(config: &LaunchConfig) -> Transition {
    Transition::supplied(states::version(), Version::new(config.version.clone()))
}

fn distribution(command: Command, collaborators: &Collaborators) -> Transition {
    let resolver = collaborators.resolver.clone();
    Transition::builder(states::distribution(command))
        .requires(&states::version())
        .derive_with(move |deps: Dependencies| {
            let resolver = resolver.clone();
            async move {
                let version = deps.get(&states::version())?;
                let distribution = resolver.resolve(command, version.as_str()).await?;
                Ok(distribution)
            }
        })
}

fn working_directory(config: &LaunchConfig) -> Transition {
    let parent = config.output_dir();
    Transition::builder(states::working_directory())
        .on_release(|dir: &WorkingDirectory| dir.remove().map_err(Into::into))
        .derive_with(move |_deps: Dependencies| {
            std::future::ready(WorkingDirectory::create_in(&parent).map_err(anyhow::Error::from))
        })
}

fn running_server(collaborators: &Collaborators) -> Transition {
    let collaborators = collaborators.clone();
    Transition::builder(states::running_server())
        .requires(&states::distribution(Command::Server))
        .requires(&states::requested_endpoint())
        .requires(&states::working_directory())
        .requires(&states::server_arguments())
        .on_release(|server: &RunningServer| {
            let termination = server.stop()?;
            tracing::debug!(endpoint = %server.endpoint(), ?termination, "server released");
            Ok(())
        })
        .derive_with(move |deps: Dependencies| {
            let collaborators = collaborators.clone();
            async move {
                let distribution = deps.get(&states::distribution(Command::Server))?;
                let requested = deps.get(&states::requested_endpoint())?;
                let dir = deps.get(&states::working_directory())?;
                let args = deps.get(&states::server_arguments())?;
                let server =
                    start_server(&collaborators, &distribution, &requested, &dir, &args).await?;
                Ok(server)
            }
        })
}

fn server_endpoint() -> Transition {
    Transition::derived(
        states::running_server(),
        states::server_endpoint(),
        |server: &RunningServer| Ok(server.endpoint().clone()),
    )
}

fn one_shot<A>(
    command: Command,
    produces: StateId<crate::command::ExecutedCommand>,
    arguments: StateId<A>,
    command_line: fn(&A, &Endpoint) -> Vec<String>,
    config: &LaunchConfig,
    collaborators: &Collaborators,
) -> Transition
where
    A: Any + Send + Sync,
{
    let collaborators = collaborators.clone();
    let timeout = config.command_timeout();
    let log_dir: Option<PathBuf> = config.output_dir.clone();

    Transition::builder(produces)
        .requires(&states::distribution(command))
        .requires(&states::server_endpoint())
        .requires(&arguments)
        .materialize_with(move |deps: Dependencies| {
            let collaborators = collaborators.clone();
            let arguments = arguments.clone();
            let log_dir = log_dir.clone();
            async move {
                let distribution = deps.get(&states::distribution(command))?;
                let endpoint = deps.get(&states::server_endpoint())?;
                let args = deps.get(&arguments)?;
                let (executed, process) = run_command(
                    &collaborators,
                    &distribution,
                    command_line(&args, &endpoint),
                    timeout,
                    log_dir.as_deref(),
                )
                .await?;

                Ok(Materialization::new(executed).with_release(move || {
                    match process.terminate(Duration::ZERO)? {
                        Termination::AlreadyExited => {}
                        termination => tracing::warn!(
                            process = process.name(),
                            ?termination,
                            "one-shot process was still running"
                        ),
                    }
                    Ok(())
                }))
            }
        })
}
