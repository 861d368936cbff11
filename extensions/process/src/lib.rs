//! # Rewind Process
//!
//! Transitions that manage external processes: locating a distribution,
//! picking a free port, launching a server, waiting until it is ready and
//! stopping it again on release. One-shot commands (import, shell) run
//! against a reached server endpoint.
//!
//! ```rust,ignore
//! let config = LaunchConfig::load("rewind.toml")?.with_env_overrides();
//! let collaborators = Collaborators::local(&config);
//! let graph = server_transitions(&config, &collaborators)?;
//!
//! let server = Walker::new(graph).reach(states::server_endpoint()).await?;
//! println!("listening on {}", server.value()?);
//! ```

pub mod command;
pub mod config;
pub mod defaults;
pub mod distribution;
pub mod error;
pub mod launcher;
pub mod port;
pub mod progress;
pub mod server;
pub mod states;
pub mod workdir;

pub use command::{ExecutedCommand, ImportArguments, ShellArguments};
pub use config::LaunchConfig;
pub use defaults::{
    Collaborators, external_server, import_transitions, import_with_server_transitions,
    server_transitions, shell_transitions, with_nested_server,
};
pub use distribution::{Command, Distribution, DistributionResolver, LocalDistribution, Version};
pub use error::ProcessError;
pub use launcher::{LaunchSpec, OsLauncher, ProcessHandle, ProcessLauncher, Termination};
pub use port::{Endpoint, EphemeralPorts, PortAllocator};
pub use progress::{ProgressEvent, ProgressSink, SilentProgress, TracingProgress};
pub use server::{Readiness, RunningServer, ServerArguments};
pub use workdir::WorkingDirectory;

pub mod prelude {
    pub use crate::command::{ExecutedCommand, ImportArguments, ShellArguments};
    pub use crate::config::LaunchConfig;
    pub use crate::defaults::{
        Collaborators, external_server, import_transitions, import_with_server_transitions,
        server_transitions, shell_transitions, with_nested_server,
    };
    pub use crate::distribution::Command;
    pub use crate::error::ProcessError;
    pub use crate::port::Endpoint;
    pub use crate::server::{Readiness, RunningServer, ServerArguments};
    pub use crate::states;
}
