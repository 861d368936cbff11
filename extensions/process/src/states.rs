//! State identifiers of the default process graphs.
//!
//! Replace any of them with [`Transition::supplied`](rewind_core::Transition::supplied)
//! to inject a fixed value, e.g. a known server endpoint.

use crate::command::{ExecutedCommand, ImportArguments, ShellArguments};
use crate::distribution::{Command, Distribution, Version};
use crate::port::Endpoint;
use crate::server::{RunningServer, ServerArguments};
use crate::workdir::WorkingDirectory;
use rewind_core::StateId;

pub fn version() -> StateId<Version> {
    StateId::of()
}

pub fn distribution(command: Command) -> StateId<Distribution> {
    StateId::labeled(command.as_str())
}

/// Endpoint the server is asked to bind; port `0` for any.
pub fn requested_endpoint() -> StateId<Endpoint> {
    StateId::labeled("requested")
}

pub fn working_directory() -> StateId<WorkingDirectory> {
    StateId::of()
}

pub fn server_arguments() -> StateId<ServerArguments> {
    StateId::of()
}

pub fn running_server() -> StateId<RunningServer> {
    StateId::of()
}

/// Endpoint a running server actually listens on.
pub fn server_endpoint() -> StateId<Endpoint> {
    StateId::labeled("server")
}

pub fn import_arguments() -> StateId<ImportArguments> {
    StateId::of()
}

pub fn executed_import() -> StateId<ExecutedCommand> {
    StateId::labeled("import")
}

pub fn shell_arguments() -> StateId<ShellArguments> {
    StateId::of()
}

pub fn executed_shell() -> StateId<ExecutedCommand> {
    StateId::labeled("shell")
}
