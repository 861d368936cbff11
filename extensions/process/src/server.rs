//! Long-running server processes.

use crate::config::LaunchConfig;
use crate::defaults::Collaborators;
use crate::distribution::Distribution;
use crate::error::ProcessError;
use crate::launcher::{LaunchSpec, ProcessHandle, Termination};
use crate::port::{Endpoint, ensure_available};
use crate::workdir::WorkingDirectory;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

const CONNECT_ATTEMPT: Duration = Duration::from_millis(250);
const CONNECT_RETRY: Duration = Duration::from_millis(50);

/// When a started server counts as ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Its output contains the given text.
    OutputContains(String),
    /// A TCP connection to its endpoint succeeds.
    AcceptsConnections,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerArguments {
    pub extra_args: Vec<String>,
    pub readiness: Readiness,
    pub startup_timeout: Duration,
    pub stop_timeout: Duration,
}

impl ServerArguments {
    pub fn from_config(config: &LaunchConfig) -> Self {
        Self {
            extra_args: config.server_args.clone(),
            readiness: Readiness::AcceptsConnections,
            startup_timeout: config.startup_timeout(),
            stop_timeout: config.stop_timeout(),
        }
    }

    pub fn with_readiness(mut self, readiness: Readiness) -> Self {
        self.readiness = readiness;
        self
    }
}

impl Default for ServerArguments {
    fn default() -> Self {
        Self::from_config(&LaunchConfig::default())
    }
}

/// A started and ready server. Stopping is explicit, usually through the
/// release of the transition that started it.
pub struct RunningServer {
    endpoint: Endpoint,
    process: Arc<dyn ProcessHandle>,
    stop_timeout: Duration,
}

impl RunningServer {
    /// Where the server actually listens. Never the "any port" placeholder.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn process(&self) -> &Arc<dyn ProcessHandle> {
        &self.process
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }

    /// Request shutdown, wait up to the stop timeout, then kill. Stopping an
    /// already stopped server reports [`Termination::AlreadyExited`].
    ///
    /// Blocks the calling thread, see [`ProcessHandle::terminate`].
    pub fn stop(&self) -> Result<Termination, ProcessError> {
        tracing::info!(endpoint = %self.endpoint, "stopping server");
        self.process.terminate(self.stop_timeout)
    }
}

impl fmt::Debug for RunningServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningServer")
            .field("endpoint", &self.endpoint)
            .field("pid", &self.process.pid())
            .finish()
    }
}

/// Command line for a server listening on `endpoint` with its data in `dir`.
pub fn server_command_line(
    endpoint: &Endpoint,
    dir: &WorkingDirectory,
    args: &ServerArguments,
) -> Vec<String> {
    let mut line = vec![
        "--port".to_string(),
        endpoint.port.to_string(),
        "--bind_ip".to_string(),
        endpoint.host.clone(),
        "--dbpath".to_string(),
        dir.path().display().to_string(),
    ];
    line.extend(args.extra_args.iter().cloned());
    line
}

/// Start a server and wait until it is ready.
///
/// A requested port of `0` is replaced by one from the port allocator. A
/// port that is already in use fails fast with `PortUnavailable`. On any
/// failure after launch the process is stopped before returning.
pub async fn start_server(
    collaborators: &Collaborators,
    distribution: &Distribution,
    requested: &Endpoint,
    dir: &WorkingDirectory,
    args: &ServerArguments,
) -> Result<RunningServer, ProcessError> {
    let port = if requested.is_any_port() {
        collaborators.ports.allocate(&requested.host)?
    } else {
        requested.port
    };
    let endpoint = requested.with_port(port);
    ensure_available(&endpoint.host, endpoint.port)?;

    let name = distribution.command.executable_name();
    collaborators.progress.started(name);

    let spec = LaunchSpec::new(name, &distribution.executable)
        .args(server_command_line(&endpoint, dir, args))
        .current_dir(dir.path());
    let process = collaborators.launcher.launch(spec).await?;
    collaborators
        .progress
        .info(name, &format!("waiting for {endpoint} to become ready"));

    let ready = match &args.readiness {
        Readiness::OutputContains(pattern) => {
            process.wait_for_output(pattern, args.startup_timeout).await
        }
        Readiness::AcceptsConnections => {
            wait_for_connection(process.as_ref(), &endpoint, args.startup_timeout).await
        }
    };

    if let Err(err) = ready {
        collaborators.progress.failed(name, &err.to_string());
        if let Err(stop_err) = process.terminate(args.stop_timeout) {
            tracing::warn!(process = name, error = %stop_err, "cleanup after failed start failed");
        }
        return Err(port_conflict(err, &endpoint));
    }

    collaborators.progress.finished(name);
    tracing::info!(endpoint = %endpoint, pid = ?process.pid(), "server ready");
    Ok(RunningServer {
        endpoint,
        process,
        stop_timeout: args.stop_timeout,
    })
}

/// A server that dies reporting a bind failure lost a race for its port.
fn port_conflict(err: ProcessError, endpoint: &Endpoint) -> ProcessError {
    match err {
        ProcessError::ExitedEarly { ref output, .. }
            if output.contains("Address already in use") =>
        {
            ProcessError::PortUnavailable {
                host: endpoint.host.clone(),
                port: endpoint.port,
            }
        }
        other => other,
    }
}

async fn wait_for_connection(
    process: &dyn ProcessHandle,
    endpoint: &Endpoint,
    timeout: Duration,
) -> Result<(), ProcessError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if !process.is_alive() {
            return Err(ProcessError::ExitedEarly {
                name: process.name().to_string(),
                code: process.exit_code(),
                output: process.output(),
            });
        }

        let attempt = tokio::time::timeout(
            CONNECT_ATTEMPT,
            tokio::net::TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
        )
        .await;
        if let Ok(Ok(_)) = attempt {
            return Ok(());
        }

        if tokio::time::Instant::now() >= deadline {
            return Err(ProcessError::StartupTimeout {
                name: process.name().to_string(),
                timeout,
            });
        }
        tokio::time::sleep(CONNECT_RETRY).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_command_line() {
        let dir = WorkingDirectory::create_in(&std::env::temp_dir()).unwrap();
        let args = ServerArguments {
            extra_args: vec!["--nounixsocket".into()],
            ..ServerArguments::default()
        };
        let line = server_command_line(&Endpoint::new("127.0.0.1", 27017), &dir, &args);
        assert_eq!(&line[..4], ["--port", "27017", "--bind_ip", "127.0.0.1"]);
        assert_eq!(line[4], "--dbpath");
        assert_eq!(line.last().map(String::as_str), Some("--nounixsocket"));
        dir.remove().unwrap();
    }

    #[test]
    fn test_bind_failure_output_maps_to_port_unavailable() {
        let endpoint = Endpoint::new("127.0.0.1", 27017);
        let err = port_conflict(
            ProcessError::ExitedEarly {
                name: "mongod".into(),
                code: Some(48),
                output: "Error setting up listener: Address already in use".into(),
            },
            &endpoint,
        );
        assert!(matches!(err, ProcessError::PortUnavailable { port: 27017, .. }));
    }
}
