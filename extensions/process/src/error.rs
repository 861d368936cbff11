use crate::distribution::Command;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures of the process-lifecycle transitions.
///
/// These surface as the cause of a
/// [`WalkError::TransitionFailed`](rewind_runtime::WalkError::TransitionFailed);
/// use `cause_downcast::<ProcessError>()` to react to a specific one.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("{name} did not become ready within {timeout:?}")]
    StartupTimeout { name: String, timeout: Duration },

    #[error("port {port} on {host} is already in use")]
    PortUnavailable { host: String, port: u16 },

    #[error("no free port available on {host}")]
    NoFreePort { host: String },

    #[error("no {command} executable for version {version}: {reason}")]
    DistributionUnavailable {
        command: Command,
        version: String,
        reason: String,
    },

    #[error("failed to launch {}: {source}", .executable.display())]
    Launch {
        executable: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{name} exited with {} before becoming ready", describe_exit(*.code))]
    ExitedEarly {
        name: String,
        code: Option<i32>,
        output: String,
    },

    #[error("{name} still running after {timeout:?}")]
    StillRunning { name: String, timeout: Duration },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exited_early_message() {
        let err = ProcessError::ExitedEarly {
            name: "mongod".into(),
            code: Some(48),
            output: String::new(),
        };
        assert_eq!(err.to_string(), "mongod exited with code 48 before becoming ready");

        let killed = ProcessError::ExitedEarly {
            name: "mongod".into(),
            code: None,
            output: String::new(),
        };
        assert!(killed.to_string().contains("a signal"));
    }
}
