//! One-shot commands run against a server: import jobs and shell scripts.

use crate::defaults::Collaborators;
use crate::distribution::{Command, Distribution};
use crate::error::ProcessError;
use crate::launcher::{LaunchSpec, ProcessHandle};
use crate::port::Endpoint;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Result of a finished one-shot command. A non-zero exit code is reported,
/// not treated as a failed transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedCommand {
    pub command: Command,
    pub exit_code: Option<i32>,
    /// Captured stdout and stderr.
    pub output: String,
    /// File the captured output was also written to.
    pub output_path: Option<PathBuf>,
}

impl ExecutedCommand {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportArguments {
    pub database: String,
    pub collection: String,
    pub file: PathBuf,
    /// The file holds one JSON array instead of one document per line.
    pub json_array: bool,
    pub upsert: bool,
    pub drop: bool,
}

impl ImportArguments {
    pub fn new(
        database: impl Into<String>,
        collection: impl Into<String>,
        file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
            file: file.into(),
            json_array: false,
            upsert: false,
            drop: false,
        }
    }

    pub fn json_array(mut self, json_array: bool) -> Self {
        self.json_array = json_array;
        self
    }

    pub fn upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }

    pub fn drop_collection(mut self, drop: bool) -> Self {
        self.drop = drop;
        self
    }

    pub fn command_line(&self, server: &Endpoint) -> Vec<String> {
        let mut line = vec![
            "--host".to_string(),
            server.host.clone(),
            "--port".to_string(),
            server.port.to_string(),
            "--db".to_string(),
            self.database.clone(),
            "--collection".to_string(),
            self.collection.clone(),
            "--file".to_string(),
            self.file.display().to_string(),
        ];
        if self.json_array {
            line.push("--jsonArray".to_string());
        }
        if self.upsert {
            line.push("--mode=upsert".to_string());
        }
        if self.drop {
            line.push("--drop".to_string());
        }
        line
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellArguments {
    pub database: Option<String>,
    /// JavaScript evaluated before any script file.
    pub eval: Option<String>,
    pub scripts: Vec<PathBuf>,
}

impl ShellArguments {
    pub fn eval(script: impl Into<String>) -> Self {
        Self {
            eval: Some(script.into()),
            ..Default::default()
        }
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn script(mut self, path: impl Into<PathBuf>) -> Self {
        self.scripts.push(path.into());
        self
    }

    pub fn command_line(&self, server: &Endpoint) -> Vec<String> {
        let mut line = vec![
            "--host".to_string(),
            server.host.clone(),
            "--port".to_string(),
            server.port.to_string(),
            "--quiet".to_string(),
        ];
        if let Some(eval) = &self.eval {
            line.push("--eval".to_string());
            line.push(eval.clone());
        }
        if let Some(database) = &self.database {
            line.push(database.clone());
        }
        line.extend(self.scripts.iter().map(|p| p.display().to_string()));
        line
    }
}

/// Run a one-shot command to completion.
///
/// Returns the result and the process handle, so the caller can make sure
/// the process is gone when the result is released.
pub async fn run_command(
    collaborators: &Collaborators,
    distribution: &Distribution,
    args: Vec<String>,
    timeout: Duration,
    log_dir: Option<&Path>,
) -> Result<(ExecutedCommand, Arc<dyn ProcessHandle>), ProcessError> {
    let name = distribution.command.executable_name();
    collaborators.progress.started(name);

    let spec = LaunchSpec::new(name, &distribution.executable).args(args);
    let process = collaborators.launcher.launch(spec).await?;

    let exit_code = match process.wait_for_exit(timeout).await {
        Ok(code) => code,
        Err(err) => {
            collaborators.progress.failed(name, &err.to_string());
            if let Err(stop_err) = process.terminate(Duration::ZERO) {
                tracing::warn!(process = name, error = %stop_err, "cannot kill overdue command");
            }
            return Err(err);
        }
    };

    let output = process.output();
    let output_path = match log_dir {
        Some(dir) => Some(write_log(dir, name, &output)?),
        None => None,
    };

    collaborators.progress.finished(name);
    tracing::info!(process = name, exit_code = ?exit_code, "command finished");
    Ok((
        ExecutedCommand {
            command: distribution.command,
            exit_code,
            output,
            output_path,
        },
        process,
    ))
}

fn write_log(dir: &Path, name: &str, output: &str) -> Result<PathBuf, ProcessError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{name}-{}.log", Uuid::new_v4().simple()));
    std::fs::write(&path, output)?;
    Ok(path)
}
