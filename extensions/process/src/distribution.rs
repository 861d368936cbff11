//! Locating executables.
//!
//! Downloading and unpacking archives is out of scope; [`LocalDistribution`]
//! finds binaries that are already installed. Other resolvers plug in through
//! [`DistributionResolver`].

use crate::config::LaunchConfig;
use crate::error::ProcessError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    /// Long-running database server
    Server,
    /// One-shot import job
    Import,
    /// Client shell
    Shell,
}

impl Command {
    pub const ALL: [Command; 3] = [Command::Server, Command::Import, Command::Shell];

    /// File name of the executable, without platform suffix.
    pub fn executable_name(self) -> &'static str {
        match self {
            Command::Server => "mongod",
            Command::Import => "mongoimport",
            Command::Shell => "mongo",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Command::Server => "server",
            Command::Import => "import",
            Command::Shell => "shell",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested version of the distribution, e.g. `7.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version(pub String);

impl Version {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A located executable for one command and version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    pub command: Command,
    pub version: String,
    pub executable: PathBuf,
}

#[async_trait]
pub trait DistributionResolver: Send + Sync {
    async fn resolve(&self, command: Command, version: &str) -> Result<Distribution, ProcessError>;
}

/// Finds installed executables: explicit override first, then the binary
/// directory, then every entry of the search path.
#[derive(Debug, Clone, Default)]
pub struct LocalDistribution {
    overrides: HashMap<Command, PathBuf>,
    binary_dir: Option<PathBuf>,
    search_path: Option<OsString>,
}

impl LocalDistribution {
    /// Searches the process `PATH`.
    pub fn new() -> Self {
        Self {
            search_path: std::env::var_os("PATH"),
            ..Default::default()
        }
    }

    pub fn from_config(config: &LaunchConfig) -> Self {
        let mut distribution = Self::new();
        distribution.binary_dir = config.binary_dir.clone();
        for command in Command::ALL {
            if let Some(path) = config.executables.get(command) {
                distribution = distribution.with_executable(command, path);
            }
        }
        distribution
    }

    pub fn with_executable(mut self, command: Command, path: impl Into<PathBuf>) -> Self {
        self.overrides.insert(command, path.into());
        self
    }

    pub fn with_binary_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.binary_dir = Some(dir.into());
        self
    }

    /// Replace the search path (`PATH` syntax). `None` disables the search.
    pub fn with_search_path(mut self, path: Option<OsString>) -> Self {
        self.search_path = path;
        self
    }

    fn candidates(&self, command: Command) -> Vec<PathBuf> {
        let file_name = format!("{}{}", command.executable_name(), std::env::consts::EXE_SUFFIX);
        let mut candidates = Vec::new();
        if let Some(path) = self.overrides.get(&command) {
            candidates.push(path.clone());
        }
        if let Some(dir) = &self.binary_dir {
            candidates.push(dir.join(&file_name));
        }
        if let Some(search_path) = &self.search_path {
            candidates.extend(std::env::split_paths(search_path).map(|dir| dir.join(&file_name)));
        }
        candidates
    }
}

#[async_trait]
impl DistributionResolver for LocalDistribution {
    async fn resolve(&self, command: Command, version: &str) -> Result<Distribution, ProcessError> {
        let candidates = self.candidates(command);
        match candidates.iter().find(|path| is_executable(path)) {
            Some(executable) => {
                tracing::debug!(
                    %command,
                    executable = %executable.display(),
                    "distribution resolved"
                );
                Ok(Distribution {
                    command,
                    version: version.to_string(),
                    executable: executable.clone(),
                })
            }
            None => Err(ProcessError::DistributionUnavailable {
                command,
                version: version.to_string(),
                reason: format!(
                    "{} not found ({} locations searched)",
                    command.executable_name(),
                    candidates.len()
                ),
            }),
        }
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn install(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_resolve_prefers_override_then_binary_dir_then_path() {
        let bin = tempfile::tempdir().unwrap();
        let path_dir = tempfile::tempdir().unwrap();
        let in_bin = install(bin.path(), "mongod");
        let on_path = install(path_dir.path(), "mongoimport");
        let custom = install(path_dir.path(), "my-shell");

        let resolver = LocalDistribution::default()
            .with_binary_dir(bin.path())
            .with_search_path(Some(path_dir.path().as_os_str().to_owned()))
            .with_executable(Command::Shell, &custom);

        let server = resolver.resolve(Command::Server, "7.0").await.unwrap();
        assert_eq!(server.executable, in_bin);
        assert_eq!(server.version, "7.0");

        let import = resolver.resolve(Command::Import, "7.0").await.unwrap();
        assert_eq!(import.executable, on_path);

        let shell = resolver.resolve(Command::Shell, "7.0").await.unwrap();
        assert_eq!(shell.executable, custom);
    }

    #[tokio::test]
    async fn test_missing_or_non_executable_is_unavailable() {
        let bin = tempfile::tempdir().unwrap();
        std::fs::write(bin.path().join("mongod"), "not executable").unwrap();

        let err = LocalDistribution::default()
            .with_binary_dir(bin.path())
            .resolve(Command::Server, "7.0")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProcessError::DistributionUnavailable {
                command: Command::Server,
                ..
            }
        ));
    }
}
