//! Launch configuration: TOML file plus `REWIND_*` environment overrides.
//!
//! ```toml
//! version = "7.0"
//! binary_dir = "/opt/mongodb/bin"
//! server_args = ["--nounixsocket"]
//!
//! [net]
//! host = "127.0.0.1"
//! port = 0            # any free port
//!
//! [timeouts]
//! startup_ms = 20000
//! stop_ms = 5000
//! command_ms = 300000
//!
//! [executables]
//! import = "/usr/local/bin/mongoimport"
//! ```

use crate::distribution::Command;
use crate::error::ProcessError;
use crate::port::Endpoint;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_VERSION: &str = "REWIND_VERSION";
pub const ENV_HOST: &str = "REWIND_HOST";
pub const ENV_PORT: &str = "REWIND_PORT";
pub const ENV_STARTUP_TIMEOUT_MS: &str = "REWIND_STARTUP_TIMEOUT_MS";
pub const ENV_STOP_TIMEOUT_MS: &str = "REWIND_STOP_TIMEOUT_MS";
pub const ENV_BINARY_DIR: &str = "REWIND_BINARY_DIR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    pub version: String,
    pub net: NetConfig,
    pub timeouts: Timeouts,
    /// Directory searched before `PATH`.
    pub binary_dir: Option<PathBuf>,
    pub executables: Executables,
    /// Extra arguments appended to the server command line.
    pub server_args: Vec<String>,
    /// Parent of per-walk working directories; the system temp dir if unset.
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    pub host: String,
    /// `0` picks a free port at start.
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub startup_ms: u64,
    pub stop_ms: u64,
    /// Upper bound for one-shot commands such as imports.
    pub command_ms: u64,
}

/// Explicit executable per command, taking precedence over any search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Executables {
    pub server: Option<PathBuf>,
    pub import: Option<PathBuf>,
    pub shell: Option<PathBuf>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            version: "7.0".to_string(),
            net: NetConfig::default(),
            timeouts: Timeouts::default(),
            binary_dir: None,
            executables: Executables::default(),
            server_args: Vec::new(),
            output_dir: None,
        }
    }
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            startup_ms: 20_000,
            stop_ms: 5_000,
            command_ms: 300_000,
        }
    }
}

impl Executables {
    pub fn get(&self, command: Command) -> Option<&Path> {
        match command {
            Command::Server => self.server.as_deref(),
            Command::Import => self.import.as_deref(),
            Command::Shell => self.shell.as_deref(),
        }
    }
}

impl LaunchConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ProcessError> {
        toml::from_str(source).map_err(|e| ProcessError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProcessError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            ProcessError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml_str(&source)?;
        tracing::debug!(path = %path.display(), "loaded launch config");
        Ok(config)
    }

    /// Apply `REWIND_*` environment overrides.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`. Values that do not parse are logged and
    /// ignored.
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(version) = lookup(ENV_VERSION) {
            self.version = version;
        }
        if let Some(host) = lookup(ENV_HOST) {
            self.net.host = host;
        }
        if let Some(port) = parse_override::<u16>(&lookup, ENV_PORT) {
            self.net.port = port;
        }
        if let Some(ms) = parse_override::<u64>(&lookup, ENV_STARTUP_TIMEOUT_MS) {
            self.timeouts.startup_ms = ms;
        }
        if let Some(ms) = parse_override::<u64>(&lookup, ENV_STOP_TIMEOUT_MS) {
            self.timeouts.stop_ms = ms;
        }
        if let Some(dir) = lookup(ENV_BINARY_DIR) {
            self.binary_dir = Some(PathBuf::from(dir));
        }
        self
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.startup_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.stop_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.command_ms)
    }

    /// Parent directory for working directories and command logs.
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// The endpoint the server is asked to bind; port `0` means any.
    pub fn requested_endpoint(&self) -> Endpoint {
        Endpoint::new(self.net.host.clone(), self.net.port)
    }
}

fn parse_override<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid {}={:?}", name, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_pick_any_port_on_loopback() {
        let config = LaunchConfig::default();
        assert_eq!(config.requested_endpoint(), Endpoint::new("127.0.0.1", 0));
        assert_eq!(config.stop_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = LaunchConfig::from_toml_str(
            r#"
            version = "6.0"
            [net]
            port = 27018
            [executables]
            import = "/opt/bin/mongoimport"
            "#,
        )
        .unwrap();

        assert_eq!(config.version, "6.0");
        assert_eq!(config.net.host, "127.0.0.1");
        assert_eq!(config.net.port, 27018);
        assert_eq!(config.timeouts.startup_ms, 20_000);
        assert_eq!(
            config.executables.get(Command::Import),
            Some(Path::new("/opt/bin/mongoimport"))
        );
        assert_eq!(config.executables.get(Command::Server), None);
    }

    #[test]
    fn test_invalid_toml_is_a_config_error() {
        let err = LaunchConfig::from_toml_str("net = 5").unwrap_err();
        assert!(matches!(err, ProcessError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "server_args = [\"--quiet\"]").unwrap();

        let config = LaunchConfig::load(file.path()).unwrap();
        assert_eq!(config.server_args, vec!["--quiet"]);
    }

    #[test]
    fn test_overrides_apply_and_skip_invalid_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_HOST, "0.0.0.0"),
            (ENV_PORT, "not-a-port"),
            (ENV_STOP_TIMEOUT_MS, "250"),
            (ENV_BINARY_DIR, "/srv/mongo"),
        ]);

        let config = LaunchConfig::default()
            .with_overrides_from(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.net.host, "0.0.0.0");
        assert_eq!(config.net.port, 0);
        assert_eq!(config.stop_timeout(), Duration::from_millis(250));
        assert_eq!(config.binary_dir, Some(PathBuf::from("/srv/mongo")));
    }
}
