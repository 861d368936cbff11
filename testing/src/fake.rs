//! In-process stand-ins for distributions, processes and port allocation.
//!
//! [`FakeLauncher`] recognizes server launches by their `--dbpath` argument.
//! A fake server binds a real TCP listener on the `--bind_ip`/`--port` it was
//! given, so readiness checks, busy ports and port allocation behave as with
//! a real server. Every other launch is a one-shot command that exits at once.

use async_trait::async_trait;
use parking_lot::Mutex;
use rewind_process::{
    Collaborators, Command, Distribution, DistributionResolver, EphemeralPorts, LaunchConfig,
    LaunchSpec,
    PortAllocator, ProcessError, ProcessHandle, ProcessLauncher, SilentProgress, Termination,
};
use std::fmt;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Resolves every command to `/fake/bin/<executable>` without touching disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticResolver;

#[async_trait]
impl DistributionResolver for StaticResolver {
    async fn resolve(&self, command: Command, version: &str) -> Result<Distribution, ProcessError> {
        Ok(Distribution {
            command,
            version: version.to_string(),
            executable: PathBuf::from("/fake/bin").join(command.executable_name()),
        })
    }
}

/// Always hands out the same port.
#[derive(Debug, Clone, Copy)]
pub struct FixedPortAllocator(pub u16);

impl PortAllocator for FixedPortAllocator {
    fn allocate(&self, _host: &str) -> Result<u16, ProcessError> {
        Ok(self.0)
    }
}

#[derive(Debug, Default)]
struct LauncherState {
    launched: Vec<LaunchSpec>,
    processes: Vec<Arc<FakeProcess>>,
}

#[derive(Debug, Clone)]
pub struct FakeLauncher {
    state: Arc<Mutex<LauncherState>>,
    next_pid: Arc<AtomicU32>,
    command_exit_code: i32,
}

impl Default for FakeLauncher {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            next_pid: Arc::new(AtomicU32::new(1000)),
            command_exit_code: 0,
        }
    }
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exit code reported by one-shot commands.
    pub fn with_command_exit_code(mut self, code: i32) -> Self {
        self.command_exit_code = code;
        self
    }

    pub fn launched(&self) -> Vec<LaunchSpec> {
        self.state.lock().launched.clone()
    }

    pub fn processes(&self) -> Vec<Arc<FakeProcess>> {
        self.state.lock().processes.clone()
    }

    /// Processes that have not exited.
    pub fn running(&self) -> Vec<Arc<FakeProcess>> {
        self.processes()
            .into_iter()
            .filter(|p| p.is_alive())
            .collect()
    }
}

#[async_trait]
impl ProcessLauncher for FakeLauncher {
    async fn launch(&self, spec: LaunchSpec) -> Result<Arc<dyn ProcessHandle>, ProcessError> {
        let pid = self.next_pid.fetch_add(1, Ordering::Relaxed);
        let process = if spec.args.iter().any(|a| a == "--dbpath") {
            FakeProcess::server(&spec, pid)
        } else {
            FakeProcess::one_shot(&spec, pid, self.command_exit_code)
        };
        let process = Arc::new(process);
        tracing::debug!(
            name = %spec.name,
            pid,
            alive = process.is_alive(),
            "fake process launched"
        );

        let mut state = self.state.lock();
        state.launched.push(spec);
        state.processes.push(process.clone());
        Ok(process)
    }
}

struct FakeState {
    alive: bool,
    code: Option<i32>,
    output: String,
    listener: Option<TcpListener>,
    terminations: Vec<Termination>,
}

pub struct FakeProcess {
    name: String,
    pid: u32,
    args: Vec<String>,
    state: Mutex<FakeState>,
}

impl FakeProcess {
    fn server(spec: &LaunchSpec, pid: u32) -> Self {
        let host = arg_value(&spec.args, "--bind_ip").unwrap_or("127.0.0.1");
        let port = arg_value(&spec.args, "--port")
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(0);

        let state = match TcpListener::bind((host, port)) {
            Ok(listener) => FakeState {
                alive: true,
                code: None,
                output: format!("waiting for connections on port {port}\n"),
                listener: Some(listener),
                terminations: Vec::new(),
            },
            Err(e) => FakeState {
                alive: false,
                code: Some(48),
                output: format!("Error setting up listener: {e}\n"),
                listener: None,
                terminations: Vec::new(),
            },
        };
        Self::with_state(spec, pid, state)
    }

    fn one_shot(spec: &LaunchSpec, pid: u32, code: i32) -> Self {
        let state = FakeState {
            alive: false,
            code: Some(code),
            output: format!("{} {}\n", spec.name, spec.args.join(" ")),
            listener: None,
            terminations: Vec::new(),
        };
        Self::with_state(spec, pid, state)
    }

    fn with_state(spec: &LaunchSpec, pid: u32, state: FakeState) -> Self {
        Self {
            name: spec.name.clone(),
            pid,
            args: spec.args.clone(),
            state: Mutex::new(state),
        }
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Port of the listener a fake server holds, while it runs.
    pub fn listening_port(&self) -> Option<u16> {
        let state = self.state.lock();
        state
            .listener
            .as_ref()
            .and_then(|l| l.local_addr().ok())
            .map(|a| a.port())
    }

    /// Every `terminate` outcome, in call order.
    pub fn terminations(&self) -> Vec<Termination> {
        self.state.lock().terminations.clone()
    }
}

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

impl fmt::Debug for FakeProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeProcess")
            .field("name", &self.name)
            .field("pid", &self.pid)
            .field("alive", &self.state.lock().alive)
            .finish()
    }
}

#[async_trait]
impl ProcessHandle for FakeProcess {
    fn name(&self) -> &str {
        &self.name
    }

    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn is_alive(&self) -> bool {
        self.state.lock().alive
    }

    fn exit_code(&self) -> Option<i32> {
        self.state.lock().code
    }

    fn output(&self) -> String {
        self.state.lock().output.clone()
    }

    async fn wait_for_output(&self, pattern: &str, timeout: Duration) -> Result<(), ProcessError> {
        {
            let state = self.state.lock();
            if state.output.contains(pattern) {
                return Ok(());
            }
            if !state.alive {
                return Err(ProcessError::ExitedEarly {
                    name: self.name.clone(),
                    code: state.code,
                    output: state.output.clone(),
                });
            }
        }
        tokio::time::sleep(timeout).await;
        Err(ProcessError::StartupTimeout {
            name: self.name.clone(),
            timeout,
        })
    }

    async fn wait_for_exit(&self, timeout: Duration) -> Result<Option<i32>, ProcessError> {
        {
            let state = self.state.lock();
            if !state.alive {
                return Ok(state.code);
            }
        }
        tokio::time::sleep(timeout).await;
        Err(ProcessError::StillRunning {
            name: self.name.clone(),
            timeout,
        })
    }

    fn terminate(&self, _grace: Duration) -> Result<Termination, ProcessError> {
        let mut state = self.state.lock();
        let termination = if state.alive {
            state.alive = false;
            state.code = Some(0);
            state.listener = None;
            Termination::Graceful
        } else {
            Termination::AlreadyExited
        };
        state.terminations.push(termination);
        Ok(termination)
    }
}

/// Collaborators backed by [`StaticResolver`], `launcher`, ephemeral ports
/// and no progress output.
pub fn fake_collaborators(launcher: &FakeLauncher) -> Collaborators {
    Collaborators::local(&LaunchConfig::default())
        .with_resolver(StaticResolver)
        .with_launcher(launcher.clone())
        .with_ports(EphemeralPorts)
        .with_progress(SilentProgress)
}
