//! Starting OS processes and observing them.
//!
//! [`OsLauncher`] spawns through `tokio::process` with stdout and stderr
//! captured line by line. Output is kept in memory and forwarded to `tracing`
//! at trace level.

use crate::error::ProcessError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::watch;

const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// How long stdout/stderr may stay open after the process itself exited.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);
const KILL_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Display name used in logs and errors.
    pub name: String,
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
}

impl LaunchSpec {
    pub fn new(name: impl Into<String>, executable: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            executable: executable.into(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }
}

/// How [`ProcessHandle::terminate`] ended the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    AlreadyExited,
    /// Exited within the grace period after the stop request.
    Graceful,
    /// Killed after the grace period.
    Forced,
}

#[async_trait]
pub trait ProcessHandle: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn pid(&self) -> Option<u32>;

    fn is_alive(&self) -> bool;

    /// Exit code once exited; `None` while running or when killed by a signal.
    fn exit_code(&self) -> Option<i32>;

    /// Everything captured from stdout and stderr so far.
    fn output(&self) -> String;

    /// Resolve once the captured output contains `pattern`. Fails with
    /// `ExitedEarly` if the process exits first and `StartupTimeout` after
    /// `timeout`.
    async fn wait_for_output(&self, pattern: &str, timeout: Duration) -> Result<(), ProcessError>;

    /// Wait for the process to exit and its output to be drained.
    async fn wait_for_exit(&self, timeout: Duration) -> Result<Option<i32>, ProcessError>;

    /// Ask the process to stop, wait up to `grace`, then kill it.
    ///
    /// This blocks the calling thread for up to `grace` plus the kill wait.
    /// It runs from releases, which includes rollback inside an async walk,
    /// so a current-thread runtime stalls for that long. Async callers on a
    /// multi-thread runtime should wrap the release that ends up here in
    /// `tokio::task::block_in_place`, or move it to `spawn_blocking`.
    fn terminate(&self, grace: Duration) -> Result<Termination, ProcessError>;
}

#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(&self, spec: LaunchSpec) -> Result<Arc<dyn ProcessHandle>, ProcessError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OsLauncher;

#[async_trait]
impl ProcessLauncher for OsLauncher {
    async fn launch(&self, spec: LaunchSpec) -> Result<Arc<dyn ProcessHandle>, ProcessError> {
        let mut command = tokio::process::Command::new(&spec.executable);
        command
            .args(&spec.args)
            .envs(spec.env.iter().cloned())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.current_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| ProcessError::Launch {
            executable: spec.executable.clone(),
            source,
        })?;
        let pid = child.id();

        let (observed, _) = watch::channel(Observed::default());
        let observed = Arc::new(observed);
        if let Some(stdout) = child.stdout.take() {
            capture(spec.name.clone(), "stdout", stdout, observed.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            capture(spec.name.clone(), "stderr", stderr, observed.clone());
        }

        tracing::info!(
            process = %spec.name,
            pid = ?pid,
            executable = %spec.executable.display(),
            args = ?spec.args,
            "process launched"
        );

        Ok(Arc::new(OsProcess {
            name: spec.name,
            pid,
            child: Mutex::new(child),
            observed,
        }))
    }
}

#[derive(Debug, Default)]
struct Observed {
    output: String,
    open_streams: usize,
    exited: bool,
    code: Option<i32>,
}

fn capture<R>(name: String, stream: &'static str, reader: R, observed: Arc<watch::Sender<Observed>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    observed.send_modify(|o| o.open_streams += 1);
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    tracing::trace!(process = %name, stream, "{}", line);
                    observed.send_modify(|o| {
                        o.output.push_str(&line);
                        o.output.push('\n');
                    });
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(process = %name, stream, error = %e, "output capture stopped");
                    break;
                }
            }
        }
        observed.send_modify(|o| o.open_streams = o.open_streams.saturating_sub(1));
    });
}

pub struct OsProcess {
    name: String,
    pid: Option<u32>,
    child: Mutex<Child>,
    observed: Arc<watch::Sender<Observed>>,
}

impl OsProcess {
    /// Whether the process has exited, reaping it if it just did.
    fn poll_exit(&self) -> bool {
        if self.observed.borrow().exited {
            return true;
        }
        let status = self.child.lock().try_wait();
        match status {
            Ok(Some(status)) => {
                let code = status.code();
                tracing::debug!(process = %self.name, code = ?code, "process exited");
                self.observed.send_modify(|o| {
                    o.exited = true;
                    o.code = code;
                });
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(process = %self.name, error = %e, "cannot query process status");
                false
            }
        }
    }

    #[cfg(unix)]
    fn request_stop(&self) -> bool {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let Some(pid) = self.pid.and_then(|pid| i32::try_from(pid).ok()) else {
            return false;
        };
        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) => {
                tracing::debug!(process = %self.name, pid, "sent SIGTERM");
                true
            }
            Err(e) => {
                tracing::debug!(process = %self.name, pid, error = %e, "SIGTERM failed");
                false
            }
        }
    }

    #[cfg(not(unix))]
    fn request_stop(&self) -> bool {
        false
    }

    fn snapshot(&self) -> (usize, Option<i32>, String) {
        let observed = self.observed.borrow();
        (observed.open_streams, observed.code, observed.output.clone())
    }
}

#[async_trait]
impl ProcessHandle for OsProcess {
    fn name(&self) -> &str {
        &self.name
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn is_alive(&self) -> bool {
        !self.poll_exit()
    }

    fn exit_code(&self) -> Option<i32> {
        self.poll_exit();
        self.observed.borrow().code
    }

    fn output(&self) -> String {
        self.observed.borrow().output.clone()
    }

    async fn wait_for_output(&self, pattern: &str, timeout: Duration) -> Result<(), ProcessError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut changes = self.observed.subscribe();
        let mut exited_at = None;

        loop {
            if changes.borrow_and_update().output.contains(pattern) {
                return Ok(());
            }

            if self.poll_exit() {
                let now = tokio::time::Instant::now();
                let exited_at = *exited_at.get_or_insert(now);
                let (open_streams, code, output) = self.snapshot();
                if open_streams == 0 || now.duration_since(exited_at) >= DRAIN_TIMEOUT {
                    return Err(ProcessError::ExitedEarly {
                        name: self.name.clone(),
                        code,
                        output,
                    });
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(ProcessError::StartupTimeout {
                    name: self.name.clone(),
                    timeout,
                });
            }

            // New output wakes us early; exits are only seen by polling.
            let _ = tokio::time::timeout(POLL_INTERVAL, changes.changed()).await;
        }
    }

    async fn wait_for_exit(&self, timeout: Duration) -> Result<Option<i32>, ProcessError> {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.poll_exit() {
            if tokio::time::Instant::now() >= deadline {
                return Err(ProcessError::StillRunning {
                    name: self.name.clone(),
                    timeout,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        let mut changes = self.observed.subscribe();
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            changes.wait_for(|o| o.open_streams == 0).await.map(|_| ())
        })
        .await;
        if drained.is_err() {
            tracing::debug!(process = %self.name, "output still open after exit");
        }

        Ok(self.observed.borrow().code)
    }

    fn terminate(&self, grace: Duration) -> Result<Termination, ProcessError> {
        if self.poll_exit() {
            return Ok(Termination::AlreadyExited);
        }

        if self.request_stop() {
            let deadline = std::time::Instant::now() + grace;
            while std::time::Instant::now() < deadline {
                if self.poll_exit() {
                    tracing::info!(process = %self.name, "process stopped");
                    return Ok(Termination::Graceful);
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            tracing::warn!(
                process = %self.name,
                grace = ?grace,
                "process ignored stop request, killing"
            );
        }

        let killed = self.child.lock().start_kill();
        if let Err(e) = killed {
            if self.poll_exit() {
                return Ok(Termination::Graceful);
            }
            return Err(e.into());
        }

        let deadline = std::time::Instant::now() + KILL_WAIT;
        while std::time::Instant::now() < deadline {
            if self.poll_exit() {
                tracing::info!(process = %self.name, "process killed");
                return Ok(Termination::Forced);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        tracing::error!(process = %self.name, pid = ?self.pid, "process not reaped after kill");
        Ok(Termination::Forced)
    }
}

impl fmt::Debug for OsProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OsProcess")
            .field("name", &self.name)
            .field("pid", &self.pid)
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(name: &str, script: &str) -> LaunchSpec {
        LaunchSpec::new(name, "/bin/sh").arg("-c").arg(script)
    }

    #[tokio::test]
    async fn test_wait_for_output_then_graceful_stop() {
        let process = OsLauncher
            .launch(sh("sleeper", "echo ready; exec sleep 30"))
            .await
            .unwrap();

        process
            .wait_for_output("ready", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(process.is_alive());
        assert!(process.pid().is_some());

        let termination = process.terminate(Duration::from_secs(5)).unwrap();
        assert_eq!(termination, Termination::Graceful);
        assert!(!process.is_alive());
        assert_eq!(process.terminate(Duration::from_secs(1)).unwrap(), Termination::AlreadyExited);
    }

    #[tokio::test]
    async fn test_stop_escalates_to_kill() {
        let process = OsLauncher
            .launch(sh("stubborn", "trap '' TERM; echo ready; exec sleep 30"))
            .await
            .unwrap();
        process
            .wait_for_output("ready", Duration::from_secs(5))
            .await
            .unwrap();

        let termination = process.terminate(Duration::from_millis(100)).unwrap();
        assert_eq!(termination, Termination::Forced);
        assert!(!process.is_alive());
    }

    #[tokio::test]
    async fn test_one_shot_exit_code_and_output() {
        let process = OsLauncher
            .launch(sh("one-shot", "echo out; echo err >&2; exit 3"))
            .await
            .unwrap();

        let code = process.wait_for_exit(Duration::from_secs(5)).await.unwrap();
        assert_eq!(code, Some(3));
        let output = process.output();
        assert!(output.contains("out\n"));
        assert!(output.contains("err\n"));
    }

    #[tokio::test]
    async fn test_exit_before_ready_is_reported() {
        let process = OsLauncher
            .launch(sh("crasher", "echo boom; exit 48"))
            .await
            .unwrap();

        let err = process
            .wait_for_output("waiting for connections", Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            ProcessError::ExitedEarly { code, output, .. } => {
                assert_eq!(code, Some(48));
                assert!(output.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_readiness_timeout() {
        let process = OsLauncher
            .launch(sh("silent", "exec sleep 30"))
            .await
            .unwrap();

        let err = process
            .wait_for_output("ready", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::StartupTimeout { .. }));
        process.terminate(Duration::from_secs(1)).unwrap();
    }

    #[tokio::test]
    async fn test_env_and_current_dir_reach_the_child() {
        let dir = tempfile::tempdir().unwrap();
        let spec = sh("env", "echo \"$REWIND_GREETING in $(pwd)\"")
            .env("REWIND_GREETING", "hello")
            .current_dir(dir.path());
        let process = OsLauncher.launch(spec).await.unwrap();

        let code = process.wait_for_exit(Duration::from_secs(5)).await.unwrap();
        assert_eq!(code, Some(0));
        let dir_name = dir.path().file_name().unwrap().to_string_lossy().into_owned();
        let output = process.output();
        assert!(output.contains("hello in "), "{output}");
        assert!(output.contains(&dir_name), "{output}");
    }

    #[tokio::test]
    async fn test_missing_executable_fails_to_launch() {
        let err = OsLauncher
            .launch(LaunchSpec::new("ghost", "/nonexistent/mongod"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Launch { .. }));
    }
}
