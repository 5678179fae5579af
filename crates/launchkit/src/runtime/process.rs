//! Spawned child processes

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

/// Sender half of the process event channel
pub type EventSender = mpsc::UnboundedSender<(String, ProcessEvent)>;

/// Process status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProcessStatus {
    /// Process is pending start
    Pending,
    /// Process is running
    Running,
    /// Process has stopped with exit code
    Stopped(Option<i32>),
    /// Process failed to start
    Failed,
}

impl ProcessStatus {
    /// Check if process is running
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessStatus::Running)
    }

    /// Check if process has stopped
    pub fn is_stopped(&self) -> bool {
        matches!(self, ProcessStatus::Stopped(_) | ProcessStatus::Failed)
    }
}

/// Where a child's stdout and stderr go
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputPolicy {
    /// Child writes straight to the launcher's streams
    #[default]
    #[serde(rename = "screen", alias = "inherit")]
    Inherit,
    /// Launcher reads the streams and forwards them line by line
    #[serde(rename = "log", alias = "capture")]
    Capture,
}

/// Fully resolved configuration for spawning a process
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessConfig {
    /// Process name (tags logs and events)
    pub name: String,
    /// Executable followed by its arguments
    pub cmd: Vec<String>,
    /// Environment overlay applied on top of the launcher's environment
    pub env: IndexMap<String, String>,
    /// Working directory
    pub working_dir: Option<PathBuf>,
    pub output: OutputPolicy,
}

/// Event emitted by a spawned process
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    /// Process started
    Started { pid: u32 },
    /// Process output line (stdout or stderr)
    Output { line: String, is_stderr: bool },
    /// Process exited
    Exited { code: Option<i32> },
    /// Process failed to start
    Failed { error: String },
}

/// The launcher's live reference to a spawned child
pub struct ProcessHandle {
    /// Process configuration
    pub config: ProcessConfig,
    /// Current status
    pub status: ProcessStatus,
    /// Process ID (if running)
    pub pid: Option<u32>,
    /// Start time
    pub started_at: Option<Instant>,
    /// Child process handle
    child: Option<Child>,
    /// Event sender
    event_tx: Option<EventSender>,
}

impl ProcessHandle {
    pub fn new(config: ProcessConfig) -> Self {
        Self {
            config,
            status: ProcessStatus::Pending,
            pid: None,
            started_at: None,
            child: None,
            event_tx: None,
        }
    }

    /// Set the event sender for this process
    pub fn with_event_sender(mut self, tx: EventSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn emit(&self, event: ProcessEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send((self.config.name.clone(), event));
        }
    }

    /// Spawn the process; must be called from within a tokio runtime
    pub fn start(&mut self) -> Result<(), ProcessError> {
        if self.status.is_running() {
            return Err(ProcessError::AlreadyRunning(self.config.name.clone()));
        }

        let Some((program, args)) = self.config.cmd.split_first() else {
            self.status = ProcessStatus::Failed;
            return Err(ProcessError::EmptyCommand(self.config.name.clone()));
        };

        log::info!("[{}] Starting: {}", self.config.name, self.config.cmd.join(" "));

        let mut cmd = Command::new(program);
        cmd.args(args).envs(&self.config.env).kill_on_drop(true);

        match self.config.output {
            OutputPolicy::Inherit => {
                cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
            OutputPolicy::Capture => {
                cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
        }

        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        match cmd.spawn() {
            Ok(mut child) => {
                let pid = child.id().unwrap_or(0);
                self.pid = Some(pid);
                self.status = ProcessStatus::Running;
                self.started_at = Some(Instant::now());
                self.emit(ProcessEvent::Started { pid });

                if let Some(stdout) = child.stdout.take() {
                    forward_lines(self.config.name.clone(), stdout, false, self.event_tx.clone());
                }
                if let Some(stderr) = child.stderr.take() {
                    forward_lines(self.config.name.clone(), stderr, true, self.event_tx.clone());
                }

                self.child = Some(child);
                Ok(())
            }
            Err(e) => {
                self.status = ProcessStatus::Failed;
                let error = format!("Failed to spawn process: {}", e);
                log::error!("[{}] {}", self.config.name, error);
                self.emit(ProcessEvent::Failed { error });

                Err(ProcessError::SpawnFailed {
                    name: self.config.name.clone(),
                    source: e,
                })
            }
        }
    }

    /// Stop the process gracefully (SIGTERM, then SIGKILL after timeout)
    pub async fn stop(&mut self, timeout: Duration) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        log::info!("[{}] Stopping process...", self.config.name);

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = self.pid {
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }
        }

        #[cfg(not(unix))]
        {
            // No graceful signal available, kill immediately
            let _ = child.start_kill();
        }

        let code = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status.code(),
            Ok(Err(e)) => {
                log::error!("[{}] Error waiting for process: {}", self.config.name, e);
                None
            }
            Err(_) => {
                log::warn!(
                    "[{}] Process did not exit gracefully, forcing kill",
                    self.config.name
                );
                let _ = child.start_kill();
                child.wait().await.ok().and_then(|status| status.code())
            }
        };

        log::info!("[{}] Process exited with code: {:?}", self.config.name, code);
        self.status = ProcessStatus::Stopped(code);
        self.pid = None;
        self.emit(ProcessEvent::Exited { code });
    }

    /// Poll for exit without blocking, reaping the child if it has exited
    pub fn check_status(&mut self) -> ProcessStatus {
        if let Some(child) = &mut self.child {
            match child.try_wait() {
                Ok(Some(status)) => {
                    let code = status.code();
                    self.status = ProcessStatus::Stopped(code);
                    self.pid = None;
                    self.child = None;
                    self.emit(ProcessEvent::Exited { code });
                }
                Ok(None) => {}
                Err(e) => {
                    log::error!(
                        "[{}] Error checking process status: {}",
                        self.config.name,
                        e
                    );
                }
            }
        }

        self.status
    }

    /// Get uptime duration
    pub fn uptime(&self) -> Option<Duration> {
        self.started_at.map(|t| t.elapsed())
    }
}

/// Read `stream` line by line on a background task until EOF
///
/// Lines go to the event channel when there is one, otherwise straight to the log.
/// Invalid UTF-8 is replaced rather than ending the read, so the pipe stays open.
fn forward_lines<R>(name: String, stream: R, is_stderr: bool, tx: Option<EventSender>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    log::warn!("[{}] Error reading output: {}", name, e);
                    break;
                }
            }

            let line = String::from_utf8_lossy(&buf)
                .trim_end_matches(['\n', '\r'])
                .to_string();
            match &tx {
                Some(tx) => {
                    let _ = tx.send((name.clone(), ProcessEvent::Output { line, is_stderr }));
                }
                None if is_stderr => log::warn!("[{}] {}", name, line),
                None => log::info!("[{}] {}", name, line),
            }
        }
    });
}

/// Errors that can occur with spawned processes
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Process '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Process '{0}' has an empty command line")]
    EmptyCommand(String),

    #[error("Failed to spawn process '{name}': {source}")]
    SpawnFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },
}
