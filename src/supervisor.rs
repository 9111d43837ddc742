//! Lifecycle management for the external classifier worker.
//!
//! The worker is an HTTP microservice the pipeline talks to in remote
//! inference mode. When configured with a launch command, the supervisor
//! starts it on demand, waits for its port to accept connections, forwards
//! its output into our logs, and terminates it on shutdown. A worker that is
//! already listening (started by an operator) is left alone.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::error::ServiceError;

/// TCP connect budget for a single readiness probe.
const PROBE_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Launch command and its arguments. Empty means "never spawn".
    pub command: Vec<String>,
    /// Working directory for the spawned worker.
    pub working_dir: Option<PathBuf>,
    /// Base URL the worker serves on; its host:port is what gets probed.
    pub url: String,
    /// Forwarded to the worker via the AI_CONFIDENCE environment variable.
    pub confidence: f32,
    /// Post-spawn readiness polling.
    pub poll_interval: Duration,
    pub poll_attempts: u32,
}

impl WorkerConfig {
    pub fn new(command: Vec<String>, working_dir: Option<PathBuf>, url: String, confidence: f32) -> Self {
        Self {
            command,
            working_dir,
            url,
            confidence,
            poll_interval: Duration::from_millis(150),
            poll_attempts: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Stopped,
    Starting,
    Running { pid: u32 },
}

pub struct WorkerSupervisor {
    config: WorkerConfig,
    state: Mutex<WorkerState>,
}

impl WorkerSupervisor {
    pub fn new(config: WorkerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Mutex::new(WorkerState::Stopped),
        })
    }

    /// Make sure a worker is accepting connections, spawning one if needed.
    ///
    /// Idempotent: a concurrent call while a spawn is in progress returns
    /// immediately and lets the first caller finish the job.
    pub async fn ensure_running(self: &Arc<Self>) -> Result<(), ServiceError> {
        let addr = worker_addr(&self.config.url).ok_or_else(|| {
            ServiceError::InferenceMisconfigured(format!(
                "cannot derive host:port from {}",
                self.config.url
            ))
        })?;

        if probe(&addr).await {
            return Ok(());
        }

        {
            let mut state = self.state.lock().unwrap();
            match *state {
                WorkerState::Starting => return Ok(()),
                WorkerState::Running { .. } => {
                    // Our child is alive but not accepting yet; fall through
                    // to the readiness poll without spawning another.
                }
                WorkerState::Stopped => {
                    if self.config.command.is_empty() {
                        return Err(ServiceError::InferenceUnavailable(format!(
                            "classifier not listening on {} and no launch command configured",
                            addr
                        )));
                    }
                    *state = WorkerState::Starting;
                }
            }
        }

        if *self.state.lock().unwrap() == WorkerState::Starting {
            if let Err(e) = self.spawn_worker() {
                *self.state.lock().unwrap() = WorkerState::Stopped;
                return Err(e);
            }
        }

        self.await_ready(&addr).await
    }

    fn spawn_worker(self: &Arc<Self>) -> Result<(), ServiceError> {
        let program = &self.config.command[0];
        let mut cmd = Command::new(program);
        cmd.args(&self.config.command[1..])
            .env("AI_CONFIDENCE", self.config.confidence.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            ServiceError::InferenceMisconfigured(format!("failed to launch {}: {}", program, e))
        })?;
        let pid = child.id().unwrap_or(0);
        info!(pid, command = %self.config.command.join(" "), "classifier worker spawned");

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, false));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, true));
        }

        *self.state.lock().unwrap() = WorkerState::Running { pid };

        // The watcher owns the child; it reaps the process and clears our
        // state whenever the worker exits, expected or not.
        let this = Arc::clone(self);
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => info!(pid, %status, "classifier worker exited"),
                Err(e) => error!(pid, error = %e, "failed waiting on classifier worker"),
            }
            let mut state = this.state.lock().unwrap();
            if *state == (WorkerState::Running { pid }) {
                *state = WorkerState::Stopped;
            }
        });

        Ok(())
    }

    async fn await_ready(&self, addr: &str) -> Result<(), ServiceError> {
        for _ in 0..self.config.poll_attempts {
            tokio::time::sleep(self.config.poll_interval).await;
            if probe(addr).await {
                info!(addr, "classifier worker ready");
                return Ok(());
            }
            if *self.state.lock().unwrap() == WorkerState::Stopped {
                return Err(ServiceError::InferenceUnavailable(
                    "classifier worker exited before becoming ready".into(),
                ));
            }
        }
        warn!(addr, "classifier worker did not become ready in time");
        Err(ServiceError::InferenceUnavailable(format!(
            "classifier did not accept connections on {}",
            addr
        )))
    }

    /// Graceful stop: SIGTERM to our child, if we have one. The exit watcher
    /// transitions the state once the process is gone.
    pub fn stop(&self) {
        let state = *self.state.lock().unwrap();
        if let WorkerState::Running { pid } = state {
            info!(pid, "stopping classifier worker");
            #[cfg(unix)]
            if let Err(e) = nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(pid as i32),
                nix::sys::signal::Signal::SIGTERM,
            ) {
                warn!(pid, error = %e, "failed to signal classifier worker");
            }
        }
    }

    #[cfg(test)]
    fn is_running(&self) -> bool {
        matches!(*self.state.lock().unwrap(), WorkerState::Running { .. })
    }
}

async fn forward_output(stream: impl tokio::io::AsyncRead + Unpin, is_stderr: bool) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if is_stderr {
            warn!(target: "classifier", "{}", line);
        } else {
            info!(target: "classifier", "{}", line);
        }
    }
}

/// `http://127.0.0.1:8001` → `127.0.0.1:8001`. Scheme and any path are
/// stripped; a missing port makes the URL unusable for probing.
fn worker_addr(url: &str) -> Option<String> {
    let without_scheme = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .unwrap_or(url);
    let host_port = without_scheme.split('/').next()?;
    let (_, port) = host_port.rsplit_once(':')?;
    port.parse::<u16>().ok()?;
    Some(host_port.to_string())
}

async fn probe(addr: &str) -> bool {
    matches!(
        tokio::time::timeout(PROBE_TIMEOUT, tokio::net::TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}
