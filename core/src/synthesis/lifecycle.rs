//! Start/stop management for a locally hosted speech backend.

use super::SpeechBackend;
use crate::{Result, ZundaError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a managed backend stays up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleScope {
    /// Started before and stopped after every synthesis call
    PerCall,
    /// Started once by the host and stopped at shutdown
    #[default]
    Session,
}

impl FromStr for LifecycleScope {
    type Err = ZundaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per_call" | "per-call" | "call" => Ok(Self::PerCall),
            "session" => Ok(Self::Session),
            other => Err(ZundaError::Config(format!(
                "unknown backend lifecycle scope '{other}' (expected per_call or session)"
            ))),
        }
    }
}

#[async_trait]
pub trait BackendLifecycle: Send + Sync {
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
}

/// Scoped acquisition of a backend.
///
/// Created by a successful `start`; `release` runs `stop` exactly once.
/// If the guard is dropped without being released (the owning future was
/// cancelled or panicked) the stop is spawned onto the current runtime.
pub struct LifecycleGuard {
    lifecycle: Option<Arc<dyn BackendLifecycle>>,
}

impl LifecycleGuard {
    pub async fn acquire(lifecycle: Arc<dyn BackendLifecycle>) -> Result<Self> {
        lifecycle.start().await?;
        Ok(Self {
            lifecycle: Some(lifecycle),
        })
    }

    pub async fn release(mut self) {
        if let Some(lc) = self.lifecycle.take() {
            if let Err(e) = lc.stop().await {
                warn!(target: "synthesis", error = %e, "Failed to stop speech backend");
            }
        }
    }
}

impl Drop for LifecycleGuard {
    fn drop(&mut self) {
        if let Some(lc) = self.lifecycle.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(e) = lc.stop().await {
                            warn!(target: "synthesis", error = %e, "Failed to stop speech backend");
                        }
                    });
                }
                Err(_) => {
                    warn!(target: "synthesis", "No runtime to stop speech backend on drop");
                }
            }
        }
    }
}

#[derive(Default)]
struct ProcessState {
    child: Option<Child>,
    /// Outstanding `start` calls not yet matched by a `stop`
    holders: usize,
}

/// Runs the backend as a child process of the bot.
///
/// The process is shared by everyone who called `start`: each `start` takes
/// a hold, each `stop` gives one back, and the child is killed only when the
/// last hold is released.
pub struct ProcessLifecycle {
    program: PathBuf,
    args: Vec<String>,
    readiness: Option<(Arc<dyn SpeechBackend>, Duration)>,
    state: Mutex<ProcessState>,
}

impl ProcessLifecycle {
    pub fn new(program: impl AsRef<Path>, args: Vec<String>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args,
            readiness: None,
            state: Mutex::new(ProcessState::default()),
        }
    }

    /// After spawning, poll `backend` until healthy or `timeout` elapses
    pub fn with_readiness(mut self, backend: Arc<dyn SpeechBackend>, timeout: Duration) -> Self {
        self.readiness = Some((backend, timeout));
        self
    }

    pub async fn is_running(&self) -> bool {
        let mut state = self.state.lock().await;
        match state.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Number of callers currently holding the backend
    pub async fn holders(&self) -> usize {
        self.state.lock().await.holders
    }

    async fn wait_ready(&self) {
        let Some((backend, timeout)) = &self.readiness else {
            return;
        };
        let deadline = tokio::time::Instant::now() + *timeout;
        loop {
            if backend.check_health().await.is_ok() {
                debug!(target: "synthesis", "Speech backend is ready");
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    target: "synthesis",
                    timeout_ms = timeout.as_millis() as u64,
                    "Speech backend not ready in time; continuing"
                );
                return;
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl BackendLifecycle for ProcessLifecycle {
    async fn start(&self) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            let running = match state.child.as_mut() {
                Some(child) => matches!(child.try_wait(), Ok(None)),
                None => false,
            };
            if running {
                state.holders += 1;
                debug!(target: "synthesis", holders = state.holders, "Speech backend already running");
                return Ok(());
            }

            let mut cmd = Command::new(&self.program);
            cmd.args(&self.args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true);
            debug!(target: "synthesis", command = ?cmd, "Spawning speech backend");
            let child = cmd.spawn().map_err(|e| {
                ZundaError::BackendProcess(format!(
                    "failed to spawn {}: {}",
                    self.program.display(),
                    e
                ))
            })?;
            info!(target: "synthesis", pid = ?child.id(), "Speech backend started");
            // Holders of an engine that died keep their count; they still owe a stop.
            state.child = Some(child);
            state.holders += 1;
        }
        self.wait_ready().await;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut child = {
            let mut state = self.state.lock().await;
            state.holders = state.holders.saturating_sub(1);
            if state.holders > 0 {
                debug!(target: "synthesis", holders = state.holders, "Speech backend still in use");
                return Ok(());
            }
            match state.child.take() {
                Some(child) => child,
                None => return Ok(()),
            }
        };
        if let Ok(Some(status)) = child.try_wait() {
            debug!(target: "synthesis", %status, "Speech backend already exited");
            return Ok(());
        }
        child
            .start_kill()
            .map_err(|e| ZundaError::BackendProcess(format!("failed to kill backend: {e}")))?;
        match tokio::time::timeout(STOP_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => {
                info!(target: "synthesis", %status, "Speech backend stopped");
                Ok(())
            }
            Ok(Err(e)) => Err(ZundaError::BackendProcess(format!(
                "failed to reap backend: {e}"
            ))),
            Err(_) => Err(ZundaError::BackendProcess(format!(
                "backend did not exit within {}s",
                STOP_TIMEOUT.as_secs()
            ))),
        }
    }
}
