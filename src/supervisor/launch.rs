use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use agent_protocol::TabId;
use anyhow::Context;
use tab_bus::TabMode;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::config::SOCKET_VAR;

/// How long a closed tab gets to exit before it is killed.
pub const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Whatever runs a tab's worker.
pub enum TabHandle {
    Process(Child),
    /// A worker running inside this process.
    Task(JoinHandle<anyhow::Result<()>>),
}

impl TabHandle {
    /// Waits up to [`CLOSE_GRACE`] for the worker to finish, then kills it.
    pub async fn reap(self, tab_id: TabId) {
        match self {
            Self::Process(mut child) => {
                match tokio::time::timeout(CLOSE_GRACE, child.wait()).await {
                    Ok(Ok(status)) => tracing::info!(tab_id, %status, "worker exited"),
                    Ok(Err(error)) => tracing::warn!(tab_id, error = %error, "failed to wait for worker"),
                    Err(_) => {
                        tracing::warn!(tab_id, "worker ignored shutdown; killing it");
                        if let Err(error) = child.kill().await {
                            tracing::warn!(tab_id, error = %error, "failed to kill worker");
                        }
                    }
                }
            }
            Self::Task(mut task) => {
                match tokio::time::timeout(CLOSE_GRACE, &mut task).await {
                    Ok(Ok(Ok(()))) => tracing::info!(tab_id, "worker task finished"),
                    Ok(Ok(Err(error))) => tracing::warn!(tab_id, error = %error, "worker task failed"),
                    Ok(Err(error)) => tracing::warn!(tab_id, error = %error, "worker task panicked"),
                    Err(_) => task.abort(),
                }
            }
        }
    }

    /// Non-blocking check for a worker that already finished.
    pub fn has_exited(&mut self) -> bool {
        match self {
            Self::Process(child) => match child.try_wait() {
                Ok(status) => status.is_some(),
                Err(error) => {
                    tracing::warn!(error = %error, "failed to poll worker status");
                    false
                }
            },
            Self::Task(task) => task.is_finished(),
        }
    }

    /// Reaps in the background so the caller does not block on it.
    pub fn reap_in_background(self, tab_id: TabId) {
        tokio::spawn(self.reap(tab_id));
    }
}

pub trait TabLauncher {
    /// Starts the worker for a new tab. A failure here is fatal to the
    /// supervisor.
    fn launch(&mut self, tab_id: TabId, mode: TabMode) -> anyhow::Result<TabHandle>;
}

/// Re-executes this binary's hidden `worker` subcommand per tab.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    socket: PathBuf,
    root: PathBuf,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, socket: &Path, root: &Path) -> Self {
        Self {
            program: program.into(),
            socket: socket.to_path_buf(),
            root: root.to_path_buf(),
        }
    }

    pub fn current_exe(socket: &Path, root: &Path) -> anyhow::Result<Self> {
        let program = std::env::current_exe().context("failed to locate the running executable")?;
        Ok(Self::new(program, socket, root))
    }

    /// Arguments for the worker subcommand, in order.
    #[must_use]
    pub fn worker_args(&self, tab_id: TabId, mode: TabMode) -> Vec<String> {
        vec![
            "worker".to_string(),
            "--tab-id".to_string(),
            tab_id.to_string(),
            "--mode".to_string(),
            mode.to_string(),
            "--socket".to_string(),
            self.socket.display().to_string(),
            "--root".to_string(),
            self.root.display().to_string(),
        ]
    }
}

impl TabLauncher for ProcessLauncher {
    fn launch(&mut self, tab_id: TabId, mode: TabMode) -> anyhow::Result<TabHandle> {
        let child = Command::new(&self.program)
            .args(self.worker_args(tab_id, mode))
            .env(SOCKET_VAR, &self.socket)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn worker for tab {tab_id}"))?;
        tracing::info!(tab_id, %mode, pid = child.id(), "spawned worker");
        Ok(TabHandle::Process(child))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_args_carry_the_socket_and_root() {
        let launcher = ProcessLauncher::new(
            "/usr/local/bin/agent-tabs",
            Path::new("/tmp/agent-tabs-1.sock"),
            Path::new("/work"),
        );
        assert_eq!(
            launcher.worker_args(4, TabMode::History),
            vec![
                "worker",
                "--tab-id",
                "4",
                "--mode",
                "history",
                "--socket",
                "/tmp/agent-tabs-1.sock",
                "--root",
                "/work",
            ]
        );
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        let _guard = runtime.enter();
        let mut launcher = ProcessLauncher::new(
            "/nonexistent/agent-tabs",
            Path::new("/tmp/bus.sock"),
            Path::new("/"),
        );
        let error = match launcher.launch(1, TabMode::Chat) {
            Ok(_) => panic!("launch should fail"),
            Err(error) => error,
        };
        assert!(error.to_string().contains("tab 1"));
    }
}
