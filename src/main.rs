use std::path::{Path, PathBuf};
use std::time::Duration;

use agent_protocol::TabId;
use agent_tabs::config::RuntimeConfig;
use agent_tabs::logging::{default_logs_dir, init_process_logging, ProcessKind};
use agent_tabs::supervisor::{default_socket_path, run_supervisor};
use agent_tabs::worker::{run_worker, WorkerOptions};
use anyhow::Context;
use clap::{Parser, Subcommand};
use tab_bus::TabMode;

const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

#[derive(Parser, Debug)]
#[command(name = "agent-tabs")]
#[command(about = "Multi-tab terminal agent runtime")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open the tabbed session (the default).
    Run {
        /// Workspace root; defaults to the current directory.
        #[arg(long)]
        root: Option<PathBuf>,
        /// Bus socket path; defaults to a per-process path.
        #[arg(long)]
        socket: Option<PathBuf>,
    },
    /// Serve one tab. Spawned by the supervisor.
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        tab_id: TabId,
        #[arg(long, default_value = "chat")]
        mode: TabMode,
        #[arg(long, env = "AGENT_TABS_SOCKET")]
        socket: PathBuf,
        #[arg(long)]
        root: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = RuntimeConfig::from_env();

    match cli.command.unwrap_or(Command::Run {
        root: None,
        socket: None,
    }) {
        Command::Run { root, socket } => {
            let root = resolve_root(root)?;
            let socket = socket
                .or_else(|| config.socket.clone())
                .unwrap_or_else(default_socket_path);
            let _log_guard = init_process_logging(
                ProcessKind::Supervisor,
                &default_logs_dir(&root, config.log_dir.as_deref()),
            )?;

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to start the async runtime")?;
            let result = runtime.block_on(run_supervisor(&root, &socket));
            runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
            if let Err(error) = &result {
                tracing::error!(error = %format!("{error:#}"), "supervisor failed");
            }
            result
        }
        Command::Worker {
            tab_id,
            mode,
            socket,
            root,
        } => {
            let root = resolve_root(Some(root))?;
            let _log_guard = init_process_logging(
                ProcessKind::Worker(tab_id),
                &default_logs_dir(&root, config.log_dir.as_deref()),
            )?;

            // One thread per worker: its session is driven cooperatively.
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("failed to start the async runtime")?;
            let options = WorkerOptions { tab_id, mode, root };
            let result = runtime.block_on(run_worker(&socket, options, &config));
            if let Err(error) = &result {
                tracing::error!(tab_id, error = %format!("{error:#}"), "worker failed");
            }
            result
        }
    }
}

fn resolve_root(root: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let root = match root {
        Some(root) => root,
        None => std::env::current_dir().context("failed to read the current directory")?,
    };
    canonical(&root)
}

fn canonical(path: &Path) -> anyhow::Result<PathBuf> {
    path.canonicalize()
        .with_context(|| format!("workspace root {} is not accessible", path.display()))
}
