//! Process logging.
//!
//! Every process writes JSON lines to its own daily file under the log
//! directory. Nothing goes to the console: the supervisor's stdout is the UI
//! and worker stdio is discarded.

use std::fs;
use std::path::{Path, PathBuf};

use agent_protocol::TabId;
use anyhow::Context;
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_FILE_PREFIX: &str = "agent-tabs";
pub const LOG_RETENTION_DAYS: i64 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessKind {
    Supervisor,
    Worker(TabId),
}

impl ProcessKind {
    /// File name component, e.g. `supervisor` or `worker-3`.
    #[must_use]
    pub fn label(self) -> String {
        match self {
            Self::Supervisor => "supervisor".to_string(),
            Self::Worker(tab_id) => format!("worker-{tab_id}"),
        }
    }
}

/// `<root>/.agent/logs` unless the environment names a directory.
#[must_use]
pub fn default_logs_dir(root: &Path, configured: Option<&Path>) -> PathBuf {
    configured.map_or_else(
        || root.join(session_store::AGENT_DIR).join("logs"),
        Path::to_path_buf,
    )
}

/// Installs the global subscriber. Keep the guard alive for the life of the
/// process; dropping it flushes and stops the writer thread.
pub fn init_process_logging(process: ProcessKind, logs_dir: &Path) -> anyhow::Result<WorkerGuard> {
    fs::create_dir_all(logs_dir)
        .with_context(|| format!("failed to create log directory {}", logs_dir.display()))?;
    if process == ProcessKind::Supervisor {
        let today = OffsetDateTime::now_utc().date();
        cleanup_old_logs(logs_dir, today, LOG_RETENTION_DAYS);
    }

    let file_appender = tracing_appender::rolling::Builder::new()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix(format!("{LOG_FILE_PREFIX}.{}", process.label()))
        .filename_suffix("jsonl")
        .build(logs_dir)
        .context("failed to open log file")?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_current_span(false)
        .with_span_list(false);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .try_init()
        .ok();

    Ok(guard)
}

/// Removes `agent-tabs.<process>.<date>.jsonl` files older than the
/// retention window. Files that do not match the pattern are left alone.
pub fn cleanup_old_logs(logs_dir: &Path, today: Date, retention_days: i64) -> usize {
    let Ok(entries) = fs::read_dir(logs_dir) else {
        return 0;
    };
    let cutoff = today - time::Duration::days(retention_days);
    let mut removed = 0;

    for entry in entries.flatten() {
        let path = entry.path();
        let Some(date) = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(log_file_date)
        else {
            continue;
        };
        if date < cutoff && fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }
    removed
}

fn log_file_date(name: &str) -> Option<Date> {
    let stem = name
        .strip_prefix(LOG_FILE_PREFIX)?
        .strip_prefix('.')?
        .strip_suffix(".jsonl")?;
    let (_, date) = stem.rsplit_once('.')?;
    Date::parse(date, format_description!("[year]-[month]-[day]")).ok()
}

/// Masks a secret for log fields, keeping only its length.
#[must_use]
pub fn redact(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    format!("[redacted len={}]", trimmed.len())
}
