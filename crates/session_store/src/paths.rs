use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::SessionStoreError;

pub const AGENT_DIR: &str = ".agent";
pub const SESSION_DIR: [&str; 2] = [AGENT_DIR, "sessions"];
pub const SETTINGS_FILE: &str = "settings.json";

#[must_use]
pub fn session_root(cwd: &Path) -> PathBuf {
    cwd.join(SESSION_DIR[0]).join(SESSION_DIR[1])
}

#[must_use]
pub fn settings_path(cwd: &Path) -> PathBuf {
    cwd.join(AGENT_DIR).join(SETTINGS_FILE)
}

#[must_use]
pub fn sanitize_timestamp_for_filename(timestamp: &str) -> String {
    timestamp
        .chars()
        .map(|c| match c {
            ':' | '/' | '\\' | ' ' => '-',
            _ => c,
        })
        .collect()
}

#[must_use]
pub fn session_file_name(created_at: &str, session_id: &str) -> String {
    format!(
        "{}_{}.jsonl",
        sanitize_timestamp_for_filename(created_at),
        session_id
    )
}

/// Lists `*.jsonl` files under the session root, oldest first.
///
/// File names start with the sanitized creation timestamp, so name order is
/// creation order. A missing root yields an empty list.
pub fn list_session_files(cwd: &Path) -> Result<Vec<PathBuf>, SessionStoreError> {
    let root = session_root(cwd);
    let read_dir = match fs::read_dir(&root) {
        Ok(read_dir) => read_dir,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(error) => return Err(SessionStoreError::io("listing sessions", &root, error)),
    };

    let mut files = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|source| SessionStoreError::io("listing sessions", &root, source))?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "jsonl") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
