//! Errors raised while reading or appending history logs and settings.
//!
//! Line numbers are 1-based and point into the log file named by `path`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("failed {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: read failed: {source}")]
    ReadLine {
        path: PathBuf,
        line: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: not a valid history record: {source}")]
    MalformedLine {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("history log {path} is empty; expected a session header")]
    MissingHeader { path: PathBuf },

    #[error("{path}:{line}: the first record of a history log must be its session header")]
    HeaderExpected { path: PathBuf, line: usize },

    #[error("{path}:{line}: history log version {found} is not supported (only 1 is)")]
    UnsupportedVersion {
        path: PathBuf,
        line: usize,
        found: u32,
    },

    #[error("{path}:{line}: conversation item id '{id}' was already logged")]
    DuplicateItemId {
        path: PathBuf,
        line: usize,
        id: String,
    },

    #[error("{path}:{line}: item '{item_id}' follows '{parent_id}', which is not in this log")]
    UnknownParent {
        path: PathBuf,
        line: usize,
        item_id: String,
        parent_id: String,
    },

    #[error("{path}:{line}: expected a logged conversation item after the header")]
    ItemExpected { path: PathBuf, line: usize },

    #[error("{path}:{line}: field '{field}' is not an RFC 3339 timestamp: {value}")]
    InvalidTimestamp {
        path: PathBuf,
        line: usize,
        field: &'static str,
        value: String,
    },

    #[error("{path}:{line}: workspace root {cwd} in the header is not absolute")]
    RelativeWorkspace {
        path: PathBuf,
        line: usize,
        cwd: String,
    },

    #[error("history logs need an absolute workspace root, got {path}")]
    RelativeCreateRoot { path: PathBuf },

    #[error("settings file {path} is not valid JSON: {source}")]
    SettingsParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not encode a record for {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("system clock time could not be formatted: {0}")]
    Clock(#[source] time::error::Format),
}

impl SessionStoreError {
    /// `action` reads as a gerund phrase, e.g. "opening session file".
    #[must_use]
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn io_line(path: impl Into<PathBuf>, line: usize, source: std::io::Error) -> Self {
        Self::ReadLine {
            path: path.into(),
            line,
            source,
        }
    }

    #[must_use]
    pub fn json_line(path: impl Into<PathBuf>, line: usize, source: serde_json::Error) -> Self {
        Self::MalformedLine {
            path: path.into(),
            line,
            source,
        }
    }

    #[must_use]
    pub fn json_serialize(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Encode {
            path: path.into(),
            source,
        }
    }

    /// The 1-based log line the error points at, when there is one.
    #[must_use]
    pub fn line(&self) -> Option<usize> {
        match self {
            Self::ReadLine { line, .. }
            | Self::MalformedLine { line, .. }
            | Self::HeaderExpected { line, .. }
            | Self::UnsupportedVersion { line, .. }
            | Self::DuplicateItemId { line, .. }
            | Self::UnknownParent { line, .. }
            | Self::ItemExpected { line, .. }
            | Self::InvalidTimestamp { line, .. }
            | Self::RelativeWorkspace { line, .. } => Some(*line),
            _ => None,
        }
    }
}
