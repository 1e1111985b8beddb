use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("path escapes workspace root: {0}")]
    PathViolation(String),
    #[error("{0} must be read with read_file before it is modified")]
    ReadBeforeWrite(String),
    #[error("tool {0} is not in the allowed tool list")]
    Disallowed(String),
    #[error("tool {0} has no local implementation")]
    Unsupported(String),
    #[error("tool manifest unavailable: {0}")]
    Manifest(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("failed to {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("{path} exceeds max read size ({size} bytes > {limit} bytes)")]
    TooLarge {
        path: String,
        size: u64,
        limit: u64,
    },
    #[error("{0} is not valid UTF-8 text")]
    NotUtf8(String),
    #[error("{0} is a directory")]
    IsDirectory(String),
    #[error("{0} is not a directory")]
    NotDirectory(String),
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("patch rejected: {0}")]
    PatchRejected(String),
    #[error("{0}")]
    Subprocess(String),
    #[error("no app is linked; use /app link <id> or /app create <name> first")]
    NoLinkedApp,
    #[error("deploying deleted files is not supported: {0}")]
    DeletionUnsupported(String),
    #[error("nothing to deploy: the working tree has no changes")]
    NothingToDeploy,
    #[error("remote call failed: {0}")]
    Remote(String),
}

impl SandboxError {
    pub(crate) fn io(action: &'static str, path: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }
}
