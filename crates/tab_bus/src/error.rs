use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("failed to {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("bus read failed: {0}")]
    Read(#[source] std::io::Error),

    #[error("bus write failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("failed to encode bus message: {0}")]
    Encode(#[from] serde_json::Error),
}

impl BusError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }
}
