use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tokio::net::UnixListener;

use crate::connection::BusConnection;
use crate::error::BusError;

/// The supervisor's end of the bus.
pub struct BusListener {
    listener: UnixListener,
    path: PathBuf,
}

impl BusListener {
    /// Binds `path`, unlinking a stale socket file left by an earlier run.
    ///
    /// A live listener at the same path is evicted the same way: new workers
    /// reach this process from then on.
    pub fn bind(path: &Path) -> Result<Self, BusError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|source| BusError::io("create socket directory", parent, source))?;
        }

        match fs::remove_file(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "removed stale bus socket"),
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => return Err(BusError::io("remove stale socket", path, error)),
        }

        let listener = UnixListener::bind(path)
            .map_err(|source| BusError::io("bind bus socket", path, source))?;
        if let Err(error) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
            tracing::warn!(path = %path.display(), error = %error, "could not restrict bus socket permissions");
        }

        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn accept(&self) -> Result<BusConnection, BusError> {
        let (stream, _) = self
            .listener
            .accept()
            .await
            .map_err(|source| BusError::io("accept on", &self.path, source))?;
        Ok(BusConnection::from_stream(stream))
    }

    /// Removes the socket file. Call once the supervisor stops accepting.
    pub fn remove_socket_file(&self) {
        if let Err(error) = fs::remove_file(&self.path) {
            if error.kind() != ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %error, "failed to remove bus socket");
            }
        }
    }
}
