use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use agent_protocol::{ChatMode, ExecutionMode};
use serde::{Deserialize, Serialize};

use crate::error::SessionStoreError;
use crate::paths::settings_path;

/// Session settings a worker restores at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(default)]
    pub mode: ChatMode,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_code: Option<String>,
}

/// JSON settings file, rewritten whole on every save.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `<root>/.agent/settings.json`.
    #[must_use]
    pub fn for_workspace(root: &Path) -> Self {
        Self::new(settings_path(root))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the settings; a missing file yields the defaults.
    pub fn load(&self) -> Result<SessionSettings, SessionStoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Ok(SessionSettings::default())
            }
            Err(error) => return Err(SessionStoreError::io("reading settings", &self.path, error)),
        };
        if raw.trim().is_empty() {
            return Ok(SessionSettings::default());
        }

        serde_json::from_str(&raw).map_err(|source| SessionStoreError::SettingsParse {
            path: self.path.clone(),
            source,
        })
    }

    /// Writes through a sibling temp file and renames it over the target, so
    /// readers see either the old or the new settings.
    pub fn save(&self, settings: &SessionSettings) -> Result<(), SessionStoreError> {
        let dir = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)
            .map_err(|source| SessionStoreError::io("creating settings directory", dir, source))?;

        let mut body = serde_json::to_vec_pretty(settings)
            .map_err(|source| SessionStoreError::json_serialize(&self.path, source))?;
        body.push(b'\n');

        let mut temp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|source| SessionStoreError::io("creating temp settings file", dir, source))?;
        temp.write_all(&body)
            .and_then(|()| temp.as_file().sync_all())
            .map_err(|source| SessionStoreError::io("writing temp settings file", temp.path(), source))?;
        temp.persist(&self.path).map_err(|error| {
            SessionStoreError::io("replacing settings file", &self.path, error.error)
        })?;
        Ok(())
    }

    /// Loads, applies `change`, and saves the result.
    pub fn update(
        &self,
        change: impl FnOnce(&mut SessionSettings),
    ) -> Result<SessionSettings, SessionStoreError> {
        let mut settings = self.load()?;
        change(&mut settings);
        self.save(&settings)?;
        Ok(settings)
    }
}
