use std::path::{Path, PathBuf};

use agent_protocol::ConversationItem;

use crate::error::SessionStoreError;
use crate::paths::list_session_files;
use crate::store::read_session_file;

/// One recorded transcript item, flattened out of its session log.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub session_id: String,
    pub ts: String,
    pub item: ConversationItem,
}

/// Every readable history record under a workspace, oldest session first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryIndex {
    pub records: Vec<HistoryRecord>,
    /// Logs that failed validation, with the reason.
    pub skipped: Vec<(PathBuf, String)>,
}

impl HistoryIndex {
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Case-insensitive substring match over each record's summary and raw
    /// JSON; returns `(index, record)` pairs with indexes into `records`.
    #[must_use]
    pub fn search(&self, needle: &str) -> Vec<(usize, &HistoryRecord)> {
        let needle = needle.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }

        self.records
            .iter()
            .enumerate()
            .filter(|(_, record)| {
                record.item.summary().to_lowercase().contains(&needle)
                    || record.item.to_value().to_string().to_lowercase().contains(&needle)
            })
            .collect()
    }
}

/// Loads every session log under `<cwd>/.agent/sessions`.
///
/// A log that fails to parse is skipped rather than failing the whole load;
/// other workers may be writing their own logs concurrently.
pub fn load_history(cwd: &Path) -> Result<HistoryIndex, SessionStoreError> {
    let mut index = HistoryIndex::default();

    for path in list_session_files(cwd)? {
        match read_session_file(&path) {
            Ok((header, entries)) => {
                index
                    .records
                    .extend(entries.into_iter().map(|entry| HistoryRecord {
                        session_id: header.session_id.clone(),
                        ts: entry.ts,
                        item: entry.item,
                    }));
            }
            Err(error) => {
                tracing::warn!(path = %path.display(), line = ?error.line(), error = %error, "skipping unreadable session log");
                index.skipped.push((path, error.to_string()));
            }
        }
    }

    Ok(index)
}
