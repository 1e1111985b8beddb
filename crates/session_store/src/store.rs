use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use agent_protocol::{ConversationItem, TabId};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::SessionStoreError;
use crate::paths::{session_file_name, session_root};
use crate::schema::{JsonLine, SessionEntry, SessionHeader};

/// Append-only history log of one worker session.
pub struct SessionStore {
    path: PathBuf,
    file: File,
    header: SessionHeader,
    entries: Vec<SessionEntry>,
    current_leaf_id: Option<String>,
}

impl SessionStore {
    /// Starts a new log under `<cwd>/.agent/sessions/` and writes its header.
    pub fn create_new(cwd: &Path, tab_id: Option<TabId>) -> Result<Self, SessionStoreError> {
        if !cwd.is_absolute() {
            return Err(SessionStoreError::RelativeCreateRoot {
                path: cwd.to_path_buf(),
            });
        }

        let root = session_root(cwd);
        fs::create_dir_all(&root)
            .map_err(|source| SessionStoreError::io("creating session directory", &root, source))?;

        let session_id = uuid::Uuid::new_v4().to_string();
        let created_at = now_rfc3339()?;
        let path = root.join(session_file_name(&created_at, &session_id));

        let mut header = SessionHeader::v1(session_id, created_at, cwd.display().to_string());
        if let Some(tab_id) = tab_id {
            header = header.with_tab_id(tab_id);
        }

        let mut file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)
            .map_err(|source| SessionStoreError::io("creating session file", &path, source))?;
        write_record(&mut file, &path, &header)?;

        tracing::debug!(path = %path.display(), "created session history log");

        Ok(Self {
            path,
            file,
            header,
            entries: Vec::new(),
            current_leaf_id: None,
        })
    }

    /// Reopens an existing log for appending after validating every line.
    pub fn open(path: &Path) -> Result<Self, SessionStoreError> {
        let (header, entries) = read_session_file(path)?;
        let current_leaf_id = entries.last().map(|entry| entry.id.clone());

        let file = OpenOptions::new().append(true).open(path).map_err(|source| {
            SessionStoreError::io("opening session file for append", path, source)
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            header,
            entries,
            current_leaf_id,
        })
    }

    /// Records `item` as the new leaf and returns the written entry.
    pub fn append(&mut self, item: ConversationItem) -> Result<&SessionEntry, SessionStoreError> {
        let entry = SessionEntry::new(
            uuid::Uuid::new_v4().to_string(),
            self.current_leaf_id.clone(),
            now_rfc3339()?,
            item,
        );
        write_record(&mut self.file, &self.path, &entry)?;

        self.current_leaf_id = Some(entry.id.clone());
        self.entries.push(entry);
        let index = self.entries.len() - 1;
        Ok(&self.entries[index])
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn header(&self) -> &SessionHeader {
        &self.header
    }

    #[must_use]
    pub fn entries(&self) -> &[SessionEntry] {
        &self.entries
    }

    #[must_use]
    pub fn current_leaf_id(&self) -> Option<&str> {
        self.current_leaf_id.as_deref()
    }
}

/// Parses and validates a whole history log without opening it for writes.
pub fn read_session_file(
    path: &Path,
) -> Result<(SessionHeader, Vec<SessionEntry>), SessionStoreError> {
    let read_file = File::open(path)
        .map_err(|source| SessionStoreError::io("opening session file", path, source))?;
    let reader = BufReader::new(read_file);

    let mut header: Option<SessionHeader> = None;
    let mut entries_with_lines: Vec<(usize, SessionEntry)> = Vec::new();
    let mut index_by_id = HashMap::new();

    for (line_index, line_result) in reader.lines().enumerate() {
        let line_number = line_index + 1;
        let line =
            line_result.map_err(|source| SessionStoreError::io_line(path, line_number, source))?;
        let parsed = parse_json_line(path, line_number, &line)?;

        if line_number == 1 {
            match parsed {
                JsonLine::Session(parsed_header) => {
                    validate_header_line(path, line_number, &parsed_header)?;
                    header = Some(parsed_header);
                }
                _ => {
                    return Err(SessionStoreError::HeaderExpected {
                        path: path.to_path_buf(),
                        line: line_number,
                    });
                }
            }
            continue;
        }

        match parsed {
            JsonLine::Entry(entry) => {
                validate_entry_line(path, line_number, &entry)?;
                if index_by_id.contains_key(&entry.id) {
                    return Err(SessionStoreError::DuplicateItemId {
                        path: path.to_path_buf(),
                        line: line_number,
                        id: entry.id,
                    });
                }

                index_by_id.insert(entry.id.clone(), entries_with_lines.len());
                entries_with_lines.push((line_number, entry));
            }
            _ => {
                return Err(SessionStoreError::ItemExpected {
                    path: path.to_path_buf(),
                    line: line_number,
                });
            }
        }
    }

    let header = header.ok_or_else(|| SessionStoreError::MissingHeader {
        path: path.to_path_buf(),
    })?;
    validate_entry_graph(path, &entries_with_lines, &index_by_id)?;

    let entries = entries_with_lines
        .into_iter()
        .map(|(_, entry)| entry)
        .collect();
    Ok((header, entries))
}

fn write_record<T: serde::Serialize>(
    file: &mut File,
    path: &Path,
    record: &T,
) -> Result<(), SessionStoreError> {
    let mut line = serde_json::to_string(record)
        .map_err(|source| SessionStoreError::json_serialize(path, source))?;
    line.push('\n');
    // One write per record keeps concurrent readers from seeing a torn line.
    file.write_all(line.as_bytes())
        .and_then(|()| file.flush())
        .map_err(|source| SessionStoreError::io("appending to session file", path, source))
}

pub(crate) fn now_rfc3339() -> Result<String, SessionStoreError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(SessionStoreError::Clock)
}

pub(crate) fn parse_json_line(
    path: &Path,
    line_number: usize,
    line: &str,
) -> Result<JsonLine, SessionStoreError> {
    JsonLine::from_str(line).map_err(|source| SessionStoreError::json_line(path, line_number, source))
}

pub(crate) fn validate_header_line(
    path: &Path,
    line_number: usize,
    header: &SessionHeader,
) -> Result<(), SessionStoreError> {
    if header.version != 1 {
        return Err(SessionStoreError::UnsupportedVersion {
            path: path.to_path_buf(),
            line: line_number,
            found: header.version,
        });
    }

    validate_rfc3339(path, line_number, "created_at", &header.created_at)?;

    if !Path::new(&header.cwd).is_absolute() {
        return Err(SessionStoreError::RelativeWorkspace {
            path: path.to_path_buf(),
            line: line_number,
            cwd: header.cwd.clone(),
        });
    }

    Ok(())
}

pub(crate) fn validate_entry_line(
    path: &Path,
    line_number: usize,
    entry: &SessionEntry,
) -> Result<(), SessionStoreError> {
    validate_rfc3339(path, line_number, "ts", &entry.ts)
}

pub(crate) fn validate_entry_graph(
    path: &Path,
    entries_with_lines: &[(usize, SessionEntry)],
    index_by_id: &HashMap<String, usize>,
) -> Result<(), SessionStoreError> {
    for (line_number, entry) in entries_with_lines {
        if let Some(parent_id) = &entry.parent_id {
            if !index_by_id.contains_key(parent_id) {
                return Err(SessionStoreError::UnknownParent {
                    path: path.to_path_buf(),
                    line: *line_number,
                    item_id: entry.id.clone(),
                    parent_id: parent_id.clone(),
                });
            }
        }
    }

    Ok(())
}

pub(crate) fn validate_rfc3339(
    path: &Path,
    line_number: usize,
    field: &'static str,
    value: &str,
) -> Result<(), SessionStoreError> {
    if OffsetDateTime::parse(value, &Rfc3339).is_err() {
        return Err(SessionStoreError::InvalidTimestamp {
            path: path.to_path_buf(),
            line: line_number,
            field,
            value: value.to_string(),
        });
    }

    Ok(())
}
