//! Local persistence for agent sessions.
//!
//! Two stores live under `<root>/.agent/`:
//!
//! - `sessions/*.jsonl`: one append-only history log per worker session. The
//!   first line is a [`SessionHeader`], every further line a [`SessionEntry`]
//!   wrapping one transcript item.
//! - `settings.json`: the [`SessionSettings`] a worker restores at startup,
//!   rewritten atomically after every change.

mod error;
mod history;
mod paths;
mod schema;
mod settings;
mod store;

pub use error::SessionStoreError;
pub use history::{load_history, HistoryIndex, HistoryRecord};
pub use paths::{
    list_session_files, session_file_name, session_root, settings_path, AGENT_DIR,
    SETTINGS_FILE,
};
pub use schema::{EntryRecordType, SessionEntry, SessionHeader, SessionRecordType};
pub use settings::{SessionSettings, SettingsStore};
pub use store::{read_session_file, SessionStore};
