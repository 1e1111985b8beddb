use agent_protocol::{ConversationItem, TabId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionRecordType {
    Session,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryRecordType {
    Entry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionHeader {
    #[serde(rename = "type")]
    pub record_type: SessionRecordType,
    pub version: u32,
    pub session_id: String,
    pub created_at: String,
    pub cwd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<TabId>,
}

impl SessionHeader {
    #[must_use]
    pub fn v1(
        session_id: impl Into<String>,
        created_at: impl Into<String>,
        cwd: impl Into<String>,
    ) -> Self {
        Self {
            record_type: SessionRecordType::Session,
            version: 1,
            session_id: session_id.into(),
            created_at: created_at.into(),
            cwd: cwd.into(),
            tab_id: None,
        }
    }

    #[must_use]
    pub fn with_tab_id(mut self, tab_id: TabId) -> Self {
        self.tab_id = Some(tab_id);
        self
    }
}

/// One transcript item as recorded in a history log.
///
/// Entries form a parent chain in append order; `parent_id` is `None` only
/// for the first entry of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionEntry {
    #[serde(rename = "type")]
    pub record_type: EntryRecordType,
    pub id: String,
    pub parent_id: Option<String>,
    pub ts: String,
    pub item: ConversationItem,
}

impl SessionEntry {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        parent_id: Option<impl Into<String>>,
        ts: impl Into<String>,
        item: ConversationItem,
    ) -> Self {
        Self {
            record_type: EntryRecordType::Entry,
            id: id.into(),
            parent_id: parent_id.map(Into::into),
            ts: ts.into(),
            item,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum JsonLine {
    Session(SessionHeader),
    Entry(SessionEntry),
    Unknown,
}

impl JsonLine {
    pub(crate) fn from_str(line: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(line)?;
        match value.get("type").and_then(Value::as_str) {
            Some("session") => serde_json::from_value(value).map(Self::Session),
            Some("entry") => serde_json::from_value(value).map(Self::Entry),
            _ => Ok(Self::Unknown),
        }
    }
}
