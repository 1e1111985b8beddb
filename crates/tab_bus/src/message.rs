use std::fmt;
use std::str::FromStr;

use agent_protocol::{FooterState, TabId};
use serde::{Deserialize, Serialize};

/// What a tab's worker hosts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TabMode {
    #[default]
    Chat,
    History,
}

impl TabMode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::History => "history",
        }
    }
}

impl fmt::Display for TabMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TabMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "chat" => Ok(Self::Chat),
            "history" => Ok(Self::History),
            other => Err(format!("unknown tab mode {other:?}; expected chat or history")),
        }
    }
}

/// One row of the history browser listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRow {
    pub index: usize,
    pub session: String,
    pub ts: String,
    pub kind: String,
    pub summary: String,
}

/// Everything that crosses the bus, in either direction.
///
/// `Input` and `Shutdown` flow supervisor to worker; the rest flow worker to
/// supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMessage {
    #[serde(rename_all = "camelCase")]
    Register { tab_id: TabId, mode: TabMode },
    #[serde(rename_all = "camelCase")]
    Line { tab_id: TabId, text: String },
    /// Replaces the tab's live buffer; empty text clears it.
    #[serde(rename_all = "camelCase")]
    Stream { tab_id: TabId, text: String },
    #[serde(rename_all = "camelCase")]
    History { tab_id: TabId, rows: Vec<HistoryRow> },
    #[serde(rename_all = "camelCase")]
    State {
        tab_id: TabId,
        footer_state: FooterState,
    },
    #[serde(rename_all = "camelCase")]
    Input { tab_id: TabId, text: String },
    #[serde(rename_all = "camelCase")]
    Shutdown { tab_id: TabId },
}

impl BusMessage {
    #[must_use]
    pub fn tab_id(&self) -> TabId {
        match self {
            Self::Register { tab_id, .. }
            | Self::Line { tab_id, .. }
            | Self::Stream { tab_id, .. }
            | Self::History { tab_id, .. }
            | Self::State { tab_id, .. }
            | Self::Input { tab_id, .. }
            | Self::Shutdown { tab_id } => *tab_id,
        }
    }

    /// Wire `type` tag.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Line { .. } => "line",
            Self::Stream { .. } => "stream",
            Self::History { .. } => "history",
            Self::State { .. } => "state",
            Self::Input { .. } => "input",
            Self::Shutdown { .. } => "shutdown",
        }
    }
}
