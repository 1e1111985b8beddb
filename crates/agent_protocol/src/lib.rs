//! Shared conversation and session contract types.
//!
//! This crate defines the transcript item union exchanged with the remote chat
//! endpoint and the small session-state vocabulary shared by the session
//! driver, the IPC bus and the supervisor. It owns no transport or I/O.

mod item;
mod session;

pub use item::{
    AppEventItem, ContentPart, ConversationItem, MessageItem, ReasoningItem, Role, ToolCallItem,
    ToolOutputItem,
};
pub use session::{ChatMode, ExecutionMode, FooterState, LoginPhase, LoginState, Usage};

/// Identifier of one supervisor tab (and its worker process).
pub type TabId = u32;
