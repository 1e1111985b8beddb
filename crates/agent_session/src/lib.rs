//! Conversation runtime for one agent tab.
//!
//! [`SessionDriver`] owns a single conversation: it sends turns to the chat
//! endpoint, folds decoded frames into the transcript, runs local tool calls
//! through the [`tool_sandbox`] and resubmits their results, and handles the
//! `/` command table including device-code login.

pub mod commands;
mod driver;
mod error;
mod remote;
mod update;

pub use commands::{parse_slash_command, AppCommand, SlashCommand, COMMAND_PREFIX, HELP_TEXT};
pub use driver::{Session, SessionDriver, SessionOptions, LOGIN_POLL_DELAY, MAX_TOOL_DEPTH};
pub use error::SessionError;
pub use remote::ApiRemoteTools;
pub use update::{update_channel, SessionUpdate, UpdateReceiver, UpdateSender};
