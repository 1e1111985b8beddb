//! Multi-tab agent runtime.
//!
//! One supervisor process owns the terminal and a Unix socket bus; every tab
//! is a separate worker process hosting either a chat session
//! ([`agent_session::SessionDriver`]) or a read-only history browser. Workers
//! never share memory: all coordination is line-delimited JSON over the bus
//! (see [`tab_bus`]).
//!
//! Invariant: only the supervisor writes to the terminal, and only for the
//! active tab.

pub mod config;
pub mod history;
pub mod logging;
pub mod render;
pub mod supervisor;
pub mod worker;

pub use config::RuntimeConfig;
pub use history::{BrowserOutput, HistoryBrowser};
pub use logging::{init_process_logging, ProcessKind};
pub use render::{truncate_to_width, Renderer};
pub use supervisor::{run_supervisor, Supervisor, TabLauncher, UiEvent};
pub use worker::{run_worker, serve, WorkerOptions};
