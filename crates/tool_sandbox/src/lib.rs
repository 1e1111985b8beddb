//! Local tool execution confined to one workspace root.
//!
//! The vocabulary is fixed: `read_file`, `list_files`, `grep`, `apply_patch`,
//! `write_file` and `deploy`. Two invariants hold for every call:
//!
//! - every path argument resolves inside the root, or the call fails before
//!   touching the filesystem;
//! - an existing file is only overwritten or patched after the session read
//!   it through this sandbox (see [`ReadSet`]).

mod capability;
mod diff;
mod error;
mod patch;
mod paths;
mod sandbox;

pub use capability::{CodeIntel, RemoteTools};
pub use diff::unified_diff;
pub use error::SandboxError;
pub use patch::{parse_patch, ParsedPatch, PatchTarget};
pub use paths::{ReadSet, ResolvedPath, Workspace};
pub use sandbox::{ToolContext, ToolKind, ToolSandbox, DEFAULT_READ_MAX_BYTES, GREP_MAX_MATCHES};
