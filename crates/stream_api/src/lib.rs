//! Transport for the remote chat service.
//!
//! This crate owns the streamed chat wire format (prefix-tagged lines decoded
//! by [`FrameDecoder`] into [`Frame`]s) and the plain request/response calls the
//! workers need: tool manifest, commit/deploy, device login and app creation.
//! It holds no session state and performs no local tool execution.
//!
//! Wire contract: every complete line of a chat response body is
//! `<tag>:<json>`, with tags `0` (text delta), `g` (reasoning delta), `d`
//! (discarded), `2` (data batch) and `3` (terminal error).

pub mod client;
pub mod config;
pub mod error;
pub mod frames;
pub mod headers;
pub mod payload;
pub mod retry;
pub mod url;

pub use client::{ApiClient, CancellationSignal, FrameStream, ResponseFrames};
pub use config::ApiConfig;
pub use error::ApiError;
pub use frames::{decode_line, Frame, FrameDecoder};
pub use payload::{ChatRequest, DeviceCode, DevicePoll, ToolManifest};
pub use url::{endpoint_url, normalize_base_url, Endpoint, DEFAULT_BASE_URL};
