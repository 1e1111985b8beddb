//! Supervisor/worker message bus over one Unix domain socket.
//!
//! Every message is a single JSON object followed by `\n`. Receivers buffer
//! partial reads, decode only complete lines and drop lines that fail to
//! parse, so newer peers can add message kinds without breaking older ones.
//! Delivery is fire-and-forget; nothing is acknowledged.

mod codec;
mod connection;
mod error;
mod listener;
mod message;

pub use codec::{LineCodec, MAX_LINE_BYTES};
pub use connection::{BusConnection, BusReader, BusWriter};
pub use error::BusError;
pub use listener::BusListener;
pub use message::{BusMessage, HistoryRow, TabMode};
