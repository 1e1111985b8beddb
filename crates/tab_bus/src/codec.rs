use crate::error::BusError;
use crate::message::BusMessage;

/// Longest line a receiver buffers before discarding it.
pub const MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

/// Newline-delimited JSON framing.
#[derive(Debug, Default)]
pub struct LineCodec {
    buffer: Vec<u8>,
    /// Set while skipping the rest of an oversized line.
    discarding: bool,
}

impl LineCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializes `message` as one line, newline included.
    pub fn encode(message: &BusMessage) -> Result<Vec<u8>, BusError> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        Ok(line)
    }

    /// Buffers `bytes` and returns every message completed by them.
    ///
    /// Lines that are not valid UTF-8 JSON for a known message kind are
    /// dropped; later lines are unaffected.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<BusMessage> {
        let mut messages = Vec::new();
        let mut rest = bytes;

        while let Some(position) = rest.iter().position(|byte| *byte == b'\n') {
            let (head, tail) = rest.split_at(position);
            rest = &tail[1..];

            if self.discarding {
                self.discarding = false;
                continue;
            }
            self.buffer.extend_from_slice(head);
            let line = std::mem::take(&mut self.buffer);
            if let Some(message) = decode_line(&line) {
                messages.push(message);
            }
        }

        if !self.discarding {
            self.buffer.extend_from_slice(rest);
            if self.buffer.len() > MAX_LINE_BYTES {
                tracing::warn!(bytes = self.buffer.len(), "dropping oversized bus line");
                self.buffer.clear();
                self.discarding = true;
            }
        }

        messages
    }

    #[must_use]
    pub fn has_partial_line(&self) -> bool {
        !self.buffer.is_empty()
    }
}

fn decode_line(line: &[u8]) -> Option<BusMessage> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    if line.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    match serde_json::from_slice::<BusMessage>(line) {
        Ok(message) => Some(message),
        Err(error) => {
            tracing::debug!(error = %error, "dropping undecodable bus line");
            None
        }
    }
}
