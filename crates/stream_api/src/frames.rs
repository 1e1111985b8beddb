use agent_protocol::{ConversationItem, Usage};
use serde_json::Value;

use crate::error::ApiError;

/// One decoded unit of the chat stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    TextDelta(String),
    ReasoningDelta(String),
    ConversationId(String),
    Data {
        items: Vec<ConversationItem>,
        usage: Option<Usage>,
    },
}

/// Incremental line splitter for chat response bodies.
///
/// Bytes are buffered raw so a UTF-8 sequence split across network chunks is
/// decoded only once its line is complete.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Pops the next complete line, without its terminator.
    pub fn next_line(&mut self) -> Option<String> {
        let newline = self.buffer.iter().position(|byte| *byte == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Takes the unterminated remainder once the body has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        let rest = String::from_utf8_lossy(&rest);
        let rest = rest.trim_end_matches('\r');
        if rest.trim().is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }

    /// Feeds bytes and decodes every line completed by them.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Frame>, ApiError> {
        self.push(bytes);
        let mut frames = Vec::new();
        while let Some(line) = self.next_line() {
            frames.extend(decode_line(&line)?);
        }
        Ok(frames)
    }

    /// Decodes a complete body in one shot, including an unterminated last line.
    pub fn decode_all(input: &str) -> Result<Vec<Frame>, ApiError> {
        let mut decoder = Self::default();
        let mut frames = decoder.feed(input.as_bytes())?;
        if let Some(rest) = decoder.finish() {
            frames.extend(decode_line(&rest)?);
        }
        Ok(frames)
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Decodes one complete `<tag>:<json>` line.
///
/// Malformed payloads yield no frames. The only error is an explicit `3` line
/// whose payload is a JSON string.
pub fn decode_line(line: &str) -> Result<Vec<Frame>, ApiError> {
    let Some((tag, payload)) = line.split_once(':') else {
        return Ok(Vec::new());
    };

    match tag {
        "0" => Ok(string_payload(payload)
            .map(Frame::TextDelta)
            .into_iter()
            .collect()),
        "g" => Ok(string_payload(payload)
            .map(Frame::ReasoningDelta)
            .into_iter()
            .collect()),
        "2" => Ok(data_frames(payload)),
        "3" => match string_payload(payload) {
            Some(message) => Err(ApiError::StreamError(message)),
            None => {
                tracing::debug!(payload_len = payload.len(), "ignoring malformed error frame");
                Ok(Vec::new())
            }
        },
        _ => Ok(Vec::new()),
    }
}

fn string_payload(payload: &str) -> Option<String> {
    match serde_json::from_str::<Value>(payload) {
        Ok(Value::String(text)) => Some(text),
        _ => None,
    }
}

fn data_frames(payload: &str) -> Vec<Frame> {
    let value = match serde_json::from_str::<Value>(payload) {
        Ok(value) => value,
        Err(error) => {
            tracing::debug!(%error, "ignoring malformed data frame");
            return Vec::new();
        }
    };

    let entries = match value {
        Value::Array(entries) => entries,
        Value::Object(mut object) => match object.remove("data") {
            Some(Value::Array(entries)) => entries,
            Some(other) => {
                object.insert("data".to_string(), other);
                vec![Value::Object(object)]
            }
            None => vec![Value::Object(object)],
        },
        _ => return Vec::new(),
    };

    let mut frames = Vec::new();
    let mut items = Vec::new();
    let mut usage = None;

    for entry in entries {
        let Some(kind) = entry.get("type").and_then(Value::as_str) else {
            continue;
        };

        match kind {
            "conversation-created" => {
                if let Some(id) = first_string(&entry, &["conversationId", "conversation_id", "id"])
                {
                    frames.push(Frame::ConversationId(id));
                }
            }
            "response_items" => {
                if let Some(Value::Array(batch)) = entry.get("items") {
                    items.extend(batch.iter().cloned().map(ConversationItem::from_value));
                }
            }
            "response_item" => {
                if let Some(item) = entry.get("item").filter(|item| item.is_object()) {
                    items.push(ConversationItem::from_value(item.clone()));
                }
            }
            "assistant-message" => {
                if let Some(text) = assistant_content(&entry) {
                    items.push(ConversationItem::assistant_text(text));
                }
            }
            "usage" => {
                let source = entry.get("usage").filter(|usage| usage.is_object()).unwrap_or(&entry);
                usage = usage_from_value(source);
            }
            _ => {}
        }
    }

    if !items.is_empty() || usage.is_some() {
        frames.push(Frame::Data { items, usage });
    }

    frames
}

fn assistant_content(entry: &Value) -> Option<String> {
    match entry.get("content")? {
        Value::String(text) => Some(text.clone()),
        Value::Array(parts) => Some(
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join(""),
        ),
        _ => None,
    }
}

/// Normalizes camelCase and snake_case token counters into [`Usage`].
pub fn usage_from_value(value: &Value) -> Option<Usage> {
    let input = first_u64(
        value,
        &["input_tokens", "inputTokens", "prompt_tokens", "promptTokens"],
    );
    let output = first_u64(
        value,
        &[
            "output_tokens",
            "outputTokens",
            "completion_tokens",
            "completionTokens",
        ],
    );
    let total = first_u64(value, &["total_tokens", "totalTokens"]);

    if input.is_none() && output.is_none() && total.is_none() {
        return None;
    }

    let input_tokens = input.unwrap_or(0);
    let output_tokens = output.unwrap_or(0);
    Some(Usage {
        input_tokens,
        output_tokens,
        total_tokens: total.unwrap_or(input_tokens.saturating_add(output_tokens)),
    })
}

fn first_string(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .filter(|text| !text.is_empty())
        .map(ToString::to_string)
}

fn first_u64(value: &Value, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|key| value.get(*key).and_then(Value::as_u64))
}
