use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Author of a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Developer,
}

/// One content block of a message (`{"type":"markdown","text":"..."}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContentPart {
    #[must_use]
    pub fn markdown(text: impl Into<String>) -> Self {
        Self {
            kind: "markdown".to_string(),
            text: Some(text.into()),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageItem {
    pub role: Role,
    #[serde(deserialize_with = "content_parts")]
    pub content: Vec<ContentPart>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MessageItem {
    /// Concatenated text of every content part that carries text.
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect::<Vec<_>>()
            .join("")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallItem {
    #[serde(alias = "call_id")]
    pub call_id: String,
    pub name: String,
    /// Either a JSON object or a JSON-encoded string, as sent by the endpoint.
    #[serde(default)]
    pub arguments: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutputItem {
    #[serde(alias = "call_id")]
    pub call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub output: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningItem {
    #[serde(default)]
    pub text: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Remote app lifecycle notification (created, linked, deployed, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppEventItem {
    pub event: String,
    #[serde(default, alias = "app_id", skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Ordered transcript entry resent to the remote endpoint on every turn.
///
/// Known kinds are typed; anything else (an unknown `type`, or a known type
/// whose payload does not match) is kept verbatim as [`ConversationItem::Opaque`]
/// so it round-trips to the endpoint untouched. Unknown fields of known kinds
/// survive in each struct's `extra` map for the same reason.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationItem {
    Message(MessageItem),
    ToolCall(ToolCallItem),
    ToolOutput(ToolOutputItem),
    Reasoning(ReasoningItem),
    AppEvent(AppEventItem),
    Opaque(Value),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum KnownItem {
    Message(MessageItem),
    ToolCall(ToolCallItem),
    ToolOutput(ToolOutputItem),
    Reasoning(ReasoningItem),
    AppEvent(AppEventItem),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum KnownItemRef<'a> {
    Message(&'a MessageItem),
    ToolCall(&'a ToolCallItem),
    ToolOutput(&'a ToolOutputItem),
    Reasoning(&'a ReasoningItem),
    AppEvent(&'a AppEventItem),
}

impl ConversationItem {
    /// Classifies a raw JSON item, falling back to [`ConversationItem::Opaque`].
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        match serde_json::from_value::<KnownItem>(value.clone()) {
            Ok(KnownItem::Message(item)) => Self::Message(item),
            Ok(KnownItem::ToolCall(item)) => Self::ToolCall(item),
            Ok(KnownItem::ToolOutput(item)) => Self::ToolOutput(item),
            Ok(KnownItem::Reasoning(item)) => Self::Reasoning(item),
            Ok(KnownItem::AppEvent(item)) => Self::AppEvent(item),
            Err(_) => Self::Opaque(value),
        }
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    #[must_use]
    pub fn message(role: Role, text: impl Into<String>) -> Self {
        Self::Message(MessageItem {
            role,
            content: vec![ContentPart::markdown(text)],
            extra: Map::new(),
        })
    }

    #[must_use]
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::message(Role::User, text)
    }

    #[must_use]
    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::message(Role::Assistant, text)
    }

    #[must_use]
    pub fn tool_output(call_id: impl Into<String>, name: impl Into<String>, output: Value) -> Self {
        Self::ToolOutput(ToolOutputItem {
            call_id: call_id.into(),
            name: Some(name.into()),
            output,
            extra: Map::new(),
        })
    }

    /// Wire `type` tag of this item.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Message(_) => "message",
            Self::ToolCall(_) => "tool_call",
            Self::ToolOutput(_) => "tool_output",
            Self::Reasoning(_) => "reasoning",
            Self::AppEvent(_) => "app_event",
            Self::Opaque(value) => value
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("unknown"),
        }
    }

    #[must_use]
    pub fn is_assistant_message(&self) -> bool {
        matches!(self, Self::Message(message) if message.role == Role::Assistant)
    }

    /// Returns the app id this item announces, if any.
    ///
    /// Checked in order: a top-level `appId`/`app_id` field, an app event's id,
    /// then `appId`/`app_id` nested in a tool output's `output` object.
    #[must_use]
    pub fn app_id(&self) -> Option<String> {
        let extra = match self {
            Self::Message(item) => Some(&item.extra),
            Self::ToolCall(item) => Some(&item.extra),
            Self::ToolOutput(item) => Some(&item.extra),
            Self::Reasoning(item) => Some(&item.extra),
            Self::AppEvent(item) => Some(&item.extra),
            Self::Opaque(Value::Object(map)) => Some(map),
            Self::Opaque(_) => None,
        };

        if let Some(id) = extra.and_then(app_id_field) {
            return Some(id);
        }

        match self {
            Self::AppEvent(item) => item.app_id.clone().filter(|id| !id.is_empty()),
            Self::ToolOutput(item) => item.output.as_object().and_then(app_id_field),
            Self::Opaque(value) => value
                .get("output")
                .and_then(Value::as_object)
                .and_then(app_id_field),
            _ => None,
        }
    }

    /// One-line human readable description used by history listings.
    #[must_use]
    pub fn summary(&self) -> String {
        let text = match self {
            Self::Message(item) => format!("{}: {}", role_label(item.role), item.text()),
            Self::ToolCall(item) => format!("tool call {}", item.name),
            Self::ToolOutput(item) => {
                let status = match item.output.get("ok").and_then(Value::as_bool) {
                    Some(false) => "error",
                    _ => "ok",
                };
                format!(
                    "tool output {} ({status})",
                    item.name.as_deref().unwrap_or(&item.call_id)
                )
            }
            Self::Reasoning(item) => format!("reasoning: {}", item.text),
            Self::AppEvent(item) => format!("app {}", item.event),
            Self::Opaque(_) => format!("{} item", self.kind()),
        };
        first_line(&text, 120)
    }
}

impl Serialize for ConversationItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Message(item) => KnownItemRef::Message(item).serialize(serializer),
            Self::ToolCall(item) => KnownItemRef::ToolCall(item).serialize(serializer),
            Self::ToolOutput(item) => KnownItemRef::ToolOutput(item).serialize(serializer),
            Self::Reasoning(item) => KnownItemRef::Reasoning(item).serialize(serializer),
            Self::AppEvent(item) => KnownItemRef::AppEvent(item).serialize(serializer),
            Self::Opaque(value) => value.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ConversationItem {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from_value)
    }
}

fn content_parts<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<ContentPart>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Content {
        Text(String),
        Parts(Vec<ContentPart>),
    }

    Ok(match Content::deserialize(deserializer)? {
        Content::Text(text) => vec![ContentPart::markdown(text)],
        Content::Parts(parts) => parts,
    })
}

fn app_id_field(map: &Map<String, Value>) -> Option<String> {
    map.get("appId")
        .or_else(|| map.get("app_id"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(ToString::to_string)
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
        Role::Developer => "developer",
    }
}

fn first_line(text: &str, max_chars: usize) -> String {
    let line = text.lines().next().unwrap_or("");
    if line.chars().count() <= max_chars {
        return line.to_string();
    }
    let mut truncated: String = line.chars().take(max_chars).collect();
    truncated.push_str("...");
    truncated
}
