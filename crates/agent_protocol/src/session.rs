use std::fmt;

use serde::{Deserialize, Serialize};

/// Conversation mode sent with every chat request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    #[default]
    General,
    Builder,
}

impl ChatMode {
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value.trim().to_ascii_lowercase().as_str() {
            "general" => Self::General,
            "builder" => Self::Builder,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Builder => "builder",
        }
    }
}

impl fmt::Display for ChatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where tool calls run: in this worker's sandbox or on the remote side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Local,
    Hosted,
}

impl ExecutionMode {
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value.trim().to_ascii_lowercase().as_str() {
            "local" => Self::Local,
            "hosted" => Self::Hosted,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Hosted => "hosted",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device-code login progress of one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LoginState {
    #[default]
    Idle,
    Pending {
        device_code: String,
        user_code: String,
        verification_url: String,
    },
    Ready {
        token: String,
    },
    Error {
        message: String,
    },
}

impl LoginState {
    #[must_use]
    pub fn phase(&self) -> LoginPhase {
        match self {
            Self::Idle => LoginPhase::Idle,
            Self::Pending { .. } => LoginPhase::Pending,
            Self::Ready { .. } => LoginPhase::Ready,
            Self::Error { .. } => LoginPhase::Error,
        }
    }

    #[must_use]
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Ready { token } => Some(token),
            _ => None,
        }
    }
}

/// Secret-free projection of [`LoginState`] safe to put on the bus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginPhase {
    #[default]
    Idle,
    Pending,
    Ready,
    Error,
}

/// Token accounting reported by the endpoint for one response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

/// Status line state a worker reports for its tab.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FooterState {
    pub mode: ChatMode,
    pub execution_mode: ExecutionMode,
    pub login: LoginPhase,
    pub busy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl FooterState {
    /// Compact single-line rendering, e.g. `builder | local | ready | app app_1`.
    #[must_use]
    pub fn render(&self) -> String {
        let login = match self.login {
            LoginPhase::Idle => "logged out",
            LoginPhase::Pending => "login pending",
            LoginPhase::Ready => "ready",
            LoginPhase::Error => "login error",
        };
        let mut parts = vec![
            self.mode.to_string(),
            self.execution_mode.to_string(),
            login.to_string(),
        ];
        if self.busy {
            parts.push("working".to_string());
        }
        if let Some(app_id) = &self.app_id {
            parts.push(format!("app {app_id}"));
        }
        if let Some(usage) = &self.usage {
            parts.push(format!("{} tokens", usage.total_tokens));
        }
        parts.join(" | ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_parse_case_insensitively() {
        assert_eq!(ChatMode::parse(" Builder "), Some(ChatMode::Builder));
        assert_eq!(ExecutionMode::parse("HOSTED"), Some(ExecutionMode::Hosted));
        assert_eq!(ChatMode::parse("other"), None);
    }

    #[test]
    fn footer_state_uses_camel_case_fields() {
        let footer = FooterState {
            execution_mode: ExecutionMode::Hosted,
            conversation_id: Some("conv_1".to_string()),
            ..FooterState::default()
        };
        let value = serde_json::to_value(&footer).expect("serialize footer");

        assert_eq!(value["executionMode"], "hosted");
        assert_eq!(value["conversationId"], "conv_1");
        assert!(value.get("appId").is_none());
    }

    #[test]
    fn footer_render_lists_active_parts() {
        let footer = FooterState {
            mode: ChatMode::Builder,
            login: LoginPhase::Ready,
            busy: true,
            app_id: Some("app_1".to_string()),
            ..FooterState::default()
        };

        assert_eq!(footer.render(), "builder | local | ready | working | app app_1");
    }

    #[test]
    fn login_state_exposes_token_only_when_ready() {
        assert_eq!(LoginState::Idle.token(), None);
        let ready = LoginState::Ready {
            token: "tok".to_string(),
        };
        assert_eq!(ready.token(), Some("tok"));
        assert_eq!(ready.phase(), LoginPhase::Ready);
    }
}
