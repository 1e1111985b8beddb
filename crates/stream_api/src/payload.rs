use std::collections::BTreeMap;

use agent_protocol::{ChatMode, ConversationItem, ExecutionMode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of one chat submission. The whole transcript is resent every turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub input: Vec<ConversationItem>,
    pub mode: ChatMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_mode: Option<ExecutionMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<Value>,
}

impl ChatRequest {
    pub fn new(input: Vec<ConversationItem>, mode: ChatMode) -> Self {
        Self {
            input,
            mode,
            execution_mode: None,
            conversation_id: None,
            app_id: None,
            action: None,
            tool_result: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolManifest {
    #[serde(default)]
    pub tools: Vec<ToolManifestEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolManifestEntry {
    pub function: ToolFunction,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolFunction {
    pub name: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ToolManifest {
    pub fn names(&self) -> Vec<String> {
        self.tools
            .iter()
            .map(|entry| entry.function.name.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct CommitRequest<'a> {
    pub files: &'a BTreeMap<String, String>,
    pub message: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CommitResponse {
    #[serde(alias = "commitId", alias = "id")]
    pub sha: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DeploymentRequest<'a> {
    pub commit_sha: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DeploymentResponse {
    #[serde(alias = "id")]
    pub deployment_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct CreateAppRequest<'a> {
    pub name: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateAppResponse {
    #[serde(alias = "id")]
    pub app_id: String,
}

/// Response of the device-login start call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCode {
    pub device_code: String,
    pub user_code: String,
    pub verification_url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DevicePollRequest<'a> {
    pub device_code: &'a str,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DevicePollResponse {
    #[serde(default)]
    pub access_token: Option<String>,
}

/// Outcome of one device-login poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DevicePoll {
    Pending,
    Token(String),
}
