/// Default base URL for the remote chat service.
pub const DEFAULT_BASE_URL: &str = "https://api.agent-tabs.dev";

/// REST and streaming endpoints exposed by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint<'a> {
    Chat,
    ToolManifest,
    Apps,
    Commits { app_id: &'a str },
    Deployments { app_id: &'a str },
    DeviceLoginStart,
    DeviceLoginPoll,
}

impl Endpoint<'_> {
    fn path(&self) -> String {
        match self {
            Self::Chat => "/chat".to_string(),
            Self::ToolManifest => "/tools".to_string(),
            Self::Apps => "/apps".to_string(),
            Self::Commits { app_id } => format!("/apps/{app_id}/commits"),
            Self::Deployments { app_id } => format!("/apps/{app_id}/deployments"),
            Self::DeviceLoginStart => "/auth/device/start".to_string(),
            Self::DeviceLoginPoll => "/auth/device/poll".to_string(),
        }
    }
}

/// Normalize a base URL to the service's `/api` root.
///
/// Normalization rules:
/// 1) empty input falls back to [`DEFAULT_BASE_URL`]
/// 2) trailing slashes are removed
/// 3) `/api` is appended unless the path already ends with it
pub fn normalize_base_url(input: &str) -> String {
    let base = if input.trim().is_empty() {
        DEFAULT_BASE_URL
    } else {
        input.trim()
    };

    let trimmed = base.trim_end_matches('/');
    if trimmed.ends_with("/api") {
        return trimmed.to_string();
    }
    format!("{trimmed}/api")
}

pub fn endpoint_url(base_url: &str, endpoint: Endpoint<'_>) -> String {
    format!("{}{}", normalize_base_url(base_url), endpoint.path())
}
