use std::collections::BTreeMap;

use crate::config::ApiConfig;
use crate::error::ApiError;

pub const HEADER_SESSION_ID: &str = "x-session-id";
pub const HEADER_ACCEPT: &str = "accept";
pub const HEADER_CONTENT_TYPE: &str = "content-type";
pub const HEADER_AUTHORIZATION: &str = "authorization";
pub const HEADER_USER_AGENT: &str = "user-agent";

/// Whether a request must carry the bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Auth {
    Required,
    Anonymous,
}

/// Build a deterministic header map for service requests.
pub fn build_headers(
    config: &ApiConfig,
    auth: Auth,
    accept: &str,
) -> Result<BTreeMap<String, String>, ApiError> {
    let mut headers = BTreeMap::new();

    let token = config
        .access_token
        .as_deref()
        .map(str::trim)
        .filter(|token| !token.is_empty());
    match (auth, token) {
        (_, Some(token)) => {
            headers.insert(HEADER_AUTHORIZATION.to_owned(), format!("Bearer {token}"));
        }
        (Auth::Required, None) => return Err(ApiError::MissingAccessToken),
        (Auth::Anonymous, None) => {}
    }

    headers.insert(HEADER_ACCEPT.to_owned(), accept.to_owned());
    headers.insert(
        HEADER_CONTENT_TYPE.to_owned(),
        "application/json".to_owned(),
    );

    let ua = config
        .user_agent
        .as_deref()
        .map(str::trim)
        .filter(|ua| !ua.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(default_user_agent);
    headers.insert(HEADER_USER_AGENT.to_owned(), ua);

    for (key, value) in &config.extra_headers {
        headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_owned());
    }

    if let Some(session_id) = &config.session_id {
        if !session_id.trim().is_empty() {
            headers.insert(HEADER_SESSION_ID.to_owned(), session_id.trim().to_owned());
        }
    }

    Ok(headers)
}

pub fn default_user_agent() -> String {
    format!(
        "agent-tabs/{} ({} {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        normalize_arch(std::env::consts::ARCH)
    )
}

fn normalize_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "x64",
        "x86" => "ia32",
        "aarch64" => "arm64",
        other => other,
    }
}
