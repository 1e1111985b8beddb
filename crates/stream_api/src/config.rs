use std::collections::BTreeMap;
use std::time::Duration;

use crate::url::DEFAULT_BASE_URL;

/// Transport configuration for the remote chat service.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bearer token from device login; chat and deploy calls require it.
    pub access_token: Option<String>,
    /// Base URL all endpoint paths are joined onto.
    pub base_url: String,
    /// Optional client session identifier header value.
    pub session_id: Option<String>,
    /// Optional `User-Agent` override.
    pub user_agent: Option<String>,
    /// Additional headers merged into request headers.
    pub extra_headers: BTreeMap<String, String>,
    /// Optional timeout for non-streaming requests.
    pub timeout: Option<Duration>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            session_id: None,
            user_agent: None,
            extra_headers: BTreeMap::new(),
            timeout: None,
        }
    }
}

impl ApiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_access_token(mut self, access_token: impl Into<String>) -> Self {
        self.access_token = Some(access_token.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn insert_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(key.into(), value.into());
        self
    }
}
