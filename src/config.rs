//! Environment configuration.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use agent_session::MAX_TOOL_DEPTH;
use stream_api::{ApiConfig, DEFAULT_BASE_URL};

pub const API_URL_VAR: &str = "AGENT_TABS_API_URL";
pub const REQUEST_TIMEOUT_VAR: &str = "AGENT_TABS_REQUEST_TIMEOUT_SEC";
pub const HISTORY_VAR: &str = "AGENT_TABS_HISTORY";
pub const LOG_DIR_VAR: &str = "AGENT_TABS_LOG_DIR";
pub const MAX_TOOL_DEPTH_VAR: &str = "AGENT_TABS_MAX_TOOL_DEPTH";
pub const SOCKET_VAR: &str = "AGENT_TABS_SOCKET";

/// Settings shared by the supervisor and every worker it spawns.
///
/// Workers inherit the supervisor's environment, so both sides read the same
/// values. Unparseable numbers fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub api_url: String,
    pub request_timeout: Option<Duration>,
    /// Mirror chat transcripts into `.agent/sessions`.
    pub history: bool,
    pub log_dir: Option<PathBuf>,
    pub max_tool_depth: usize,
    /// Bus socket override; the supervisor picks a per-process path otherwise.
    pub socket: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: None,
            history: true,
            log_dir: None,
            max_tool_depth: MAX_TOOL_DEPTH,
            socket: None,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_url: env_string_opt(API_URL_VAR).unwrap_or(defaults.api_url),
            request_timeout: env_parse::<u64>(REQUEST_TIMEOUT_VAR)
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            history: env_string_opt(HISTORY_VAR).map_or(defaults.history, |value| value != "0"),
            log_dir: env_string_opt(LOG_DIR_VAR).map(PathBuf::from),
            max_tool_depth: env_parse(MAX_TOOL_DEPTH_VAR).unwrap_or(defaults.max_tool_depth),
            socket: env_string_opt(SOCKET_VAR).map(PathBuf::from),
        }
    }

    /// Transport settings for a worker's [`stream_api::ApiClient`].
    #[must_use]
    pub fn api_config(&self) -> ApiConfig {
        let config = ApiConfig::new(self.api_url.clone())
            .with_user_agent(concat!("agent-tabs/", env!("CARGO_PKG_VERSION")));
        match self.request_timeout {
            Some(timeout) => config.with_timeout(timeout),
            None => config,
        }
    }
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    })
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string_opt(key).and_then(|value| value.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    const ALL_VARS: [&str; 6] = [
        API_URL_VAR,
        REQUEST_TIMEOUT_VAR,
        HISTORY_VAR,
        LOG_DIR_VAR,
        MAX_TOOL_DEPTH_VAR,
        SOCKET_VAR,
    ];

    struct EnvGuard {
        key: &'static str,
        previous: Option<String>,
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(value) = &self.previous {
                env::set_var(self.key, value);
            } else {
                env::remove_var(self.key);
            }
        }
    }

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
            .lock()
            .expect("env lock poisoned")
    }

    fn set_env_guard(key: &'static str, value: Option<&str>) -> EnvGuard {
        let previous = env::var(key).ok();
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
        EnvGuard { key, previous }
    }

    fn clear_all() -> Vec<EnvGuard> {
        ALL_VARS
            .iter()
            .map(|key| set_env_guard(key, None))
            .collect()
    }

    #[test]
    fn unset_environment_gives_defaults() {
        let _lock = env_lock();
        let _guards = clear_all();

        assert_eq!(RuntimeConfig::from_env(), RuntimeConfig::default());
        assert_eq!(RuntimeConfig::default().max_tool_depth, MAX_TOOL_DEPTH);
    }

    #[test]
    fn variables_override_defaults() {
        let _lock = env_lock();
        let _guards = clear_all();
        let _g1 = set_env_guard(API_URL_VAR, Some("http://127.0.0.1:9000"));
        let _g2 = set_env_guard(REQUEST_TIMEOUT_VAR, Some("30"));
        let _g3 = set_env_guard(HISTORY_VAR, Some("0"));
        let _g4 = set_env_guard(LOG_DIR_VAR, Some("/tmp/agent-logs"));
        let _g5 = set_env_guard(MAX_TOOL_DEPTH_VAR, Some("4"));
        let _g6 = set_env_guard(SOCKET_VAR, Some("/tmp/agent.sock"));

        let config = RuntimeConfig::from_env();
        assert_eq!(config.api_url, "http://127.0.0.1:9000");
        assert_eq!(config.request_timeout, Some(Duration::from_secs(30)));
        assert!(!config.history);
        assert_eq!(config.log_dir, Some(PathBuf::from("/tmp/agent-logs")));
        assert_eq!(config.max_tool_depth, 4);
        assert_eq!(config.socket, Some(PathBuf::from("/tmp/agent.sock")));
        assert_eq!(config.api_config().timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn blank_and_invalid_values_are_ignored() {
        let _lock = env_lock();
        let _guards = clear_all();
        let _g1 = set_env_guard(API_URL_VAR, Some("  "));
        let _g2 = set_env_guard(MAX_TOOL_DEPTH_VAR, Some("many"));
        let _g3 = set_env_guard(REQUEST_TIMEOUT_VAR, Some("0"));

        let config = RuntimeConfig::from_env();
        assert_eq!(config.api_url, DEFAULT_BASE_URL);
        assert_eq!(config.max_tool_depth, MAX_TOOL_DEPTH);
        assert_eq!(config.request_timeout, None);
    }
}
