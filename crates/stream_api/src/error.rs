use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not logged in: access token is required")]
    MissingAccessToken,
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP {0} {1}")]
    Status(StatusCode, String),
    #[error("request cancelled")]
    Cancelled,
    #[error("response has no body")]
    MissingBody,
    /// Explicit terminal error frame sent by the endpoint.
    #[error("{0}")]
    StreamError(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
    #[error("retry exhausted after max attempts (status: {}, last_error: {last_error:?})", status.map(|status| status.as_u16().to_string()).unwrap_or_else(|| "n/a".to_owned()))]
    RetryExhausted {
        status: Option<StatusCode>,
        last_error: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    error: Option<ErrorField>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorField {
    Text(String),
    Fields { message: Option<String> },
}

/// Extracts a human readable message from an error response body.
///
/// Accepts `{"error":{"message":..}}`, `{"error":".."}` and `{"message":..}`;
/// anything else falls back to the raw body, then to the status reason.
pub fn parse_error_message(status: StatusCode, body: &str) -> String {
    let fallback = || {
        if body.trim().is_empty() {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        } else {
            body.trim().to_string()
        }
    };

    let Ok(payload) = serde_json::from_str::<ErrorPayload>(body) else {
        return fallback();
    };

    let message = match payload.error {
        Some(ErrorField::Text(text)) => Some(text),
        Some(ErrorField::Fields { message }) => message,
        None => None,
    }
    .or(payload.message)
    .filter(|message| !message.trim().is_empty());

    message.unwrap_or_else(fallback)
}
