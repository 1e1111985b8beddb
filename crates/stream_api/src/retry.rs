use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

/// Maximum retry attempts after an initial request attempt.
pub const MAX_RETRIES: u32 = 3;
/// Base delay before the first retry.
pub const BASE_DELAY_MS: u64 = 1000;

fn transient_error_regex() -> Option<&'static Regex> {
    static CACHED: OnceLock<Option<Regex>> = OnceLock::new();
    CACHED
        .get_or_init(|| {
            Regex::new(
                r"(?i)rate.?limit|overloaded|service.?unavailable|upstream.?connect|connection.?(refused|reset)|timed? ?out",
            )
            .ok()
        })
        .as_ref()
}

/// Status/body policy for responses that are worth another attempt.
///
/// Client errors other than 408 and 429 are final: an expired token or a bad
/// request will not improve on retry.
pub fn is_retryable_http_error(status: u16, error_text: &str) -> bool {
    match status {
        408 | 429 | 500 | 502 | 503 | 504 => true,
        400..=499 => false,
        _ => is_transient_message(error_text),
    }
}

/// Connection-level failures carry no status, only their message.
pub fn is_transient_message(error_text: &str) -> bool {
    transient_error_regex().is_some_and(|regex| regex.is_match(error_text))
}

/// Compute exponential backoff delay for a retry attempt.
pub fn retry_delay_ms(attempt: u32) -> Duration {
    let exponent = attempt.min(30);
    Duration::from_millis(BASE_DELAY_MS.saturating_mul(2u64.saturating_pow(exponent)))
}
