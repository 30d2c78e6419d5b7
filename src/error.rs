//! Error types for the RiceBot MQTT link
//!
//! Connection failures are never raised to callers: they surface as status
//! broadcasts and drive the retry policy. `ServiceError` covers the few
//! operations that can fail synchronously.

use crate::config::ConfigError;
use crate::service::state_machine::ConnectionState;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by the service handle
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timed out after {waited:?} waiting for state change (current state: {state})")]
    Timeout {
        waited: Duration,
        state: ConnectionState,
    },

    #[error("MQTT service task has stopped")]
    ServiceStopped,
}

/// Result type for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

const MAX_REASON_LEN: usize = 200;

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("secret pattern is valid")
});

/// Sanitize a failure reason before it is broadcast in a `failed:<reason>` status
///
/// Listeners are UI code, so credentials that leak into transport error strings
/// are redacted and the reason is kept short.
pub fn sanitize_reason(reason: &str) -> String {
    let mut sanitized = SECRET_PATTERN
        .replace_all(reason.trim(), "${1}=***")
        .to_string();

    // Truncate on a char boundary; total length stays <= MAX_REASON_LEN
    if sanitized.len() > MAX_REASON_LEN {
        let suffix = "...";
        let mut cut = MAX_REASON_LEN - suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(suffix);
    }

    if sanitized.is_empty() {
        "unknown error".to_string()
    } else {
        sanitized
    }
}
