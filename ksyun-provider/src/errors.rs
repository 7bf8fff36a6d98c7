//! Errors returned by the Ksyun API and their classification

use std::sync::LazyLock;
use std::time::Duration;

use ksyun_core::provider::{ErrorKind, ProviderError};
use regex::Regex;
use thiserror::Error;

/// Error reported by the transport for one API call
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{code}: {message}")]
pub struct SdkError {
    /// Error code returned by the service (e.g., "InvalidVpc.NotFound")
    pub code: String,
    pub message: String,
    /// HTTP status
    pub status: u16,
}

impl SdkError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, status: u16) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            status,
        }
    }

    /// No answer for `action` within `limit`
    pub fn timeout(action: &str, limit: Duration) -> Self {
        Self::new(
            "RequestTimeout",
            format!("{} got no answer within {}s", action, limit.as_secs()),
            408,
        )
    }
}

static NOT_FOUND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\.?NotFound\b|NotExist|does not exist|not found)").unwrap()
});

static TRANSIENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(Conflict|InUse|in use|Throttl|TooManyRequests|Busy|Processing|IncorrectState|ServiceUnavailable|InternalError|Timeout)",
    )
    .unwrap()
});

/// Classify a transport error into the provider error taxonomy
pub fn classify(err: &SdkError) -> ErrorKind {
    if err.status == 404 || NOT_FOUND.is_match(&err.code) || NOT_FOUND.is_match(&err.message) {
        ErrorKind::NotFound
    } else if err.status == 429
        || err.status >= 500
        || TRANSIENT.is_match(&err.code)
        || TRANSIENT.is_match(&err.message)
    {
        ErrorKind::Transient
    } else {
        ErrorKind::Fatal
    }
}

impl From<SdkError> for ProviderError {
    fn from(err: SdkError) -> Self {
        let kind = classify(&err);
        ProviderError::new(err.to_string())
            .with_kind(kind)
            .with_cause(err)
    }
}
