//! Error classification shared across crates.
//!
//! Each crate keeps its own `thiserror` enum; [`ErrorKind`] is the common
//! vocabulary callers (HTTP handlers, the CLI, schedulers) use to decide
//! whether to retry, back off, or surface the failure.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed feedback, payload or configuration.
    Validation,
    /// Throttled; retry after the reported cooldown.
    RateLimit,
    NotFound,
    /// Concurrent version clash or merge conflict.
    Conflict,
    /// Embedding or other upstream provider failure.
    Provider,
    /// Corrupted training data that could not be recovered.
    Integrity,
    /// Storage backend unreachable or failing.
    Unavailable,
}

impl ErrorKind {
    #[must_use]
    pub fn as_code(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::RateLimit => "rate_limited",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Provider => "provider_error",
            ErrorKind::Integrity => "integrity_error",
            ErrorKind::Unavailable => "unavailable",
        }
    }

    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimit | ErrorKind::Conflict | ErrorKind::Provider | ErrorKind::Unavailable
        )
    }

    /// Suggested backoff for retryable kinds that carry no explicit hint.
    #[must_use]
    pub fn default_backoff_secs(self) -> Option<u64> {
        match self {
            ErrorKind::Conflict => Some(1),
            ErrorKind::Provider => Some(5),
            ErrorKind::Unavailable => Some(10),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_code())
    }
}

/// Structured, user-visible error object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl ErrorReport {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.is_retryable(),
            retry_after_secs: kind.default_backoff_secs(),
        }
    }

    #[must_use]
    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after_secs = Some(secs);
        self
    }
}
