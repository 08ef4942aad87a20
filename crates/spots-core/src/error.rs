use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message fragments that mark an error as a transient transport failure.
pub const RETRIABLE_MESSAGE_FRAGMENTS: [&str; 12] = [
    "network",
    "timeout",
    "timed out",
    "aborted",
    "connection",
    "unavailable",
    "503",
    "429",
    "socket",
    "temporarily",
    "failed to fetch",
    "xhr error",
];

/// Symbolic database error codes.
///
/// Codes reported by the mobile SDK carry a `firestore/` prefix; parsing
/// accepts both forms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PlatformCode {
    Aborted,
    Cancelled,
    DeadlineExceeded,
    ResourceExhausted,
    Unavailable,
    NotFound,
    PermissionDenied,
    InvalidArgument,
    AlreadyExists,
    FailedPrecondition,
    Unauthenticated,
    Internal,
    Unknown,
    /// Any code this crate does not model explicitly.
    Other(String),
}

impl PlatformCode {
    /// Canonical code without the SDK prefix.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Aborted => "aborted",
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "deadline-exceeded",
            Self::ResourceExhausted => "resource-exhausted",
            Self::Unavailable => "unavailable",
            Self::NotFound => "not-found",
            Self::PermissionDenied => "permission-denied",
            Self::InvalidArgument => "invalid-argument",
            Self::AlreadyExists => "already-exists",
            Self::FailedPrecondition => "failed-precondition",
            Self::Unauthenticated => "unauthenticated",
            Self::Internal => "internal",
            Self::Unknown => "unknown",
            Self::Other(code) => code,
        }
    }

    /// Whether the code belongs to the fixed retriable-code set.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Aborted
                | Self::Cancelled
                | Self::DeadlineExceeded
                | Self::ResourceExhausted
                | Self::Unavailable
        )
    }
}

impl From<&str> for PlatformCode {
    fn from(raw: &str) -> Self {
        let code = raw.trim();
        let code = code.strip_prefix("firestore/").unwrap_or(code);
        match code {
            "aborted" => Self::Aborted,
            "cancelled" => Self::Cancelled,
            "deadline-exceeded" => Self::DeadlineExceeded,
            "resource-exhausted" => Self::ResourceExhausted,
            "unavailable" => Self::Unavailable,
            "not-found" => Self::NotFound,
            "permission-denied" => Self::PermissionDenied,
            "invalid-argument" => Self::InvalidArgument,
            "already-exists" => Self::AlreadyExists,
            "failed-precondition" => Self::FailedPrecondition,
            "unauthenticated" => Self::Unauthenticated,
            "internal" => Self::Internal,
            "unknown" => Self::Unknown,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl From<String> for PlatformCode {
    fn from(raw: String) -> Self {
        Self::from(raw.as_str())
    }
}

impl From<PlatformCode> for String {
    fn from(code: PlatformCode) -> Self {
        code.as_str().to_owned()
    }
}

impl FromStr for PlatformCode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl fmt::Display for PlatformCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broad retry classification for a failed operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorClass {
    /// Temporary failure; repeating the operation may succeed.
    Transient,
    /// Repeating the operation will fail the same way.
    Permanent,
}

/// Failure surfaced by the network layer or the document-database client.
///
/// Produced by the normalization helpers at the collaborator boundary so that
/// classifiers match on variants instead of probing loose properties.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// Transport failure carrying an HTTP status.
    #[error("http {status}: {message}")]
    Http { status: u16, message: String },
    /// Database client failure carrying a symbolic code.
    #[error("{code}: {message}")]
    Platform {
        code: PlatformCode,
        status: Option<u16>,
        message: String,
    },
    /// Anything else; only the message is known.
    #[error("{message}")]
    Generic { message: String },
}

impl ServiceError {
    /// Transport failure with the given HTTP status.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Database client failure without a status. See [`Self::with_status`].
    pub fn platform(code: impl Into<PlatformCode>, message: impl Into<String>) -> Self {
        Self::Platform {
            code: code.into(),
            status: None,
            message: message.into(),
        }
    }

    /// Failure carrying only a message.
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Attach an HTTP status to a platform error. Other variants are returned unchanged.
    pub fn with_status(self, status: u16) -> Self {
        match self {
            Self::Platform { code, message, .. } => Self::Platform {
                code,
                status: Some(status),
                message,
            },
            other => other,
        }
    }

    /// Human-readable message; present on every variant.
    pub fn message(&self) -> &str {
        match self {
            Self::Http { message, .. }
            | Self::Platform { message, .. }
            | Self::Generic { message } => message,
        }
    }

    /// HTTP status, when the failure carried one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Platform { status, .. } => *status,
            Self::Generic { .. } => None,
        }
    }

    /// Symbolic database code. Only platform errors have one.
    pub fn code(&self) -> Option<&PlatformCode> {
        match self {
            Self::Platform { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn class(&self) -> ErrorClass {
        if is_transient(self) {
            ErrorClass::Transient
        } else {
            ErrorClass::Permanent
        }
    }
}

impl AsRef<ServiceError> for ServiceError {
    fn as_ref(&self) -> &ServiceError {
        self
    }
}

pub fn is_retriable_http_status(status: Option<u16>) -> bool {
    matches!(status, Some(status) if status >= 500 || status == 429 || status == 408)
}

/// Generic transport heuristic: retriable status, known message fragment, or
/// retriable platform code.
///
/// Matching on message text is deliberately loose because SDK errors do not
/// expose structured codes consistently across platforms.
pub fn is_retriable_network_error(error: &ServiceError) -> bool {
    if is_retriable_http_status(error.status()) {
        return true;
    }

    let message = error.message().to_lowercase();
    if RETRIABLE_MESSAGE_FRAGMENTS
        .iter()
        .any(|fragment| message.contains(fragment))
    {
        return true;
    }

    error.code().is_some_and(PlatformCode::is_retriable)
}

/// Database-client heuristic. Errors without a symbolic code never qualify.
pub fn is_retriable_database_error(error: &ServiceError) -> bool {
    let Some(code) = error.code() else {
        return false;
    };
    code.is_retriable() || is_retriable_http_status(error.status())
}

/// Policy used by data-access callers: either classifier may flag a retry.
pub fn is_transient(error: &ServiceError) -> bool {
    is_retriable_database_error(error) || is_retriable_network_error(error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_transient_http_statuses() {
        assert!(is_retriable_network_error(&ServiceError::http(503, "")));
        assert!(is_retriable_network_error(&ServiceError::http(429, "")));
        assert!(is_retriable_network_error(&ServiceError::http(408, "")));
        assert!(!is_retriable_network_error(&ServiceError::http(404, "")));
        assert!(!is_retriable_http_status(None));
    }

    #[test]
    fn rejects_permanent_messages() {
        let err = ServiceError::generic("permission denied");
        assert!(!is_retriable_network_error(&err));
        assert_eq!(err.class(), ErrorClass::Permanent);
    }

    #[test]
    fn matches_message_fragments_case_insensitively() {
        assert!(is_retriable_network_error(&ServiceError::generic(
            "Network request failed"
        )));
        assert!(is_retriable_network_error(&ServiceError::generic(
            "Request Timed Out after 30s"
        )));
        assert!(is_retriable_network_error(&ServiceError::generic(
            "TypeError: Failed to fetch"
        )));
    }

    #[test]
    fn network_heuristic_honors_platform_codes() {
        let err = ServiceError::platform("deadline-exceeded", "deadline");
        assert!(is_retriable_network_error(&err));
    }

    #[test]
    fn database_heuristic_requires_a_code() {
        assert!(is_retriable_database_error(&ServiceError::platform(
            "unavailable",
            ""
        )));
        assert!(!is_retriable_database_error(&ServiceError::platform(
            "not-found",
            ""
        )));
        assert!(!is_retriable_database_error(&ServiceError::http(503, "")));
        assert!(is_retriable_database_error(
            &ServiceError::platform("internal", "").with_status(502)
        ));
    }

    #[test]
    fn parses_prefixed_sdk_codes() {
        assert_eq!(
            PlatformCode::from("firestore/unavailable"),
            PlatformCode::Unavailable
        );
        assert_eq!(
            PlatformCode::from("storage/quota"),
            PlatformCode::Other("storage/quota".to_owned())
        );
    }

    #[test]
    fn combined_policy_is_a_logical_or() {
        assert!(is_transient(&ServiceError::generic("socket hang up")));
        assert!(is_transient(&ServiceError::platform("aborted", "contention")));
        assert!(!is_transient(&ServiceError::platform(
            "permission-denied",
            "missing or insufficient permissions"
        )));
    }
}
