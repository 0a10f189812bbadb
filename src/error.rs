//! Error types for kvplug
//!
//! Every batch operation either returns a full response or exactly one
//! [`KvError`]. There is no mixed success/error reply.
//!
//! Each variant has a stable wire code so a client can rebuild the same
//! variant from an error reply:
//!
//! ```text
//! -UNKNOWN_STORAGE storage 'cache' is not registered\r\n
//!  └──── code ───┘ └────────────── message ──────────┘
//! ```

use std::time::Duration;
use thiserror::Error;

/// Result type alias using KvError
pub type KvResult<T> = std::result::Result<T, KvError>;

/// Unified error type for storage operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KvError {
    // -------------------------------------------------------------------------
    // Validation errors (raised before any driver call)
    // -------------------------------------------------------------------------
    /// The request named a storage instance that was never registered.
    #[error("storage '{0}' is not registered")]
    UnknownStorage(String),

    /// An item carried a timeout that is not an RFC 3339 timestamp.
    #[error("invalid timeout for key '{key}': {reason}")]
    InvalidTimeout { key: String, reason: String },

    /// An item is structurally invalid for the operation (e.g. empty key).
    #[error("invalid item: {0}")]
    InvalidItem(String),

    // -------------------------------------------------------------------------
    // Driver errors
    // -------------------------------------------------------------------------
    /// The driver could not reach its medium. Retryable.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The driver's storage engine reported a failure.
    #[error("backend error: {0}")]
    BackendInternal(String),

    // -------------------------------------------------------------------------
    // Service / transport errors
    // -------------------------------------------------------------------------
    /// The request did not finish within the service deadline.
    #[error("deadline of {}ms exceeded", .0.as_millis())]
    DeadlineExceeded(Duration),

    /// A well-formed RESP value that is not a valid batch frame.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl KvError {
    /// Stable code written as the first word of an error reply.
    pub fn code(&self) -> &'static str {
        match self {
            KvError::UnknownStorage(_) => "UNKNOWN_STORAGE",
            KvError::InvalidTimeout { .. } => "INVALID_TIMEOUT",
            KvError::InvalidItem(_) => "INVALID_ITEM",
            KvError::BackendUnavailable(_) => "BACKEND_UNAVAILABLE",
            KvError::BackendInternal(_) => "BACKEND_INTERNAL",
            KvError::DeadlineExceeded(_) => "DEADLINE_EXCEEDED",
            KvError::Protocol(_) => "PROTOCOL",
        }
    }

    /// Returns true if the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KvError::BackendUnavailable(_) | KvError::DeadlineExceeded(_)
        )
    }

    /// Formats the error as `<CODE> <message>` for an error reply.
    pub fn to_wire(&self) -> String {
        let detail = match self {
            KvError::UnknownStorage(name) => name.clone(),
            KvError::InvalidTimeout { key, reason } => format!("{} {}", key, reason),
            KvError::InvalidItem(msg)
            | KvError::BackendUnavailable(msg)
            | KvError::BackendInternal(msg)
            | KvError::Protocol(msg) => msg.clone(),
            KvError::DeadlineExceeded(limit) => limit.as_millis().to_string(),
        };
        format!("{} {}", self.code(), detail)
    }

    /// Rebuilds an error from an error reply produced by [`KvError::to_wire`].
    ///
    /// Unrecognised codes map to `BackendInternal` carrying the whole line.
    pub fn from_wire(line: &str) -> Self {
        let (code, detail) = line.split_once(' ').unwrap_or((line, ""));
        let detail = detail.to_string();

        match code {
            "UNKNOWN_STORAGE" => KvError::UnknownStorage(detail),
            "INVALID_TIMEOUT" => {
                let (key, reason) = detail.split_once(' ').unwrap_or((detail.as_str(), ""));
                KvError::InvalidTimeout {
                    key: key.to_string(),
                    reason: reason.to_string(),
                }
            }
            "INVALID_ITEM" => KvError::InvalidItem(detail),
            "BACKEND_UNAVAILABLE" => KvError::BackendUnavailable(detail),
            "BACKEND_INTERNAL" => KvError::BackendInternal(detail),
            "DEADLINE_EXCEEDED" => {
                let ms = detail.parse().unwrap_or(0);
                KvError::DeadlineExceeded(Duration::from_millis(ms))
            }
            "PROTOCOL" => KvError::Protocol(detail),
            _ => KvError::BackendInternal(line.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_codes_survive_the_trip() {
        let errors = vec![
            KvError::UnknownStorage("redis-rr".into()),
            KvError::InvalidTimeout {
                key: "a".into(),
                reason: "input contains invalid characters".into(),
            },
            KvError::InvalidItem("empty key at position 2".into()),
            KvError::BackendUnavailable("connection refused".into()),
            KvError::BackendInternal("WRONGTYPE".into()),
            KvError::DeadlineExceeded(Duration::from_millis(250)),
            KvError::Protocol("expected array".into()),
        ];

        for err in errors {
            assert_eq!(KvError::from_wire(&err.to_wire()), err);
        }
    }

    #[test]
    fn test_unknown_code_is_internal() {
        let err = KvError::from_wire("ERR something odd");
        assert_eq!(err, KvError::BackendInternal("ERR something odd".into()));
    }

    #[test]
    fn test_retryable() {
        assert!(KvError::BackendUnavailable("down".into()).is_retryable());
        assert!(KvError::DeadlineExceeded(Duration::from_secs(1)).is_retryable());
        assert!(!KvError::UnknownStorage("x".into()).is_retryable());
        assert!(!KvError::InvalidItem("x".into()).is_retryable());
    }
}
