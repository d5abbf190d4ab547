use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Correlation identifier attached to every externally-surfaced error and
/// logged alongside structured context. Random v4 — these are per-failure,
/// not per-entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The error taxonomy shared across the engine.
///
/// `PartialSignal` is deliberately absent: a partial analysis result is
/// surfaced as metadata on [`crate::signal::SignalRecord`], never as an
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input (empty entry, unknown session type, …). Not retryable.
    InputInvalid,
    /// Entity missing or not visible to this user. Not retryable.
    NotFound,
    /// Concurrent-write conflict (e.g. duplicate topic name). Retryable with
    /// different input.
    Conflict,
    /// Worker pool or model runner saturated. Retryable with backoff.
    Overloaded,
    /// Inference failed on a device/resource error. Retryable with backoff,
    /// subject to policy.
    ModelFault,
    /// Authoritative store unavailable or inconsistent. Surfaced, never
    /// silently retried at this layer.
    StoreFault,
    /// Deadline elapsed or the caller cancelled. Not retryable automatically.
    Cancelled,
}

impl ErrorKind {
    /// Short code string for logs and API mappings.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::InputInvalid => "INPUT_INVALID",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Overloaded => "OVERLOADED",
            ErrorKind::ModelFault => "MODEL_FAULT",
            ErrorKind::StoreFault => "STORE_FAULT",
            ErrorKind::Cancelled => "CANCELLED",
        }
    }

    /// Whether a caller may retry the same request after a backoff.
    pub fn retryable(self) -> bool {
        matches!(self, ErrorKind::Overloaded | ErrorKind::ModelFault)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// The error type crossing the engine's public boundary.
///
/// Carries the kind, a correlation id, and a short diagnostic message that
/// is safe to show outside the process.
#[derive(Debug, Clone, Error)]
#[error("{kind} [{correlation}]: {message}")]
pub struct EngineError {
    pub kind: ErrorKind,
    pub correlation: CorrelationId,
    pub message: String,
}

impl EngineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            correlation: CorrelationId::new(),
            message: message.into(),
        }
    }

    pub fn input_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InputInvalid, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn retryable(&self) -> bool {
        self.kind.retryable()
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_follows_the_kind_table() {
        assert!(ErrorKind::Overloaded.retryable());
        assert!(ErrorKind::ModelFault.retryable());
        for kind in [
            ErrorKind::InputInvalid,
            ErrorKind::NotFound,
            ErrorKind::Conflict,
            ErrorKind::StoreFault,
            ErrorKind::Cancelled,
        ] {
            assert!(!kind.retryable(), "{kind} must not be retryable");
        }
    }

    #[test]
    fn display_carries_kind_and_correlation() {
        let err = EngineError::new(ErrorKind::NotFound, "entry missing");
        let s = err.to_string();
        assert!(s.contains("NOT_FOUND"));
        assert!(s.contains(err.correlation.as_str()));
    }
}
