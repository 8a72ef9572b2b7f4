//! Error types shared by the cluster client, waits and the reconciler.

use std::fmt;

use thiserror::Error;

/// Coarse classification used for retry decisions and exit-code mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Resource absent. Success on delete and teardown paths.
    NotFound,
    /// Network blip or resource not ready yet. Retried automatically.
    Transient,
    /// A wait exceeded its budget or the overall deadline expired.
    Timeout,
    /// Applied state does not match the desired state.
    VerificationMismatch,
    /// Missing prerequisite, unreachable or unauthenticated cluster, bad input.
    Fatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "NotFound"),
            Self::Transient => write!(f, "Transient"),
            Self::Timeout => write!(f, "Timeout"),
            Self::VerificationMismatch => write!(f, "VerificationMismatch"),
            Self::Fatal => write!(f, "Fatal"),
        }
    }
}

/// Errors raised by cluster operations and reconciliation.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The requested object does not exist.
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    /// Retryable failure.
    #[error("transient error: {0}")]
    Transient(String),

    /// Readiness never reached within the allowed attempts or deadline.
    #[error("timed out waiting for {what} after {attempts} attempt(s)")]
    Timeout { what: String, attempts: u32 },

    /// Live state differs from the desired state.
    #[error("verification mismatch: {}", .0.join("; "))]
    VerificationMismatch(Vec<String>),

    /// The desired state violates an invariant.
    #[error("invalid desired state: {0}")]
    InvalidSpec(String),

    /// Unrecoverable failure.
    #[error("{0}")]
    Fatal(String),
}

impl Error {
    /// Shorthand for a [`Error::NotFound`].
    pub fn not_found(kind: impl fmt::Display, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.to_string(),
            name: name.into(),
        }
    }

    /// Classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Transient(_) => ErrorKind::Transient,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::VerificationMismatch(_) => ErrorKind::VerificationMismatch,
            Self::InvalidSpec(_) | Self::Fatal(_) => ErrorKind::Fatal,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Fatal(format!("YAML error: {err}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Fatal(format!("JSON error: {err}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Fatal(format!("I/O error: {err}"))
    }
}

/// Result alias for cluster and reconciliation operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Check if an error message looks transient and worth retrying.
///
/// Used for failures that only surface as text, such as installer output.
#[must_use]
pub fn is_transient_message(message: &str) -> bool {
    let msg = message.to_lowercase();
    msg.contains("timeout")
        || msg.contains("timed out")
        || msg.contains("connection refused")
        || msg.contains("connection reset")
        || msg.contains("rate limit")
        || msg.contains("503")
        || msg.contains("502")
        || msg.contains("504")
        || msg.contains("temporarily unavailable")
        || msg.contains("try again")
        || msg.contains("tls handshake")
}
