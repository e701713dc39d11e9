use std::collections::HashMap;

use thiserror::Error;

/// The neutral error kinds of §7, shared by every crate above `swarmctl-domain`.
/// Each carries a human message, an optional cause, an optional retryable
/// flag, and optional structured context — this is the single taxonomy
/// every backend error gets translated into at the driver boundary; nothing
/// above the driver re-derives retryability from a backend-specific code.
#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SwarmError {
    /// Whether a caller may retry the operation that produced this error,
    /// per the mapping in §4.A / §6.2.
    pub fn retryable(&self) -> bool {
        matches!(self, SwarmError::RateLimited(_) | SwarmError::Unavailable(_) | SwarmError::Timeout(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SwarmError::NotFound(_) => "not_found",
            SwarmError::AlreadyExists(_) => "already_exists",
            SwarmError::InvalidArgument(_) => "invalid_argument",
            SwarmError::Authentication(_) => "authentication",
            SwarmError::Unauthorized(_) => "unauthorized",
            SwarmError::RateLimited(_) => "rate_limited",
            SwarmError::Unavailable(_) => "unavailable",
            SwarmError::Timeout(_) => "timeout",
            SwarmError::Conflict(_) => "conflict",
            SwarmError::Internal(_) => "internal",
        }
    }
}

/// A structured error as it would cross an RPC boundary (§6): kind,
/// message, and an optional retry hint. Not wired to any transport in this
/// crate — the RPC server itself is out of scope — but this is the shape
/// such a server would serialize `SwarmError` into.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorEnvelope {
    pub kind: String,
    pub message: String,
    pub retryable: bool,
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl From<&SwarmError> for ErrorEnvelope {
    fn from(err: &SwarmError) -> Self {
        ErrorEnvelope {
            kind: err.kind().to_string(),
            message: err.to_string(),
            retryable: err.retryable(),
            context: HashMap::new(),
        }
    }
}
