//! Error taxonomy shared by the whole engine (spec §7).
//!
//! `EngineError` is the single error type every crate in the workspace
//! converges on; `mnemolite-core` and `mnemolite-orchestration` re-export it
//! rather than defining their own.

use thiserror::Error;

/// Engine-wide error kinds (spec §7). Each variant carries enough context
/// for a caller to decide whether to retry, fall back, or surface verbatim.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Shape or range violation. Never retried; surfaced verbatim.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Addressed entity absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness violation (e.g. duplicate memory title within a project).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Deadline expired.
    #[error("timeout: operation={operation} timeout={timeout_ms}ms elapsed={elapsed_ms}ms")]
    Timeout {
        operation: String,
        timeout_ms: u64,
        elapsed_ms: u64,
    },

    /// Circuit breaker tripped; treated as `Timeout` for degradation purposes.
    #[error("circuit open: {service}")]
    CircuitOpen { service: String },

    /// Underlying store cannot serve the request.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Recoverable: the chunk/memory is written without its embedding.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Unexpected; logged with full context, surfaced as opaque.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64, elapsed_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
            elapsed_ms,
        }
    }

    pub fn circuit_open(service: impl Into<String>) -> Self {
        Self::CircuitOpen {
            service: service.into(),
        }
    }

    pub fn storage_unavailable(msg: impl Into<String>) -> Self {
        Self::StorageUnavailable(msg.into())
    }

    pub fn embedding_unavailable(msg: impl Into<String>) -> Self {
        Self::EmbeddingUnavailable(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// `CircuitOpen` degrades like `Timeout` (spec §7 propagation policy).
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::CircuitOpen { .. })
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => {
                EngineError::not_found("row not found")
            }
            other => EngineError::storage_unavailable(other.to_string()),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => EngineError::not_found("row not found"),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                EngineError::conflict(db_err.to_string())
            }
            _ => EngineError::storage_unavailable(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::internal(format!("json error: {err}"))
    }
}

/// Result type alias used across the workspace.
pub type Result<T> = std::result::Result<T, EngineError>;
