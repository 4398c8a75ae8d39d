//! Error types used across the Lodestone runtime core.

use thiserror::Error;

/// Result type for Lodestone operations.
pub type LodestoneResult<T> = Result<T, LodestoneError>;

#[derive(Debug, Error)]
pub enum LodestoneError {
    #[error("invalid path: {0}")]
    PathInvalid(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not a file: {0}")]
    NotAFile(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("read-only: {0}")]
    ReadOnly(String),

    #[error("stream I/O failed: {0}")]
    StreamIo(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("reflection field absent: {0}")]
    FieldAbsent(String),

    #[error("integer out of range: {0}")]
    OutOfRange(String),

    #[error("array capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("unsupported archetype: {0}")]
    UnsupportedArchetype(String),

    #[error("patch without type: {0}")]
    PatchWithoutType(String),

    #[error("scan budget exhausted")]
    ScanBudgetExhausted,

    #[error("load budget exhausted")]
    LoadBudgetExhausted,

    #[error("missing peer system: {0}")]
    MissingPeer(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("internal error: {0}")]
    Internal(String),
}

// Implement From for common error types to enable `?` operator
impl From<std::io::Error> for LodestoneError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => LodestoneError::NotFound(err.to_string()),
            std::io::ErrorKind::AlreadyExists => LodestoneError::AlreadyExists(err.to_string()),
            std::io::ErrorKind::PermissionDenied => LodestoneError::ReadOnly(err.to_string()),
            _ => LodestoneError::StreamIo(err.to_string()),
        }
    }
}

impl From<String> for LodestoneError {
    fn from(err: String) -> Self {
        LodestoneError::Internal(err)
    }
}

impl From<&str> for LodestoneError {
    fn from(err: &str) -> Self {
        LodestoneError::Internal(err.to_string())
    }
}
