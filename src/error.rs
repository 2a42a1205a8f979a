//! Error types for the sync adapter.

use thiserror::Error;

/// A failure reported by the remote store.
///
/// Kept opaque: the adapter never interprets it, only forwards it to the
/// caller of the load or save that triggered it.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct RemoteError {
    pub code: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new("permission-denied", message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new("unavailable", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not-found", message)
    }
}

/// Main error type for adapter operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Unknown sync source kind: {0}")]
    UnknownSourceKind(String),

    #[error("Invalid proxy url: {0:?}")]
    InvalidProxyUrl(String),

    #[error("Load cancelled by release")]
    Cancelled,

    #[error("Result abandoned before completion")]
    Abandoned,

    #[error("Timed out waiting for result")]
    Timeout,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SyncError {
    /// The backend error carried by this failure, if any.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            SyncError::Remote(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

/// Result type for adapter operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Result type for raw remote store calls.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_display() {
        let err = RemoteError::permission_denied("write to /books denied");
        assert_eq!(err.to_string(), "permission-denied: write to /books denied");

        let wrapped: SyncError = err.clone().into();
        assert_eq!(wrapped.remote(), Some(&err));
        assert!(wrapped.to_string().contains("permission-denied"));
    }

    #[test]
    fn test_serde_error_conversion() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let converted: SyncError = err.into();
        assert!(matches!(converted, SyncError::Serialization(_)));
        assert!(converted.remote().is_none());
    }
}
