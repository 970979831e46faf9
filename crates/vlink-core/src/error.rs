//! Error types for vlink

use thiserror::Error;

/// Result type alias for vlink operations
pub type VlinkResult<T> = Result<T, VlinkError>;

/// Main error type for vlink
///
/// Transport-level failures are translated into one of these kinds at the
/// auth/API client boundary; nothing below `reqwest` crosses into the
/// coordinator or its consumers.
#[derive(Error, Debug, Clone)]
pub enum VlinkError {
    /// Invalid credentials, expired refresh token, unrecognized protocol
    /// status, or HTTP 401/403. Fatal to the session; requires re-login.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Any other non-2xx response or malformed payload.
    #[error("API request failed: {0}")]
    Api(String),

    /// Poll-cycle transport error or timeout. Recoverable; the previous
    /// snapshot stays authoritative.
    #[error("Update failed: {0}")]
    Update(String),

    /// Transient connectivity failure during setup or token refresh.
    /// Retry on the normal schedule without discarding persisted state.
    #[error("Not ready: {0}")]
    NotReady(String),

    /// The persisted session record is absent when it was expected.
    #[error("Session storage missing")]
    StorageMissing,

    /// A remote command finished in a non-success terminal state.
    #[error("Command '{command}' failed with status {status}: {message}")]
    CommandFailed {
        command: String,
        status: String,
        message: String,
    },

    /// IO errors
    #[error("IO error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),
}

impl VlinkError {
    /// Create a new authentication error
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// Create a new API error
    pub fn api(message: impl Into<String>) -> Self {
        Self::Api(message.into())
    }

    /// Create a new update error
    pub fn update(message: impl Into<String>) -> Self {
        Self::Update(message.into())
    }

    /// Create a new not-ready error
    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::NotReady(message.into())
    }
}

impl From<std::io::Error> for VlinkError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<serde_json::Error> for VlinkError {
    fn from(error: serde_json::Error) -> Self {
        Self::Json(error.to_string())
    }
}

impl From<crate::store::StoreError> for VlinkError {
    fn from(error: crate::store::StoreError) -> Self {
        use crate::store::StoreError;
        match error {
            StoreError::Io(message) => Self::Io(message),
            StoreError::Serialization(message) => Self::Json(message),
            future @ StoreError::FutureVersion { .. } => Self::NotReady(future.to_string()),
        }
    }
}
