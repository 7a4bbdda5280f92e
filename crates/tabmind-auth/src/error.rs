//! Error types for authentication operations.

use thiserror::Error;

/// Errors that can occur during authentication operations.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Failed to read or write the local store file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to serialize or deserialize stored data.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An OAuth endpoint request failed at the HTTP level.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Could not determine the data directory.
    #[error("Could not determine data directory")]
    NoDataDir,

    /// Failed to set file permissions.
    #[error("Failed to set file permissions: {0}")]
    Permissions(String),

    /// Dynamic client registration was rejected.
    #[error("Client registration failed: {0}")]
    RegistrationFailed(String),

    /// The authorization-code exchange was rejected.
    #[error("Code exchange failed: {0}")]
    ExchangeFailed(String),

    /// The refresh-token exchange was rejected.
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// No usable credentials exist for the server.
    #[error("Server '{0}' requires authorization")]
    NotAuthorized(String),
}

/// Result type for auth operations.
pub type AuthResult<T> = Result<T, AuthError>;
