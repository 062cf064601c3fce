//! Error types for the azgraph-login application.
//!
//! Uses `thiserror` for library-style errors with automatic `Display` and `Error` implementations.

use thiserror::Error;

/// Top-level application error type.
///
/// Variants are transparent so an `anyhow` chain prints each message once.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// Authentication-related errors.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("OAuth2 authorization failed: {0}")]
    OAuthFailed(String),

    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    #[error("Token expired and no refresh token is available")]
    TokenExpired,

    #[error("State validation failed (possible CSRF attack)")]
    StateValidationFailed,

    #[error("Invalid authorization endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Errors from calling the downstream Graph API.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Graph API request failed: {0}")]
    GraphRequestFailed(String),

    #[error("Failed to read Graph API response: {0}")]
    ReadFailed(String),
}

/// Caller mistakes: missing input or calling an operation out of order.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum UsageError {
    #[error("Parameter required: {0}")]
    MissingParameter(&'static str),

    #[error("No token available, sign in via /login first")]
    NotSignedIn,

    #[error("Empty input, expected an authorization code or redirect URL")]
    EmptyInput,
}

impl AppError {
    /// Returns true if signing in again would clear this error.
    pub fn requires_sign_in(&self) -> bool {
        matches!(
            self,
            Self::Auth(AuthError::TokenExpired)
                | Self::Auth(AuthError::TokenRefreshFailed(_))
                | Self::Usage(UsageError::NotSignedIn)
        )
    }
}
