use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorCode {
    InvalidCredentials,
    EmailExists,
    ValidationFailed,
    RateLimited,
    Unavailable,
    Internal,
}

/// Failure reported by (or on behalf of) the identity backend.
#[derive(Debug, Clone, Error)]
#[error("{code:?}: {message}")]
pub struct ProviderError {
    pub code: ProviderErrorCode,
    pub message: String,
}

impl ProviderError {
    pub fn new(code: ProviderErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// User-facing authentication failure. Raw provider detail never reaches a
/// form; everything collapses into one of these messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("This email is already registered")]
    AlreadyRegistered,
    #[error("{0}")]
    Validation(String),
    #[error("An unexpected error occurred")]
    Unexpected,
}

impl From<ProviderError> for AuthError {
    fn from(err: ProviderError) -> Self {
        match err.code {
            ProviderErrorCode::InvalidCredentials => AuthError::InvalidCredentials,
            ProviderErrorCode::EmailExists => AuthError::AlreadyRegistered,
            ProviderErrorCode::ValidationFailed => AuthError::Validation(err.message),
            ProviderErrorCode::RateLimited
            | ProviderErrorCode::Unavailable
            | ProviderErrorCode::Internal => AuthError::Unexpected,
        }
    }
}
