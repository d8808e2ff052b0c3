//! Error types for provider calls

use std::fmt;

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Failures reported by the geocoding and forecast providers
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// API key rejected; no later request can succeed
    InvalidCredentials(String),

    /// The provider has no match for the location code
    NotFound(String),

    /// Unexpected error payload
    Api { code: u16, message: String },

    /// Request could not be sent or the body could not be read
    Transport(String),

    /// Body was not the expected JSON
    Decode(String),
}

impl ProviderError {
    /// Only credential failures abort the whole pipeline.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProviderError::InvalidCredentials(_))
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::InvalidCredentials(msg) => write!(f, "invalid API credentials: {msg}"),
            ProviderError::NotFound(what) => write!(f, "no results for '{what}'"),
            ProviderError::Api { code, message } => {
                write!(f, "provider error {code}: {message}")
            }
            ProviderError::Transport(msg) => write!(f, "provider request failed: {msg}"),
            ProviderError::Decode(msg) => write!(f, "failed to decode provider response: {msg}"),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Transport(err.to_string())
    }
}
