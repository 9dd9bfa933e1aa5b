use crate::domain::crypto::CryptoError;
use crate::domain::{SessionError, UserProfileError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KarcherError {
    #[error("http request failed: {0}")]
    Http(String),

    #[error("HTTP error: {0}")]
    HttpStatus(u16),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized or authorization expired, please log in again")]
    TokenExpired,

    #[error("Invalid token")]
    InvalidToken,

    #[error("The username or password is incorrect")]
    InvalidAuth,

    #[error("api error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("Invalid response: {0}")]
    UnexpectedResponse(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("Not authorized")]
    NotAuthorized,

    #[error("broker error: {0}")]
    Broker(String),

    #[error("map error: {0}")]
    Map(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl KarcherError {
    /// Maps a non-zero envelope `code` onto the error taxonomy.
    pub fn from_code(code: i64, message: &str) -> Self {
        match code {
            608 => Self::AccessDenied("Forbidden".to_string()),
            609 => Self::TokenExpired,
            613 => Self::InvalidToken,
            620 => Self::InvalidAuth,
            _ => Self::Api {
                code,
                message: message.to_string(),
            },
        }
    }

    /// Numeric code reported to CLI consumers.
    pub fn code(&self) -> i64 {
        match self {
            Self::Http(_) | Self::HttpStatus(_) => -1,
            Self::UnexpectedResponse(_) | Self::Decode(_) | Self::Json(_) => -2,
            Self::AccessDenied(_) | Self::NotAuthorized => 608,
            Self::TokenExpired => 609,
            Self::InvalidToken => 613,
            Self::InvalidAuth => 620,
            Self::Api { code, .. } => *code,
            Self::Broker(_) | Self::Map(_) => -3,
        }
    }
}

impl From<CryptoError> for KarcherError {
    fn from(error: CryptoError) -> Self {
        Self::Decode(error.to_string())
    }
}

impl From<SessionError> for KarcherError {
    fn from(error: SessionError) -> Self {
        Self::Decode(error.to_string())
    }
}

impl From<UserProfileError> for KarcherError {
    fn from(error: UserProfileError) -> Self {
        Self::Decode(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, KarcherError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_error_codes() {
        assert!(matches!(KarcherError::from_code(608, "x"), KarcherError::AccessDenied(_)));
        assert!(matches!(KarcherError::from_code(609, "x"), KarcherError::TokenExpired));
        assert!(matches!(KarcherError::from_code(613, "x"), KarcherError::InvalidToken));
        assert!(matches!(KarcherError::from_code(620, "x"), KarcherError::InvalidAuth));
        match KarcherError::from_code(700, "boom") {
            KarcherError::Api { code, message } => {
                assert_eq!(code, 700);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reports_cli_codes() {
        assert_eq!(KarcherError::HttpStatus(500).code(), -1);
        assert_eq!(KarcherError::UnexpectedResponse("x".to_string()).code(), -2);
        assert_eq!(KarcherError::NotAuthorized.code(), 608);
        assert_eq!(KarcherError::from_code(777, "m").code(), 777);
    }
}
