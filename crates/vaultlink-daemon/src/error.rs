//! Errors surfaced by broker operations.

use vaultlink_crypto::CryptoError;

use crate::appliance::TransportError;
use crate::storage::DatabaseError;

pub type Result<T> = std::result::Result<T, BrokerError>;

/// Broker errors, each with a human-readable message and an HTTP-like
/// status classification.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// A prerequisite is missing or a request is malformed.
    #[error("{0}")]
    Configuration(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    /// The appliance could not be reached or rejected a request.
    #[error("{0}")]
    Remote(String),

    /// Certificate or key material was rejected. Nothing was installed.
    #[error("{0}")]
    Certificate(String),

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}

impl BrokerError {
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Configuration(_) | Self::Certificate(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::NotFound(_) => 404,
            Self::Remote(_) => 502,
            Self::Storage(_) => 500,
        }
    }

    /// Wrap a transport failure with what the broker was doing.
    pub fn remote(context: impl AsRef<str>, err: &TransportError) -> Self {
        match err {
            TransportError::Status { status: 401, .. } => {
                Self::Unauthorized(format!("{}: {err}", context.as_ref()))
            }
            _ => Self::Remote(format!("{}: {err}", context.as_ref())),
        }
    }

    pub fn certificate(context: impl AsRef<str>, err: &CryptoError) -> Self {
        Self::Certificate(format!("{}: {err}", context.as_ref()))
    }
}

impl From<CryptoError> for BrokerError {
    fn from(err: CryptoError) -> Self {
        Self::Certificate(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_the_taxonomy() {
        assert_eq!(BrokerError::Configuration("x".into()).status_code(), 400);
        assert_eq!(BrokerError::Unauthorized("x".into()).status_code(), 401);
        assert_eq!(BrokerError::NotFound("x".into()).status_code(), 404);
        assert_eq!(BrokerError::Remote("x".into()).status_code(), 502);
        assert_eq!(BrokerError::Certificate("x".into()).status_code(), 400);
        assert_eq!(
            BrokerError::Storage(DatabaseError::NotFound("x".into())).status_code(),
            500
        );
    }

    #[test]
    fn rejected_credentials_surface_as_unauthorized() {
        let err = BrokerError::remote(
            "Failed to read the logged in user",
            &TransportError::Status {
                status: 401,
                message: "expired".into(),
            },
        );
        assert!(matches!(err, BrokerError::Unauthorized(_)));
        assert!(err.to_string().starts_with("Failed to read the logged in user"));

        let err = BrokerError::remote("Failed", &TransportError::Http("refused".into()));
        assert_eq!(err.status_code(), 502);
    }
}
