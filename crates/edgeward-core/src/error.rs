//! Error types for the edgeward core

use thiserror::Error;

use crate::attestation::AttestationState;

/// Result type alias using EdgewardError
pub type Result<T> = std::result::Result<T, EdgewardError>;

/// Errors that can occur in the attestation and token layer
#[derive(Error, Debug)]
pub enum EdgewardError {
    /// Attestation operation invoked out of sequence
    #[error("Invalid attestation state: cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: AttestationState,
    },

    /// Integrity token failed to decode or verify
    #[error("Invalid integrity token: {0}")]
    InvalidToken(String),

    /// COSE encoding/decoding error
    #[error("COSE error: {0}")]
    CoseError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Cryptographic error
    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}

impl From<ed25519_dalek::SignatureError> for EdgewardError {
    fn from(err: ed25519_dalek::SignatureError) -> Self {
        EdgewardError::CryptoError(err.to_string())
    }
}

impl From<serde_json::Error> for EdgewardError {
    fn from(err: serde_json::Error) -> Self {
        EdgewardError::SerializationError(err.to_string())
    }
}

impl From<coset::CoseError> for EdgewardError {
    fn from(err: coset::CoseError) -> Self {
        EdgewardError::CoseError(format!("{:?}", err))
    }
}

impl From<base64::DecodeError> for EdgewardError {
    fn from(err: base64::DecodeError) -> Self {
        EdgewardError::InvalidToken(format!("invalid base64 encoding: {}", err))
    }
}
