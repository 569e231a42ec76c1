//! Error types for identity provisioning

use std::path::PathBuf;
use thiserror::Error;

/// Result type for identity provisioning
pub type Result<T> = std::result::Result<T, IdentityError>;

/// Errors that can occur while provisioning an identity
#[derive(Error, Debug)]
pub enum IdentityError {
    /// Target directory missing or not a directory
    #[error("Invalid path {}: {reason}", .path.display())]
    InvalidPath { path: PathBuf, reason: String },

    /// Identity files exist and overwriting was not requested
    #[error("Identity already exists at {}", .0.display())]
    AlreadyExists(PathBuf),

    /// Two distinct common names map to the same file pair
    #[error("Common name {requested:?} collides with existing identity {existing:?} at {}", .path.display())]
    NameCollision {
        requested: String,
        existing: String,
        path: PathBuf,
    },

    #[error("Certificate generation failed: {0}")]
    CertGeneration(String),

    #[error("Certificate parsing failed: {0}")]
    CertParsing(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rcgen::Error> for IdentityError {
    fn from(err: rcgen::Error) -> Self {
        IdentityError::CertGeneration(err.to_string())
    }
}
