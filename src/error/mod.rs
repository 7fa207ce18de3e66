//! Error types for registry manager operations

use crate::manager::record::RegistryIdentity;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Error, Debug)]
pub enum RegistryError {
    /// Malformed scheme, host, or port in a registry address
    #[error("invalid registry address: {0}")]
    InvalidAddress(String),
    /// A registry with the same scheme/host/port is already configured
    #[error("registry already exists: {0}")]
    DuplicateRegistry(RegistryIdentity),
    /// Operation on a registry that is not configured
    #[error("registry not found: {0}")]
    NotFound(RegistryIdentity),
    /// Network-level failure reaching a registry endpoint
    #[error("connection error: {0}")]
    Connection(String),
    /// The registry answered, but not in the shape the v2 API promises
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RegistryError::Protocol(err.to_string())
        } else {
            RegistryError::Connection(err.to_string())
        }
    }
}

impl From<url::ParseError> for RegistryError {
    fn from(err: url::ParseError) -> Self {
        RegistryError::InvalidAddress(err.to_string())
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::Protocol(err.to_string())
    }
}
