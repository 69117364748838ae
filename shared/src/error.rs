//! Error taxonomy for connection attempts and sends

use std::fmt;
use std::io;
use thiserror::Error;

use crate::ServiceIdentifier;

/// Precondition checked by `connect` before any socket is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    AdapterDisabled,
    EmptyAddress,
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precondition::AdapterDisabled => f.write_str("adapter is not enabled"),
            Precondition::EmptyAddress => f.write_str("device address is empty"),
        }
    }
}

/// Errors that can occur while opening or using a link
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Precondition not met: {0}")]
    PreconditionNotMet(Precondition),

    #[error("Invalid device address: {0}")]
    InvalidAddress(String),

    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("Remote device does not offer service {0}")]
    ServiceNotFound(ServiceIdentifier),

    #[error("Transport failure: {0}")]
    TransportFailure(String),

    #[error("Socket already released")]
    AlreadyReleased,

    #[error("Not connected")]
    NotConnected,
}

impl LinkError {
    pub fn is_authorization(&self) -> bool {
        matches!(self, LinkError::AuthorizationDenied(_))
    }
}

impl From<io::Error> for LinkError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => LinkError::AuthorizationDenied(err.to_string()),
            _ => LinkError::TransportFailure(err.to_string()),
        }
    }
}
