//! rfcomm-link Shared Contract Types
//!
//! This crate provides the types exchanged between the connection core and
//! whatever sits on top of it (UI, demo binary, tests): device addresses,
//! the serial-profile service identifier, listener events, connection states
//! and errors. It carries no runtime so any consumer can depend on it.

pub mod error;
pub mod state_machine;

use bytes::Bytes;
use std::fmt;
use uuid::Uuid;

pub use error::{LinkError, Precondition};
pub use state_machine::{ConnectionState, ConnectionStateMachine, LinkTransition, TransitionResult};

/// Default tuning values for a connection
pub mod limits {
    /// Size of one receive chunk in bytes
    pub const READ_BUFFER_SIZE: usize = 256;

    /// Outbound messages queued per worker before `send` starts dropping
    pub const OUTBOUND_QUEUE: usize = 100;

    /// Upper bound for a single write attempt in milliseconds
    pub const WRITE_TIMEOUT_MS: u64 = 5000;
}

/// Opaque identifier of a remote radio peer (e.g. "AA:BB:CC:DD:EE:01")
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceAddress(String);

impl DeviceAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whitespace-only addresses count as empty
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for DeviceAddress {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DeviceAddress {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of the remote service a socket is opened against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceIdentifier(Uuid);

impl ServiceIdentifier {
    /// Serial Port Profile (SPP)
    pub const SERIAL_PORT: ServiceIdentifier =
        ServiceIdentifier(Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB));

    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ServiceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a connection attempt or session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Radio adapter was off when `connect` was called
    AdapterDisabled,
    /// `connect` was called with an empty address
    EmptyAddress,
    /// Address could not be resolved to a peer
    InvalidAddress,
    /// Missing permission to use the radio
    AuthorizationDenied,
    /// Peer does not offer the requested service
    ServiceNotFound,
    /// Peer refused or the platform failed the handshake
    HandshakeFailed,
    /// Configured connect timeout expired
    HandshakeTimedOut,
    /// Peer closed its end of the stream
    PeerClosed,
    /// Read from the socket failed
    ReadFailed,
    /// Write to the socket failed or timed out
    WriteFailed,
    /// Closed locally via `close`
    Closed,
    /// Replaced by a newer `connect` call
    Superseded,
    /// Controller was shut down or dropped
    ControllerStopped,
}

impl DisconnectReason {
    /// Map an Init or handshake error to the reason reported to listeners
    pub fn from_error(error: &LinkError) -> Self {
        match error {
            LinkError::PreconditionNotMet(Precondition::AdapterDisabled) => Self::AdapterDisabled,
            LinkError::PreconditionNotMet(Precondition::EmptyAddress) => Self::EmptyAddress,
            LinkError::InvalidAddress(_) => Self::InvalidAddress,
            LinkError::AuthorizationDenied(_) => Self::AuthorizationDenied,
            LinkError::ServiceNotFound(_) => Self::ServiceNotFound,
            LinkError::TransportFailure(_)
            | LinkError::AlreadyReleased
            | LinkError::NotConnected => Self::HandshakeFailed,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::AdapterDisabled => "adapter disabled",
            Self::EmptyAddress => "empty address",
            Self::InvalidAddress => "invalid address",
            Self::AuthorizationDenied => "authorization denied",
            Self::ServiceNotFound => "service not found",
            Self::HandshakeFailed => "handshake failed",
            Self::HandshakeTimedOut => "handshake timed out",
            Self::PeerClosed => "peer closed",
            Self::ReadFailed => "read failed",
            Self::WriteFailed => "write failed",
            Self::Closed => "closed",
            Self::Superseded => "superseded",
            Self::ControllerStopped => "controller stopped",
        };
        f.write_str(text)
    }
}

/// Value delivered to a listener
///
/// Status and payload travel on one channel but are distinct variants, so
/// inbound bytes can never be confused with a status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Handshake completed, the session is live
    Connected,
    /// The attempt failed or the session ended
    NotConnected(DisconnectReason),
    /// One chunk of inbound bytes, exactly as read
    Message(Bytes),
}
