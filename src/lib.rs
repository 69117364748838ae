//! rfcomm-link
//!
//! Connection manager for a single Bluetooth serial (RFCOMM/SPP) link:
//! connect to one peer by address, exchange raw bytes, and observe the
//! connection through a [`Listener`].

pub mod connection;
pub mod transport;

pub use connection::{ConnectionController, FailurePolicy, LinkConfig, Listener};
pub use rfcomm_link_shared::{
    ConnectionState, DeviceAddress, DisconnectReason, LinkError, LinkEvent, ServiceIdentifier,
};
