//! Transport trait abstraction for the radio stack

use async_trait::async_trait;
use rfcomm_link_shared::{DeviceAddress, LinkError, ServiceIdentifier};
use tokio::io::{AsyncRead, AsyncWrite};

/// A duplex byte stream to a connected peer
#[async_trait]
pub trait TransportStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Close the transport gracefully
    async fn shutdown(&mut self) -> Result<(), LinkError>;
}

/// A created but not yet connected socket to one peer
#[async_trait]
pub trait TransportConnector: Send + Sync + 'static {
    /// The stream type this connector produces
    type Stream: TransportStream;

    /// Perform the handshake, returning a stream on success
    async fn connect(&self) -> Result<Self::Stream, LinkError>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}

/// Local radio adapter able to open sockets to remote peers
#[async_trait]
pub trait RadioAdapter: Send + Sync + 'static {
    type Connector: TransportConnector;

    /// Whether the radio is powered and ready
    async fn is_enabled(&self) -> bool;

    /// Resolve `address` and create a socket for `service`.
    ///
    /// Must not block; the handshake happens in [`TransportConnector::connect`].
    fn connector(
        &self,
        address: &DeviceAddress,
        service: ServiceIdentifier,
    ) -> Result<Self::Connector, LinkError>;
}
