//! RFCOMM transport implementation for Bluetooth serial connections

use crate::transport::traits::{RadioAdapter, TransportConnector, TransportStream};
use anyhow::Result;
use async_trait::async_trait;
use bluer::rfcomm::{SocketAddr as RfcommAddr, Stream as RfcommStream};
use bluer::{Adapter, Address, Device};
use rfcomm_link_shared::{DeviceAddress, LinkError, ServiceIdentifier};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, info, warn};

/// RFCOMM channel the serial port service listens on by default
pub const DEFAULT_RFCOMM_CHANNEL: u8 = 1;

/// RFCOMM stream wrapper implementing TransportStream
pub struct RfcommTransportStream {
    inner: RfcommStream,
    peer_addr: Address,
}

impl RfcommTransportStream {
    pub fn new(stream: RfcommStream, peer_addr: Address) -> Self {
        Self {
            inner: stream,
            peer_addr,
        }
    }
}

impl AsyncRead for RfcommTransportStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for RfcommTransportStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[async_trait]
impl TransportStream for RfcommTransportStream {
    async fn shutdown(&mut self) -> Result<(), LinkError> {
        debug!("[BT] Shutting down link to {}", self.peer_addr);
        tokio::io::AsyncWriteExt::shutdown(&mut self.inner).await?;
        Ok(())
    }
}

/// Configuration for the BlueZ adapter
#[derive(Debug, Clone)]
pub struct RfcommConfig {
    /// Adapter name (e.g. "hci0"), default adapter when unset
    pub adapter_name: Option<String>,
    /// RFCOMM channel number
    pub channel: u8,
}

impl Default for RfcommConfig {
    fn default() -> Self {
        Self {
            adapter_name: None,
            channel: DEFAULT_RFCOMM_CHANNEL,
        }
    }
}

/// Radio adapter backed by BlueZ
pub struct BluerAdapter {
    adapter: Adapter,
    channel: u8,
    // Keeps the D-Bus connection alive for the adapter handle
    _session: bluer::Session,
}

impl BluerAdapter {
    /// Open a BlueZ session and select the configured adapter.
    ///
    /// The adapter is not powered on here; a powered-off adapter makes every
    /// `connect` fail its precondition.
    pub async fn open(config: &RfcommConfig) -> Result<Self> {
        let session = bluer::Session::new().await?;
        let adapter = match &config.adapter_name {
            Some(name) => session.adapter(name)?,
            None => session.default_adapter().await?,
        };
        info!("[BT] Using adapter {}", adapter.name());

        Ok(Self {
            adapter,
            channel: config.channel,
            _session: session,
        })
    }
}

#[async_trait]
impl RadioAdapter for BluerAdapter {
    type Connector = RfcommConnector;

    async fn is_enabled(&self) -> bool {
        match self.adapter.is_powered().await {
            Ok(powered) => powered,
            Err(e) => {
                warn!("[BT] Could not query adapter power state: {}", e);
                false
            }
        }
    }

    fn connector(
        &self,
        address: &DeviceAddress,
        service: ServiceIdentifier,
    ) -> Result<Self::Connector, LinkError> {
        let address = parse_address(address)?;
        let device = self.adapter.device(address).map_err(map_bluer_error)?;

        Ok(RfcommConnector {
            device,
            address,
            channel: self.channel,
            service,
        })
    }
}

/// RFCOMM socket to one peer, connected on demand
pub struct RfcommConnector {
    device: Device,
    address: Address,
    channel: u8,
    service: ServiceIdentifier,
}

#[async_trait]
impl TransportConnector for RfcommConnector {
    type Stream = RfcommTransportStream;

    async fn connect(&self) -> Result<Self::Stream, LinkError> {
        // Only known devices report their services; unknown ones are tried anyway
        match self.device.uuids().await {
            Ok(Some(uuids)) => {
                let wanted = self.service.uuid().as_u128();
                if !uuids.iter().any(|uuid| uuid.as_u128() == wanted) {
                    return Err(LinkError::ServiceNotFound(self.service));
                }
            }
            Ok(None) => {}
            Err(e) => debug!("[BT] Service list unavailable for {}: {}", self.address, e),
        }

        let socket_addr = RfcommAddr::new(self.address, self.channel);
        info!("[BT] Connecting to {} channel {}", self.address, self.channel);

        let stream = RfcommStream::connect(socket_addr).await?;

        info!("[BT] Connected to {}", self.address);
        Ok(RfcommTransportStream::new(stream, self.address))
    }

    fn name(&self) -> &'static str {
        "Bluetooth"
    }
}

fn parse_address(address: &DeviceAddress) -> Result<Address, LinkError> {
    address
        .as_str()
        .trim()
        .parse::<Address>()
        .map_err(|_| LinkError::InvalidAddress(address.to_string()))
}

fn map_bluer_error(err: bluer::Error) -> LinkError {
    match err.kind {
        bluer::ErrorKind::NotAuthorized | bluer::ErrorKind::NotPermitted => {
            LinkError::AuthorizationDenied(err.message)
        }
        _ => LinkError::TransportFailure(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RfcommConfig::default();
        assert!(config.adapter_name.is_none());
        assert_eq!(config.channel, DEFAULT_RFCOMM_CHANNEL);
    }

    #[test]
    fn test_parse_address() {
        let addr = parse_address(&DeviceAddress::from("AA:BB:CC:DD:EE:01")).unwrap();
        assert_eq!(addr, Address::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x01]));
    }

    #[test]
    fn test_parse_address_rejects_garbage() {
        let result = parse_address(&DeviceAddress::from("not-a-mac"));
        assert!(matches!(result, Err(LinkError::InvalidAddress(_))));
    }
}
