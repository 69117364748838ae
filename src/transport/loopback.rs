//! In-memory loopback transport used to simulate remote peers in tests

use crate::transport::traits::{RadioAdapter, TransportConnector, TransportStream};
use async_trait::async_trait;
use rfcomm_link_shared::{DeviceAddress, LinkError, ServiceIdentifier};
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::mpsc;

/// Bytes a loopback pipe buffers in each direction
pub const PIPE_CAPACITY: usize = 4096;

/// How a simulated peer answers the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerBehavior {
    Accept,
    /// Accept after a delay
    AcceptAfter(Duration),
    /// Accept, but every local write fails
    AcceptBrokenWriter,
    /// Accept, but every local read fails
    AcceptBrokenReader,
    Refuse,
    DenyAuthorization,
    /// Never answer
    Hang,
}

/// Remote end of an accepted loopback connection
pub struct PeerEnd {
    pub address: DeviceAddress,
    pub stream: DuplexStream,
}

/// Test-side view of the loopback adapter
pub struct LoopbackPeers {
    accepted_rx: mpsc::UnboundedReceiver<PeerEnd>,
    connectors: Arc<AtomicUsize>,
    shutdowns: Arc<AtomicUsize>,
}

impl LoopbackPeers {
    /// Wait for the next accepted connection
    pub async fn accept(&mut self) -> PeerEnd {
        tokio::time::timeout(Duration::from_secs(2), self.accepted_rx.recv())
            .await
            .expect("no peer connection within 2s")
            .expect("loopback adapter dropped")
    }

    /// Number of sockets created via `connector`
    pub fn connectors_created(&self) -> usize {
        self.connectors.load(Ordering::SeqCst)
    }

    /// Number of graceful local shutdowns
    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

/// Radio adapter whose peers live in memory
pub struct LoopbackAdapter {
    enabled: bool,
    peers: HashMap<String, PeerBehavior>,
    accepted_tx: mpsc::UnboundedSender<PeerEnd>,
    connectors: Arc<AtomicUsize>,
    shutdowns: Arc<AtomicUsize>,
}

impl LoopbackAdapter {
    /// Create an adapter with no peers and the test handle observing it
    pub fn pair() -> (Self, LoopbackPeers) {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        let connectors = Arc::new(AtomicUsize::new(0));
        let shutdowns = Arc::new(AtomicUsize::new(0));

        let adapter = Self {
            enabled: true,
            peers: HashMap::new(),
            accepted_tx,
            connectors: connectors.clone(),
            shutdowns: shutdowns.clone(),
        };
        let peers = LoopbackPeers {
            accepted_rx,
            connectors,
            shutdowns,
        };
        (adapter, peers)
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_peer(mut self, address: &str, behavior: PeerBehavior) -> Self {
        self.peers.insert(address.to_string(), behavior);
        self
    }
}

#[async_trait]
impl RadioAdapter for LoopbackAdapter {
    type Connector = LoopbackConnector;

    async fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn connector(
        &self,
        address: &DeviceAddress,
        _service: ServiceIdentifier,
    ) -> Result<Self::Connector, LinkError> {
        let behavior = *self
            .peers
            .get(address.as_str())
            .ok_or_else(|| LinkError::InvalidAddress(address.to_string()))?;

        self.connectors.fetch_add(1, Ordering::SeqCst);
        Ok(LoopbackConnector {
            address: address.clone(),
            behavior,
            accepted_tx: self.accepted_tx.clone(),
            shutdowns: self.shutdowns.clone(),
        })
    }
}

/// Socket to one simulated peer
pub struct LoopbackConnector {
    address: DeviceAddress,
    behavior: PeerBehavior,
    accepted_tx: mpsc::UnboundedSender<PeerEnd>,
    shutdowns: Arc<AtomicUsize>,
}

impl LoopbackConnector {
    fn accept(&self, fail_reads: bool, fail_writes: bool) -> LoopbackStream {
        let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
        let _ = self.accepted_tx.send(PeerEnd {
            address: self.address.clone(),
            stream: remote,
        });
        LoopbackStream {
            inner: local,
            fail_reads,
            fail_writes,
            shutdowns: self.shutdowns.clone(),
        }
    }
}

#[async_trait]
impl TransportConnector for LoopbackConnector {
    type Stream = LoopbackStream;

    async fn connect(&self) -> Result<Self::Stream, LinkError> {
        match self.behavior {
            PeerBehavior::Accept => Ok(self.accept(false, false)),
            PeerBehavior::AcceptAfter(delay) => {
                tokio::time::sleep(delay).await;
                Ok(self.accept(false, false))
            }
            PeerBehavior::AcceptBrokenWriter => Ok(self.accept(false, true)),
            PeerBehavior::AcceptBrokenReader => Ok(self.accept(true, false)),
            PeerBehavior::Refuse => {
                Err(io::Error::new(io::ErrorKind::ConnectionRefused, "peer refused").into())
            }
            PeerBehavior::DenyAuthorization => Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "missing radio permission",
            )
            .into()),
            PeerBehavior::Hang => std::future::pending().await,
        }
    }

    fn name(&self) -> &'static str {
        "Loopback"
    }
}

/// Local end of a loopback connection
pub struct LoopbackStream {
    inner: DuplexStream,
    fail_reads: bool,
    fail_writes: bool,
    shutdowns: Arc<AtomicUsize>,
}

impl AsyncRead for LoopbackStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.fail_reads {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "link lost")));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for LoopbackStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.fail_writes {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "link lost")));
        }
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
impl TransportStream for LoopbackStream {
    async fn shutdown(&mut self) -> Result<(), LinkError> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        tokio::io::AsyncWriteExt::shutdown(&mut self.inner).await?;
        Ok(())
    }
}
