//! Connection worker: one background task per connection attempt

use super::controller::{FailurePolicy, LinkConfig};
use super::listener::Listener;
use crate::transport::{TransportConnector, TransportStream};
use bytes::Bytes;
use rfcomm_link_shared::{
    ConnectionState, ConnectionStateMachine, DisconnectReason, LinkError, LinkEvent,
    LinkTransition, TransitionResult,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reply channel for a checked send
pub(crate) type SendAck = oneshot::Sender<Result<(), LinkError>>;

/// A message queued for the worker's write path
pub(crate) struct Outbound {
    pub payload: Bytes,
    pub ack: Option<SendAck>,
    /// Latest time the write may start; the caller stops waiting then
    pub deadline: Option<Instant>,
}

impl Outbound {
    /// Drop the message, telling a waiting caller why
    pub fn fail(self, error: LinkError) {
        match error {
            LinkError::NotConnected => {
                debug!("[LINK] Dropping {} byte message: {}", self.payload.len(), error)
            }
            _ => warn!("[LINK] Dropping {} byte message: {}", self.payload.len(), error),
        }
        if let Some(ack) = self.ack {
            let _ = ack.send(Err(error));
        }
    }
}

/// Coarse progress of a worker as seen by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Connecting,
    Connected,
    Finished,
}

struct GateState {
    fsm: ConnectionStateMachine,
    finished: bool,
}

/// Serializes one worker's notifications to its listener.
///
/// Once the terminal event went out nothing else is delivered, which covers
/// stale handshake results of superseded or closed attempts.
pub(crate) struct EventGate {
    id: u64,
    listener: Arc<dyn Listener>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    inner: Mutex<GateState>,
}

impl EventGate {
    pub fn new(
        id: u64,
        listener: Arc<dyn Listener>,
        state_tx: Arc<watch::Sender<ConnectionState>>,
    ) -> Self {
        let mut fsm = ConnectionStateMachine::new();
        fsm.process_event(LinkTransition::ConnectRequested);
        state_tx.send_replace(fsm.state());

        Self {
            id,
            listener,
            state_tx,
            inner: Mutex::new(GateState {
                fsm,
                finished: false,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn phase(&self) -> Phase {
        let inner = self.inner.lock().await;
        if inner.finished {
            Phase::Finished
        } else if inner.fsm.is_connected() {
            Phase::Connected
        } else {
            Phase::Connecting
        }
    }

    /// Report a completed handshake. False if the attempt already ended.
    async fn connected(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.finished {
            return false;
        }
        self.apply(&mut inner, LinkTransition::HandshakeSucceeded);
        self.listener.on_event(LinkEvent::Connected);
        true
    }

    /// Forward one inbound chunk. False if the session already ended.
    async fn message(&self, payload: Bytes) -> bool {
        let inner = self.inner.lock().await;
        if inner.finished {
            return false;
        }
        self.listener.on_event(LinkEvent::Message(payload));
        true
    }

    /// Emit the terminal event. Only the first call has any effect.
    pub async fn finish(&self, reason: DisconnectReason, report: bool) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.finished {
            return false;
        }
        inner.finished = true;

        let transition = transition_for(inner.fsm.state(), reason);
        self.apply(&mut inner, transition);
        if inner.fsm.state() == ConnectionState::Failed {
            self.apply(&mut inner, LinkTransition::Reset);
        }

        if report {
            self.listener.on_event(LinkEvent::NotConnected(reason));
        } else {
            debug!("[WORKER {}] Not reporting termination: {}", self.id, reason);
        }
        true
    }

    fn apply(&self, inner: &mut GateState, transition: LinkTransition) {
        match inner.fsm.process_event(transition) {
            TransitionResult::Success(state) => {
                self.state_tx.send_replace(state);
            }
            TransitionResult::Invalid { from, event } => {
                warn!("[WORKER {}] Ignoring {:?} in state {:?}", self.id, event, from);
            }
        }
    }
}

fn transition_for(state: ConnectionState, reason: DisconnectReason) -> LinkTransition {
    match reason {
        DisconnectReason::Closed
        | DisconnectReason::Superseded
        | DisconnectReason::ControllerStopped => LinkTransition::Closed,
        DisconnectReason::PeerClosed if state == ConnectionState::Connected => {
            LinkTransition::PeerClosed
        }
        DisconnectReason::ReadFailed | DisconnectReason::WriteFailed
            if state == ConnectionState::Connected =>
        {
            LinkTransition::IoFailed
        }
        _ => LinkTransition::HandshakeFailed,
    }
}

/// Worker body: handshake, then the receive loop until the session ends.
///
/// Owns the stream for its whole life and releases it exactly once on exit.
/// Writes run on a separate writer task so reading never waits for a slow
/// write. A close or supersede finishes the gate before firing `cancel`, so
/// the cancelled paths below emit nothing themselves.
pub(crate) async fn run<C: TransportConnector>(
    connector: C,
    gate: Arc<EventGate>,
    cancel: CancellationToken,
    outbound_rx: mpsc::Receiver<Outbound>,
    config: LinkConfig,
) {
    let id = gate.id();
    debug!("[WORKER {}] Handshake via {}", id, connector.name());

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("[WORKER {}] Cancelled during handshake", id);
            return;
        }
        result = handshake(&connector, config.connect_timeout) => result,
    };

    let stream = match result {
        Ok(stream) => stream,
        Err((reason, err)) => {
            warn!("[WORKER {}] Handshake failed: {}", id, err);
            let report = !(err.is_authorization() && config.failure_policy == FailurePolicy::Silent);
            gate.finish(reason, report).await;
            return;
        }
    };

    if !gate.connected().await {
        debug!("[WORKER {}] Attempt ended during handshake, dropping stream", id);
        release(id, stream).await;
        return;
    }
    info!("[WORKER {}] Connected via {}", id, connector.name());

    let (mut reader, writer) = tokio::io::split(stream);
    let writer_cancel = cancel.child_token();
    let mut writer_task: WriterTask<C::Stream> = tokio::spawn(write_loop(
        id,
        writer,
        outbound_rx,
        writer_cancel.clone(),
        config.write_timeout,
    ));
    let mut writer_result = None;
    let mut read_buf = vec![0u8; config.read_buffer_size.max(1)];

    let outcome = loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break None,

            result = &mut writer_task => {
                let outcome = match &result {
                    Ok((_, outcome)) => *outcome,
                    Err(_) => Some(DisconnectReason::WriteFailed),
                };
                writer_result = Some(result);
                break outcome;
            }

            result = reader.read(&mut read_buf) => {
                match result {
                    Ok(0) => {
                        info!("[WORKER {}] Peer closed the connection", id);
                        break Some(DisconnectReason::PeerClosed);
                    }
                    Ok(n) => {
                        if !gate.message(Bytes::copy_from_slice(&read_buf[..n])).await {
                            break None;
                        }
                    }
                    Err(e) => {
                        warn!("[WORKER {}] Read failed: {}", id, e);
                        break Some(DisconnectReason::ReadFailed);
                    }
                }
            }
        }
    };

    if let Some(reason) = outcome {
        gate.finish(reason, true).await;
    }

    writer_cancel.cancel();
    let writer_result = match writer_result {
        Some(result) => result,
        None => writer_task.await,
    };
    match writer_result {
        Ok((writer, _)) => release(id, reader.unsplit(writer)).await,
        // Dropping the read half closes the socket
        Err(e) => warn!("[WORKER {}] Writer task ended abnormally: {}", id, e),
    }
}

type WriterTask<S> = JoinHandle<(WriteHalf<S>, Option<DisconnectReason>)>;

/// Drain `outbound_rx` onto the write half until cancelled or a write fails.
///
/// Hands the write half back so the caller can release the whole stream.
async fn write_loop<W: AsyncWrite + Unpin>(
    id: u64,
    mut writer: W,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    cancel: CancellationToken,
    write_timeout: Duration,
) -> (W, Option<DisconnectReason>) {
    loop {
        let outbound = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            outbound = outbound_rx.recv() => match outbound {
                Some(outbound) => outbound,
                None => {
                    cancel.cancelled().await;
                    break;
                }
            },
        };

        if outbound.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            outbound.fail(LinkError::TransportFailure("write slot not reached in time".into()));
            continue;
        }

        // An interrupted write drops its ack, which the caller sees as a released socket
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = write_bounded(&mut writer, &outbound.payload, write_timeout) => result,
        };

        match result {
            Ok(()) => {
                if let Some(ack) = outbound.ack {
                    let _ = ack.send(Ok(()));
                }
            }
            Err(e) => {
                warn!("[WORKER {}] Write failed: {}", id, e);
                if let Some(ack) = outbound.ack {
                    let _ = ack.send(Err(e));
                }
                return (writer, Some(DisconnectReason::WriteFailed));
            }
        }
    }

    // Queued sends were never written; dropping their acks fails the callers
    drop(outbound_rx);
    (writer, None)
}

async fn handshake<C: TransportConnector>(
    connector: &C,
    limit: Option<Duration>,
) -> Result<C::Stream, (DisconnectReason, LinkError)> {
    let result = match limit {
        Some(limit) => match timeout(limit, connector.connect()).await {
            Ok(result) => result,
            Err(_) => {
                return Err((
                    DisconnectReason::HandshakeTimedOut,
                    LinkError::TransportFailure(format!("no answer within {:?}", limit)),
                ))
            }
        },
        None => connector.connect().await,
    };
    result.map_err(|e| (DisconnectReason::from_error(&e), e))
}

async fn write_bounded<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
    limit: Duration,
) -> Result<(), LinkError> {
    let write = async {
        writer.write_all(payload).await?;
        writer.flush().await
    };
    match timeout(limit, write).await {
        Ok(result) => result.map_err(LinkError::from),
        Err(_) => Err(LinkError::TransportFailure(format!(
            "write not completed within {:?}",
            limit
        ))),
    }
}

async fn release<S: TransportStream>(id: u64, mut stream: S) {
    if let Err(e) = TransportStream::shutdown(&mut stream).await {
        debug!("[WORKER {}] Shutdown error: {}", id, e);
    }
    debug!("[WORKER {}] Socket released", id);
}
