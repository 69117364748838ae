//! Connection controller: single entry point for the link lifecycle

use super::listener::Listener;
use super::worker::{self, EventGate, Outbound, Phase};
use crate::transport::{RadioAdapter, RfcommConfig};
use bytes::Bytes;
use rfcomm_link_shared::{
    limits, ConnectionState, DeviceAddress, DisconnectReason, LinkError, LinkEvent, Precondition,
    ServiceIdentifier,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What to do with failures that happen before a worker is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Report them to the listener as `NotConnected` with a reason
    #[default]
    Report,
    /// Swallow precondition, Init and authorization failures
    Silent,
}

/// Configuration for connection controller
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// BlueZ adapter settings
    pub bluetooth: RfcommConfig,
    /// Largest chunk delivered per `Message` event
    pub read_buffer_size: usize,
    /// Outbound messages buffered per connection
    pub outbound_queue: usize,
    /// Handshake timeout; `None` leaves it to the platform
    pub connect_timeout: Option<Duration>,
    /// Upper bound for one write
    pub write_timeout: Duration,
    /// Handling of silent failure paths
    pub failure_policy: FailurePolicy,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            bluetooth: RfcommConfig::default(),
            read_buffer_size: limits::READ_BUFFER_SIZE,
            outbound_queue: limits::OUTBOUND_QUEUE,
            connect_timeout: None,
            write_timeout: Duration::from_millis(limits::WRITE_TIMEOUT_MS),
            failure_policy: FailurePolicy::Report,
        }
    }
}

enum Command {
    Connect {
        address: DeviceAddress,
        listener: Arc<dyn Listener>,
    },
    Send(Outbound),
    Close,
    Shutdown,
}

/// Manages at most one outbound connection at a time.
///
/// All calls are non-blocking; they are queued to a controller task which
/// owns the current worker, so commands take effect in call order.
pub struct ConnectionController {
    command_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    write_timeout: Duration,
    task: JoinHandle<()>,
}

impl ConnectionController {
    /// Create a controller and start its task. Must be called inside a Tokio runtime.
    pub fn new<A: RadioAdapter>(adapter: A, config: LinkConfig) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let write_timeout = config.write_timeout;

        let controller_task = ControllerTask {
            adapter,
            config,
            state_tx: Arc::new(state_tx),
            current: None,
            next_id: 0,
        };
        let task = tokio::spawn(controller_task.run(command_rx));

        Self {
            command_tx,
            state_rx,
            write_timeout,
            task,
        }
    }

    /// Start a connection attempt to `address`, replacing any current one.
    ///
    /// The outcome arrives at `listener`: `Connected` or `NotConnected`.
    pub fn connect(&self, address: impl Into<DeviceAddress>, listener: impl Listener) {
        self.command(Command::Connect {
            address: address.into(),
            listener: Arc::new(listener),
        });
    }

    /// Queue `message` for the live connection. Failures are only logged.
    pub fn send(&self, message: impl Into<Bytes>) {
        self.command(Command::Send(Outbound {
            payload: message.into(),
            ack: None,
            deadline: None,
        }));
    }

    /// Like `send`, but waits for the write attempt and returns its result.
    ///
    /// The write must start within `write_timeout` of this call, behind any
    /// messages already queued, and is itself bounded by `write_timeout`. A
    /// message that misses its start is dropped unwritten, so the result is
    /// known after at most twice `write_timeout`.
    pub async fn try_send(&self, message: impl Into<Bytes>) -> Result<(), LinkError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let deadline = Instant::now() + self.write_timeout;
        let outbound = Outbound {
            payload: message.into(),
            ack: Some(ack_tx),
            deadline: Some(deadline),
        };
        self.command_tx
            .send(Command::Send(outbound))
            .map_err(|_| LinkError::NotConnected)?;

        match timeout_at(deadline + self.write_timeout, ack_rx).await {
            Ok(reply) => {
                // Ack dropped unanswered: the worker released the socket first
                reply.unwrap_or(Err(LinkError::AlreadyReleased))
            }
            Err(_) => Err(LinkError::TransportFailure(format!(
                "write not started within {:?}",
                self.write_timeout
            ))),
        }
    }

    /// Close the current connection, if any. Idempotent.
    pub fn close(&self) {
        self.command(Command::Close);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Close the current connection and wait until its socket is released
    pub async fn shutdown(self) {
        self.command(Command::Shutdown);
        if let Err(e) = self.task.await {
            warn!("[LINK] Controller task ended abnormally: {}", e);
        }
    }

    fn command(&self, command: Command) {
        if self.command_tx.send(command).is_err() {
            debug!("[LINK] Controller task is gone, command dropped");
        }
    }
}

struct WorkerHandle {
    gate: Arc<EventGate>,
    cancel: CancellationToken,
    outbound_tx: mpsc::Sender<Outbound>,
    task: JoinHandle<()>,
}

struct ControllerTask<A: RadioAdapter> {
    adapter: A,
    config: LinkConfig,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    current: Option<WorkerHandle>,
    next_id: u64,
}

impl<A: RadioAdapter> ControllerTask<A> {
    async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = command_rx.recv().await {
            match command {
                Command::Connect { address, listener } => self.connect(address, listener).await,
                Command::Send(outbound) => self.send(outbound).await,
                Command::Close => self.close().await,
                Command::Shutdown => break,
            }
        }

        // Shutdown or controller dropped
        if let Some(worker) = self.current.take() {
            teardown(&worker, DisconnectReason::ControllerStopped).await;
            if let Err(e) = worker.task.await {
                warn!("[LINK] Worker {} ended abnormally: {}", worker.gate.id(), e);
            }
        }
        debug!("[LINK] Controller stopped");
    }

    async fn connect(&mut self, address: DeviceAddress, listener: Arc<dyn Listener>) {
        if let Err(precondition) = self.check_preconditions(&address).await {
            self.reject(&listener, LinkError::PreconditionNotMet(precondition));
            return;
        }

        // The previous attempt is over before anything of the new one is visible
        if let Some(previous) = self.current.take() {
            teardown(&previous, DisconnectReason::Superseded).await;
        }

        let connector = match self.adapter.connector(&address, ServiceIdentifier::SERIAL_PORT) {
            Ok(connector) => connector,
            Err(e) => {
                self.reject(&listener, e);
                return;
            }
        };

        self.next_id += 1;
        let id = self.next_id;
        info!("[LINK] Connecting to {} (worker {})", address, id);

        let gate = Arc::new(EventGate::new(id, listener, self.state_tx.clone()));
        let cancel = CancellationToken::new();
        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.outbound_queue.max(1));

        let task = tokio::spawn(worker::run(
            connector,
            gate.clone(),
            cancel.clone(),
            outbound_rx,
            self.config.clone(),
        ));

        self.current = Some(WorkerHandle {
            gate,
            cancel,
            outbound_tx,
            task,
        });
    }

    async fn check_preconditions(&self, address: &DeviceAddress) -> Result<(), Precondition> {
        if !self.adapter.is_enabled().await {
            return Err(Precondition::AdapterDisabled);
        }
        if address.is_empty() {
            return Err(Precondition::EmptyAddress);
        }
        Ok(())
    }

    fn reject(&self, listener: &Arc<dyn Listener>, error: LinkError) {
        warn!("[LINK] Connect rejected: {}", error);
        match self.config.failure_policy {
            FailurePolicy::Report => {
                listener.on_event(LinkEvent::NotConnected(DisconnectReason::from_error(&error)))
            }
            FailurePolicy::Silent => {}
        }
    }

    async fn send(&mut self, outbound: Outbound) {
        let Some(worker) = &self.current else {
            return outbound.fail(LinkError::NotConnected);
        };

        match worker.gate.phase().await {
            Phase::Connecting => return outbound.fail(LinkError::NotConnected),
            Phase::Finished => return outbound.fail(LinkError::AlreadyReleased),
            Phase::Connected => {}
        }

        if let Err(e) = worker.outbound_tx.try_send(outbound) {
            match e {
                TrySendError::Full(outbound) => outbound.fail(LinkError::TransportFailure(
                    "outbound queue full".into(),
                )),
                TrySendError::Closed(outbound) => outbound.fail(LinkError::AlreadyReleased),
            }
        }
    }

    async fn close(&mut self) {
        // The handle stays so later sends see a released socket
        match &self.current {
            Some(worker) => teardown(worker, DisconnectReason::Closed).await,
            None => debug!("[LINK] Close without connection"),
        }
    }
}

/// End a worker: terminal event first, then unblock its task
async fn teardown(worker: &WorkerHandle, reason: DisconnectReason) {
    if worker.gate.finish(reason, true).await {
        info!("[LINK] Worker {} ended: {}", worker.gate.id(), reason);
    }
    worker.cancel.cancel();
}
