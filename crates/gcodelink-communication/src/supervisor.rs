//! Connection lifecycle
//!
//! The supervisor owns the transport and the connection state. It opens the
//! link, attaches the protocol engine to it, and runs a reader task that
//! assembles inbound bytes into lines and reacts to link changes:
//!
//! ```text
//! Disconnected --connect--> Connecting --open ok--> Connected
//!                               |                      |  socket drop
//!                               | open failed          v
//!                               +------> Error <-- Connecting (re-dial)
//! ```

use gcodelink_core::{
    AppEvent, ConnectionError, ConnectionEvent, ConnectionInfo, ConnectionState, ErrorEvent,
    EventBus, Result,
};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::grbl::LineAssembler;
use crate::protocol::ProtocolEngine;
use crate::transport::{
    transport_for, LinkWriter, Transport, TransportConfig, TransportEvent, TransportLink,
};

/// Wait between opening a link and the first status request
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(250);

/// Supervisor tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Delay before the first status request; GRBL prints its banner after a reset
    pub settle_delay: Duration,
    /// Send `?` after every (re)connect
    pub status_on_connect: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
            status_on_connect: true,
        }
    }
}

/// State shared with the reader task
#[derive(Debug)]
struct SharedState {
    info: RwLock<ConnectionInfo>,
    bus: Arc<EventBus>,
}

impl SharedState {
    fn state(&self) -> ConnectionState {
        self.info.read().state
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = {
            let mut info = self.info.write();
            let previous = info.state;
            if previous == next {
                return;
            }
            if !previous.can_transition_to(next) {
                tracing::warn!("Unexpected connection transition {} -> {}", previous, next);
            }
            info.state = next;
            previous
        };
        tracing::info!("Connection state: {} -> {}", previous, next);
        self.bus
            .emit(AppEvent::Connection(ConnectionEvent::StateChanged {
                previous,
                current: next,
            }));
    }

    fn report_error(&self, message: impl Into<String>) {
        self.bus.emit(AppEvent::Error(ErrorEvent::Transport {
            message: message.into(),
        }));
    }
}

struct ActiveConnection {
    transport: Box<dyn Transport>,
    reader: JoinHandle<()>,
    shutdown: CancellationToken,
}

/// Opens, watches and closes the controller link
pub struct ConnectionSupervisor {
    engine: Arc<ProtocolEngine>,
    shared: Arc<SharedState>,
    active: tokio::sync::Mutex<Option<ActiveConnection>>,
    config: SupervisorConfig,
}

impl ConnectionSupervisor {
    /// Create a disconnected supervisor
    pub fn new(engine: Arc<ProtocolEngine>, bus: Arc<EventBus>, config: SupervisorConfig) -> Self {
        Self {
            engine,
            shared: Arc::new(SharedState {
                info: RwLock::new(ConnectionInfo::default()),
                bus,
            }),
            active: tokio::sync::Mutex::new(None),
            config,
        }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// State, transport kind and endpoint
    pub fn connection_info(&self) -> ConnectionInfo {
        self.shared.info.read().clone()
    }

    /// Open the transport matching `config`
    pub async fn connect(&self, config: &TransportConfig) -> Result<()> {
        self.connect_with(transport_for(config), config).await
    }

    /// Open a link through a caller-supplied transport
    ///
    /// Allowed from Disconnected or Error. On failure the state is Error and
    /// the open error is returned.
    pub async fn connect_with(
        &self,
        mut transport: Box<dyn Transport>,
        config: &TransportConfig,
    ) -> Result<()> {
        let mut active = self.active.lock().await;
        if matches!(
            self.shared.state(),
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return Err(ConnectionError::AlreadyConnected.into());
        }
        if let Some(stale) = active.take() {
            stale.shutdown.cancel();
            let _ = stale.reader.await;
            let mut old = stale.transport;
            let _ = old.close().await;
        }

        {
            let mut info = self.shared.info.write();
            info.transport_kind = Some(config.kind());
            info.endpoint = Some(config.endpoint().to_string());
        }
        self.shared.set_state(ConnectionState::Connecting);

        let TransportLink { writer, events } = match transport.open(config).await {
            Ok(link) => link,
            Err(err) => {
                tracing::error!("Failed to connect to {}: {}", config.endpoint(), err);
                self.shared.report_error(err.to_string());
                self.shared.set_state(ConnectionState::Error);
                return Err(err);
            }
        };

        let generation = self.engine.attach(writer.clone());
        self.shared.set_state(ConnectionState::Connected);
        tracing::info!("Connected to {} ({})", config.endpoint(), config.kind());

        let shutdown = CancellationToken::new();
        let reader = LinkReader {
            engine: self.engine.clone(),
            shared: self.shared.clone(),
            writer,
            events,
            generation,
            assembler: LineAssembler::new(),
            config: self.config,
            shutdown: shutdown.clone(),
        };
        *active = Some(ActiveConnection {
            transport,
            reader: tokio::spawn(reader.run()),
            shutdown,
        });
        Ok(())
    }

    /// Close the link. Calling it while disconnected does nothing
    pub async fn disconnect(&self) -> Result<()> {
        self.shutdown(ConnectionState::Disconnected, ConnectionError::ConnectionClosed)
            .await
    }

    /// Close the link and land in the Error state
    pub async fn disconnect_with_error(&self, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        self.shared.report_error(reason.clone());
        self.shutdown(
            ConnectionState::Error,
            ConnectionError::ConnectionLost { reason },
        )
        .await
    }

    async fn shutdown(&self, target: ConnectionState, cause: ConnectionError) -> Result<()> {
        let mut active = self.active.lock().await;
        let Some(conn) = active.take() else {
            if self.shared.state() != ConnectionState::Disconnected {
                self.engine.detach(cause);
                self.shared.set_state(target);
            }
            return Ok(());
        };

        conn.shutdown.cancel();
        let _ = conn.reader.await;
        self.engine.detach(cause);

        let mut transport = conn.transport;
        if let Err(err) = transport.close().await {
            tracing::warn!("Error while closing transport: {}", err);
        }
        self.shared.set_state(target);
        Ok(())
    }
}

impl std::fmt::Debug for ConnectionSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSupervisor")
            .field("info", &self.connection_info())
            .field("config", &self.config)
            .finish()
    }
}

/// Reader task: bytes to lines, link changes to state changes
struct LinkReader {
    engine: Arc<ProtocolEngine>,
    shared: Arc<SharedState>,
    writer: LinkWriter,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    generation: u64,
    assembler: LineAssembler,
    config: SupervisorConfig,
    shutdown: CancellationToken,
}

impl LinkReader {
    async fn run(mut self) {
        self.request_initial_status();
        loop {
            let event = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                event = self.events.recv() => event,
            };

            match event {
                Some(TransportEvent::Data(bytes)) => {
                    for line in self.assembler.push(&bytes) {
                        self.engine.handle_line(self.generation, &line);
                    }
                }
                Some(TransportEvent::Disconnected {
                    reason,
                    reconnecting,
                }) => {
                    tracing::warn!("Link dropped: {}", reason);
                    self.engine
                        .detach(ConnectionError::ConnectionLost { reason: reason.clone() });
                    self.assembler.reset();
                    self.shared.report_error(reason.clone());
                    if reconnecting {
                        self.shared.set_state(ConnectionState::Connecting);
                    } else {
                        self.shared.set_state(ConnectionState::Error);
                        break;
                    }
                }
                Some(TransportEvent::Reconnecting { attempt, delay_ms }) => {
                    tracing::info!("Reconnect attempt {} in {}ms", attempt, delay_ms);
                    self.shared
                        .bus
                        .emit(AppEvent::Connection(ConnectionEvent::Reconnecting {
                            attempt,
                            delay_ms,
                        }));
                }
                Some(TransportEvent::Reconnected) => {
                    self.generation = self.engine.attach(self.writer.clone());
                    self.assembler.reset();
                    self.shared.set_state(ConnectionState::Connected);
                    self.request_initial_status();
                }
                Some(TransportEvent::Closed { reason: None }) => break,
                Some(TransportEvent::Closed {
                    reason: Some(reason),
                }) => {
                    self.lost(reason);
                    break;
                }
                None => {
                    self.lost("transport stopped without closing".to_string());
                    break;
                }
            }
        }
        tracing::debug!("Link reader stopped");
    }

    fn lost(&self, reason: String) {
        tracing::error!("Connection lost: {}", reason);
        self.engine
            .detach(ConnectionError::ConnectionLost { reason: reason.clone() });
        self.shared.report_error(reason);
        self.shared.set_state(ConnectionState::Error);
    }

    fn request_initial_status(&self) {
        if !self.config.status_on_connect {
            return;
        }
        let engine = self.engine.clone();
        let delay = self.config.settle_delay;
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            match engine.request_status().await {
                Ok(Some(status)) => tracing::info!("Controller is {}", status.state),
                Ok(None) => tracing::warn!("Controller did not answer the initial status request"),
                Err(err) => tracing::debug!("Initial status request skipped: {}", err),
            }
        });
    }
}
