//! `ControllerLink`: the one object UI code talks to.

use gcodelink_core::{
    ConnectionInfo, ConnectionState, EventBus, EventBusConfig, MachineStatus, Result,
    TransferProgress,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::grbl::RealtimeCommand;
use crate::protocol::{
    CommandReply, Dialect, EngineConfig, EngineSnapshot, ProtocolEngine, SendOptions,
};
use crate::streaming::{ProgramStreamer, TransferSummary};
use crate::supervisor::{ConnectionSupervisor, SupervisorConfig};
use crate::transport::{Transport, TransportConfig};

/// Settings for every component of a link
#[derive(Debug, Clone, Default)]
pub struct LinkConfig {
    /// Protocol engine
    pub engine: EngineConfig,
    /// Connection supervisor
    pub supervisor: SupervisorConfig,
    /// Notification bus
    pub bus: EventBusConfig,
}

/// Command API and notification stream for one controller
///
/// ```rust,ignore
/// let link = ControllerLink::new(LinkConfig::default());
/// link.connect(&TransportConfig::serial("/dev/ttyUSB0")).await?;
/// let reply = link.send_command("$I", SendOptions::default()).await?;
/// link.send_program(&program, |p| println!("{}/{}", p.current_line, p.total_lines)).await?;
/// link.disconnect().await?;
/// ```
pub struct ControllerLink {
    bus: Arc<EventBus>,
    engine: Arc<ProtocolEngine>,
    streamer: ProgramStreamer,
    supervisor: ConnectionSupervisor,
}

impl ControllerLink {
    /// Build a disconnected link
    pub fn new(config: LinkConfig) -> Self {
        let bus = Arc::new(EventBus::with_config(config.bus));
        let engine = Arc::new(ProtocolEngine::new(config.engine, bus.clone()));
        let streamer = ProgramStreamer::new(engine.clone(), bus.clone());
        let supervisor = ConnectionSupervisor::new(engine.clone(), bus.clone(), config.supervisor);
        Self {
            bus,
            engine,
            streamer,
            supervisor,
        }
    }

    /// Open the transport described by `config`
    pub async fn connect(&self, config: &TransportConfig) -> Result<()> {
        self.supervisor.connect(config).await
    }

    /// Open a link through a caller-built transport
    pub async fn connect_with_transport(
        &self,
        transport: Box<dyn Transport>,
        config: &TransportConfig,
    ) -> Result<()> {
        self.supervisor.connect_with(transport, config).await
    }

    /// Close the link; pending commands fail with `ConnectionClosed`
    pub async fn disconnect(&self) -> Result<()> {
        self.streamer.cancel();
        self.supervisor.disconnect().await
    }

    /// Close the link and enter the Error state
    pub async fn disconnect_with_error(&self, reason: impl Into<String>) -> Result<()> {
        self.streamer.cancel();
        self.supervisor.disconnect_with_error(reason).await
    }

    /// Send one line and wait for its acknowledgement
    pub async fn send_command(&self, text: &str, options: SendOptions) -> Result<CommandReply> {
        self.engine.submit(text, options).await
    }

    /// Stream a whole program, stopping at the first rejected line
    pub async fn send_program<F>(&self, program: &str, on_progress: F) -> Result<TransferSummary>
    where
        F: FnMut(&TransferProgress) + Send,
    {
        self.streamer.stream(program, on_progress, None).await
    }

    /// Stream a program that `cancel` can stop
    pub async fn send_program_with_cancel<F>(
        &self,
        program: &str,
        on_progress: F,
        cancel: CancellationToken,
    ) -> Result<TransferSummary>
    where
        F: FnMut(&TransferProgress) + Send,
    {
        self.streamer.stream(program, on_progress, Some(cancel)).await
    }

    /// Stop the running program before its next line
    pub fn cancel_program(&self) -> bool {
        self.streamer.cancel()
    }

    /// A program is streaming
    pub fn is_streaming(&self) -> bool {
        self.streamer.is_active()
    }

    /// Send a realtime byte, bypassing the queue
    ///
    /// `?` sent this way does not wait; the report still lands in
    /// [`machine_status`](Self::machine_status). Use
    /// [`request_status`](Self::request_status) to wait for it.
    pub fn send_control_byte(&self, command: RealtimeCommand) -> Result<()> {
        self.engine.send_realtime(command)
    }

    /// Request a status report; `None` if none arrives in time
    pub async fn request_status(&self) -> Result<Option<MachineStatus>> {
        self.engine.request_status().await
    }

    /// Connection state
    pub fn state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    /// State, transport kind and endpoint
    pub fn connection_info(&self) -> ConnectionInfo {
        self.supervisor.connection_info()
    }

    /// Latest merged status
    pub fn machine_status(&self) -> MachineStatus {
        self.engine.machine_status()
    }

    /// Engine counters
    pub fn engine_snapshot(&self) -> EngineSnapshot {
        self.engine.snapshot()
    }

    /// Force a dialect for the current connection
    pub fn set_dialect(&self, dialect: Dialect) {
        self.engine.set_dialect(dialect);
    }

    /// Notification bus
    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    /// Shared handle to the notification bus
    pub fn event_bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }
}

impl std::fmt::Debug for ControllerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerLink")
            .field("supervisor", &self.supervisor)
            .field("engine", &self.engine)
            .field("streamer", &self.streamer)
            .finish()
    }
}
