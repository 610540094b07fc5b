//! # gcodelink Communication
//!
//! Keeps a live link to a GRBL or FluidNC controller: byte transports
//! (serial, TCP, in-memory), GRBL line parsing, byte-budget flow control,
//! program streaming and connection supervision.
//!
//! [`ControllerLink`] ties the pieces together and is the usual entry point.

pub mod grbl;
pub mod link;
pub mod protocol;
pub mod streaming;
pub mod supervisor;
pub mod transport;

pub use grbl::{
    parse_line, AlarmReport, ControllerResponse, FirmwareError, LineAssembler, RealtimeCommand,
    StatusReport,
};
pub use link::{ControllerLink, LinkConfig};
pub use protocol::{
    CommandReply, Dialect, DialectMode, EngineConfig, EngineSnapshot, FlowControlWindow,
    ProtocolEngine, ReplyOutcome, SendOptions, DEFAULT_RX_BUFFER_SIZE,
};
pub use streaming::{ProgramStreamer, TransferSession, TransferSummary};
pub use supervisor::{ConnectionSupervisor, SupervisorConfig};
pub use transport::{
    list_ports, transport_for, LinkWriter, MemoryTransport, ReconnectPolicy, SerialConfig,
    SerialPortInfo, SocketConfig, Transport, TransportConfig, TransportEvent, TransportLink,
};
