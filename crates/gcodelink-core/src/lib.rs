//! # gcodelink Core
//!
//! Core types shared by every gcodelink crate: the error taxonomy, the
//! connection and machine data model, and the event bus that carries
//! notifications from the communication engine to its consumers.

pub mod data;
pub mod error;
pub mod event_bus;

pub use data::{
    BufferState, ConnectionInfo, ConnectionState, MachineStatus, OverrideValues, Position,
    TransferPhase, TransferProgress, TransportKind,
};

pub use error::{ConnectionError, Error, ProtocolError, Result, TransferError};

pub use event_bus::{
    AppEvent, ConnectionEvent, ErrorEvent, EventBus, EventBusConfig, EventBusError,
    EventCategory, EventFilter, ResponseEvent, SubscriptionId, TelemetryEvent, TransferEvent,
};
