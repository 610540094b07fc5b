//! Line protocol: flow control, command matching and timeouts.

pub mod command;
pub mod engine;
pub mod flow_control;

pub use command::{CommandReply, ReplyOutcome, SendOptions};
pub use engine::{
    EngineConfig, EngineSnapshot, ProtocolEngine, DEFAULT_COMMAND_TIMEOUT,
    DEFAULT_QUEUE_CAPACITY, DEFAULT_STATUS_TIMEOUT,
};
pub use flow_control::{Dialect, DialectMode, FlowControlWindow, DEFAULT_RX_BUFFER_SIZE};
