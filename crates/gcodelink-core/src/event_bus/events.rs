//! Event type definitions for the event bus.
//!
//! Events are cloneable and serializable so a consumer can log or replay them.

use serde::{Deserialize, Serialize};

use crate::data::{ConnectionState, MachineStatus, TransferProgress};

/// Root event enum for all link notifications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AppEvent {
    /// Connection lifecycle
    Connection(ConnectionEvent),
    /// Raw lines received from the controller
    Response(ResponseEvent),
    /// Parsed telemetry
    Telemetry(TelemetryEvent),
    /// Program transfer progress
    Transfer(TransferEvent),
    /// Transport and protocol errors
    Error(ErrorEvent),
}

impl AppEvent {
    /// Get the category of this event
    pub fn category(&self) -> EventCategory {
        match self {
            AppEvent::Connection(_) => EventCategory::Connection,
            AppEvent::Response(_) => EventCategory::Response,
            AppEvent::Telemetry(_) => EventCategory::Telemetry,
            AppEvent::Transfer(_) => EventCategory::Transfer,
            AppEvent::Error(_) => EventCategory::Error,
        }
    }

    /// Get a short description of this event for logging
    pub fn description(&self) -> String {
        match self {
            AppEvent::Connection(e) => e.description(),
            AppEvent::Response(e) => e.description(),
            AppEvent::Telemetry(e) => e.description(),
            AppEvent::Transfer(e) => e.description(),
            AppEvent::Error(e) => e.description(),
        }
    }
}

/// Event category for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    /// Connection lifecycle events.
    Connection,
    /// Raw response line events.
    Response,
    /// Parsed telemetry events.
    Telemetry,
    /// Transfer progress events.
    Transfer,
    /// Error events.
    Error,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventCategory::Connection => write!(f, "Connection"),
            EventCategory::Response => write!(f, "Response"),
            EventCategory::Telemetry => write!(f, "Telemetry"),
            EventCategory::Transfer => write!(f, "Transfer"),
            EventCategory::Error => write!(f, "Error"),
        }
    }
}

/// Connection-related events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConnectionEvent {
    /// Connection state changed.
    StateChanged {
        /// State before the change.
        previous: ConnectionState,
        /// State after the change.
        current: ConnectionState,
    },
    /// A socket link is being re-dialed.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,
        /// Delay before this attempt, in milliseconds.
        delay_ms: u64,
    },
}

impl ConnectionEvent {
    fn description(&self) -> String {
        match self {
            ConnectionEvent::StateChanged { previous, current } => {
                format!("Connection state: {} -> {}", previous, current)
            }
            ConnectionEvent::Reconnecting { attempt, delay_ms } => {
                format!("Reconnect attempt {} in {}ms", attempt, delay_ms)
            }
        }
    }
}

/// Raw controller output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponseEvent {
    /// One complete line, terminator stripped.
    Line {
        /// The line exactly as received.
        line: String,
    },
}

impl ResponseEvent {
    fn description(&self) -> String {
        match self {
            ResponseEvent::Line { line } => format!("<< {}", line),
        }
    }
}

/// Parsed telemetry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TelemetryEvent {
    /// A status report was merged into the machine status.
    Status(MachineStatus),
    /// The controller raised an alarm.
    Alarm {
        /// Alarm code, when numeric.
        code: Option<u8>,
        /// Alarm payload text.
        text: String,
        /// Decoded description, when the code is known.
        description: Option<String>,
    },
    /// A `[MSG:...]` line.
    Message {
        /// Message text.
        text: String,
    },
}

impl TelemetryEvent {
    /// Short description for logs
    pub fn description(&self) -> String {
        match self {
            TelemetryEvent::Status(status) => {
                format!("Status {} at {}", status.state, status.machine_position)
            }
            TelemetryEvent::Alarm {
                text, description, ..
            } => match description {
                Some(desc) => format!("Alarm {}: {}", text, desc),
                None => format!("Alarm {}", text),
            },
            TelemetryEvent::Message { text } => format!("Message: {}", text),
        }
    }
}

/// Program transfer events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TransferEvent {
    /// Progress update.
    Progress(TransferProgress),
}

impl TransferEvent {
    fn description(&self) -> String {
        match self {
            TransferEvent::Progress(p) => format!(
                "Transfer {:?}: line {}/{} ({} sent, {} skipped)",
                p.phase, p.current_line, p.total_lines, p.sent_lines, p.skipped_lines
            ),
        }
    }
}

/// Error and diagnostic events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ErrorEvent {
    /// Transport open/read/write failure or link loss.
    Transport {
        /// Error message.
        message: String,
    },
    /// Protocol-level failure (timeout, stray acknowledgement).
    Protocol {
        /// Error message.
        message: String,
    },
}

impl ErrorEvent {
    fn description(&self) -> String {
        match self {
            ErrorEvent::Transport { message } => format!("Transport error: {}", message),
            ErrorEvent::Protocol { message } => format!("Protocol error: {}", message),
        }
    }
}
