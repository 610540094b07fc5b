//! Data model shared between the communication engine and its consumers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of the link to the controller
///
/// One instance exists per `ControllerLink`. Every transition is published
/// as a connection event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No link open
    #[default]
    Disconnected,
    /// Opening the transport, or a socket link is being re-dialed
    Connecting,
    /// Link open and protocol state reset
    Connected,
    /// Open failed or the link was lost; needs an explicit connect
    Error,
}

impl ConnectionState {
    /// Check if a transition from this state to `target` is valid.
    ///
    /// - Disconnected → Connecting
    /// - Connecting → Connected, Error, Disconnected
    /// - Connected → Connecting (socket reconnect), Error, Disconnected
    /// - Error → Connecting, Disconnected
    pub fn can_transition_to(&self, target: ConnectionState) -> bool {
        use ConnectionState::*;
        if *self == target {
            return true;
        }
        matches!(
            (self, target),
            (Disconnected, Connecting)
                | (Connecting, Connected | Error | Disconnected)
                | (Connected, Connecting | Error | Disconnected)
                | (Error, Connecting | Disconnected)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// Transport variant of the active link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Point-to-point serial line (USB CDC, RS-232)
    Serial,
    /// TCP socket stream (FluidNC telnet, grblHAL network)
    Socket,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial => write!(f, "serial"),
            Self::Socket => write!(f, "socket"),
        }
    }
}

/// Snapshot returned by `connection_info()`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Current lifecycle state
    pub state: ConnectionState,
    /// Transport of the current or last link
    pub transport_kind: Option<TransportKind>,
    /// Port path or socket URL of the current or last link
    pub endpoint: Option<String>,
}

/// Four-axis coordinate as reported by the controller
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
    /// Z coordinate
    pub z: f64,
    /// A (rotary) coordinate, 0 when the controller reports three axes
    pub a: f64,
}

impl Position {
    /// Create a position from its four components
    pub fn new(x: f64, y: f64, z: f64, a: f64) -> Self {
        Self { x, y, z, a }
    }

    /// Component-wise difference
    pub fn minus(&self, other: &Position) -> Position {
        Position::new(
            self.x - other.x,
            self.y - other.y,
            self.z - other.z,
            self.a - other.a,
        )
    }

    /// Component-wise sum
    pub fn plus(&self, other: &Position) -> Position {
        Position::new(
            self.x + other.x,
            self.y + other.y,
            self.z + other.z,
            self.a + other.a,
        )
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "X{:.3} Y{:.3} Z{:.3} A{:.3}",
            self.x, self.y, self.z, self.a
        )
    }
}

/// Controller buffer availability (`Bf:` field)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferState {
    /// Free planner blocks
    pub planner_blocks: u16,
    /// Free bytes in the serial receive buffer
    pub rx_bytes: u16,
}

/// Override percentages (`Ov:` field)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideValues {
    /// Feed override percentage
    pub feed: u16,
    /// Rapid override percentage
    pub rapid: u16,
    /// Spindle override percentage
    pub spindle: u16,
}

/// Latest telemetry assembled from status reports
///
/// Reports are merged: a field missing from a report keeps the last value seen.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MachineStatus {
    /// State tag (Idle, Run, Hold, Jog, Alarm, Door, Check, Home, Sleep)
    pub state: String,
    /// Sub-state code, e.g. the `0` in `Hold:0`
    pub substate: Option<u8>,
    /// Machine coordinates
    pub machine_position: Position,
    /// Work coordinates
    pub work_position: Position,
    /// Last reported work coordinate offset
    pub work_offset: Option<Position>,
    /// Current feed rate
    pub feed_rate: f64,
    /// Current spindle speed
    pub spindle_speed: f64,
    /// Buffer availability, when the controller reports it
    pub buffer: Option<BufferState>,
    /// Override percentages, when the controller reports them
    pub overrides: Option<OverrideValues>,
}

impl MachineStatus {
    /// True once at least one status report has been applied
    pub fn is_known(&self) -> bool {
        !self.state.is_empty()
    }

    /// True while the controller is in an alarm state
    pub fn is_alarm(&self) -> bool {
        self.state == "Alarm"
    }
}

/// Phase of a program transfer carried by a progress notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferPhase {
    /// The session was created
    Started,
    /// One source line was handled (sent and acknowledged, or skipped)
    Line,
    /// Every line was handled
    Completed,
    /// A line was rejected or the link failed
    Failed,
    /// The caller cancelled the transfer
    Aborted,
}

/// Progress of a program transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferProgress {
    /// What happened
    pub phase: TransferPhase,
    /// 1-based line the notification refers to (0 before the first line)
    pub current_line: usize,
    /// Total source lines, including blank and comment lines
    pub total_lines: usize,
    /// Lines sent and acknowledged
    pub sent_lines: usize,
    /// Blank and comment lines passed over
    pub skipped_lines: usize,
    /// Controller or link error text for `Failed`
    pub error: Option<String>,
}

impl TransferProgress {
    /// Fraction of source lines handled, 0.0 to 1.0
    pub fn fraction(&self) -> f64 {
        if self.total_lines == 0 {
            return 1.0;
        }
        (self.sent_lines + self.skipped_lines) as f64 / self.total_lines as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_transitions() {
        use ConnectionState::*;
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(Connecting.can_transition_to(Error));
        assert!(Connected.can_transition_to(Connecting));
        assert!(Error.can_transition_to(Connecting));
        assert!(!Error.can_transition_to(Connected));
    }

    #[test]
    fn test_position_arithmetic() {
        let mpos = Position::new(10.0, 5.0, -2.0, 0.0);
        let wco = Position::new(1.0, 1.0, 1.0, 0.0);
        let wpos = mpos.minus(&wco);
        assert_eq!(wpos, Position::new(9.0, 4.0, -3.0, 0.0));
        assert_eq!(wpos.plus(&wco), mpos);
    }

    #[test]
    fn test_progress_fraction() {
        let progress = TransferProgress {
            phase: TransferPhase::Line,
            current_line: 5,
            total_lines: 10,
            sent_lines: 3,
            skipped_lines: 2,
            error: None,
        };
        assert!((progress.fraction() - 0.5).abs() < f64::EPSILON);
    }
}
