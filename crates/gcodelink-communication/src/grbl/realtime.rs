//! Single-byte realtime commands
//!
//! The controller acts on these as soon as they arrive, outside its line
//! buffer, so they never take part in flow control.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Realtime command byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RealtimeCommand {
    /// `?` status report request
    StatusRequest,
    /// `!` feed hold
    FeedHold,
    /// `~` cycle start / resume
    CycleResume,
    /// `0x18` (Ctrl-X) soft reset
    SoftReset,
}

impl RealtimeCommand {
    /// The byte put on the wire
    pub fn byte(self) -> u8 {
        match self {
            Self::StatusRequest => b'?',
            Self::FeedHold => b'!',
            Self::CycleResume => b'~',
            Self::SoftReset => 0x18,
        }
    }

    /// Map a raw byte back to a command
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'?' => Some(Self::StatusRequest),
            b'!' => Some(Self::FeedHold),
            b'~' => Some(Self::CycleResume),
            0x18 => Some(Self::SoftReset),
            _ => None,
        }
    }
}

impl fmt::Display for RealtimeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StatusRequest => write!(f, "status request (?)"),
            Self::FeedHold => write!(f, "feed hold (!)"),
            Self::CycleResume => write!(f, "cycle resume (~)"),
            Self::SoftReset => write!(f, "soft reset (0x18)"),
        }
    }
}
