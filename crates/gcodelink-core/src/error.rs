//! Error handling for gcodelink
//!
//! Errors are grouped by the layer that raises them:
//! - Connection errors (transport open/write/read failures, lifecycle misuse)
//! - Protocol errors (timeouts, queue limits, rejected submissions)
//! - Transfer errors (program streaming outcomes)
//!
//! Firmware `error:` replies are deliberately absent here. They are a
//! successful protocol exchange that carries a rejection payload, and the
//! caller decides how severe they are.

use thiserror::Error;

/// Connection error type
///
/// Raised by the transport adapters and the connection supervisor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// No link is open
    #[error("Controller not connected")]
    NotConnected,

    /// A link is already open or being opened
    #[error("Controller already connected")]
    AlreadyConnected,

    /// The transport could not be opened
    #[error("Failed to open {endpoint}: {reason}")]
    FailedToOpen {
        /// Port path or socket URL.
        endpoint: String,
        /// The reason the open failed.
        reason: String,
    },

    /// The link dropped unexpectedly
    #[error("Connection lost: {reason}")]
    ConnectionLost {
        /// The reason the link was lost.
        reason: String,
    },

    /// The link was closed on request while work was pending
    #[error("Connection closed")]
    ConnectionClosed,

    /// The transport configuration cannot be used
    #[error("Invalid connection parameters: {reason}")]
    InvalidParameters {
        /// Why the parameters are invalid.
        reason: String,
    },
}

/// Protocol error type
///
/// Raised by the line protocol engine for a single submission.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// No `ok` or `error:` arrived in time
    #[error("Command timed out after {timeout_ms}ms")]
    Timeout {
        /// The timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// The outbound queue is at capacity
    #[error("Command queue is full ({capacity} commands)")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// The line can never fit in the controller's receive buffer
    #[error("Line of {length} bytes exceeds the {capacity} byte controller buffer")]
    LineTooLong {
        /// Line length including the terminator.
        length: usize,
        /// Flow-control capacity.
        capacity: usize,
    },

    /// The command text cannot be sent as a single line
    #[error("Invalid command: {reason}")]
    InvalidCommand {
        /// Why the command was refused.
        reason: String,
    },

    /// The controller was soft-reset and discarded its buffer
    #[error("Controller was reset before the command completed")]
    Reset,
}

/// Program transfer error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// Another program is still streaming
    #[error("A program transfer is already in progress")]
    AlreadyActive,

    /// The controller rejected a program line
    #[error("Line {line_number} rejected by controller: {error}")]
    LineRejected {
        /// 1-based line number in the submitted program.
        line_number: usize,
        /// The controller's error text.
        error: String,
        /// Lines acknowledged before the failure.
        completed_lines: usize,
    },

    /// The transfer was cancelled
    #[error("Transfer aborted before line {line_number}")]
    Aborted {
        /// 1-based line number that would have been sent next.
        line_number: usize,
        /// Lines acknowledged before the abort.
        completed_lines: usize,
    },
}

/// Main error type for gcodelink
///
/// A unified error type used by every public API.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Protocol error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Transfer error
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Protocol(ProtocolError::Timeout { .. }))
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Check if this is a protocol error
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }

    /// Check if this is a transfer error
    pub fn is_transfer_error(&self) -> bool {
        matches!(self, Error::Transfer(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::from(ProtocolError::Timeout { timeout_ms: 10_000 });
        assert_eq!(err.to_string(), "Command timed out after 10000ms");
        assert!(err.is_timeout());

        let err = Error::from(TransferError::LineRejected {
            line_number: 4,
            error: "20".to_string(),
            completed_lines: 3,
        });
        assert_eq!(err.to_string(), "Line 4 rejected by controller: 20");
        assert!(err.is_transfer_error());
    }

    #[test]
    fn test_connection_error_classification() {
        let err: Error = ConnectionError::ConnectionLost {
            reason: "peer reset".to_string(),
        }
        .into();
        assert!(err.is_connection_error());
        assert!(!err.is_timeout());
        assert_eq!(err.to_string(), "Connection lost: peer reset");
    }
}
