//! Byte-budget flow control for the controller's receive buffer
//!
//! GRBL-style controllers have a small serial receive buffer (128 bytes on
//! an Uno). The sender tracks how many bytes it has written that the
//! controller has not yet acknowledged and never lets that exceed the
//! buffer size. Each `ok`/`error:` frees the bytes of the oldest line.
//!
//! Firmware that cannot be trusted with more than one line at a time is
//! handled by the same window: the capacity is pinned to the length of
//! whichever line is about to be sent, so only one line fits.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default GRBL receive buffer size in bytes
pub const DEFAULT_RX_BUFFER_SIZE: usize = 128;

/// Flow-control variant spoken by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Dialect {
    /// Stream lines while the un-acknowledged bytes fit in `capacity`
    ByteBudget {
        /// Receive buffer size in bytes
        capacity: usize,
    },
    /// Send a line only when nothing is awaiting acknowledgement
    SingleOutstanding,
}

impl Default for Dialect {
    fn default() -> Self {
        Dialect::ByteBudget {
            capacity: DEFAULT_RX_BUFFER_SIZE,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::ByteBudget { capacity } => write!(f, "byte-budget({})", capacity),
            Dialect::SingleOutstanding => write!(f, "single-outstanding"),
        }
    }
}

/// How the engine chooses its dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DialectMode {
    /// Start single-outstanding and settle on the first status report
    #[default]
    Auto,
    /// Use the given dialect for the whole connection
    Fixed(Dialect),
}

impl DialectMode {
    /// Dialect in force right after a (re)connect
    pub fn initial(&self) -> Dialect {
        match self {
            DialectMode::Auto => Dialect::SingleOutstanding,
            DialectMode::Fixed(dialect) => *dialect,
        }
    }
}

/// Outstanding-byte accounting
///
/// `sent_bytes` and `confirmed_bytes` only grow until `reset`; their
/// difference is the number of bytes the controller is holding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowControlWindow {
    sent_bytes: usize,
    confirmed_bytes: usize,
    capacity: usize,
    dialect: Dialect,
}

impl FlowControlWindow {
    /// Create an empty window for `dialect`
    pub fn new(dialect: Dialect) -> Self {
        let mut window = Self {
            sent_bytes: 0,
            confirmed_bytes: 0,
            capacity: 0,
            dialect,
        };
        window.apply_dialect_capacity();
        window
    }

    /// Bytes written but not yet acknowledged
    pub fn in_flight(&self) -> usize {
        self.sent_bytes - self.confirmed_bytes
    }

    /// Current capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total bytes reserved since the last reset
    pub fn sent_bytes(&self) -> usize {
        self.sent_bytes
    }

    /// Total bytes released since the last reset
    pub fn confirmed_bytes(&self) -> usize {
        self.confirmed_bytes
    }

    /// Active dialect
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Longest line (terminator included) that can ever be admitted
    ///
    /// `None` when any length fits, as in single-outstanding mode.
    pub fn max_line_len(&self) -> Option<usize> {
        match self.dialect {
            Dialect::ByteBudget { capacity } => Some(capacity),
            Dialect::SingleOutstanding => None,
        }
    }

    /// Would a line of `len` bytes be admitted now
    pub fn fits(&self, len: usize) -> bool {
        match self.dialect {
            Dialect::ByteBudget { .. } => self.in_flight() + len <= self.capacity,
            Dialect::SingleOutstanding => self.in_flight() == 0,
        }
    }

    /// Account for a line about to be written
    ///
    /// Returns false, leaving the window untouched, when the line does not fit.
    pub fn reserve(&mut self, len: usize) -> bool {
        if !self.fits(len) {
            return false;
        }
        if self.dialect == Dialect::SingleOutstanding {
            self.capacity = len;
        }
        self.sent_bytes += len;
        true
    }

    /// Release the bytes of an acknowledged line
    pub fn confirm(&mut self, len: usize) {
        let released = len.min(self.in_flight());
        if released < len {
            tracing::warn!(
                "Acknowledged {} bytes but only {} were in flight",
                len,
                released
            );
        }
        self.confirmed_bytes += released;
    }

    /// Release the bytes of a line that timed out without acknowledgement
    pub fn force_release(&mut self, len: usize) {
        let released = len.min(self.in_flight());
        self.confirmed_bytes += released;
    }

    /// Zero both counters; the dialect is kept
    pub fn reset(&mut self) {
        self.sent_bytes = 0;
        self.confirmed_bytes = 0;
        self.apply_dialect_capacity();
    }

    /// Switch dialect
    ///
    /// Bytes already in flight stay accounted for. A smaller byte budget
    /// admits nothing new until enough of them are acknowledged.
    pub fn set_dialect(&mut self, dialect: Dialect) {
        self.dialect = dialect;
        self.apply_dialect_capacity();
    }

    /// Window usage as a percentage of capacity
    pub fn usage_percent(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        (self.in_flight() as f64 / self.capacity as f64) * 100.0
    }

    fn apply_dialect_capacity(&mut self) {
        self.capacity = match self.dialect {
            Dialect::ByteBudget { capacity } => capacity,
            Dialect::SingleOutstanding => self.in_flight(),
        };
    }
}

impl Default for FlowControlWindow {
    fn default() -> Self {
        Self::new(Dialect::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_budget_admission() {
        let mut window = FlowControlWindow::default();
        assert_eq!(window.capacity(), 128);
        assert!(window.reserve(100));
        assert!(window.fits(28));
        assert!(!window.fits(29));
        assert!(!window.reserve(29));
        assert_eq!(window.in_flight(), 100);

        window.confirm(100);
        assert_eq!(window.in_flight(), 0);
        assert!(window.fits(128));
    }

    #[test]
    fn test_single_outstanding() {
        let mut window = FlowControlWindow::new(Dialect::SingleOutstanding);
        assert!(window.reserve(300));
        assert_eq!(window.capacity(), 300);
        assert!(!window.fits(1));
        window.confirm(300);
        assert!(window.reserve(5));
        assert_eq!(window.capacity(), 5);
    }

    #[test]
    fn test_confirm_saturates() {
        let mut window = FlowControlWindow::default();
        window.reserve(10);
        window.confirm(50);
        assert_eq!(window.in_flight(), 0);
        assert_eq!(window.confirmed_bytes(), 10);
    }

    #[test]
    fn test_reset_and_dialect_switch() {
        let mut window = FlowControlWindow::new(DialectMode::Auto.initial());
        window.reserve(20);
        window.set_dialect(Dialect::ByteBudget { capacity: 64 });
        assert_eq!(window.in_flight(), 20);
        assert!(window.fits(44));
        window.reset();
        assert_eq!(window.in_flight(), 0);
        assert_eq!(window.dialect(), Dialect::ByteBudget { capacity: 64 });
        assert_eq!(window.max_line_len(), Some(64));
    }

    #[test]
    fn test_usage_percent() {
        let mut window = FlowControlWindow::default();
        window.reserve(64);
        assert!((window.usage_percent() - 50.0).abs() < f64::EPSILON);
    }
}
