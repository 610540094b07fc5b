//! Reassembles newline-terminated lines from arbitrary byte chunks.

/// Partial lines longer than this without a terminator are thrown away
pub const MAX_LINE_LENGTH: usize = 1024;

/// Buffers inbound bytes and yields complete lines
///
/// Lines are split on `\n`; a trailing `\r` is stripped. Bytes that are
/// not valid UTF-8 are replaced rather than rejected.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buffer: Vec<u8>,
    discarding: bool,
}

impl LineAssembler {
    /// Create an empty assembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and collect every line it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                if self.discarding {
                    self.discarding = false;
                } else {
                    lines.push(self.take_line());
                }
                self.buffer.clear();
                continue;
            }
            if self.discarding {
                continue;
            }
            self.buffer.push(byte);
            if self.buffer.len() > MAX_LINE_LENGTH {
                tracing::warn!(
                    "Discarding unterminated line longer than {} bytes",
                    MAX_LINE_LENGTH
                );
                self.buffer.clear();
                self.discarding = true;
            }
        }
        lines
    }

    /// Drop any partial line, e.g. after the link was re-established
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.discarding = false;
    }

    /// Bytes held for the current partial line
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn take_line(&mut self) -> String {
        if self.buffer.last() == Some(&b'\r') {
            self.buffer.pop();
        }
        String::from_utf8_lossy(&self.buffer).into_owned()
    }
}
