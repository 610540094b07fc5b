//! Transfer bookkeeping for one program upload.

use gcodelink_core::{TransferPhase, TransferProgress};

/// One source line handed out by [`TransferSession::next_line`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    /// 1-based line number in the program
    pub number: usize,
    /// Trimmed text to send; `None` for blank and `;` comment lines
    pub text: Option<String>,
}

/// Cursor over a program's lines plus counters
#[derive(Debug, Clone)]
pub struct TransferSession {
    lines: Vec<String>,
    cursor: usize,
    sent_lines: usize,
    skipped_lines: usize,
    last_error: Option<String>,
}

impl TransferSession {
    /// Split a program into lines, accepting `\n`, `\r\n` and bare `\r`
    pub fn from_program(program: &str) -> Self {
        let normalized = program.replace("\r\n", "\n").replace('\r', "\n");
        Self {
            lines: normalized.lines().map(str::to_string).collect(),
            cursor: 0,
            sent_lines: 0,
            skipped_lines: 0,
            last_error: None,
        }
    }

    /// Advance to the next line, counting it as skipped when it carries
    /// nothing to send
    pub fn next_line(&mut self) -> Option<SourceLine> {
        let raw = self.lines.get(self.cursor)?;
        self.cursor += 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with(';') {
            self.skipped_lines += 1;
            return Some(SourceLine {
                number: self.cursor,
                text: None,
            });
        }
        Some(SourceLine {
            number: self.cursor,
            text: Some(trimmed.to_string()),
        })
    }

    /// Count the current line as sent and acknowledged
    pub fn mark_sent(&mut self) {
        self.sent_lines += 1;
    }

    /// Record why the transfer stopped
    pub fn fail(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    /// All source lines, blank and comment lines included
    pub fn total_lines(&self) -> usize {
        self.lines.len()
    }

    /// Lines sent and acknowledged
    pub fn sent_lines(&self) -> usize {
        self.sent_lines
    }

    /// Lines passed over
    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines
    }

    /// Progress payload for `phase` at `current_line`
    pub fn progress(&self, phase: TransferPhase, current_line: usize) -> TransferProgress {
        TransferProgress {
            phase,
            current_line,
            total_lines: self.lines.len(),
            sent_lines: self.sent_lines,
            skipped_lines: self.skipped_lines,
            error: self.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_endings_and_skips() {
        let mut session = TransferSession::from_program("G21\r\n; setup\r\rG0 X1  \nM2\n");
        assert_eq!(session.total_lines(), 5);

        let numbered: Vec<(usize, Option<String>)> = std::iter::from_fn(|| session.next_line())
            .map(|l| (l.number, l.text))
            .collect();
        assert_eq!(
            numbered,
            vec![
                (1, Some("G21".to_string())),
                (2, None),
                (3, None),
                (4, Some("G0 X1".to_string())),
                (5, Some("M2".to_string())),
            ]
        );
        assert_eq!(session.skipped_lines(), 2);
    }

    #[test]
    fn test_progress_payload() {
        let mut session = TransferSession::from_program("G0\nG1\n");
        session.next_line();
        session.mark_sent();
        session.fail("error:20");
        let progress = session.progress(TransferPhase::Failed, 2);
        assert_eq!(progress.sent_lines, 1);
        assert_eq!(progress.total_lines, 2);
        assert_eq!(progress.error.as_deref(), Some("error:20"));
    }

    #[test]
    fn test_empty_program() {
        let mut session = TransferSession::from_program("");
        assert_eq!(session.total_lines(), 0);
        assert!(session.next_line().is_none());
    }
}
