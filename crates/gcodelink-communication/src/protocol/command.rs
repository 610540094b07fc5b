//! Command submission types.

use gcodelink_core::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::grbl::FirmwareError;

/// Per-command options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOptions {
    /// Wait for `ok`/`error:` before resolving
    ///
    /// When false the call resolves once the line is written. The line still
    /// holds its bytes in the flow-control window until acknowledged.
    pub expect_response: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            expect_response: true,
        }
    }
}

impl SendOptions {
    /// Resolve on write instead of on acknowledgement
    pub fn fire_and_forget() -> Self {
        Self {
            expect_response: false,
        }
    }
}

/// How the controller answered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyOutcome {
    /// `ok`, or written without waiting
    Acknowledged,
    /// `error:<payload>`
    Rejected(FirmwareError),
}

/// Result of a submitted command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReply {
    /// The command as sent, without terminator
    pub command: String,
    /// Informational lines received while this command was oldest in flight
    pub lines: Vec<String>,
    /// Acknowledgement
    pub outcome: ReplyOutcome,
}

impl CommandReply {
    /// True when the controller answered `error:`
    pub fn is_rejected(&self) -> bool {
        matches!(self.outcome, ReplyOutcome::Rejected(_))
    }

    /// The firmware error, if rejected
    pub fn error(&self) -> Option<&FirmwareError> {
        match &self.outcome {
            ReplyOutcome::Rejected(err) => Some(err),
            ReplyOutcome::Acknowledged => None,
        }
    }

    /// Collected lines followed by the acknowledgement, one per line
    pub fn response_text(&self) -> String {
        let ack = match &self.outcome {
            ReplyOutcome::Acknowledged => "ok".to_string(),
            ReplyOutcome::Rejected(err) => format!("error:{}", err.text),
        };
        self.lines
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(ack.as_str()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A command between submission and resolution
#[derive(Debug)]
pub(crate) struct PendingCommand {
    pub id: u64,
    pub text: String,
    /// Text length plus the `\n` terminator
    pub byte_len: usize,
    pub expects_response: bool,
    pub submitted_at: Instant,
    pub lines: Vec<String>,
    /// Taken when the command resolves; `None` afterwards
    pub completion: Option<oneshot::Sender<Result<CommandReply>>>,
}

impl PendingCommand {
    pub fn new(
        id: u64,
        text: String,
        expects_response: bool,
        completion: oneshot::Sender<Result<CommandReply>>,
    ) -> Self {
        let byte_len = text.len() + 1;
        Self {
            id,
            text,
            byte_len,
            expects_response,
            submitted_at: Instant::now(),
            lines: Vec::new(),
            completion: Some(completion),
        }
    }

    /// Resolve the waiting caller, if any. Later calls do nothing
    pub fn resolve(&mut self, result: Result<CommandReply>) {
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(result);
        }
    }

    pub fn reply(&mut self, outcome: ReplyOutcome) -> CommandReply {
        CommandReply {
            command: self.text.clone(),
            lines: std::mem::take(&mut self.lines),
            outcome,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.completion.is_none()
    }

    /// The caller stopped waiting before the command resolved
    pub fn is_abandoned(&self) -> bool {
        self.completion.as_ref().is_some_and(|tx| tx.is_closed())
    }
}
