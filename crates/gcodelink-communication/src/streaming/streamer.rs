//! Sequential program feed on top of the protocol engine
//!
//! Each non-blank, non-comment line is submitted and awaited before the
//! next one, so the first `error:` stops the program at the line that
//! caused it. Only one transfer runs at a time.

use gcodelink_core::{
    AppEvent, EventBus, Result, TransferError, TransferEvent, TransferPhase, TransferProgress,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::session::TransferSession;
use crate::protocol::{ProtocolEngine, ReplyOutcome, SendOptions};

/// Outcome of a completed transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSummary {
    /// Source lines, blank and comment lines included
    pub total_lines: usize,
    /// Lines sent and acknowledged
    pub sent_lines: usize,
    /// Blank and comment lines skipped
    pub skipped_lines: usize,
    /// Wall time from start to the last acknowledgement
    pub elapsed: Duration,
}

/// Streams programs through a [`ProtocolEngine`]
pub struct ProgramStreamer {
    engine: Arc<ProtocolEngine>,
    bus: Arc<EventBus>,
    active: Mutex<Option<CancellationToken>>,
}

/// Clears the active slot when the transfer ends, however it ends
struct ActiveTransfer<'a> {
    slot: &'a Mutex<Option<CancellationToken>>,
}

impl Drop for ActiveTransfer<'_> {
    fn drop(&mut self) {
        *self.slot.lock() = None;
    }
}

impl ProgramStreamer {
    /// Create a streamer feeding `engine`
    pub fn new(engine: Arc<ProtocolEngine>, bus: Arc<EventBus>) -> Self {
        Self {
            engine,
            bus,
            active: Mutex::new(None),
        }
    }

    /// A transfer is running
    pub fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Ask the running transfer to stop before its next line
    ///
    /// Returns false when nothing is running.
    pub fn cancel(&self) -> bool {
        match self.active.lock().as_ref() {
            Some(token) => {
                tracing::info!("Program transfer cancel requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Stream `program`, reporting progress to `on_progress` and the bus
    ///
    /// `cancel` lets the caller stop the transfer; [`cancel`](Self::cancel)
    /// works either way.
    pub async fn stream<F>(
        &self,
        program: &str,
        mut on_progress: F,
        cancel: Option<CancellationToken>,
    ) -> Result<TransferSummary>
    where
        F: FnMut(&TransferProgress) + Send,
    {
        let token = cancel.unwrap_or_default();
        let _active = self.begin(token.clone())?;

        let mut session = TransferSession::from_program(program);
        let started = Instant::now();
        tracing::info!("Starting program transfer of {} lines", session.total_lines());
        self.report(&mut on_progress, session.progress(TransferPhase::Started, 0));

        let mut last_line = 0;
        while let Some(line) = session.next_line() {
            last_line = line.number;
            let Some(text) = line.text else {
                self.report(
                    &mut on_progress,
                    session.progress(TransferPhase::Line, line.number),
                );
                continue;
            };

            if token.is_cancelled() {
                tracing::info!("Program transfer aborted before line {}", line.number);
                self.report(
                    &mut on_progress,
                    session.progress(TransferPhase::Aborted, line.number),
                );
                return Err(TransferError::Aborted {
                    line_number: line.number,
                    completed_lines: session.sent_lines(),
                }
                .into());
            }

            let reply = match self.engine.submit(&text, SendOptions::default()).await {
                Ok(reply) => reply,
                Err(err) => {
                    tracing::error!("Program transfer failed at line {}: {}", line.number, err);
                    session.fail(err.to_string());
                    self.report(
                        &mut on_progress,
                        session.progress(TransferPhase::Failed, line.number),
                    );
                    return Err(err);
                }
            };

            match reply.outcome {
                ReplyOutcome::Acknowledged => {
                    session.mark_sent();
                    self.report(
                        &mut on_progress,
                        session.progress(TransferPhase::Line, line.number),
                    );
                }
                ReplyOutcome::Rejected(err) => {
                    tracing::warn!(
                        "Controller rejected line {} '{}': {}",
                        line.number,
                        text,
                        err
                    );
                    session.fail(err.to_string());
                    self.report(
                        &mut on_progress,
                        session.progress(TransferPhase::Failed, line.number),
                    );
                    return Err(TransferError::LineRejected {
                        line_number: line.number,
                        error: err.text,
                        completed_lines: session.sent_lines(),
                    }
                    .into());
                }
            }
        }

        let elapsed = started.elapsed();
        self.report(
            &mut on_progress,
            session.progress(TransferPhase::Completed, last_line),
        );
        tracing::info!(
            "Program transfer complete: {} sent, {} skipped in {:?}",
            session.sent_lines(),
            session.skipped_lines(),
            elapsed
        );
        Ok(TransferSummary {
            total_lines: session.total_lines(),
            sent_lines: session.sent_lines(),
            skipped_lines: session.skipped_lines(),
            elapsed,
        })
    }

    fn begin(&self, token: CancellationToken) -> Result<ActiveTransfer<'_>> {
        let mut slot = self.active.lock();
        if slot.is_some() {
            return Err(TransferError::AlreadyActive.into());
        }
        *slot = Some(token);
        Ok(ActiveTransfer { slot: &self.active })
    }

    fn report<F>(&self, on_progress: &mut F, progress: TransferProgress)
    where
        F: FnMut(&TransferProgress),
    {
        on_progress(&progress);
        self.bus
            .emit(AppEvent::Transfer(TransferEvent::Progress(progress)));
    }
}

impl std::fmt::Debug for ProgramStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgramStreamer")
            .field("active", &self.is_active())
            .finish()
    }
}
