//! Line protocol engine
//!
//! Owns everything between "caller submits a line" and "caller gets the
//! controller's answer": the outbound queue, the lines in flight, the
//! flow-control window, the latest machine status and the status waiters.
//!
//! All of that state sits behind one `parking_lot::Mutex`. The lock is never
//! held across an `.await`; bytes are handed to the link's unbounded channel
//! while it is held, so the order lines reach the wire is the order they
//! were dispatched. Bus notifications are collected under the lock and
//! published after it is released.
//!
//! Every attach and detach bumps a generation counter. Lines read from a
//! link and timers started under an older generation are ignored.

use gcodelink_core::{
    AppEvent, ConnectionError, Error, ErrorEvent, EventBus, MachineStatus, ProtocolError,
    ResponseEvent, Result, TelemetryEvent,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::command::{CommandReply, PendingCommand, ReplyOutcome, SendOptions};
use super::flow_control::{Dialect, DialectMode, FlowControlWindow};
use crate::grbl::{parse_line, ControllerResponse, FirmwareError, RealtimeCommand, StatusReport};
use crate::transport::LinkWriter;

/// Time allowed for `ok`/`error:` after submission
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed for a status report after `?`
pub const DEFAULT_STATUS_TIMEOUT: Duration = Duration::from_secs(1);

/// Commands that may wait for the window before submissions are refused
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Engine tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Dialect selection
    pub dialect_mode: DialectMode,
    /// Acknowledgement timeout, measured from submission
    pub command_timeout: Duration,
    /// Status report timeout for `request_status`
    pub status_timeout: Duration,
    /// Maximum queued (not yet written) commands
    pub queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dialect_mode: DialectMode::Auto,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            status_timeout: DEFAULT_STATUS_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Point-in-time view of the engine
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSnapshot {
    /// Current generation
    pub generation: u64,
    /// A link writer is attached
    pub attached: bool,
    /// Commands waiting for window space
    pub queued: usize,
    /// Commands written and not yet acknowledged
    pub in_flight: usize,
    /// Bytes written and not yet acknowledged
    pub in_flight_bytes: usize,
    /// Bytes reserved since the last reset
    pub sent_bytes: usize,
    /// Bytes released since the last reset
    pub confirmed_bytes: usize,
    /// Window capacity
    pub capacity: usize,
    /// Active dialect
    pub dialect: Dialect,
    /// Window usage percentage
    pub usage_percent: f64,
}

struct EngineCore {
    generation: u64,
    writer: Option<LinkWriter>,
    window: FlowControlWindow,
    dialect_settled: bool,
    queue: VecDeque<PendingCommand>,
    in_flight: VecDeque<PendingCommand>,
    status: MachineStatus,
    status_waiters: Vec<oneshot::Sender<MachineStatus>>,
    next_id: u64,
}

impl EngineCore {
    fn new(mode: DialectMode) -> Self {
        Self {
            generation: 0,
            writer: None,
            window: FlowControlWindow::new(mode.initial()),
            dialect_settled: matches!(mode, DialectMode::Fixed(_)),
            queue: VecDeque::new(),
            in_flight: VecDeque::new(),
            status: MachineStatus::default(),
            status_waiters: Vec::new(),
            next_id: 1,
        }
    }

    /// Write queued lines while the window admits them
    fn dispatch(&mut self, timeout: Duration, events: &mut Vec<AppEvent>) {
        self.release_stale(timeout);
        let Some(writer) = self.writer.clone() else {
            return;
        };

        while self
            .queue
            .front()
            .is_some_and(|front| self.window.fits(front.byte_len))
        {
            let Some(mut cmd) = self.queue.pop_front() else {
                break;
            };

            let mut line = Vec::with_capacity(cmd.byte_len);
            line.extend_from_slice(cmd.text.as_bytes());
            line.push(b'\n');
            if let Err(err) = writer.write(line) {
                tracing::error!("Failed to write '{}': {}", cmd.text, err);
                events.push(AppEvent::Error(ErrorEvent::Transport {
                    message: err.to_string(),
                }));
                cmd.resolve(Err(err.into()));
                continue;
            }

            self.window.reserve(cmd.byte_len);
            tracing::debug!(">> {}", cmd.text);
            if !cmd.expects_response {
                let reply = cmd.reply(ReplyOutcome::Acknowledged);
                cmd.resolve(Ok(reply));
            }
            self.in_flight.push_back(cmd);
        }
    }

    /// Give back window space held by lines nobody is waiting on
    ///
    /// Covers fire-and-forget lines and lines whose caller dropped its future,
    /// once they are older than `timeout`. Lines with a live caller are
    /// expired by that caller. Queued lines whose caller went away are dropped.
    fn release_stale(&mut self, timeout: Duration) {
        let now = Instant::now();
        self.queue.retain(|cmd| {
            if cmd.is_abandoned() {
                tracing::debug!("Dropping '{}', its caller went away", cmd.text);
            }
            !cmd.is_abandoned()
        });

        let window = &mut self.window;
        self.in_flight.retain(|cmd| {
            let stale = (cmd.is_resolved() || cmd.is_abandoned())
                && now.duration_since(cmd.submitted_at) >= timeout;
            if stale {
                tracing::warn!("No acknowledgement for '{}', releasing its bytes", cmd.text);
                window.force_release(cmd.byte_len);
            }
            !stale
        });
    }

    fn handle_line(&mut self, line: &str, mode: DialectMode, events: &mut Vec<AppEvent>) {
        events.push(AppEvent::Response(ResponseEvent::Line {
            line: line.to_string(),
        }));

        match parse_line(line) {
            None => tracing::trace!("Dropping line {:?}", line),
            Some(ControllerResponse::Ok) => {
                tracing::debug!("<< {}", line);
                self.acknowledge(None, line, events);
            }
            Some(ControllerResponse::Error(err)) => {
                tracing::debug!("<< {}", line);
                self.acknowledge(Some(err), line, events);
            }
            Some(ControllerResponse::Status(report)) => {
                tracing::trace!("<< {}", line);
                self.apply_status(&report, mode, events);
            }
            Some(ControllerResponse::Alarm(alarm)) => {
                tracing::warn!("Controller alarm: {}", line);
                events.push(AppEvent::Telemetry(TelemetryEvent::Alarm {
                    code: alarm.code,
                    description: alarm.description().map(str::to_string),
                    text: alarm.text,
                }));
            }
            Some(ControllerResponse::Message(text)) => {
                tracing::debug!("<< {}", line);
                self.collect(line);
                events.push(AppEvent::Telemetry(TelemetryEvent::Message { text }));
            }
            Some(ControllerResponse::Other(text)) => {
                tracing::debug!("<< {}", line);
                self.collect(&text);
            }
        }
    }

    fn collect(&mut self, line: &str) {
        if let Some(cmd) = self.in_flight.front_mut() {
            if !cmd.is_resolved() {
                cmd.lines.push(line.to_string());
            }
        }
    }

    fn acknowledge(
        &mut self,
        error: Option<FirmwareError>,
        line: &str,
        events: &mut Vec<AppEvent>,
    ) {
        let Some(mut cmd) = self.in_flight.pop_front() else {
            tracing::warn!("Received '{}' with no command in flight", line);
            events.push(AppEvent::Error(ErrorEvent::Protocol {
                message: format!("Unexpected acknowledgement '{}'", line),
            }));
            return;
        };

        self.window.confirm(cmd.byte_len);
        let outcome = match error {
            Some(err) => {
                tracing::warn!("Controller rejected '{}': {}", cmd.text, err);
                ReplyOutcome::Rejected(err)
            }
            None => ReplyOutcome::Acknowledged,
        };
        if !cmd.is_resolved() {
            let reply = cmd.reply(outcome);
            cmd.resolve(Ok(reply));
        }
    }

    fn apply_status(
        &mut self,
        report: &StatusReport,
        mode: DialectMode,
        events: &mut Vec<AppEvent>,
    ) {
        report.apply_to(&mut self.status);

        if mode == DialectMode::Auto && !self.dialect_settled {
            self.dialect_settled = true;
            match report.buffer {
                Some(buffer) if buffer.rx_bytes > 0 => {
                    let dialect = Dialect::ByteBudget {
                        capacity: usize::from(buffer.rx_bytes),
                    };
                    tracing::info!("Controller reports buffer space, using {}", dialect);
                    self.window.set_dialect(dialect);
                }
                _ => tracing::info!(
                    "No buffer field in status report, staying {}",
                    Dialect::SingleOutstanding
                ),
            }
        }

        for waiter in self.status_waiters.drain(..) {
            let _ = waiter.send(self.status.clone());
        }
        events.push(AppEvent::Telemetry(TelemetryEvent::Status(
            self.status.clone(),
        )));
    }

    /// Fail every queued and in-flight command
    fn reject_all(&mut self, make_error: impl Fn() -> Error) -> usize {
        let mut count = 0;
        for mut cmd in self.queue.drain(..).chain(self.in_flight.drain(..)) {
            if !cmd.is_resolved() {
                count += 1;
            }
            cmd.resolve(Err(make_error()));
        }
        count
    }
}

/// Matches controller acknowledgements to submitted lines
pub struct ProtocolEngine {
    core: Arc<Mutex<EngineCore>>,
    config: EngineConfig,
    bus: Arc<EventBus>,
}

impl ProtocolEngine {
    /// Create a detached engine publishing on `bus`
    pub fn new(config: EngineConfig, bus: Arc<EventBus>) -> Self {
        Self {
            core: Arc::new(Mutex::new(EngineCore::new(config.dialect_mode))),
            config,
            bus,
        }
    }

    /// Engine tuning
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start using `writer` with fresh protocol state
    ///
    /// Returns the new generation; lines read from this link must be fed to
    /// [`handle_line`](Self::handle_line) with it.
    pub fn attach(&self, writer: LinkWriter) -> u64 {
        let mut core = self.core.lock();
        let stale = core.reject_all(|| ConnectionError::ConnectionClosed.into());
        if stale > 0 {
            tracing::warn!("Dropped {} commands left over from the previous link", stale);
        }
        core.generation += 1;
        core.writer = Some(writer);
        core.window = FlowControlWindow::new(self.config.dialect_mode.initial());
        core.dialect_settled = matches!(self.config.dialect_mode, DialectMode::Fixed(_));
        core.status_waiters.clear();
        tracing::info!(
            "Protocol engine attached (generation {}, {})",
            core.generation,
            core.window.dialect()
        );
        core.generation
    }

    /// Stop using the current link and fail everything pending with `reason`
    ///
    /// Returns how many waiting callers were failed. When this returns every
    /// pending receiver already holds its error.
    pub fn detach(&self, reason: ConnectionError) -> usize {
        let mut core = self.core.lock();
        core.generation += 1;
        core.writer = None;
        let rejected = core.reject_all(|| reason.clone().into());
        core.window.reset();
        core.status_waiters.clear();
        tracing::info!(
            "Protocol engine detached ({}), {} commands rejected",
            reason,
            rejected
        );
        rejected
    }

    /// A link writer is attached
    pub fn is_attached(&self) -> bool {
        self.core.lock().writer.is_some()
    }

    /// Current generation
    pub fn generation(&self) -> u64 {
        self.core.lock().generation
    }

    /// Submit one line and wait for its outcome
    ///
    /// Surrounding whitespace is trimmed. A firmware `error:` is returned as
    /// `Ok` with a [`ReplyOutcome::Rejected`] payload.
    pub async fn submit(&self, text: &str, options: SendOptions) -> Result<CommandReply> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ProtocolError::InvalidCommand {
                reason: "empty command".to_string(),
            }
            .into());
        }
        if text.contains(['\n', '\r']) {
            return Err(ProtocolError::InvalidCommand {
                reason: "command contains a line terminator".to_string(),
            }
            .into());
        }

        let (tx, rx) = oneshot::channel();
        let mut events = Vec::new();
        let (id, generation) = {
            let mut core = self.core.lock();
            if core.writer.is_none() {
                return Err(ConnectionError::NotConnected.into());
            }
            let length = text.len() + 1;
            if let Some(capacity) = core.window.max_line_len() {
                if length > capacity {
                    return Err(ProtocolError::LineTooLong { length, capacity }.into());
                }
            }
            if core.queue.len() >= self.config.queue_capacity {
                return Err(ProtocolError::QueueFull {
                    capacity: self.config.queue_capacity,
                }
                .into());
            }

            let id = core.next_id;
            core.next_id += 1;
            core.queue.push_back(PendingCommand::new(
                id,
                text.to_string(),
                options.expect_response,
                tx,
            ));
            core.dispatch(self.config.command_timeout, &mut events);
            (id, core.generation)
        };
        self.publish(events);
        self.schedule_sweep(generation);

        self.await_reply(id, generation, rx).await
    }

    async fn await_reply(
        &self,
        id: u64,
        generation: u64,
        mut rx: oneshot::Receiver<Result<CommandReply>>,
    ) -> Result<CommandReply> {
        let timeout = self.config.command_timeout;
        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ConnectionError::ConnectionClosed.into()),
            Err(_) => {
                self.expire(id, generation);
                // resolved between the timer firing and the expiry taking the lock
                match rx.try_recv() {
                    Ok(result) => result,
                    Err(_) => Err(ProtocolError::Timeout {
                        timeout_ms: timeout.as_millis() as u64,
                    }
                    .into()),
                }
            }
        }
    }

    /// Release stale window space once the command timeout has passed
    ///
    /// Runs on its own task so a caller that drops its future cannot leave
    /// bytes reserved forever.
    fn schedule_sweep(&self, generation: u64) {
        let deadline = Instant::now() + self.config.command_timeout;
        let timeout = self.config.command_timeout;
        let core = Arc::clone(&self.core);
        let bus = Arc::clone(&self.bus);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let mut events = Vec::new();
            {
                let mut core = core.lock();
                if core.generation != generation {
                    return;
                }
                core.dispatch(timeout, &mut events);
            }
            for event in events {
                bus.emit(event);
            }
        });
    }

    /// Drop an unanswered command, freeing its window space if it was sent
    fn expire(&self, id: u64, generation: u64) {
        let mut events = Vec::new();
        {
            let mut core = self.core.lock();
            if core.generation != generation {
                return;
            }

            let queued = core.queue.iter().position(|c| c.id == id);
            let expired = match queued {
                Some(pos) => core.queue.remove(pos),
                None => {
                    let sent = core
                        .in_flight
                        .iter()
                        .position(|c| c.id == id && !c.is_resolved());
                    let cmd = sent.and_then(|pos| core.in_flight.remove(pos));
                    if let Some(cmd) = &cmd {
                        core.window.force_release(cmd.byte_len);
                    }
                    cmd
                }
            };

            let Some(cmd) = expired else {
                return;
            };
            tracing::warn!(
                "Command '{}' timed out after {:?}",
                cmd.text,
                self.config.command_timeout
            );
            events.push(AppEvent::Error(ErrorEvent::Protocol {
                message: format!("Command '{}' timed out", cmd.text),
            }));
            core.dispatch(self.config.command_timeout, &mut events);
        }
        self.publish(events);
    }

    /// Feed one complete line read from the link of `generation`
    ///
    /// Blank lines are ignored.
    pub fn handle_line(&self, generation: u64, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        let mut events = Vec::new();
        {
            let mut core = self.core.lock();
            if core.generation != generation {
                tracing::trace!("Ignoring line from a previous link: {:?}", line);
                return;
            }
            core.handle_line(line, self.config.dialect_mode, &mut events);
            core.dispatch(self.config.command_timeout, &mut events);
        }
        self.publish(events);
    }

    /// Write a realtime byte ahead of everything queued
    ///
    /// Sending [`RealtimeCommand::StatusRequest`] here does not wait for the
    /// report; the report still updates [`machine_status`](Self::machine_status)
    /// and is published as telemetry. Use [`request_status`](Self::request_status)
    /// to wait for it.
    ///
    /// A soft reset also fails every pending command with
    /// [`ProtocolError::Reset`] and empties the window, since the firmware
    /// throws away its buffer.
    pub fn send_realtime(&self, command: RealtimeCommand) -> Result<()> {
        let mut core = self.core.lock();
        let writer = core.writer.clone().ok_or(ConnectionError::NotConnected)?;
        writer.write(vec![command.byte()])?;
        tracing::debug!("Sent realtime {}", command);

        if command == RealtimeCommand::SoftReset {
            let rejected = core.reject_all(|| ProtocolError::Reset.into());
            core.window.reset();
            tracing::info!("Soft reset cleared {} pending commands", rejected);
        }
        Ok(())
    }

    /// Send `?` and wait for the next status report
    ///
    /// Returns `Ok(None)` when no report arrives within the status timeout
    /// or the link drops first.
    pub async fn request_status(&self) -> Result<Option<MachineStatus>> {
        let (tx, rx) = oneshot::channel();
        {
            let mut core = self.core.lock();
            let writer = core.writer.clone().ok_or(ConnectionError::NotConnected)?;
            core.status_waiters.retain(|waiter| !waiter.is_closed());
            core.status_waiters.push(tx);
            writer.write(vec![RealtimeCommand::StatusRequest.byte()])?;
        }

        match tokio::time::timeout(self.config.status_timeout, rx).await {
            Ok(Ok(status)) => Ok(Some(status)),
            Ok(Err(_)) => Ok(None),
            Err(_) => {
                tracing::debug!(
                    "No status report within {:?}",
                    self.config.status_timeout
                );
                Ok(None)
            }
        }
    }

    /// Latest merged machine status
    pub fn machine_status(&self) -> MachineStatus {
        self.core.lock().status.clone()
    }

    /// Override the dialect for the current link
    pub fn set_dialect(&self, dialect: Dialect) {
        let mut core = self.core.lock();
        core.window.set_dialect(dialect);
        core.dialect_settled = true;
        tracing::info!("Dialect set to {}", dialect);
    }

    /// Counters for diagnostics
    pub fn snapshot(&self) -> EngineSnapshot {
        let core = self.core.lock();
        EngineSnapshot {
            generation: core.generation,
            attached: core.writer.is_some(),
            queued: core.queue.len(),
            in_flight: core.in_flight.len(),
            in_flight_bytes: core.window.in_flight(),
            sent_bytes: core.window.sent_bytes(),
            confirmed_bytes: core.window.confirmed_bytes(),
            capacity: core.window.capacity(),
            dialect: core.window.dialect(),
            usage_percent: core.window.usage_percent(),
        }
    }

    fn publish(&self, events: Vec<AppEvent>) {
        for event in events {
            self.bus.emit(event);
        }
    }
}

impl std::fmt::Debug for ProtocolEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolEngine")
            .field("config", &self.config)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}
