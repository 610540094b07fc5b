//! Test helpers: a scripted GRBL peer on the far end of a MemoryTransport.

#![allow(dead_code)]

use gcodelink_communication::{
    ControllerLink, DialectMode, EngineConfig, LinkConfig, MemoryTransport, SupervisorConfig,
    TransportConfig,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

/// Decides the reply lines for each received line
pub type Responder = Box<dyn FnMut(&str) -> Vec<String> + Send>;

/// Answers every line with `ok`
pub fn always_ok() -> Responder {
    Box::new(|_| vec!["ok".to_string()])
}

/// Answers `ok`, except `error:<code>` for the `n`th line (1-based)
pub fn error_on_line(n: usize, code: u8) -> Responder {
    let mut count = 0;
    Box::new(move |_| {
        count += 1;
        if count == n {
            vec![format!("error:{}", code)]
        } else {
            vec!["ok".to_string()]
        }
    })
}

/// Handle on the fake controller
pub struct FakeGrbl {
    lines: Arc<Mutex<Vec<String>>>,
    realtime: Arc<Mutex<Vec<u8>>>,
    replies: mpsc::UnboundedSender<String>,
    seen: mpsc::UnboundedReceiver<String>,
}

impl FakeGrbl {
    /// Run a peer on `stream`
    ///
    /// `responder` answers lines automatically; without one, use `reply`.
    /// `status` is sent back for every `?`.
    pub fn spawn(
        stream: DuplexStream,
        responder: Option<Responder>,
        status: Option<String>,
    ) -> Self {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let realtime = Arc::new(Mutex::new(Vec::new()));
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<String>();
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();

        let task_lines = lines.clone();
        let task_realtime = realtime.clone();
        tokio::spawn(async move {
            let mut responder = responder;
            let mut stream = stream;
            let mut partial = Vec::new();
            let mut buf = [0u8; 512];
            loop {
                tokio::select! {
                    read = stream.read(&mut buf) => {
                        let n = match read {
                            Ok(0) | Err(_) => return,
                            Ok(n) => n,
                        };
                        let mut out = String::new();
                        for &byte in &buf[..n] {
                            match byte {
                                b'?' | b'!' | b'~' | 0x18 => {
                                    task_realtime.lock().push(byte);
                                    if byte == b'?' {
                                        if let Some(status) = &status {
                                            out.push_str(status);
                                            out.push('\n');
                                        }
                                    }
                                }
                                b'\n' => {
                                    let line = String::from_utf8_lossy(&partial).into_owned();
                                    partial.clear();
                                    task_lines.lock().push(line.clone());
                                    let _ = seen_tx.send(line.clone());
                                    if let Some(responder) = responder.as_mut() {
                                        for reply in responder(&line) {
                                            out.push_str(&reply);
                                            out.push('\n');
                                        }
                                    }
                                }
                                other => partial.push(other),
                            }
                        }
                        if !out.is_empty() && stream.write_all(out.as_bytes()).await.is_err() {
                            return;
                        }
                    }
                    reply = reply_rx.recv() => match reply {
                        Some(reply) => {
                            if stream.write_all(reply.as_bytes()).await.is_err() {
                                return;
                            }
                        }
                        None => return,
                    },
                }
            }
        });

        Self {
            lines,
            realtime,
            replies: reply_tx,
            seen: seen_rx,
        }
    }

    /// Send a line to the host
    pub fn reply(&self, line: &str) {
        let _ = self.replies.send(format!("{}\n", line));
    }

    /// Send raw bytes to the host
    pub fn send_raw(&self, raw: &str) {
        let _ = self.replies.send(raw.to_string());
    }

    /// Wait for the next line the host sends
    pub async fn next_line(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.seen.recv())
            .await
            .expect("peer waited too long for a line")
            .expect("peer stopped")
    }

    /// Every line received so far
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Every realtime byte received so far
    pub fn realtime(&self) -> Vec<u8> {
        self.realtime.lock().clone()
    }

    /// Stop answering and drop the pipe, as if the device was unplugged
    pub fn unplug(self) {
        drop(self.replies);
    }
}

/// Link config with a fixed 128-byte window and no status request on connect
pub fn test_config() -> LinkConfig {
    LinkConfig {
        engine: EngineConfig {
            dialect_mode: DialectMode::Fixed(Default::default()),
            ..Default::default()
        },
        supervisor: SupervisorConfig {
            status_on_connect: false,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// A connected link and its fake controller
pub async fn connected(
    config: LinkConfig,
    responder: Option<Responder>,
    status: Option<String>,
) -> (ControllerLink, FakeGrbl) {
    let link = ControllerLink::new(config);
    let (transport, mut peers) = MemoryTransport::new();
    link.connect_with_transport(Box::new(transport), &TransportConfig::serial("mem0"))
        .await
        .expect("connect");
    let stream = peers.recv().await.expect("peer stream");
    (link, FakeGrbl::spawn(stream, responder, status))
}
