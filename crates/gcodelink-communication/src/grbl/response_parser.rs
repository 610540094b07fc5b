//! Classification of complete controller lines.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::error_decoder::{describe_alarm, describe_error};
use super::status_parser::StatusReport;

/// Payload of an `error:` reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareError {
    /// Numeric code, when the payload is a number
    pub code: Option<u8>,
    /// Payload text after `error:`
    pub text: String,
}

impl FirmwareError {
    /// Build from the text following `error:`
    pub fn from_payload(payload: &str) -> Self {
        let text = payload.trim().to_string();
        Self {
            code: text.parse().ok(),
            text,
        }
    }

    /// Decoded description for known GRBL codes
    pub fn description(&self) -> Option<&'static str> {
        self.code.and_then(describe_error)
    }
}

impl fmt::Display for FirmwareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.description() {
            Some(desc) => write!(f, "error:{} ({})", self.text, desc),
            None => write!(f, "error:{}", self.text),
        }
    }
}

/// Payload of an `ALARM:` line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmReport {
    /// Numeric code, when the payload is a number
    pub code: Option<u8>,
    /// Payload text after `ALARM:`
    pub text: String,
}

impl AlarmReport {
    /// Decoded description for known GRBL codes
    pub fn description(&self) -> Option<&'static str> {
        self.code.and_then(describe_alarm)
    }
}

/// A classified controller line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControllerResponse {
    /// `ok`
    Ok,
    /// `error:<payload>`
    Error(FirmwareError),
    /// `ALARM:<code>` or `[ALARM:<code>]`
    Alarm(AlarmReport),
    /// `[MSG:<text>]`
    Message(String),
    /// `<...>` status report
    Status(StatusReport),
    /// Any other text: banners, `$` settings, `[GC:...]`, `[VER:...]`
    Other(String),
}

/// Classify one complete line (terminator already stripped)
///
/// Returns `None` for empty lines and malformed status reports; callers
/// drop those.
pub fn parse_line(line: &str) -> Option<ControllerResponse> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if line == "ok" {
        return Some(ControllerResponse::Ok);
    }

    if let Some(payload) = line.strip_prefix("error:") {
        return Some(ControllerResponse::Error(FirmwareError::from_payload(
            payload,
        )));
    }

    if let Some(body) = line.strip_prefix('<') {
        let body = body.strip_suffix('>')?;
        return StatusReport::parse(body).map(ControllerResponse::Status);
    }

    let alarm = line
        .strip_prefix("[ALARM:")
        .and_then(|rest| rest.strip_suffix(']'))
        .or_else(|| line.strip_prefix("ALARM:"));
    if let Some(payload) = alarm {
        let text = payload.trim().to_string();
        return Some(ControllerResponse::Alarm(AlarmReport {
            code: text.parse().ok(),
            text,
        }));
    }

    if let Some(msg) = line
        .strip_prefix("[MSG:")
        .and_then(|rest| rest.strip_suffix(']'))
    {
        return Some(ControllerResponse::Message(msg.to_string()));
    }

    Some(ControllerResponse::Other(line.to_string()))
}
