//! GRBL status report decoding
//!
//! A status report is the `<...>` line sent in answer to `?`:
//!
//! ```text
//! <Hold:0|MPos:10.000,0.000,-1.500|Bf:15,128|FS:500,12000|WCO:0.000,0.000,-3.000|Ov:100,100,100>
//! ```
//!
//! Every field is optional except the leading state. Field presence varies
//! between firmware builds and with the `$10` report mask, so the decoded
//! report is merged into the running [`MachineStatus`] rather than replacing it.

use gcodelink_core::{BufferState, MachineStatus, OverrideValues, Position};
use serde::{Deserialize, Serialize};

/// One decoded status report
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatusReport {
    /// State tag (Idle, Run, Hold, ...)
    pub state: String,
    /// Sub-state code after the colon, e.g. `Hold:0`
    pub substate: Option<u8>,
    /// `MPos:` machine coordinates
    pub machine_position: Option<Position>,
    /// `WPos:` work coordinates
    pub work_position: Option<Position>,
    /// `WCO:` work coordinate offset
    pub work_offset: Option<Position>,
    /// Feed rate from `FS:` or `F:`
    pub feed_rate: Option<f64>,
    /// Spindle speed from `FS:`
    pub spindle_speed: Option<f64>,
    /// `Bf:` planner blocks and receive bytes available
    pub buffer: Option<BufferState>,
    /// `Ov:` override percentages
    pub overrides: Option<OverrideValues>,
}

impl StatusReport {
    /// Parse the body of a status report (the text between `<` and `>`)
    ///
    /// Returns `None` when the state is missing or a recognized field holds
    /// a value that is not numeric. Unrecognized fields are ignored.
    pub fn parse(body: &str) -> Option<Self> {
        let mut fields = body.split('|');
        let state_field = fields.next()?.trim();
        if state_field.is_empty() {
            return None;
        }

        let mut report = StatusReport::default();
        match state_field.split_once(':') {
            Some((state, sub)) => {
                report.state = state.to_string();
                report.substate = Some(sub.trim().parse().ok()?);
            }
            None => report.state = state_field.to_string(),
        }

        for field in fields {
            let Some((key, value)) = field.split_once(':') else {
                continue;
            };
            match key {
                "MPos" => report.machine_position = Some(parse_position(value)?),
                "WPos" => report.work_position = Some(parse_position(value)?),
                "WCO" => report.work_offset = Some(parse_position(value)?),
                "FS" => {
                    let values = parse_numbers::<f64>(value)?;
                    if values.len() != 2 {
                        return None;
                    }
                    report.feed_rate = Some(values[0]);
                    report.spindle_speed = Some(values[1]);
                }
                "F" => report.feed_rate = Some(value.trim().parse().ok()?),
                "Bf" | "Buf" => {
                    let values = parse_numbers::<u16>(value)?;
                    if values.len() != 2 {
                        return None;
                    }
                    report.buffer = Some(BufferState {
                        planner_blocks: values[0],
                        rx_bytes: values[1],
                    });
                }
                "Ov" => {
                    let values = parse_numbers::<u16>(value)?;
                    if values.len() != 3 {
                        return None;
                    }
                    report.overrides = Some(OverrideValues {
                        feed: values[0],
                        rapid: values[1],
                        spindle: values[2],
                    });
                }
                _ => {}
            }
        }

        Some(report)
    }

    /// Merge this report into the running machine status
    ///
    /// A coordinate space the report leaves out is derived from the other
    /// one through the offset (`WPos = MPos - WCO`). When both spaces are
    /// present the offset is recomputed from them.
    pub fn apply_to(&self, status: &mut MachineStatus) {
        status.state = self.state.clone();
        status.substate = self.substate;

        if let Some(wco) = self.work_offset {
            status.work_offset = Some(wco);
        }

        match (self.machine_position, self.work_position) {
            (Some(mpos), Some(wpos)) => {
                status.machine_position = mpos;
                status.work_position = wpos;
                if self.work_offset.is_none() {
                    status.work_offset = Some(mpos.minus(&wpos));
                }
            }
            (Some(mpos), None) => {
                status.machine_position = mpos;
                if let Some(wco) = status.work_offset {
                    status.work_position = mpos.minus(&wco);
                }
            }
            (None, Some(wpos)) => {
                status.work_position = wpos;
                if let Some(wco) = status.work_offset {
                    status.machine_position = wpos.plus(&wco);
                }
            }
            (None, None) => {}
        }

        if let Some(feed) = self.feed_rate {
            status.feed_rate = feed;
        }
        if let Some(speed) = self.spindle_speed {
            status.spindle_speed = speed;
        }
        if let Some(buffer) = self.buffer {
            status.buffer = Some(buffer);
        }
        if let Some(overrides) = self.overrides {
            status.overrides = Some(overrides);
        }
    }
}

fn parse_numbers<T: std::str::FromStr>(value: &str) -> Option<Vec<T>> {
    value
        .split(',')
        .map(|part| part.trim().parse::<T>().ok())
        .collect()
}

/// Three to six comma separated axes; only X, Y, Z and A are kept
fn parse_position(value: &str) -> Option<Position> {
    let coords = parse_numbers::<f64>(value)?;
    if !(3..=6).contains(&coords.len()) {
        return None;
    }
    Some(Position::new(
        coords[0],
        coords[1],
        coords[2],
        coords.get(3).copied().unwrap_or(0.0),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_report() {
        let report =
            StatusReport::parse("Run|MPos:1.000,2.000,3.000|WPos:0.000,0.000,0.000|FS:500,0")
                .expect("valid report");
        assert_eq!(report.state, "Run");
        assert_eq!(report.machine_position, Some(Position::new(1.0, 2.0, 3.0, 0.0)));
        assert_eq!(report.work_position, Some(Position::new(0.0, 0.0, 0.0, 0.0)));
        assert_eq!(report.feed_rate, Some(500.0));
        assert_eq!(report.spindle_speed, Some(0.0));
    }

    #[test]
    fn test_substate_and_extras() {
        let report = StatusReport::parse(
            "Hold:0|MPos:1,2,3,45|Bf:15,128|Ov:100,25,110|Pn:XZ|A:SF|F:300",
        )
        .expect("valid report");
        assert_eq!(report.state, "Hold");
        assert_eq!(report.substate, Some(0));
        assert_eq!(report.machine_position.map(|p| p.a), Some(45.0));
        assert_eq!(
            report.buffer,
            Some(BufferState {
                planner_blocks: 15,
                rx_bytes: 128
            })
        );
        assert_eq!(report.overrides.map(|o| o.rapid), Some(25));
        assert_eq!(report.feed_rate, Some(300.0));
    }

    #[test]
    fn test_malformed_known_field() {
        assert!(StatusReport::parse("Idle|MPos:1,abc,3").is_none());
        assert!(StatusReport::parse("Idle|MPos:1,2").is_none());
        assert!(StatusReport::parse("Idle|FS:500").is_none());
        assert!(StatusReport::parse("Hold:x").is_none());
        assert!(StatusReport::parse("").is_none());
    }

    #[test]
    fn test_merge_derives_work_position() {
        let mut status = MachineStatus::default();
        StatusReport::parse("Idle|MPos:10,10,0|WCO:2,3,0")
            .expect("valid")
            .apply_to(&mut status);
        assert_eq!(status.work_position, Position::new(8.0, 7.0, 0.0, 0.0));

        // Next report has no WCO; the remembered offset still applies
        StatusReport::parse("Run|MPos:12,10,0|FS:800,0")
            .expect("valid")
            .apply_to(&mut status);
        assert_eq!(status.state, "Run");
        assert_eq!(status.work_position, Position::new(10.0, 7.0, 0.0, 0.0));
        assert_eq!(status.feed_rate, 800.0);
    }

    #[test]
    fn test_merge_keeps_absent_fields() {
        let mut status = MachineStatus::default();
        StatusReport::parse("Idle|WPos:1,1,1|Bf:15,128|FS:0,0")
            .expect("valid")
            .apply_to(&mut status);
        StatusReport::parse("Jog|WPos:2,1,1")
            .expect("valid")
            .apply_to(&mut status);
        assert_eq!(status.buffer.map(|b| b.rx_bytes), Some(128));
        assert_eq!(status.work_position.x, 2.0);
        // no offset known yet, machine position untouched
        assert_eq!(status.machine_position, Position::default());
    }
}
