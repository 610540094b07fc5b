//! Human-readable descriptions for GRBL error and alarm codes.

/// Describe a numeric `error:` code
///
/// Covers the GRBL 1.1 table; grblHAL and FluidNC extensions fall through to
/// `None` and are shown as raw codes.
pub fn describe_error(code: u8) -> Option<&'static str> {
    let text = match code {
        1 => "Expected a command letter",
        2 => "Bad or missing numeric value",
        3 => "System command not recognized",
        4 => "Negative value where a positive one is required",
        5 => "Homing is disabled",
        6 => "Step pulse time must be at least 3us",
        7 => "Settings read failed, defaults restored",
        8 => "System command only valid while Idle",
        9 => "G-code locked out in alarm or jog state",
        10 => "Soft limits need homing enabled",
        11 => "Line exceeds the maximum length",
        12 => "Step rate exceeds the supported maximum",
        13 => "Safety door opened",
        14 => "Startup line or build info too long",
        15 => "Jog target exceeds machine travel",
        16 => "Invalid jog command",
        17 => "Laser mode requires PWM output",
        20 => "Unsupported G-code command",
        21 => "Two commands from the same modal group",
        22 => "Feed rate not set",
        23 => "Command requires an integer value",
        24 => "Two commands need the axis words",
        25 => "Repeated word in block",
        26 => "Command needs axis words but none were given",
        27 => "Line number out of range",
        28 => "Missing P or L value",
        29 => "Unsupported work coordinate system",
        30 => "G53 requires G0 or G1 motion mode",
        31 => "Unused axis words with G80 active",
        32 => "Arc has no axis words in the selected plane",
        33 => "Invalid motion target",
        34 => "Arc radius error",
        35 => "Arc missing IJK offset in the selected plane",
        36 => "Unused words left in block",
        37 => "Tool length offset on a non-configured axis",
        38 => "Tool number too large",
        _ => return None,
    };
    Some(text)
}

/// Describe a numeric `ALARM:` code
pub fn describe_alarm(code: u8) -> Option<&'static str> {
    let text = match code {
        1 => "Hard limit triggered, position lost",
        2 => "Motion target exceeds machine travel",
        3 => "Reset while in motion, position lost",
        4 => "Probe not in the expected initial state",
        5 => "Probe did not contact the workpiece",
        6 => "Homing failed: reset during cycle",
        7 => "Homing failed: safety door opened",
        8 => "Homing failed: pull-off did not clear the switch",
        9 => "Homing failed: switch not found",
        10 => "Homing failed: second switch not found",
        _ => return None,
    };
    Some(text)
}

/// Format an error code for display
pub fn format_error(code: u8) -> String {
    match describe_error(code) {
        Some(desc) => format!("error:{} ({})", code, desc),
        None => format!("error:{}", code),
    }
}

/// Format an alarm code for display
pub fn format_alarm(code: u8) -> String {
    match describe_alarm(code) {
        Some(desc) => format!("ALARM:{} ({})", code, desc),
        None => format!("ALARM:{}", code),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes() {
        assert_eq!(describe_error(20), Some("Unsupported G-code command"));
        assert!(describe_alarm(1).is_some());
        assert_eq!(format_error(22), "error:22 (Feed rate not set)");
    }

    #[test]
    fn test_unknown_codes() {
        assert_eq!(describe_error(200), None);
        assert_eq!(format_alarm(99), "ALARM:99");
    }
}
