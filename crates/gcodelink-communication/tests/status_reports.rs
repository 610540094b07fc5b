//! Status report parsing through the public line classifier.

use gcodelink_communication::{parse_line, ControllerResponse};
use gcodelink_core::{MachineStatus, Position};

fn apply(status: &mut MachineStatus, line: &str) {
    match parse_line(line) {
        Some(ControllerResponse::Status(report)) => report.apply_to(status),
        other => panic!("expected a status report, got {:?}", other),
    }
}

#[test]
fn test_run_report_populates_status() {
    let mut status = MachineStatus::default();
    apply(
        &mut status,
        "<Run|MPos:1.000,2.000,3.000|WPos:0.000,0.000,0.000|FS:500,0>",
    );

    assert_eq!(status.state, "Run");
    assert_eq!(status.machine_position, Position::new(1.0, 2.0, 3.0, 0.0));
    assert_eq!(status.work_position, Position::new(0.0, 0.0, 0.0, 0.0));
    assert_eq!(status.feed_rate, 500.0);
    assert_eq!(status.spindle_speed, 0.0);
}

#[test]
fn test_fluidnc_report_with_offsets() {
    let mut status = MachineStatus::default();
    apply(
        &mut status,
        "<Idle|MPos:151.000,10.000,-2.000|FS:0,0|WCO:150.000,10.000,-5.000>",
    );
    assert_eq!(status.work_position, Position::new(1.0, 0.0, 3.0, 0.0));
    assert_eq!(status.work_offset, Some(Position::new(150.0, 10.0, -5.0, 0.0)));

    // FluidNC only sends WCO every few reports
    apply(&mut status, "<Jog|MPos:152.000,10.000,-2.000|FS:1000,0>");
    assert_eq!(status.state, "Jog");
    assert_eq!(status.work_position, Position::new(2.0, 0.0, 3.0, 0.0));
}

#[test]
fn test_malformed_report_is_dropped() {
    assert_eq!(parse_line("<Idle|MPos:1.000,nan?,3.000>"), None);
    assert_eq!(parse_line("<Idle|FS:fast,0>"), None);
}
