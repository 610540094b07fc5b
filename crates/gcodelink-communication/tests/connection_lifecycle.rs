//! Connection supervisor lifecycle through `ControllerLink`.

mod common;

use common::{always_ok, connected, test_config, FakeGrbl};
use gcodelink_communication::{
    ControllerLink, Dialect, DialectMode, EngineConfig, LinkConfig, MemoryTransport,
    RealtimeCommand, ReconnectPolicy, ReplyOutcome, SendOptions, SocketConfig, SupervisorConfig,
    TransportConfig,
};
use gcodelink_core::{
    AppEvent, ConnectionError, ConnectionEvent, ConnectionState, Error, EventCategory,
    EventFilter, TelemetryEvent, TransportKind,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

fn record_states(link: &ControllerLink) -> Arc<Mutex<Vec<ConnectionState>>> {
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = states.clone();
    link.events().subscribe(
        EventFilter::Categories(vec![EventCategory::Connection]),
        move |event| {
            if let AppEvent::Connection(ConnectionEvent::StateChanged { current, .. }) = event {
                sink.lock().push(current);
            }
        },
    );
    states
}

async fn wait_for_state(link: &ControllerLink, state: ConnectionState) {
    for _ in 0..500 {
        if link.state() == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("link never reached {}, still {}", state, link.state());
}

#[tokio::test]
async fn test_open_failure_enters_error_state() {
    let link = ControllerLink::new(test_config());
    let states = record_states(&link);

    let err = link
        .connect_with_transport(
            Box::new(MemoryTransport::failing("Permission denied")),
            &TransportConfig::serial("/dev/ttyUSB0"),
        )
        .await
        .expect_err("open fails");
    assert!(matches!(
        err,
        Error::Connection(ConnectionError::FailedToOpen { .. })
    ));

    let info = link.connection_info();
    assert_eq!(info.state, ConnectionState::Error);
    assert_eq!(info.transport_kind, Some(TransportKind::Serial));
    assert_eq!(info.endpoint.as_deref(), Some("/dev/ttyUSB0"));
    assert_eq!(
        *states.lock(),
        vec![ConnectionState::Connecting, ConnectionState::Error]
    );

    // Error allows a fresh connect
    let (transport, _peers) = MemoryTransport::new();
    link.connect_with_transport(Box::new(transport), &TransportConfig::serial("/dev/ttyUSB0"))
        .await
        .expect("reconnect from Error");
    assert_eq!(link.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let link = ControllerLink::new(test_config());
    let states = record_states(&link);

    link.disconnect().await.expect("no-op");
    link.disconnect().await.expect("still a no-op");
    assert!(states.lock().is_empty());
    assert_eq!(link.state(), ConnectionState::Disconnected);

    let (transport, _peers) = MemoryTransport::new();
    link.connect_with_transport(Box::new(transport), &TransportConfig::serial("mem0"))
        .await
        .expect("connect");
    link.disconnect().await.expect("disconnect");
    link.disconnect().await.expect("second disconnect");

    assert_eq!(
        *states.lock(),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
        ]
    );
    let err = link
        .send_command("G0 X1", SendOptions::default())
        .await
        .expect_err("disconnected");
    assert!(matches!(
        err,
        Error::Connection(ConnectionError::NotConnected)
    ));
}

#[tokio::test]
async fn test_connect_twice_is_rejected() {
    let (link, _peer) = connected(test_config(), Some(always_ok()), None).await;
    let (transport, _peers) = MemoryTransport::new();
    let err = link
        .connect_with_transport(Box::new(transport), &TransportConfig::serial("mem1"))
        .await
        .expect_err("already connected");
    assert!(matches!(
        err,
        Error::Connection(ConnectionError::AlreadyConnected)
    ));
    assert_eq!(link.connection_info().endpoint.as_deref(), Some("mem0"));
}

#[tokio::test]
async fn test_command_round_trip_and_realtime() {
    let (link, peer) = connected(
        test_config(),
        Some(always_ok()),
        Some("<Idle|MPos:0.000,0.000,0.000|FS:0,0>".to_string()),
    )
    .await;

    let reply = link
        .send_command("G0 X10", SendOptions::default())
        .await
        .expect("reply");
    assert!(!reply.is_rejected());

    let status = link
        .request_status()
        .await
        .expect("request")
        .expect("status arrives");
    assert_eq!(status.state, "Idle");

    link.send_control_byte(RealtimeCommand::FeedHold)
        .expect("hold");
    link.send_control_byte(RealtimeCommand::CycleResume)
        .expect("resume");
    link.send_command("G4 P0", SendOptions::default())
        .await
        .expect("sync");
    assert_eq!(peer.realtime(), vec![b'?', b'!', b'~']);
    assert_eq!(peer.lines(), vec!["G0 X10", "G4 P0"]);
}

#[tokio::test]
async fn test_peer_loss_rejects_pending_and_enters_error() {
    let (link, mut peer) = connected(test_config(), None, None).await;
    let link = Arc::new(link);

    let pending = {
        let link = link.clone();
        tokio::spawn(async move { link.send_command("$H", SendOptions::default()).await })
    };
    assert_eq!(peer.next_line().await, "$H");

    peer.unplug();
    let err = pending.await.expect("join").expect_err("link lost");
    assert!(matches!(
        err,
        Error::Connection(ConnectionError::ConnectionLost { .. })
    ));
    wait_for_state(&link, ConnectionState::Error).await;

    link.disconnect().await.expect("disconnect from Error");
    assert_eq!(link.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_disconnect_with_error() {
    let (link, _peer) = connected(test_config(), Some(always_ok()), None).await;
    link.disconnect_with_error("operator abort")
        .await
        .expect("disconnect");
    assert_eq!(link.state(), ConnectionState::Error);
    assert!(!link.engine_snapshot().attached);
}

#[tokio::test]
async fn test_connect_status_settles_auto_dialect() {
    let config = LinkConfig {
        engine: EngineConfig {
            dialect_mode: DialectMode::Auto,
            ..Default::default()
        },
        supervisor: SupervisorConfig {
            settle_delay: Duration::from_millis(10),
            status_on_connect: true,
        },
        ..Default::default()
    };
    let link = ControllerLink::new(config);
    let (transport, mut peers) = MemoryTransport::new();
    link.connect_with_transport(Box::new(transport), &TransportConfig::serial("mem0"))
        .await
        .expect("connect");
    let peer = FakeGrbl::spawn(
        peers.recv().await.expect("peer"),
        Some(always_ok()),
        Some("<Idle|MPos:0.000,0.000,0.000|Bf:15,128|FS:0,0>".to_string()),
    );

    for _ in 0..200 {
        if link.engine_snapshot().dialect != Dialect::SingleOutstanding {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(
        link.engine_snapshot().dialect,
        Dialect::ByteBudget { capacity: 128 }
    );
    assert_eq!(peer.realtime(), vec![b'?']);
    assert_eq!(link.machine_status().state, "Idle");
}

#[tokio::test]
async fn test_status_byte_updates_status_without_waiting() {
    let (link, peer) = connected(
        test_config(),
        Some(always_ok()),
        Some("<Hold:0|MPos:1.000,0.000,0.000|FS:0,0>".to_string()),
    )
    .await;
    let mut events = link.events().receiver();

    link.send_control_byte(RealtimeCommand::StatusRequest)
        .expect("status byte");
    for _ in 0..200 {
        if link.machine_status().is_known() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(link.machine_status().state, "Hold");
    assert_eq!(peer.realtime(), vec![b'?']);

    let mut saw_status = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, AppEvent::Telemetry(TelemetryEvent::Status(_))) {
            saw_status = true;
        }
    }
    assert!(saw_status);
}

async fn wait_for_generation(link: &ControllerLink, generation: u64) {
    for _ in 0..500 {
        if link.engine_snapshot().generation == generation {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "engine never reached generation {}, still {}",
        generation,
        link.engine_snapshot().generation
    );
}

#[tokio::test]
async fn test_socket_reconnect_through_link() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let link = ControllerLink::new(test_config());
    let states = record_states(&link);

    let config = TransportConfig::Socket(SocketConfig {
        url: addr.to_string(),
        auto_reconnect: true,
        reconnect: ReconnectPolicy {
            max_attempts: 2,
            base_delay_ms: 20,
        },
    });
    let (opened, accepted) = tokio::join!(link.connect(&config), listener.accept());
    opened.expect("connect");
    let (first, _) = accepted.expect("accept");
    assert_eq!(link.engine_snapshot().generation, 1);

    // the controller drops the connection and takes the redial
    drop(first);
    let (second, _) = listener.accept().await.expect("accept redial");
    wait_for_generation(&link, 3).await;
    assert_eq!(link.state(), ConnectionState::Connected);

    let (reader, mut writer) = second.into_split();
    let mut reader = BufReader::new(reader);
    let controller = async {
        let mut line = String::new();
        reader.read_line(&mut line).await.expect("read line");
        writer.write_all(b"ok\n").await.expect("write ok");
        line
    };
    let (reply, received) = tokio::join!(
        link.send_command("G0 X1", SendOptions::default()),
        controller
    );
    assert_eq!(received, "G0 X1\n");
    assert_eq!(reply.expect("reply").outcome, ReplyOutcome::Acknowledged);

    // nothing left to redial
    drop(listener);
    drop(reader);
    drop(writer);
    wait_for_state(&link, ConnectionState::Error).await;
    assert!(!link.engine_snapshot().attached);
    assert_eq!(
        *states.lock(),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Connecting,
            ConnectionState::Error,
        ]
    );
}
