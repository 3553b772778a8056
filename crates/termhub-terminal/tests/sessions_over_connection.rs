use std::time::Duration;

use pretty_assertions::assert_eq;
use termhub_connection::testing::{ManualScheduler, RecordingTransport};
use termhub_connection::{
    ConnectionManager, ConnectionOptions, ConnectionSignal, EndpointResolver, Incoming,
    SocketEvent, TransportEvent,
};
use termhub_terminal::{ScreenViewFactory, SessionRegistry, Surface};
use termhub_types::{CapacityError, ReadyState, DEFAULT_TERMINAL_ENDPOINT};

type Manager = ConnectionManager<RecordingTransport, ManualScheduler>;

fn connection() -> Manager {
    ConnectionManager::new(
        RecordingTransport::default(),
        ManualScheduler::default(),
        EndpointResolver::new("localhost:8000", false),
        DEFAULT_TERMINAL_ENDPOINT,
        ConnectionOptions::terminal(),
    )
}

fn registry() -> SessionRegistry {
    let mut registry = SessionRegistry::new(ScreenViewFactory::default());
    registry.set_surface(Surface::new(720, 408));
    registry
}

/// Deliver an event and run the same reaction the client runtime does
fn deliver(conn: &mut Manager, registry: &mut SessionRegistry, event: SocketEvent) {
    let socket = conn.current_socket().expect("no current socket");
    match conn.handle_event(TransportEvent::new(socket, event)) {
        Some(ConnectionSignal::Opened) => registry.on_connection_open(conn),
        Some(ConnectionSignal::Message(incoming)) => registry.write_output(incoming.as_bytes()),
        _ => {}
    }
}

#[test]
fn test_first_session_opens_connection_and_sizes_pty() {
    let mut conn = connection();
    let mut registry = registry();
    assert_eq!(conn.ready_state(), ReadyState::Closed);

    registry.create_session(&mut conn).unwrap();
    assert_eq!(conn.ready_state(), ReadyState::Connecting);
    assert_eq!(
        conn.transport().opened[0].1,
        "ws://localhost:8000/ws/terminal/pty0/"
    );

    deliver(&mut conn, &mut registry, SocketEvent::Opened);
    assert_eq!(
        conn.transport().sent_frames(),
        vec![
            r#"{"type":"resize","rows":24,"cols":80}"#,
            "stty rows 24 cols 80\n",
        ]
    );

    // A second session reuses the live socket
    registry.create_session(&mut conn).unwrap();
    assert_eq!(conn.transport().opened.len(), 1);
}

#[test]
fn test_hello_survives_switch_round_trip() {
    let mut conn = connection();
    let mut registry = registry();

    let s1 = registry.create_session(&mut conn).unwrap();
    deliver(&mut conn, &mut registry, SocketEvent::Opened);
    deliver(
        &mut conn,
        &mut registry,
        SocketEvent::Message(Incoming::Binary(b"hello".to_vec())),
    );

    let s2 = registry.create_session(&mut conn).unwrap();
    deliver(
        &mut conn,
        &mut registry,
        SocketEvent::Message(Incoming::Text("$ ".to_string())),
    );
    registry.change_to_session(s1, Some(s2)).unwrap();

    let contents = registry.session(s1).unwrap().contents().unwrap();
    assert!(contents.starts_with("hello"), "got {:?}", contents);
    assert_eq!(registry.active_session_id(), Some(s1));
}

#[test]
fn test_eleventh_session_fails() {
    let mut conn = connection();
    let mut registry = registry();
    for _ in 0..10 {
        registry.create_session(&mut conn).unwrap();
    }
    assert_eq!(
        registry.create_session(&mut conn),
        Err(CapacityError { max: 10 })
    );
    assert_eq!(registry.len(), 10);
}

#[test]
fn test_terminal_endpoint_gives_up_after_ten_closes() {
    let mut conn = connection();
    let mut registry = registry();
    registry.create_session(&mut conn).unwrap();

    for attempt in 1..=10 {
        deliver(
            &mut conn,
            &mut registry,
            SocketEvent::Closed {
                code: Some(1006),
                reason: String::new(),
            },
        );
        let timer = conn.scheduler_mut().fire_next().expect("timer scheduled");
        assert_eq!(
            conn.handle_timer(timer),
            Some(ConnectionSignal::Reconnecting { attempt })
        );
    }

    deliver(
        &mut conn,
        &mut registry,
        SocketEvent::Closed {
            code: Some(1006),
            reason: String::new(),
        },
    );
    assert_eq!(conn.ready_state(), ReadyState::Closed);
    assert!(conn.scheduler().pending().is_empty());
    assert!(!conn.has_pending_reconnect());
    assert_eq!(conn.transport().opened.len(), 11);
    assert_eq!(
        conn.options().reconnect_interval,
        Duration::from_millis(10_000)
    );
}
