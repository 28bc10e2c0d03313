use std::sync::mpsc;
use std::time::{Duration, Instant};

use netlane::{ANY_PORT, ClientId, IpAddress, TcpClient, TcpServer};

const RECV_TIMEOUT: Duration = Duration::from_secs(10);

/// Starts a server on an OS-picked port.
fn started_server() -> (TcpServer, u16) {
    let mut server = TcpServer::new();
    assert!(server.start(ANY_PORT, IpAddress::ANY));
    let port = server.local_port();
    assert_ne!(port, 0);
    (server, port)
}

#[test]
fn start_twice_is_refused() {
    let (mut server, _port) = started_server();
    assert!(server.is_running());
    assert!(!server.start(ANY_PORT, IpAddress::ANY));
    server.stop();
    assert!(!server.is_running());
}

#[test]
fn connect_to_dead_port_fails_with_error_callback() {
    // Bind-then-drop: the port exists but nobody listens.
    let port = {
        let (mut server, port) = started_server();
        server.stop();
        port
    };

    let (error_tx, error_rx) = mpsc::channel::<String>();

    let mut client = TcpClient::new();
    client.on_error(move |message| {
        let _ = error_tx.send(message.to_owned());
    });

    assert!(!client.connect(IpAddress::LOCALHOST, port, Duration::from_secs(2)));
    assert!(!client.is_connected());
    assert!(error_rx.recv_timeout(RECV_TIMEOUT).is_ok());
}

#[test]
fn resolve_failure_fires_error_callback() {
    let (error_tx, error_rx) = mpsc::channel::<String>();

    let mut client = TcpClient::new();
    client.on_error(move |message| {
        let _ = error_tx.send(message.to_owned());
    });

    assert!(!client.connect_host("definitely-not-a-real-host.invalid", 9, Duration::from_secs(2)));
    let message = error_rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert!(message.contains("resolve"));
}

#[test]
fn round_trip_through_server_and_client_callbacks() {
    let (mut server, port) = started_server();

    let (connection_tx, connection_rx) = mpsc::channel::<(ClientId, IpAddress)>();
    let (request_tx, request_rx) = mpsc::channel::<(ClientId, Vec<u8>)>();
    server.on_connection(move |id, address| {
        let _ = connection_tx.send((id, address));
    });
    server.on_message(move |id, data| {
        let _ = request_tx.send((id, data.to_vec()));
    });

    let (reply_tx, reply_rx) = mpsc::channel::<Vec<u8>>();

    let mut client = TcpClient::new();
    client.on_message(move |data| {
        let _ = reply_tx.send(data.to_vec());
    });

    assert!(client.connect(IpAddress::LOCALHOST, port, Duration::from_secs(5)));
    assert!(client.is_connected());

    let (id, address) = connection_rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(address, IpAddress::LOCALHOST);
    assert_eq!(server.client_address(id), Some(IpAddress::LOCALHOST));

    assert!(client.send(b"ping"));
    let (from, request) = request_rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(from, id);
    assert_eq!(request, b"ping");

    // Echo back from the main thread, through the server's send path.
    assert!(server.send(id, b"pong"));
    let reply = reply_rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(reply, b"pong");

    client.disconnect();
    server.stop();
}

#[test]
fn client_ids_start_at_one_and_never_repeat() {
    let (mut server, port) = started_server();

    let (connection_tx, connection_rx) = mpsc::channel::<ClientId>();
    let (disconnection_tx, disconnection_rx) = mpsc::channel::<ClientId>();
    server.on_connection(move |id, _| {
        let _ = connection_tx.send(id);
    });
    server.on_disconnection(move |id| {
        let _ = disconnection_tx.send(id);
    });

    let mut ids = Vec::new();
    for _ in 0..3 {
        let mut client = TcpClient::new();
        assert!(client.connect(IpAddress::LOCALHOST, port, Duration::from_secs(5)));
        ids.push(connection_rx.recv_timeout(RECV_TIMEOUT).unwrap());

        client.disconnect();
        let gone = disconnection_rx.recv_timeout(RECV_TIMEOUT).unwrap();
        assert_eq!(gone, *ids.last().unwrap());
    }

    assert_eq!(ids, vec![1, 2, 3]);

    let deadline = Instant::now() + RECV_TIMEOUT;
    while server.client_count() != 0 {
        assert!(Instant::now() < deadline);
        std::thread::sleep(Duration::from_millis(10));
    }

    server.stop();
}

#[test]
fn broadcast_reaches_every_client() {
    let (mut server, port) = started_server();

    let (connection_tx, connection_rx) = mpsc::channel::<ClientId>();
    server.on_connection(move |id, _| {
        let _ = connection_tx.send(id);
    });

    let (first_tx, first_rx) = mpsc::channel::<Vec<u8>>();
    let mut first = TcpClient::new();
    first.on_message(move |data| {
        let _ = first_tx.send(data.to_vec());
    });

    let (second_tx, second_rx) = mpsc::channel::<Vec<u8>>();
    let mut second = TcpClient::new();
    second.on_message(move |data| {
        let _ = second_tx.send(data.to_vec());
    });

    assert!(first.connect(IpAddress::LOCALHOST, port, Duration::from_secs(5)));
    assert!(second.connect(IpAddress::LOCALHOST, port, Duration::from_secs(5)));
    connection_rx.recv_timeout(RECV_TIMEOUT).unwrap();
    connection_rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(server.client_count(), 2);

    server.broadcast(b"to-everyone");

    assert_eq!(first_rx.recv_timeout(RECV_TIMEOUT).unwrap(), b"to-everyone");
    assert_eq!(second_rx.recv_timeout(RECV_TIMEOUT).unwrap(), b"to-everyone");
}

#[test]
fn server_side_disconnect_notifies_the_client() {
    let (mut server, port) = started_server();

    let (connection_tx, connection_rx) = mpsc::channel::<ClientId>();
    let (disconnection_tx, disconnection_rx) = mpsc::channel::<ClientId>();
    server.on_connection(move |id, _| {
        let _ = connection_tx.send(id);
    });
    server.on_disconnection(move |id| {
        let _ = disconnection_tx.send(id);
    });

    let (dropped_tx, dropped_rx) = mpsc::channel::<()>();
    let mut client = TcpClient::new();
    client.on_disconnected(move || {
        let _ = dropped_tx.send(());
    });

    assert!(client.connect(IpAddress::LOCALHOST, port, Duration::from_secs(5)));
    let id = connection_rx.recv_timeout(RECV_TIMEOUT).unwrap();

    server.disconnect(id);
    assert_eq!(disconnection_rx.recv_timeout(RECV_TIMEOUT).unwrap(), id);
    dropped_rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(server.client_count(), 0);
}

#[test]
fn send_to_unknown_client_is_refused() {
    let (server, _port) = started_server();
    assert!(!server.send(42, b"nobody home"));
}

#[test]
fn auto_reconnect_fires_connected_again_and_spaces_attempts() {
    let (mut server, port) = started_server();

    let (connection_tx, connection_rx) = mpsc::channel::<ClientId>();
    server.on_connection(move |id, _| {
        let _ = connection_tx.send(id);
    });

    let interval = Duration::from_millis(200);

    let (connected_tx, connected_rx) = mpsc::channel::<Instant>();
    let (dropped_tx, dropped_rx) = mpsc::channel::<Instant>();

    let mut client = TcpClient::new();
    client.on_connected(move || {
        let _ = connected_tx.send(Instant::now());
    });
    client.on_disconnected(move || {
        let _ = dropped_tx.send(Instant::now());
    });
    client.set_auto_reconnect(true, interval);

    assert!(client.connect(IpAddress::LOCALHOST, port, Duration::from_secs(5)));
    connected_rx.recv_timeout(RECV_TIMEOUT).unwrap();
    let first_id = connection_rx.recv_timeout(RECV_TIMEOUT).unwrap();

    // Kick the client from the server side; the client should come back
    // on its own.
    server.disconnect(first_id);

    let dropped_at = dropped_rx.recv_timeout(RECV_TIMEOUT).unwrap();
    let reconnected_at = connected_rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert!(
        reconnected_at.duration_since(dropped_at) >= interval,
        "reconnect attempt came earlier than the configured interval"
    );

    let second_id = connection_rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert!(second_id > first_id);
    assert!(client.is_connected());

    // Exactly one reconnect: no further connected events are pending.
    assert!(connected_rx.recv_timeout(Duration::from_millis(500)).is_err());

    client.disconnect();
    server.stop();
}

#[test]
fn stopping_the_server_disconnects_clients() {
    let (mut server, port) = started_server();

    let (dropped_tx, dropped_rx) = mpsc::channel::<()>();
    let mut client = TcpClient::new();
    client.on_disconnected(move || {
        let _ = dropped_tx.send(());
    });

    assert!(client.connect(IpAddress::LOCALHOST, port, Duration::from_secs(5)));

    let deadline = Instant::now() + RECV_TIMEOUT;
    while server.client_count() != 1 {
        assert!(Instant::now() < deadline);
        std::thread::sleep(Duration::from_millis(10));
    }

    server.stop();
    assert!(!server.is_running());

    // Dropping the registry closed the socket: the client notices.
    dropped_rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert!(!client.is_connected());
}

#[test]
fn disconnect_when_never_connected_is_safe() {
    let mut client = TcpClient::new();
    client.disconnect();
    client.disconnect();
    assert!(!client.is_connected());
    assert!(!client.send(b"nope"));
}
