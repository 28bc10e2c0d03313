use std::time::{Duration, Instant};

use netlane::{ANY_PORT, IpAddress, SocketSelector, Status, TcpListener, TcpSocket, UdpSocket};

fn bound_udp() -> (UdpSocket, u16) {
    let mut socket = UdpSocket::new();
    assert_eq!(socket.bind(ANY_PORT, IpAddress::ANY), Status::Done);
    let port = socket.local_port();
    (socket, port)
}

#[test]
fn wait_times_out_when_nothing_is_ready() {
    let (socket, _port) = bound_udp();

    let mut selector = SocketSelector::new();
    selector.add(&socket);

    let start = Instant::now();
    assert!(!selector.wait(Some(Duration::from_millis(50))));
    assert!(start.elapsed() >= Duration::from_millis(45));
}

#[test]
fn wait_reports_the_ready_subset() {
    let (quiet, _quiet_port) = bound_udp();
    let (mut busy, busy_port) = bound_udp();

    let mut selector = SocketSelector::new();
    selector.add(&quiet);
    selector.add(&busy);

    let mut sender = UdpSocket::new();
    assert_eq!(sender.send_to(b"wake", IpAddress::LOCALHOST, busy_port), Status::Done);

    assert!(selector.wait(Some(Duration::from_secs(5))));
    assert!(selector.is_ready(&busy));
    assert!(!selector.is_ready(&quiet));

    // Drain, then confirm readiness is a snapshot of the last wait, not a
    // live query.
    let mut buffer = [0u8; 16];
    let (status, _, _, _) = busy.receive_from(&mut buffer);
    assert_eq!(status, Status::Done);
    assert!(selector.is_ready(&busy));

    let _ = quiet.local_port(); // keep both sockets alive through the wait
}

#[test]
fn unregistered_socket_is_never_ready() {
    let (registered, registered_port) = bound_udp();
    let (stranger, _stranger_port) = bound_udp();

    let mut selector = SocketSelector::new();
    selector.add(&registered);

    let mut sender = UdpSocket::new();
    assert_eq!(
        sender.send_to(b"wake", IpAddress::LOCALHOST, registered_port),
        Status::Done
    );

    assert!(selector.wait(Some(Duration::from_secs(5))));
    assert!(!selector.is_ready(&stranger));
}

#[test]
fn removed_socket_is_not_reported() {
    let (socket, port) = bound_udp();

    let mut selector = SocketSelector::new();
    selector.add(&socket);
    selector.remove(&socket);

    let mut sender = UdpSocket::new();
    assert_eq!(sender.send_to(b"wake", IpAddress::LOCALHOST, port), Status::Done);

    assert!(!selector.wait(Some(Duration::from_millis(100))));
    assert!(!selector.is_ready(&socket));
}

#[test]
fn clear_drops_every_registration() {
    let (a, _) = bound_udp();
    let (b, _) = bound_udp();

    let mut selector = SocketSelector::new();
    selector.add(&a);
    selector.add(&b);
    assert_eq!(selector.len(), 2);

    selector.clear();
    assert!(selector.is_empty());
}

#[test]
fn a_socket_without_a_handle_is_not_registered() {
    let socket = UdpSocket::new(); // never bound, no OS handle

    let mut selector = SocketSelector::new();
    selector.add(&socket);
    assert!(selector.is_empty());
}

#[test]
fn listener_readiness_means_pending_connection() {
    let mut listener = TcpListener::new();
    assert_eq!(listener.listen(ANY_PORT, IpAddress::ANY), Status::Done);
    let port = listener.local_port();

    let mut selector = SocketSelector::new();
    selector.add(&listener);

    // Nobody connecting yet.
    assert!(!selector.wait(Some(Duration::from_millis(50))));

    let mut client = TcpSocket::new();
    assert_eq!(
        client.connect(IpAddress::LOCALHOST, port, Duration::from_secs(5)),
        Status::Done
    );

    assert!(selector.wait(Some(Duration::from_secs(5))));
    assert!(selector.is_ready(&listener));

    let mut peer = TcpSocket::new();
    assert_eq!(listener.accept(&mut peer), Status::Done);
}

#[test]
fn stale_registration_is_pruned_not_fatal() {
    let (socket, _) = bound_udp();
    let (live, live_port) = bound_udp();

    let mut selector = SocketSelector::new();
    selector.add(&socket);
    selector.add(&live);

    // Destroy a registered socket without removing it first: the
    // registration goes stale.
    drop(socket);

    let mut sender = UdpSocket::new();
    assert_eq!(sender.send_to(b"wake", IpAddress::LOCALHOST, live_port), Status::Done);

    // The stale entry must not break the wait: the live socket's
    // readiness is still observed.
    assert!(selector.wait(Some(Duration::from_secs(5))));
    assert!(selector.is_ready(&live));
}
