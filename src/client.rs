use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::addr::IpAddress;
use crate::socket::{Status, TcpSocket, sys};

/// How long the receive loop waits for readability before re-checking the
/// stop flag. Bounds how late a disconnect request can be observed.
const RECEIVE_POLL_INTERVAL: Duration = Duration::from_millis(100);

const RECEIVE_BUFFER_SIZE: usize = 4096;

type ConnectedCallback = Box<dyn FnMut() + Send>;
type MessageCallback = Box<dyn FnMut(&[u8]) + Send>;
type DisconnectedCallback = Box<dyn FnMut() + Send>;
type ErrorCallback = Box<dyn FnMut(&str) + Send>;

/// One boxed callable per event, invoked synchronously on whichever thread
/// observes the event (the background thread for everything after the
/// initial connect).
#[derive(Default)]
struct Callbacks {
    connected: Option<ConnectedCallback>,
    message: Option<MessageCallback>,
    disconnected: Option<DisconnectedCallback>,
    error: Option<ErrorCallback>,
}

#[derive(Clone, Copy)]
struct Remote {
    address: IpAddress,
    port: u16,
    timeout: Duration,
}

struct Shared {
    socket: Mutex<TcpSocket>,
    running: AtomicBool,
    connected: AtomicBool,
    auto_reconnect: AtomicBool,
    reconnect_interval_ms: AtomicU64,
    remote: Mutex<Option<Remote>>,
    callbacks: Mutex<Callbacks>,
}

impl Shared {
    fn fire_connected(&self) {
        if let Some(callback) = self.callbacks.lock().unwrap().connected.as_mut() {
            callback();
        }
    }

    fn fire_message(&self, data: &[u8]) {
        if let Some(callback) = self.callbacks.lock().unwrap().message.as_mut() {
            callback(data);
        }
    }

    fn fire_disconnected(&self) {
        if let Some(callback) = self.callbacks.lock().unwrap().disconnected.as_mut() {
            callback();
        }
    }

    fn fire_error(&self, message: &str) {
        if let Some(callback) = self.callbacks.lock().unwrap().error.as_mut() {
            callback(message);
        }
    }
}

/// A TCP client with callback-based event handling.
///
/// `connect` starts exactly one background thread that receives from the
/// server and dispatches the registered callbacks. Outbound sends from the
/// caller's thread and inbound receives on the background thread share the
/// socket under a mutex, one call at a time.
///
/// Callbacks run on the background thread (the initial `on_connected`
/// fires on the connecting thread). A callback may send through the
/// client, but must not call [`disconnect`](TcpClient::disconnect) or
/// re-register callbacks; both would self-deadlock.
///
/// ```no_run
/// use std::time::Duration;
/// use netlane::{IpAddress, TcpClient};
///
/// let mut client = TcpClient::new();
/// client.on_message(|data| println!("received {} bytes", data.len()));
/// client.on_disconnected(|| println!("connection lost"));
///
/// if client.connect(IpAddress::LOCALHOST, 8080, Duration::from_secs(5)) {
///     client.send(b"hello");
/// }
/// ```
pub struct TcpClient {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Default for TcpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpClient {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                socket: Mutex::new(TcpSocket::new()),
                running: AtomicBool::new(false),
                connected: AtomicBool::new(false),
                auto_reconnect: AtomicBool::new(false),
                reconnect_interval_ms: AtomicU64::new(3000),
                remote: Mutex::new(None),
                callbacks: Mutex::new(Callbacks::default()),
            }),
            thread: None,
        }
    }

    /// Sets the callback invoked on every successful connection,
    /// including reconnects.
    pub fn on_connected<F: FnMut() + Send + 'static>(&mut self, callback: F) {
        self.shared.callbacks.lock().unwrap().connected = Some(Box::new(callback));
    }

    /// Sets the callback invoked with every received chunk of data.
    pub fn on_message<F: FnMut(&[u8]) + Send + 'static>(&mut self, callback: F) {
        self.shared.callbacks.lock().unwrap().message = Some(Box::new(callback));
    }

    /// Sets the callback invoked once when the peer disconnects.
    pub fn on_disconnected<F: FnMut() + Send + 'static>(&mut self, callback: F) {
        self.shared.callbacks.lock().unwrap().disconnected = Some(Box::new(callback));
    }

    /// Sets the callback invoked on connection or socket errors.
    pub fn on_error<F: FnMut(&str) + Send + 'static>(&mut self, callback: F) {
        self.shared.callbacks.lock().unwrap().error = Some(Box::new(callback));
    }

    /// Resolves a host name and connects to it.
    ///
    /// Resolution failure is reported through `on_error` and returns false.
    pub fn connect_host(&mut self, host: &str, port: u16, timeout: Duration) -> bool {
        let Some(address) = IpAddress::resolve(host) else {
            self.shared.fire_error(&format!("failed to resolve host: {host}"));
            return false;
        };

        self.connect(address, port, timeout)
    }

    /// Connects to a server and starts the receive thread.
    ///
    /// An existing connection is torn down first. The address, port and
    /// timeout are remembered for auto-reconnect. Returns false (after
    /// firing `on_error`) if the connection attempt does not complete.
    pub fn connect(&mut self, address: IpAddress, port: u16, timeout: Duration) -> bool {
        if self.shared.connected.load(Ordering::SeqCst) || self.thread.is_some() {
            self.disconnect();
        }

        *self.shared.remote.lock().unwrap() = Some(Remote { address, port, timeout });

        let status = {
            let mut socket = self.shared.socket.lock().unwrap();
            *socket = TcpSocket::new();
            socket.connect(address, port, timeout)
        };

        if status != Status::Done {
            self.shared.fire_error("failed to connect to server");
            return false;
        }

        self.shared.running.store(true, Ordering::SeqCst);
        self.shared.connected.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        self.thread = Some(std::thread::spawn(move || receive_loop(&shared)));

        self.shared.fire_connected();
        true
    }

    /// Disconnects from the server and joins the receive thread.
    ///
    /// When this returns the background thread has fully exited. Safe to
    /// call when already disconnected. Must not be called from inside a
    /// callback.
    pub fn disconnect(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.connected.store(false, Ordering::SeqCst);

        self.shared.socket.lock().unwrap().disconnect();

        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Sends raw data to the server. Returns true if the whole buffer was
    /// sent.
    pub fn send(&self, data: &[u8]) -> bool {
        if !self.is_connected() {
            return false;
        }

        self.shared.socket.lock().unwrap().send(data) == Status::Done
    }

    pub fn local_port(&self) -> u16 {
        self.shared.socket.lock().unwrap().local_port()
    }

    pub fn remote_address(&self) -> Option<IpAddress> {
        self.shared.socket.lock().unwrap().remote_address()
    }

    pub fn remote_port(&self) -> u16 {
        self.shared.socket.lock().unwrap().remote_port()
    }

    /// Enables or disables automatic reconnection.
    ///
    /// When enabled, a peer disconnect puts the receive thread into a
    /// retry loop: sleep `interval`, attempt to reconnect with the
    /// originally supplied timeout, and on success fire `on_connected`
    /// again and resume receiving, all on the same thread.
    pub fn set_auto_reconnect(&mut self, enable: bool, interval: Duration) {
        self.shared.auto_reconnect.store(enable, Ordering::SeqCst);
        self.shared
            .reconnect_interval_ms
            .store(interval.as_millis().min(u64::MAX as u128) as u64, Ordering::SeqCst);
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn receive_loop(shared: &Shared) {
    let mut buffer = [0u8; RECEIVE_BUFFER_SIZE];

    while shared.running.load(Ordering::SeqCst) {
        // Wait for readability without holding the socket lock, so sends
        // from the caller's thread are never starved by an idle receive.
        let fd = shared.socket.lock().unwrap().raw_fd();
        let Some(fd) = fd else {
            // Socket torn down under us; the stop flag follows shortly.
            std::thread::sleep(RECEIVE_POLL_INTERVAL);
            continue;
        };

        if let Some(0) = sys::poll_one(fd, libc::POLLIN, Some(RECEIVE_POLL_INTERVAL)) {
            continue;
        }

        if !shared.running.load(Ordering::SeqCst) {
            break;
        }

        let (status, received) = shared.socket.lock().unwrap().receive(&mut buffer);

        match status {
            Status::Done => {
                if received > 0 {
                    shared.fire_message(&buffer[..received]);
                }
            }
            Status::NotReady | Status::Partial => {}
            Status::Disconnected => {
                shared.connected.store(false, Ordering::SeqCst);
                shared.fire_disconnected();

                let retry = shared.auto_reconnect.load(Ordering::SeqCst)
                    && shared.running.load(Ordering::SeqCst);
                if !retry || !try_reconnect(shared) {
                    break;
                }
            }
            Status::Error => {
                // A local disconnect closes the socket under us; that is
                // not an error worth reporting.
                if shared.running.load(Ordering::SeqCst) {
                    shared.fire_error("socket error occurred");
                }
                break;
            }
        }
    }
}

/// Retry loop entered after a disconnect when auto-reconnect is on.
/// Returns true once reconnected; false if told to stop first.
fn try_reconnect(shared: &Shared) -> bool {
    while shared.running.load(Ordering::SeqCst)
        && shared.auto_reconnect.load(Ordering::SeqCst)
        && !shared.connected.load(Ordering::SeqCst)
    {
        let interval = Duration::from_millis(shared.reconnect_interval_ms.load(Ordering::SeqCst));
        std::thread::sleep(interval);

        if !shared.running.load(Ordering::SeqCst) {
            return false;
        }

        let Some(remote) = *shared.remote.lock().unwrap() else {
            return false;
        };

        let status = {
            let mut socket = shared.socket.lock().unwrap();
            *socket = TcpSocket::new();
            socket.connect(remote.address, remote.port, remote.timeout)
        };

        if status == Status::Done {
            shared.connected.store(true, Ordering::SeqCst);
            shared.fire_connected();
            return true;
        }
    }

    false
}
