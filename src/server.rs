use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::addr::IpAddress;
use crate::selector::SocketSelector;
use crate::socket::{Status, TcpListener, TcpSocket};

/// Identifier assigned to one accepted connection, stable for its
/// lifetime. Allocation starts at 1 and strictly increases; ids are never
/// reused within a server's lifetime, even as clients disconnect.
pub type ClientId = u64;

/// How long one pass of the server loop waits for readiness. Bounds how
/// late a stop request can be observed.
const SELECT_TIMEOUT: Duration = Duration::from_millis(100);

const RECEIVE_BUFFER_SIZE: usize = 4096;

type ConnectionCallback = Box<dyn FnMut(ClientId, IpAddress) + Send>;
type MessageCallback = Box<dyn FnMut(ClientId, &[u8]) + Send>;
type DisconnectionCallback = Box<dyn FnMut(ClientId) + Send>;

#[derive(Default)]
struct Callbacks {
    connection: Option<ConnectionCallback>,
    message: Option<MessageCallback>,
    disconnection: Option<DisconnectionCallback>,
}

struct ClientInfo {
    socket: TcpSocket,
    address: IpAddress,
}

struct Shared {
    running: AtomicBool,
    next_client_id: AtomicU64,
    local_port: AtomicU16,
    clients: Mutex<HashMap<ClientId, ClientInfo>>,
    callbacks: Mutex<Callbacks>,
}

impl Shared {
    fn fire_connection(&self, id: ClientId, address: IpAddress) {
        if let Some(callback) = self.callbacks.lock().unwrap().connection.as_mut() {
            callback(id, address);
        }
    }

    fn fire_message(&self, id: ClientId, data: &[u8]) {
        if let Some(callback) = self.callbacks.lock().unwrap().message.as_mut() {
            callback(id, data);
        }
    }

    fn fire_disconnection(&self, id: ClientId) {
        if let Some(callback) = self.callbacks.lock().unwrap().disconnection.as_mut() {
            callback(id);
        }
    }
}

/// A TCP server multiplexing arbitrarily many clients on one background
/// thread.
///
/// The thread waits on a [`SocketSelector`] over the listener and every
/// connected client, accepting new connections and dispatching received
/// data to the registered callbacks. All registry access, the background
/// scan as well as [`send`](TcpServer::send) /
/// [`broadcast`](TcpServer::broadcast) /
/// [`disconnect`](TcpServer::disconnect) from other threads included, is
/// serialized under one lock.
///
/// Callbacks run on the server thread, outside the registry lock, so they
/// may call back into the server; they must not call
/// [`stop`](TcpServer::stop), which joins that same thread.
///
/// ```no_run
/// use netlane::{IpAddress, TcpServer};
///
/// let mut server = TcpServer::new();
/// server.on_connection(|id, addr| println!("client {id} connected from {addr}"));
/// server.on_message(|id, data| println!("client {id} sent {} bytes", data.len()));
/// server.on_disconnection(|id| println!("client {id} left"));
///
/// server.start(8080, IpAddress::ANY);
/// ```
pub struct TcpServer {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Default for TcpServer {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpServer {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                next_client_id: AtomicU64::new(1),
                local_port: AtomicU16::new(0),
                clients: Mutex::new(HashMap::new()),
                callbacks: Mutex::new(Callbacks::default()),
            }),
            thread: None,
        }
    }

    /// Sets the callback invoked when a client connects.
    pub fn on_connection<F: FnMut(ClientId, IpAddress) + Send + 'static>(&mut self, callback: F) {
        self.shared.callbacks.lock().unwrap().connection = Some(Box::new(callback));
    }

    /// Sets the callback invoked with every chunk of data a client sends.
    pub fn on_message<F: FnMut(ClientId, &[u8]) + Send + 'static>(&mut self, callback: F) {
        self.shared.callbacks.lock().unwrap().message = Some(Box::new(callback));
    }

    /// Sets the callback invoked when a client disconnects.
    pub fn on_disconnection<F: FnMut(ClientId) + Send + 'static>(&mut self, callback: F) {
        self.shared.callbacks.lock().unwrap().disconnection = Some(Box::new(callback));
    }

    /// Binds the listening port and spawns the server thread.
    ///
    /// Returns false if the server is already running or the port cannot
    /// be bound.
    pub fn start(&mut self, port: u16, address: IpAddress) -> bool {
        if self.shared.running.load(Ordering::SeqCst) {
            return false;
        }

        // Reap a thread left over from a previous run.
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }

        let mut listener = TcpListener::new();
        if listener.listen(port, address) != Status::Done {
            return false;
        }

        self.shared.local_port.store(listener.local_port(), Ordering::SeqCst);
        self.shared.running.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        self.thread = Some(std::thread::spawn(move || server_loop(&shared, listener)));

        true
    }

    /// Stops the server thread and drops every client.
    ///
    /// When this returns the thread has fully exited and all client
    /// sockets are closed. No disconnection callbacks fire for a bulk
    /// stop. Safe to call when not running; must not be called from
    /// inside a callback.
    pub fn stop(&mut self) {
        if !self.shared.running.load(Ordering::SeqCst) {
            return;
        }

        self.shared.running.store(false, Ordering::SeqCst);

        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }

        self.shared.clients.lock().unwrap().clear();
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Port the server is listening on, or 0 if it never started.
    ///
    /// Useful with [`ANY_PORT`](crate::ANY_PORT) to learn which port the
    /// system picked.
    pub fn local_port(&self) -> u16 {
        self.shared.local_port.load(Ordering::SeqCst)
    }

    /// Sends raw data to one client. Returns false if the client is
    /// unknown or the send did not complete.
    pub fn send(&self, client_id: ClientId, data: &[u8]) -> bool {
        let mut clients = self.shared.clients.lock().unwrap();

        match clients.get_mut(&client_id) {
            Some(client) => client.socket.send(data) == Status::Done,
            None => false,
        }
    }

    /// Sends raw data to every connected client.
    pub fn broadcast(&self, data: &[u8]) {
        let mut clients = self.shared.clients.lock().unwrap();

        for client in clients.values_mut() {
            let _ = client.socket.send(data);
        }
    }

    /// Disconnects one client and fires its disconnection callback.
    ///
    /// The client's socket closes immediately; the server thread prunes
    /// its stale selector registration on the next wait.
    pub fn disconnect(&self, client_id: ClientId) {
        let removed = self.shared.clients.lock().unwrap().remove(&client_id);

        if removed.is_some() {
            self.shared.fire_disconnection(client_id);
        }
    }

    /// Number of currently connected clients.
    pub fn client_count(&self) -> usize {
        self.shared.clients.lock().unwrap().len()
    }

    /// Remote address of one connected client, or `None` if unknown.
    pub fn client_address(&self, client_id: ClientId) -> Option<IpAddress> {
        self.shared
            .clients
            .lock()
            .unwrap()
            .get(&client_id)
            .map(|client| client.address)
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn server_loop(shared: &Shared, mut listener: TcpListener) {
    let mut selector = SocketSelector::new();
    selector.add(&listener);

    let mut buffer = [0u8; RECEIVE_BUFFER_SIZE];

    while shared.running.load(Ordering::SeqCst) {
        if !selector.wait(Some(SELECT_TIMEOUT)) {
            continue;
        }

        // New connection pending?
        if selector.is_ready(&listener) {
            let mut socket = TcpSocket::new();
            if listener.accept(&mut socket) == Status::Done {
                let id = shared.next_client_id.fetch_add(1, Ordering::SeqCst);
                let address = socket.remote_address().unwrap_or(IpAddress::ANY);

                selector.add(&socket);
                shared
                    .clients
                    .lock()
                    .unwrap()
                    .insert(id, ClientInfo { socket, address });

                shared.fire_connection(id, address);
            }
        }

        // Scan the clients that are ready, deferring removal until the
        // scan is over so the set is not mutated while iterated.
        let mut messages: Vec<(ClientId, Vec<u8>)> = Vec::new();
        let mut to_remove: Vec<ClientId> = Vec::new();

        {
            let mut clients = shared.clients.lock().unwrap();

            for (id, client) in clients.iter_mut() {
                if !selector.is_ready(&client.socket) {
                    continue;
                }

                let (status, received) = client.socket.receive(&mut buffer);
                match status {
                    Status::Done => {
                        if received > 0 {
                            messages.push((*id, buffer[..received].to_vec()));
                        }
                    }
                    Status::Disconnected => to_remove.push(*id),
                    _ => {}
                }
            }

            for id in &to_remove {
                if let Some(client) = clients.remove(id) {
                    selector.remove(&client.socket);
                }
            }
        }

        // Dispatch outside the registry lock: a callback may well call
        // send/broadcast, which takes that lock.
        for (id, data) in &messages {
            shared.fire_message(*id, data);
        }
        for id in to_remove {
            shared.fire_disconnection(id);
        }
    }
}
