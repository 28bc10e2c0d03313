use tracing::warn;

use crate::addr::IpAddress;
use crate::selector::{Registration, Selectable};
use crate::socket::core::{SocketCore, SocketKind};
use crate::socket::{Status, TcpSocket, sys};

/// A passive-open TCP socket that produces connected [`TcpSocket`]s.
#[derive(Debug)]
pub struct TcpListener {
    core: SocketCore,
}

impl Default for TcpListener {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpListener {
    /// Creates a listener. No OS resource is allocated until
    /// [`listen`](TcpListener::listen).
    pub fn new() -> Self {
        Self {
            core: SocketCore::new(SocketKind::Tcp),
        }
    }

    /// Sets the blocking mode for all subsequent calls.
    ///
    /// This decides whether [`accept`](TcpListener::accept) blocks.
    pub fn set_blocking(&mut self, blocking: bool) {
        self.core.set_blocking(blocking);
    }

    pub fn is_blocking(&self) -> bool {
        self.core.is_blocking()
    }

    /// Port the listener is bound to, or 0 if not listening.
    ///
    /// Useful with [`ANY_PORT`](crate::ANY_PORT) to learn which port the
    /// system picked.
    pub fn local_port(&self) -> u16 {
        self.core
            .raw_fd()
            .and_then(sys::local_addr)
            .map(|(_, port)| port)
            .unwrap_or(0)
    }

    /// Starts listening on a port.
    ///
    /// Any previous binding is closed and a fresh socket created. Binding
    /// to the broadcast address is rejected. `SO_REUSEADDR` is set so a
    /// restarted listener is not locked out of its port by connections
    /// lingering in TIME_WAIT.
    pub fn listen(&mut self, port: u16, address: IpAddress) -> Status {
        self.close();
        self.core.create();

        if address == IpAddress::BROADCAST {
            return Status::Error;
        }

        let Some(fd) = self.core.raw_fd() else {
            return Status::Error;
        };

        if let Err(err) = sys::set_int_option(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, 1, "SO_REUSEADDR") {
            warn!("failed to set SO_REUSEADDR on listener: {err}");
        }

        if let Err(err) = sys::bind(fd, address, port) {
            warn!("failed to bind listener socket: {err}");
            return Status::Error;
        }

        if let Err(err) = sys::listen(fd) {
            warn!("failed to listen on port {port}: {err}");
            return Status::Error;
        }

        Status::Done
    }

    /// Stops listening and closes the socket.
    pub fn close(&mut self) {
        self.core.close();
    }

    /// Accepts an incoming connection.
    ///
    /// In blocking mode, waits until a peer connects. On success `socket`
    /// is re-initialized with the new connection's handle, replacing
    /// whatever it previously held.
    pub fn accept(&mut self, socket: &mut TcpSocket) -> Status {
        let Some(fd) = self.core.raw_fd() else {
            warn!("failed to accept a new connection: the socket is not listening");
            return Status::Error;
        };

        match sys::accept(fd) {
            Ok((remote, _, _)) => {
                socket.reset_with(remote);
                Status::Done
            }
            Err(status) => status,
        }
    }
}

impl Selectable for TcpListener {
    fn registration(&self) -> Option<Registration> {
        self.core.registration()
    }
}
