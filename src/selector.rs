use std::os::fd::RawFd;
use std::time::Duration;

use crate::error::errno;
use crate::socket::sys;

/// A weak reference from a selector to one socket handle.
///
/// Carries the raw descriptor plus a generation token, so a registration
/// left behind by a closed socket can never be confused with a newer socket
/// that happens to reuse the same descriptor number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    fd: RawFd,
    token: u64,
}

impl Registration {
    pub(crate) fn new(fd: RawFd, token: u64) -> Self {
        Self { fd, token }
    }
}

/// Sockets that can be registered with a [`SocketSelector`].
///
/// Implemented by every socket type in this crate. A socket without a live
/// OS handle has no registration and is silently skipped by
/// [`SocketSelector::add`].
pub trait Selectable {
    /// Returns the registration for the socket's current handle, or `None`
    /// if the socket has not been created yet.
    fn registration(&self) -> Option<Registration>;
}

#[derive(Debug)]
struct Entry {
    fd: RawFd,
    token: u64,
    ready: bool,
}

/// Readiness multiplexer over a set of sockets.
///
/// `wait` blocks until at least one registered socket has data available to
/// read (for a listener, until a connection is pending), then `is_ready`
/// answers which ones, against the result of that most recent wait only.
///
/// Registrations are weak: the selector never keeps a socket alive, and a
/// socket closed while still registered leaves a stale entry behind. Stale
/// entries are harmless (the next `wait` detects and drops them), but the
/// clean contract is to [`remove`](SocketSelector::remove) a socket before
/// destroying it.
#[derive(Debug, Default)]
pub struct SocketSelector {
    entries: Vec<Entry>,
}

impl SocketSelector {
    /// Creates an empty selector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a socket to the selector.
    ///
    /// Does nothing if the socket has no OS handle yet. A previous
    /// registration for the same descriptor (necessarily stale, since a
    /// descriptor has one owner) is displaced.
    pub fn add<S: Selectable>(&mut self, socket: &S) {
        let Some(registration) = socket.registration() else {
            return;
        };

        self.entries.retain(|entry| entry.fd != registration.fd);
        self.entries.push(Entry {
            fd: registration.fd,
            token: registration.token,
            ready: false,
        });
    }

    /// Removes a socket from the selector.
    ///
    /// The socket itself is untouched; only the selector's reference to it
    /// goes away.
    pub fn remove<S: Selectable>(&mut self, socket: &S) {
        if let Some(registration) = socket.registration() {
            self.entries.retain(|entry| entry.token != registration.token);
        }
    }

    /// Drops every registration.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Waits until at least one registered socket is ready to read.
    ///
    /// `None` waits forever; `Some(t)` gives up after `t` and returns
    /// false. Readiness includes hangup and error conditions, so that a
    /// subsequent receive can observe the disconnect. Registrations whose
    /// descriptor turns out to be closed are dropped here.
    pub fn wait(&mut self, timeout: Option<Duration>) -> bool {
        for entry in &mut self.entries {
            entry.ready = false;
        }

        if self.entries.is_empty() {
            // Nothing to watch; honor the timeout rather than spin.
            if let Some(t) = timeout {
                std::thread::sleep(t);
            }
            return false;
        }

        let mut pollfds: Vec<libc::pollfd> = self
            .entries
            .iter()
            .map(|entry| libc::pollfd {
                fd: entry.fd,
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();

        let timeout_ms = sys::poll_timeout_ms(timeout);
        let count = loop {
            let result = unsafe {
                libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout_ms)
            };
            if result >= 0 {
                break result;
            }
            if errno() != libc::EINTR {
                return false;
            }
        };

        if count == 0 {
            return false;
        }

        let mut any_ready = false;
        let mut stale = Vec::new();
        for (index, pollfd) in pollfds.iter().enumerate() {
            if pollfd.revents & libc::POLLNVAL != 0 {
                stale.push(self.entries[index].token);
            } else if pollfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0 {
                self.entries[index].ready = true;
                any_ready = true;
            }
        }

        if !stale.is_empty() {
            self.entries.retain(|entry| !stale.contains(&entry.token));
        }

        any_ready
    }

    /// Tells whether a socket was ready after the most recent `wait`.
    ///
    /// Only meaningful for sockets that are actually registered; a query
    /// against the last poll result, not a live check.
    pub fn is_ready<S: Selectable>(&self, socket: &S) -> bool {
        let Some(registration) = socket.registration() else {
            return false;
        };

        self.entries
            .iter()
            .any(|entry| entry.token == registration.token && entry.ready)
    }
}
