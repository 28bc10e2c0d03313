use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

use crate::selector::Registration;
use crate::socket::sys;

/// Monotonic source of selector registration tokens.
///
/// Tokens identify one *handle*, not one socket value: a socket that is
/// closed and re-created gets a fresh token, so a selector can tell a stale
/// registration apart from a new socket that recycled the same descriptor.
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Protocol of the underlying descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SocketKind {
	Tcp,
	Udp,
}

impl SocketKind {
	fn sock_type(self) -> libc::c_int {
		match self {
			SocketKind::Tcp => libc::SOCK_STREAM,
			SocketKind::Udp => libc::SOCK_DGRAM,
		}
	}
}

/// Shared lifecycle state for every socket type.
///
/// Owns the descriptor (at most one owner, closed exactly once on drop),
/// remembers the blocking mode so it can be applied to handles created
/// later, and carries the selector registration token for the current
/// handle. Construction allocates no OS resource; creation is deferred to
/// the first operation that needs a live descriptor.
#[derive(Debug)]
pub(crate) struct SocketCore {
	kind: SocketKind,
	fd: Option<OwnedFd>,
	blocking: bool,
	token: u64,
}

impl SocketCore {
	pub(crate) fn new(kind: SocketKind) -> Self {
		Self {
			kind,
			fd: None,
			blocking: true,
			token: 0,
		}
	}

	/// Returns the raw descriptor, if one exists.
	pub(crate) fn raw_fd(&self) -> Option<RawFd> {
		self.fd.as_ref().map(|fd| fd.as_raw_fd())
	}

	/// Creates the descriptor if it does not exist yet.
	pub(crate) fn create(&mut self) {
		if self.fd.is_some() {
			return;
		}

		match sys::create_socket(self.kind.sock_type()) {
			Ok(fd) => self.adopt(fd),
			Err(err) => warn!("failed to create socket: {err}"),
		}
	}

	/// Adopts an existing descriptor (e.g. one returned by accept).
	///
	/// Does nothing if a descriptor is already held, mirroring lazy
	/// creation: the first handle wins.
	pub(crate) fn adopt(&mut self, fd: OwnedFd) {
		if self.fd.is_some() {
			return;
		}

		let raw = fd.as_raw_fd();
		self.fd = Some(fd);
		self.token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);

		// Apply the blocking mode chosen before the handle existed.
		if let Err(err) = sys::set_blocking(raw, self.blocking) {
			warn!("failed to apply blocking mode: {err}");
		}

		match self.kind {
			SocketKind::Tcp => {
				// Disable the Nagle algorithm so small packets go out
				// without buffering delay.
				if let Err(err) =
					sys::set_int_option(raw, libc::IPPROTO_TCP, libc::TCP_NODELAY, 1, "TCP_NODELAY")
				{
					warn!("all your TCP packets will be buffered: {err}");
				}
			}
			SocketKind::Udp => {
				// Enable broadcast by default for UDP sockets.
				if let Err(err) =
					sys::set_int_option(raw, libc::SOL_SOCKET, libc::SO_BROADCAST, 1, "SO_BROADCAST")
				{
					warn!("failed to enable broadcast on UDP socket: {err}");
				}
			}
		}
	}

	/// Closes the descriptor. Safe to call repeatedly.
	pub(crate) fn close(&mut self) {
		self.fd = None;
		self.token = 0;
	}

	/// Sets the blocking mode, applying it now if a handle exists and
	/// remembering it for handles created later.
	pub(crate) fn set_blocking(&mut self, blocking: bool) {
		if let Some(fd) = self.raw_fd()
			&& let Err(err) = sys::set_blocking(fd, blocking)
		{
			warn!("failed to change blocking mode: {err}");
		}
		self.blocking = blocking;
	}

	pub(crate) fn is_blocking(&self) -> bool {
		self.blocking
	}

	/// Returns the selector registration for the current handle.
	pub(crate) fn registration(&self) -> Option<Registration> {
		self.raw_fd().map(|fd| Registration::new(fd, self.token))
	}
}
