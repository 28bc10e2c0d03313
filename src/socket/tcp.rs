use std::os::fd::OwnedFd;
use std::time::Duration;

use tracing::warn;

use crate::addr::IpAddress;
use crate::packet::Packet;
use crate::selector::{Registration, Selectable};
use crate::socket::core::{SocketCore, SocketKind};
use crate::socket::{Status, sys};

/// Receive-side state of one in-flight framed message.
///
/// Lives across non-blocking calls: first the 4-byte length prefix is
/// accumulated, then the body. Reset to empty once the frame completes or
/// the connection dies.
#[derive(Debug, Default)]
struct PendingPacket {
	size_bytes: [u8; 4],
	size_received: usize,
	data: Vec<u8>,
}

impl PendingPacket {
	fn reset(&mut self) {
		self.size_bytes = [0; 4];
		self.size_received = 0;
		self.data.clear();
	}
}

/// A connection-oriented TCP socket.
///
/// On top of the raw byte-stream operations (`send`, `send_partial`,
/// `receive`), the packet operations add a framing layer: each
/// [`Packet`] travels as a 4-byte big-endian length followed by the
/// serialized body, and arrives as exactly one whole packet on the other
/// side no matter how the stream fragments in between.
#[derive(Debug)]
pub struct TcpSocket {
	core: SocketCore,
	pending: PendingPacket,
	send_buffer: Vec<u8>,
	send_pos: usize,
}

impl Default for TcpSocket {
	fn default() -> Self {
		Self::new()
	}
}

impl TcpSocket {
	/// Creates a socket. No OS resource is allocated until the first
	/// operation that needs one.
	pub fn new() -> Self {
		Self {
			core: SocketCore::new(SocketKind::Tcp),
			pending: PendingPacket::default(),
			send_buffer: Vec::new(),
			send_pos: 0,
		}
	}

	/// Sets the blocking mode for all subsequent calls.
	///
	/// Blocking calls suspend the thread until they can complete;
	/// non-blocking calls return [`Status::NotReady`] immediately instead.
	/// Sockets start out blocking.
	pub fn set_blocking(&mut self, blocking: bool) {
		self.core.set_blocking(blocking);
	}

	pub fn is_blocking(&self) -> bool {
		self.core.is_blocking()
	}

	/// Port the socket is bound to locally, or 0 if not connected.
	pub fn local_port(&self) -> u16 {
		self.core
			.raw_fd()
			.and_then(sys::local_addr)
			.map(|(_, port)| port)
			.unwrap_or(0)
	}

	/// Address of the connected peer, or `None` if not connected.
	pub fn remote_address(&self) -> Option<IpAddress> {
		self.core.raw_fd().and_then(sys::peer_addr).map(|(addr, _)| addr)
	}

	/// Port of the connected peer, or 0 if not connected.
	pub fn remote_port(&self) -> u16 {
		self.core
			.raw_fd()
			.and_then(sys::peer_addr)
			.map(|(_, port)| port)
			.unwrap_or(0)
	}

	/// Connects to a remote peer.
	///
	/// With `Duration::ZERO` the attempt uses a plain blocking connect and
	/// may take as long as the OS allows. With a non-zero timeout the
	/// attempt is abandoned once the timeout elapses. An already-connected
	/// socket is disconnected first.
	pub fn connect(&mut self, address: IpAddress, port: u16, timeout: Duration) -> Status {
		// Start from a fresh handle.
		self.disconnect();
		self.core.create();

		let Some(fd) = self.core.raw_fd() else {
			return Status::Error;
		};
		let addr = sys::sockaddr_in(address, port);

		if timeout.is_zero() {
			let result = unsafe {
				libc::connect(
					fd,
					&addr as *const _ as *const libc::sockaddr,
					std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
				)
			};
			if result == -1 {
				return sys::error_status();
			}
			return Status::Done;
		}

		// Timed attempt: switch to non-blocking so connect returns
		// immediately, then wait for writability up to the timeout.
		let was_blocking = self.is_blocking();
		if was_blocking {
			self.set_blocking(false);
		}

		let result = unsafe {
			libc::connect(
				fd,
				&addr as *const _ as *const libc::sockaddr,
				std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
			)
		};

		if result == 0 {
			// Immediate success, possible on localhost.
			if was_blocking {
				self.set_blocking(true);
			}
			return Status::Done;
		}

		let status = sys::error_status();
		if status != Status::NotReady {
			if was_blocking {
				self.set_blocking(true);
			}
			return status;
		}

		// The caller runs this socket non-blocking: the connection attempt
		// is in progress, report that and let them poll.
		if !was_blocking {
			return Status::NotReady;
		}

		let status = match sys::poll_one(fd, libc::POLLOUT, Some(timeout)) {
			Some(0) => Status::NotReady,
			Some(_) => {
				let err = sys::take_socket_error(fd);
				if err == 0 {
					Status::Done
				} else {
					sys::status_for_errno(err)
				}
			}
			None => Status::Error,
		};

		self.set_blocking(true);
		status
	}

	/// Closes the connection gracefully.
	///
	/// Pending framing state is discarded. Has no effect on a socket that
	/// is not connected.
	pub fn disconnect(&mut self) {
		self.core.close();
		self.pending.reset();
		self.send_buffer.clear();
		self.send_pos = 0;
	}

	/// Sends raw data to the remote peer.
	///
	/// Use [`send_partial`](TcpSocket::send_partial) on non-blocking
	/// sockets: a partial result from this method is reported but the
	/// progress count is lost.
	pub fn send(&mut self, data: &[u8]) -> Status {
		let (status, _) = self.send_partial(data);
		if status == Status::Partial {
			warn!("partial send: use send_partial to resume transfers on non-blocking sockets");
		}
		status
	}

	/// Sends raw data, reporting how many bytes went out.
	///
	/// On [`Status::Partial`] the remainder was not sent; re-issue the call
	/// with the unsent tail. Fails with [`Status::Error`] if the socket is
	/// not connected.
	pub fn send_partial(&mut self, data: &[u8]) -> (Status, usize) {
		let Some(fd) = self.core.raw_fd() else {
			return (Status::Error, 0);
		};

		sys::send_all(fd, data)
	}

	/// Receives raw data from the remote peer.
	///
	/// In blocking mode, waits until at least one byte arrives. Returns the
	/// number of bytes actually read, which may be less than the buffer
	/// size (both sides of a connection must expect this).
	pub fn receive(&mut self, buf: &mut [u8]) -> (Status, usize) {
		if buf.is_empty() {
			warn!("cannot receive data: the destination buffer is empty");
			return (Status::Error, 0);
		}

		let Some(fd) = self.core.raw_fd() else {
			return (Status::Error, 0);
		};

		sys::recv_some(fd, buf)
	}

	/// Sends a packet as one length-prefixed frame.
	///
	/// In non-blocking mode a return of [`Status::Partial`] means the frame
	/// was cut short; the unsent remainder is retained inside the socket
	/// and the next call resumes it. Until the resumed send returns
	/// [`Status::Done`] the caller must keep passing the identical,
	/// unmodified packet: switching packets mid-frame corrupts the stream
	/// and is not detected.
	pub fn send_packet(&mut self, packet: &Packet) -> Status {
		let Some(fd) = self.core.raw_fd() else {
			return Status::Error;
		};

		// Build a fresh frame only when no partial send is in flight.
		if self.send_pos == 0 {
			let body = packet.on_send();
			self.send_buffer.clear();
			self.send_buffer.extend_from_slice(&(body.len() as u32).to_be_bytes());
			self.send_buffer.extend_from_slice(body);
		}

		let (status, sent) = sys::send_all(fd, &self.send_buffer[self.send_pos..]);

		match status {
			Status::Done => {
				self.send_pos = 0;
				self.send_buffer.clear();
			}
			Status::Partial => {
				self.send_pos += sent;
			}
			Status::Disconnected => {
				// Terminal: drop the half-sent frame.
				self.send_pos = 0;
				self.send_buffer.clear();
			}
			_ => {}
		}

		status
	}

	/// Receives one length-prefixed frame into `packet`.
	///
	/// In blocking mode, waits until the whole frame has arrived. In
	/// non-blocking mode this is a resumable state machine: each call
	/// consumes whatever bytes the OS has, returning [`Status::NotReady`]
	/// with `packet` untouched until the frame completes; only the
	/// completing call returns [`Status::Done`] and fills `packet`.
	pub fn receive_packet(&mut self, packet: &mut Packet) -> Status {
		// First accumulate the 4-byte length prefix.
		while self.pending.size_received < 4 {
			let offset = self.pending.size_received;
			let mut prefix = [0u8; 4];
			let (status, received) = self.receive(&mut prefix[..4 - offset]);
			self.pending.size_bytes[offset..offset + received].copy_from_slice(&prefix[..received]);
			self.pending.size_received += received;

			if status != Status::Done {
				if status == Status::Disconnected {
					self.pending.reset();
				}
				return status;
			}
		}

		let size = u32::from_be_bytes(self.pending.size_bytes) as usize;

		// Then the body, in bounded chunks so a huge frame cannot force a
		// single huge read.
		let mut buffer = [0u8; 1024];
		while self.pending.data.len() < size {
			let remaining = (size - self.pending.data.len()).min(buffer.len());
			let (status, received) = self.receive(&mut buffer[..remaining]);

			if status != Status::Done {
				if status == Status::Disconnected {
					self.pending.reset();
				}
				return status;
			}

			self.pending.data.extend_from_slice(&buffer[..received]);
		}

		// Frame complete: hand it over and reset for the next one.
		packet.clear();
		packet.on_receive(&self.pending.data);
		self.pending.reset();

		Status::Done
	}

	/// Replaces the socket's handle with a freshly accepted connection.
	pub(crate) fn reset_with(&mut self, fd: OwnedFd) {
		self.disconnect();
		self.core.adopt(fd);
	}

	pub(crate) fn raw_fd(&self) -> Option<std::os::fd::RawFd> {
		self.core.raw_fd()
	}
}

impl Selectable for TcpSocket {
	fn registration(&self) -> Option<Registration> {
		self.core.registration()
	}
}
