use tracing::warn;

use crate::addr::IpAddress;
use crate::packet::Packet;
use crate::selector::{Registration, Selectable};
use crate::socket::core::{SocketCore, SocketKind};
use crate::socket::{Status, sys};

/// A connectionless UDP socket.
///
/// Every send names its destination and every receive reports its source.
/// The datagram boundary is the only framing there is: a packet sent with
/// [`send_packet_to`](UdpSocket::send_packet_to) travels as exactly one
/// datagram with no length prefix, and must therefore fit under
/// [`MAX_DATAGRAM_SIZE`](UdpSocket::MAX_DATAGRAM_SIZE).
#[derive(Debug)]
pub struct UdpSocket {
	core: SocketCore,
	recv_buffer: Vec<u8>,
}

impl Default for UdpSocket {
	fn default() -> Self {
		Self::new()
	}
}

impl UdpSocket {
	/// The practical limit for an IPv4 UDP payload, in bytes.
	///
	/// 65535 minus the IP and UDP headers. Larger datagrams would be
	/// fragmented or dropped by the OS, so sends above this are rejected
	/// before any syscall.
	pub const MAX_DATAGRAM_SIZE: usize = 65507;

	/// Creates a socket. No OS resource is allocated until the first
	/// operation that needs one.
	pub fn new() -> Self {
		Self {
			core: SocketCore::new(SocketKind::Udp),
			recv_buffer: Vec::new(),
		}
	}

	/// Sets the blocking mode for all subsequent calls.
	pub fn set_blocking(&mut self, blocking: bool) {
		self.core.set_blocking(blocking);
	}

	pub fn is_blocking(&self) -> bool {
		self.core.is_blocking()
	}

	/// Port the socket is bound to locally, or 0 if unbound.
	pub fn local_port(&self) -> u16 {
		self.core
			.raw_fd()
			.and_then(sys::local_addr)
			.map(|(_, port)| port)
			.unwrap_or(0)
	}

	/// Binds the socket to a local port so it can receive.
	///
	/// A previous binding is closed first. Use [`ANY_PORT`](crate::ANY_PORT)
	/// to let the system pick a free port, readable afterwards with
	/// [`local_port`](UdpSocket::local_port). Binding to the broadcast
	/// address is rejected.
	pub fn bind(&mut self, port: u16, address: IpAddress) -> Status {
		self.close();
		self.core.create();

		if address == IpAddress::BROADCAST {
			return Status::Error;
		}

		let Some(fd) = self.core.raw_fd() else {
			return Status::Error;
		};

		if let Err(err) = sys::bind(fd, address, port) {
			warn!("failed to bind UDP socket: {err}");
			return Status::Error;
		}

		Status::Done
	}

	/// Releases the bound port.
	pub fn unbind(&mut self) {
		self.close();
	}

	fn close(&mut self) {
		self.core.close();
	}

	/// Sends one datagram to the given peer.
	///
	/// Payloads above [`MAX_DATAGRAM_SIZE`](UdpSocket::MAX_DATAGRAM_SIZE)
	/// are rejected with [`Status::Error`] without touching the network;
	/// everything else goes out in a single sendto call.
	pub fn send_to(&mut self, data: &[u8], address: IpAddress, port: u16) -> Status {
		self.core.create();

		if data.len() > Self::MAX_DATAGRAM_SIZE {
			warn!(
				"cannot send data over the network: payload exceeds MAX_DATAGRAM_SIZE ({} > {})",
				data.len(),
				Self::MAX_DATAGRAM_SIZE
			);
			return Status::Error;
		}

		let Some(fd) = self.core.raw_fd() else {
			return Status::Error;
		};

		let addr = sys::sockaddr_in(address, port);
		let sent = unsafe {
			libc::sendto(
				fd,
				data.as_ptr() as *const libc::c_void,
				data.len(),
				0,
				&addr as *const _ as *const libc::sockaddr,
				std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
			)
		};

		if sent < 0 {
			return sys::error_status();
		}

		Status::Done
	}

	/// Receives one datagram.
	///
	/// Returns the status, the number of bytes read, and the sender's
	/// address and port. A datagram larger than `buf` is truncated by the
	/// OS; the excess is lost.
	pub fn receive_from(&mut self, buf: &mut [u8]) -> (Status, usize, Option<IpAddress>, u16) {
		if buf.is_empty() {
			warn!("cannot receive data: the destination buffer is empty");
			return (Status::Error, 0, None, 0);
		}

		let Some(fd) = self.core.raw_fd() else {
			return (Status::Error, 0, None, 0);
		};

		let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
		let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;

		let received = unsafe {
			libc::recvfrom(
				fd,
				buf.as_mut_ptr() as *mut libc::c_void,
				buf.len(),
				0,
				&mut addr as *mut _ as *mut libc::sockaddr,
				&mut len,
			)
		};

		if received < 0 {
			return (sys::error_status(), 0, None, 0);
		}

		let (address, port) = sys::addr_from_sockaddr(&addr);
		(Status::Done, received as usize, Some(address), port)
	}

	/// Sends a packet's serialized body as one datagram.
	///
	/// Splitting a packet across datagrams would be hopeless, since they can
	/// be reordered, duplicated or lost independently. So a packet either
	/// fits in one datagram or the send fails. No length prefix is added:
	/// the datagram boundary is the frame boundary.
	pub fn send_packet_to(&mut self, packet: &Packet, address: IpAddress, port: u16) -> Status {
		self.send_to(packet.on_send(), address, port)
	}

	/// Receives one datagram into `packet`.
	///
	/// The packet is cleared first and filled with the whole datagram on
	/// success.
	pub fn receive_packet_from(&mut self, packet: &mut Packet) -> (Status, Option<IpAddress>, u16) {
		self.recv_buffer.resize(Self::MAX_DATAGRAM_SIZE, 0);

		let mut buffer = std::mem::take(&mut self.recv_buffer);
		let (status, received, address, port) = self.receive_from(&mut buffer);

		packet.clear();
		if status == Status::Done && received > 0 {
			packet.on_receive(&buffer[..received]);
		}
		self.recv_buffer = buffer;

		(status, address, port)
	}
}

impl Selectable for UdpSocket {
	fn registration(&self) -> Option<Registration> {
		self.core.registration()
	}
}
