//! Thin shim over the socket syscalls.
//!
//! Everything in here is a direct wrapper: no state, no policy. The rest of
//! the crate talks to the OS exclusively through these functions, so the
//! errno-to-[`Status`] translation lives in exactly one place.

use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use crate::addr::IpAddress;
use crate::error::{SocketError, errno};
use crate::socket::Status;

/// Creates a socket of the given type (`SOCK_STREAM`/`SOCK_DGRAM`).
///
/// The descriptor is created with `SOCK_CLOEXEC` and wrapped in an
/// `OwnedFd` immediately, so it cannot leak.
pub(crate) fn create_socket(sock_type: libc::c_int) -> Result<OwnedFd, SocketError> {
	let fd = unsafe { libc::socket(libc::PF_INET, sock_type | libc::SOCK_CLOEXEC, 0) };
	if fd == -1 {
		return Err(SocketError::Create { errno: errno() });
	}
	Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Sets or clears `O_NONBLOCK` on a descriptor.
pub(crate) fn set_blocking(fd: RawFd, blocking: bool) -> Result<(), SocketError> {
	let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
	if flags == -1 {
		return Err(SocketError::GetOption { errno: errno(), option: "F_GETFL" });
	}

	let new_flags = if blocking {
		flags & !libc::O_NONBLOCK
	} else {
		flags | libc::O_NONBLOCK
	};

	if unsafe { libc::fcntl(fd, libc::F_SETFL, new_flags) } == -1 {
		return Err(SocketError::SetOption { errno: errno(), option: "O_NONBLOCK" });
	}

	Ok(())
}

/// Sets an integer socket option.
pub(crate) fn set_int_option(
	fd: RawFd,
	level: libc::c_int,
	name: libc::c_int,
	value: libc::c_int,
	option: &'static str,
) -> Result<(), SocketError> {
	let result = unsafe {
		libc::setsockopt(
			fd,
			level,
			name,
			&value as *const _ as *const libc::c_void,
			std::mem::size_of::<libc::c_int>() as libc::socklen_t,
		)
	};
	if result == -1 {
		return Err(SocketError::SetOption { errno: errno(), option });
	}
	Ok(())
}

/// Binds a descriptor to a local address and port.
pub(crate) fn bind(fd: RawFd, address: IpAddress, port: u16) -> Result<(), SocketError> {
	let addr = sockaddr_in(address, port);
	let result = unsafe {
		libc::bind(
			fd,
			&addr as *const _ as *const libc::sockaddr,
			std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
		)
	};
	if result == -1 {
		return Err(SocketError::Bind {
			errno: errno(),
			addr: format!("{address}:{port}"),
		});
	}
	Ok(())
}

/// Marks a bound descriptor as listening, with the system's maximum
/// backlog.
pub(crate) fn listen(fd: RawFd) -> Result<(), SocketError> {
	if unsafe { libc::listen(fd, libc::SOMAXCONN) } == -1 {
		return Err(SocketError::Listen { errno: errno() });
	}
	Ok(())
}

/// Reads and clears the pending socket error (`SO_ERROR`).
///
/// Returns 0 if the socket has no pending error. Used to check the outcome
/// of a non-blocking connect once the socket reports writable.
pub(crate) fn take_socket_error(fd: RawFd) -> i32 {
	let mut error: libc::c_int = 0;
	let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;

	let result = unsafe {
		libc::getsockopt(
			fd,
			libc::SOL_SOCKET,
			libc::SO_ERROR,
			&mut error as *mut _ as *mut libc::c_void,
			&mut len,
		)
	};

	if result == -1 { errno() } else { error }
}

/// Maps the current errno to a [`Status`].
///
/// EAGAIN and EINPROGRESS can be equal to EWOULDBLOCK on some platforms,
/// so they are checked up front rather than in the match.
pub(crate) fn error_status() -> Status {
	status_for_errno(errno())
}

/// Maps an explicit errno value to a [`Status`].
pub(crate) fn status_for_errno(err: i32) -> Status {
	if err == libc::EAGAIN || err == libc::EINPROGRESS {
		return Status::NotReady;
	}

	match err {
		libc::EWOULDBLOCK => Status::NotReady,
		libc::ECONNABORTED => Status::Disconnected,
		libc::ECONNRESET => Status::Disconnected,
		libc::ETIMEDOUT => Status::Disconnected,
		libc::ENETRESET => Status::Disconnected,
		libc::ENOTCONN => Status::Disconnected,
		libc::EPIPE => Status::Disconnected,
		_ => Status::Error,
	}
}

/// Builds a `sockaddr_in` from an address and port.
pub(crate) fn sockaddr_in(address: IpAddress, port: u16) -> libc::sockaddr_in {
	let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
	addr.sin_family = libc::AF_INET as libc::sa_family_t;
	addr.sin_port = port.to_be();
	addr.sin_addr.s_addr = address.to_u32().to_be();
	addr
}

/// Extracts the address and port from a `sockaddr_in`.
pub(crate) fn addr_from_sockaddr(addr: &libc::sockaddr_in) -> (IpAddress, u16) {
	(
		IpAddress::from_u32(u32::from_be(addr.sin_addr.s_addr)),
		u16::from_be(addr.sin_port),
	)
}

/// Returns the local address/port of a descriptor, if bound.
pub(crate) fn local_addr(fd: RawFd) -> Option<(IpAddress, u16)> {
	let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
	let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
	let result = unsafe {
		libc::getsockname(fd, &mut addr as *mut _ as *mut libc::sockaddr, &mut len)
	};
	if result == -1 {
		return None;
	}
	Some(addr_from_sockaddr(&addr))
}

/// Returns the remote address/port of a descriptor, if connected.
pub(crate) fn peer_addr(fd: RawFd) -> Option<(IpAddress, u16)> {
	let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
	let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
	let result = unsafe {
		libc::getpeername(fd, &mut addr as *mut _ as *mut libc::sockaddr, &mut len)
	};
	if result == -1 {
		return None;
	}
	Some(addr_from_sockaddr(&addr))
}

/// Sends as much of `data` as the socket accepts.
///
/// Loops until everything is written, the call would block, or the
/// connection fails. On a would-block after partial progress the result is
/// (`Partial`, bytes sent so far); with no progress it is `NotReady`.
/// `MSG_NOSIGNAL` keeps a dead peer from raising SIGPIPE.
pub(crate) fn send_all(fd: RawFd, data: &[u8]) -> (Status, usize) {
	let mut sent = 0;

	while sent < data.len() {
		let result = unsafe {
			libc::send(
				fd,
				data[sent..].as_ptr() as *const libc::c_void,
				data.len() - sent,
				libc::MSG_NOSIGNAL,
			)
		};

		if result < 0 {
			let status = error_status();
			if status == Status::NotReady && sent > 0 {
				return (Status::Partial, sent);
			}
			return (status, sent);
		}

		sent += result as usize;
	}

	(Status::Done, sent)
}

/// Receives one chunk of bytes.
///
/// A zero-byte read is the peer's orderly shutdown and maps to
/// `Disconnected`.
pub(crate) fn recv_some(fd: RawFd, buf: &mut [u8]) -> (Status, usize) {
	let result = unsafe {
		libc::recv(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0)
	};

	if result > 0 {
		(Status::Done, result as usize)
	} else if result == 0 {
		(Status::Disconnected, 0)
	} else {
		(error_status(), 0)
	}
}

/// Converts an optional timeout to the millisecond form poll expects.
///
/// `None` means wait forever (-1).
pub(crate) fn poll_timeout_ms(timeout: Option<Duration>) -> libc::c_int {
	match timeout {
		None => -1,
		Some(t) => t.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
	}
}

/// Polls a single descriptor for the given events.
///
/// Returns the revents on readiness, `Some(0)` on timeout, `None` on a
/// poll failure other than EINTR (which is retried).
pub(crate) fn poll_one(fd: RawFd, events: libc::c_short, timeout: Option<Duration>) -> Option<libc::c_short> {
	let mut pollfd = libc::pollfd { fd, events, revents: 0 };
	let timeout_ms = poll_timeout_ms(timeout);

	loop {
		let result = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
		if result > 0 {
			return Some(pollfd.revents);
		}
		if result == 0 {
			return Some(0);
		}
		if errno() != libc::EINTR {
			return None;
		}
	}
}

/// Accepts a pending connection, returning the new descriptor and the
/// peer's address.
pub(crate) fn accept(fd: RawFd) -> Result<(OwnedFd, IpAddress, u16), Status> {
	let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
	let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;

	let remote = unsafe {
		libc::accept4(
			fd,
			&mut addr as *mut _ as *mut libc::sockaddr,
			&mut len,
			libc::SOCK_CLOEXEC,
		)
	};

	if remote == -1 {
		return Err(error_status());
	}

	let (address, port) = addr_from_sockaddr(&addr);
	Ok((unsafe { OwnedFd::from_raw_fd(remote) }, address, port))
}
