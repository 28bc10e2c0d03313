use std::ffi::CString;
use std::fmt;

// `inet_pton` is part of the C library but is not bound by the `libc` crate,
// so declare the binding locally. Signature matches POSIX:
//   int inet_pton(int af, const char *src, void *dst);
unsafe extern "C" {
	fn inet_pton(af: libc::c_int, src: *const libc::c_char, dst: *mut libc::c_void)
		-> libc::c_int;
}

/// An IPv4 address.
///
/// Stored as the four dotted-quad octets. The well-known addresses are
/// provided as constants: [`IpAddress::ANY`], [`IpAddress::LOCALHOST`] and
/// [`IpAddress::BROADCAST`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IpAddress {
	octets: [u8; 4],
}

impl IpAddress {
	/// Value representing any address (0.0.0.0).
	pub const ANY: IpAddress = IpAddress::new(0, 0, 0, 0);
	/// The "localhost" address (127.0.0.1).
	pub const LOCALHOST: IpAddress = IpAddress::new(127, 0, 0, 1);
	/// The "broadcast" address (255.255.255.255).
	pub const BROADCAST: IpAddress = IpAddress::new(255, 255, 255, 255);

	/// Creates an address from its four octets.
	pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
		Self { octets: [a, b, c, d] }
	}

	/// Creates an address from a 32-bit integer in host byte order.
	pub const fn from_u32(address: u32) -> Self {
		Self { octets: address.to_be_bytes() }
	}

	/// Returns the address as a 32-bit integer in host byte order.
	pub const fn to_u32(self) -> u32 {
		u32::from_be_bytes(self.octets)
	}

	/// Returns the four octets.
	pub const fn octets(self) -> [u8; 4] {
		self.octets
	}

	/// Resolves a string to an address.
	///
	/// Accepts dotted-quad notation ("192.168.0.1") as well as host names
	/// ("localhost", "example.org"), which go through the system resolver.
	/// Returns `None` if the string is neither.
	pub fn resolve(address: &str) -> Option<IpAddress> {
		if address.is_empty() {
			return None;
		}

		// The broadcast address has to be handled explicitly: it is also
		// the value inet_addr-style APIs return on error.
		if address == "255.255.255.255" {
			return Some(Self::BROADCAST);
		}
		if address == "0.0.0.0" {
			return Some(Self::ANY);
		}

		let c_address = CString::new(address).ok()?;

		// Try the byte representation first ("xxx.xxx.xxx.xxx").
		let mut addr: libc::in_addr = unsafe { std::mem::zeroed() };
		let parsed = unsafe {
			inet_pton(
				libc::AF_INET,
				c_address.as_ptr(),
				&mut addr as *mut _ as *mut libc::c_void,
			)
		};
		if parsed == 1 {
			return Some(Self::from_u32(u32::from_be(addr.s_addr)));
		}

		// Not a dotted quad, ask the resolver for a host name.
		let mut hints: libc::addrinfo = unsafe { std::mem::zeroed() };
		hints.ai_family = libc::AF_INET;

		let mut result: *mut libc::addrinfo = std::ptr::null_mut();
		let rc = unsafe {
			libc::getaddrinfo(c_address.as_ptr(), std::ptr::null(), &hints, &mut result)
		};
		if rc != 0 || result.is_null() {
			return None;
		}

		let resolved = unsafe {
			let info = &*result;
			if info.ai_addr.is_null() {
				None
			} else {
				let sin = &*(info.ai_addr as *const libc::sockaddr_in);
				Some(Self::from_u32(u32::from_be(sin.sin_addr.s_addr)))
			}
		};
		unsafe { libc::freeaddrinfo(result) };

		resolved
	}

	/// Returns the address of the local machine on its network.
	///
	/// The method is to connect a UDP socket to localhost and read the
	/// local end of the connection back with getsockname. Connecting a UDP
	/// socket sends nothing on the wire, so there is no network overhead.
	pub fn local_address() -> Option<IpAddress> {
		let sock = unsafe { libc::socket(libc::PF_INET, libc::SOCK_DGRAM | libc::SOCK_CLOEXEC, 0) };
		if sock == -1 {
			return None;
		}

		let mut address: libc::sockaddr_in = unsafe { std::mem::zeroed() };
		address.sin_family = libc::AF_INET as libc::sa_family_t;
		address.sin_port = 9u16.to_be();
		address.sin_addr.s_addr = libc::INADDR_LOOPBACK.to_be();

		let connected = unsafe {
			libc::connect(
				sock,
				&address as *const _ as *const libc::sockaddr,
				std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
			)
		};
		if connected == -1 {
			unsafe { libc::close(sock) };
			return None;
		}

		let mut local: libc::sockaddr_in = unsafe { std::mem::zeroed() };
		let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
		let named = unsafe {
			libc::getsockname(sock, &mut local as *mut _ as *mut libc::sockaddr, &mut len)
		};
		unsafe { libc::close(sock) };
		if named == -1 {
			return None;
		}

		Some(Self::from_u32(u32::from_be(local.sin_addr.s_addr)))
	}
}

impl fmt::Display for IpAddress {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let [a, b, c, d] = self.octets;
		write!(f, "{}.{}.{}.{}", a, b, c, d)
	}
}
