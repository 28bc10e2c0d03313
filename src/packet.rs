/// A growable byte buffer with typed sequential read/write.
///
/// `Packet` is the unit of application framing for the socket layer: a
/// packet written on one end arrives as exactly one packet on the other,
/// regardless of how the transport fragments it. Multi-byte integers are
/// stored in network byte order (big endian); 8-bit values and floating
/// point values are copied with their native byte layout, which is only
/// interoperable between peers sharing endianness and float representation
/// for those fields.
///
/// Reads are bounds-checked. The first read that runs past the end of the
/// buffer marks the packet invalid; from then on every read returns `None`
/// without touching the buffer, until [`clear`](Packet::clear) is called.
#[derive(Debug, Clone)]
pub struct Packet {
	data: Vec<u8>,
	read_pos: usize,
	valid: bool,
}

impl Default for Packet {
	fn default() -> Self {
		Self::new()
	}
}

impl Packet {
	/// Creates an empty packet.
	pub fn new() -> Self {
		Self {
			data: Vec::new(),
			read_pos: 0,
			valid: true,
		}
	}

	/// Appends raw bytes to the end of the packet.
	pub fn append(&mut self, data: &[u8]) {
		self.data.extend_from_slice(data);
	}

	/// Clears the packet: drops the data, rewinds the read cursor and
	/// restores validity.
	pub fn clear(&mut self) {
		self.data.clear();
		self.read_pos = 0;
		self.valid = true;
	}

	/// Returns the packet body.
	pub fn data(&self) -> &[u8] {
		&self.data
	}

	/// Returns the size of the packet body in bytes.
	pub fn len(&self) -> usize {
		self.data.len()
	}

	/// Returns true if the packet holds no data.
	pub fn is_empty(&self) -> bool {
		self.data.is_empty()
	}

	/// Returns the current reading position.
	pub fn read_position(&self) -> usize {
		self.read_pos
	}

	/// Returns true if the read cursor has reached the end of the packet.
	pub fn end_of_packet(&self) -> bool {
		self.read_pos >= self.data.len()
	}

	/// Returns true if the last read succeeded.
	///
	/// Once a read fails this stays false until [`clear`](Packet::clear).
	pub fn is_valid(&self) -> bool {
		self.valid
	}

	/// Checks that `size` more bytes can be read, updating validity.
	///
	/// Validity is sticky: once false, it stays false no matter how many
	/// bytes are available.
	fn check_size(&mut self, size: usize) -> bool {
		let overflow = self.read_pos.checked_add(size).is_none();
		self.valid = self.valid && !overflow && self.read_pos + size <= self.data.len();
		self.valid
	}

	fn read_bytes<const N: usize>(&mut self) -> Option<[u8; N]> {
		if !self.check_size(N) {
			return None;
		}
		let mut bytes = [0u8; N];
		bytes.copy_from_slice(&self.data[self.read_pos..self.read_pos + N]);
		self.read_pos += N;
		Some(bytes)
	}

	pub fn read_bool(&mut self) -> Option<bool> {
		self.read_u8().map(|value| value != 0)
	}

	pub fn read_u8(&mut self) -> Option<u8> {
		self.read_bytes::<1>().map(|b| b[0])
	}

	pub fn read_i8(&mut self) -> Option<i8> {
		self.read_u8().map(|value| value as i8)
	}

	pub fn read_u16(&mut self) -> Option<u16> {
		self.read_bytes::<2>().map(u16::from_be_bytes)
	}

	pub fn read_i16(&mut self) -> Option<i16> {
		self.read_bytes::<2>().map(i16::from_be_bytes)
	}

	pub fn read_u32(&mut self) -> Option<u32> {
		self.read_bytes::<4>().map(u32::from_be_bytes)
	}

	pub fn read_i32(&mut self) -> Option<i32> {
		self.read_bytes::<4>().map(i32::from_be_bytes)
	}

	pub fn read_u64(&mut self) -> Option<u64> {
		self.read_bytes::<8>().map(u64::from_be_bytes)
	}

	pub fn read_i64(&mut self) -> Option<i64> {
		self.read_bytes::<8>().map(i64::from_be_bytes)
	}

	/// Reads a 32-bit float. Native byte layout, see the type-level note.
	pub fn read_f32(&mut self) -> Option<f32> {
		self.read_bytes::<4>().map(f32::from_ne_bytes)
	}

	/// Reads a 64-bit float. Native byte layout, see the type-level note.
	pub fn read_f64(&mut self) -> Option<f64> {
		self.read_bytes::<8>().map(f64::from_ne_bytes)
	}

	/// Reads a length-prefixed byte string.
	///
	/// The wire form is a 32-bit length followed by that many bytes.
	/// Invalid UTF-8 sequences are replaced rather than rejected.
	pub fn read_string(&mut self) -> Option<String> {
		let length = self.read_u32()? as usize;
		if length == 0 {
			return Some(String::new());
		}
		if !self.check_size(length) {
			return None;
		}
		let bytes = &self.data[self.read_pos..self.read_pos + length];
		let string = String::from_utf8_lossy(bytes).into_owned();
		self.read_pos += length;
		Some(string)
	}

	/// Reads a length-prefixed unicode string.
	///
	/// The wire form is a 32-bit length followed by that many 32-bit code
	/// points. Code points outside the valid range decode as U+FFFD.
	pub fn read_unicode_string(&mut self) -> Option<String> {
		let length = self.read_u32()? as usize;
		if length == 0 {
			return Some(String::new());
		}
		let Some(total) = length.checked_mul(4) else {
			self.valid = false;
			return None;
		};
		if !self.check_size(total) {
			return None;
		}
		let mut string = String::with_capacity(length);
		for _ in 0..length {
			let code_point = self.read_u32()?;
			string.push(char::from_u32(code_point).unwrap_or(char::REPLACEMENT_CHARACTER));
		}
		Some(string)
	}

	pub fn write_bool(&mut self, value: bool) {
		self.write_u8(value as u8);
	}

	pub fn write_u8(&mut self, value: u8) {
		self.data.push(value);
	}

	pub fn write_i8(&mut self, value: i8) {
		self.write_u8(value as u8);
	}

	pub fn write_u16(&mut self, value: u16) {
		self.append(&value.to_be_bytes());
	}

	pub fn write_i16(&mut self, value: i16) {
		self.append(&value.to_be_bytes());
	}

	pub fn write_u32(&mut self, value: u32) {
		self.append(&value.to_be_bytes());
	}

	pub fn write_i32(&mut self, value: i32) {
		self.append(&value.to_be_bytes());
	}

	pub fn write_u64(&mut self, value: u64) {
		self.append(&value.to_be_bytes());
	}

	pub fn write_i64(&mut self, value: i64) {
		self.append(&value.to_be_bytes());
	}

	/// Writes a 32-bit float. Native byte layout, see the type-level note.
	pub fn write_f32(&mut self, value: f32) {
		self.append(&value.to_ne_bytes());
	}

	/// Writes a 64-bit float. Native byte layout, see the type-level note.
	pub fn write_f64(&mut self, value: f64) {
		self.append(&value.to_ne_bytes());
	}

	/// Writes a length-prefixed byte string (32-bit length + UTF-8 bytes).
	pub fn write_string(&mut self, value: &str) {
		self.write_u32(value.len() as u32);
		self.append(value.as_bytes());
	}

	/// Writes a length-prefixed unicode string (32-bit length + one 32-bit
	/// code point per character).
	pub fn write_unicode_string(&mut self, value: &str) {
		self.write_u32(value.chars().count() as u32);
		for c in value.chars() {
			self.write_u32(c as u32);
		}
	}

	/// Hands the serialized body to the socket layer before a send.
	pub(crate) fn on_send(&self) -> &[u8] {
		&self.data
	}

	/// Fills the packet from bytes received by the socket layer.
	pub(crate) fn on_receive(&mut self, data: &[u8]) {
		self.append(data);
	}
}
