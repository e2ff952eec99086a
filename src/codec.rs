// TLS-presentation-style wire primitives: fixed-width big-endian integers,
// vectors prefixed with a length whose width matches the syntactic bound,
// optionals prefixed with a presence octet. Every structure in the protocol
// round-trips byte for byte through these.

#[derive(Debug, PartialEq)]
pub enum Error {
	UnexpectedEnd,
	TrailingBytes(usize),
	BadTag(u8),
	BadLength,
	BadValue,
}

pub trait Serializable {
	fn encode(&self, buf: &mut Vec<u8>);

	fn serialize(&self) -> Vec<u8> {
		let mut buf = Vec::new();

		self.encode(&mut buf);

		buf
	}
}

pub trait Deserializable: Sized {
	fn decode(r: &mut Reader) -> Result<Self, Error>;

	fn deserialize(buf: &[u8]) -> Result<Self, Error> {
		let mut r = Reader::new(buf);
		let val = Self::decode(&mut r)?;

		r.finish()?;

		Ok(val)
	}
}

pub fn write_u8(buf: &mut Vec<u8>, val: u8) {
	buf.push(val);
}

pub fn write_u16(buf: &mut Vec<u8>, val: u16) {
	buf.extend_from_slice(&val.to_be_bytes());
}

pub fn write_u32(buf: &mut Vec<u8>, val: u32) {
	buf.extend_from_slice(&val.to_be_bytes());
}

pub fn write_u64(buf: &mut Vec<u8>, val: u64) {
	buf.extend_from_slice(&val.to_be_bytes());
}

// opaque<0..2^8-1>
pub fn write_opaque8(buf: &mut Vec<u8>, bytes: &[u8]) {
	assert!(bytes.len() <= u8::MAX as usize);

	write_u8(buf, bytes.len() as u8);
	buf.extend_from_slice(bytes);
}

// opaque<0..2^16-1>
pub fn write_opaque16(buf: &mut Vec<u8>, bytes: &[u8]) {
	assert!(bytes.len() <= u16::MAX as usize);

	write_u16(buf, bytes.len() as u16);
	buf.extend_from_slice(bytes);
}

// opaque<0..2^32-1>
pub fn write_opaque32(buf: &mut Vec<u8>, bytes: &[u8]) {
	assert!(bytes.len() <= u32::MAX as usize);

	write_u32(buf, bytes.len() as u32);
	buf.extend_from_slice(bytes);
}

pub fn write_optional<T: Serializable>(buf: &mut Vec<u8>, val: &Option<T>) {
	match val {
		None => write_u8(buf, 0),
		Some(val) => {
			write_u8(buf, 1);
			val.encode(buf);
		}
	}
}

pub struct Reader<'a> {
	buf: &'a [u8],
	pos: usize,
}

impl<'a> Reader<'a> {
	pub fn new(buf: &'a [u8]) -> Self {
		Self { buf, pos: 0 }
	}

	pub fn is_empty(&self) -> bool {
		self.pos == self.buf.len()
	}

	pub fn finish(&self) -> Result<(), Error> {
		if self.is_empty() {
			Ok(())
		} else {
			Err(Error::TrailingBytes(self.buf.len() - self.pos))
		}
	}

	pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], Error> {
		if self.buf.len() - self.pos < n {
			Err(Error::UnexpectedEnd)
		} else {
			let bytes = &self.buf[self.pos..self.pos + n];
			self.pos += n;

			Ok(bytes)
		}
	}

	pub fn read_u8(&mut self) -> Result<u8, Error> {
		Ok(self.read_bytes(1)?[0])
	}

	pub fn read_u16(&mut self) -> Result<u16, Error> {
		Ok(u16::from_be_bytes(self.read_bytes(2)?.try_into().unwrap()))
	}

	pub fn read_u32(&mut self) -> Result<u32, Error> {
		Ok(u32::from_be_bytes(self.read_bytes(4)?.try_into().unwrap()))
	}

	pub fn read_u64(&mut self) -> Result<u64, Error> {
		Ok(u64::from_be_bytes(self.read_bytes(8)?.try_into().unwrap()))
	}

	pub fn read_opaque8(&mut self) -> Result<Vec<u8>, Error> {
		let len = self.read_u8()? as usize;

		Ok(self.read_bytes(len)?.to_vec())
	}

	pub fn read_opaque16(&mut self) -> Result<Vec<u8>, Error> {
		let len = self.read_u16()? as usize;

		Ok(self.read_bytes(len)?.to_vec())
	}

	pub fn read_opaque32(&mut self) -> Result<Vec<u8>, Error> {
		let len = self.read_u32()? as usize;

		Ok(self.read_bytes(len)?.to_vec())
	}

	pub fn read_optional<T: Deserializable>(&mut self) -> Result<Option<T>, Error> {
		match self.read_u8()? {
			0 => Ok(None),
			1 => Ok(Some(T::decode(self)?)),
			tag => Err(Error::BadTag(tag)),
		}
	}
}
