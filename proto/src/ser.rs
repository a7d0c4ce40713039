//! Explicit binary codec, replacing the original implementation's
//! reflection-based encoding (see DESIGN NOTES: "Free use of `gob`").
//! Every wire type implements [`Readable`]/[`Writeable`] by hand against a
//! [`Reader`]/[`Writer`] pair backed by big-endian integers.

use crate::error::Error;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use ecoin_crypto::{Hash, Id, HASH_LEN, ID_LEN};
use std::io::{Cursor, Write};

pub trait Writer {
	fn write_u8(&mut self, n: u8) -> Result<(), Error>;
	fn write_u16(&mut self, n: u16) -> Result<(), Error>;
	fn write_u32(&mut self, n: u32) -> Result<(), Error>;
	fn write_u64(&mut self, n: u64) -> Result<(), Error>;
	fn write_i64(&mut self, n: i64) -> Result<(), Error>;
	/// Write raw bytes with no length prefix (caller knows the length).
	fn write_fixed_bytes(&mut self, b: &[u8]) -> Result<(), Error>;
	/// Write a `u16`-length-prefixed byte string.
	fn write_var_bytes(&mut self, b: &[u8]) -> Result<(), Error> {
		if b.len() > u16::MAX as usize {
			return Err(Error::FieldTooLarge("var_bytes"));
		}
		self.write_u16(b.len() as u16)?;
		self.write_fixed_bytes(b)
	}
}

pub trait Reader {
	fn read_u8(&mut self) -> Result<u8, Error>;
	fn read_u16(&mut self) -> Result<u16, Error>;
	fn read_u32(&mut self) -> Result<u32, Error>;
	fn read_u64(&mut self) -> Result<u64, Error>;
	fn read_i64(&mut self) -> Result<i64, Error>;
	fn read_fixed_bytes(&mut self, len: usize) -> Result<Vec<u8>, Error>;
	fn read_var_bytes(&mut self) -> Result<Vec<u8>, Error> {
		let len = self.read_u16()? as usize;
		self.read_fixed_bytes(len)
	}
}

pub trait Writeable {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error>;
}

pub trait Readable: Sized {
	fn read<R: Reader>(reader: &mut R) -> Result<Self, Error>;
}

/// Writer over an in-memory buffer.
pub struct BinWriter<'a> {
	sink: &'a mut Vec<u8>,
}

impl<'a> BinWriter<'a> {
	pub fn new(sink: &'a mut Vec<u8>) -> Self {
		BinWriter { sink }
	}
}

impl<'a> Writer for BinWriter<'a> {
	fn write_u8(&mut self, n: u8) -> Result<(), Error> {
		self.sink.write_u8(n).map_err(|_| Error::UnexpectedEof)
	}
	fn write_u16(&mut self, n: u16) -> Result<(), Error> {
		self.sink
			.write_u16::<BigEndian>(n)
			.map_err(|_| Error::UnexpectedEof)
	}
	fn write_u32(&mut self, n: u32) -> Result<(), Error> {
		self.sink
			.write_u32::<BigEndian>(n)
			.map_err(|_| Error::UnexpectedEof)
	}
	fn write_u64(&mut self, n: u64) -> Result<(), Error> {
		self.sink
			.write_u64::<BigEndian>(n)
			.map_err(|_| Error::UnexpectedEof)
	}
	fn write_i64(&mut self, n: i64) -> Result<(), Error> {
		self.sink
			.write_i64::<BigEndian>(n)
			.map_err(|_| Error::UnexpectedEof)
	}
	fn write_fixed_bytes(&mut self, b: &[u8]) -> Result<(), Error> {
		self.sink.write_all(b).map_err(|_| Error::UnexpectedEof)
	}
}

/// Reader over a borrowed byte slice.
pub struct BinReader<'a> {
	cursor: Cursor<&'a [u8]>,
}

impl<'a> BinReader<'a> {
	pub fn new(data: &'a [u8]) -> Self {
		BinReader {
			cursor: Cursor::new(data),
		}
	}

	pub fn remaining(&self) -> usize {
		let pos = self.cursor.position() as usize;
		self.cursor.get_ref().len().saturating_sub(pos)
	}
}

impl<'a> Reader for BinReader<'a> {
	fn read_u8(&mut self) -> Result<u8, Error> {
		self.cursor.read_u8().map_err(|_| Error::UnexpectedEof)
	}
	fn read_u16(&mut self) -> Result<u16, Error> {
		self.cursor
			.read_u16::<BigEndian>()
			.map_err(|_| Error::UnexpectedEof)
	}
	fn read_u32(&mut self) -> Result<u32, Error> {
		self.cursor
			.read_u32::<BigEndian>()
			.map_err(|_| Error::UnexpectedEof)
	}
	fn read_u64(&mut self) -> Result<u64, Error> {
		self.cursor
			.read_u64::<BigEndian>()
			.map_err(|_| Error::UnexpectedEof)
	}
	fn read_i64(&mut self) -> Result<i64, Error> {
		self.cursor
			.read_i64::<BigEndian>()
			.map_err(|_| Error::UnexpectedEof)
	}
	fn read_fixed_bytes(&mut self, len: usize) -> Result<Vec<u8>, Error> {
		if self.remaining() < len {
			return Err(Error::UnexpectedEof);
		}
		let mut buf = vec![0u8; len];
		std::io::Read::read_exact(&mut self.cursor, &mut buf).map_err(|_| Error::UnexpectedEof)?;
		Ok(buf)
	}
}

/// Serialize any `Writeable` into a fresh buffer.
pub fn serialize<T: Writeable>(value: &T) -> Result<Vec<u8>, Error> {
	let mut buf = Vec::new();
	{
		let mut w = BinWriter::new(&mut buf);
		value.write(&mut w)?;
	}
	Ok(buf)
}

/// Deserialize a `Readable` from a byte slice, requiring the whole slice
/// to be consumed.
pub fn deserialize<T: Readable>(data: &[u8]) -> Result<T, Error> {
	let mut r = BinReader::new(data);
	T::read(&mut r)
}

impl Writeable for Hash {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error> {
		writer.write_fixed_bytes(self.as_bytes())
	}
}

impl Readable for Hash {
	fn read<R: Reader>(reader: &mut R) -> Result<Self, Error> {
		let bytes = reader.read_fixed_bytes(HASH_LEN)?;
		Hash::from_slice(&bytes).ok_or(Error::BadFieldLength("hash"))
	}
}

impl Writeable for Id {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error> {
		writer.write_fixed_bytes(self.as_bytes())
	}
}

impl Readable for Id {
	fn read<R: Reader>(reader: &mut R) -> Result<Self, Error> {
		let bytes = reader.read_fixed_bytes(ID_LEN)?;
		Id::from_bytes(&bytes).map_err(|_| Error::BadFieldLength("id"))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hash_round_trips() {
		let h = Hash::digest(b"round trip");
		let bytes = serialize(&h).unwrap();
		let back: Hash = deserialize(&bytes).unwrap();
		assert_eq!(h, back);
	}

	#[test]
	fn var_bytes_round_trip() {
		let mut buf = Vec::new();
		{
			let mut w = BinWriter::new(&mut buf);
			w.write_var_bytes(b"hello world").unwrap();
		}
		let mut r = BinReader::new(&buf);
		assert_eq!(r.read_var_bytes().unwrap(), b"hello world".to_vec());
	}

	#[test]
	fn truncated_buffer_errors() {
		let mut r = BinReader::new(&[1, 2]);
		assert!(r.read_u32().is_err());
	}
}
