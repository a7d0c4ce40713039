//! TCP wire frames and the core protocol message set (§3, §4.5, §4.6).
//!
//! Every TCP frame is `length(u32) | crc32(u32) | protocol_id(u8) | payload`,
//! where `length` covers everything from `protocol_id` onward and `crc32`
//! is the checksum of that same span. Within `payload`, every message
//! leads with its own `version(u8) | type(u8)` header before the body.

use crate::block::Block;
use crate::error::Error;
use crate::proof::PotProof;
use crate::ser::{Readable, Reader, Writeable, Writer};
use crate::tx::Tx;
use ecoin_crypto::Hash;

/// Frame header size in bytes: 4 (length) + 4 (crc32).
pub const FRAME_HEADER_LEN: usize = 8;
/// Reject any declared frame length above this, to bound allocation from
/// a hostile or corrupt peer.
pub const MAX_FRAME_LEN: u32 = 8 * 1024 * 1024;

/// Current message header version.
pub const PROTO_VERSION_1: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolId {
	Handshake = 1,
	Sync = 2,
	Block = 3,
	Tx = 4,
	Proof = 5,
}

impl ProtocolId {
	pub fn from_u8(b: u8) -> Result<ProtocolId, Error> {
		use ProtocolId::*;
		Ok(match b {
			1 => Handshake,
			2 => Sync,
			3 => Block,
			4 => Tx,
			5 => Proof,
			_ => return Err(Error::UnknownProtocolId(b)),
		})
	}

	pub fn as_u8(self) -> u8 {
		self as u8
	}
}

/// Build a length-prefixed, checksummed TCP frame around `payload`.
pub fn build_frame(protocol_id: ProtocolId, payload: &[u8]) -> Vec<u8> {
	let mut body = Vec::with_capacity(1 + payload.len());
	body.push(protocol_id.as_u8());
	body.extend_from_slice(payload);

	let checksum = crc32fast::hash(&body);
	let length = body.len() as u32;

	let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
	frame.extend_from_slice(&length.to_be_bytes());
	frame.extend_from_slice(&checksum.to_be_bytes());
	frame.extend_from_slice(&body);
	frame
}

/// A fully parsed frame: protocol id plus the raw payload bytes.
pub struct Frame {
	pub protocol_id: ProtocolId,
	pub payload: Vec<u8>,
}

/// Parse the fixed 8-byte frame header, returning the declared body
/// length so the caller can read exactly that many more bytes.
pub fn parse_frame_header(header: &[u8; FRAME_HEADER_LEN]) -> Result<(u32, u32), Error> {
	let length = u32::from_be_bytes(header[0..4].try_into().unwrap());
	let checksum = u32::from_be_bytes(header[4..8].try_into().unwrap());
	if length == 0 || length > MAX_FRAME_LEN {
		return Err(Error::FrameLengthMismatch {
			declared: length,
			actual: 0,
		});
	}
	Ok((length, checksum))
}

/// Validate and decode a frame body (`protocol_id | payload`) against the
/// checksum and length read from the header.
pub fn parse_frame_body(declared_len: u32, checksum: u32, body: &[u8]) -> Result<Frame, Error> {
	if body.len() as u32 != declared_len {
		return Err(Error::FrameLengthMismatch {
			declared: declared_len,
			actual: body.len() as u32,
		});
	}
	if crc32fast::hash(body) != checksum {
		return Err(Error::ChecksumMismatch);
	}
	let protocol_id = ProtocolId::from_u8(body[0])?;
	Ok(Frame {
		protocol_id,
		payload: body[1..].to_vec(),
	})
}

/// The §4.5 message type byte, carried in every message's own header
/// alongside [`PROTO_VERSION_1`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
	SyncReq = 1,
	SyncResp = 2,
	BlockReq = 3,
	BlockResp = 4,
	BlockBroadcast = 5,
	TxBroadcast = 6,
	ProofBroadcast = 7,
}

impl MessageType {
	pub fn from_u8(b: u8) -> Result<MessageType, Error> {
		use MessageType::*;
		Ok(match b {
			1 => SyncReq,
			2 => SyncResp,
			3 => BlockReq,
			4 => BlockResp,
			5 => BlockBroadcast,
			6 => TxBroadcast,
			7 => ProofBroadcast,
			_ => return Err(Error::UnknownMessageType(b)),
		})
	}

	pub fn as_u8(self) -> u8 {
		self as u8
	}
}

fn write_header<W: Writer>(writer: &mut W, ty: MessageType) -> Result<(), Error> {
	writer.write_u8(PROTO_VERSION_1)?;
	writer.write_u8(ty.as_u8())
}

/// Read and validate the `version(u8) | type(u8)` header, returning the
/// type so a multi-type dispatcher (e.g. [`SyncMessage`]) can match on it.
fn read_header<R: Reader>(reader: &mut R) -> Result<MessageType, Error> {
	let version = reader.read_u8()?;
	if version != PROTO_VERSION_1 {
		return Err(Error::UnsupportedVersion(version));
	}
	MessageType::from_u8(reader.read_u8()?)
}

fn expect_header<R: Reader>(reader: &mut R, expected: MessageType) -> Result<(), Error> {
	let ty = read_header(reader)?;
	if ty != expected {
		return Err(Error::UnknownMessageType(ty.as_u8()));
	}
	Ok(())
}

/// Type 1: announce `base`, our latest block hash, so the peer can tell us
/// how far behind we are.
#[derive(Debug, Clone)]
pub struct SyncReq {
	pub base: Hash,
}

/// Type 2: `base` echoed back, `end` the responder's own latest hash, and
/// `height_diff` the gap between them (0 means the requester is already
/// caught up).
#[derive(Debug, Clone)]
pub struct SyncResp {
	pub base: Hash,
	pub end: Hash,
	pub height_diff: u32,
}

/// Type 3: request the blocks in `(base, end]`, bodies only unless
/// `only_header` is set.
#[derive(Debug, Clone)]
pub struct BlockReq {
	pub base: Hash,
	pub end: Hash,
	pub only_header: bool,
}

/// Type 4: the requested blocks, in order.
#[derive(Debug, Clone)]
pub struct BlockResp {
	pub blocks: Vec<Block>,
}

/// Type 5: a single freshly minted block.
#[derive(Debug, Clone)]
pub struct BlockBroadcast {
	pub block: Block,
}

/// Type 6: one or more transactions broadcast together.
#[derive(Debug, Clone)]
pub struct TxBroadcast {
	pub txs: Vec<Tx>,
}

/// Type 7: one signed PoT proof.
#[derive(Debug, Clone)]
pub struct ProofBroadcast {
	pub proof: PotProof,
}

impl Writeable for SyncReq {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error> {
		write_header(writer, MessageType::SyncReq)?;
		self.base.write(writer)
	}
}

impl Readable for SyncReq {
	fn read<R: Reader>(reader: &mut R) -> Result<Self, Error> {
		expect_header(reader, MessageType::SyncReq)?;
		Ok(SyncReq { base: Hash::read(reader)? })
	}
}

impl Writeable for SyncResp {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error> {
		write_header(writer, MessageType::SyncResp)?;
		self.base.write(writer)?;
		self.end.write(writer)?;
		writer.write_u32(self.height_diff)
	}
}

impl Readable for SyncResp {
	fn read<R: Reader>(reader: &mut R) -> Result<Self, Error> {
		expect_header(reader, MessageType::SyncResp)?;
		let base = Hash::read(reader)?;
		let end = Hash::read(reader)?;
		let height_diff = reader.read_u32()?;
		Ok(SyncResp { base, end, height_diff })
	}
}

impl Writeable for BlockReq {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error> {
		write_header(writer, MessageType::BlockReq)?;
		self.base.write(writer)?;
		self.end.write(writer)?;
		writer.write_u8(if self.only_header { 1 } else { 0 })
	}
}

impl Readable for BlockReq {
	fn read<R: Reader>(reader: &mut R) -> Result<Self, Error> {
		expect_header(reader, MessageType::BlockReq)?;
		let base = Hash::read(reader)?;
		let end = Hash::read(reader)?;
		let only_header = reader.read_u8()? != 0;
		Ok(BlockReq { base, end, only_header })
	}
}

impl Writeable for BlockResp {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error> {
		write_header(writer, MessageType::BlockResp)?;
		if self.blocks.len() > u16::MAX as usize {
			return Err(Error::FieldTooLarge("blocks"));
		}
		writer.write_u16(self.blocks.len() as u16)?;
		for block in &self.blocks {
			write_sized_block(block, writer)?;
		}
		Ok(())
	}
}

impl Readable for BlockResp {
	fn read<R: Reader>(reader: &mut R) -> Result<Self, Error> {
		expect_header(reader, MessageType::BlockResp)?;
		let count = reader.read_u16()? as usize;
		let mut blocks = Vec::with_capacity(count);
		for _ in 0..count {
			blocks.push(read_sized_block(reader)?);
		}
		Ok(BlockResp { blocks })
	}
}

impl Writeable for BlockBroadcast {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error> {
		write_header(writer, MessageType::BlockBroadcast)?;
		write_block(&self.block, writer)
	}
}

impl Readable for BlockBroadcast {
	fn read<R: Reader>(reader: &mut R) -> Result<Self, Error> {
		expect_header(reader, MessageType::BlockBroadcast)?;
		Ok(BlockBroadcast {
			block: read_block(reader)?,
		})
	}
}

impl Writeable for TxBroadcast {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error> {
		write_header(writer, MessageType::TxBroadcast)?;
		if self.txs.len() > u16::MAX as usize {
			return Err(Error::FieldTooLarge("txs"));
		}
		writer.write_u16(self.txs.len() as u16)?;
		for tx in &self.txs {
			tx.write(writer)?;
		}
		Ok(())
	}
}

impl Readable for TxBroadcast {
	fn read<R: Reader>(reader: &mut R) -> Result<Self, Error> {
		expect_header(reader, MessageType::TxBroadcast)?;
		let count = reader.read_u16()? as usize;
		let mut txs = Vec::with_capacity(count);
		for _ in 0..count {
			txs.push(Tx::read(reader)?);
		}
		Ok(TxBroadcast { txs })
	}
}

impl Writeable for ProofBroadcast {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error> {
		write_header(writer, MessageType::ProofBroadcast)?;
		self.proof.write(writer)
	}
}

impl Readable for ProofBroadcast {
	fn read<R: Reader>(reader: &mut R) -> Result<Self, Error> {
		expect_header(reader, MessageType::ProofBroadcast)?;
		Ok(ProofBroadcast {
			proof: PotProof::read(reader)?,
		})
	}
}

/// The four sync-protocol messages share one `ProtocolId::Sync` wire
/// channel; the leading `version|type` header (common to every message)
/// is read once here and used to dispatch to the right body.
#[derive(Debug, Clone)]
pub enum SyncMessage {
	Req(SyncReq),
	Resp(SyncResp),
	BlockReq(BlockReq),
	BlockResp(BlockResp),
}

impl Writeable for SyncMessage {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error> {
		match self {
			SyncMessage::Req(m) => m.write(writer),
			SyncMessage::Resp(m) => m.write(writer),
			SyncMessage::BlockReq(m) => m.write(writer),
			SyncMessage::BlockResp(m) => m.write(writer),
		}
	}
}

impl Readable for SyncMessage {
	fn read<R: Reader>(reader: &mut R) -> Result<Self, Error> {
		let ty = read_header(reader)?;
		Ok(match ty {
			MessageType::SyncReq => SyncMessage::Req(SyncReq { base: Hash::read(reader)? }),
			MessageType::SyncResp => SyncMessage::Resp(SyncResp {
				base: Hash::read(reader)?,
				end: Hash::read(reader)?,
				height_diff: reader.read_u32()?,
			}),
			MessageType::BlockReq => SyncMessage::BlockReq(BlockReq {
				base: Hash::read(reader)?,
				end: Hash::read(reader)?,
				only_header: reader.read_u8()? != 0,
			}),
			MessageType::BlockResp => {
				let count = reader.read_u16()? as usize;
				let mut blocks = Vec::with_capacity(count);
				for _ in 0..count {
					blocks.push(read_sized_block(reader)?);
				}
				SyncMessage::BlockResp(BlockResp { blocks })
			}
			other => return Err(Error::UnknownMessageType(other.as_u8())),
		})
	}
}

/// A block carries a variable number of transactions, so it is framed as
/// `header | u16 tx count | tx...` rather than going through the generic
/// `Writeable` impl (which would need a `Block` type with a `Readable`
/// bound already satisfied by its fields).
fn write_block<W: Writer>(block: &Block, writer: &mut W) -> Result<(), Error> {
	block.header.write(writer)?;
	if block.txs.len() > u16::MAX as usize {
		return Err(Error::FieldTooLarge("txs"));
	}
	writer.write_u16(block.txs.len() as u16)?;
	for tx in &block.txs {
		tx.write(writer)?;
	}
	Ok(())
}

fn read_block<R: Reader>(reader: &mut R) -> Result<Block, Error> {
	let header = crate::block::BlockHeader::read(reader)?;
	let count = reader.read_u16()? as usize;
	let mut txs = Vec::with_capacity(count);
	for _ in 0..count {
		txs.push(Tx::read(reader)?);
	}
	Ok(Block { header, txs })
}

/// `BlockResp`'s list entries are each `len(u16) | block_bytes` (§4.5
/// type 4), so a malformed block doesn't desync the rest of the list.
fn write_sized_block<W: Writer>(block: &Block, writer: &mut W) -> Result<(), Error> {
	let mut body = Vec::new();
	{
		let mut w = crate::ser::BinWriter::new(&mut body);
		write_block(block, &mut w)?;
	}
	writer.write_var_bytes(&body)
}

fn read_sized_block<R: Reader>(reader: &mut R) -> Result<Block, Error> {
	let body = reader.read_var_bytes()?;
	let mut r = crate::ser::BinReader::new(&body);
	read_block(&mut r)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ser::{deserialize, serialize};

	#[test]
	fn frame_round_trips() {
		let payload = b"hello peer".to_vec();
		let frame = build_frame(ProtocolId::Sync, &payload);

		let mut header = [0u8; FRAME_HEADER_LEN];
		header.copy_from_slice(&frame[..FRAME_HEADER_LEN]);
		let (len, checksum) = parse_frame_header(&header).unwrap();

		let body = &frame[FRAME_HEADER_LEN..];
		let parsed = parse_frame_body(len, checksum, body).unwrap();
		assert_eq!(parsed.protocol_id, ProtocolId::Sync);
		assert_eq!(parsed.payload, payload);
	}

	#[test]
	fn corrupted_frame_fails_checksum() {
		let frame = build_frame(ProtocolId::Tx, b"payload");
		let mut header = [0u8; FRAME_HEADER_LEN];
		header.copy_from_slice(&frame[..FRAME_HEADER_LEN]);
		let (len, checksum) = parse_frame_header(&header).unwrap();

		let mut body = frame[FRAME_HEADER_LEN..].to_vec();
		body[1] ^= 0xff;
		assert!(parse_frame_body(len, checksum, &body).is_err());
	}

	#[test]
	fn sync_req_round_trips() {
		let req = SyncReq { base: Hash::digest(b"base") };
		let bytes = serialize(&req).unwrap();
		let back: SyncReq = deserialize(&bytes).unwrap();
		assert_eq!(back.base, req.base);
	}

	#[test]
	fn sync_resp_round_trips() {
		let resp = SyncResp {
			base: Hash::digest(b"base"),
			end: Hash::digest(b"end"),
			height_diff: 42,
		};
		let bytes = serialize(&resp).unwrap();
		let back: SyncResp = deserialize(&bytes).unwrap();
		assert_eq!(back.base, resp.base);
		assert_eq!(back.end, resp.end);
		assert_eq!(back.height_diff, 42);
	}

	#[test]
	fn block_req_round_trips() {
		let req = BlockReq {
			base: Hash::digest(b"base"),
			end: Hash::digest(b"end"),
			only_header: true,
		};
		let bytes = serialize(&req).unwrap();
		let back: BlockReq = deserialize(&bytes).unwrap();
		assert_eq!(back.base, req.base);
		assert_eq!(back.end, req.end);
		assert!(back.only_header);
	}

	#[test]
	fn sync_message_dispatches_on_embedded_type() {
		let req = SyncMessage::Req(SyncReq { base: Hash::digest(b"base") });
		let bytes = serialize(&req).unwrap();
		let back: SyncMessage = deserialize(&bytes).unwrap();
		assert!(matches!(back, SyncMessage::Req(_)));
	}

	#[test]
	fn wrong_message_type_is_rejected() {
		let resp = SyncResp {
			base: Hash::digest(b"base"),
			end: Hash::digest(b"end"),
			height_diff: 0,
		};
		let bytes = serialize(&resp).unwrap();
		let err = deserialize::<SyncReq>(&bytes).unwrap_err();
		assert!(matches!(err, Error::UnknownMessageType(_)));
	}
}
