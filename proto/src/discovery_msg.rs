//! UDP discovery datagrams (§3, §4.6). Every datagram is
//! `version(u8) | type(u8) | time(i64) | body`; a datagram whose `time`
//! is more than [`STALENESS_SECS`] away from the receiver's clock is
//! dropped rather than processed, to bound replay and clock-skew abuse.

use crate::error::Error;
use crate::ser::{deserialize, serialize, Readable, Reader, Writeable, Writer};
use ecoin_crypto::Id;
use std::net::SocketAddr;

pub const DISCOVERY_VERSION_1: u8 = 1;
/// Datagrams older or newer than this relative to the local clock are
/// discarded unprocessed.
pub const STALENESS_SECS: i64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryType {
	Ping = 1,
	Pong = 2,
	GetNeighbours = 3,
	Neighbours = 4,
}

impl DiscoveryType {
	pub fn from_u8(b: u8) -> Result<DiscoveryType, Error> {
		use DiscoveryType::*;
		Ok(match b {
			1 => Ping,
			2 => Pong,
			3 => GetNeighbours,
			4 => Neighbours,
			_ => return Err(Error::UnknownMessageType(b)),
		})
	}

	pub fn as_u8(self) -> u8 {
		self as u8
	}
}

/// A single neighbour advertisement: id plus dialable address.
#[derive(Debug, Clone)]
pub struct NeighbourInfo {
	pub id: Id,
	pub addr: SocketAddr,
}

impl Writeable for NeighbourInfo {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error> {
		self.id.write(writer)?;
		let addr_str = self.addr.to_string();
		writer.write_var_bytes(addr_str.as_bytes())
	}
}

impl Readable for NeighbourInfo {
	fn read<R: Reader>(reader: &mut R) -> Result<Self, Error> {
		let id = Id::read(reader)?;
		let addr_bytes = reader.read_var_bytes()?;
		let addr_str =
			String::from_utf8(addr_bytes).map_err(|_| Error::BadFieldLength("neighbour addr"))?;
		let addr = addr_str
			.parse()
			.map_err(|_| Error::BadFieldLength("neighbour addr"))?;
		Ok(NeighbourInfo { id, addr })
	}
}

#[derive(Debug, Clone)]
pub enum DiscoveryBody {
	Ping { id: Id },
	Pong { id: Id },
	GetNeighbours { id: Id },
	Neighbours { neighbours: Vec<NeighbourInfo> },
}

/// A full discovery datagram, with the outer `version | type | time`
/// header already parsed into `time`.
#[derive(Debug, Clone)]
pub struct DiscoveryMessage {
	pub version: u8,
	pub time: i64,
	pub body: DiscoveryBody,
}

impl DiscoveryMessage {
	pub fn new(body: DiscoveryBody, time: i64) -> DiscoveryMessage {
		DiscoveryMessage {
			version: DISCOVERY_VERSION_1,
			time,
			body,
		}
	}

	fn type_tag(&self) -> DiscoveryType {
		match &self.body {
			DiscoveryBody::Ping { .. } => DiscoveryType::Ping,
			DiscoveryBody::Pong { .. } => DiscoveryType::Pong,
			DiscoveryBody::GetNeighbours { .. } => DiscoveryType::GetNeighbours,
			DiscoveryBody::Neighbours { .. } => DiscoveryType::Neighbours,
		}
	}

	/// Whether `self.time`, compared against `now`, falls outside the
	/// acceptable staleness window and should be dropped unprocessed.
	pub fn is_stale(&self, now: i64) -> bool {
		(now - self.time).unsigned_abs() > STALENESS_SECS as u64
	}

	pub fn encode(&self) -> Result<Vec<u8>, Error> {
		let mut buf = Vec::new();
		buf.push(self.version);
		buf.push(self.type_tag().as_u8());
		buf.extend_from_slice(&self.time.to_be_bytes());
		let body_bytes = match &self.body {
			DiscoveryBody::Ping { id } => serialize(id)?,
			DiscoveryBody::Pong { id } => serialize(id)?,
			DiscoveryBody::GetNeighbours { id } => serialize(id)?,
			DiscoveryBody::Neighbours { neighbours } => {
				let mut w = Vec::new();
				{
					let mut writer = crate::ser::BinWriter::new(&mut w);
					if neighbours.len() > u16::MAX as usize {
						return Err(Error::FieldTooLarge("neighbours"));
					}
					writer.write_u16(neighbours.len() as u16)?;
					for n in neighbours {
						n.write(&mut writer)?;
					}
				}
				w
			}
		};
		buf.extend_from_slice(&body_bytes);
		Ok(buf)
	}

	pub fn decode(data: &[u8]) -> Result<DiscoveryMessage, Error> {
		if data.len() < 10 {
			return Err(Error::UnexpectedEof);
		}
		let version = data[0];
		if version != DISCOVERY_VERSION_1 {
			return Err(Error::UnsupportedVersion(version));
		}
		let msg_type = DiscoveryType::from_u8(data[1])?;
		let time = i64::from_be_bytes(data[2..10].try_into().unwrap());
		let rest = &data[10..];
		let body = match msg_type {
			DiscoveryType::Ping => DiscoveryBody::Ping {
				id: deserialize(rest)?,
			},
			DiscoveryType::Pong => DiscoveryBody::Pong {
				id: deserialize(rest)?,
			},
			DiscoveryType::GetNeighbours => DiscoveryBody::GetNeighbours {
				id: deserialize(rest)?,
			},
			DiscoveryType::Neighbours => {
				let mut reader = crate::ser::BinReader::new(rest);
				let count = reader.read_u16()? as usize;
				let mut neighbours = Vec::with_capacity(count);
				for _ in 0..count {
					neighbours.push(NeighbourInfo::read(&mut reader)?);
				}
				DiscoveryBody::Neighbours { neighbours }
			}
		};
		Ok(DiscoveryMessage {
			version,
			time,
			body,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use ecoin_crypto::{Account, PrivateKey, Role};

	#[test]
	fn ping_round_trips() {
		let acc = Account::from_private_key(Role::Hospital, PrivateKey::generate());
		let msg = DiscoveryMessage::new(DiscoveryBody::Ping { id: acc.id() }, 1_000);
		let bytes = msg.encode().unwrap();
		let back = DiscoveryMessage::decode(&bytes).unwrap();
		match back.body {
			DiscoveryBody::Ping { id } => assert_eq!(id, acc.id()),
			_ => panic!("wrong variant"),
		}
	}

	#[test]
	fn neighbours_round_trips() {
		let acc = Account::from_private_key(Role::Researcher, PrivateKey::generate());
		let neighbour = NeighbourInfo {
			id: acc.id(),
			addr: "127.0.0.1:9000".parse().unwrap(),
		};
		let msg = DiscoveryMessage::new(
			DiscoveryBody::Neighbours {
				neighbours: vec![neighbour],
			},
			42,
		);
		let bytes = msg.encode().unwrap();
		let back = DiscoveryMessage::decode(&bytes).unwrap();
		match back.body {
			DiscoveryBody::Neighbours { neighbours } => assert_eq!(neighbours.len(), 1),
			_ => panic!("wrong variant"),
		}
	}

	#[test]
	fn stale_message_detected() {
		let msg = DiscoveryMessage::new(
			DiscoveryBody::Ping { id: ecoin_crypto::Id::ZERO },
			1_000,
		);
		assert!(msg.is_stale(1_000 + STALENESS_SECS + 1));
		assert!(!msg.is_stale(1_000 + STALENESS_SECS - 1));
	}
}
