//! Role-tagged node/account identities.
//!
//! An `Id` is 54 bytes: one role byte followed by the base32 (no padding)
//! encoding of a 33-byte compressed secp256k1 public key (53 characters).
//! A zero `Id` is reserved for "no sender" (e.g. coinbase `from`).

use crate::error::Error;
use crate::keys::PublicKey;
use std::fmt;

pub const ID_LEN: usize = 54;
const PUBKEY_B32_LEN: usize = 53;

const B32: base32::Alphabet = base32::Alphabet::RFC4648 { padding: false };

/// Node/account role. A-role (`Hospital`, `Researcher`) nodes are workers
/// eligible to produce blocks; B-role (`Patient`, `Doctor`) nodes only
/// submit and observe transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
	Hospital = 1,
	Researcher = 2,
	Patient = 10,
	Doctor = 11,
}

impl Role {
	pub fn from_u8(b: u8) -> Option<Role> {
		match b {
			1 => Some(Role::Hospital),
			2 => Some(Role::Researcher),
			10 => Some(Role::Patient),
			11 => Some(Role::Doctor),
			_ => None,
		}
	}

	pub fn as_u8(self) -> u8 {
		self as u8
	}

	/// A-role nodes compete to produce blocks.
	pub fn is_worker(self) -> bool {
		matches!(self, Role::Hospital | Role::Researcher)
	}

	/// B-role nodes only inject/observe transactions.
	pub fn is_observer(self) -> bool {
		matches!(self, Role::Patient | Role::Doctor)
	}
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Id([u8; ID_LEN]);

impl Id {
	/// The reserved zero identity (coinbase sender, "nobody").
	pub const ZERO: Id = Id([0u8; ID_LEN]);

	pub fn from_role_and_pubkey(role: Role, pubkey: &PublicKey) -> Id {
		let compressed = pubkey.serialize_compressed();
		let encoded = base32::encode(B32, &compressed);
		debug_assert_eq!(encoded.len(), PUBKEY_B32_LEN);
		let mut bytes = [0u8; ID_LEN];
		bytes[0] = role.as_u8();
		bytes[1..].copy_from_slice(encoded.as_bytes());
		Id(bytes)
	}

	pub fn from_bytes(b: &[u8]) -> Result<Id, Error> {
		if b.len() != ID_LEN {
			return Err(Error::InvalidId("wrong length"));
		}
		let id = Id(b.try_into().expect("length checked"));
		id.role().ok_or(Error::InvalidId("unknown role byte"))?;
		Ok(id)
	}

	pub fn as_bytes(&self) -> &[u8; ID_LEN] {
		&self.0
	}

	pub fn is_zero(&self) -> bool {
		*self == Id::ZERO
	}

	pub fn role(&self) -> Option<Role> {
		Role::from_u8(self.0[0])
	}

	pub fn is_valid(&self) -> bool {
		self.role().is_some()
	}

	/// Recover the compressed public key encoded in this id.
	pub fn public_key(&self) -> Result<PublicKey, Error> {
		let b32 = std::str::from_utf8(&self.0[1..]).map_err(|_| Error::InvalidId("non-utf8 key"))?;
		let compressed =
			base32::decode(B32, b32).ok_or(Error::InvalidId("bad base32 key encoding"))?;
		PublicKey::from_compressed(&compressed)
	}
}

impl fmt::Debug for Id {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "<{}>|[", self.0[0])?;
		for b in &self.0[1..9] {
			write!(f, "{:X}", b)?;
		}
		write!(f, "..]")
	}
}

impl fmt::Display for Id {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for b in &self.0 {
			write!(f, "{:02x}", b)?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::keys::PrivateKey;

	#[test]
	fn id_round_trips_pubkey() {
		let sk = PrivateKey::generate();
		let pk = sk.public_key();
		let id = Id::from_role_and_pubkey(Role::Hospital, &pk);
		assert_eq!(id.as_bytes().len(), ID_LEN);
		assert_eq!(id.role(), Some(Role::Hospital));
		let recovered = id.public_key().unwrap();
		assert_eq!(recovered.serialize_compressed(), pk.serialize_compressed());
	}

	#[test]
	fn zero_id_is_invalid_role() {
		assert!(!Id::ZERO.is_valid());
		assert!(Id::ZERO.is_zero());
	}

	#[test]
	fn worker_vs_observer() {
		assert!(Role::Hospital.is_worker());
		assert!(Role::Researcher.is_worker());
		assert!(Role::Patient.is_observer());
		assert!(Role::Doctor.is_observer());
	}
}
