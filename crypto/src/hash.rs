//! 32-byte hashes. A zero hash is the sentinel for "unset" (empty merkle
//! root, coinbase previous-tx).

use sha2::{Digest, Sha256};
use std::fmt;

pub const HASH_LEN: usize = 32;

/// The reserved "unset" hash value.
pub const ZERO_HASH: Hash = Hash([0u8; HASH_LEN]);

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash(pub [u8; HASH_LEN]);

impl Hash {
	pub fn from_slice(b: &[u8]) -> Option<Hash> {
		if b.len() != HASH_LEN {
			return None;
		}
		let mut out = [0u8; HASH_LEN];
		out.copy_from_slice(b);
		Some(Hash(out))
	}

	pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
		&self.0
	}

	pub fn is_zero(&self) -> bool {
		*self == ZERO_HASH
	}

	/// Single SHA-256 pass over `data`.
	pub fn digest(data: &[u8]) -> Hash {
		let out = Sha256::digest(data);
		Hash::from_slice(&out).expect("sha256 output is 32 bytes")
	}

	/// Double SHA-256, used where the original implementation applies a
	/// second hashing pass for extra mixing.
	pub fn digest_double(data: &[u8]) -> Hash {
		Hash::digest(Hash::digest(data).as_bytes())
	}
}

impl fmt::Debug for Hash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for b in &self.0[..4] {
			write!(f, "{:02x}", b)?;
		}
		write!(f, "..")
	}
}

impl fmt::Display for Hash {
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

	#[test]
	fn zero_hash_is_zero() {
		assert!(ZERO_HASH.is_zero());
		assert!(!Hash::digest(b"x").is_zero());
	}

	#[test]
	fn digest_is_deterministic() {
		assert_eq!(Hash::digest(b"abc"), Hash::digest(b"abc"));
		assert_ne!(Hash::digest(b"abc"), Hash::digest(b"abd"));
	}
}
