//! Thin wrapper around the `secp256k1` crate so the rest of the node deals
//! in `PrivateKey`/`PublicKey`/`Signature` without naming the underlying
//! curve library directly (see SPEC_FULL §1 on the EC library boundary).

use crate::error::Error;
use secp256k1::ecdh::SharedSecret;
use secp256k1::{ecdsa, Message, PublicKey as SecpPublicKey, Secp256k1, SecretKey};
use zeroize::Zeroize;

#[derive(Clone)]
pub struct PrivateKey(SecretKey);

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(SecpPublicKey);

pub struct Signature(ecdsa::Signature);

impl PrivateKey {
	pub fn generate() -> PrivateKey {
		let mut rng = rand::thread_rng();
		PrivateKey(SecretKey::new(&mut rng))
	}

	pub fn from_bytes(b: &[u8]) -> Result<PrivateKey, Error> {
		SecretKey::from_slice(b)
			.map(PrivateKey)
			.map_err(|_| Error::MalformedPrivateKey)
	}

	pub fn to_bytes(&self) -> [u8; 32] {
		self.0.secret_bytes()
	}

	pub fn public_key(&self) -> PublicKey {
		let secp = Secp256k1::signing_only();
		PublicKey(SecpPublicKey::from_secret_key(&secp, &self.0))
	}

	pub fn sign(&self, msg_hash: &[u8; 32]) -> Signature {
		let secp = Secp256k1::signing_only();
		let msg = Message::from_slice(msg_hash).expect("32-byte hash");
		Signature(secp.sign_ecdsa(&msg, &self.0))
	}

	/// ECDH shared secret, used by the handshake session codec to derive
	/// the AES-GCM key and nonce.
	pub fn ecdh(&self, peer: &PublicKey) -> [u8; 32] {
		let shared = SharedSecret::new(&peer.0, &self.0);
		let mut out = [0u8; 32];
		out.copy_from_slice(shared.as_ref());
		out
	}
}

impl Drop for PrivateKey {
	fn drop(&mut self) {
		let mut bytes = self.0.secret_bytes();
		bytes.zeroize();
	}
}

impl PublicKey {
	pub fn from_compressed(b: &[u8]) -> Result<PublicKey, Error> {
		SecpPublicKey::from_slice(b)
			.map(PublicKey)
			.map_err(|_| Error::MalformedPublicKey)
	}

	pub fn serialize_compressed(&self) -> [u8; 33] {
		self.0.serialize()
	}

	pub fn verify(&self, msg_hash: &[u8; 32], sig: &Signature) -> bool {
		let secp = Secp256k1::verification_only();
		let msg = match Message::from_slice(msg_hash) {
			Ok(m) => m,
			Err(_) => return false,
		};
		secp.verify_ecdsa(&msg, &sig.0, &self.0).is_ok()
	}
}

impl Signature {
	pub fn from_der(b: &[u8]) -> Result<Signature, Error> {
		ecdsa::Signature::from_der(b)
			.map(Signature)
			.map_err(|_| Error::MalformedSignature)
	}

	pub fn to_der(&self) -> Vec<u8> {
		self.0.serialize_der().to_vec()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sign_and_verify() {
		let sk = PrivateKey::generate();
		let pk = sk.public_key();
		let hash = crate::hash::Hash::digest(b"hello");
		let sig = sk.sign(hash.as_bytes());
		assert!(pk.verify(hash.as_bytes(), &sig));

		let der = sig.to_der();
		let sig2 = Signature::from_der(&der).unwrap();
		assert!(pk.verify(hash.as_bytes(), &sig2));
	}

	#[test]
	fn verify_rejects_wrong_key() {
		let sk = PrivateKey::generate();
		let other = PrivateKey::generate().public_key();
		let hash = crate::hash::Hash::digest(b"hello");
		let sig = sk.sign(hash.as_bytes());
		assert!(!other.verify(hash.as_bytes(), &sig));
	}

	#[test]
	fn ecdh_is_symmetric() {
		let a = PrivateKey::generate();
		let b = PrivateKey::generate();
		let shared_a = a.ecdh(&b.public_key());
		let shared_b = b.ecdh(&a.public_key());
		assert_eq!(shared_a, shared_b);
	}
}
