//! Session handshake: each side generates an ephemeral session keypair,
//! exchanges it signed with its long-term key, then both derive the same
//! AES-GCM-256 key/nonce from the ECDH shared secret of the two session
//! keys. Grounded on `protocol/handshake/{request,response}.go` (wire
//! fields, sign/verify) and `p2p/negotiator.go` (the request/response
//! exchange and the accept/reject checks).

use crate::error::Error;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use ecoin_crypto::{Hash, Id, PrivateKey, PublicKey, Role, Signature};
use ecoin_proto::ser::{deserialize, serialize, BinWriter, Readable, Reader, Writeable, Writer};
use sha2::{Digest, Sha512};

/// Encrypts/decrypts session traffic once the handshake completes. The
/// key and nonce are fixed for the lifetime of one session, matching the
/// original's single-nonce-per-session `aesgcmCodec`.
pub struct SessionCodec {
	aead: Aes256Gcm,
	nonce: [u8; 12],
}

impl SessionCodec {
	/// `remote_session_key` is the peer's ephemeral pubkey; `local_session_key`
	/// is our own ephemeral private key for this handshake.
	pub fn derive(remote_session_key: &PublicKey, local_session_key: &PrivateKey) -> SessionCodec {
		let shared = local_session_key.ecdh(remote_session_key);
		let digest = Sha512::digest(shared);
		let key = Aes256Gcm::new_from_slice(&digest[..32]).expect("32-byte key");
		let mut nonce = [0u8; 12];
		nonce.copy_from_slice(&digest[32..44]);
		SessionCodec { aead: key, nonce }
	}

	pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
		self.aead
			.encrypt(Nonce::from_slice(&self.nonce), plaintext)
			.map_err(|_| Error::Codec("encrypt failed"))
	}

	pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
		self.aead
			.decrypt(Nonce::from_slice(&self.nonce), ciphertext)
			.map_err(|_| Error::Codec("decrypt failed"))
	}
}

const HANDSHAKE_VERSION_1: u8 = 1;
const RESPONSE_ACCEPT: u8 = 1;
const RESPONSE_REJECT: u8 = 2;

#[derive(Debug, Clone)]
pub struct HandshakeRequest {
	pub version: u8,
	pub chain_id: u8,
	pub code_version: u16,
	pub node_role: Role,
	pub from: Id,
	pub session_key: [u8; 33],
	pub sig: Vec<u8>,
}

impl HandshakeRequest {
	pub fn new_signed(
		chain_id: u8,
		code_version: u16,
		from_account_role: Role,
		from: Id,
		session_key: [u8; 33],
		sign_with: impl Fn(&[u8; 32]) -> Signature,
	) -> HandshakeRequest {
		let mut req = HandshakeRequest {
			version: HANDSHAKE_VERSION_1,
			chain_id,
			code_version,
			node_role: from_account_role,
			from,
			session_key,
			sig: Vec::new(),
		};
		let hash = req.sign_content_hash();
		req.sig = sign_with(&hash).to_der();
		req
	}

	fn sign_content_hash(&self) -> [u8; 32] {
		let mut buf = Vec::new();
		{
			let mut w = BinWriter::new(&mut buf);
			w.write_u8(self.version).unwrap();
			w.write_u8(self.chain_id).unwrap();
			w.write_u16(self.code_version).unwrap();
			w.write_u8(self.node_role.as_u8()).unwrap();
			self.from.write(&mut w).unwrap();
			w.write_fixed_bytes(&self.session_key).unwrap();
		}
		*Hash::digest(&buf).as_bytes()
	}

	pub fn verify(&self) -> bool {
		let pubkey = match self.from.public_key() {
			Ok(p) => p,
			Err(_) => return false,
		};
		let sig = match Signature::from_der(&self.sig) {
			Ok(s) => s,
			Err(_) => return false,
		};
		pubkey.verify(&self.sign_content_hash(), &sig)
	}

	pub fn session_public_key(&self) -> Result<PublicKey, Error> {
		Ok(PublicKey::from_compressed(&self.session_key)?)
	}
}

impl Writeable for HandshakeRequest {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ecoin_proto::Error> {
		writer.write_u8(self.version)?;
		writer.write_u8(self.chain_id)?;
		writer.write_u16(self.code_version)?;
		writer.write_u8(self.node_role.as_u8())?;
		self.from.write(writer)?;
		writer.write_fixed_bytes(&self.session_key)?;
		writer.write_var_bytes(&self.sig)?;
		Ok(())
	}
}

impl Readable for HandshakeRequest {
	fn read<R: Reader>(reader: &mut R) -> Result<Self, ecoin_proto::Error> {
		let version = reader.read_u8()?;
		let chain_id = reader.read_u8()?;
		let code_version = reader.read_u16()?;
		let node_role_byte = reader.read_u8()?;
		let node_role =
			Role::from_u8(node_role_byte).ok_or(ecoin_proto::Error::BadFieldLength("node role"))?;
		let from = Id::read(reader)?;
		let session_key_vec = reader.read_fixed_bytes(33)?;
		let mut session_key = [0u8; 33];
		session_key.copy_from_slice(&session_key_vec);
		let sig = reader.read_var_bytes()?;
		Ok(HandshakeRequest {
			version,
			chain_id,
			code_version,
			node_role,
			from,
			session_key,
			sig,
		})
	}
}

#[derive(Debug, Clone)]
pub enum HandshakeResponse {
	Accept {
		code_version: u16,
		node_role: Role,
		session_key: [u8; 33],
		sig: Vec<u8>,
	},
	Reject {
		sig: Vec<u8>,
	},
}

impl HandshakeResponse {
	pub fn new_accept(
		code_version: u16,
		node_role: Role,
		session_key: [u8; 33],
		sign_with: impl Fn(&[u8; 32]) -> Signature,
	) -> HandshakeResponse {
		let hash = Self::sign_content_hash(
			RESPONSE_ACCEPT,
			code_version,
			Some(node_role),
			Some(&session_key),
		);
		HandshakeResponse::Accept {
			code_version,
			node_role,
			session_key,
			sig: sign_with(&hash).to_der(),
		}
	}

	pub fn new_reject(sign_with: impl Fn(&[u8; 32]) -> Signature) -> HandshakeResponse {
		let hash = Self::sign_content_hash(RESPONSE_REJECT, 0, None, None);
		HandshakeResponse::Reject {
			sig: sign_with(&hash).to_der(),
		}
	}

	pub fn is_accept(&self) -> bool {
		matches!(self, HandshakeResponse::Accept { .. })
	}

	fn sign_content_hash(
		accept: u8,
		code_version: u16,
		node_role: Option<Role>,
		session_key: Option<&[u8; 33]>,
	) -> [u8; 32] {
		let mut buf = Vec::new();
		{
			let mut w = BinWriter::new(&mut buf);
			w.write_u8(HANDSHAKE_VERSION_1).unwrap();
			w.write_u8(accept).unwrap();
			w.write_u16(code_version).unwrap();
			w.write_u8(node_role.map(Role::as_u8).unwrap_or(0)).unwrap();
			w.write_fixed_bytes(session_key.unwrap_or(&[0u8; 33])).unwrap();
		}
		*Hash::digest(&buf).as_bytes()
	}

	/// `remote_id` is the peer we dialed (already known to the caller),
	/// since an accept/reject response carries no `from` field of its own.
	pub fn verify(&self, remote_id: &Id) -> bool {
		let pubkey = match remote_id.public_key() {
			Ok(p) => p,
			Err(_) => return false,
		};
		let (hash, sig_bytes) = match self {
			HandshakeResponse::Accept {
				code_version,
				node_role,
				session_key,
				sig,
			} => (
				Self::sign_content_hash(RESPONSE_ACCEPT, *code_version, Some(*node_role), Some(session_key)),
				sig,
			),
			HandshakeResponse::Reject { sig } => {
				(Self::sign_content_hash(RESPONSE_REJECT, 0, None, None), sig)
			}
		};
		let sig = match Signature::from_der(sig_bytes) {
			Ok(s) => s,
			Err(_) => return false,
		};
		pubkey.verify(&hash, &sig)
	}

	pub fn session_public_key(&self) -> Result<PublicKey, Error> {
		match self {
			HandshakeResponse::Accept { session_key, .. } => Ok(PublicKey::from_compressed(session_key)?),
			HandshakeResponse::Reject { .. } => Err(Error::HandshakeRejected("peer rejected connection")),
		}
	}
}

impl Writeable for HandshakeResponse {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ecoin_proto::Error> {
		match self {
			HandshakeResponse::Accept {
				code_version,
				node_role,
				session_key,
				sig,
			} => {
				writer.write_u8(HANDSHAKE_VERSION_1)?;
				writer.write_u8(RESPONSE_ACCEPT)?;
				writer.write_u16(*code_version)?;
				writer.write_u8(node_role.as_u8())?;
				writer.write_fixed_bytes(session_key)?;
				writer.write_var_bytes(sig)?;
			}
			HandshakeResponse::Reject { sig } => {
				writer.write_u8(HANDSHAKE_VERSION_1)?;
				writer.write_u8(RESPONSE_REJECT)?;
				writer.write_u16(0)?;
				writer.write_u8(0)?;
				writer.write_fixed_bytes(&[0u8; 33])?;
				writer.write_var_bytes(sig)?;
			}
		}
		Ok(())
	}
}

impl Readable for HandshakeResponse {
	fn read<R: Reader>(reader: &mut R) -> Result<Self, ecoin_proto::Error> {
		let _version = reader.read_u8()?;
		let accept = reader.read_u8()?;
		let code_version = reader.read_u16()?;
		let node_role_byte = reader.read_u8()?;
		let session_key_vec = reader.read_fixed_bytes(33)?;
		let sig = reader.read_var_bytes()?;
		match accept {
			RESPONSE_ACCEPT => {
				let node_role = Role::from_u8(node_role_byte)
					.ok_or(ecoin_proto::Error::BadFieldLength("node role"))?;
				let mut session_key = [0u8; 33];
				session_key.copy_from_slice(&session_key_vec);
				Ok(HandshakeResponse::Accept {
					code_version,
					node_role,
					session_key,
					sig,
				})
			}
			_ => Ok(HandshakeResponse::Reject { sig }),
		}
	}
}

pub fn encode_request(req: &HandshakeRequest) -> Result<Vec<u8>, Error> {
	Ok(serialize(req)?)
}

pub fn decode_request(data: &[u8]) -> Result<HandshakeRequest, Error> {
	Ok(deserialize(data)?)
}

pub fn encode_response(resp: &HandshakeResponse) -> Result<Vec<u8>, Error> {
	Ok(serialize(resp)?)
}

pub fn decode_response(data: &[u8]) -> Result<HandshakeResponse, Error> {
	Ok(deserialize(data)?)
}

/// Whether an inbound request should be rejected, mirroring
/// `negotiatorImp.whetherRejectReq`: chain id must match exactly, the
/// peer's code version may not be older than ours, and (per the
/// original's same-role restriction) the peer's role must match ours.
pub fn whether_reject_req(
	req: &HandshakeRequest,
	our_chain_id: u8,
	our_role: Role,
	min_code_version: u16,
) -> Option<&'static str> {
	if req.chain_id != our_chain_id {
		return Some("chain id mismatch");
	}
	if req.code_version < min_code_version {
		return Some("code version too old");
	}
	if req.node_role != our_role {
		return Some("node role mismatch");
	}
	None
}

/// Mirrors `negotiatorImp.whetherRejectResp`.
pub fn whether_reject_resp(
	resp: &HandshakeResponse,
	remote_id: &Id,
	our_role: Role,
	min_code_version: u16,
) -> Option<&'static str> {
	if !resp.verify(remote_id) {
		return Some("bad signature");
	}
	match resp {
		HandshakeResponse::Reject { .. } => Some("connection refused"),
		HandshakeResponse::Accept {
			code_version,
			node_role,
			..
		} => {
			if *code_version < min_code_version {
				Some("code version too old")
			} else if *node_role != our_role {
				Some("node role mismatch")
			} else {
				None
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use ecoin_crypto::Account;

	fn account(role: Role) -> Account {
		Account::from_private_key(role, PrivateKey::generate())
	}

	#[test]
	fn request_round_trips_and_verifies() {
		let acc = account(Role::Hospital);
		let session = PrivateKey::generate();
		let req = HandshakeRequest::new_signed(
			1,
			1,
			Role::Hospital,
			acc.id(),
			session.public_key().serialize_compressed(),
			|h| acc.sign(h),
		);
		assert!(req.verify());

		let bytes = encode_request(&req).unwrap();
		let back = decode_request(&bytes).unwrap();
		assert!(back.verify());
		assert_eq!(back.chain_id, 1);
	}

	#[test]
	fn accept_response_round_trips_and_verifies() {
		let acc = account(Role::Researcher);
		let session = PrivateKey::generate();
		let resp = HandshakeResponse::new_accept(
			1,
			Role::Researcher,
			session.public_key().serialize_compressed(),
			|h| acc.sign(h),
		);
		assert!(resp.verify(&acc.id()));
		assert!(resp.is_accept());

		let bytes = encode_response(&resp).unwrap();
		let back = decode_response(&bytes).unwrap();
		assert!(back.verify(&acc.id()));
	}

	#[test]
	fn reject_response_is_detected() {
		let acc = account(Role::Patient);
		let resp = HandshakeResponse::new_reject(|h| acc.sign(h));
		assert!(resp.verify(&acc.id()));
		assert!(!resp.is_accept());
	}

	#[test]
	fn codec_round_trips_and_is_symmetric_both_directions() {
		let a_session = PrivateKey::generate();
		let b_session = PrivateKey::generate();

		let codec_a = SessionCodec::derive(&b_session.public_key(), &a_session);
		let codec_b = SessionCodec::derive(&a_session.public_key(), &b_session);

		let plaintext = b"hello from a";
		let ciphertext = codec_a.encrypt(plaintext).unwrap();
		let decrypted = codec_b.decrypt(&ciphertext).unwrap();
		assert_eq!(decrypted, plaintext);
	}

	#[test]
	fn reject_req_on_chain_id_mismatch() {
		let acc = account(Role::Hospital);
		let session = PrivateKey::generate();
		let req = HandshakeRequest::new_signed(
			2,
			1,
			Role::Hospital,
			acc.id(),
			session.public_key().serialize_compressed(),
			|h| acc.sign(h),
		);
		assert_eq!(
			whether_reject_req(&req, 1, Role::Hospital, 1),
			Some("chain id mismatch")
		);
	}
}
