//! Transactions (§3 Transaction).

use crate::error::Error;
use crate::ser::{Readable, Reader, Writeable, Writer};
use ecoin_crypto::{Hash, Id, PublicKey, Role, Signature, ZERO_HASH};

pub const PROTOCOL_VERSION_1: u8 = 1;
/// Transaction timestamps must be at least this many seconds in the past,
/// to leave room for clock skew across the network.
pub const TX_TIME_SKEW_SECS: i64 = 1;
/// Upper bound on `description`, in Unicode scalar values (§3).
pub const DESCRIPTION_MAX_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxType {
	Coinbase = 0,
	General = 1,
	R2P = 2,
	P2R = 3,
	P2H = 4,
	H2P = 5,
	P2D = 6,
	D2P = 7,
	Arbitrate = 8,
	Upload = 9,
	RegReq = 10,
	RegResp = 11,
}

impl TxType {
	pub fn from_u8(b: u8) -> Result<TxType, Error> {
		use TxType::*;
		Ok(match b {
			0 => Coinbase,
			1 => General,
			2 => R2P,
			3 => P2R,
			4 => P2H,
			5 => H2P,
			6 => P2D,
			7 => D2P,
			8 => Arbitrate,
			9 => Upload,
			10 => RegReq,
			11 => RegResp,
			_ => return Err(Error::UnknownMessageType(b)),
		})
	}

	pub fn as_u8(self) -> u8 {
		self as u8
	}

	/// The `(from role, to role)` constraint for this tx type, if any.
	/// Diagnostic flows (P2H/H2P/P2D/D2P) are weighted in the pool
	/// priority function (see `ecoin_pool`).
	fn role_constraint(self) -> Option<(Role, Role)> {
		use TxType::*;
		match self {
			R2P => Some((Role::Researcher, Role::Patient)),
			P2R => Some((Role::Patient, Role::Researcher)),
			P2H => Some((Role::Patient, Role::Hospital)),
			H2P => Some((Role::Hospital, Role::Patient)),
			P2D => Some((Role::Patient, Role::Doctor)),
			D2P => Some((Role::Doctor, Role::Patient)),
			_ => None,
		}
	}

	/// Diagnostic-flow types get elevated pool priority (§4.3).
	pub fn is_diagnostic(self) -> bool {
		matches!(self, TxType::P2H | TxType::H2P | TxType::P2D | TxType::D2P)
	}
}

#[derive(Debug, Clone)]
pub struct Tx {
	pub version: u8,
	pub tx_type: TxType,
	pub uncompleted: bool,
	pub time: i64,
	pub id: Hash,
	pub from: Id,
	pub to: Id,
	pub amount: u64,
	pub sig: Vec<u8>,
	pub payload: Vec<u8>,
	pub prev_tx_id: Hash,
	pub description: String,
}

impl Tx {
	/// Build and sign a new transaction. `id` is computed over the tx with
	/// `id` and `sig` both zeroed, then the result is signed.
	#[allow(clippy::too_many_arguments)]
	pub fn new_signed(
		tx_type: TxType,
		from: Id,
		to: Id,
		amount: u64,
		payload: Vec<u8>,
		prev_tx_id: Hash,
		time: i64,
		description: String,
		sign_with: impl Fn(&[u8; 32]) -> Signature,
	) -> Result<Tx, Error> {
		Tx::new_signed_with_completion(
			tx_type,
			from,
			to,
			amount,
			payload,
			prev_tx_id,
			time,
			false,
			description,
			sign_with,
		)
	}

	/// As [`Tx::new_signed`], but lets the caller mark the transaction
	/// as part of an as-yet-unfinished multi-step flow (e.g. a diagnostic
	/// request awaiting its reply).
	#[allow(clippy::too_many_arguments)]
	pub fn new_signed_with_completion(
		tx_type: TxType,
		from: Id,
		to: Id,
		amount: u64,
		payload: Vec<u8>,
		prev_tx_id: Hash,
		time: i64,
		uncompleted: bool,
		description: String,
		sign_with: impl Fn(&[u8; 32]) -> Signature,
	) -> Result<Tx, Error> {
		let mut tx = Tx {
			version: PROTOCOL_VERSION_1,
			tx_type,
			uncompleted,
			time,
			id: ZERO_HASH,
			from,
			to,
			amount,
			sig: Vec::new(),
			payload,
			prev_tx_id,
			description,
		};
		tx.id = tx.compute_id()?;
		let sig = sign_with(tx.id.as_bytes());
		tx.sig = sig.to_der();
		Ok(tx)
	}

	/// Build the (unsigned) coinbase transaction paying a block's creator.
	pub fn new_coinbase(to: Id, amount: u64, time: i64, memo: String) -> Result<Tx, Error> {
		let mut tx = Tx {
			version: PROTOCOL_VERSION_1,
			tx_type: TxType::Coinbase,
			uncompleted: false,
			time,
			id: ZERO_HASH,
			from: Id::ZERO,
			to,
			amount,
			sig: Vec::new(),
			payload: Vec::new(),
			prev_tx_id: ZERO_HASH,
			description: memo,
		};
		tx.id = tx.compute_id()?;
		Ok(tx)
	}

	/// Recompute `H(tx with id=0, sig=0)`.
	pub fn compute_id(&self) -> Result<Hash, Error> {
		let mut copy = self.clone();
		copy.id = ZERO_HASH;
		copy.sig = Vec::new();
		let bytes = crate::ser::serialize(&copy)?;
		Ok(Hash::digest(&bytes))
	}

	/// Structural + signature validation (§3 invariants). Role-pairing
	/// rules for multi-step flows are checked here; deeper cross-tx
	/// payload semantics are explicitly left to a higher layer (§9 open
	/// question).
	pub fn validate(&self) -> Result<(), Error> {
		if self.version != PROTOCOL_VERSION_1 {
			return Err(Error::UnsupportedVersion(self.version));
		}
		if self.description.chars().count() > DESCRIPTION_MAX_CHARS {
			return Err(Error::FieldTooLarge("description"));
		}
		if self.compute_id()? != self.id {
			return Err(Error::BadFieldLength("tx id mismatch"));
		}
		if self.time > ecoin_util::time::now_secs() - TX_TIME_SKEW_SECS {
			return Err(Error::BadFieldLength("tx timestamp not in the past"));
		}

		if self.tx_type == TxType::Coinbase {
			if !self.from.is_zero() {
				return Err(Error::BadFieldLength("coinbase must have zero from"));
			}
			return Ok(());
		}

		if !self.from.is_valid() {
			return Err(Error::BadFieldLength("from id"));
		}
		if let Some((from_role, to_role)) = self.tx_type.role_constraint() {
			if self.from.role() != Some(from_role) {
				return Err(Error::BadFieldLength("from role mismatch for tx type"));
			}
			if self.to.role() != Some(to_role) {
				return Err(Error::BadFieldLength("to role mismatch for tx type"));
			}
		}

		let pubkey = self.from.public_key()?;
		self.verify_signature(&pubkey)
	}

	fn verify_signature(&self, pubkey: &PublicKey) -> Result<(), Error> {
		let sig = Signature::from_der(&self.sig).map_err(|_| Error::BadFieldLength("sig"))?;
		if !pubkey.verify(self.id.as_bytes(), &sig) {
			return Err(Error::BadFieldLength("signature verification failed"));
		}
		Ok(())
	}
}

impl Writeable for Tx {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error> {
		writer.write_u8(self.version)?;
		writer.write_u8(self.tx_type.as_u8())?;
		writer.write_u8(if self.uncompleted { 1 } else { 0 })?;
		writer.write_i64(self.time)?;
		self.id.write(writer)?;
		self.from.write(writer)?;
		self.to.write(writer)?;
		writer.write_u64(self.amount)?;
		writer.write_var_bytes(&self.sig)?;
		writer.write_var_bytes(&self.payload)?;
		self.prev_tx_id.write(writer)?;
		writer.write_var_bytes(self.description.as_bytes())?;
		Ok(())
	}
}

impl Readable for Tx {
	fn read<R: Reader>(reader: &mut R) -> Result<Self, Error> {
		let version = reader.read_u8()?;
		let tx_type = TxType::from_u8(reader.read_u8()?)?;
		let uncompleted = reader.read_u8()? != 0;
		let time = reader.read_i64()?;
		let id = Hash::read(reader)?;
		let from = Id::read(reader)?;
		let to = Id::read(reader)?;
		let amount = reader.read_u64()?;
		let sig = reader.read_var_bytes()?;
		let payload = reader.read_var_bytes()?;
		let prev_tx_id = Hash::read(reader)?;
		let description_bytes = reader.read_var_bytes()?;
		let description = String::from_utf8(description_bytes)
			.map_err(|_| Error::BadFieldLength("description not utf8"))?;
		Ok(Tx {
			version,
			tx_type,
			uncompleted,
			time,
			id,
			from,
			to,
			amount,
			sig,
			payload,
			prev_tx_id,
			description,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use ecoin_crypto::{Account, PrivateKey};

	fn hospital() -> Account {
		Account::from_private_key(Role::Hospital, PrivateKey::generate())
	}

	fn patient() -> Account {
		Account::from_private_key(Role::Patient, PrivateKey::generate())
	}

	#[test]
	fn signed_tx_round_trips_and_validates() {
		let h = hospital();
		let p = patient();
		let tx = Tx::new_signed(
			TxType::General,
			h.id(),
			p.id(),
			30,
			vec![],
			ZERO_HASH,
			ecoin_util::time::now_secs() - 10,
			"checkup".into(),
			|hash| h.sign(hash),
		)
		.unwrap();

		tx.validate().unwrap();

		let bytes = crate::ser::serialize(&tx).unwrap();
		let back: Tx = crate::ser::deserialize(&bytes).unwrap();
		assert_eq!(back.id, tx.id);
		assert_eq!(back.amount, 30);
		back.validate().unwrap();
	}

	#[test]
	fn role_mismatch_rejected() {
		let h = hospital();
		let h2 = hospital();
		// R2P requires from=Researcher, to=Patient; using two hospitals must fail.
		let tx = Tx::new_signed(
			TxType::R2P,
			h.id(),
			h2.id(),
			0,
			vec![],
			ZERO_HASH,
			ecoin_util::time::now_secs() - 10,
			String::new(),
			|hash| h.sign(hash),
		)
		.unwrap();
		assert!(tx.validate().is_err());
	}

	#[test]
	fn future_timestamp_rejected() {
		let h = hospital();
		let p = patient();
		let tx = Tx::new_signed(
			TxType::General,
			h.id(),
			p.id(),
			1,
			vec![],
			ZERO_HASH,
			ecoin_util::time::now_secs() + 1000,
			String::new(),
			|hash| h.sign(hash),
		)
		.unwrap();
		assert!(tx.validate().is_err());
	}

	#[test]
	fn tampered_amount_breaks_id() {
		let h = hospital();
		let p = patient();
		let mut tx = Tx::new_signed(
			TxType::General,
			h.id(),
			p.id(),
			30,
			vec![],
			ZERO_HASH,
			ecoin_util::time::now_secs() - 10,
			String::new(),
			|hash| h.sign(hash),
		)
		.unwrap();
		tx.amount = 3000;
		assert!(tx.validate().is_err());
	}
}
