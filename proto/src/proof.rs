//! Proof-of-Transactions round proofs (§3 PotProof, §8 leader-election
//! invariants).

use crate::block::merkle_root;
use crate::error::Error;
use crate::ser::{serialize, Readable, Reader, Writeable, Writer};
use crate::tx::Tx;
use ecoin_crypto::{Hash, Id, PublicKey, Role, Signature};
use std::cmp::Ordering;

#[derive(Debug, Clone)]
pub struct PotProof {
	/// Height of the block this proof competes to mint: `base`'s height
	/// plus one.
	pub index: u64,
	/// Hash of the block this proof is built upon. If this proof wins,
	/// the minted block's `prev_hash` must equal this.
	pub base: Hash,
	/// Wall-clock time this proof was assembled, seconds.
	pub time: i64,
	/// The worker competing for this round.
	pub creator: Id,
	/// Ids of the transactions claimed by this proof.
	pub tx_ids: Vec<Hash>,
	/// Merkle root over `tx_ids`, used as the primary tie-breaker.
	pub merkle_root: Hash,
	pub sig: Vec<u8>,
}

impl PotProof {
	pub fn new(
		index: u64,
		base: Hash,
		time: i64,
		creator: Id,
		txs: &[Tx],
		sign_with: impl Fn(&[u8; 32]) -> Signature,
	) -> Result<PotProof, Error> {
		let tx_ids: Vec<Hash> = txs.iter().map(|t| t.id).collect();
		let merkle_root = merkle_root(txs);
		let mut proof = PotProof {
			index,
			base,
			time,
			creator,
			tx_ids,
			merkle_root,
			sig: Vec::new(),
		};
		let h = proof.hash()?;
		proof.sig = sign_with(h.as_bytes()).to_der();
		Ok(proof)
	}

	pub fn hash(&self) -> Result<Hash, Error> {
		let mut copy = self.clone();
		copy.sig = Vec::new();
		let bytes = serialize(&copy)?;
		Ok(Hash::digest(&bytes))
	}

	pub fn tx_count(&self) -> usize {
		self.tx_ids.len()
	}

	pub fn validate(&self) -> Result<(), Error> {
		if self.creator.role().map(|r| r.is_worker()) != Some(true) {
			return Err(Error::BadFieldLength("proof creator must be a worker role"));
		}
		let pubkey: PublicKey = self.creator.public_key()?;
		let sig = Signature::from_der(&self.sig).map_err(|_| Error::BadFieldLength("proof sig"))?;
		let h = self.hash()?;
		if !pubkey.verify(h.as_bytes(), &sig) {
			return Err(Error::BadFieldLength(
				"proof signature verification failed",
			));
		}
		Ok(())
	}

	/// Total order over competing proofs for the same round: larger
	/// claimed tx set wins; ties break on the lexicographically larger
	/// merkle root; remaining ties break on creator id, with the
	/// direction flipped by the parity of `base`'s first byte so no
	/// single id has a durable advantage across rounds. Both proofs are
	/// assumed to already share the same `base`/`index`.
	pub fn outranks(&self, other: &PotProof) -> bool {
		matches!(self.cmp_round(other), Ordering::Greater)
	}

	fn cmp_round(&self, other: &PotProof) -> Ordering {
		match self.tx_count().cmp(&other.tx_count()) {
			Ordering::Equal => {}
			ord => return ord,
		}
		match self.merkle_root.as_bytes().cmp(other.merkle_root.as_bytes()) {
			Ordering::Equal => {}
			ord => return ord,
		}
		let id_order = self.creator.as_bytes().cmp(other.creator.as_bytes());
		if self.base.as_bytes()[0] % 2 == 0 {
			id_order
		} else {
			id_order.reverse()
		}
	}
}

impl Writeable for PotProof {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error> {
		writer.write_u64(self.index)?;
		self.base.write(writer)?;
		writer.write_i64(self.time)?;
		self.creator.write(writer)?;
		if self.tx_ids.len() > u16::MAX as usize {
			return Err(Error::FieldTooLarge("tx_ids"));
		}
		writer.write_u16(self.tx_ids.len() as u16)?;
		for id in &self.tx_ids {
			id.write(writer)?;
		}
		self.merkle_root.write(writer)?;
		writer.write_var_bytes(&self.sig)?;
		Ok(())
	}
}

impl Readable for PotProof {
	fn read<R: Reader>(reader: &mut R) -> Result<Self, Error> {
		let index = reader.read_u64()?;
		let base = Hash::read(reader)?;
		let time = reader.read_i64()?;
		let creator = Id::read(reader)?;
		let count = reader.read_u16()? as usize;
		let mut tx_ids = Vec::with_capacity(count);
		for _ in 0..count {
			tx_ids.push(Hash::read(reader)?);
		}
		let merkle_root = Hash::read(reader)?;
		let sig = reader.read_var_bytes()?;
		Ok(PotProof {
			index,
			base,
			time,
			creator,
			tx_ids,
			merkle_root,
			sig,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::tx::TxType;
	use ecoin_crypto::{Account, PrivateKey, ZERO_HASH};

	fn worker() -> Account {
		Account::from_private_key(Role::Hospital, PrivateKey::generate())
	}

	fn sample_tx(w: &Account) -> Tx {
		let p = Account::from_private_key(Role::Patient, PrivateKey::generate());
		Tx::new_signed(
			TxType::General,
			w.id(),
			p.id(),
			1,
			vec![],
			ZERO_HASH,
			ecoin_util::time::now_secs() - 10,
			String::new(),
			|hash| w.sign(hash),
		)
		.unwrap()
	}

	#[test]
	fn round_trips_and_validates() {
		let w = worker();
		let tx = sample_tx(&w);
		let base = Hash::digest(b"round base");
		let proof = PotProof::new(1, base, ecoin_util::time::now_secs(), w.id(), &[tx], |h| {
			w.sign(h)
		})
		.unwrap();
		proof.validate().unwrap();

		let bytes = serialize(&proof).unwrap();
		let back: PotProof = crate::ser::deserialize(&bytes).unwrap();
		assert_eq!(back.hash().unwrap(), proof.hash().unwrap());
		assert_eq!(back.base, base);
	}

	#[test]
	fn larger_tx_set_outranks_smaller() {
		let w1 = worker();
		let w2 = worker();
		let tx1 = sample_tx(&w1);
		let tx2 = sample_tx(&w2);
		let base = Hash::digest(b"round base");

		let small = PotProof::new(1, base, 0, w1.id(), &[tx1.clone()], |h| w1.sign(h)).unwrap();
		let large = PotProof::new(1, base, 0, w2.id(), &[tx1, tx2], |h| w2.sign(h)).unwrap();

		assert!(large.outranks(&small));
		assert!(!small.outranks(&large));
	}

	#[test]
	fn tie_break_flips_with_base_parity() {
		let w1 = worker();
		let w2 = worker();
		let tx = sample_tx(&w1);

		let mut even = [0u8; ecoin_crypto::HASH_LEN];
		even[0] = 0;
		let even_base = Hash::from_slice(&even).unwrap();
		let mut odd = even;
		odd[0] = 1;
		let odd_base = Hash::from_slice(&odd).unwrap();

		// Equal-sized sets with distinct creators: forces the id tie-break.
		let a = PotProof::new(1, even_base, 0, w1.id(), &[tx.clone()], |h| w1.sign(h)).unwrap();
		let b_even = PotProof {
			merkle_root: a.merkle_root,
			..PotProof::new(1, even_base, 0, w2.id(), &[tx.clone()], |h| w2.sign(h)).unwrap()
		};
		let b_odd = PotProof {
			merkle_root: a.merkle_root,
			..PotProof::new(1, odd_base, 0, w2.id(), &[tx], |h| w2.sign(h)).unwrap()
		};
		let a_odd = PotProof { base: odd_base, ..a.clone() };

		assert_ne!(a.outranks(&b_even), a_odd.outranks(&b_odd));
	}
}
