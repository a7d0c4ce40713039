//! Blocks (§3 Block / BlockHeader).

use crate::error::Error;
use crate::ser::{serialize, Readable, Reader, Writeable, Writer};
use crate::tx::Tx;
use ecoin_crypto::{Hash, Id, PublicKey, Role, Signature, HASH_LEN, ZERO_HASH};

pub const BLOCK_VERSION_1: u8 = 1;

#[derive(Debug, Clone)]
pub struct BlockHeader {
	pub version: u8,
	pub height: u64,
	pub time: i64,
	pub prev_hash: Hash,
	/// Root of the transaction list carried by this block.
	pub merkle_root: Hash,
	/// Hash of the winning `PotProof` this block was minted from.
	pub proof_hash: Hash,
	/// The worker id that produced this block.
	pub creator: Id,
	pub sig: Vec<u8>,
}

impl BlockHeader {
	/// Hash identifying this header, computed with `sig` zeroed so the
	/// signature itself signs the hash.
	pub fn hash(&self) -> Result<Hash, Error> {
		let mut copy = self.clone();
		copy.sig = Vec::new();
		let bytes = serialize(&copy)?;
		Ok(Hash::digest(&bytes))
	}

	pub fn sign(&mut self, sign_with: impl Fn(&[u8; 32]) -> Signature) -> Result<(), Error> {
		let h = self.hash()?;
		self.sig = sign_with(h.as_bytes()).to_der();
		Ok(())
	}

	fn verify_signature(&self) -> Result<(), Error> {
		if self.creator.role().map(|r| r.is_worker()) != Some(true) {
			return Err(Error::BadFieldLength("block creator must be a worker role"));
		}
		let pubkey: PublicKey = self.creator.public_key()?;
		let sig = Signature::from_der(&self.sig).map_err(|_| Error::BadFieldLength("block sig"))?;
		let h = self.hash()?;
		if !pubkey.verify(h.as_bytes(), &sig) {
			return Err(Error::BadFieldLength("block signature verification failed"));
		}
		Ok(())
	}
}

impl Writeable for BlockHeader {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error> {
		writer.write_u8(self.version)?;
		writer.write_u64(self.height)?;
		writer.write_i64(self.time)?;
		self.prev_hash.write(writer)?;
		self.merkle_root.write(writer)?;
		self.proof_hash.write(writer)?;
		self.creator.write(writer)?;
		writer.write_var_bytes(&self.sig)?;
		Ok(())
	}
}

impl Readable for BlockHeader {
	fn read<R: Reader>(reader: &mut R) -> Result<Self, Error> {
		Ok(BlockHeader {
			version: reader.read_u8()?,
			height: reader.read_u64()?,
			time: reader.read_i64()?,
			prev_hash: Hash::read(reader)?,
			merkle_root: Hash::read(reader)?,
			proof_hash: Hash::read(reader)?,
			creator: Id::read(reader)?,
			sig: reader.read_var_bytes()?,
		})
	}
}

#[derive(Debug, Clone)]
pub struct Block {
	pub header: BlockHeader,
	pub txs: Vec<Tx>,
}

impl Block {
	pub fn new(
		height: u64,
		time: i64,
		prev_hash: Hash,
		proof_hash: Hash,
		creator: Id,
		txs: Vec<Tx>,
		sign_with: impl Fn(&[u8; 32]) -> Signature,
	) -> Result<Block, Error> {
		let merkle_root = merkle_root(&txs);
		let mut header = BlockHeader {
			version: BLOCK_VERSION_1,
			height,
			time,
			prev_hash,
			merkle_root,
			proof_hash,
			creator,
			sig: Vec::new(),
		};
		header.sign(sign_with)?;
		Ok(Block { header, txs })
	}

	/// The genesis block: height 1, no predecessor, no proof, unsigned.
	pub fn genesis(time: i64, txs: Vec<Tx>) -> Block {
		let merkle_root = merkle_root(&txs);
		Block {
			header: BlockHeader {
				version: BLOCK_VERSION_1,
				height: 1,
				time,
				prev_hash: ZERO_HASH,
				merkle_root,
				proof_hash: ZERO_HASH,
				creator: Id::ZERO,
				sig: Vec::new(),
			},
			txs,
		}
	}

	pub fn hash(&self) -> Result<Hash, Error> {
		self.header.hash()
	}

	pub fn is_genesis(&self) -> bool {
		self.header.height == 1
	}

	/// A copy with the transaction list dropped when `only_header` is
	/// set, for sync responses that only need headers.
	pub fn shallow_copy(&self, only_header: bool) -> Block {
		if only_header {
			Block {
				header: self.header.clone(),
				txs: Vec::new(),
			}
		} else {
			self.clone()
		}
	}

	/// Structural validation: merkle root matches contents, every tx
	/// validates on its own, and (for non-genesis blocks) the header is
	/// properly signed by a worker-role creator. Linkage to a specific
	/// parent/height and double-spend checks are the chain manager's job.
	pub fn validate(&self) -> Result<(), Error> {
		if merkle_root(&self.txs) != self.header.merkle_root {
			return Err(Error::BadFieldLength("merkle root mismatch"));
		}
		for tx in &self.txs {
			tx.validate()?;
		}
		if self.is_genesis() {
			return Ok(());
		}
		self.header.verify_signature()
	}
}

/// Binary Merkle root over transaction ids, pairing left-with-left on odd
/// counts (duplicate the last element), consistent with the coinbase tx
/// (if any) occupying slot zero.
pub fn merkle_root(txs: &[Tx]) -> Hash {
	if txs.is_empty() {
		return ZERO_HASH;
	}
	let mut layer: Vec<Hash> = txs.iter().map(|t| t.id).collect();
	while layer.len() > 1 {
		if layer.len() % 2 == 1 {
			layer.push(*layer.last().unwrap());
		}
		layer = layer
			.chunks(2)
			.map(|pair| {
				let mut buf = Vec::with_capacity(HASH_LEN * 2);
				buf.extend_from_slice(pair[0].as_bytes());
				buf.extend_from_slice(pair[1].as_bytes());
				Hash::digest(&buf)
			})
			.collect();
	}
	layer[0]
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::tx::TxType;
	use ecoin_crypto::{Account, PrivateKey};

	fn worker() -> Account {
		Account::from_private_key(Role::Hospital, PrivateKey::generate())
	}

	fn patient() -> Account {
		Account::from_private_key(Role::Patient, PrivateKey::generate())
	}

	#[test]
	fn genesis_validates_without_signature() {
		let block = Block::genesis(1_000, vec![]);
		block.validate().unwrap();
		assert!(block.is_genesis());
	}

	#[test]
	fn signed_block_round_trips_and_validates() {
		let w = worker();
		let p = patient();
		let coinbase =
			Tx::new_coinbase(w.id(), 50, ecoin_util::time::now_secs() - 10, "reward".into()).unwrap();
		let tx = Tx::new_signed(
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
		.unwrap();

		let block = Block::new(
			2,
			ecoin_util::time::now_secs(),
			ZERO_HASH,
			Hash::digest(b"proof"),
			w.id(),
			vec![coinbase, tx],
			|hash| w.sign(hash),
		)
		.unwrap();

		block.validate().unwrap();

		let bytes = serialize(&block.header).unwrap();
		let back: BlockHeader = crate::ser::deserialize(&bytes).unwrap();
		assert_eq!(back.hash().unwrap(), block.header.hash().unwrap());
	}

	#[test]
	fn tampered_merkle_root_rejected() {
		let w = worker();
		let coinbase =
			Tx::new_coinbase(w.id(), 50, ecoin_util::time::now_secs() - 10, String::new()).unwrap();
		let mut block = Block::new(
			2,
			ecoin_util::time::now_secs(),
			ZERO_HASH,
			ZERO_HASH,
			w.id(),
			vec![coinbase],
			|hash| w.sign(hash),
		)
		.unwrap();
		block.header.merkle_root = Hash::digest(b"not the real root");
		assert!(block.validate().is_err());
	}
}
