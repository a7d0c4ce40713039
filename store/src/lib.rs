// Copyright 2026 The Ecoin Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Persistent storage: headers, blocks, transactions and balances, backed
//! by `sled`. The keyspace mirrors the original badger schema (§3, `keys`
//! module) so the on-disk shape stays familiar to anyone who worked on
//! the original store.

#[macro_use]
extern crate failure_derive;

pub mod error;
pub mod keys;

pub use error::Error;

use ecoin_crypto::{Hash, Id};
use ecoin_proto::{deserialize, serialize, Block, BlockHeader, Tx, TxType};
use sled::transaction::{ConflictableTransactionError, TransactionalTree};
use std::path::Path;

/// Storage backend for the chain manager and node views. `SledStorage` is
/// the only implementation; the trait exists so `ecoin_chain`/`ecoin_node`
/// depend on behaviour, not on `sled` directly.
pub trait Storage: Send + Sync {
	fn has_genesis(&self) -> Result<bool, Error>;
	fn put_genesis(&self, block: &Block) -> Result<(), Error>;
	/// Apply `block` at `height`, failing with `InvalidHeight` unless
	/// `height` is exactly one past the current latest height.
	fn put_block(&self, block: &Block, height: u64) -> Result<(), Error>;

	fn get_hash(&self, height: u64) -> Result<Hash, Error>;
	fn get_header_via_height(&self, height: u64) -> Result<(BlockHeader, Hash), Error>;
	fn get_header_via_hash(&self, hash: &Hash) -> Result<(BlockHeader, u64), Error>;
	fn get_block_via_height(&self, height: u64) -> Result<(Block, Hash), Error>;
	fn get_block_via_hash(&self, hash: &Hash) -> Result<(Block, u64), Error>;

	fn get_tx_via_hash(&self, hash: &Hash) -> Result<(Tx, u64), Error>;
	fn get_tx_from_hashes_via_id(&self, id: &Id) -> Result<Vec<(Hash, u64)>, Error>;
	fn get_tx_to_hashes_via_id(&self, id: &Id) -> Result<Vec<(Hash, u64)>, Error>;
	fn has_tx(&self, hash: &Hash) -> Result<bool, Error>;

	fn get_balance_via_id(&self, id: &Id) -> Result<u64, Error>;

	fn get_latest_height(&self) -> Result<u64, Error>;
	fn get_latest_header(&self) -> Result<(BlockHeader, u64, Hash), Error>;

	/// Force pending writes to disk; called from the node's periodic
	/// maintenance tick rather than after every block.
	fn flush(&self) -> Result<(), Error>;
}

pub struct SledStorage {
	db: sled::Db,
}

impl SledStorage {
	pub fn open(path: impl AsRef<Path>) -> Result<SledStorage, Error> {
		let db = sled::open(path)?;
		Ok(SledStorage { db })
	}

	/// An ephemeral, non-durable store for tests.
	pub fn open_temporary() -> Result<SledStorage, Error> {
		let db = sled::Config::new().temporary(true).open()?;
		Ok(SledStorage { db })
	}

	fn raw_get(&self, key: &[u8]) -> Result<Option<sled::IVec>, Error> {
		Ok(self.db.get(key)?)
	}
}

/// Write the header/hash/height rows and tx rows for `block`, crediting
/// and debiting balances, inside a single sled transaction so a crash
/// mid-write can never leave a block half-indexed.
fn apply_block(
	tree: &TransactionalTree,
	block: &Block,
	height: u64,
) -> Result<(), ConflictableTransactionError<Error>> {
	let hash = block
		.hash()
		.map_err(|e| ConflictableTransactionError::Abort(Error::Codec(e)))?;

	let header_bytes =
		serialize(&block.header).map_err(|e| ConflictableTransactionError::Abort(Error::Codec(e)))?;
	tree.insert(keys::header_key(height, &hash), header_bytes)?;
	tree.insert(keys::hash_key(height), hash.as_bytes().to_vec())?;
	tree.insert(keys::header_height_key(&hash), height.to_be_bytes().to_vec())?;

	let mut tx_index = Vec::with_capacity(block.txs.len() * 32);
	for tx in &block.txs {
		tx_index.extend_from_slice(tx.id.as_bytes());

		let tx_bytes =
			serialize(tx).map_err(|e| ConflictableTransactionError::Abort(Error::Codec(e)))?;
		tree.insert(keys::tx_key(height, &tx.id), tx_bytes)?;
		tree.insert(keys::tx_height_key(&tx.id), height.to_be_bytes().to_vec())?;

		if tx.tx_type != TxType::Coinbase {
			tree.insert(keys::tx_from_key(&tx.from, &tx.id), height.to_be_bytes().to_vec())?;
			let have = balance_of(tree, &tx.from)?;
			if have < tx.amount {
				return Err(ConflictableTransactionError::Abort(
					Error::InsufficientBalance {
						have,
						need: tx.amount,
					},
				));
			}
			set_balance(tree, &tx.from, have - tx.amount)?;
		}

		tree.insert(keys::tx_to_key(&tx.to, &tx.id), height.to_be_bytes().to_vec())?;
		let have_to = balance_of(tree, &tx.to)?;
		set_balance(tree, &tx.to, have_to + tx.amount)?;
	}
	tree.insert(keys::block_tx_index_key(height, &hash), tx_index)?;
	tree.insert(keys::META_LATEST_HEIGHT, height.to_be_bytes().to_vec())?;

	Ok(())
}

fn balance_of(
	tree: &TransactionalTree,
	id: &Id,
) -> Result<u64, ConflictableTransactionError<Error>> {
	match tree.get(keys::balance_key(id))? {
		Some(v) => Ok(keys::height_from_bytes(&v)),
		None => Ok(0),
	}
}

fn set_balance(
	tree: &TransactionalTree,
	id: &Id,
	balance: u64,
) -> Result<(), ConflictableTransactionError<Error>> {
	tree.insert(keys::balance_key(id), balance.to_be_bytes().to_vec())?;
	Ok(())
}

impl Storage for SledStorage {
	fn has_genesis(&self) -> Result<bool, Error> {
		Ok(self.raw_get(keys::META_GENESIS)?.is_some())
	}

	fn put_genesis(&self, block: &Block) -> Result<(), Error> {
		if self.has_genesis()? {
			return Err(Error::GenesisExists);
		}
		let hash = block.hash()?;
		self.db
			.transaction(|tree| {
				apply_block(tree, block, 1)?;
				tree.insert(keys::META_GENESIS, hash.as_bytes().to_vec())?;
				Ok(())
			})
			.map_err(Error::from)
	}

	fn put_block(&self, block: &Block, height: u64) -> Result<(), Error> {
		let latest = self.get_latest_height()?;
		if height != latest + 1 {
			return Err(Error::InvalidHeight(height));
		}
		self.db
			.transaction(|tree| apply_block(tree, block, height))
			.map_err(Error::from)
	}

	fn get_hash(&self, height: u64) -> Result<Hash, Error> {
		let v = self
			.raw_get(&keys::hash_key(height))?
			.ok_or(Error::NotFound("hash"))?;
		Hash::from_slice(&v).ok_or(Error::NotFound("hash"))
	}

	fn get_header_via_height(&self, height: u64) -> Result<(BlockHeader, Hash), Error> {
		let hash = self.get_hash(height)?;
		let v = self
			.raw_get(&keys::header_key(height, &hash))?
			.ok_or(Error::NotFound("header"))?;
		Ok((deserialize(&v)?, hash))
	}

	fn get_header_via_hash(&self, hash: &Hash) -> Result<(BlockHeader, u64), Error> {
		let v = self
			.raw_get(&keys::header_height_key(hash))?
			.ok_or(Error::NotFound("header height"))?;
		let height = keys::height_from_bytes(&v);
		let (header, _) = self.get_header_via_height(height)?;
		Ok((header, height))
	}

	fn get_block_via_height(&self, height: u64) -> Result<(Block, Hash), Error> {
		let (header, hash) = self.get_header_via_height(height)?;
		let index = self
			.raw_get(&keys::block_tx_index_key(height, &hash))?
			.ok_or(Error::NotFound("block tx index"))?;
		let mut txs = Vec::with_capacity(index.len() / 32);
		for chunk in index.chunks(32) {
			let tx_hash = Hash::from_slice(chunk).ok_or(Error::NotFound("tx index entry"))?;
			let tx_bytes = self
				.raw_get(&keys::tx_key(height, &tx_hash))?
				.ok_or(Error::NotFound("tx"))?;
			txs.push(deserialize(&tx_bytes)?);
		}
		Ok((Block { header, txs }, hash))
	}

	fn get_block_via_hash(&self, hash: &Hash) -> Result<(Block, u64), Error> {
		let (header, height) = self.get_header_via_hash(hash)?;
		let (block, _) = self.get_block_via_height(height)?;
		let _ = header;
		Ok((block, height))
	}

	fn get_tx_via_hash(&self, hash: &Hash) -> Result<(Tx, u64), Error> {
		let v = self
			.raw_get(&keys::tx_height_key(hash))?
			.ok_or(Error::NotFound("tx height"))?;
		let height = keys::height_from_bytes(&v);
		let tx_bytes = self
			.raw_get(&keys::tx_key(height, hash))?
			.ok_or(Error::NotFound("tx"))?;
		Ok((deserialize(&tx_bytes)?, height))
	}

	fn get_tx_from_hashes_via_id(&self, id: &Id) -> Result<Vec<(Hash, u64)>, Error> {
		scan_tx_index(&self.db, &keys::tx_from_prefix(id))
	}

	fn get_tx_to_hashes_via_id(&self, id: &Id) -> Result<Vec<(Hash, u64)>, Error> {
		scan_tx_index(&self.db, &keys::tx_to_prefix(id))
	}

	fn has_tx(&self, hash: &Hash) -> Result<bool, Error> {
		Ok(self.raw_get(&keys::tx_height_key(hash))?.is_some())
	}

	fn get_balance_via_id(&self, id: &Id) -> Result<u64, Error> {
		match self.raw_get(&keys::balance_key(id))? {
			Some(v) => Ok(keys::height_from_bytes(&v)),
			None => Ok(0),
		}
	}

	fn get_latest_height(&self) -> Result<u64, Error> {
		let v = self
			.raw_get(keys::META_LATEST_HEIGHT)?
			.ok_or(Error::NotFound("latest height"))?;
		Ok(keys::height_from_bytes(&v))
	}

	fn get_latest_header(&self) -> Result<(BlockHeader, u64, Hash), Error> {
		let height = self.get_latest_height()?;
		let (header, hash) = self.get_header_via_height(height)?;
		Ok((header, height, hash))
	}

	fn flush(&self) -> Result<(), Error> {
		self.db.flush()?;
		Ok(())
	}
}

fn scan_tx_index(db: &sled::Db, prefix: &[u8]) -> Result<Vec<(Hash, u64)>, Error> {
	let mut out = Vec::new();
	for entry in db.scan_prefix(prefix) {
		let (key, value) = entry?;
		let tx_hash_bytes = &key[prefix.len()..];
		let tx_hash = Hash::from_slice(tx_hash_bytes).ok_or(Error::NotFound("tx index key"))?;
		out.push((tx_hash, keys::height_from_bytes(&value)));
	}
	Ok(out)
}

#[cfg(test)]
mod tests {
	use super::*;
	use ecoin_crypto::{Account, PrivateKey, Role, ZERO_HASH};
	use ecoin_proto::TxType;

	fn worker() -> Account {
		Account::from_private_key(Role::Hospital, PrivateKey::generate())
	}

	fn patient() -> Account {
		Account::from_private_key(Role::Patient, PrivateKey::generate())
	}

	#[test]
	fn genesis_insertion_and_lookup() {
		let store = SledStorage::open_temporary().unwrap();
		assert!(!store.has_genesis().unwrap());

		let genesis = Block::genesis(1_000, vec![]);
		store.put_genesis(&genesis).unwrap();

		assert!(store.has_genesis().unwrap());
		assert_eq!(store.get_latest_height().unwrap(), 1);
		let (_, hash) = store.get_block_via_height(1).unwrap();
		assert_eq!(hash, genesis.hash().unwrap());
	}

	#[test]
	fn linear_growth_updates_balances() {
		let store = SledStorage::open_temporary().unwrap();
		let w = worker();
		let p = patient();

		let genesis = Block::genesis(1_000, vec![]);
		store.put_genesis(&genesis).unwrap();

		let coinbase =
			Tx::new_coinbase(w.id(), 100, ecoin_util::time::now_secs() - 10, String::new()).unwrap();
		let pay = Tx::new_signed(
			TxType::General,
			w.id(),
			p.id(),
			40,
			vec![],
			ZERO_HASH,
			ecoin_util::time::now_secs() - 10,
			String::new(),
			|h| w.sign(h),
		)
		.unwrap();

		let block = Block::new(
			2,
			ecoin_util::time::now_secs(),
			genesis.hash().unwrap(),
			ZERO_HASH,
			w.id(),
			vec![coinbase, pay],
			|h| w.sign(h),
		)
		.unwrap();
		store.put_block(&block, 2).unwrap();

		assert_eq!(store.get_latest_height().unwrap(), 2);
		assert_eq!(store.get_balance_via_id(&w.id()).unwrap(), 60);
		assert_eq!(store.get_balance_via_id(&p.id()).unwrap(), 40);
		assert!(store.has_tx(&block.txs[1].id).unwrap());
	}

	#[test]
	fn insufficient_balance_rejected() {
		let store = SledStorage::open_temporary().unwrap();
		let w = worker();
		let p = patient();

		let genesis = Block::genesis(1_000, vec![]);
		store.put_genesis(&genesis).unwrap();

		let overspend = Tx::new_signed(
			TxType::General,
			w.id(),
			p.id(),
			1_000_000,
			vec![],
			ZERO_HASH,
			ecoin_util::time::now_secs() - 10,
			String::new(),
			|h| w.sign(h),
		)
		.unwrap();

		let block = Block::new(
			2,
			ecoin_util::time::now_secs(),
			genesis.hash().unwrap(),
			ZERO_HASH,
			w.id(),
			vec![overspend],
			|h| w.sign(h),
		)
		.unwrap();

		let err = store.put_block(&block, 2).unwrap_err();
		assert!(matches!(err, Error::InsufficientBalance { .. }));
		// the failed transaction must not have advanced the height
		assert_eq!(store.get_latest_height().unwrap(), 1);
	}

	#[test]
	fn put_block_rejects_wrong_height() {
		let store = SledStorage::open_temporary().unwrap();
		let w = worker();

		let genesis = Block::genesis(1_000, vec![]);
		store.put_genesis(&genesis).unwrap();

		let coinbase =
			Tx::new_coinbase(w.id(), 100, ecoin_util::time::now_secs() - 10, String::new()).unwrap();
		let block = Block::new(
			3,
			ecoin_util::time::now_secs(),
			genesis.hash().unwrap(),
			ZERO_HASH,
			w.id(),
			vec![coinbase],
			|h| w.sign(h),
		)
		.unwrap();

		let err = store.put_block(&block, 3).unwrap_err();
		assert!(matches!(err, Error::InvalidHeight(3)));
		assert_eq!(store.get_latest_height().unwrap(), 1);
	}
}
