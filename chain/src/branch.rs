//! A single fork: a doubly-linked run of [`BlockIdx`] nodes through the
//! shared [`Arena`], with its own block/tx membership caches so lookups
//! don't have to walk the chain.

use crate::arena::{Arena, BlockIdx};
use crate::error::Error;
use ecoin_crypto::Hash;
use ecoin_proto::{Block, Tx};
use ecoin_store::Storage;
use std::collections::HashMap;

/// A block more than this many seconds in the future of the local clock
/// is rejected outright.
const FUTURE_SLACK_SECS: i64 = 3;

pub struct Branch {
	pub head: BlockIdx,
	pub tail: BlockIdx,
	block_cache: HashMap<Hash, BlockIdx>,
	tx_cache: HashMap<Hash, ()>,
}

impl Branch {
	/// Build a branch by walking backward from `begin` to the root of
	/// its arena run, populating the membership caches as it goes.
	pub fn new(arena: &Arena, begin: BlockIdx) -> Branch {
		let mut block_cache = HashMap::new();
		let mut tx_cache = HashMap::new();
		let mut iter = Some(begin);
		while let Some(idx) = iter {
			let node = arena.get(idx);
			block_cache.insert(node.hash, idx);
			for tx in &node.block.txs {
				tx_cache.insert(tx.id, ());
			}
			iter = node.prev;
		}
		Branch {
			head: begin,
			tail: begin,
			block_cache,
			tx_cache,
		}
	}

	pub fn add(&mut self, arena: &mut Arena, new_idx: BlockIdx) {
		let old_head = self.head;
		arena.add_next(old_head, new_idx);
		arena.set_prev(new_idx, old_head);
		self.head = new_idx;

		let node = arena.get(new_idx);
		self.block_cache.insert(node.hash, new_idx);
		for tx in &node.block.txs {
			self.tx_cache.insert(tx.id, ());
		}
	}

	pub fn hash(&self, arena: &Arena) -> Hash {
		arena.get(self.head).hash
	}

	pub fn height(&self, arena: &Arena) -> u64 {
		arena.get(self.head).height
	}

	pub fn get_block(&self, hash: &Hash) -> Option<BlockIdx> {
		self.block_cache.get(hash).copied()
	}

	pub fn has_tx(&self, id: &Hash) -> bool {
		self.tx_cache.contains_key(id)
	}

	/// Validate `block` in the context of this branch: well-formed on
	/// its own, chained to this branch's head, not impossibly far in
	/// the future or before the parent, and every tx fresh.
	pub fn verify_block(
		&self,
		arena: &Arena,
		storage: &dyn Storage,
		block: &Block,
		now: i64,
	) -> Result<(), Error> {
		block
			.validate()
			.map_err(|e| Error::BlockRejected(format!("struct verify failed: {}", e)))?;

		if block.header.time > now + FUTURE_SLACK_SECS {
			return Err(Error::BlockRejected("invalid future time".into()));
		}
		let head = arena.get(self.head);
		if block.header.time < head.time() {
			return Err(Error::BlockRejected("invalid past time".into()));
		}
		if head.hash != block.header.prev_hash {
			return Err(Error::BlockRejected("mismatch last hash".into()));
		}

		for tx in &block.txs {
			self.verify_tx(storage, tx)?;
		}
		Ok(())
	}

	/// Validate `tx` against this branch's pending set and already
	/// durable storage, rejecting anything structurally invalid or
	/// already spent/seen.
	pub fn verify_tx(&self, storage: &dyn Storage, tx: &Tx) -> Result<(), Error> {
		tx.validate()
			.map_err(|e| Error::BlockRejected(format!("tx struct verify failed: {}", e)))?;

		if self.has_tx(&tx.id) {
			return Err(Error::TxAlreadyExists(tx.id));
		}
		if storage.has_tx(&tx.id)? {
			return Err(Error::TxAlreadyExists(tx.id));
		}
		Ok(())
	}

	/// Detach this branch from the arena graph, walking backward from
	/// the head and stopping as soon as a node still has other children
	/// (shared ancestry with a surviving branch).
	pub fn remove(&self, arena: &mut Arena) {
		let mut iter = Some(self.head);
		while let Some(idx) = iter {
			if arena.nexts_num(idx) != 0 {
				break;
			}
			let prev = arena.get(idx).prev;
			if let Some(p) = prev {
				arena.remove_next(p, idx);
			}
			arena.remove_prev(idx);
			iter = prev;
		}
	}

	pub fn remove_from_cache(&mut self, hash: &Hash, tx_ids: &[Hash]) {
		self.block_cache.remove(hash);
		for id in tx_ids {
			self.tx_cache.remove(id);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use ecoin_crypto::{Account, PrivateKey, Role, ZERO_HASH};
	use ecoin_store::SledStorage;

	fn worker() -> Account {
		Account::from_private_key(Role::Hospital, PrivateKey::generate())
	}

	fn signed_block(w: &Account, height: u64, time: i64, prev_hash: Hash) -> Block {
		let coinbase = Tx::new_coinbase(w.id(), 50, time - 1, String::new()).unwrap();
		Block::new(height, time, prev_hash, ZERO_HASH, w.id(), vec![coinbase], |h| w.sign(h)).unwrap()
	}

	#[test]
	fn add_advances_head_and_caches_block() {
		let w = worker();
		let mut arena = Arena::new();
		let genesis = Block::genesis(1_000, vec![]);
		let genesis_hash = genesis.hash().unwrap();
		let root = arena.alloc(genesis, 1, genesis_hash, true);
		let mut branch = Branch::new(&arena, root);

		let b1 = signed_block(&w, 2, 1_001, genesis_hash);
		let b1_hash = b1.hash().unwrap();
		let idx = arena.alloc(b1, 2, b1_hash, false);
		branch.add(&mut arena, idx);

		assert_eq!(branch.hash(&arena), b1_hash);
		assert_eq!(branch.height(&arena), 2);
		assert_eq!(branch.get_block(&genesis_hash), Some(root));
		assert_eq!(branch.get_block(&b1_hash), Some(idx));
	}

	#[test]
	fn verify_block_rejects_wrong_parent_hash() {
		let w = worker();
		let mut arena = Arena::new();
		let genesis = Block::genesis(1_000, vec![]);
		let genesis_hash = genesis.hash().unwrap();
		let root = arena.alloc(genesis, 1, genesis_hash, true);
		let branch = Branch::new(&arena, root);
		let storage = SledStorage::open_temporary().unwrap();

		let bad = signed_block(&w, 2, 1_001, ZERO_HASH);
		let err = branch
			.verify_block(&arena, &storage, &bad, 2_000)
			.unwrap_err();
		assert!(matches!(err, Error::BlockRejected(_)));
	}

	#[test]
	fn verify_block_rejects_future_time() {
		let w = worker();
		let mut arena = Arena::new();
		let genesis = Block::genesis(1_000, vec![]);
		let genesis_hash = genesis.hash().unwrap();
		let root = arena.alloc(genesis, 1, genesis_hash, true);
		let branch = Branch::new(&arena, root);
		let storage = SledStorage::open_temporary().unwrap();

		let far_future = signed_block(&w, 2, 10_000, genesis_hash);
		let err = branch
			.verify_block(&arena, &storage, &far_future, 1_000)
			.unwrap_err();
		assert!(matches!(err, Error::BlockRejected(_)));
	}
}
