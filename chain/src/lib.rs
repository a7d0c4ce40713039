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

//! The chain manager: a multi-branch in-memory block cache backed by
//! [`ecoin_store`], seen from the outside as a single linear chain but
//! internally a small forest of [`branch::Branch`]es sharing one
//! [`arena::Arena`].

pub mod arena;
pub mod branch;
pub mod error;

#[macro_use]
extern crate failure_derive;

pub use error::Error;

use arena::{Arena, BlockIdx};
use branch::Branch;
use ecoin_crypto::Hash;
use ecoin_proto::{Block, Tx};
use ecoin_store::Storage;
use ecoin_util::bounds;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};

/// Branches more than this far behind the longest branch are pruned
/// (§9, reorg depth).
pub const ALPHA: u64 = 8;
/// How many cached blocks a single sync response may cover, and how far
/// behind the head a stored block is kept in cache before eviction.
pub const SYNC_MAX_BLOCKS: u64 = 128;
/// How many recent blocks are kept cached when loading an existing
/// chain from storage at startup.
pub const REFERENCE_BLOCKS: u64 = 20;

struct ChainState {
	arena: Arena,
	oldest: BlockIdx,
	branches: Vec<Branch>,
	longest: usize,
	last_height: u64,
}

impl ChainState {
	fn get_branch(&self, hash: &Hash) -> Option<usize> {
		self.branches
			.iter()
			.position(|b| b.hash(&self.arena) == *hash)
	}

	/// Pick the longest branch, breaking height ties on the parity of
	/// the current second so no branch keeps a durable edge.
	fn recompute_longest(&mut self, now: i64) -> usize {
		let mut best = 0usize;
		let mut best_height = 0u64;
		for (i, b) in self.branches.iter().enumerate() {
			let h = b.height(&self.arena);
			if h > best_height {
				best = i;
				best_height = h;
			} else if h == best_height && now % 2 == 0 {
				best = i;
			}
		}
		best
	}
}

/// The chain manager. Cheap to clone (it's just an `Arc` inside), so it
/// can be shared across the node's tasks.
pub struct Chain {
	state: RwLock<ChainState>,
	storage: Arc<dyn Storage>,
	block_interval: Duration,
	pending_blocks_tx: mpsc::Sender<Vec<Block>>,
	pending_blocks_rx: tokio::sync::Mutex<Option<mpsc::Receiver<Vec<Block>>>>,
	passive_change_tx: watch::Sender<i64>,
	latest_head_time: AtomicI64,
}

impl Chain {
	/// Load an existing chain from `storage`, or bootstrap it with
	/// `genesis` if storage is empty. Mirrors the original `Init`,
	/// which either calls `initGenesis` or `initFromDB`.
	pub async fn init(
		storage: Arc<dyn Storage>,
		genesis: Block,
		block_interval: Duration,
	) -> Result<Arc<Chain>, Error> {
		let mut arena = Arena::new();

		let (oldest, branches, last_height) = if !storage.has_genesis()? {
			log::info!("chain starts with empty database");
			storage.put_genesis(&genesis)?;
			let hash = genesis.hash()?;
			let idx = arena.alloc(genesis, 1, hash, true);
			let branch = Branch::new(&arena, idx);
			(idx, vec![branch], 1u64)
		} else {
			let last_height = storage.get_latest_height()?;
			let begin_height = last_height.saturating_sub(REFERENCE_BLOCKS).max(1);

			let mut idxs = Vec::new();
			for height in begin_height..=last_height {
				let (block, hash) = storage.get_block_via_height(height)?;
				idxs.push(arena.alloc(block, height, hash, true));
			}
			let oldest = idxs[0];
			let mut branch = Branch::new(&arena, oldest);
			for idx in idxs.into_iter().skip(1) {
				branch.add(&mut arena, idx);
			}
			(oldest, vec![branch], last_height)
		};

		let head_time = arena.get(branches[0].head).time();
		let (pending_blocks_tx, pending_blocks_rx) = mpsc::channel(bounds::PENDING_BLOCKS);
		let (passive_change_tx, _rx) = watch::channel(head_time);

		let state = ChainState {
			arena,
			oldest,
			branches,
			longest: 0,
			last_height,
		};

		Ok(Arc::new(Chain {
			state: RwLock::new(state),
			storage,
			block_interval,
			pending_blocks_tx,
			pending_blocks_rx: tokio::sync::Mutex::new(Some(pending_blocks_rx)),
			passive_change_tx,
			latest_head_time: AtomicI64::new(head_time),
		}))
	}

	/// Subscribe to "the longest branch changed" notifications; the
	/// watched value is the new head's construction time.
	pub fn subscribe_change(&self) -> watch::Receiver<i64> {
		self.passive_change_tx.subscribe()
	}

	/// Add a batch of sequential blocks (`blocks[0]` extends the current
	/// head). Locally produced blocks are applied immediately; blocks
	/// received from peers queue through the bounded pending channel and
	/// are dropped, per the backpressure policy, if the queue is full.
	pub async fn add_blocks(&self, blocks: Vec<Block>, local: bool) -> Result<(), Error> {
		if local {
			return self.add_blocks_inner(blocks).await;
		}
		if self.pending_blocks_tx.try_send(blocks).is_err() {
			log::warn!("pending blocks queue full, dropping batch");
		}
		Ok(())
	}

	pub async fn latest_block_hash(&self) -> Hash {
		let state = self.state.read().await;
		state.branches[state.longest].hash(&state.arena)
	}

	pub async fn latest_block_height(&self) -> u64 {
		let state = self.state.read().await;
		state.branches[state.longest].height(&state.arena)
	}

	pub fn latest_block_time(&self) -> i64 {
		self.latest_head_time.load(Ordering::Relaxed)
	}

	/// Find the hash and height-diff to sync forward from `base`,
	/// preferring the in-memory branch and falling back to storage.
	pub async fn get_sync_hash(&self, base: Hash) -> Result<(Hash, u32), Error> {
		let state = self.state.read().await;
		let longest = &state.branches[state.longest];

		if let Some(base_idx) = longest.get_block(&base) {
			let head_hash = longest.hash(&state.arena);
			if head_hash == base {
				return Err(Error::AlreadyUpToDate(base));
			}
			let base_height = state.arena.get(base_idx).height;
			let head_height = state.arena.get(longest.head).height;
			return Ok((head_hash, (head_height - base_height) as u32));
		}
		drop(state);

		let (_, base_height) = self
			.storage
			.get_header_via_hash(&base)
			.map_err(|_| Error::HashNotFound(base))?;
		let (_, db_latest_height, db_latest_hash) = self.storage.get_latest_header()?;

		if db_latest_height.saturating_sub(base_height) >= SYNC_MAX_BLOCKS {
			let resp_hash = self.storage.get_hash(base_height + SYNC_MAX_BLOCKS)?;
			return Ok((resp_hash, SYNC_MAX_BLOCKS as u32));
		}
		Ok((db_latest_hash, (db_latest_height - base_height) as u32))
	}

	/// Return blocks in `(base, end]`, searching the longest branch's
	/// cache first and falling back to storage for anything evicted.
	pub async fn get_sync_blocks(
		&self,
		base: Hash,
		end: Hash,
		only_header: bool,
	) -> Result<Vec<Block>, Error> {
		let state = self.state.read().await;
		let longest = &state.branches[state.longest];
		let base_idx = longest.get_block(&base);
		let end_idx = longest.get_block(&end);

		if let (Some(base_idx), Some(end_idx)) = (base_idx, end_idx) {
			let base_height = state.arena.get(base_idx).height;
			let end_height = state.arena.get(end_idx).height;
			if base_height >= end_height {
				return Err(Error::InvalidBlockRange(format!(
					"base {} >= end {}",
					base_height, end_height
				)));
			}
			let mut result = Vec::new();
			let mut iter = Some(end_idx);
			while let Some(idx) = iter {
				let node = state.arena.get(idx);
				if node.height == base_height {
					break;
				}
				result.push(node.block.shallow_copy(only_header));
				iter = node.prev;
			}
			result.reverse();
			return Ok(result);
		}
		drop(state);

		let base_db = self.storage.get_block_via_hash(&base).ok();
		let end_db = self.storage.get_block_via_hash(&end).ok();
		match (base_db, end_db) {
			(Some((_, base_height)), Some((_, end_height))) if base_height < end_height => {
				let mut result = Vec::new();
				for height in (base_height + 1)..=end_height {
					let (block, _) = self.storage.get_block_via_height(height)?;
					result.push(block.shallow_copy(only_header));
				}
				Ok(result)
			}
			_ => Err(Error::HashNotFound(base)),
		}
	}

	/// The tip hash of every branch currently in the cache.
	pub async fn get_sync_block_hash(&self) -> Vec<Hash> {
		let state = self.state.read().await;
		state
			.branches
			.iter()
			.map(|b| b.hash(&state.arena))
			.collect()
	}

	pub async fn verify_tx(&self, tx: &Tx) -> Result<(), Error> {
		let state = self.state.read().await;
		state.branches[state.longest].verify_tx(self.storage.as_ref(), tx)
	}

	/// Blocks on the longest branch not yet written to storage, ordered
	/// from the head backward.
	pub async fn get_unstored_blocks(&self) -> (Vec<Block>, Vec<u64>) {
		let state = self.state.read().await;
		let mut blocks = Vec::new();
		let mut heights = Vec::new();
		let mut iter = Some(state.branches[state.longest].head);
		while let Some(idx) = iter {
			let node = state.arena.get(idx);
			if node.stored {
				break;
			}
			blocks.push(node.block.clone());
			heights.push(node.height);
			iter = node.prev;
		}
		(blocks, heights)
	}

	async fn add_blocks_inner(&self, blocks: Vec<Block>) -> Result<(), Error> {
		if blocks.is_empty() {
			return Err(Error::EmptyBatch);
		}
		let mut state = self.state.write().await;

		let parent_hash = blocks[0].header.prev_hash;
		let branch_idx = match state.get_branch(&parent_hash) {
			Some(idx) => idx,
			None => self.create_branch(&mut state, &blocks[0])?,
		};

		let now = ecoin_util::time::now_secs();
		for block in &blocks {
			{
				let branch = &state.branches[branch_idx];
				branch.verify_block(&state.arena, self.storage.as_ref(), block, now)?;
			}
			let height = state.arena.get(state.branches[branch_idx].head).height + 1;
			let hash = block.hash()?;
			let idx = state.arena.alloc(block.clone(), height, hash, false);
			state.branches[branch_idx].add(&mut state.arena, idx);
		}

		self.notify_check(&mut state, now);
		Ok(())
	}

	/// Fork off a new branch from wherever `new_block`'s parent lives in
	/// an existing branch's cache.
	fn create_branch(&self, state: &mut ChainState, new_block: &Block) -> Result<usize, Error> {
		let parent_hash = new_block.header.prev_hash;
		for branch in &state.branches {
			if let Some(match_idx) = branch.get_block(&parent_hash) {
				let branch_height = branch.height(&state.arena);
				let match_height = state.arena.get(match_idx).height;
				if branch_height.saturating_sub(match_height) > ALPHA {
					return Err(Error::BlockRejected(format!(
						"block too old: branch height {}, block height {}",
						branch_height, match_height
					)));
				}
				log::info!(
					"branch fork at block {} height {}",
					state.arena.get(match_idx).hash,
					match_height
				);
				let new_branch = Branch::new(&state.arena, match_idx);
				state.branches.push(new_branch);
				return Ok(state.branches.len() - 1);
			}
		}
		Err(Error::NoParentBranch(parent_hash))
	}

	fn notify_check(&self, state: &mut ChainState, now: i64) {
		let candidate = state.recompute_longest(now);
		let candidate_height = state.branches[candidate].height(&state.arena);
		if candidate_height > state.last_height {
			state.longest = candidate;
			state.last_height = candidate_height;
			let head_time = state.arena.get(state.branches[candidate].head).time();
			self.latest_head_time.store(head_time, Ordering::Relaxed);
			let _ = self.passive_change_tx.send(head_time);
		}
	}

	/// Prune branches that have fallen more than [`ALPHA`] blocks behind
	/// the longest one, then flush the longest branch's confirmed,
	/// unforked prefix to storage.
	async fn maintain(&self) {
		let mut state = self.state.write().await;
		let longest_height = state.branches[state.longest].height(&state.arena);

		let old_branches = std::mem::take(&mut state.branches);
		let mut reserved = Vec::with_capacity(old_branches.len());
		for branch in old_branches {
			if longest_height.saturating_sub(branch.height(&state.arena)) > ALPHA {
				branch.remove(&mut state.arena);
				continue;
			}
			reserved.push(branch);
		}
		// The branch that was longest can't be `ALPHA` behind itself, so it always survives the prune above.
		let new_longest = reserved
			.iter()
			.enumerate()
			.max_by_key(|(_, b)| b.height(&state.arena))
			.map(|(i, _)| i)
			.unwrap_or(0);
		state.branches = reserved;
		state.longest = new_longest;

		let mut iter = Some(state.oldest);
		while let Some(idx) = iter {
			if state.arena.nexts_num(idx) != 1 {
				break;
			}
			let height = state.arena.get(idx).height;
			let longest_height = state.branches[state.longest].height(&state.arena);
			if longest_height.saturating_sub(height) <= ALPHA {
				break;
			}

			if !state.arena.get(idx).stored {
				let block = state.arena.get(idx).block.clone();
				if let Err(e) = self.storage.put_block(&block, height) {
					log::error!("store block failed: {}", e);
					break;
				}
				state.arena.get_mut(idx).stored = true;
				log::debug!("stored block at height {}", height);
			}

			let next = state.arena.get(idx).nexts.first().copied();
			let next = match next {
				Some(n) => n,
				None => break,
			};

			let longest_height = state.branches[state.longest].height(&state.arena);
			if longest_height.saturating_sub(state.arena.get(next).height) > SYNC_MAX_BLOCKS {
				let tx_ids: Vec<Hash> = state.arena.get(idx).block.txs.iter().map(|t| t.id).collect();
				let hash = state.arena.get(idx).hash;
				state.arena.remove_next(idx, next);
				state.arena.remove_prev(next);
				state.arena.evict_txs(idx);
				for branch in &mut state.branches {
					branch.remove_from_cache(&hash, &tx_ids);
				}
				state.oldest = next;
			}

			iter = Some(next);
		}
	}

	/// Run the chain's background maintenance loop until `shutdown` is
	/// signalled: periodic flush-to-storage and draining of the pending
	/// (peer-sourced) block queue.
	pub async fn run(self: Arc<Self>, shutdown: ecoin_util::Shutdown) {
		shutdown.add();
		let mut rx = self
			.pending_blocks_rx
			.lock()
			.await
			.take()
			.expect("run() called more than once");

		let mut maintain_ticker = tokio::time::interval(self.block_interval * 2);
		let mut status_ticker = tokio::time::interval(self.block_interval / 2);

		loop {
			tokio::select! {
				_ = shutdown.cancelled() => break,
				_ = maintain_ticker.tick() => self.maintain().await,
				_ = status_ticker.tick() => self.status_report().await,
				Some(blocks) = rx.recv() => {
					if let Err(e) = self.add_blocks_inner(blocks).await {
						log::warn!("add blocks failed: {}", e);
					}
				}
			}
		}
		shutdown.done();
	}

	async fn status_report(&self) {
		let state = self.state.read().await;
		log::debug!(
			"oldest height {} longest head {} branch count {}",
			state.arena.get(state.oldest).height,
			state.branches[state.longest].hash(&state.arena),
			state.branches.len()
		);
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

	fn next_block(w: &Account, prev_hash: Hash, height: u64, time: i64) -> Block {
		let coinbase = Tx::new_coinbase(w.id(), 50, time - 1, String::new()).unwrap();
		Block::new(height, time, prev_hash, ZERO_HASH, w.id(), vec![coinbase], |h| w.sign(h)).unwrap()
	}

	async fn init_chain() -> (Arc<Chain>, Block, Account) {
		let storage: Arc<dyn Storage> = Arc::new(SledStorage::open_temporary().unwrap());
		let genesis = Block::genesis(ecoin_util::time::now_secs() - 1000, vec![]);
		let chain = Chain::init(storage, genesis.clone(), Duration::from_secs(10))
			.await
			.unwrap();
		(chain, genesis, worker())
	}

	#[tokio::test]
	async fn init_bootstraps_genesis() {
		let (chain, genesis, _w) = init_chain().await;
		assert_eq!(chain.latest_block_hash().await, genesis.hash().unwrap());
	}

	#[tokio::test]
	async fn local_add_extends_longest_branch() {
		let (chain, genesis, w) = init_chain().await;
		let now = ecoin_util::time::now_secs();
		let b1 = next_block(&w, genesis.hash().unwrap(), 2, now);
		let b1_hash = b1.hash().unwrap();

		chain.add_blocks(vec![b1], true).await.unwrap();

		assert_eq!(chain.latest_block_hash().await, b1_hash);
	}

	#[tokio::test]
	async fn fork_creates_second_branch() {
		let (chain, genesis, w) = init_chain().await;
		let now = ecoin_util::time::now_secs();
		let b1 = next_block(&w, genesis.hash().unwrap(), 2, now);
		chain.add_blocks(vec![b1], true).await.unwrap();

		// A second, competing child of genesis forks off a new branch
		// rather than extending the existing one.
		let b1_alt = next_block(&w, genesis.hash().unwrap(), 2, now + 1);
		chain.add_blocks(vec![b1_alt], true).await.unwrap();

		let tips = chain.get_sync_block_hash().await;
		assert_eq!(tips.len(), 2);
	}

	#[tokio::test]
	async fn get_sync_hash_reports_distance_from_cache() {
		let (chain, genesis, w) = init_chain().await;
		let now = ecoin_util::time::now_secs();
		let b1 = next_block(&w, genesis.hash().unwrap(), 2, now);
		let b1_hash = b1.hash().unwrap();
		chain.add_blocks(vec![b1], true).await.unwrap();
		let b2 = next_block(&w, b1_hash, 3, now + 1);
		let b2_hash = b2.hash().unwrap();
		chain.add_blocks(vec![b2], true).await.unwrap();

		let (head_hash, distance) = chain.get_sync_hash(genesis.hash().unwrap()).await.unwrap();
		assert_eq!(head_hash, b2_hash);
		assert_eq!(distance, 2);
	}

	#[tokio::test]
	async fn get_sync_hash_already_up_to_date() {
		let (chain, genesis, _w) = init_chain().await;
		let err = chain
			.get_sync_hash(genesis.hash().unwrap())
			.await
			.unwrap_err();
		assert!(matches!(err, Error::AlreadyUpToDate(_)));
	}

	#[tokio::test]
	async fn get_sync_blocks_returns_requested_range() {
		let (chain, genesis, w) = init_chain().await;
		let now = ecoin_util::time::now_secs();
		let b1 = next_block(&w, genesis.hash().unwrap(), 2, now);
		let b1_hash = b1.hash().unwrap();
		chain.add_blocks(vec![b1], true).await.unwrap();
		let b2 = next_block(&w, b1_hash, 3, now + 1);
		let b2_hash = b2.hash().unwrap();
		chain.add_blocks(vec![b2], true).await.unwrap();

		let blocks = chain
			.get_sync_blocks(genesis.hash().unwrap(), b2_hash, false)
			.await
			.unwrap();
		assert_eq!(blocks.len(), 2);
		assert_eq!(blocks[0].hash().unwrap(), b1_hash);
		assert_eq!(blocks[1].hash().unwrap(), b2_hash);
	}

	#[tokio::test]
	async fn rejects_block_far_behind_longest_branch() {
		let (chain, genesis, w) = init_chain().await;
		let now = ecoin_util::time::now_secs();

		// Extend the main branch past ALPHA so genesis becomes an
		// unreachably old fork point.
		let mut prev_hash = genesis.hash().unwrap();
		for height in 2..=(ALPHA + 3) {
			let b = next_block(&w, prev_hash, height, now + height as i64);
			prev_hash = b.hash().unwrap();
			chain.add_blocks(vec![b], true).await.unwrap();
		}

		let stale_fork = next_block(&w, genesis.hash().unwrap(), 2, now + 1000);
		let err = chain.add_blocks(vec![stale_fork], true).await.unwrap_err();
		assert!(matches!(err, Error::BlockRejected(_)));
	}
}
