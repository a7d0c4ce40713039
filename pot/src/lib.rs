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

//! The Proof-of-Transactions round engine: a single task that cycles
//! every block interval through Compete (broadcast a proof of the txs
//! we'd include), Collect (gather competing proofs), Judge (pick the
//! winner) and WaitBlock (wait for the winner's block, or mint our own
//! if we won). All round state lives on this one task, so mutation is
//! naturally serialized without a lock.

pub mod error;

#[macro_use]
extern crate failure_derive;

pub use error::Error;

use ecoin_chain::Chain;
use ecoin_crypto::{Account, Id};
use ecoin_pool::TxPool;
use ecoin_proto::{Block, PotProof, Tx};
use ecoin_util::Shutdown;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

/// Reward paid to a block's creator. Ported as-is from the original
/// proof-of-concept value; a real fee/issuance schedule is out of scope
/// here.
pub const COINBASE_REWARD: u64 = 100;

/// A round advances through these in order; `WaitBlock` loops back to
/// `Compete` on the next `potStart` timer or as soon as a new block
/// lands on the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
	Idle,
	Compete,
	Collect,
	Judge,
	WaitBlock,
}

#[derive(Default)]
struct Round {
	tbtxp: Vec<Tx>,
	self_proof: Option<PotProof>,
	proofs: HashMap<Id, PotProof>,
	winner_proof: Option<PotProof>,
}

/// The round engine. One instance per worker identity; observer
/// identities never construct one (see `ecoin_node`).
pub struct PotEngine {
	chain: Arc<Chain>,
	pool: Arc<TxPool>,
	account: Account,
	half_epoch: Duration,
	proof_out: mpsc::Sender<PotProof>,
	block_out: mpsc::Sender<Block>,
}

impl PotEngine {
	/// `half_epoch` is half the chain's block interval: the original
	/// schedules `potStart` at `head_time + halfEP`, `potEnd` at
	/// `head_time + 2*halfEP`.
	pub fn new(
		chain: Arc<Chain>,
		pool: Arc<TxPool>,
		account: Account,
		half_epoch: Duration,
		proof_out: mpsc::Sender<PotProof>,
		block_out: mpsc::Sender<Block>,
	) -> Arc<PotEngine> {
		Arc::new(PotEngine {
			chain,
			pool,
			account,
			half_epoch,
			proof_out,
			block_out,
		})
	}

	/// Run the round state machine until `shutdown` is signalled.
	/// `proof_in` carries proofs relayed in from peers over the wire.
	pub async fn run(self: Arc<Self>, mut proof_in: mpsc::Receiver<PotProof>, shutdown: Shutdown) {
		shutdown.add();

		let mut change_rx = self.chain.subscribe_change();
		let mut head_time = *change_rx.borrow();
		let half_secs = self.half_epoch.as_secs() as i64;

		let mut pot_start = Box::pin(sleep_until(Self::deadline(head_time + half_secs)));
		let mut pot_end = Box::pin(sleep_until(Self::deadline(head_time + 2 * half_secs)));
		let mut wait_block = Box::pin(sleep_until(Self::deadline(head_time + 3 * half_secs)));

		let mut stage = Stage::Idle;
		let mut new_round = false;
		let mut round = Round::default();

		loop {
			tokio::select! {
				_ = shutdown.cancelled() => break,
				changed = change_rx.changed() => {
					if changed.is_err() {
						continue;
					}
					head_time = *change_rx.borrow();
					log::debug!("new block observed mid-round, restarting timers");
					self.return_txs(&mut round);
					new_round = true;
					pot_start.as_mut().reset(Self::deadline(head_time + half_secs));
					pot_end.as_mut().reset(Self::far_future());
					wait_block.as_mut().reset(Self::far_future());
				}
				() = &mut pot_start => {
					stage = Stage::Compete;
					new_round = false;
					self.gen_and_broadcast_proof(&mut round).await;
					stage = Stage::Collect;
				}
				() = &mut pot_end => {
					stage = Stage::Judge;
					self.judge_and_handle(&mut round).await;
					stage = Stage::WaitBlock;
				}
				() = &mut wait_block => {
					if !new_round {
						new_round = true;
						self.penalize_timeout(&round);
					}
				}
				Some(proof) = proof_in.recv() => {
					self.record_proof(&mut round, stage, proof).await;
				}
			}
		}
		shutdown.done();
	}

	fn deadline(target_unix: i64) -> Instant {
		let diff = (target_unix - ecoin_util::time::now_secs()).max(0) as u64;
		Instant::now() + Duration::from_secs(diff)
	}

	/// A deadline far enough out it will never fire before the next
	/// `reset`; stands in for the original's `timer.Stop()`, which Rust's
	/// `Sleep` has no equivalent of.
	fn far_future() -> Instant {
		Instant::now() + Duration::from_secs(60 * 60 * 24 * 365)
	}

	/// Drain the highest-priority valid transactions from the pool,
	/// build this round's proof, and broadcast it.
	async fn gen_and_broadcast_proof(&self, round: &mut Round) {
		let mut txs = Vec::new();
		while let Some(tx) = self.pool.next_tx() {
			if self.chain.verify_tx(&tx).await.is_ok() {
				txs.push(tx);
			}
		}
		round.tbtxp = txs;

		let base = self.chain.latest_block_hash().await;
		let index = self.chain.latest_block_height().await + 1;
		let now = ecoin_util::time::now_secs();
		let proof = match PotProof::new(index, base, now, self.account.id(), &round.tbtxp, |h| {
			self.account.sign(h)
		}) {
			Ok(p) => p,
			Err(e) => {
				log::warn!("build proof failed: {}", e);
				return;
			}
		};

		round.self_proof = Some(proof.clone());
		round.proofs.insert(self.account.id(), proof.clone());
		round.winner_proof = Some(proof.clone());

		log::debug!(
			"competing: index {} txs {} merkle {}",
			proof.index,
			proof.tx_count(),
			proof.merkle_root
		);
		if self.proof_out.try_send(proof).is_err() {
			log::warn!("proof broadcast queue full, dropping own proof");
		}
	}

	/// Record an incoming peer proof, updating the current winner if it
	/// outranks what we've seen so far. Only proofs that arrive during
	/// Collect and that target our own round (same `base`, `index` one
	/// past our latest block) are eligible; anything else is a stale or
	/// mistargeted proof and is dropped.
	async fn record_proof(&self, round: &mut Round, stage: Stage, proof: PotProof) {
		if stage != Stage::Collect {
			return;
		}
		if proof.validate().is_err() {
			return;
		}
		let base = self.chain.latest_block_hash().await;
		let index = self.chain.latest_block_height().await + 1;
		if proof.base != base || proof.index != index {
			return;
		}
		round.proofs.insert(proof.creator, proof.clone());
		let is_winner = match &round.winner_proof {
			None => true,
			Some(current) => proof.outranks(current),
		};
		if is_winner {
			round.winner_proof = Some(proof);
		}
	}

	/// Decide whether we won this round and act on it: mint and
	/// broadcast a block if so, otherwise return our unused transactions
	/// to the pool and wait for the winner's block.
	async fn judge_and_handle(&self, round: &mut Round) {
		let (self_proof, winner_proof) = match (&round.self_proof, &round.winner_proof) {
			(Some(s), Some(w)) => (s.clone(), w.clone()),
			_ => {
				log::debug!("no proof to judge this round, skipping");
				return;
			}
		};

		if self_proof.creator == winner_proof.creator {
			log::debug!("won round at index {}", self_proof.index);
			match self.build_block(round, &winner_proof).await {
				Ok(block) => {
					if self.block_out.try_send(block).is_err() {
						log::warn!("block broadcast queue full, dropping own block");
					}
				}
				Err(e) => log::warn!("building winning block failed: {}", e),
			}
		} else {
			log::debug!(
				"lost round at index {}, winner {}",
				self_proof.index,
				winner_proof.creator
			);
			self.return_txs(round);
		}

		round.self_proof = None;
		round.winner_proof = None;
		round.proofs.clear();
	}

	/// Build the block this round's winning proof entitles us to mint:
	/// a coinbase reward plus every transaction we claimed.
	async fn build_block(&self, round: &Round, winner_proof: &PotProof) -> Result<Block, Error> {
		let prev_hash = winner_proof.base;
		let height = winner_proof.index;
		let now = ecoin_util::time::now_secs();

		let memo = format!("reward for {}", self.account.id());
		let coinbase = Tx::new_coinbase(self.account.id(), COINBASE_REWARD, now - 1, memo)?;
		let mut txs = Vec::with_capacity(round.tbtxp.len() + 1);
		txs.push(coinbase);
		txs.extend(round.tbtxp.iter().cloned());

		let proof_hash = winner_proof.hash()?;
		let block = Block::new(height, now, prev_hash, proof_hash, self.account.id(), txs, |h| {
			self.account.sign(h)
		})?;
		Ok(block)
	}

	/// Return this round's drained-but-unused transactions to the pool
	/// so they compete again next round.
	fn return_txs(&self, round: &mut Round) {
		let txs = std::mem::take(&mut round.tbtxp);
		round.self_proof = None;
		if !txs.is_empty() {
			if let Err(e) = self.pool.add_tx(txs, false) {
				log::warn!("returning txs to pool failed: {}", e);
			}
		}
	}

	/// No block arrived from the declared winner before the round's
	/// third timer fired. A full reputation/penalty system for the
	/// winner is out of scope; we just log and fall through to the next
	/// round's Compete phase.
	fn penalize_timeout(&self, round: &Round) {
		if let Some(winner) = &round.winner_proof {
			log::warn!(
				"winner {} failed to produce a block for index {} in time",
				winner.creator,
				winner.index
			);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use ecoin_crypto::{PrivateKey, Role};
	use ecoin_store::SledStorage;

	fn worker() -> Account {
		Account::from_private_key(Role::Hospital, PrivateKey::generate())
	}

	async fn setup() -> Arc<PotEngine> {
		let storage: Arc<dyn ecoin_store::Storage> = Arc::new(SledStorage::open_temporary().unwrap());
		let genesis = Block::genesis(ecoin_util::time::now_secs() - 100, vec![]);
		let chain = Chain::init(storage, genesis, Duration::from_secs(10))
			.await
			.unwrap();

		let (bc_tx, _bc_rx) = mpsc::channel(8);
		let pool = TxPool::new(worker(), bc_tx);

		let (proof_tx, _proof_rx) = mpsc::channel(8);
		let (block_tx, _block_rx) = mpsc::channel(8);
		PotEngine::new(chain, pool, worker(), Duration::from_millis(50), proof_tx, block_tx)
	}

	#[tokio::test]
	async fn gen_and_broadcast_produces_self_proof() {
		let engine = setup().await;
		let mut round = Round::default();
		engine.gen_and_broadcast_proof(&mut round).await;
		assert!(round.self_proof.is_some());
		assert_eq!(round.winner_proof.unwrap().creator, engine.account.id());
	}

	#[tokio::test]
	async fn record_proof_prefers_larger_claim() {
		let engine = setup().await;
		let mut round = Round::default();
		engine.gen_and_broadcast_proof(&mut round).await;
		let self_id = round.self_proof.as_ref().unwrap().creator;

		let rival = worker();
		let rival_tx = ecoin_proto::Tx::new_signed(
			ecoin_proto::TxType::General,
			rival.id(),
			worker().id(),
			1,
			vec![],
			ecoin_crypto::ZERO_HASH,
			ecoin_util::time::now_secs() - 5,
			String::new(),
			|h| rival.sign(h),
		)
		.unwrap();
		let base = engine.chain.latest_block_hash().await;
		let index = engine.chain.latest_block_height().await + 1;
		let rival_proof =
			PotProof::new(index, base, ecoin_util::time::now_secs(), rival.id(), &[rival_tx], |h| {
				rival.sign(h)
			})
			.unwrap();

		engine
			.record_proof(&mut round, Stage::Collect, rival_proof.clone())
			.await;
		assert_eq!(round.winner_proof.unwrap().creator, rival_proof.creator);
		assert_ne!(rival_proof.creator, self_id);
	}

	#[tokio::test]
	async fn record_proof_ignores_proofs_outside_collect() {
		let engine = setup().await;
		let mut round = Round::default();
		engine.gen_and_broadcast_proof(&mut round).await;

		let rival = worker();
		let base = engine.chain.latest_block_hash().await;
		let index = engine.chain.latest_block_height().await + 1;
		let rival_proof =
			PotProof::new(index, base, ecoin_util::time::now_secs(), rival.id(), &[], |h| {
				rival.sign(h)
			})
			.unwrap();

		engine
			.record_proof(&mut round, Stage::Idle, rival_proof.clone())
			.await;
		assert_ne!(round.winner_proof.unwrap().creator, rival_proof.creator);
	}

	#[tokio::test]
	async fn record_proof_ignores_stale_base() {
		let engine = setup().await;
		let mut round = Round::default();
		engine.gen_and_broadcast_proof(&mut round).await;
		let self_id = round.self_proof.as_ref().unwrap().creator;

		let rival = worker();
		let stale_base = ecoin_crypto::Hash::digest(b"not our latest block");
		let index = engine.chain.latest_block_height().await + 1;
		let rival_proof = PotProof::new(index, stale_base, ecoin_util::time::now_secs(), rival.id(), &[], |h| {
			rival.sign(h)
		})
		.unwrap();

		engine
			.record_proof(&mut round, Stage::Collect, rival_proof.clone())
			.await;
		assert_eq!(round.winner_proof.unwrap().creator, self_id);
	}
}
