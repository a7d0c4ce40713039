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

//! Pending transaction pool. Raw (unsigned, locally submitted)
//! transactions are turned into signed [`Tx`]s and queued by priority;
//! the priority function favors diagnostic transaction flows (patient
//! <-> hospital/doctor) the way the original wire format reserved
//! bandwidth for them.

pub mod error;

#[macro_use]
extern crate failure_derive;

pub use error::Error;

use ecoin_crypto::{Account, Hash, Id};
use ecoin_proto::{Tx, TxType};
use ecoin_util::{bounds, RwLock};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Diagnostic flows (P2H/H2P/P2D/D2P) outrank everything else; the
/// factor converts "tx type class" into the same units as an age in
/// seconds so a type-1 tx a minute younger than a type-0 tx still wins.
const TYPE_WEIGHT_FACTOR: i64 = 120;

fn type_weight(tx_type: TxType) -> i64 {
	if tx_type.is_diagnostic() {
		1
	} else {
		0
	}
}

fn priority(tx: &Tx, now: i64) -> i64 {
	type_weight(tx.tx_type) * TYPE_WEIGHT_FACTOR + (now - tx.time)
}

/// A locally submitted transaction before it has an id or signature.
/// Mirrors the original protocol's separate raw-transaction shape: the
/// caller only supplies what a user-facing client would know, and the
/// pool fills in `from`/`id`/`sig` from its own account.
#[derive(Debug, Clone)]
pub struct RawTx {
	pub tx_type: TxType,
	pub uncompleted: bool,
	pub to: Id,
	pub amount: u64,
	pub payload: Vec<u8>,
	pub prev_tx_id: Hash,
	pub description: String,
}

struct WeightedTx {
	tx: Tx,
	priority: i64,
}

impl PartialEq for WeightedTx {
	fn eq(&self, other: &Self) -> bool {
		self.priority == other.priority
	}
}
impl Eq for WeightedTx {}
impl PartialOrd for WeightedTx {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}
impl Ord for WeightedTx {
	fn cmp(&self, other: &Self) -> Ordering {
		self.priority.cmp(&other.priority)
	}
}

struct Queue {
	heap: BinaryHeap<WeightedTx>,
	pending_ids: HashSet<Hash>,
}

/// The pool. Cheap to share: wrap in `Arc` and clone the handle, or hand
/// out `Arc<TxPool>` directly as the other crates' managers do.
pub struct TxPool {
	account: Account,
	queue: RwLock<Queue>,
	broadcast_tx: mpsc::Sender<Vec<Tx>>,
	raw_tx: mpsc::Sender<RawTx>,
	raw_rx: tokio::sync::Mutex<Option<mpsc::Receiver<RawTx>>>,
}

impl TxPool {
	/// `account` signs every raw transaction submitted locally.
	/// `broadcast_tx` receives batches that need to go out over the
	/// network; the caller owns the matching receiver.
	pub fn new(account: Account, broadcast_tx: mpsc::Sender<Vec<Tx>>) -> Arc<TxPool> {
		let (raw_tx, raw_rx) = mpsc::channel(bounds::RAW_TX_IN);
		Arc::new(TxPool {
			account,
			queue: RwLock::new(Queue {
				heap: BinaryHeap::new(),
				pending_ids: HashSet::new(),
			}),
			broadcast_tx,
			raw_tx,
			raw_rx: tokio::sync::Mutex::new(Some(raw_rx)),
		})
	}

	/// Queue a raw transaction for local signing and insertion. Dropped
	/// with a warning if the inbound raw queue is full.
	pub fn add_raw_tx(&self, raw: RawTx) {
		if self.raw_tx.try_send(raw).is_err() {
			log::warn!("raw tx queue full, dropping submission");
		}
	}

	/// Insert already-signed transactions, e.g. from a block broadcast
	/// or peer relay. `from_broadcast` suppresses re-broadcasting what
	/// was itself just received over the wire.
	pub fn add_tx(&self, txs: Vec<Tx>, from_broadcast: bool) -> Result<(), Error> {
		let mut accepted = Vec::with_capacity(txs.len());
		for tx in txs {
			if self.insert(tx.clone())? {
				accepted.push(tx);
			}
		}
		if !from_broadcast && !accepted.is_empty() && self.broadcast_tx.try_send(accepted).is_err() {
			log::warn!("tx broadcast queue full, dropping batch");
		}
		Ok(())
	}

	/// Pop the highest-priority pending transaction, if any.
	pub fn next_tx(&self) -> Option<Tx> {
		let mut queue = self.queue.write();
		let wtx = queue.heap.pop()?;
		queue.pending_ids.remove(&wtx.tx.id);
		Some(wtx.tx)
	}

	pub fn size(&self) -> usize {
		self.queue.read().heap.len()
	}

	fn insert(&self, tx: Tx) -> Result<bool, Error> {
		let mut queue = self.queue.write();
		if queue.pending_ids.contains(&tx.id) {
			return Ok(false);
		}
		if queue.heap.len() >= bounds::TX_POOL {
			return Err(Error::Full(queue.heap.len()));
		}
		let now = ecoin_util::time::now_secs();
		let p = priority(&tx, now);
		queue.pending_ids.insert(tx.id);
		queue.heap.push(WeightedTx { tx, priority: p });
		Ok(true)
	}

	/// Sign and queue a raw transaction, broadcasting the result.
	fn process_raw(&self, raw: RawTx) {
		let tx = match Tx::new_signed_with_completion(
			raw.tx_type,
			self.account.id(),
			raw.to,
			raw.amount,
			raw.payload,
			raw.prev_tx_id,
			ecoin_util::time::now_secs(),
			raw.uncompleted,
			raw.description,
			|hash| self.account.sign(hash),
		) {
			Ok(tx) => tx,
			Err(e) => {
				log::warn!("sign raw tx failed: {}", e);
				return;
			}
		};

		match self.insert(tx.clone()) {
			Ok(true) => {
				if self.broadcast_tx.try_send(vec![tx]).is_err() {
					log::warn!("tx broadcast queue full, dropping raw tx");
				}
			}
			Ok(false) => {}
			Err(e) => log::warn!("pool rejected raw tx: {}", e),
		}
	}

	/// Drain the raw-tx queue until `shutdown` is signalled.
	pub async fn run(self: Arc<Self>, shutdown: ecoin_util::Shutdown) {
		shutdown.add();
		let mut rx = self
			.raw_rx
			.lock()
			.await
			.take()
			.expect("run() called more than once");

		loop {
			tokio::select! {
				_ = shutdown.cancelled() => break,
				Some(raw) = rx.recv() => self.process_raw(raw),
			}
		}
		shutdown.done();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use ecoin_crypto::{PrivateKey, Role, ZERO_HASH};

	fn hospital() -> Account {
		Account::from_private_key(Role::Hospital, PrivateKey::generate())
	}

	fn patient() -> Account {
		Account::from_private_key(Role::Patient, PrivateKey::generate())
	}

	fn signed_tx(from: &Account, to: Id, tx_type: TxType, time: i64) -> Tx {
		Tx::new_signed(
			tx_type,
			from.id(),
			to,
			1,
			vec![],
			ZERO_HASH,
			time,
			String::new(),
			|h| from.sign(h),
		)
		.unwrap()
	}

	#[test]
	fn diagnostic_tx_outranks_equally_aged_general_tx() {
		let h = hospital();
		let p = patient();
		let (tx_bc, _rx) = mpsc::channel(8);
		let pool = TxPool::new(hospital(), tx_bc);

		let now = ecoin_util::time::now_secs() - 10;
		let general = signed_tx(&h, p.id(), TxType::General, now);
		let diagnostic = signed_tx(&h, p.id(), TxType::H2P, now);

		pool.add_tx(vec![general.clone()], true).unwrap();
		pool.add_tx(vec![diagnostic.clone()], true).unwrap();

		assert_eq!(pool.next_tx().unwrap().id, diagnostic.id);
		assert_eq!(pool.next_tx().unwrap().id, general.id);
		assert!(pool.next_tx().is_none());
	}

	#[test]
	fn duplicate_tx_ignored() {
		let h = hospital();
		let p = patient();
		let (tx_bc, _rx) = mpsc::channel(8);
		let pool = TxPool::new(hospital(), tx_bc);

		let tx = signed_tx(&h, p.id(), TxType::General, ecoin_util::time::now_secs() - 5);
		pool.add_tx(vec![tx.clone()], true).unwrap();
		pool.add_tx(vec![tx.clone()], true).unwrap();

		assert_eq!(pool.size(), 1);
	}

	#[tokio::test]
	async fn raw_tx_signed_and_queued() {
		let h = hospital();
		let p = patient();
		let (tx_bc, mut rx) = mpsc::channel(8);
		let pool = TxPool::new(h, tx_bc);

		let raw = RawTx {
			tx_type: TxType::General,
			uncompleted: false,
			to: p.id(),
			amount: 5,
			payload: vec![],
			prev_tx_id: ZERO_HASH,
			description: String::new(),
		};
		pool.add_raw_tx(raw);

		let shutdown = ecoin_util::Shutdown::new();
		let runner = tokio::spawn(pool.clone().run(shutdown.clone()));

		let broadcasted = rx.recv().await.unwrap();
		assert_eq!(broadcasted.len(), 1);
		assert_eq!(pool.size(), 1);

		shutdown.stop().await;
		runner.await.unwrap();
	}
}
