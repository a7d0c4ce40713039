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

//! The node: wires storage, the chain manager, the transaction pool, the
//! PoT round engine and the p2p layer into one running process, and
//! exposes the query/submit surface an external collaborator (CLI, RPC,
//! wallet) calls into. Mirrors how the original's `node.Node` owns one
//! instance of each subsystem and relays between them.

pub mod config;
pub mod error;
pub mod view;

#[macro_use]
extern crate failure_derive;

pub use config::{NodeConfig, SeedPeer};
pub use error::Error;

use ecoin_chain::Chain;
use ecoin_crypto::{Account, Hash, Id};
use ecoin_p2p::discovery::Peer as DiscoveredPeer;
use ecoin_p2p::{P2pConfig, P2pNode};
use ecoin_pool::{RawTx, TxPool};
use ecoin_pot::PotEngine;
use ecoin_proto::{
	deserialize, serialize, Block, BlockBroadcast, BlockReq, BlockResp, PotProof, ProofBroadcast,
	ProtocolId, SyncMessage, SyncReq, SyncResp, Tx, TxBroadcast, TxType,
};
use ecoin_store::{SledStorage, Storage};
use ecoin_util::{bounds, Mutex, Shutdown};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use view::{AccountView, BlockView, TxView};

/// How often a connected peer is asked for its chain tip. Reuses the
/// block interval: there is no point polling faster than new blocks can
/// possibly arrive.
fn sync_request_interval(block_interval: Duration) -> Duration {
	block_interval
}

/// Ties every subsystem to one running identity. Cheap to clone (wrap in
/// `Arc`); [`Node::run`] spawns one task per subsystem plus the relay
/// tasks that move messages between the p2p layer and the rest.
pub struct Node {
	config: NodeConfig,
	account: Account,
	storage: Arc<dyn Storage>,
	chain: Arc<Chain>,
	pool: Arc<TxPool>,
	p2p: Arc<P2pNode>,
	pot: Option<Arc<PotEngine>>,

	tx_broadcast_rx: Mutex<Option<mpsc::Receiver<Vec<Tx>>>>,
	block_broadcast_rx: Mutex<Option<mpsc::Receiver<Block>>>,
	proof_broadcast_rx: Mutex<Option<mpsc::Receiver<PotProof>>>,
	proof_in_tx: Option<mpsc::Sender<PotProof>>,
	proof_in_rx: Mutex<Option<mpsc::Receiver<PotProof>>>,
}

impl Node {
	/// Open storage (bootstrapping genesis if empty), and construct every
	/// subsystem around `account`'s identity. Does not start any
	/// background task; call [`Node::run`] for that.
	pub async fn new(config: NodeConfig, account: Account) -> Result<Arc<Node>, Error> {
		config.validate()?;
		let genesis = config.genesis_block()?;

		let storage: Arc<dyn Storage> = match &config.storage_path {
			Some(path) => Arc::new(SledStorage::open(path)?),
			None => Arc::new(SledStorage::open_temporary()?),
		};

		let chain = Chain::init(storage.clone(), genesis, config.block_interval).await?;

		let (tx_broadcast_tx, tx_broadcast_rx) = mpsc::channel(bounds::TX_BROADCAST_OUT);
		let pool = TxPool::new(account.clone(), tx_broadcast_tx);

		let p2p_config = P2pConfig {
			listen_addr: config.listen_addr,
			udp_addr: config.udp_addr,
			chain_id: config.chain_id,
			max_peers: config.max_peers,
			code_version: config.code_version,
			min_code_version: config.min_code_version,
		};
		let p2p = P2pNode::new(p2p_config, account.clone());
		p2p.add_seeds(
			config
				.seeds
				.iter()
				.map(|s| DiscoveredPeer { id: s.id, addr: s.addr })
				.collect(),
		);

		let (pot, block_broadcast_rx, proof_broadcast_rx, proof_in_tx, proof_in_rx) =
			if account.role.is_worker() {
				let (proof_out_tx, proof_out_rx) = mpsc::channel(bounds::PROOF_BROADCAST_OUT);
				let (block_out_tx, block_out_rx) = mpsc::channel(bounds::BLOCK_BROADCAST_OUT);
				let (proof_in_tx, proof_in_rx) = mpsc::channel(bounds::PROOF_IN);
				let half_epoch = config.block_interval / 2;
				let engine = PotEngine::new(
					chain.clone(),
					pool.clone(),
					account.clone(),
					half_epoch,
					proof_out_tx,
					block_out_tx,
				);
				(
					Some(engine),
					Some(block_out_rx),
					Some(proof_out_rx),
					Some(proof_in_tx),
					Some(proof_in_rx),
				)
			} else {
				log::info!("{:?} role is an observer, not starting the PoT engine", account.role);
				(None, None, None, None, None)
			};

		Ok(Arc::new(Node {
			config,
			account,
			storage,
			chain,
			pool,
			p2p,
			pot,
			tx_broadcast_rx: Mutex::new(Some(tx_broadcast_rx)),
			block_broadcast_rx: Mutex::new(block_broadcast_rx),
			proof_broadcast_rx: Mutex::new(proof_broadcast_rx),
			proof_in_tx,
			proof_in_rx: Mutex::new(proof_in_rx),
		}))
	}

	/// Start every subsystem's background task and the relays that wire
	/// them to the p2p layer, then block until `shutdown` fires.
	pub async fn run(self: Arc<Self>, shutdown: Shutdown) {
		shutdown.add();

		tokio::spawn(self.chain.clone().run(shutdown.clone()));
		tokio::spawn(self.pool.clone().run(shutdown.clone()));
		tokio::spawn(self.p2p.clone().run(shutdown.clone()));

		if let Some(pot) = self.pot.clone() {
			let proof_in_rx = self
				.proof_in_rx
				.lock()
				.take()
				.expect("run() called more than once");
			tokio::spawn(pot.run(proof_in_rx, shutdown.clone()));
		}

		let tx_in_rx = self.p2p.add_protocol(ProtocolId::Tx).await;
		let block_in_rx = self.p2p.add_protocol(ProtocolId::Block).await;
		let proof_wire_rx = self.p2p.add_protocol(ProtocolId::Proof).await;
		let sync_rx = self.p2p.add_protocol(ProtocolId::Sync).await;

		tokio::spawn(self.clone().relay_tx_out(shutdown.clone()));
		tokio::spawn(self.clone().relay_tx_in(tx_in_rx, shutdown.clone()));
		tokio::spawn(self.clone().relay_block_in(block_in_rx, shutdown.clone()));
		tokio::spawn(self.clone().relay_proof_in(proof_wire_rx, shutdown.clone()));
		tokio::spawn(self.clone().relay_sync(sync_rx, shutdown.clone()));
		tokio::spawn(self.clone().sync_poll(shutdown.clone()));

		if self.pot.is_some() {
			tokio::spawn(self.clone().relay_block_out(shutdown.clone()));
			tokio::spawn(self.clone().relay_proof_out(shutdown.clone()));
		}

		shutdown.cancelled().await;
		shutdown.done();
	}

	async fn relay_tx_out(self: Arc<Self>, shutdown: Shutdown) {
		shutdown.add();
		let mut rx = self
			.tx_broadcast_rx
			.lock()
			.take()
			.expect("run() called more than once");
		loop {
			tokio::select! {
				_ = shutdown.cancelled() => break,
				Some(txs) = rx.recv() => {
					match serialize(&TxBroadcast { txs }) {
						Ok(bytes) => {
							if let Err(e) = self.p2p.broadcast_once(ProtocolId::Tx, bytes).await {
								log::warn!("tx broadcast failed: {}", e);
							}
						}
						Err(e) => log::warn!("encode tx broadcast failed: {}", e),
					}
				}
			}
		}
		shutdown.done();
	}

	async fn relay_tx_in(self: Arc<Self>, mut rx: mpsc::Receiver<(Id, Vec<u8>)>, shutdown: Shutdown) {
		shutdown.add();
		loop {
			tokio::select! {
				_ = shutdown.cancelled() => break,
				Some((from, payload)) = rx.recv() => {
					match deserialize::<TxBroadcast>(&payload) {
						Ok(msg) => {
							let mut valid = Vec::with_capacity(msg.txs.len());
							for tx in msg.txs {
								if let Err(e) = tx.validate() {
									log::warn!("dropping invalid tx from {:?}: {}", from, e);
									continue;
								}
								valid.push(tx);
							}
							if !valid.is_empty() {
								if let Err(e) = self.pool.add_tx(valid, true) {
									log::warn!("pool rejected tx from {:?}: {}", from, e);
								}
							}
						}
						Err(e) => log::warn!("malformed tx broadcast from {:?}: {}", from, e),
					}
				}
			}
		}
		shutdown.done();
	}

	async fn relay_block_out(self: Arc<Self>, shutdown: Shutdown) {
		shutdown.add();
		let mut rx = self
			.block_broadcast_rx
			.lock()
			.take()
			.expect("run() called more than once, or called on an observer node");
		loop {
			tokio::select! {
				_ = shutdown.cancelled() => break,
				Some(block) = rx.recv() => {
					if let Err(e) = self.chain.add_blocks(vec![block.clone()], true).await {
						log::warn!("applying our own mined block failed: {}", e);
						continue;
					}
					match serialize(&BlockBroadcast { block }) {
						Ok(bytes) => {
							if let Err(e) = self.p2p.broadcast_once(ProtocolId::Block, bytes).await {
								log::warn!("block broadcast failed: {}", e);
							}
						}
						Err(e) => log::warn!("encode block broadcast failed: {}", e),
					}
				}
			}
		}
		shutdown.done();
	}

	async fn relay_block_in(self: Arc<Self>, mut rx: mpsc::Receiver<(Id, Vec<u8>)>, shutdown: Shutdown) {
		shutdown.add();
		loop {
			tokio::select! {
				_ = shutdown.cancelled() => break,
				Some((from, payload)) = rx.recv() => {
					match deserialize::<BlockBroadcast>(&payload) {
						Ok(msg) => {
							if let Err(e) = msg.block.validate() {
								log::warn!("dropping invalid block from {:?}: {}", from, e);
								continue;
							}
							if let Err(e) = self.chain.add_blocks(vec![msg.block], false).await {
								log::warn!("chain rejected block from {:?}: {}", from, e);
							}
						}
						Err(e) => log::warn!("malformed block broadcast from {:?}: {}", from, e),
					}
				}
			}
		}
		shutdown.done();
	}

	async fn relay_proof_out(self: Arc<Self>, shutdown: Shutdown) {
		shutdown.add();
		let mut rx = self
			.proof_broadcast_rx
			.lock()
			.take()
			.expect("run() called more than once, or called on an observer node");
		loop {
			tokio::select! {
				_ = shutdown.cancelled() => break,
				Some(proof) = rx.recv() => {
					match serialize(&ProofBroadcast { proof }) {
						Ok(bytes) => {
							if let Err(e) = self.p2p.broadcast_once(ProtocolId::Proof, bytes).await {
								log::warn!("proof broadcast failed: {}", e);
							}
						}
						Err(e) => log::warn!("encode proof broadcast failed: {}", e),
					}
				}
			}
		}
		shutdown.done();
	}

	/// Observer nodes still demultiplex `ProtocolId::Proof` (so the
	/// channel doesn't back up against a peer that keeps broadcasting),
	/// they just have nowhere to forward a decoded proof to.
	async fn relay_proof_in(self: Arc<Self>, mut rx: mpsc::Receiver<(Id, Vec<u8>)>, shutdown: Shutdown) {
		shutdown.add();
		loop {
			tokio::select! {
				_ = shutdown.cancelled() => break,
				Some((from, payload)) = rx.recv() => {
					let Some(proof_in_tx) = &self.proof_in_tx else { continue };
					match deserialize::<ProofBroadcast>(&payload) {
						Ok(msg) => {
							if proof_in_tx.try_send(msg.proof).is_err() {
								log::warn!("proof queue full, dropping proof from {:?}", from);
							}
						}
						Err(e) => log::warn!("malformed proof broadcast from {:?}: {}", from, e),
					}
				}
			}
		}
		shutdown.done();
	}

	/// Periodically ask one connected peer for its chain tip, simple
	/// height-based catch-up for whatever this node missed while it was
	/// offline or partitioned. Freshly minted blocks still reach every
	/// node through [`Node::relay_block_out`]'s broadcast; this path only
	/// covers the gap a new or reconnecting node has to close.
	async fn sync_poll(self: Arc<Self>, shutdown: Shutdown) {
		shutdown.add();
		let mut ticker = tokio::time::interval(sync_request_interval(self.config.block_interval));
		loop {
			tokio::select! {
				_ = shutdown.cancelled() => break,
				_ = ticker.tick() => self.request_sync().await,
			}
		}
		shutdown.done();
	}

	async fn request_sync(&self) {
		let peers = self.p2p.connected_peers().await;
		let Some(peer) = peers.first().copied() else { return };
		let req = SyncMessage::Req(SyncReq {
			base: self.chain.latest_block_hash().await,
		});
		let bytes = match serialize(&req) {
			Ok(b) => b,
			Err(e) => {
				log::warn!("encode sync request failed: {}", e);
				return;
			}
		};
		if let Err(e) = self.p2p.send(ProtocolId::Sync, Some(peer), bytes).await {
			log::warn!("sync request to {:?} failed: {}", peer, e);
		}
	}

	/// Handle both sides of the sync protocol on one channel: requests
	/// from peers asking what we have, and responses/block bodies to a
	/// sync we started ourselves.
	async fn relay_sync(self: Arc<Self>, mut rx: mpsc::Receiver<(Id, Vec<u8>)>, shutdown: Shutdown) {
		shutdown.add();
		loop {
			tokio::select! {
				_ = shutdown.cancelled() => break,
				Some((from, payload)) = rx.recv() => {
					match deserialize::<SyncMessage>(&payload) {
						Ok(msg) => self.handle_sync_message(from, msg).await,
						Err(e) => log::warn!("malformed sync message from {:?}: {}", from, e),
					}
				}
			}
		}
		shutdown.done();
	}

	async fn handle_sync_message(&self, from: Id, msg: SyncMessage) {
		match msg {
			SyncMessage::Req(req) => self.handle_sync_req(from, req).await,
			SyncMessage::Resp(resp) => self.handle_sync_resp(from, resp).await,
			SyncMessage::BlockReq(req) => self.handle_block_req(from, req).await,
			SyncMessage::BlockResp(resp) => self.handle_block_resp(from, resp).await,
		}
	}

	/// Tell `from` how far behind their `base` is from our longest
	/// branch, per §4.5 type 2. Blocks still only in the chain's
	/// in-memory cache (not yet flushed) are still reachable through
	/// `get_sync_hash`, which checks the cache before storage.
	async fn handle_sync_req(&self, from: Id, req: SyncReq) {
		let resp = match self.chain.get_sync_hash(req.base).await {
			Ok((end, height_diff)) => SyncResp {
				base: req.base,
				end,
				height_diff,
			},
			Err(ecoin_chain::Error::AlreadyUpToDate(base)) => SyncResp {
				base,
				end: base,
				height_diff: 0,
			},
			Err(e) => {
				log::warn!("sync request from {:?} failed: {}", from, e);
				return;
			}
		};
		self.send_sync(from, &SyncMessage::Resp(resp)).await;
	}

	/// If the peer reports we're behind, request the actual block bodies
	/// for the gap they identified.
	async fn handle_sync_resp(&self, from: Id, resp: SyncResp) {
		if resp.height_diff == 0 {
			return;
		}
		let req = BlockReq {
			base: resp.base,
			end: resp.end,
			only_header: false,
		};
		self.send_sync(from, &SyncMessage::BlockReq(req)).await;
	}

	async fn handle_block_req(&self, from: Id, req: BlockReq) {
		match self
			.chain
			.get_sync_blocks(req.base, req.end, req.only_header)
			.await
		{
			Ok(blocks) => {
				self.send_sync(from, &SyncMessage::BlockResp(BlockResp { blocks })).await;
			}
			Err(e) => log::warn!("block request from {:?} failed: {}", from, e),
		}
	}

	async fn handle_block_resp(&self, from: Id, resp: BlockResp) {
		if resp.blocks.is_empty() {
			return;
		}
		if let Err(e) = self.chain.add_blocks(resp.blocks, false).await {
			log::warn!("chain rejected synced blocks from {:?}: {}", from, e);
		}
	}

	async fn send_sync(&self, to: Id, msg: &SyncMessage) {
		match serialize(msg) {
			Ok(bytes) => {
				if let Err(e) = self.p2p.send(ProtocolId::Sync, Some(to), bytes).await {
					log::warn!("sync reply to {:?} failed: {}", to, e);
				}
			}
			Err(e) => log::warn!("encode sync reply failed: {}", e),
		}
	}

	/// Sign and insert a transaction immediately, returning its pending
	/// view. For a fire-and-forget submission that is signed
	/// asynchronously by the pool's own task, use [`Node::build_tx_raw`].
	#[allow(clippy::too_many_arguments)]
	pub async fn build_tx(
		&self,
		tx_type: TxType,
		to: Id,
		amount: u64,
		payload: Vec<u8>,
		prev_tx_id: Hash,
		description: String,
	) -> Result<TxView, Error> {
		let tx = Tx::new_signed(
			tx_type,
			self.account.id(),
			to,
			amount,
			payload,
			prev_tx_id,
			ecoin_util::time::now_secs(),
			description,
			|h| self.account.sign(h),
		)?;
		self.pool.add_tx(vec![tx.clone()], false)?;
		Ok(TxView::from_tx(tx, None))
	}

	/// Queue a raw transaction for the pool to sign and insert on its own
	/// task; does not block on signing or broadcast.
	pub fn build_tx_raw(&self, raw: RawTx) {
		self.pool.add_raw_tx(raw);
	}

	pub fn query_tx(&self, hash: &Hash) -> Result<TxView, Error> {
		let (tx, height) = self.storage.get_tx_via_hash(hash)?;
		Ok(TxView::from_tx(tx, Some(height)))
	}

	pub fn query_account(&self, id: Id) -> Result<AccountView, Error> {
		let balance = self.storage.get_balance_via_id(&id)?;
		Ok(AccountView { id, balance })
	}

	pub fn query_block_by_height(&self, height: u64) -> Result<BlockView, Error> {
		let (block, hash) = self.storage.get_block_via_height(height)?;
		Ok(BlockView::from_block(block, hash))
	}

	pub fn query_block_by_hash(&self, hash: &Hash) -> Result<BlockView, Error> {
		let (block, _height) = self.storage.get_block_via_hash(hash)?;
		Ok(BlockView::from_block(block, *hash))
	}

	pub async fn query_latest_block(&self) -> Result<BlockView, Error> {
		let height = self.chain.latest_block_height().await;
		self.query_block_by_height(height)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use ecoin_crypto::{PrivateKey, Role};

	fn worker_account() -> Account {
		Account::from_private_key(Role::Hospital, PrivateKey::generate())
	}

	fn observer_account() -> Account {
		Account::from_private_key(Role::Patient, PrivateKey::generate())
	}

	#[tokio::test]
	async fn worker_node_starts_pot_engine() {
		let node = Node::new(NodeConfig::default(), worker_account()).await.unwrap();
		assert!(node.pot.is_some());
	}

	#[tokio::test]
	async fn observer_node_has_no_pot_engine() {
		let node = Node::new(NodeConfig::default(), observer_account()).await.unwrap();
		assert!(node.pot.is_none());
	}

	#[tokio::test]
	async fn query_latest_block_returns_genesis_at_startup() {
		let node = Node::new(NodeConfig::default(), worker_account()).await.unwrap();
		let latest = node.query_latest_block().await.unwrap();
		assert_eq!(latest.header.height, 1);
	}

	#[tokio::test]
	async fn build_tx_inserts_into_pool() {
		let node = Node::new(NodeConfig::default(), worker_account()).await.unwrap();
		let to = worker_account().id();
		let view = node
			.build_tx(TxType::General, to, 1, vec![], ecoin_crypto::ZERO_HASH, String::new())
			.await
			.unwrap();
		assert_eq!(view.height, None);
		assert_eq!(node.pool.size(), 1);
	}

	#[tokio::test]
	async fn query_account_defaults_to_zero_balance() {
		let node = Node::new(NodeConfig::default(), worker_account()).await.unwrap();
		let view = node.query_account(observer_account().id()).unwrap();
		assert_eq!(view.balance, 0);
	}
}
