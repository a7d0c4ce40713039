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

//! The P2P node: TCP connection management, session handshake, and UDP
//! peer discovery tied together the way `p2p/node.go` ties its
//! `TCPServer`/`connManager`/`negotiator`/`Protocol` pieces together.

pub mod discovery;
pub mod error;
pub mod handshake;
pub mod seen_filter;
pub mod transport;

#[macro_use]
extern crate failure_derive;

pub use error::Error;

use discovery::{Peer as DiscoveredPeer, PeerTable};
use ecoin_crypto::{Account, Id};
use ecoin_proto::message::ProtocolId;
use ecoin_proto::{DiscoveryBody, DiscoveryMessage};
use ecoin_util::bounds;
use handshake::{HandshakeRequest, HandshakeResponse, SessionCodec};
use seen_filter::SeenFilter;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, RwLock};
use transport::{InboundFrame, TcpConn, TcpListener};

/// Peers that refuse the handshake are blocked from being retried for
/// this long, swept every minute. Ported from `node.go`'s
/// `cleanNgBlackList`.
pub const NEGOTIATE_BLACKLIST_DURATION: Duration = Duration::from_secs(30 * 60);
const GET_PEERS_TO_CONNECT_INTERVAL: Duration = Duration::from_secs(10);
const STATUS_REPORT_INTERVAL: Duration = Duration::from_secs(15);
const BLACKLIST_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const PING_INTERVAL: Duration = discovery::PING_INTERVAL;
const GET_NEIGHBOURS_INTERVAL: Duration = discovery::GET_NEIGHBOUR_INTERVAL;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct P2pConfig {
	pub listen_addr: SocketAddr,
	pub udp_addr: SocketAddr,
	pub chain_id: u8,
	pub max_peers: usize,
	pub code_version: u16,
	pub min_code_version: u16,
}

/// A P2P network node: accepts/dials TCP connections, negotiates a
/// session with each, and demultiplexes decrypted frames to whichever
/// protocol registered for their `ProtocolId`.
pub struct P2pNode {
	config: P2pConfig,
	account: Account,
	conns: RwLock<HashMap<Id, TcpConn>>,
	ng_blacklist: RwLock<HashMap<Id, Instant>>,
	peer_table: Arc<PeerTable>,
	seen: SeenFilter,
	protocols: RwLock<HashMap<u8, mpsc::Sender<(Id, Vec<u8>)>>>,
	connect_task_tx: mpsc::Sender<DiscoveredPeer>,
	connect_task_rx: Mutex<Option<mpsc::Receiver<DiscoveredPeer>>>,
	recv_tx: mpsc::Sender<InboundFrame>,
	recv_rx: Mutex<Option<mpsc::Receiver<InboundFrame>>>,
	udp_socket: Mutex<Option<Arc<tokio::net::UdpSocket>>>,
	stopping: AtomicBool,
}

impl P2pNode {
	pub fn new(config: P2pConfig, account: Account) -> Arc<P2pNode> {
		let self_id = account.id();
		let (connect_task_tx, connect_task_rx) = mpsc::channel(config.max_peers.max(1));
		let (recv_tx, recv_rx) = mpsc::channel(bounds::PROTOCOL_DEMUX);
		Arc::new(P2pNode {
			config,
			account,
			conns: RwLock::new(HashMap::new()),
			ng_blacklist: RwLock::new(HashMap::new()),
			peer_table: Arc::new(PeerTable::new(self_id)),
			seen: SeenFilter::new(),
			protocols: RwLock::new(HashMap::new()),
			connect_task_tx,
			connect_task_rx: Mutex::new(Some(connect_task_rx)),
			recv_tx,
			recv_rx: Mutex::new(Some(recv_rx)),
			udp_socket: Mutex::new(None),
			stopping: AtomicBool::new(false),
		})
	}

	/// Seed the discovery table with hardcoded bootstrap peers, never
	/// evicted by credit loss the way a learned peer would be.
	pub fn add_seeds(&self, seeds: Vec<DiscoveredPeer>) {
		self.peer_table.add_peers(seeds, true);
	}

	/// Register a protocol (handshake's id `0` is reserved); returns the
	/// channel of `(sender, plaintext payload)` pairs addressed to it.
	pub async fn add_protocol(&self, protocol_id: ProtocolId) -> mpsc::Receiver<(Id, Vec<u8>)> {
		let (tx, rx) = mpsc::channel(bounds::PROTOCOL_DEMUX);
		self.protocols.write().await.insert(protocol_id.as_u8(), tx);
		rx
	}

	/// Send to a single peer, or broadcast to every connected peer if
	/// `to` is `None`.
	pub async fn send(&self, protocol_id: ProtocolId, to: Option<Id>, payload: Vec<u8>) -> Result<(), Error> {
		let conns = self.conns.read().await;
		if conns.is_empty() {
			return Err(Error::NoPeers);
		}
		match to {
			Some(id) => {
				let conn = conns.get(&id).ok_or(Error::NoPeers)?;
				conn.send(protocol_id, payload);
			}
			None => {
				for conn in conns.values() {
					conn.send(protocol_id, payload.clone());
				}
			}
		}
		Ok(())
	}

	/// Broadcasts only if this exact frame has not been relayed recently
	/// (gossip dedup, see [`SeenFilter`]).
	pub async fn broadcast_once(&self, protocol_id: ProtocolId, payload: Vec<u8>) -> Result<(), Error> {
		if !self.seen.check_and_insert(&payload) {
			return Ok(());
		}
		self.send(protocol_id, None, payload).await
	}

	pub async fn peer_count(&self) -> usize {
		self.conns.read().await.len()
	}

	/// Ids of every peer currently connected, for callers (e.g. the sync
	/// protocol) that need to pick a target rather than broadcast.
	pub async fn connected_peers(&self) -> Vec<Id> {
		self.conns.read().await.keys().copied().collect()
	}

	/// Drive the node until `shutdown` fires: TCP accept/dial loop, the
	/// discovery ping/neighbours loop, and maintenance tickers. Mirrors
	/// `node.loop()`.
	pub async fn run(self: Arc<Self>, shutdown: ecoin_util::Shutdown) {
		shutdown.add();

		let listener = match TcpListener::bind(self.config.listen_addr, shutdown.clone()).await {
			Ok(l) => l,
			Err(e) => {
				log::error!("p2p: failed to bind TCP listener: {}", e);
				shutdown.done();
				return;
			}
		};
		log::info!("p2p: listening on {}", listener.local_addr());

		let (udp_in_tx, mut udp_in_rx) = mpsc::channel(bounds::UDP_RECV);
		match transport::spawn_udp(self.config.udp_addr, udp_in_tx, shutdown.clone()).await {
			Ok(socket) => {
				*self.udp_socket.lock().await = Some(socket);
			}
			Err(e) => log::warn!("p2p: failed to bind UDP discovery socket: {}", e),
		};

		let mut recv_rx = self.recv_rx.lock().await.take().expect("run() called more than once");
		let mut connect_rx = self
			.connect_task_rx
			.lock()
			.await
			.take()
			.expect("run() called more than once");

		let mut connect_ticker = tokio::time::interval(GET_PEERS_TO_CONNECT_INTERVAL);
		let mut status_ticker = tokio::time::interval(STATUS_REPORT_INTERVAL);
		let mut blacklist_ticker = tokio::time::interval(BLACKLIST_SWEEP_INTERVAL);
		let mut ping_ticker = tokio::time::interval(PING_INTERVAL);
		let mut neighbours_ticker = tokio::time::interval(GET_NEIGHBOURS_INTERVAL);
		let mut ban_refresh_ticker = tokio::time::interval(BLACKLIST_SWEEP_INTERVAL);

		loop {
			tokio::select! {
				_ = shutdown.cancelled() => break,
				_ = connect_ticker.tick() => self.get_peers_to_connect().await,
				_ = status_ticker.tick() => self.status_report().await,
				_ = blacklist_ticker.tick() => self.clean_ng_blacklist().await,
				_ = ban_refresh_ticker.tick() => self.peer_table.refresh(),
				_ = ping_ticker.tick() => self.ping_due_peers().await,
				_ = neighbours_ticker.tick() => self.get_neighbours_from_due_peers().await,
				Some(peer) = connect_rx.recv() => {
					let this = self.clone();
					tokio::spawn(async move { this.setup_conn(peer).await; });
				}
				Some(stream) = listener.accept() => {
					let this = self.clone();
					tokio::spawn(async move { this.recv_conn(stream).await; });
				}
				Some(frame) = recv_rx.recv() => self.dispatch(frame).await,
				Some((from, msg)) = udp_in_rx.recv() => self.handle_discovery(from, msg).await,
			}
		}

		self.stopping.store(true, Ordering::SeqCst);
		shutdown.done();
	}

	async fn get_peers_to_connect(&self) {
		let have = self.peer_count().await;
		if have >= self.config.max_peers {
			return;
		}
		let exclude = self.exclude_set().await;
		let want = self.config.max_peers - have;
		for peer in self.peer_table.get_peers(want, &exclude) {
			let _ = self.connect_task_tx.try_send(peer);
		}
	}

	async fn exclude_set(&self) -> HashSet<Id> {
		let mut result: HashSet<Id> = self.ng_blacklist.read().await.keys().copied().collect();
		result.extend(self.conns.read().await.keys().copied());
		result
	}

	async fn status_report(&self) {
		log::info!("p2p: {} peers connected", self.peer_count().await);
	}

	async fn clean_ng_blacklist(&self) {
		let mut bl = self.ng_blacklist.write().await;
		bl.retain(|_, at| at.elapsed() < NEGOTIATE_BLACKLIST_DURATION);
	}

	async fn ping_due_peers(&self) {
		let Some(socket) = self.udp_socket.lock().await.clone() else { return };
		for peer in self.peer_table.get_peers_to_ping() {
			self.peer_table.mark_ping_sent(&peer.id);
			let msg = discovery::ping(self.account.id(), ecoin_util::time::now_secs());
			if let Err(e) = transport::send_udp(&socket, peer.addr, &msg).await {
				log::warn!("ping {} failed: {}", peer.addr, e);
			}
		}
	}

	async fn get_neighbours_from_due_peers(&self) {
		let Some(socket) = self.udp_socket.lock().await.clone() else { return };
		for peer in self.peer_table.get_peers_to_get_neighbours() {
			self.peer_table.mark_got_neighbours(&peer.id);
			let msg = discovery::get_neighbours(self.account.id(), ecoin_util::time::now_secs());
			if let Err(e) = transport::send_udp(&socket, peer.addr, &msg).await {
				log::warn!("get_neighbours {} failed: {}", peer.addr, e);
			}
		}
	}

	async fn handle_discovery(&self, from: SocketAddr, msg: DiscoveryMessage) {
		let now = ecoin_util::time::now_secs();
		if msg.is_stale(now) {
			return;
		}
		let Some(socket) = self.udp_socket.lock().await.clone() else { return };
		match msg.body {
			DiscoveryBody::Ping { id } => {
				self.peer_table.add_peers(vec![DiscoveredPeer { id, addr: from }], false);
				let reply = discovery::pong(self.account.id(), now);
				let _ = transport::send_udp(&socket, from, &reply).await;
			}
			DiscoveryBody::Pong { id } => self.peer_table.recv_pong(&id),
			DiscoveryBody::GetNeighbours { id: _ } => {
				let exclude = HashSet::new();
				let peers = self.peer_table.get_peers(16, &exclude);
				let reply = discovery::neighbours(&peers, now);
				let _ = transport::send_udp(&socket, from, &reply).await;
			}
			DiscoveryBody::Neighbours { neighbours } => {
				let peers = neighbours
					.into_iter()
					.map(|n| DiscoveredPeer { id: n.id, addr: n.addr })
					.collect();
				self.peer_table.add_peers(peers, false);
			}
		}
	}

	/// Dial a peer and negotiate a session. Per `node.setupConn`: if our
	/// id sorts after theirs, sleep 10s first so the lower-id side acts
	/// as the client when both sides race to dial each other.
	async fn setup_conn(self: Arc<Self>, peer: DiscoveredPeer) {
		if self.account.id().as_bytes() > peer.id.as_bytes() {
			tokio::time::sleep(Duration::from_secs(10)).await;
		}
		if self.conns.read().await.contains_key(&peer.id) {
			return;
		}

		let stream = match transport::dial(peer.addr).await {
			Ok(s) => s,
			Err(e) => {
				log::warn!("p2p: dial {} failed: {}", peer.addr, e);
				return;
			}
		};

		match self.handshake_to(stream, peer.addr, peer.id).await {
			Ok((stream, codec)) => self.add_conn(peer.id, peer.addr, stream, codec).await,
			Err(e) => {
				log::warn!("p2p: handshake to {:?} failed: {}", peer.id, e);
				self.ng_blacklist.write().await.insert(peer.id, Instant::now());
			}
		}
	}

	async fn recv_conn(self: Arc<Self>, mut stream: TcpStream) {
		let remote_addr = match stream.peer_addr() {
			Ok(a) => a,
			Err(_) => return,
		};
		let accept = self.peer_count().await < self.config.max_peers;
		match self.recv_handshake(&mut stream, accept).await {
			Ok(Some((peer_id, codec))) => self.add_conn(peer_id, remote_addr, stream, codec).await,
			Ok(None) => {}
			Err(e) => log::warn!("p2p: inbound handshake from {} failed: {}", remote_addr, e),
		}
	}

	async fn add_conn(&self, peer_id: Id, remote_addr: SocketAddr, stream: TcpStream, codec: SessionCodec) {
		let mut conns = self.conns.write().await;
		if conns.contains_key(&peer_id) || conns.len() >= self.config.max_peers {
			return;
		}
		let recv_tx = self.recv_tx.clone();
		let table = self.peer_table.clone();
		let conn = TcpConn::spawn(stream, peer_id, remote_addr, Arc::new(codec), recv_tx, move |id| {
			table.record_bad(&id);
		});
		log::info!("p2p: connected to {:?} ({})", peer_id, remote_addr);
		conns.insert(peer_id, conn);
	}

	async fn handshake_to(
		&self,
		mut stream: TcpStream,
		_remote_addr: SocketAddr,
		remote_id: Id,
	) -> Result<(TcpStream, SessionCodec), Error> {
		let session_key = ecoin_crypto::PrivateKey::generate();
		let req = HandshakeRequest::new_signed(
			self.config.chain_id,
			self.config.code_version,
			self.account.role,
			self.account.id(),
			session_key.public_key().serialize_compressed(),
			|h| self.account.sign(h),
		);
		let payload = handshake::encode_request(&req)?;
		write_handshake_frame(&mut stream, &payload).await?;

		let resp_bytes = tokio::time::timeout(HANDSHAKE_TIMEOUT, read_handshake_frame(&mut stream))
			.await
			.map_err(|_| Error::HandshakeTimeout)??;
		let resp = handshake::decode_response(&resp_bytes)?;

		if let Some(reason) = handshake::whether_reject_resp(
			&resp,
			&remote_id,
			self.account.role,
			self.config.min_code_version,
		) {
			return Err(Error::HandshakeRejected(reason));
		}

		let peer_session_key = resp.session_public_key()?;
		let codec = SessionCodec::derive(&peer_session_key, &session_key);
		Ok((stream, codec))
	}

	async fn recv_handshake(
		&self,
		stream: &mut TcpStream,
		accept: bool,
	) -> Result<Option<(Id, SessionCodec)>, Error> {
		let req_bytes = tokio::time::timeout(HANDSHAKE_TIMEOUT, read_handshake_frame(stream))
			.await
			.map_err(|_| Error::HandshakeTimeout)??;
		let req = handshake::decode_request(&req_bytes)?;
		if !req.verify() {
			return Err(Error::HandshakeRejected("bad signature"));
		}
		let peer_session_key = req.session_public_key()?;

		if !accept {
			let reject = HandshakeResponse::new_reject(|h| self.account.sign(h));
			let payload = handshake::encode_response(&reject)?;
			write_handshake_frame(stream, &payload).await?;
			return Ok(None);
		}

		if let Some(reason) = handshake::whether_reject_req(
			&req,
			self.config.chain_id,
			self.account.role,
			self.config.min_code_version,
		) {
			let reject = HandshakeResponse::new_reject(|h| self.account.sign(h));
			let payload = handshake::encode_response(&reject)?;
			write_handshake_frame(stream, &payload).await?;
			return Err(Error::HandshakeRejected(reason));
		}

		let session_key = ecoin_crypto::PrivateKey::generate();
		let accept_resp = HandshakeResponse::new_accept(
			self.config.code_version,
			self.account.role,
			session_key.public_key().serialize_compressed(),
			|h| self.account.sign(h),
		);
		let payload = handshake::encode_response(&accept_resp)?;
		write_handshake_frame(stream, &payload).await?;

		let codec = SessionCodec::derive(&peer_session_key, &session_key);
		Ok(Some((req.from, codec)))
	}

	async fn dispatch(&self, frame: InboundFrame) {
		let protocols = self.protocols.read().await;
		if let Some(tx) = protocols.get(&frame.protocol_id.as_u8()) {
			if tx.try_send((frame.peer, frame.payload)).is_err() {
				log::warn!("protocol {:?} recv queue full, dropping frame", frame.protocol_id);
			}
		}
	}
}

/// Handshake packets are framed the same way as any other protocol
/// message (`length|crc32|protocol_id|payload`) but carry their payload
/// in the clear, since no session key exists yet.
async fn write_handshake_frame(stream: &mut TcpStream, payload: &[u8]) -> Result<(), Error> {
	let frame = ecoin_proto::build_frame(ProtocolId::Handshake, payload);
	stream.write_all(&frame).await?;
	Ok(())
}

async fn read_handshake_frame(stream: &mut TcpStream) -> Result<Vec<u8>, Error> {
	let mut header = [0u8; ecoin_proto::FRAME_HEADER_LEN];
	stream.read_exact(&mut header).await?;
	let (length, checksum) = ecoin_proto::parse_frame_header(&header)?;
	let mut body = vec![0u8; length as usize];
	stream.read_exact(&mut body).await?;
	let frame = ecoin_proto::parse_frame_body(length, checksum, &body)?;
	Ok(frame.payload)
}
