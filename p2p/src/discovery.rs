//! Peer discovery: a table of known peers with delay (ping/pong) and
//! credit (honesty) state, driven by periodic ping/get-neighbours ticks
//! over UDP. Grounded on `p2p/peer/{peerstate,table}.go` — the constants
//! below are ported directly from `peerstate.go`, and the seed/peers/
//! banned/expired partition mirrors `tableImp`'s four maps (a peer moves
//! between them rather than living in one table with a status field, so
//! "get me peers to ping" and "get me connectable peers" stay cheap).

use ecoin_crypto::Id;
use ecoin_proto::{DiscoveryBody, DiscoveryMessage, NeighbourInfo};
use ecoin_util::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A peer is considered unreachable if no pong has landed within this
/// long since the last successful ping.
pub const PEER_EXPIRED: Duration = Duration::from_secs(35);
/// How often to ask a peer for its neighbours.
pub const GET_NEIGHBOUR_INTERVAL: Duration = Duration::from_secs(15);
/// How often to ping a peer to refresh its delay/reachability state.
pub const PING_INTERVAL: Duration = Duration::from_secs(10);
/// Starting credit for a newly learned peer.
pub const INIT_CREDIT: i32 = 10;
/// First ban lasts this long; the nth ban lasts `DEFAULT_BAN_DURATION *
/// BAN_BASE^(n-1)`.
pub const DEFAULT_BAN_DURATION: Duration = Duration::from_secs(24 * 3600);
pub const BAN_BASE: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Peer {
	pub id: Id,
	pub addr: SocketAddr,
}

struct DelayState {
	ping_start: Option<Instant>,
	last_ping_ok: Option<Instant>,
}

struct CreditState {
	credit: i32,
	dishonest: bool,
	banned_num: u32,
	unban_at: Option<Instant>,
}

struct PeerState {
	peer: Peer,
	is_seed: bool,
	last_get_neighbours: Option<Instant>,
	delay: DelayState,
	credit: CreditState,
}

impl PeerState {
	fn new(peer: Peer, is_seed: bool) -> PeerState {
		PeerState {
			peer,
			is_seed,
			last_get_neighbours: None,
			delay: DelayState {
				ping_start: None,
				last_ping_ok: None,
			},
			credit: CreditState {
				credit: INIT_CREDIT,
				dishonest: false,
				banned_num: 0,
				unban_at: None,
			},
		}
	}

	fn is_reachable(&self) -> bool {
		match self.delay.last_ping_ok {
			Some(t) => t.elapsed() < PEER_EXPIRED,
			None => false,
		}
	}

	fn is_available(&self) -> bool {
		self.is_reachable() && !self.credit.dishonest
	}

	fn is_time_to_ping(&self) -> bool {
		match self.delay.ping_start {
			Some(t) => t.elapsed() >= PING_INTERVAL,
			None => true,
		}
	}

	fn is_time_to_get_neighbours(&self) -> bool {
		match self.last_get_neighbours {
			Some(t) => t.elapsed() >= GET_NEIGHBOUR_INTERVAL,
			None => true,
		}
	}
}

struct Tables {
	peers: HashMap<Id, PeerState>,
	banned: HashMap<Id, PeerState>,
}

/// Notified whenever a peer's credit hits zero and it gets banned. Nothing
/// in this crate supplies one yet — the dishonesty-tracking mechanism
/// exists independently of whatever policy eventually decides to call
/// `record_bad`, matching the original's `creditState` being a standalone
/// bookkeeping concern from whoever drives it.
pub trait MisbehaviorReporter: Send + Sync {
	fn report(&self, id: &Id, banned_num: u32);
}

/// A node's view of the rest of the network: who to dial, who to ping,
/// who to avoid. All mutation goes through one `RwLock`, matching
/// `tableImp`'s single `sync.RWMutex` over its four maps.
pub struct PeerTable {
	self_id: Id,
	tables: RwLock<Tables>,
	reporter: Option<Arc<dyn MisbehaviorReporter>>,
}

impl PeerTable {
	pub fn new(self_id: Id) -> PeerTable {
		PeerTable {
			self_id,
			tables: RwLock::new(Tables {
				peers: HashMap::new(),
				banned: HashMap::new(),
			}),
			reporter: None,
		}
	}

	/// Attach a callback invoked every time a peer is banned for
	/// exhausting its credit.
	pub fn with_reporter(mut self, reporter: Arc<dyn MisbehaviorReporter>) -> PeerTable {
		self.reporter = Some(reporter);
		self
	}

	/// Add (or refresh) peers learned from a seed list or a neighbours
	/// reply. Seeds are never evicted by `refresh`.
	pub fn add_peers(&self, peers: Vec<Peer>, is_seed: bool) {
		let mut t = self.tables.write();
		for p in peers {
			if p.id == self.self_id {
				continue;
			}
			t.peers.entry(p.id).or_insert_with(|| PeerState::new(p, is_seed));
		}
	}

	pub fn exists(&self, id: &Id) -> bool {
		let t = self.tables.read();
		t.peers.contains_key(id) || t.banned.contains_key(id)
	}

	/// Up to `expect` available, non-excluded peers to dial.
	pub fn get_peers(&self, expect: usize, exclude: &std::collections::HashSet<Id>) -> Vec<Peer> {
		let t = self.tables.read();
		t.peers
			.values()
			.filter(|ps| !exclude.contains(&ps.peer.id) && ps.is_available())
			.take(expect)
			.map(|ps| ps.peer)
			.collect()
	}

	pub fn get_peers_to_ping(&self) -> Vec<Peer> {
		let t = self.tables.read();
		t.peers
			.values()
			.filter(|ps| ps.is_time_to_ping())
			.map(|ps| ps.peer)
			.collect()
	}

	pub fn get_peers_to_get_neighbours(&self) -> Vec<Peer> {
		let t = self.tables.read();
		t.peers
			.values()
			.filter(|ps| ps.is_available() && ps.is_time_to_get_neighbours())
			.map(|ps| ps.peer)
			.collect()
	}

	pub fn mark_ping_sent(&self, id: &Id) {
		let mut t = self.tables.write();
		if let Some(ps) = t.peers.get_mut(id) {
			ps.delay.ping_start = Some(Instant::now());
		}
	}

	pub fn recv_pong(&self, id: &Id) {
		let mut t = self.tables.write();
		if let Some(ps) = t.peers.get_mut(id) {
			ps.delay.last_ping_ok = Some(Instant::now());
		}
	}

	pub fn mark_got_neighbours(&self, id: &Id) {
		let mut t = self.tables.write();
		if let Some(ps) = t.peers.get_mut(id) {
			ps.last_get_neighbours = Some(Instant::now());
		}
	}

	/// Record a bad interaction. Credit hits zero -> peer is marked
	/// dishonest and moved into the banned table with an exponentially
	/// growing ban duration, mirroring `state.turnBanned`.
	pub fn record_bad(&self, id: &Id) {
		let mut t = self.tables.write();
		let Some(ps) = t.peers.get_mut(id) else { return };
		ps.credit.credit -= 1;
		if ps.credit.credit <= 0 {
			ps.credit.dishonest = true;
			ps.credit.banned_num += 1;
			let duration = DEFAULT_BAN_DURATION * BAN_BASE.pow(ps.credit.banned_num - 1);
			ps.credit.unban_at = Some(Instant::now() + duration);
			let banned_num = ps.credit.banned_num;
			let banned = t.peers.remove(id).expect("just looked up");
			t.banned.insert(*id, banned);
			drop(t);
			if let Some(reporter) = &self.reporter {
				reporter.report(id, banned_num);
			}
		}
	}

	/// Restore credit after a good interaction.
	pub fn record_good(&self, id: &Id) {
		let mut t = self.tables.write();
		if let Some(ps) = t.peers.get_mut(id) {
			ps.credit.credit += 1;
		}
	}

	pub fn is_banned(&self, id: &Id) -> bool {
		self.tables.read().banned.contains_key(id)
	}

	/// Move any banned peer whose ban has expired back into the normal
	/// table with fresh delay/credit state, mirroring
	/// `state.recoverFromBanned`.
	pub fn refresh(&self) {
		let mut t = self.tables.write();
		let now = Instant::now();
		let expired: Vec<Id> = t
			.banned
			.iter()
			.filter(|(_, ps)| ps.credit.unban_at.map(|u| now >= u).unwrap_or(false))
			.map(|(id, _)| *id)
			.collect();
		for id in expired {
			let mut ps = t.banned.remove(&id).expect("just filtered");
			ps.credit.dishonest = false;
			ps.credit.credit = INIT_CREDIT;
			ps.delay.last_ping_ok = Some(now);
			t.peers.insert(id, ps);
		}
	}
}

impl From<&Peer> for NeighbourInfo {
	fn from(p: &Peer) -> NeighbourInfo {
		NeighbourInfo { id: p.id, addr: p.addr }
	}
}

/// Build the ping datagram for `self_id`.
pub fn ping(self_id: Id, now: i64) -> DiscoveryMessage {
	DiscoveryMessage::new(DiscoveryBody::Ping { id: self_id }, now)
}

pub fn pong(self_id: Id, now: i64) -> DiscoveryMessage {
	DiscoveryMessage::new(DiscoveryBody::Pong { id: self_id }, now)
}

pub fn get_neighbours(self_id: Id, now: i64) -> DiscoveryMessage {
	DiscoveryMessage::new(DiscoveryBody::GetNeighbours { id: self_id }, now)
}

pub fn neighbours(peers: &[Peer], now: i64) -> DiscoveryMessage {
	DiscoveryMessage::new(
		DiscoveryBody::Neighbours {
			neighbours: peers.iter().map(NeighbourInfo::from).collect(),
		},
		now,
	)
}

#[cfg(test)]
mod tests {
	use super::*;
	use ecoin_crypto::{Account, PrivateKey, Role};

	fn peer() -> Peer {
		let acc = Account::from_private_key(Role::Hospital, PrivateKey::generate());
		Peer {
			id: acc.id(),
			addr: "127.0.0.1:9000".parse().unwrap(),
		}
	}

	#[test]
	fn added_peer_is_not_available_until_pong() {
		let table = PeerTable::new(Id::ZERO);
		let p = peer();
		table.add_peers(vec![p], false);
		let exclude = Default::default();
		assert!(table.get_peers(10, &exclude).is_empty());

		table.recv_pong(&p.id);
		assert_eq!(table.get_peers(10, &exclude).len(), 1);
	}

	#[test]
	fn credit_exhaustion_bans_peer() {
		let table = PeerTable::new(Id::ZERO);
		let p = peer();
		table.add_peers(vec![p], false);
		for _ in 0..INIT_CREDIT {
			table.record_bad(&p.id);
		}
		assert!(table.is_banned(&p.id));
		assert!(!table.exists(&p.id) || table.is_banned(&p.id));
	}

	#[test]
	fn self_id_is_never_added() {
		let acc = Account::from_private_key(Role::Researcher, PrivateKey::generate());
		let table = PeerTable::new(acc.id());
		table.add_peers(
			vec![Peer {
				id: acc.id(),
				addr: "127.0.0.1:1".parse().unwrap(),
			}],
			false,
		);
		assert!(!table.exists(&acc.id()));
	}
}
