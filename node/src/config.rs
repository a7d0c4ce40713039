//! Node configuration: listen addresses, peer limits, chain parameters
//! and the genesis block, in the shape the excluded CLI/JSON-file
//! collaborator is expected to populate before calling [`crate::Node::new`]
//! (SPEC_FULL §6).

use crate::error::Error;
use ecoin_crypto::Id;
use ecoin_proto::Block;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// A bootstrap peer: the excluded config loader resolves these from a
/// seed list (`id@host:port` strings or similar); this crate only needs
/// the parsed form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedPeer {
	pub id: Id,
	pub addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
	/// TCP address this node listens on for peer connections.
	pub listen_addr: SocketAddr,
	/// UDP address this node listens on for discovery datagrams.
	pub udp_addr: SocketAddr,
	/// Upper bound on simultaneous peer connections.
	pub max_peers: usize,
	/// Bootstrap peers added to the discovery table at startup.
	pub seeds: Vec<SeedPeer>,
	/// Identifies which permissioned network this node will talk to;
	/// peers on a different chain are rejected during handshake.
	pub chain_id: u8,
	/// This build's protocol version, and the oldest version it accepts
	/// from a peer.
	pub code_version: u16,
	pub min_code_version: u16,
	/// Target time between blocks; the PoT engine schedules its
	/// Compete/Collect/Judge phases off half this value.
	pub block_interval: Duration,
	/// Hex-encoded, serialized genesis block, used only the first time
	/// storage is opened empty.
	pub genesis_hex: String,
	/// Where to open the sled database; `None` opens a temporary,
	/// non-durable store (local runs and tests).
	pub storage_path: Option<PathBuf>,
}

impl NodeConfig {
	/// Decode [`NodeConfig::genesis_hex`] into a [`Block`].
	pub fn genesis_block(&self) -> Result<Block, Error> {
		let bytes = ecoin_util::hex::from_hex(&self.genesis_hex)?;
		Ok(ecoin_proto::deserialize(&bytes)?)
	}

	/// Structural sanity checks beyond what the type system already
	/// guarantees. Anything that can only be checked against the parsed
	/// genesis block is left to [`crate::Node::new`], since decoding it
	/// here would duplicate work done again at startup.
	pub fn validate(&self) -> Result<(), Error> {
		if self.max_peers == 0 {
			return Err(Error::InvalidConfig("max_peers must be at least 1".into()));
		}
		if self.block_interval.is_zero() {
			return Err(Error::InvalidConfig("block_interval must be nonzero".into()));
		}
		if self.min_code_version > self.code_version {
			return Err(Error::InvalidConfig(
				"min_code_version must not exceed code_version".into(),
			));
		}
		if self.genesis_hex.is_empty() {
			return Err(Error::InvalidConfig("genesis_hex must not be empty".into()));
		}
		Ok(())
	}
}

impl Default for NodeConfig {
	/// A single-node local configuration: listens on loopback, no seeds,
	/// and a freshly minted empty genesis a few seconds in the past so it
	/// validates immediately. Intended for local runs and tests, not
	/// production deployment.
	fn default() -> NodeConfig {
		let genesis = Block::genesis(ecoin_util::time::now_secs() - 10, vec![]);
		let genesis_bytes = ecoin_proto::serialize(&genesis).expect("genesis always serializes");
		NodeConfig {
			listen_addr: "127.0.0.1:9000".parse().unwrap(),
			udp_addr: "127.0.0.1:9001".parse().unwrap(),
			max_peers: 32,
			seeds: Vec::new(),
			chain_id: 1,
			code_version: 1,
			min_code_version: 1,
			block_interval: Duration::from_secs(10),
			genesis_hex: ecoin_util::hex::to_hex(&genesis_bytes),
			storage_path: None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_config_validates_and_decodes_genesis() {
		let config = NodeConfig::default();
		config.validate().unwrap();
		let genesis = config.genesis_block().unwrap();
		assert!(genesis.is_genesis());
	}

	#[test]
	fn rejects_inverted_code_versions() {
		let mut config = NodeConfig::default();
		config.min_code_version = config.code_version + 1;
		assert!(config.validate().is_err());
	}

	#[test]
	fn rejects_zero_max_peers() {
		let mut config = NodeConfig::default();
		config.max_peers = 0;
		assert!(config.validate().is_err());
	}
}
