//! Broadcast dedup: remembers recently relayed frames by digest so a
//! flooded broadcast is re-relayed at most once per node. Not present as
//! a named type in the retrieved Go source (gossip dedup there is folded
//! into each protocol handler); the sliding-window-of-digests shape is
//! the common idiom other_examples/ gossip layers use for the same
//! problem, adapted here to the frame hash this codebase already has on
//! hand (`ecoin_crypto::Hash`).

use ecoin_crypto::Hash;
use ecoin_util::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// How long a digest is remembered before it may be relayed again.
pub const SEEN_TTL: Duration = Duration::from_secs(3600);

pub struct SeenFilter {
	seen: RwLock<HashMap<Hash, Instant>>,
}

impl SeenFilter {
	pub fn new() -> SeenFilter {
		SeenFilter {
			seen: RwLock::new(HashMap::new()),
		}
	}

	/// Returns `true` the first time `frame` is seen (caller should
	/// relay it); `false` on every subsequent call within `SEEN_TTL`.
	pub fn check_and_insert(&self, frame: &[u8]) -> bool {
		let digest = Hash::digest(frame);
		let mut seen = self.seen.write();
		if let Some(at) = seen.get(&digest) {
			if at.elapsed() < SEEN_TTL {
				return false;
			}
		}
		seen.insert(digest, Instant::now());
		true
	}

	/// Drop entries older than `SEEN_TTL`; call periodically so the map
	/// doesn't grow unbounded.
	pub fn sweep(&self) {
		let mut seen = self.seen.write();
		seen.retain(|_, at| at.elapsed() < SEEN_TTL);
	}
}

impl Default for SeenFilter {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn first_sight_relays_repeat_does_not() {
		let filter = SeenFilter::new();
		assert!(filter.check_and_insert(b"frame-a"));
		assert!(!filter.check_and_insert(b"frame-a"));
		assert!(filter.check_and_insert(b"frame-b"));
	}

	#[test]
	fn sweep_removes_nothing_within_ttl() {
		let filter = SeenFilter::new();
		filter.check_and_insert(b"frame-a");
		filter.sweep();
		assert!(!filter.check_and_insert(b"frame-a"));
	}
}
