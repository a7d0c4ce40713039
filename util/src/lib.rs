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

//! Shared helpers used by every ecoin component: logging bootstrap, a
//! cooperative shutdown signal, hex encoding, and current-time helpers.

#[macro_use]
extern crate failure_derive;

pub mod hex;
pub mod logging;
pub mod shutdown;
pub mod time;

pub use parking_lot::{Mutex, RwLock};
pub use shutdown::Shutdown;

/// Re-exported so downstream crates depend on one `log` version.
pub use log;

/// A bounded channel capacity used at a network or pipeline boundary.
/// Kept as named constants so the numbers in the design are visible at the
/// call site rather than scattered magic literals.
pub mod bounds {
	/// Pending (unvalidated) blocks queued into the chain manager.
	pub const PENDING_BLOCKS: usize = 16;
	/// Outbound tx broadcast queue.
	pub const TX_BROADCAST_OUT: usize = 1024;
	/// Inbound raw (unsigned) tx queue.
	pub const RAW_TX_IN: usize = 1024;
	/// Per-connection TCP receive queue.
	pub const TCP_RECV: usize = 1024;
	/// Per-connection TCP send queue.
	pub const TCP_SEND: usize = 1024;
	/// UDP receive queue.
	pub const UDP_RECV: usize = 1024;
	/// Per-protocol demultiplex queue.
	pub const PROTOCOL_DEMUX: usize = 2048;
	/// Inbound TCP connection accept queue.
	pub const CONN_ACCEPT: usize = 128;
	/// Pending transaction pool capacity.
	pub const TX_POOL: usize = 1024;
	/// Locally mined blocks awaiting broadcast, between the PoT engine and
	/// the node's relay task.
	pub const BLOCK_BROADCAST_OUT: usize = 16;
	/// PoT proofs awaiting broadcast, between the PoT engine and the
	/// node's relay task.
	pub const PROOF_BROADCAST_OUT: usize = 256;
	/// Proofs relayed in from peers, queued for the PoT engine to judge.
	pub const PROOF_IN: usize = 256;
}
