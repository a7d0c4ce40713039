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

//! Wire-format types: transactions, blocks, PoT proofs, and the TCP/UDP
//! message codecs that carry them between peers.

#[macro_use]
extern crate failure_derive;

pub mod block;
pub mod discovery_msg;
pub mod error;
pub mod message;
pub mod proof;
pub mod ser;
pub mod tx;

pub use block::{merkle_root, Block, BlockHeader, BLOCK_VERSION_1};
pub use discovery_msg::{DiscoveryBody, DiscoveryMessage, DiscoveryType, NeighbourInfo};
pub use error::Error;
pub use message::{
	build_frame, parse_frame_body, parse_frame_header, BlockBroadcast, BlockReq, BlockResp, Frame,
	MessageType, ProofBroadcast, ProtocolId, SyncMessage, SyncReq, SyncResp, TxBroadcast,
	FRAME_HEADER_LEN, MAX_FRAME_LEN, PROTO_VERSION_1,
};
pub use proof::PotProof;
pub use ser::{deserialize, serialize, BinReader, BinWriter, Readable, Reader, Writeable, Writer};
pub use tx::{Tx, TxType, DESCRIPTION_MAX_CHARS, PROTOCOL_VERSION_1};
