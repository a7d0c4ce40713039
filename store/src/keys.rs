//! Keyspace layout, ported directly from the original badger schema
//! (`store/db/schema.go`):
//!
//! ```text
//! H | height | hash        -> header
//! H | height | "h"         -> hash
//! n | hash                 -> height
//! B | height | hash        -> tx id list
//! T | height | hash        -> tx bytes
//! N | hash                 -> height
//! id | "b"                 -> balance
//! id | "f" | tx_hash        -> height   (tx where id is sender)
//! id | "t" | tx_hash        -> height   (tx where id is receiver)
//! mLatestHeight             -> height
//! mGenesis                  -> hash
//! ```

use ecoin_crypto::{Hash, Id};

const HEADER_PREFIX: u8 = b'H';
const HASH_SUFFIX: u8 = b'h';
const HEADER_HEIGHT_PREFIX: u8 = b'n';
const TX_PREFIX: u8 = b'T';
const BLOCK_TX_INDEX_PREFIX: u8 = b'B';
const TX_HEIGHT_PREFIX: u8 = b'N';
const BALANCE_SUFFIX: u8 = b'b';
const TX_FROM_SUFFIX: u8 = b'f';
const TX_TO_SUFFIX: u8 = b't';

pub const META_LATEST_HEIGHT: &[u8] = b"mLatestHeight";
pub const META_GENESIS: &[u8] = b"mGenesis";

fn hbyte(height: u64) -> [u8; 8] {
	height.to_be_bytes()
}

pub fn header_key(height: u64, hash: &Hash) -> Vec<u8> {
	let mut k = Vec::with_capacity(1 + 8 + 32);
	k.push(HEADER_PREFIX);
	k.extend_from_slice(&hbyte(height));
	k.extend_from_slice(hash.as_bytes());
	k
}

pub fn hash_key(height: u64) -> Vec<u8> {
	let mut k = Vec::with_capacity(1 + 8 + 1);
	k.push(HEADER_PREFIX);
	k.extend_from_slice(&hbyte(height));
	k.push(HASH_SUFFIX);
	k
}

pub fn header_height_key(hash: &Hash) -> Vec<u8> {
	let mut k = Vec::with_capacity(1 + 32);
	k.push(HEADER_HEIGHT_PREFIX);
	k.extend_from_slice(hash.as_bytes());
	k
}

pub fn block_tx_index_key(height: u64, hash: &Hash) -> Vec<u8> {
	let mut k = Vec::with_capacity(1 + 8 + 32);
	k.push(BLOCK_TX_INDEX_PREFIX);
	k.extend_from_slice(&hbyte(height));
	k.extend_from_slice(hash.as_bytes());
	k
}

pub fn tx_key(height: u64, hash: &Hash) -> Vec<u8> {
	let mut k = Vec::with_capacity(1 + 8 + 32);
	k.push(TX_PREFIX);
	k.extend_from_slice(&hbyte(height));
	k.extend_from_slice(hash.as_bytes());
	k
}

pub fn tx_height_key(hash: &Hash) -> Vec<u8> {
	let mut k = Vec::with_capacity(1 + 32);
	k.push(TX_HEIGHT_PREFIX);
	k.extend_from_slice(hash.as_bytes());
	k
}

pub fn balance_key(id: &Id) -> Vec<u8> {
	let mut k = Vec::with_capacity(54 + 1);
	k.extend_from_slice(id.as_bytes());
	k.push(BALANCE_SUFFIX);
	k
}

pub fn tx_from_key(id: &Id, tx_hash: &Hash) -> Vec<u8> {
	let mut k = Vec::with_capacity(54 + 1 + 32);
	k.extend_from_slice(id.as_bytes());
	k.push(TX_FROM_SUFFIX);
	k.extend_from_slice(tx_hash.as_bytes());
	k
}

pub fn tx_from_prefix(id: &Id) -> Vec<u8> {
	let mut k = Vec::with_capacity(54 + 1);
	k.extend_from_slice(id.as_bytes());
	k.push(TX_FROM_SUFFIX);
	k
}

pub fn tx_to_key(id: &Id, tx_hash: &Hash) -> Vec<u8> {
	let mut k = Vec::with_capacity(54 + 1 + 32);
	k.extend_from_slice(id.as_bytes());
	k.push(TX_TO_SUFFIX);
	k.extend_from_slice(tx_hash.as_bytes());
	k
}

pub fn tx_to_prefix(id: &Id) -> Vec<u8> {
	let mut k = Vec::with_capacity(54 + 1);
	k.extend_from_slice(id.as_bytes());
	k.push(TX_TO_SUFFIX);
	k
}

pub fn height_from_bytes(b: &[u8]) -> u64 {
	let mut buf = [0u8; 8];
	buf.copy_from_slice(&b[..8]);
	u64::from_be_bytes(buf)
}
