//! Flattened, read-only views of chain state for the external query
//! interface (SPEC_FULL §6). Grounded on the original's `protocol/view`
//! package and `rpc` handlers, which likewise strip the wire/storage
//! shape down to "what a client asked for" before handing it out.

use ecoin_crypto::{Hash, Id};
use ecoin_proto::{Block, Tx, TxType};

#[derive(Debug, Clone)]
pub struct TxView {
	pub id: Hash,
	pub tx_type: TxType,
	pub uncompleted: bool,
	pub time: i64,
	pub from: Id,
	pub to: Id,
	pub amount: u64,
	pub payload: Vec<u8>,
	pub prev_tx_id: Hash,
	pub description: String,
	/// Height of the block this transaction was confirmed in, or `None`
	/// while it is still sitting in the pool.
	pub height: Option<u64>,
}

impl TxView {
	pub fn from_tx(tx: Tx, height: Option<u64>) -> TxView {
		TxView {
			id: tx.id,
			tx_type: tx.tx_type,
			uncompleted: tx.uncompleted,
			time: tx.time,
			from: tx.from,
			to: tx.to,
			amount: tx.amount,
			payload: tx.payload,
			prev_tx_id: tx.prev_tx_id,
			description: tx.description,
			height,
		}
	}
}

#[derive(Debug, Clone)]
pub struct BlockHeaderView {
	pub height: u64,
	pub time: i64,
	pub hash: Hash,
	pub prev_hash: Hash,
	pub creator: Id,
	pub tx_count: usize,
}

#[derive(Debug, Clone)]
pub struct BlockView {
	pub header: BlockHeaderView,
	pub txs: Vec<TxView>,
}

impl BlockView {
	pub fn from_block(block: Block, hash: Hash) -> BlockView {
		let height = block.header.height;
		BlockView {
			header: BlockHeaderView {
				height,
				time: block.header.time,
				hash,
				prev_hash: block.header.prev_hash,
				creator: block.header.creator,
				tx_count: block.txs.len(),
			},
			txs: block
				.txs
				.into_iter()
				.map(|tx| TxView::from_tx(tx, Some(height)))
				.collect(),
		}
	}
}

#[derive(Debug, Clone, Copy)]
pub struct AccountView {
	pub id: Id,
	pub balance: u64,
}
