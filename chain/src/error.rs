//! Chain manager error kinds, named after the original implementation's
//! `bc.Err*` sentinel types.

use ecoin_crypto::Hash;

#[derive(Debug, Fail)]
pub enum Error {
	#[fail(display = "{} is already up to date", _0)]
	AlreadyUpToDate(Hash),
	#[fail(display = "flushing happened while handling {}, give up", _0)]
	FlushingCache(Hash),
	#[fail(display = "hash {} not found", _0)]
	HashNotFound(Hash),
	#[fail(display = "invalid block range: {}", _0)]
	InvalidBlockRange(String),
	#[fail(display = "tx {} already exists", _0)]
	TxAlreadyExists(Hash),
	#[fail(display = "block rejected: {}", _0)]
	BlockRejected(String),
	#[fail(display = "no branch found for parent hash {}", _0)]
	NoParentBranch(Hash),
	#[fail(display = "empty block batch")]
	EmptyBatch,
	#[fail(display = "storage error: {}", _0)]
	Storage(ecoin_store::Error),
	#[fail(display = "codec error: {}", _0)]
	Codec(ecoin_proto::Error),
}

impl From<ecoin_store::Error> for Error {
	fn from(e: ecoin_store::Error) -> Error {
		Error::Storage(e)
	}
}

impl From<ecoin_proto::Error> for Error {
	fn from(e: ecoin_proto::Error) -> Error {
		Error::Codec(e)
	}
}
