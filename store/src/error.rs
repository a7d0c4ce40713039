//! Storage error kinds (§7).

#[derive(Debug, Fail)]
pub enum Error {
	#[fail(display = "not found: {}", _0)]
	NotFound(&'static str),
	#[fail(display = "invalid height: {}", _0)]
	InvalidHeight(u64),
	#[fail(display = "insufficient balance: have {}, need {}", have, need)]
	InsufficientBalance { have: u64, need: u64 },
	#[fail(display = "genesis already stored")]
	GenesisExists,
	#[fail(display = "storage backend error: {}", _0)]
	Backend(sled::Error),
	#[fail(display = "transaction error: {}", _0)]
	Transaction(String),
	#[fail(display = "codec error: {}", _0)]
	Codec(ecoin_proto::Error),
}

impl From<sled::Error> for Error {
	fn from(e: sled::Error) -> Error {
		Error::Backend(e)
	}
}

impl From<ecoin_proto::Error> for Error {
	fn from(e: ecoin_proto::Error) -> Error {
		Error::Codec(e)
	}
}

impl From<sled::transaction::TransactionError<Error>> for Error {
	fn from(e: sled::transaction::TransactionError<Error>) -> Error {
		match e {
			sled::transaction::TransactionError::Abort(inner) => inner,
			sled::transaction::TransactionError::Storage(e) => Error::Backend(e),
		}
	}
}
