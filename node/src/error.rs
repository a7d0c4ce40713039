//! Top-level node error, threading through every subsystem it wires
//! together.

#[derive(Debug, Fail)]
pub enum Error {
	#[fail(display = "invalid config: {}", _0)]
	InvalidConfig(String),
	#[fail(display = "storage error: {}", _0)]
	Storage(ecoin_store::Error),
	#[fail(display = "chain error: {}", _0)]
	Chain(ecoin_chain::Error),
	#[fail(display = "pool error: {}", _0)]
	Pool(ecoin_pool::Error),
	#[fail(display = "p2p error: {}", _0)]
	P2p(ecoin_p2p::Error),
	#[fail(display = "codec error: {}", _0)]
	Codec(ecoin_proto::Error),
	#[fail(display = "crypto error: {}", _0)]
	Crypto(ecoin_crypto::Error),
	#[fail(display = "hex error: {}", _0)]
	Hex(ecoin_util::hex::HexError),
	#[fail(display = "not found: {}", _0)]
	NotFound(&'static str),
}

impl From<ecoin_store::Error> for Error {
	fn from(e: ecoin_store::Error) -> Error {
		Error::Storage(e)
	}
}

impl From<ecoin_chain::Error> for Error {
	fn from(e: ecoin_chain::Error) -> Error {
		Error::Chain(e)
	}
}

impl From<ecoin_pool::Error> for Error {
	fn from(e: ecoin_pool::Error) -> Error {
		Error::Pool(e)
	}
}

impl From<ecoin_p2p::Error> for Error {
	fn from(e: ecoin_p2p::Error) -> Error {
		Error::P2p(e)
	}
}

impl From<ecoin_proto::Error> for Error {
	fn from(e: ecoin_proto::Error) -> Error {
		Error::Codec(e)
	}
}

impl From<ecoin_crypto::Error> for Error {
	fn from(e: ecoin_crypto::Error) -> Error {
		Error::Crypto(e)
	}
}

impl From<ecoin_util::hex::HexError> for Error {
	fn from(e: ecoin_util::hex::HexError) -> Error {
		Error::Hex(e)
	}
}
