//! PoT engine error kinds.

#[derive(Debug, Fail)]
pub enum Error {
	#[fail(display = "chain error: {}", _0)]
	Chain(ecoin_chain::Error),
	#[fail(display = "proto error: {}", _0)]
	Proto(ecoin_proto::Error),
}

impl From<ecoin_chain::Error> for Error {
	fn from(e: ecoin_chain::Error) -> Error {
		Error::Chain(e)
	}
}

impl From<ecoin_proto::Error> for Error {
	fn from(e: ecoin_proto::Error) -> Error {
		Error::Proto(e)
	}
}
