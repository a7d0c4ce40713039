//! Pool error kinds.

#[derive(Debug, Fail)]
pub enum Error {
	#[fail(display = "pool is full ({} pending)", _0)]
	Full(usize),
	#[fail(display = "tx already pending")]
	AlreadyPending,
	#[fail(display = "proto error: {}", _0)]
	Proto(ecoin_proto::Error),
}

impl From<ecoin_proto::Error> for Error {
	fn from(e: ecoin_proto::Error) -> Error {
		Error::Proto(e)
	}
}
