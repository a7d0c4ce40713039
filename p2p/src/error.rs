//! P2P transport, handshake and discovery error kinds.

#[derive(Debug, Fail)]
pub enum Error {
	#[fail(display = "io error: {}", _0)]
	Io(std::io::Error),
	#[fail(display = "proto error: {}", _0)]
	Proto(ecoin_proto::Error),
	#[fail(display = "crypto error: {}", _0)]
	Crypto(ecoin_crypto::Error),
	#[fail(display = "handshake rejected: {}", _0)]
	HandshakeRejected(&'static str),
	#[fail(display = "handshake timed out")]
	HandshakeTimeout,
	#[fail(display = "session codec error: {}", _0)]
	Codec(&'static str),
	#[fail(display = "peer {} is blacklisted", _0)]
	Blacklisted(ecoin_crypto::Id),
	#[fail(display = "peer table has no candidates to offer")]
	NoPeers,
}

impl From<std::io::Error> for Error {
	fn from(e: std::io::Error) -> Error {
		Error::Io(e)
	}
}

impl From<ecoin_proto::Error> for Error {
	fn from(e: ecoin_proto::Error) -> Error {
		Error::Proto(e)
	}
}

impl From<ecoin_crypto::Error> for Error {
	fn from(e: ecoin_crypto::Error) -> Error {
		Error::Crypto(e)
	}
}
