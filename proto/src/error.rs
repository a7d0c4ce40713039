//! Protocol error kinds (§7: frame length/CRC mismatch, unknown protocol
//! id, unknown message type, out-of-version, bad field length).

#[derive(Debug, Fail)]
pub enum Error {
	#[fail(display = "unexpected end of buffer")]
	UnexpectedEof,
	#[fail(display = "frame length mismatch: declared {}, got {}", declared, actual)]
	FrameLengthMismatch { declared: u32, actual: u32 },
	#[fail(display = "frame checksum mismatch")]
	ChecksumMismatch,
	#[fail(display = "unknown protocol id {}", _0)]
	UnknownProtocolId(u8),
	#[fail(display = "unknown message type {}", _0)]
	UnknownMessageType(u8),
	#[fail(display = "unsupported protocol version {}", _0)]
	UnsupportedVersion(u8),
	#[fail(display = "bad field length: {}", _0)]
	BadFieldLength(&'static str),
	#[fail(display = "field exceeds bound: {}", _0)]
	FieldTooLarge(&'static str),
	#[fail(display = "crypto error: {}", _0)]
	Crypto(ecoin_crypto::Error),
}

impl From<ecoin_crypto::Error> for Error {
	fn from(e: ecoin_crypto::Error) -> Error {
		Error::Crypto(e)
	}
}
