//! Cryptographic error kinds (§7: bad signature, malformed public key,
//! unparsable id).

#[derive(Debug, Fail)]
pub enum Error {
	#[fail(display = "invalid id: {}", _0)]
	InvalidId(&'static str),
	#[fail(display = "malformed public key")]
	MalformedPublicKey,
	#[fail(display = "malformed private key")]
	MalformedPrivateKey,
	#[fail(display = "bad signature encoding")]
	MalformedSignature,
	#[fail(display = "signature verification failed")]
	SignatureInvalid,
	#[fail(display = "secp256k1 error: {}", _0)]
	Secp256k1(secp256k1::Error),
}

impl From<secp256k1::Error> for Error {
	fn from(e: secp256k1::Error) -> Error {
		Error::Secp256k1(e)
	}
}
