// The ciphersuite registry. Every container and message carries its suite by
// value; primitives are pure functions of (suite, inputs).

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Ciphersuite {
	X25519Aes128Sha256Ed25519,
	P256Aes128Sha256P256,
	X25519ChaCha20Sha256Ed25519,
}

#[derive(Debug, PartialEq)]
pub enum Error {
	UnknownSuite(u16),
}

impl Ciphersuite {
	pub fn code(&self) -> u16 {
		match self {
			Self::X25519Aes128Sha256Ed25519 => 0x0001,
			Self::P256Aes128Sha256P256 => 0x0002,
			Self::X25519ChaCha20Sha256Ed25519 => 0x0003,
		}
	}

	// aead key size
	pub fn key_size(&self) -> usize {
		match self {
			Self::X25519Aes128Sha256Ed25519 | Self::P256Aes128Sha256P256 => 16,
			Self::X25519ChaCha20Sha256Ed25519 => 32,
		}
	}

	// aead nonce size
	pub fn nonce_size(&self) -> usize {
		12
	}

	// digest output size, also the width of every derived secret
	pub fn hash_size(&self) -> usize {
		32
	}
}

impl TryFrom<u16> for Ciphersuite {
	type Error = Error;

	fn try_from(code: u16) -> Result<Self, Self::Error> {
		match code {
			0x0001 => Ok(Self::X25519Aes128Sha256Ed25519),
			0x0002 => Ok(Self::P256Aes128Sha256P256),
			0x0003 => Ok(Self::X25519ChaCha20Sha256Ed25519),
			other => Err(Error::UnknownSuite(other)),
		}
	}
}
