use p256::ecdsa::signature::{Signer, Verifier};
use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroize;

use crate::suite::Ciphersuite;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Signature(Vec<u8>);

impl Signature {
	pub fn new(bytes: Vec<u8>) -> Self {
		Self(bytes)
	}

	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SignaturePublicKey(Vec<u8>);

impl SignaturePublicKey {
	pub fn new(bytes: Vec<u8>) -> Self {
		Self(bytes)
	}

	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}

	pub fn verify(&self, suite: Ciphersuite, msg: &[u8], sig: &Signature) -> bool {
		match suite {
			Ciphersuite::X25519Aes128Sha256Ed25519
			| Ciphersuite::X25519ChaCha20Sha256Ed25519 => {
				let bytes: [u8; 32] = match self.0.as_slice().try_into() {
					Ok(bytes) => bytes,
					Err(_) => return false,
				};
				let key = match ed25519_dalek::VerifyingKey::from_bytes(&bytes) {
					Ok(key) => key,
					Err(_) => return false,
				};
				let sig = match ed25519_dalek::Signature::from_slice(&sig.0) {
					Ok(sig) => sig,
					Err(_) => return false,
				};

				key.verify(msg, &sig).is_ok()
			}
			Ciphersuite::P256Aes128Sha256P256 => {
				let key = match p256::ecdsa::VerifyingKey::from_sec1_bytes(&self.0) {
					Ok(key) => key,
					Err(_) => return false,
				};
				let sig = match p256::ecdsa::Signature::from_slice(&sig.0) {
					Ok(sig) => sig,
					Err(_) => return false,
				};

				key.verify(msg, &sig).is_ok()
			}
		}
	}
}

#[derive(Debug, PartialEq, Clone)]
pub struct SignaturePrivateKey {
	data: Vec<u8>,
	public: SignaturePublicKey,
}

impl SignaturePrivateKey {
	pub fn generate(suite: Ciphersuite) -> Self {
		match suite {
			Ciphersuite::X25519Aes128Sha256Ed25519
			| Ciphersuite::X25519ChaCha20Sha256Ed25519 => {
				let mut seed = [0u8; 32];
				OsRng.fill_bytes(&mut seed);
				let key = ed25519_dalek::SigningKey::from_bytes(&seed);

				Self {
					data: seed.to_vec(),
					public: SignaturePublicKey::new(key.verifying_key().to_bytes().to_vec()),
				}
			}
			Ciphersuite::P256Aes128Sha256P256 => {
				// a raw scalar may fall outside the field; retry until it lands
				loop {
					let mut seed = [0u8; 32];
					OsRng.fill_bytes(&mut seed);

					if let Ok(key) = p256::ecdsa::SigningKey::from_slice(&seed) {
						return Self {
							data: seed.to_vec(),
							public: SignaturePublicKey::new(
								key.verifying_key().to_sec1_bytes().to_vec(),
							),
						};
					}
				}
			}
		}
	}

	pub fn public_key(&self) -> &SignaturePublicKey {
		&self.public
	}

	// keys are well formed by construction, so signing never fails
	pub fn sign(&self, suite: Ciphersuite, msg: &[u8]) -> Signature {
		match suite {
			Ciphersuite::X25519Aes128Sha256Ed25519
			| Ciphersuite::X25519ChaCha20Sha256Ed25519 => {
				let seed: [u8; 32] = self.data.as_slice().try_into().unwrap();
				let key = ed25519_dalek::SigningKey::from_bytes(&seed);
				let sig: ed25519_dalek::Signature = key.sign(msg);

				Signature(sig.to_bytes().to_vec())
			}
			Ciphersuite::P256Aes128Sha256P256 => {
				let key = p256::ecdsa::SigningKey::from_slice(&self.data).unwrap();
				let sig: p256::ecdsa::Signature = key.sign(msg);

				Signature(sig.to_bytes().to_vec())
			}
		}
	}
}

impl Drop for SignaturePrivateKey {
	fn drop(&mut self) {
		self.data.zeroize();
	}
}
