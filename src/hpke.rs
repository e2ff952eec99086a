use hpke::{
	aead::{AesGcm128, ChaCha20Poly1305},
	kdf::HkdfSha256,
	kem::{DhP256HkdfSha256, X25519HkdfSha256},
	Deserializable, Kem as KemTrait, OpModeR, OpModeS, Serializable,
};
use rand::rngs::OsRng;
use zeroize::Zeroize;

use crate::suite::Ciphersuite;

#[derive(Debug, PartialEq)]
pub enum Error {
	BadKeyMaterial,
	DecryptFailed,
}

// the sealed form exchanged on the wire: kem encapsulation + aead ciphertext
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct HpkeCiphertext {
	pub kem_output: Vec<u8>,
	pub ciphertext: Vec<u8>,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct HpkePublicKey(Vec<u8>);

impl HpkePublicKey {
	pub fn new(bytes: Vec<u8>) -> Self {
		Self(bytes)
	}

	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}

	// base-mode single-shot seal; aad binds the group context
	pub fn encrypt(
		&self,
		suite: Ciphersuite,
		aad: &[u8],
		pt: &[u8],
	) -> Result<HpkeCiphertext, Error> {
		match suite {
			Ciphersuite::X25519Aes128Sha256Ed25519 => {
				seal::<AesGcm128, X25519HkdfSha256>(&self.0, aad, pt)
			}
			Ciphersuite::P256Aes128Sha256P256 => {
				seal::<AesGcm128, DhP256HkdfSha256>(&self.0, aad, pt)
			}
			Ciphersuite::X25519ChaCha20Sha256Ed25519 => {
				seal::<ChaCha20Poly1305, X25519HkdfSha256>(&self.0, aad, pt)
			}
		}
	}
}

#[derive(Debug, PartialEq, Clone)]
pub struct HpkePrivateKey {
	data: Vec<u8>,
	public: HpkePublicKey,
}

impl HpkePrivateKey {
	pub fn generate(suite: Ciphersuite) -> Self {
		match suite {
			Ciphersuite::X25519Aes128Sha256Ed25519 | Ciphersuite::X25519ChaCha20Sha256Ed25519 => {
				let (sk, pk) = X25519HkdfSha256::gen_keypair(&mut OsRng);

				Self::from_parts(sk.to_bytes().to_vec(), pk.to_bytes().to_vec())
			}
			Ciphersuite::P256Aes128Sha256P256 => {
				let (sk, pk) = DhP256HkdfSha256::gen_keypair(&mut OsRng);

				Self::from_parts(sk.to_bytes().to_vec(), pk.to_bytes().to_vec())
			}
		}
	}

	// RFC 9180 DeriveKeyPair: the key pair is a pure function of the secret
	pub fn derive(suite: Ciphersuite, ikm: &[u8]) -> Self {
		match suite {
			Ciphersuite::X25519Aes128Sha256Ed25519 | Ciphersuite::X25519ChaCha20Sha256Ed25519 => {
				let (sk, pk) = X25519HkdfSha256::derive_keypair(ikm);

				Self::from_parts(sk.to_bytes().to_vec(), pk.to_bytes().to_vec())
			}
			Ciphersuite::P256Aes128Sha256P256 => {
				let (sk, pk) = DhP256HkdfSha256::derive_keypair(ikm);

				Self::from_parts(sk.to_bytes().to_vec(), pk.to_bytes().to_vec())
			}
		}
	}

	fn from_parts(data: Vec<u8>, public: Vec<u8>) -> Self {
		Self { data, public: HpkePublicKey::new(public) }
	}

	pub fn public_key(&self) -> &HpkePublicKey {
		&self.public
	}

	pub fn decrypt(
		&self,
		suite: Ciphersuite,
		aad: &[u8],
		ct: &HpkeCiphertext,
	) -> Result<Vec<u8>, Error> {
		match suite {
			Ciphersuite::X25519Aes128Sha256Ed25519 => {
				open::<AesGcm128, X25519HkdfSha256>(&self.data, aad, ct)
			}
			Ciphersuite::P256Aes128Sha256P256 => {
				open::<AesGcm128, DhP256HkdfSha256>(&self.data, aad, ct)
			}
			Ciphersuite::X25519ChaCha20Sha256Ed25519 => {
				open::<ChaCha20Poly1305, X25519HkdfSha256>(&self.data, aad, ct)
			}
		}
	}
}

impl Drop for HpkePrivateKey {
	fn drop(&mut self) {
		self.data.zeroize();
	}
}

fn seal<A, K>(pk: &[u8], aad: &[u8], pt: &[u8]) -> Result<HpkeCiphertext, Error>
where
	A: hpke::aead::Aead,
	K: KemTrait,
{
	let pk = K::PublicKey::from_bytes(pk).map_err(|_| Error::BadKeyMaterial)?;
	let (kem_output, ciphertext) = hpke::single_shot_seal::<A, HkdfSha256, K, _>(
		&OpModeS::Base,
		&pk,
		b"",
		pt,
		aad,
		&mut OsRng,
	)
	.map_err(|_| Error::BadKeyMaterial)?;

	Ok(HpkeCiphertext { kem_output: kem_output.to_bytes().to_vec(), ciphertext })
}

fn open<A, K>(sk: &[u8], aad: &[u8], ct: &HpkeCiphertext) -> Result<Vec<u8>, Error>
where
	A: hpke::aead::Aead,
	K: KemTrait,
{
	let sk = K::PrivateKey::from_bytes(sk).map_err(|_| Error::BadKeyMaterial)?;
	let kem_output =
		K::EncappedKey::from_bytes(&ct.kem_output).map_err(|_| Error::BadKeyMaterial)?;

	hpke::single_shot_open::<A, HkdfSha256, K>(
		&OpModeR::Base,
		&sk,
		&kem_output,
		b"",
		&ct.ciphertext,
		aad,
	)
	.map_err(|_| Error::DecryptFailed)
}

#[cfg(test)]
mod tests {
	use super::{Error, HpkePrivateKey};
	use crate::suite::Ciphersuite;

	const SUITES: [Ciphersuite; 3] = [
		Ciphersuite::X25519Aes128Sha256Ed25519,
		Ciphersuite::P256Aes128Sha256P256,
		Ciphersuite::X25519ChaCha20Sha256Ed25519,
	];

	#[test]
	fn test_encrypt_decrypt() {
		SUITES.into_iter().for_each(|suite| {
			let priv_key = HpkePrivateKey::generate(suite);
			let ct = priv_key.public_key().encrypt(suite, b"context", b"path secret").unwrap();

			assert_eq!(priv_key.decrypt(suite, b"context", &ct), Ok(b"path secret".to_vec()));
		});
	}

	#[test]
	fn test_decrypt_fails_for_wrong_key_or_aad() {
		SUITES.into_iter().for_each(|suite| {
			let priv_key = HpkePrivateKey::generate(suite);
			let wrong = HpkePrivateKey::generate(suite);
			let ct = priv_key.public_key().encrypt(suite, b"aad", b"secret").unwrap();

			assert_eq!(wrong.decrypt(suite, b"aad", &ct), Err(Error::DecryptFailed));
			assert_eq!(priv_key.decrypt(suite, b"other aad", &ct), Err(Error::DecryptFailed));
		});
	}

	#[test]
	fn test_derive_is_deterministic() {
		SUITES.into_iter().for_each(|suite| {
			let ikm = [42u8; 32];
			let a = HpkePrivateKey::derive(suite, &ikm);
			let b = HpkePrivateKey::derive(suite, &ikm);
			let c = HpkePrivateKey::derive(suite, &[43u8; 32]);

			assert_eq!(a.public_key(), b.public_key());
			assert_ne!(a.public_key(), c.public_key());
		});
	}

	#[test]
	fn test_derived_key_decrypts() {
		SUITES.into_iter().for_each(|suite| {
			let ikm = [9u8; 32];
			let priv_key = HpkePrivateKey::derive(suite, &ikm);
			let ct = priv_key.public_key().encrypt(suite, b"", b"hello").unwrap();

			assert_eq!(HpkePrivateKey::derive(suite, &ikm).decrypt(suite, b"", &ct), Ok(b"hello".to_vec()));
		});
	}
}
