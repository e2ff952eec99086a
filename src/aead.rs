use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_128_GCM, CHACHA20_POLY1305};

use crate::suite::Ciphersuite;

#[derive(Debug, PartialEq)]
pub enum Error {
	WrongKeyMaterial,
	BadKeySize { given: usize, required: usize },
	BadNonceSize { given: usize, required: usize },
}

fn algorithm(suite: Ciphersuite) -> &'static ring::aead::Algorithm {
	match suite {
		Ciphersuite::X25519Aes128Sha256Ed25519 | Ciphersuite::P256Aes128Sha256P256 => &AES_128_GCM,
		Ciphersuite::X25519ChaCha20Sha256Ed25519 => &CHACHA20_POLY1305,
	}
}

fn key(suite: Ciphersuite, key: &[u8], nonce: &[u8]) -> Result<(LessSafeKey, Nonce), Error> {
	if key.len() != suite.key_size() {
		return Err(Error::BadKeySize { given: key.len(), required: suite.key_size() });
	}

	if nonce.len() != suite.nonce_size() {
		return Err(Error::BadNonceSize { given: nonce.len(), required: suite.nonce_size() });
	}

	let unbound = UnboundKey::new(algorithm(suite), key).or(Err(Error::WrongKeyMaterial))?;
	let nonce = Nonce::try_assume_unique_for_key(nonce).or(Err(Error::WrongKeyMaterial))?;

	Ok((LessSafeKey::new(unbound), nonce))
}

pub fn seal(
	suite: Ciphersuite,
	key_bytes: &[u8],
	nonce_bytes: &[u8],
	aad: &[u8],
	pt: &[u8],
) -> Result<Vec<u8>, Error> {
	let (key, nonce) = key(suite, key_bytes, nonce_bytes)?;
	let mut ct = pt.to_vec();

	key.seal_in_place_append_tag(nonce, Aad::from(aad), &mut ct)
		.or(Err(Error::WrongKeyMaterial))?;

	Ok(ct)
}

pub fn open(
	suite: Ciphersuite,
	key_bytes: &[u8],
	nonce_bytes: &[u8],
	aad: &[u8],
	ct: &[u8],
) -> Result<Vec<u8>, Error> {
	let (key, nonce) = key(suite, key_bytes, nonce_bytes)?;
	let mut buf = ct.to_vec();
	let pt = key
		.open_in_place(nonce, Aad::from(aad), &mut buf)
		.or(Err(Error::WrongKeyMaterial))?;

	Ok(pt.to_vec())
}

#[cfg(test)]
mod tests {
	use super::{open, seal, Error};
	use crate::suite::Ciphersuite;

	const SUITES: [Ciphersuite; 3] = [
		Ciphersuite::X25519Aes128Sha256Ed25519,
		Ciphersuite::P256Aes128Sha256P256,
		Ciphersuite::X25519ChaCha20Sha256Ed25519,
	];

	#[test]
	fn test_seal_open() {
		SUITES.into_iter().for_each(|suite| {
			let key = vec![7u8; suite.key_size()];
			let nonce = vec![3u8; suite.nonce_size()];
			let ct = seal(suite, &key, &nonce, b"header", b"application data").unwrap();

			assert_ne!(ct, b"application data".to_vec());
			assert_eq!(
				open(suite, &key, &nonce, b"header", &ct),
				Ok(b"application data".to_vec())
			);
		});
	}

	#[test]
	fn test_open_fails_on_mismatch() {
		SUITES.into_iter().for_each(|suite| {
			let key = vec![7u8; suite.key_size()];
			let nonce = vec![3u8; suite.nonce_size()];
			let ct = seal(suite, &key, &nonce, b"aad", b"pt").unwrap();

			let mut wrong_key = key.clone();
			wrong_key[0] ^= 1;
			let mut wrong_nonce = nonce.clone();
			wrong_nonce[0] ^= 1;

			assert_eq!(open(suite, &wrong_key, &nonce, b"aad", &ct), Err(Error::WrongKeyMaterial));
			assert_eq!(open(suite, &key, &wrong_nonce, b"aad", &ct), Err(Error::WrongKeyMaterial));
			assert_eq!(open(suite, &key, &nonce, b"other", &ct), Err(Error::WrongKeyMaterial));

			let mut tampered = ct.clone();
			tampered[0] ^= 1;
			assert_eq!(open(suite, &key, &nonce, b"aad", &tampered), Err(Error::WrongKeyMaterial));
		});
	}

	#[test]
	fn test_size_checks() {
		let suite = Ciphersuite::X25519Aes128Sha256Ed25519;

		assert_eq!(
			seal(suite, &[0u8; 32], &[0u8; 12], b"", b""),
			Err(Error::BadKeySize { given: 32, required: 16 })
		);
		assert_eq!(
			seal(suite, &[0u8; 16], &[0u8; 16], b"", b""),
			Err(Error::BadNonceSize { given: 16, required: 12 })
		);
	}

	#[test]
	fn test_seal_empty() {
		let suite = Ciphersuite::X25519ChaCha20Sha256Ed25519;
		let key = vec![1u8; suite.key_size()];
		let nonce = vec![2u8; suite.nonce_size()];
		let ct = seal(suite, &key, &nonce, b"", b"").unwrap();

		assert_eq!(open(suite, &key, &nonce, b"", &ct), Ok(vec![]));
	}
}
