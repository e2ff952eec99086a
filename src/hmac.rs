use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{hash, suite::Ciphersuite};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, PartialEq, Clone)]
pub struct Key([u8; Self::SIZE]);

impl Key {
	pub const SIZE: usize = hash::SIZE;

	pub fn new(bytes: [u8; Self::SIZE]) -> Self {
		Self(bytes)
	}

	pub fn as_bytes(&self) -> &[u8; Self::SIZE] {
		&self.0
	}
}

impl From<&hash::Hash> for Key {
	fn from(hash: &hash::Hash) -> Self {
		Self(*hash)
	}
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Tag(pub [u8; Self::SIZE]);

impl Tag {
	pub const SIZE: usize = hash::SIZE;

	pub fn as_bytes(&self) -> &[u8; Self::SIZE] {
		&self.0
	}
}

impl TryFrom<Vec<u8>> for Tag {
	type Error = std::array::TryFromSliceError;

	fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
		Ok(Self(value.as_slice().try_into()?))
	}
}

pub fn digest(_suite: Ciphersuite, key: &Key, msg: &[u8]) -> Tag {
	let mut mac = HmacSha256::new_from_slice(&key.0).unwrap();

	mac.update(msg);

	Tag(mac.finalize().into_bytes().into())
}

// constant-time comparison via the mac crate
pub fn verify(_suite: Ciphersuite, key: &Key, msg: &[u8], tag: &Tag) -> bool {
	let mut mac = HmacSha256::new_from_slice(&key.0).unwrap();

	mac.update(msg);

	mac.verify_slice(&tag.0).is_ok()
}

#[cfg(test)]
mod tests {
	use super::{digest, verify, Key, Tag};
	use crate::suite::Ciphersuite;

	const SUITE: Ciphersuite = Ciphersuite::X25519Aes128Sha256Ed25519;

	#[test]
	fn test_openssl_vector() {
		// echo -n value-to-digest | openssl dgst -sha256 -hmac 12345678901234567890123456789012 -binary | xxd -p
		let key = Key::new(*b"12345678901234567890123456789012");
		let expected = b"\xd0\xbd\xa9\xa1\xfd\xd4\xed\xa6\xa5\x46\x38\xb7\x73\x8e\x38\x05\xeb\x26\x55\x97\xa0\xcc\x0b\xd0\xd7\xd3\x19\x4b\x20\x42\x70\xb5";

		assert_eq!(digest(SUITE, &key, b"value-to-digest").as_bytes(), expected);
	}

	#[test]
	fn test_verify() {
		let key = Key::new([7u8; Key::SIZE]);
		let tag = digest(SUITE, &key, b"payload");

		assert!(verify(SUITE, &key, b"payload", &tag));
		assert!(!verify(SUITE, &key, b"tampered", &tag));
		assert!(!verify(SUITE, &Key::new([8u8; Key::SIZE]), b"payload", &tag));
		assert!(!verify(SUITE, &key, b"payload", &Tag([0u8; Tag::SIZE])));
	}

	#[test]
	fn test_keys_diversify() {
		let t1 = digest(SUITE, &Key::new([1u8; Key::SIZE]), b"msg");
		let t2 = digest(SUITE, &Key::new([2u8; Key::SIZE]), b"msg");

		assert_ne!(t1, t2);
	}
}
