use hkdf::Hkdf;
use sha2::Sha256;

use crate::suite::Ciphersuite;

// prepended to every expansion label so that derivations never collide with
// other users of the same keys
const LABEL_PREFIX: &[u8] = b"mls10 ";

pub fn extract(_suite: Ciphersuite, salt: &[u8], ikm: &[u8]) -> Vec<u8> {
	Hkdf::<Sha256>::extract(Some(salt), ikm).0.to_vec()
}

pub fn expand(_suite: Ciphersuite, prk: &[u8], info: &[u8], len: usize) -> Vec<u8> {
	let hkdf = Hkdf::<Sha256>::from_prk(prk).unwrap();
	let mut okm = vec![0u8; len];

	hkdf.expand(info, &mut okm).unwrap();

	okm
}

// HkdfLabel = { length: u16, label: opaque<0..255>, context: opaque<0..2^32-1> }
pub fn expand_label(
	suite: Ciphersuite,
	secret: &[u8],
	label: &str,
	context: &[u8],
	len: usize,
) -> Vec<u8> {
	let mut full_label = LABEL_PREFIX.to_vec();
	full_label.extend_from_slice(label.as_bytes());

	let mut info = Vec::with_capacity(7 + full_label.len() + context.len());
	info.extend_from_slice(&(len as u16).to_be_bytes());
	info.push(full_label.len() as u8);
	info.extend_from_slice(&full_label);
	info.extend_from_slice(&(context.len() as u32).to_be_bytes());
	info.extend_from_slice(context);

	expand(suite, secret, &info, len)
}

#[cfg(test)]
mod tests {
	use super::{expand, expand_label, extract};
	use crate::suite::Ciphersuite;

	const SUITE: Ciphersuite = Ciphersuite::X25519Aes128Sha256Ed25519;

	#[test]
	fn test_rfc5869_case_1() {
		let ikm = [0x0bu8; 22];
		let salt: Vec<u8> = (0x00..=0x0c).collect();
		let info: Vec<u8> = (0xf0..=0xf9).collect();

		let prk = extract(SUITE, &salt, &ikm);
		assert_eq!(
			prk,
			b"\x07\x77\x09\x36\x2c\x2e\x32\xdf\x0d\xdc\x3f\x0d\xc4\x7b\xba\x63\x90\xb6\xc7\x3b\xb5\x0f\x9c\x31\x22\xec\x84\x4a\xd7\xc2\xb3\xe5".to_vec()
		);

		let okm = expand(SUITE, &prk, &info, 42);
		assert_eq!(
			okm,
			b"\x3c\xb2\x5f\x25\xfa\xac\xd5\x7a\x90\x43\x4f\x64\xd0\x36\x2f\x2a\x2d\x2d\x0a\x90\xcf\x1a\x5a\x4c\x5d\xb0\x2d\x56\xec\xc4\xc5\xbf\x34\x00\x72\x08\xd5\xb8\x87\x18\x58\x65".to_vec()
		);
	}

	#[test]
	fn test_expand_label_diversifies() {
		let secret = [42u8; 32];

		let a = expand_label(SUITE, &secret, "path", b"", 32);
		let b = expand_label(SUITE, &secret, "node", b"", 32);
		let c = expand_label(SUITE, &secret, "path", b"ctx", 32);

		assert_ne!(a, b);
		assert_ne!(a, c);
		assert_ne!(b, c);
		assert_eq!(a, expand_label(SUITE, &secret, "path", b"", 32));
	}

	#[test]
	fn test_expand_label_length() {
		let secret = [1u8; 32];

		assert_eq!(expand_label(SUITE, &secret, "key", b"", 16).len(), 16);
		assert_eq!(expand_label(SUITE, &secret, "nonce", b"", 12).len(), 12);
		// requested length is mixed into the derivation
		assert_ne!(
			expand_label(SUITE, &secret, "key", b"", 16),
			expand_label(SUITE, &secret, "key", b"", 32)[..16].to_vec()
		);
	}
}
