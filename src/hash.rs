use sha2::{Digest, Sha256};

use crate::suite::Ciphersuite;

pub type Hash = [u8; SIZE];

pub const SIZE: usize = 32;

pub fn empty() -> Hash {
	[0u8; SIZE]
}

// every registered suite hashes with sha256; the suite still travels with the
// call so that containers never reach for a global
pub fn digest(_suite: Ciphersuite, bytes: &[u8]) -> Hash {
	Sha256::digest(bytes).into()
}

pub trait Hashable {
	fn hash(&self, suite: Ciphersuite) -> Hash;
}
