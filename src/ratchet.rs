use std::collections::HashMap;

use zeroize::Zeroize;

use crate::{hkdf, suite::Ciphersuite};

/*
	 ...
		|
	chain[n]   -> { key[n],   nonce[n] }
		|
	chain[n+1] -> { key[n+1], nonce[n+1] }
		|
	 ...
*/

#[derive(Debug, PartialEq)]
pub enum Error {
	// the key for this generation was already handed out and deleted
	KeyHasBeenUsed(u32),
	TooManyKeysSkipped,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct KeyAndNonce {
	pub key: Vec<u8>,
	pub nonce: Vec<u8>,
}

impl Drop for KeyAndNonce {
	fn drop(&mut self) {
		self.key.zeroize();
		self.nonce.zeroize();
	}
}

// one sender's chain for one epoch: each generation yields aead material,
// the chain key ratchets forward and consumed keys are forgotten
#[derive(Debug, Clone)]
pub struct HashRatchet {
	suite: Ciphersuite,
	next_secret: Vec<u8>,
	next_generation: u32,
	// keys stepped over by an out-of-order delivery, bounded by max_skip
	skipped: HashMap<u32, KeyAndNonce>,
	max_skip: u32,
}

impl HashRatchet {
	pub fn new(suite: Ciphersuite, base_secret: Vec<u8>, max_skip: u32) -> Self {
		Self { suite, next_secret: base_secret, next_generation: 0, skipped: HashMap::new(), max_skip }
	}

	pub fn next_generation(&self) -> u32 {
		self.next_generation
	}

	fn derive(&self) -> KeyAndNonce {
		KeyAndNonce {
			key: hkdf::expand_label(self.suite, &self.next_secret, "key", b"", self.suite.key_size()),
			nonce: hkdf::expand_label(
				self.suite,
				&self.next_secret,
				"nonce",
				b"",
				self.suite.nonce_size(),
			),
		}
	}

	fn advance(&mut self) {
		let material = self.derive();
		let next =
			hkdf::expand_label(self.suite, &self.next_secret, "secret", b"", self.suite.hash_size());

		self.skipped.insert(self.next_generation, material);
		self.next_secret.zeroize();
		self.next_secret = next;
		self.next_generation += 1;
	}

	pub fn get(&mut self, generation: u32) -> Result<KeyAndNonce, Error> {
		if generation < self.next_generation {
			self.skipped.remove(&generation).ok_or(Error::KeyHasBeenUsed(generation))
		} else {
			// generation comes off the wire; the window check must hold for
			// any value up to u32::MAX without overflowing
			let to_skip = generation - self.next_generation;
			let over_window = to_skip
				.checked_add(self.skipped.len() as u32)
				.map_or(true, |total| total > self.max_skip);

			if over_window {
				Err(Error::TooManyKeysSkipped)
			} else {
				while self.next_generation <= generation {
					self.advance();
				}

				Ok(self.skipped.remove(&generation).unwrap())
			}
		}
	}

	pub fn next(&mut self) -> (KeyAndNonce, u32) {
		let generation = self.next_generation;

		// the head of the chain is always available
		(self.get(generation).unwrap(), generation)
	}
}

impl Drop for HashRatchet {
	fn drop(&mut self) {
		self.next_secret.zeroize();
	}
}
