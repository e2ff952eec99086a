use std::collections::HashMap;

use zeroize::Zeroize;

use crate::{
	hkdf, hmac,
	ratchet::{self, HashRatchet, KeyAndNonce},
	suite::Ciphersuite,
	treemath::LeafIndex,
};

// how far a receiver will run a sender's chain forward to match a generation
const MAX_GENERATION_SKIP: u32 = 32;

// the two chain families every member's encryption secret diversifies into
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum ChainType {
	Handshake,
	Application,
}

impl ChainType {
	fn label(&self) -> &'static str {
		match self {
			ChainType::Handshake => "handshake",
			ChainType::Application => "application",
		}
	}
}

// everything one epoch derives: from (previous init secret, commit secret,
// group context) down to per-member aead chains
#[derive(Debug, Clone)]
pub struct KeyScheduleEpoch {
	pub suite: Ciphersuite,
	pub joiner_secret: Vec<u8>,
	pub epoch_secret: Vec<u8>,
	pub sender_data_secret: Vec<u8>,
	pub encryption_secret: Vec<u8>,
	pub exporter_secret: Vec<u8>,
	pub authentication_secret: Vec<u8>,
	pub external_secret: Vec<u8>,
	pub confirmation_key: Vec<u8>,
	pub membership_key: Vec<u8>,
	pub resumption_secret: Vec<u8>,
	pub init_secret: Vec<u8>,
	// sending side, own leaf only
	out_chains: HashMap<(u32, ChainType), HashRatchet>,
	// receiving side, one per sender; independent so that own traffic can be
	// read back
	in_chains: HashMap<(u32, ChainType), HashRatchet>,
}

impl KeyScheduleEpoch {
	pub fn new(suite: Ciphersuite, init_secret: &[u8], commit_secret: &[u8], ctx: &[u8]) -> Self {
		let joiner_secret = hkdf::extract(suite, init_secret, commit_secret);

		Self::from_joiner(suite, &joiner_secret, ctx)
	}

	// the founder's first epoch starts from all-zero inputs
	pub fn first(suite: Ciphersuite, ctx: &[u8]) -> Self {
		let zeros = vec![0u8; suite.hash_size()];

		Self::new(suite, &zeros, &zeros, ctx)
	}

	// joiners enter here: the welcome hands them the joiner secret directly
	pub fn from_joiner(suite: Ciphersuite, joiner_secret: &[u8], ctx: &[u8]) -> Self {
		let epoch_secret = hkdf::extract(suite, joiner_secret, ctx);
		let derive = |label| hkdf::expand_label(suite, &epoch_secret, label, b"", suite.hash_size());

		Self {
			suite,
			joiner_secret: joiner_secret.to_vec(),
			sender_data_secret: derive("sender data"),
			encryption_secret: derive("encryption"),
			exporter_secret: derive("exporter"),
			authentication_secret: derive("authentication"),
			external_secret: derive("external"),
			confirmation_key: derive("confirm"),
			membership_key: derive("membership"),
			resumption_secret: derive("resumption"),
			init_secret: derive("init"),
			epoch_secret,
			out_chains: HashMap::new(),
			in_chains: HashMap::new(),
		}
	}

	pub fn welcome_secret(suite: Ciphersuite, joiner_secret: &[u8]) -> Vec<u8> {
		hkdf::expand_label(suite, joiner_secret, "welcome", b"", suite.hash_size())
	}

	// key and nonce protecting the GroupInfo inside a welcome
	pub fn welcome_key_nonce(suite: Ciphersuite, joiner_secret: &[u8]) -> (Vec<u8>, Vec<u8>) {
		let welcome_secret = Self::welcome_secret(suite, joiner_secret);
		let key = hkdf::expand_label(suite, &welcome_secret, "key", b"", suite.key_size());
		let nonce = hkdf::expand_label(suite, &welcome_secret, "nonce", b"", suite.nonce_size());

		(key, nonce)
	}

	pub fn confirmation(&self, confirmed_transcript_hash: &[u8]) -> hmac::Tag {
		hmac::digest(
			self.suite,
			&hmac::Key::new(self.confirmation_key.as_slice().try_into().unwrap()),
			confirmed_transcript_hash,
		)
	}

	pub fn verify_confirmation(&self, confirmed_transcript_hash: &[u8], tag: &hmac::Tag) -> bool {
		hmac::verify(
			self.suite,
			&hmac::Key::new(self.confirmation_key.as_slice().try_into().unwrap()),
			confirmed_transcript_hash,
			tag,
		)
	}

	pub fn sender_data_key(&self) -> Vec<u8> {
		hkdf::expand_label(
			self.suite,
			&self.sender_data_secret,
			"sender data key",
			b"",
			self.suite.key_size(),
		)
	}

	fn base_secret(&self, leaf: LeafIndex, chain: ChainType) -> Vec<u8> {
		hkdf::expand_label(
			self.suite,
			&self.encryption_secret,
			chain.label(),
			&leaf.0.to_be_bytes(),
			self.suite.hash_size(),
		)
	}

	// sending: hand out the head of own chain and move it forward
	pub fn next_key(&mut self, leaf: LeafIndex, chain: ChainType) -> (KeyAndNonce, u32) {
		let suite = self.suite;
		let base = self.base_secret(leaf, chain);

		self.out_chains
			.entry((leaf.0, chain))
			.or_insert_with(|| HashRatchet::new(suite, base, MAX_GENERATION_SKIP))
			.next()
	}

	// receiving: run the sender's chain to the advertised generation
	pub fn key_for(
		&mut self,
		leaf: LeafIndex,
		chain: ChainType,
		generation: u32,
	) -> Result<KeyAndNonce, ratchet::Error> {
		let suite = self.suite;
		let base = self.base_secret(leaf, chain);

		self.in_chains
			.entry((leaf.0, chain))
			.or_insert_with(|| HashRatchet::new(suite, base, MAX_GENERATION_SKIP))
			.get(generation)
	}
}

// replicas converge on the epoch secret; everything else hangs off it
impl PartialEq for KeyScheduleEpoch {
	fn eq(&self, other: &Self) -> bool {
		self.suite == other.suite && self.epoch_secret == other.epoch_secret
	}
}

impl Drop for KeyScheduleEpoch {
	fn drop(&mut self) {
		self.joiner_secret.zeroize();
		self.epoch_secret.zeroize();
		self.sender_data_secret.zeroize();
		self.encryption_secret.zeroize();
		self.exporter_secret.zeroize();
		self.authentication_secret.zeroize();
		self.external_secret.zeroize();
		self.confirmation_key.zeroize();
		self.membership_key.zeroize();
		self.resumption_secret.zeroize();
		self.init_secret.zeroize();
	}
}
