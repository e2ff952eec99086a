use std::collections::HashMap;

use log::{debug, trace};
use rand::RngCore;

use crate::{
	aead,
	codec::{Deserializable, Serializable},
	error::Error,
	hash,
	hpke::HpkePrivateKey,
	key_package::{Extension, KeyPackage},
	key_schedule::{ChainType, KeyScheduleEpoch},
	messages::{
		Commit, Content, ContentType, GroupContext, GroupInfo, MLSCiphertext, MLSPlaintext,
		Proposal, ProposalId, SenderData, Welcome,
	},
	sig::SignaturePrivateKey,
	suite::Ciphersuite,
	treekem::{TreeKEMPrivateKey, TreeKEMPublicKey},
	treemath::{LeafIndex, NodeIndex},
};

// one member's replica of the group. proposals queue up here; a commit folds
// them into the tree and advances the epoch; honest replicas that process the
// same messages converge to equal states
#[derive(Clone)]
pub struct State {
	suite: Ciphersuite,
	group_id: Vec<u8>,
	epoch: u64,
	tree: TreeKEMPublicKey,
	tree_priv: TreeKEMPrivateKey,
	key_schedule: KeyScheduleEpoch,
	confirmed_transcript_hash: Vec<u8>,
	interim_transcript_hash: Vec<u8>,
	index: LeafIndex,
	identity_priv: SignaturePrivateKey,
	pending_proposals: Vec<MLSPlaintext>,
	// leaf secrets of own update proposals, installed when a commit covers them
	update_secrets: HashMap<ProposalId, Vec<u8>>,
	// own commits precomputed at commit() time; handling one short-circuits here
	pending_commits: HashMap<ProposalId, Box<State>>,
	extensions: Vec<Extension>,
}

impl State {
	// the group founder starts alone at epoch zero with all-zero schedule inputs
	pub fn founder(
		group_id: &[u8],
		suite: Ciphersuite,
		init_secret: &[u8],
		identity_priv: SignaturePrivateKey,
		key_package: &KeyPackage,
	) -> Result<Self, Error> {
		let mut tree = TreeKEMPublicKey::new(suite);
		let index = tree.add_leaf(key_package)?;
		tree.set_hash_all()?;

		let tree_priv = TreeKEMPrivateKey::create(suite, tree.size(), index, init_secret);

		let mut state = Self {
			suite,
			group_id: group_id.to_vec(),
			epoch: 0,
			tree,
			tree_priv,
			// replaced right below, once the context exists
			key_schedule: KeyScheduleEpoch::first(suite, b""),
			confirmed_transcript_hash: vec![],
			interim_transcript_hash: vec![],
			index,
			identity_priv,
			pending_proposals: vec![],
			update_secrets: HashMap::new(),
			pending_commits: HashMap::new(),
			extensions: vec![],
		};

		let ctx = state.group_context()?.serialize();
		state.key_schedule = KeyScheduleEpoch::first(suite, &ctx);

		debug!("founded group of size 1, epoch 0");

		Ok(state)
	}

	// a joiner bootstraps from a welcome; a welcome not addressed to this key
	// package is simply not ours
	pub fn from_welcome(
		init_secret: &[u8],
		identity_priv: SignaturePrivateKey,
		key_package: &KeyPackage,
		welcome: &Welcome,
	) -> Result<Option<Self>, Error> {
		let suite = welcome.cipher_suite;
		if key_package.suite != suite {
			return Err(Error::InvalidParameter("key package suite does not match the welcome"));
		}

		let secrets_index = match welcome.find(key_package) {
			Some(found) => found,
			None => return Ok(None),
		};

		let init_priv = HpkePrivateKey::derive(suite, init_secret);
		if init_priv.public_key() != &key_package.init_key {
			return Err(Error::InvalidParameter("init secret does not match the key package"));
		}

		let secrets = welcome.decrypt_secrets(secrets_index, &init_priv)?;
		let group_info = welcome.decrypt_group_info(&secrets.joiner_secret)?;

		if !group_info.verify()? {
			return Err(Error::InvalidSignature);
		}

		let mut tree = group_info.tree.clone();
		tree.set_hash_all()?;

		let index = tree
			.find(key_package)
			.ok_or(Error::Protocol("welcomed member is not in the tree"))?;
		let intersect = index.ancestor(group_info.signer_index);
		let tree_priv = TreeKEMPrivateKey::joiner(
			suite,
			tree.size(),
			index,
			init_secret,
			intersect,
			secrets.path_secret.as_deref(),
		);

		if !tree_priv.consistent(&tree) {
			return Err(Error::Protocol("welcome secrets do not match the tree"));
		}

		let ctx = GroupContext {
			group_id: group_info.group_id.clone(),
			epoch: group_info.epoch,
			tree_hash: tree.root_hash()?,
			confirmed_transcript_hash: group_info.confirmed_transcript_hash.clone(),
			extensions: vec![],
		};
		let key_schedule = KeyScheduleEpoch::from_joiner(suite, &secrets.joiner_secret, &ctx.serialize());

		if !key_schedule
			.verify_confirmation(&group_info.confirmed_transcript_hash, &group_info.confirmation)
		{
			return Err(Error::InvalidMac);
		}

		debug!("joined group at epoch {} as leaf {}", group_info.epoch, index.0);

		Ok(Some(Self {
			suite,
			group_id: group_info.group_id,
			epoch: group_info.epoch,
			tree,
			tree_priv,
			key_schedule,
			confirmed_transcript_hash: group_info.confirmed_transcript_hash,
			interim_transcript_hash: group_info.interim_transcript_hash,
			index,
			identity_priv,
			pending_proposals: vec![],
			update_secrets: HashMap::new(),
			pending_commits: HashMap::new(),
			extensions: vec![],
		}))
	}

	pub fn index(&self) -> LeafIndex {
		self.index
	}

	pub fn epoch(&self) -> u64 {
		self.epoch
	}

	pub fn group_id(&self) -> &[u8] {
		&self.group_id
	}

	pub fn tree(&self) -> &TreeKEMPublicKey {
		&self.tree
	}

	fn group_context(&self) -> Result<GroupContext, Error> {
		Ok(GroupContext {
			group_id: self.group_id.clone(),
			epoch: self.epoch,
			tree_hash: self.tree.root_hash()?,
			confirmed_transcript_hash: self.confirmed_transcript_hash.clone(),
			extensions: self.extensions.clone(),
		})
	}

	fn frame(&self, content: Content) -> Result<MLSPlaintext, Error> {
		let mut pt = MLSPlaintext::new(&self.group_id, self.epoch, self.index, content);

		pt.sign(self.suite, &self.group_context()?, &self.identity_priv);

		Ok(pt)
	}

	// propose adding a prospective member by their key package
	pub fn add(&self, key_package: &KeyPackage) -> Result<MLSPlaintext, Error> {
		if key_package.suite != self.suite {
			return Err(Error::InvalidParameter("key package suite does not match the group"));
		}

		if !key_package.verify() {
			return Err(Error::InvalidSignature);
		}

		if self.tree.find(key_package).is_some() {
			return Err(Error::InvalidParameter("already a member"));
		}

		self.frame(Content::Proposal(Proposal::Add { key_package: key_package.clone() }))
	}

	// propose rotating own leaf to a fresh secret; the secret is kept aside
	// until a commit covering the proposal installs it
	pub fn update(&mut self, leaf_secret: &[u8]) -> Result<MLSPlaintext, Error> {
		let leaf_priv = HpkePrivateKey::derive(self.suite, leaf_secret);
		let own_kp = self
			.tree
			.key_package(self.index)
			.ok_or(Error::InvalidParameter("own leaf is blank"))?;
		let kp = KeyPackage::new(
			self.suite,
			leaf_priv.public_key(),
			own_kp.credential.clone(),
			&self.identity_priv,
		);

		let pt = self.frame(Content::Proposal(Proposal::Update { key_package: kp }))?;

		self.update_secrets
			.insert(ProposalId::for_plaintext(self.suite, &pt), leaf_secret.to_vec());

		Ok(pt)
	}

	pub fn remove(&self, removed: LeafIndex) -> Result<MLSPlaintext, Error> {
		if self.tree.key_package(removed).is_none() {
			return Err(Error::InvalidParameter("no member at that leaf"));
		}

		self.frame(Content::Proposal(Proposal::Remove { removed }))
	}

	// feed a broadcast frame into the replica: proposals queue up and return
	// nothing, a commit yields the next state to swap in
	pub fn handle(&mut self, pt: &MLSPlaintext) -> Result<Option<State>, Error> {
		if pt.group_id != self.group_id {
			return Err(Error::Protocol("message from another group"));
		}

		if pt.epoch != self.epoch {
			return Err(Error::EpochMismatch { epoch: pt.epoch, current: self.epoch });
		}

		let sender_kp = self
			.tree
			.key_package(pt.sender)
			.ok_or(Error::Protocol("sender is not a member"))?;

		if !pt.verify(self.suite, &self.group_context()?, sender_kp.credential.public_key()) {
			return Err(Error::InvalidSignature);
		}

		match &pt.content {
			Content::Application(_) => {
				Err(Error::InvalidParameter("application data travels as ciphertext"))
			}
			Content::Proposal(_) => {
				trace!("queued proposal from leaf {} at epoch {}", pt.sender.0, pt.epoch);
				self.pending_proposals.push(pt.clone());

				Ok(None)
			}
			Content::Commit { commit, confirmation } => {
				self.handle_commit(pt, commit, confirmation).map(Some)
			}
		}
	}

	fn handle_commit(
		&mut self,
		pt: &MLSPlaintext,
		commit: &Commit,
		confirmation: &crate::hmac::Tag,
	) -> Result<State, Error> {
		if pt.sender == self.index {
			// our own commit: the next state was precomputed when it was made
			let id = ProposalId::for_plaintext(self.suite, pt);

			return self
				.pending_commits
				.remove(&id)
				.map(|cached| *cached)
				.ok_or(Error::InvalidParameter("own commit was never constructed here"));
		}

		let ordered = self.ordered_proposals(Some(&commit.proposals))?;

		// a committer cannot remove itself; the entropy source must survive
		if ordered.iter().any(|prop| {
			matches!(&prop.content, Content::Proposal(Proposal::Remove { removed }) if *removed == pt.sender)
		}) {
			return Err(Error::Protocol("commit by a removed member"));
		}

		let ctx_before = self.group_context()?.serialize();
		let mut next = self.next_epoch();
		next.apply_proposals(self, &ordered)?;
		next.tree.truncate();
		next.tree_priv.truncate(next.tree.size());

		let commit_secret = match &commit.path {
			Some(path) => {
				if !path.leaf_key_package.verify() {
					return Err(Error::InvalidSignature);
				}

				next.tree_priv.decap(pt.sender, &next.tree, &ctx_before, path)?;
				next.tree.merge(pt.sender, path)?;

				next.tree_priv.update_secret.clone()
			}
			None => {
				// only a pure-add commit may omit the path
				let adds_only = ordered.iter().all(|prop| {
					matches!(&prop.content, Content::Proposal(Proposal::Add { .. }))
				});

				if !adds_only {
					return Err(Error::Protocol("commit without a path must be adds only"));
				}

				vec![0u8; self.suite.hash_size()]
			}
		};

		next.advance_epoch(self, pt, &commit_secret)?;

		if !next.key_schedule.verify_confirmation(&next.confirmed_transcript_hash, confirmation) {
			return Err(Error::InvalidMac);
		}

		let auth_data = pt.commit_auth_data()?;
		next.interim_transcript_hash = hash::digest(
			self.suite,
			&[next.confirmed_transcript_hash.as_slice(), auth_data.as_slice()].concat(),
		)
		.to_vec();

		debug!(
			"applied commit from leaf {}: epoch {} -> {}, {} members",
			pt.sender.0,
			self.epoch,
			next.epoch,
			next.tree.size().0
		);

		Ok(next)
	}

	// fold the queued proposals into a commit: rotate own path, advance the
	// epoch, and welcome whoever was added
	pub fn commit(
		&mut self,
		leaf_secret: &[u8],
	) -> Result<(MLSPlaintext, Option<Welcome>, State), Error> {
		let ordered = self.ordered_proposals(None)?;

		if ordered.iter().any(|prop| {
			matches!(&prop.content, Content::Proposal(Proposal::Remove { removed }) if *removed == self.index)
		}) {
			return Err(Error::InvalidParameter("cannot commit own removal"));
		}

		let proposal_ids: Vec<ProposalId> =
			ordered.iter().map(|prop| ProposalId::for_plaintext(self.suite, prop)).collect();

		let ctx_before = self.group_context()?;
		let mut next = self.next_epoch();
		let joiners = next.apply_proposals(self, &ordered)?;
		next.tree.truncate();
		next.tree_priv.truncate(next.tree.size());

		let (new_priv, path) = next.tree.encap(
			self.index,
			&ctx_before.serialize(),
			leaf_secret,
			&self.identity_priv,
		)?;
		next.tree_priv = new_priv;
		let commit_secret = next.tree_priv.update_secret.clone();

		let commit = Commit { proposals: proposal_ids, path: Some(path) };
		let mut pt = MLSPlaintext::new(
			&self.group_id,
			self.epoch,
			self.index,
			Content::Commit { commit, confirmation: crate::hmac::Tag([0u8; 32]) },
		);

		next.advance_epoch(self, &pt, &commit_secret)?;

		let confirmation = next.key_schedule.confirmation(&next.confirmed_transcript_hash);
		if let Content::Commit { confirmation: slot, .. } = &mut pt.content {
			*slot = confirmation;
		}

		pt.sign(self.suite, &ctx_before, &self.identity_priv);

		let auth_data = pt.commit_auth_data()?;
		next.interim_transcript_hash = hash::digest(
			self.suite,
			&[next.confirmed_transcript_hash.as_slice(), auth_data.as_slice()].concat(),
		)
		.to_vec();

		let welcome = next.welcome(self.index, &joiners, &confirmation)?;

		self.pending_commits
			.insert(ProposalId::for_plaintext(self.suite, &pt), Box::new(next.clone()));

		debug!(
			"committed {} proposals: epoch {} -> {}, {} joiners",
			pt_proposal_count(&pt),
			self.epoch,
			next.epoch,
			joiners.len()
		);

		Ok((pt, welcome, next))
	}

	// a working copy one epoch ahead with all queues cleared
	fn next_epoch(&self) -> State {
		let mut next = self.clone();

		next.epoch += 1;
		next.pending_proposals.clear();
		next.update_secrets.clear();
		next.pending_commits.clear();

		next
	}

	// resolve commit references against the queue and put them in canonical
	// order: updates, then removes, then adds. the committer walks its queue
	// in arrival order; receivers follow the order the commit pinned, so
	// replicas agree even when proposals reached them differently
	fn ordered_proposals(&self, ids: Option<&[ProposalId]>) -> Result<Vec<MLSPlaintext>, Error> {
		let candidates: Vec<MLSPlaintext> = match ids {
			None => self.pending_proposals.clone(),
			Some(ids) => ids
				.iter()
				.map(|id| {
					self.pending_proposals
						.iter()
						.find(|pt| ProposalId::for_plaintext(self.suite, pt) == *id)
						.cloned()
						.ok_or(Error::UnknownProposal)
				})
				.collect::<Result<_, _>>()?,
		};

		let rank = |pt: &MLSPlaintext| match &pt.content {
			Content::Proposal(Proposal::Update { .. }) => 0,
			Content::Proposal(Proposal::Remove { .. }) => 1,
			_ => 2,
		};

		let mut ordered = Vec::with_capacity(candidates.len());
		for pass in 0..3 {
			ordered.extend(candidates.iter().filter(|pt| rank(pt) == pass).cloned());
		}

		Ok(ordered)
	}

	// mutate the working copy's tree; `prev` still holds the cached secrets
	// of own update proposals
	fn apply_proposals(
		&mut self,
		prev: &State,
		ordered: &[MLSPlaintext],
	) -> Result<Vec<(LeafIndex, KeyPackage)>, Error> {
		let mut joiners = Vec::new();

		for pt in ordered {
			let proposal = match &pt.content {
				Content::Proposal(proposal) => proposal,
				_ => return Err(Error::Protocol("commit references a non-proposal")),
			};

			match proposal {
				Proposal::Update { key_package } => {
					if !key_package.verify() {
						return Err(Error::InvalidSignature);
					}

					self.tree.update_leaf(pt.sender, key_package)?;

					if pt.sender == prev.index {
						let id = ProposalId::for_plaintext(prev.suite, pt);
						let secret = prev
							.update_secrets
							.get(&id)
							.ok_or(Error::Protocol("own update with no cached secret"))?;

						self.tree_priv = TreeKEMPrivateKey::joiner(
							prev.suite,
							self.tree.size(),
							prev.index,
							secret,
							NodeIndex::from(prev.index),
							None,
						);
					}
				}
				Proposal::Remove { removed } => {
					self.tree.blank_path(*removed)?;
				}
				Proposal::Add { key_package } => {
					if !key_package.verify() {
						return Err(Error::InvalidSignature);
					}

					let index = self.tree.add_leaf(key_package)?;
					joiners.push((index, key_package.clone()));
				}
			}
		}

		Ok(joiners)
	}

	// transcript and key schedule for the new epoch, shared by the commit
	// maker and every receiver
	fn advance_epoch(
		&mut self,
		prev: &State,
		pt: &MLSPlaintext,
		commit_secret: &[u8],
	) -> Result<(), Error> {
		let commit_content = pt.commit_content()?;
		self.confirmed_transcript_hash = hash::digest(
			self.suite,
			&[prev.interim_transcript_hash.as_slice(), commit_content.as_slice()].concat(),
		)
		.to_vec();

		self.tree.set_hash_all()?;

		let ctx = self.group_context()?.serialize();
		self.key_schedule =
			KeyScheduleEpoch::new(self.suite, &prev.key_schedule.init_secret, commit_secret, &ctx);

		Ok(())
	}

	fn welcome(
		&self,
		signer: LeafIndex,
		joiners: &[(LeafIndex, KeyPackage)],
		confirmation: &crate::hmac::Tag,
	) -> Result<Option<Welcome>, Error> {
		if joiners.is_empty() {
			return Ok(None);
		}

		let mut group_info = GroupInfo {
			group_id: self.group_id.clone(),
			epoch: self.epoch,
			tree: self.tree.clone(),
			confirmed_transcript_hash: self.confirmed_transcript_hash.clone(),
			interim_transcript_hash: self.interim_transcript_hash.clone(),
			confirmation: *confirmation,
			signer_index: signer,
			signature: crate::sig::Signature::new(vec![]),
		};
		group_info.sign(signer, &self.identity_priv)?;

		let mut welcome =
			Welcome::new(self.suite, &self.key_schedule.joiner_secret, &group_info)?;
		for (leaf, kp) in joiners {
			let path_secret = self.tree_priv.shared_path_secret(*leaf).map(|(_, secret)| secret);

			welcome.encrypt(kp, &self.key_schedule.joiner_secret, path_secret.as_deref())?;
		}

		Ok(Some(welcome))
	}

	// wrap application data for the group: sign it, then seal it under the
	// next key of own application chain
	pub fn protect(&mut self, data: &[u8]) -> Result<MLSCiphertext, Error> {
		let mut pt = MLSPlaintext::new(
			&self.group_id,
			self.epoch,
			self.index,
			Content::Application(data.to_vec()),
		);
		pt.sign(self.suite, &self.group_context()?, &self.identity_priv);

		let (material, generation) = self.key_schedule.next_key(self.index, ChainType::Application);

		let mut sender_data_nonce = vec![0u8; self.suite.nonce_size()];
		rand::thread_rng().fill_bytes(&mut sender_data_nonce);

		let mut ct = MLSCiphertext {
			group_id: self.group_id.clone(),
			epoch: self.epoch,
			content_type: ContentType::Application,
			sender_data_nonce,
			encrypted_sender_data: vec![],
			ciphertext: vec![],
		};
		let aad = ct.aad();

		ct.ciphertext =
			aead::seal(self.suite, &material.key, &material.nonce, &aad, &pt.marshal_content())?;

		let sender_data = SenderData { sender: self.index, generation };
		ct.encrypted_sender_data = aead::seal(
			self.suite,
			&self.key_schedule.sender_data_key(),
			&ct.sender_data_nonce,
			&aad,
			&sender_data.serialize(),
		)?;

		Ok(ct)
	}

	// locate the sender's chain, step to the advertised generation within the
	// window, decrypt and check the inner signature
	pub fn unprotect(&mut self, ct: &MLSCiphertext) -> Result<Vec<u8>, Error> {
		if ct.group_id != self.group_id {
			return Err(Error::Protocol("message from another group"));
		}

		if ct.epoch != self.epoch {
			return Err(Error::EpochMismatch { epoch: ct.epoch, current: self.epoch });
		}

		if ct.content_type != ContentType::Application {
			return Err(Error::Protocol("only application messages are protected"));
		}

		let aad = ct.aad();
		let sender_data_raw = aead::open(
			self.suite,
			&self.key_schedule.sender_data_key(),
			&ct.sender_data_nonce,
			&aad,
			&ct.encrypted_sender_data,
		)?;
		let sender_data = SenderData::deserialize(&sender_data_raw)?;

		let sender_kp = self
			.tree
			.key_package(sender_data.sender)
			.ok_or(Error::Protocol("sender is not a member"))?;

		let material = self
			.key_schedule
			.key_for(sender_data.sender, ChainType::Application, sender_data.generation)
			.or(Err(Error::Decryption))?;
		let content = aead::open(self.suite, &material.key, &material.nonce, &aad, &ct.ciphertext)?;

		let pt = MLSPlaintext::unmarshal_content(
			&self.group_id,
			self.epoch,
			sender_data.sender,
			&content,
		)?;

		if !pt.verify(self.suite, &self.group_context()?, sender_kp.credential.public_key()) {
			return Err(Error::InvalidSignature);
		}

		match pt.content {
			Content::Application(data) => Ok(data),
			_ => Err(Error::Protocol("protected frame did not carry application data")),
		}
	}
}

fn pt_proposal_count(pt: &MLSPlaintext) -> usize {
	match &pt.content {
		Content::Commit { commit, .. } => commit.proposals.len(),
		_ => 0,
	}
}

// convergence is observable state: same group, same epoch, same tree, same
// transcripts, same epoch secret
impl PartialEq for State {
	fn eq(&self, other: &Self) -> bool {
		self.group_id == other.group_id
			&& self.epoch == other.epoch
			&& self.tree.root_hash().ok() == other.tree.root_hash().ok()
			&& self.confirmed_transcript_hash == other.confirmed_transcript_hash
			&& self.interim_transcript_hash == other.interim_transcript_hash
			&& self.key_schedule == other.key_schedule
	}
}

impl std::fmt::Debug for State {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("State")
			.field("group_id", &self.group_id)
			.field("epoch", &self.epoch)
			.field("index", &self.index.0)
			.field("members", &self.tree.size().0)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::State;
	use crate::{
		codec::{Deserializable, Serializable},
		error::Error,
		hash, hmac,
		hpke::HpkePrivateKey,
		key_package::{Credential, KeyPackage},
		messages::{Commit, Content, MLSPlaintext, ProposalId, Welcome},
		sig::SignaturePrivateKey,
		suite::Ciphersuite,
		treemath::LeafIndex,
	};

	const SUITE: Ciphersuite = Ciphersuite::X25519Aes128Sha256Ed25519;
	const GROUP_ID: &[u8] = &[0x00, 0x01, 0x02, 0x03];
	const TEST_MESSAGE: &[u8] = &[0x01, 0x02, 0x03, 0x04];

	struct Actor {
		init_secret: Vec<u8>,
		identity_priv: SignaturePrivateKey,
		kp: KeyPackage,
	}

	fn make_actor(seed: u8) -> Actor {
		let init_secret = vec![seed; 32];
		let identity_priv = SignaturePrivateKey::generate(SUITE);
		let init_priv = HpkePrivateKey::derive(SUITE, &init_secret);
		let kp = KeyPackage::new(
			SUITE,
			init_priv.public_key(),
			Credential::basic(&[b'u', seed], identity_priv.public_key()),
			&identity_priv,
		);

		Actor { init_secret, identity_priv, kp }
	}

	fn fresh_secret(seed: u8) -> Vec<u8> {
		vec![seed.wrapping_mul(17).wrapping_add(1); 32]
	}

	fn assert_all_equal(states: &[State]) {
		states.iter().for_each(|state| {
			assert_eq!(state, &states[0]);
		});
	}

	fn assert_all_can_talk(states: &mut [State]) {
		(0..states.len()).for_each(|i| {
			let ct = states[i].protect(TEST_MESSAGE).unwrap();

			(0..states.len()).for_each(|j| {
				assert_eq!(states[j].unprotect(&ct).unwrap(), TEST_MESSAGE.to_vec());
			});
		});
	}

	// a commit that omits the path and carries an all-zero commit secret, the
	// way a committer that only adds members may send it
	fn pathless_commit(committer: &State, ids: Vec<ProposalId>) -> (MLSPlaintext, State) {
		let ordered = committer.ordered_proposals(Some(&ids)).unwrap();
		let ctx_before = committer.group_context().unwrap();
		let mut next = committer.next_epoch();
		next.apply_proposals(committer, &ordered).unwrap();
		next.tree.truncate();
		next.tree_priv.truncate(next.tree.size());

		let commit_secret = vec![0u8; committer.suite.hash_size()];
		let mut pt = MLSPlaintext::new(
			committer.group_id(),
			committer.epoch(),
			committer.index(),
			Content::Commit {
				commit: Commit { proposals: ids, path: None },
				confirmation: hmac::Tag([0u8; 32]),
			},
		);

		next.advance_epoch(committer, &pt, &commit_secret).unwrap();

		let confirmation = next.key_schedule.confirmation(&next.confirmed_transcript_hash);
		if let Content::Commit { confirmation: slot, .. } = &mut pt.content {
			*slot = confirmation;
		}

		pt.sign(committer.suite, &ctx_before, &committer.identity_priv);

		let auth_data = pt.commit_auth_data().unwrap();
		next.interim_transcript_hash = hash::digest(
			committer.suite,
			&[next.confirmed_transcript_hash.as_slice(), auth_data.as_slice()].concat(),
		)
		.to_vec();

		(pt, next)
	}

	// founder plus joiners added in one batched commit
	fn make_group(actors: &[Actor]) -> Vec<State> {
		let mut founder_state = State::founder(
			GROUP_ID,
			SUITE,
			&actors[0].init_secret,
			actors[0].identity_priv.clone(),
			&actors[0].kp,
		)
		.unwrap();

		for actor in &actors[1..] {
			let add = founder_state.add(&actor.kp).unwrap();
			assert!(founder_state.handle(&add).unwrap().is_none());
		}

		let (_, welcome, new_state) = founder_state.commit(&fresh_secret(100)).unwrap();
		let welcome = welcome.unwrap();

		let mut states = vec![new_state];
		for actor in &actors[1..] {
			states.push(
				State::from_welcome(
					&actor.init_secret,
					actor.identity_priv.clone(),
					&actor.kp,
					&welcome,
				)
				.unwrap()
				.unwrap(),
			);
		}

		states
	}

	#[test]
	fn test_two_person_group() {
		let alice = make_actor(1);
		let bob = make_actor(2);

		let mut alice_state = State::founder(
			GROUP_ID,
			SUITE,
			&alice.init_secret,
			alice.identity_priv.clone(),
			&alice.kp,
		)
		.unwrap();

		let add = alice_state.add(&bob.kp).unwrap();
		assert!(alice_state.handle(&add).unwrap().is_none());

		let (_, welcome, mut alice_state) = alice_state.commit(&fresh_secret(1)).unwrap();
		let mut bob_state = State::from_welcome(
			&bob.init_secret,
			bob.identity_priv.clone(),
			&bob.kp,
			&welcome.unwrap(),
		)
		.unwrap()
		.unwrap();

		assert_eq!(alice_state, bob_state);
		assert_eq!(alice_state.epoch(), 1);
		assert_eq!(bob_state.index(), LeafIndex(1));

		let ct = alice_state.protect(TEST_MESSAGE).unwrap();
		assert_eq!(bob_state.unprotect(&ct).unwrap(), TEST_MESSAGE.to_vec());

		let reply = bob_state.protect(b"pong").unwrap();
		assert_eq!(alice_state.unprotect(&reply).unwrap(), b"pong".to_vec());
	}

	#[test]
	fn test_five_person_sequential_add() {
		let actors: Vec<Actor> = (1..=5).map(make_actor).collect();
		let mut states = vec![State::founder(
			GROUP_ID,
			SUITE,
			&actors[0].init_secret,
			actors[0].identity_priv.clone(),
			&actors[0].kp,
		)
		.unwrap()];

		for i in 1..5 {
			let sender = i - 1;

			let add = states[sender].add(&actors[i].kp).unwrap();
			states[sender].handle(&add).unwrap();

			let (commit, welcome, new_state) = states[sender].commit(&fresh_secret(i as u8)).unwrap();

			for j in 0..states.len() {
				if j == sender {
					states[j] = new_state.clone();
				} else {
					states[j].handle(&add).unwrap();
					states[j] = states[j].handle(&commit).unwrap().unwrap();
				}
			}

			states.push(
				State::from_welcome(
					&actors[i].init_secret,
					actors[i].identity_priv.clone(),
					&actors[i].kp,
					&welcome.unwrap(),
				)
				.unwrap()
				.unwrap(),
			);

			assert_all_equal(&states);
			assert_all_can_talk(&mut states);
		}
	}

	#[test]
	fn test_five_person_batched_add() {
		let actors: Vec<Actor> = (1..=5).map(make_actor).collect();
		let states = make_group(&actors);

		assert_eq!(states.len(), 5);
		assert_all_equal(&states);

		let mut states = states;
		assert_all_can_talk(&mut states);
	}

	#[test]
	fn test_update_cycle() {
		let actors: Vec<Actor> = (1..=5).map(make_actor).collect();
		let mut states = make_group(&actors);

		for i in 0..5 {
			let new_leaf = fresh_secret(40 + i as u8);
			let update = states[i].update(&new_leaf).unwrap();
			states[i].handle(&update).unwrap();

			let (commit, welcome, new_state) = states[i].commit(&new_leaf).unwrap();
			assert!(welcome.is_none());

			for j in 0..5 {
				if j == i {
					states[j] = new_state.clone();
				} else {
					states[j].handle(&update).unwrap();
					states[j] = states[j].handle(&commit).unwrap().unwrap();
				}
			}

			assert_all_equal(&states);

			// the updated leaf now advertises the fresh key everywhere
			let expected = HpkePrivateKey::derive(SUITE, &new_leaf);
			states.iter().for_each(|state| {
				assert_eq!(
					&state.tree().key_package(LeafIndex(i as u32)).unwrap().init_key,
					expected.public_key(),
				);
			});
		}

		assert_all_can_talk(&mut states);
	}

	#[test]
	fn test_remove_tail() {
		let actors: Vec<Actor> = (1..=5).map(make_actor).collect();
		let mut states = make_group(&actors);

		for i in [3usize, 2, 1] {
			let remove = states[i].remove(LeafIndex(i as u32 + 1)).unwrap();
			states[i].handle(&remove).unwrap();

			let (commit, welcome, new_state) = states[i].commit(&fresh_secret(60 + i as u8)).unwrap();
			assert!(welcome.is_none());

			// the removed member's replica is simply discarded
			states.pop();

			for j in 0..states.len() {
				if j == i {
					states[j] = new_state.clone();
				} else {
					states[j].handle(&remove).unwrap();
					states[j] = states[j].handle(&commit).unwrap().unwrap();
				}
			}

			// the tree shrank with the departed tail
			states.iter().for_each(|state| {
				assert_eq!(state.tree().size().0 as usize, i + 1);
			});
			assert_all_equal(&states);
			assert_all_can_talk(&mut states);
		}
	}

	#[test]
	fn test_two_person_group_every_suite() {
		[
			Ciphersuite::P256Aes128Sha256P256,
			Ciphersuite::X25519ChaCha20Sha256Ed25519,
		]
		.into_iter()
		.for_each(|suite| {
			let make = |seed: u8| {
				let init_secret = vec![seed; 32];
				let identity_priv = SignaturePrivateKey::generate(suite);
				let init_priv = HpkePrivateKey::derive(suite, &init_secret);
				let kp = KeyPackage::new(
					suite,
					init_priv.public_key(),
					Credential::basic(&[b's', seed], identity_priv.public_key()),
					&identity_priv,
				);

				(init_secret, identity_priv, kp)
			};

			let (a_init, a_priv, a_kp) = make(1);
			let (b_init, b_priv, b_kp) = make(2);

			let mut a_state =
				State::founder(GROUP_ID, suite, &a_init, a_priv, &a_kp).unwrap();
			let add = a_state.add(&b_kp).unwrap();
			a_state.handle(&add).unwrap();

			let (_, welcome, mut a_state) = a_state.commit(&fresh_secret(3)).unwrap();
			let mut b_state = State::from_welcome(&b_init, b_priv, &b_kp, &welcome.unwrap())
				.unwrap()
				.unwrap();

			assert_eq!(a_state, b_state);

			let ct = a_state.protect(TEST_MESSAGE).unwrap();
			assert_eq!(b_state.unprotect(&ct).unwrap(), TEST_MESSAGE.to_vec());
		});
	}

	#[test]
	fn test_welcome_misrouting() {
		let alice = make_actor(1);
		let bob = make_actor(2);
		let carol = make_actor(3);

		let mut alice_state = State::founder(
			GROUP_ID,
			SUITE,
			&alice.init_secret,
			alice.identity_priv.clone(),
			&alice.kp,
		)
		.unwrap();
		let add = alice_state.add(&bob.kp).unwrap();
		alice_state.handle(&add).unwrap();
		let (_, welcome, _) = alice_state.commit(&fresh_secret(1)).unwrap();

		// the welcome was meant for bob; carol finds nothing addressed to her
		let not_hers = State::from_welcome(
			&carol.init_secret,
			carol.identity_priv.clone(),
			&carol.kp,
			&welcome.unwrap(),
		)
		.unwrap();

		assert!(not_hers.is_none());
	}

	#[test]
	fn test_pathless_add_commit_accepted() {
		let actors: Vec<Actor> = (1..=2).map(make_actor).collect();
		let mut states = make_group(&actors);
		let carol = make_actor(3);

		let add = states[0].add(&carol.kp).unwrap();
		states[0].handle(&add).unwrap();
		states[1].handle(&add).unwrap();

		let ids = vec![ProposalId::for_plaintext(SUITE, &add)];
		let (commit, next) = pathless_commit(&states[0], ids);

		// an adds-only commit needs no path; the receiver lands on the same
		// state the committer computed
		let handled = states[1].handle(&commit).unwrap().unwrap();
		assert_eq!(handled, next);
		assert_eq!(handled.epoch(), 2);
		assert_eq!(handled.tree().size().0, 3);
		assert!(handled.tree().key_package(LeafIndex(2)).is_some());
	}

	#[test]
	fn test_pathless_commit_must_be_adds_only() {
		let actors: Vec<Actor> = (1..=2).map(make_actor).collect();
		let mut states = make_group(&actors);

		let update = states[0].update(&fresh_secret(71)).unwrap();
		states[0].handle(&update).unwrap();
		states[1].handle(&update).unwrap();

		let ids = vec![ProposalId::for_plaintext(SUITE, &update)];
		let (commit, _) = pathless_commit(&states[0], ids);

		// anything beyond adds rotates keys, so the path is mandatory
		assert_eq!(
			states[1].handle(&commit).err(),
			Some(Error::Protocol("commit without a path must be adds only"))
		);

		// the rejected commit left the receiver untouched
		assert_eq!(states[1].epoch(), 1);
	}

	#[test]
	fn test_own_commit_short_circuits() {
		let actors: Vec<Actor> = (1..=2).map(make_actor).collect();
		let mut states = make_group(&actors);

		let update = states[0].update(&fresh_secret(7)).unwrap();
		states[0].handle(&update).unwrap();
		let (commit, _, new_state) = states[0].commit(&fresh_secret(7)).unwrap();

		// handling our own commit returns the state commit() precomputed
		let handled = states[0].handle(&commit).unwrap().unwrap();
		assert_eq!(handled, new_state);

		// but only once; a second handling has nothing to resolve to
		assert!(states[0].handle(&commit).is_err());
	}

	#[test]
	fn test_epoch_mismatch_rejected() {
		let actors: Vec<Actor> = (1..=3).map(make_actor).collect();
		let mut states = make_group(&actors);

		let update = states[1].update(&fresh_secret(9)).unwrap();
		states[1].handle(&update).unwrap();
		let (commit, _, new_state) = states[1].commit(&fresh_secret(9)).unwrap();

		states[0].handle(&update).unwrap();
		states[0] = states[0].handle(&commit).unwrap().unwrap();
		states[1] = new_state;

		// replaying the old-epoch commit is refused
		assert!(matches!(
			states[0].handle(&commit),
			Err(Error::EpochMismatch { epoch: 1, current: 2 })
		));
	}

	#[test]
	fn test_unknown_proposal_rejected() {
		let actors: Vec<Actor> = (1..=3).map(make_actor).collect();
		let mut states = make_group(&actors);

		let update = states[0].update(&fresh_secret(11)).unwrap();
		states[0].handle(&update).unwrap();
		let (commit, _, _) = states[0].commit(&fresh_secret(11)).unwrap();

		// member 1 never saw the update proposal this commit references
		assert_eq!(states[1].handle(&commit).err(), Some(Error::UnknownProposal));
	}

	#[test]
	fn test_tampered_commit_rejected() {
		let actors: Vec<Actor> = (1..=3).map(make_actor).collect();
		let mut states = make_group(&actors);

		let update = states[0].update(&fresh_secret(13)).unwrap();
		states[0].handle(&update).unwrap();
		let (commit, _, _) = states[0].commit(&fresh_secret(13)).unwrap();

		states[1].handle(&update).unwrap();
		states[2].handle(&update).unwrap();

		// flip one byte anywhere in the frame: some check along the way fails
		let bytes = commit.serialize();
		let mut tampered = bytes.clone();
		let last = tampered.len() - 1;
		tampered[last] ^= 1;

		match MLSPlaintext::deserialize(&tampered) {
			Ok(pt) => assert!(states[1].handle(&pt).is_err()),
			Err(_) => {}
		}

		// and the untampered frame still applies cleanly
		let pt = MLSPlaintext::deserialize(&bytes).unwrap();
		states[1] = states[1].handle(&pt).unwrap().unwrap();
	}

	#[test]
	fn test_forward_secrecy_on_epoch_advance() {
		let actors: Vec<Actor> = (1..=2).map(make_actor).collect();
		let mut states = make_group(&actors);

		let old_epoch_secret = states[0].key_schedule.epoch_secret.clone();
		let old_init = states[0].key_schedule.init_secret.clone();

		let update = states[0].update(&fresh_secret(21)).unwrap();
		states[0].handle(&update).unwrap();
		let (_, _, new_state) = states[0].commit(&fresh_secret(21)).unwrap();

		// the new epoch's secrets moved on, and the previous epoch secret is
		// not among anything the new state retains
		assert_ne!(new_state.key_schedule.epoch_secret, old_epoch_secret);
		assert_ne!(new_state.key_schedule.init_secret, old_init);
		assert_ne!(new_state.key_schedule.epoch_secret, old_init);
	}

	#[test]
	fn test_commit_and_welcome_survive_the_wire() {
		let alice = make_actor(1);
		let bob = make_actor(2);

		let mut alice_state = State::founder(
			GROUP_ID,
			SUITE,
			&alice.init_secret,
			alice.identity_priv.clone(),
			&alice.kp,
		)
		.unwrap();
		let add = alice_state.add(&bob.kp).unwrap();

		// the proposal survives encoding before it is handled
		let add = MLSPlaintext::deserialize(&add.serialize()).unwrap();
		alice_state.handle(&add).unwrap();

		let (commit, welcome, new_state) = alice_state.commit(&fresh_secret(31)).unwrap();
		let commit = MLSPlaintext::deserialize(&commit.serialize()).unwrap();
		let welcome = Welcome::deserialize(&welcome.unwrap().serialize()).unwrap();

		// the sender can still resolve the re-decoded commit to its cached state
		let handled = alice_state.handle(&commit).unwrap().unwrap();
		assert_eq!(handled, new_state);

		let bob_state =
			State::from_welcome(&bob.init_secret, bob.identity_priv.clone(), &bob.kp, &welcome)
				.unwrap()
				.unwrap();
		assert_eq!(bob_state, new_state);
	}

	#[test]
	fn test_stale_application_message_rejected_across_epochs() {
		let actors: Vec<Actor> = (1..=2).map(make_actor).collect();
		let mut states = make_group(&actors);

		let ct = states[0].protect(TEST_MESSAGE).unwrap();

		let update = states[1].update(&fresh_secret(51)).unwrap();
		states[1].handle(&update).unwrap();
		let (commit, _, new_state) = states[1].commit(&fresh_secret(51)).unwrap();
		states[0].handle(&update).unwrap();
		states[0] = states[0].handle(&commit).unwrap().unwrap();
		states[1] = new_state;

		// the ciphertext was sealed in the previous epoch
		assert!(matches!(
			states[1].unprotect(&ct),
			Err(Error::EpochMismatch { epoch: 1, current: 2 })
		));
	}
}
