use crate::{
	aead,
	codec::{self, Deserializable, Reader, Serializable},
	error::Error,
	hash::{self, Hashable},
	hmac,
	hpke::{HpkeCiphertext, HpkePrivateKey},
	key_package::{self, Extension, KeyPackage},
	key_schedule::KeyScheduleEpoch,
	sig::{Signature, SignaturePrivateKey, SignaturePublicKey},
	suite::Ciphersuite,
	treekem::{DirectPath, TreeKEMPublicKey},
	treemath::LeafIndex,
};

// the shared state every signature and key schedule binds to
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct GroupContext {
	pub group_id: Vec<u8>,
	pub epoch: u64,
	pub tree_hash: Vec<u8>,
	pub confirmed_transcript_hash: Vec<u8>,
	pub extensions: Vec<Extension>,
}

impl Serializable for GroupContext {
	fn encode(&self, buf: &mut Vec<u8>) {
		codec::write_opaque8(buf, &self.group_id);
		codec::write_u64(buf, self.epoch);
		codec::write_opaque8(buf, &self.tree_hash);
		codec::write_opaque8(buf, &self.confirmed_transcript_hash);
		key_package::encode_extensions(buf, &self.extensions);
	}
}

impl Deserializable for GroupContext {
	fn decode(r: &mut Reader) -> Result<Self, codec::Error> {
		Ok(Self {
			group_id: r.read_opaque8()?,
			epoch: r.read_u64()?,
			tree_hash: r.read_opaque8()?,
			confirmed_transcript_hash: r.read_opaque8()?,
			extensions: key_package::decode_extensions(r)?,
		})
	}
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Proposal {
	Add { key_package: KeyPackage },
	Update { key_package: KeyPackage },
	Remove { removed: LeafIndex },
}

impl Serializable for Proposal {
	fn encode(&self, buf: &mut Vec<u8>) {
		match self {
			Proposal::Add { key_package } => {
				codec::write_u8(buf, 1);
				key_package.encode(buf);
			}
			Proposal::Update { key_package } => {
				codec::write_u8(buf, 2);
				key_package.encode(buf);
			}
			Proposal::Remove { removed } => {
				codec::write_u8(buf, 3);
				codec::write_u32(buf, removed.0);
			}
		}
	}
}

impl Deserializable for Proposal {
	fn decode(r: &mut Reader) -> Result<Self, codec::Error> {
		match r.read_u8()? {
			1 => Ok(Proposal::Add { key_package: KeyPackage::decode(r)? }),
			2 => Ok(Proposal::Update { key_package: KeyPackage::decode(r)? }),
			3 => Ok(Proposal::Remove { removed: LeafIndex(r.read_u32()?) }),
			tag => Err(codec::Error::BadTag(tag)),
		}
	}
}

// a commit names proposals by the digest of the framed message carrying them
#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub struct ProposalId(pub Vec<u8>);

impl ProposalId {
	pub fn for_plaintext(suite: Ciphersuite, pt: &MLSPlaintext) -> Self {
		Self(hash::digest(suite, &pt.serialize()).to_vec())
	}
}

impl Serializable for ProposalId {
	fn encode(&self, buf: &mut Vec<u8>) {
		codec::write_opaque8(buf, &self.0);
	}
}

impl Deserializable for ProposalId {
	fn decode(r: &mut Reader) -> Result<Self, codec::Error> {
		Ok(Self(r.read_opaque8()?))
	}
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Commit {
	pub proposals: Vec<ProposalId>,
	pub path: Option<DirectPath>,
}

impl Serializable for Commit {
	fn encode(&self, buf: &mut Vec<u8>) {
		let mut body = Vec::new();
		self.proposals.iter().for_each(|id| id.encode(&mut body));
		codec::write_opaque32(buf, &body);
		codec::write_optional(buf, &self.path);
	}
}

impl Deserializable for Commit {
	fn decode(r: &mut Reader) -> Result<Self, codec::Error> {
		let body = r.read_opaque32()?;
		let mut br = Reader::new(&body);
		let mut proposals = Vec::new();

		while !br.is_empty() {
			proposals.push(ProposalId::decode(&mut br)?);
		}

		Ok(Self { proposals, path: r.read_optional()? })
	}
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ContentType {
	Application,
	Proposal,
	Commit,
}

impl ContentType {
	pub fn code(&self) -> u8 {
		match self {
			ContentType::Application => 1,
			ContentType::Proposal => 2,
			ContentType::Commit => 3,
		}
	}
}

impl TryFrom<u8> for ContentType {
	type Error = codec::Error;

	fn try_from(code: u8) -> Result<Self, codec::Error> {
		match code {
			1 => Ok(ContentType::Application),
			2 => Ok(ContentType::Proposal),
			3 => Ok(ContentType::Commit),
			tag => Err(codec::Error::BadTag(tag)),
		}
	}
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Content {
	Application(Vec<u8>),
	Proposal(Proposal),
	Commit { commit: Commit, confirmation: hmac::Tag },
}

impl Content {
	pub fn content_type(&self) -> ContentType {
		match self {
			Content::Application(_) => ContentType::Application,
			Content::Proposal(_) => ContentType::Proposal,
			Content::Commit { .. } => ContentType::Commit,
		}
	}
}

impl Serializable for Content {
	fn encode(&self, buf: &mut Vec<u8>) {
		codec::write_u8(buf, self.content_type().code());
		match self {
			Content::Application(data) => codec::write_opaque32(buf, data),
			Content::Proposal(proposal) => proposal.encode(buf),
			Content::Commit { commit, confirmation } => {
				commit.encode(buf);
				codec::write_opaque8(buf, confirmation.as_bytes());
			}
		}
	}
}

impl Deserializable for Content {
	fn decode(r: &mut Reader) -> Result<Self, codec::Error> {
		match ContentType::try_from(r.read_u8()?)? {
			ContentType::Application => Ok(Content::Application(r.read_opaque32()?)),
			ContentType::Proposal => Ok(Content::Proposal(Proposal::decode(r)?)),
			ContentType::Commit => Ok(Content::Commit {
				commit: Commit::decode(r)?,
				confirmation: hmac::Tag::try_from(r.read_opaque8()?)
					.or(Err(codec::Error::BadLength))?,
			}),
		}
	}
}

// the signed frame every handshake and application message travels in
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct MLSPlaintext {
	pub group_id: Vec<u8>,
	pub epoch: u64,
	pub sender: LeafIndex,
	pub authenticated_data: Vec<u8>,
	pub content: Content,
	pub signature: Signature,
}

impl MLSPlaintext {
	pub fn new(group_id: &[u8], epoch: u64, sender: LeafIndex, content: Content) -> Self {
		Self {
			group_id: group_id.to_vec(),
			epoch,
			sender,
			authenticated_data: vec![],
			content,
			signature: Signature::new(vec![]),
		}
	}

	// "this sender says this content in this group state"
	fn to_be_signed(&self, ctx: &GroupContext) -> Vec<u8> {
		let mut buf = ctx.serialize();

		codec::write_opaque8(&mut buf, &self.group_id);
		codec::write_u64(&mut buf, self.epoch);
		codec::write_u32(&mut buf, self.sender.0);
		codec::write_opaque32(&mut buf, &self.authenticated_data);
		self.content.encode(&mut buf);

		buf
	}

	pub fn sign(
		&mut self,
		suite: Ciphersuite,
		ctx: &GroupContext,
		identity_priv: &SignaturePrivateKey,
	) {
		self.signature = identity_priv.sign(suite, &self.to_be_signed(ctx));
	}

	pub fn verify(
		&self,
		suite: Ciphersuite,
		ctx: &GroupContext,
		public_key: &SignaturePublicKey,
	) -> bool {
		public_key.verify(suite, &self.to_be_signed(ctx), &self.signature)
	}

	// what the confirmed transcript absorbs: the commit without its own
	// confirmation and signature
	pub fn commit_content(&self) -> Result<Vec<u8>, Error> {
		let commit = match &self.content {
			Content::Commit { commit, .. } => commit,
			_ => return Err(Error::InvalidParameter("not a commit")),
		};

		let mut buf = Vec::new();
		codec::write_opaque8(&mut buf, &self.group_id);
		codec::write_u64(&mut buf, self.epoch);
		codec::write_u32(&mut buf, self.sender.0);
		commit.encode(&mut buf);

		Ok(buf)
	}

	// what the interim transcript absorbs on top: confirmation + signature
	pub fn commit_auth_data(&self) -> Result<Vec<u8>, Error> {
		let confirmation = match &self.content {
			Content::Commit { confirmation, .. } => confirmation,
			_ => return Err(Error::InvalidParameter("not a commit")),
		};

		let mut buf = Vec::new();
		codec::write_opaque8(&mut buf, confirmation.as_bytes());
		codec::write_opaque16(&mut buf, self.signature.as_bytes());

		Ok(buf)
	}

	// the part an MLSCiphertext hides: content plus signature
	pub fn marshal_content(&self) -> Vec<u8> {
		let mut buf = Vec::new();

		self.content.encode(&mut buf);
		codec::write_opaque16(&mut buf, self.signature.as_bytes());

		buf
	}

	pub fn unmarshal_content(
		group_id: &[u8],
		epoch: u64,
		sender: LeafIndex,
		content: &[u8],
	) -> Result<Self, codec::Error> {
		let mut r = Reader::new(content);
		let content = Content::decode(&mut r)?;
		let signature = Signature::new(r.read_opaque16()?);

		r.finish()?;

		Ok(Self {
			group_id: group_id.to_vec(),
			epoch,
			sender,
			authenticated_data: vec![],
			content,
			signature,
		})
	}
}

impl Serializable for MLSPlaintext {
	fn encode(&self, buf: &mut Vec<u8>) {
		codec::write_opaque8(buf, &self.group_id);
		codec::write_u64(buf, self.epoch);
		codec::write_u32(buf, self.sender.0);
		codec::write_opaque32(buf, &self.authenticated_data);
		self.content.encode(buf);
		codec::write_opaque16(buf, self.signature.as_bytes());
	}
}

impl Deserializable for MLSPlaintext {
	fn decode(r: &mut Reader) -> Result<Self, codec::Error> {
		Ok(Self {
			group_id: r.read_opaque8()?,
			epoch: r.read_u64()?,
			sender: LeafIndex(r.read_u32()?),
			authenticated_data: r.read_opaque32()?,
			content: Content::decode(r)?,
			signature: Signature::new(r.read_opaque16()?),
		})
	}
}

// who sent a ciphertext and how far along their chain they were; travels
// sealed under a key only current members can derive
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SenderData {
	pub sender: LeafIndex,
	pub generation: u32,
}

impl Serializable for SenderData {
	fn encode(&self, buf: &mut Vec<u8>) {
		codec::write_u32(buf, self.sender.0);
		codec::write_u32(buf, self.generation);
	}
}

impl Deserializable for SenderData {
	fn decode(r: &mut Reader) -> Result<Self, codec::Error> {
		Ok(Self { sender: LeafIndex(r.read_u32()?), generation: r.read_u32()? })
	}
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct MLSCiphertext {
	pub group_id: Vec<u8>,
	pub epoch: u64,
	pub content_type: ContentType,
	pub sender_data_nonce: Vec<u8>,
	pub encrypted_sender_data: Vec<u8>,
	pub ciphertext: Vec<u8>,
}

impl MLSCiphertext {
	// the header every encryption binds as aad
	pub fn aad(&self) -> Vec<u8> {
		let mut buf = Vec::new();

		codec::write_opaque8(&mut buf, &self.group_id);
		codec::write_u64(&mut buf, self.epoch);
		codec::write_u8(&mut buf, self.content_type.code());

		buf
	}
}

impl Serializable for MLSCiphertext {
	fn encode(&self, buf: &mut Vec<u8>) {
		codec::write_opaque8(buf, &self.group_id);
		codec::write_u64(buf, self.epoch);
		codec::write_u8(buf, self.content_type.code());
		codec::write_opaque8(buf, &self.sender_data_nonce);
		codec::write_opaque8(buf, &self.encrypted_sender_data);
		codec::write_opaque32(buf, &self.ciphertext);
	}
}

impl Deserializable for MLSCiphertext {
	fn decode(r: &mut Reader) -> Result<Self, codec::Error> {
		Ok(Self {
			group_id: r.read_opaque8()?,
			epoch: r.read_u64()?,
			content_type: ContentType::try_from(r.read_u8()?)?,
			sender_data_nonce: r.read_opaque8()?,
			encrypted_sender_data: r.read_opaque8()?,
			ciphertext: r.read_opaque32()?,
		})
	}
}

// the signed snapshot a welcome delivers: enough for a joiner to adopt the
// tree and check it landed in the same epoch as everyone else
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct GroupInfo {
	pub group_id: Vec<u8>,
	pub epoch: u64,
	pub tree: TreeKEMPublicKey,
	pub confirmed_transcript_hash: Vec<u8>,
	pub interim_transcript_hash: Vec<u8>,
	pub confirmation: hmac::Tag,
	pub signer_index: LeafIndex,
	pub signature: Signature,
}

impl GroupInfo {
	fn to_be_signed(&self) -> Vec<u8> {
		let mut buf = Vec::new();

		codec::write_opaque8(&mut buf, &self.group_id);
		codec::write_u64(&mut buf, self.epoch);
		self.tree.encode(&mut buf);
		codec::write_opaque8(&mut buf, &self.confirmed_transcript_hash);
		codec::write_opaque8(&mut buf, &self.interim_transcript_hash);
		codec::write_opaque8(&mut buf, self.confirmation.as_bytes());
		codec::write_u32(&mut buf, self.signer_index.0);

		buf
	}

	pub fn sign(
		&mut self,
		index: LeafIndex,
		identity_priv: &SignaturePrivateKey,
	) -> Result<(), Error> {
		let kp = self
			.tree
			.key_package(index)
			.ok_or(Error::InvalidParameter("cannot sign from a blank leaf"))?;

		if kp.credential.public_key() != identity_priv.public_key() {
			return Err(Error::InvalidParameter("signer key does not match the leaf"));
		}

		self.signer_index = index;
		self.signature = identity_priv.sign(self.tree.suite, &self.to_be_signed());

		Ok(())
	}

	pub fn verify(&self) -> Result<bool, Error> {
		let kp = self
			.tree
			.key_package(self.signer_index)
			.ok_or(Error::Protocol("welcome signer leaf is blank"))?;

		Ok(kp.credential.public_key().verify(
			self.tree.suite,
			&self.to_be_signed(),
			&self.signature,
		))
	}
}

impl Serializable for GroupInfo {
	fn encode(&self, buf: &mut Vec<u8>) {
		buf.extend_from_slice(&self.to_be_signed());
		codec::write_opaque16(buf, self.signature.as_bytes());
	}
}

impl Deserializable for GroupInfo {
	fn decode(r: &mut Reader) -> Result<Self, codec::Error> {
		Ok(Self {
			group_id: r.read_opaque8()?,
			epoch: r.read_u64()?,
			tree: TreeKEMPublicKey::decode(r)?,
			confirmed_transcript_hash: r.read_opaque8()?,
			interim_transcript_hash: r.read_opaque8()?,
			confirmation: hmac::Tag::try_from(r.read_opaque8()?)
				.or(Err(codec::Error::BadLength))?,
			signer_index: LeafIndex(r.read_u32()?),
			signature: Signature::new(r.read_opaque16()?),
		})
	}
}

// what one joiner needs to enter the epoch: the joiner secret, plus the path
// secret at its lowest common ancestor with the committer when one exists
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct GroupSecrets {
	pub joiner_secret: Vec<u8>,
	pub path_secret: Option<Vec<u8>>,
}

impl Serializable for GroupSecrets {
	fn encode(&self, buf: &mut Vec<u8>) {
		codec::write_opaque8(buf, &self.joiner_secret);
		match &self.path_secret {
			None => codec::write_u8(buf, 0),
			Some(secret) => {
				codec::write_u8(buf, 1);
				codec::write_opaque8(buf, secret);
			}
		}
	}
}

impl Deserializable for GroupSecrets {
	fn decode(r: &mut Reader) -> Result<Self, codec::Error> {
		let joiner_secret = r.read_opaque8()?;
		let path_secret = match r.read_u8()? {
			0 => None,
			1 => Some(r.read_opaque8()?),
			tag => return Err(codec::Error::BadTag(tag)),
		};

		Ok(Self { joiner_secret, path_secret })
	}
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct EncryptedGroupSecrets {
	pub key_package_hash: Vec<u8>,
	pub encrypted_group_secrets: HpkeCiphertext,
}

impl Serializable for EncryptedGroupSecrets {
	fn encode(&self, buf: &mut Vec<u8>) {
		codec::write_opaque8(buf, &self.key_package_hash);
		self.encrypted_group_secrets.encode(buf);
	}
}

impl Deserializable for EncryptedGroupSecrets {
	fn decode(r: &mut Reader) -> Result<Self, codec::Error> {
		Ok(Self {
			key_package_hash: r.read_opaque8()?,
			encrypted_group_secrets: HpkeCiphertext::decode(r)?,
		})
	}
}

const WELCOME_VERSION: u8 = 1;

// group info sealed under a key derived from the joiner secret, plus that
// secret sealed to each added member's init key
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Welcome {
	pub cipher_suite: Ciphersuite,
	pub secrets: Vec<EncryptedGroupSecrets>,
	pub encrypted_group_info: Vec<u8>,
}

impl Welcome {
	pub fn new(
		suite: Ciphersuite,
		joiner_secret: &[u8],
		group_info: &GroupInfo,
	) -> Result<Self, Error> {
		let (key, nonce) = KeyScheduleEpoch::welcome_key_nonce(suite, joiner_secret);
		let encrypted_group_info = aead::seal(suite, &key, &nonce, b"", &group_info.serialize())?;

		Ok(Self { cipher_suite: suite, secrets: vec![], encrypted_group_info })
	}

	pub fn encrypt(
		&mut self,
		kp: &KeyPackage,
		joiner_secret: &[u8],
		path_secret: Option<&[u8]>,
	) -> Result<(), Error> {
		let group_secrets = GroupSecrets {
			joiner_secret: joiner_secret.to_vec(),
			path_secret: path_secret.map(|secret| secret.to_vec()),
		};
		let sealed = kp.init_key.encrypt(self.cipher_suite, b"", &group_secrets.serialize())?;

		self.secrets.push(EncryptedGroupSecrets {
			key_package_hash: kp.hash(self.cipher_suite).to_vec(),
			encrypted_group_secrets: sealed,
		});

		Ok(())
	}

	// which secrets entry, if any, was addressed to this key package
	pub fn find(&self, kp: &KeyPackage) -> Option<usize> {
		let hash = kp.hash(self.cipher_suite).to_vec();

		self.secrets.iter().position(|egs| egs.key_package_hash == hash)
	}

	pub fn decrypt_secrets(
		&self,
		index: usize,
		init_priv: &HpkePrivateKey,
	) -> Result<GroupSecrets, Error> {
		let data =
			init_priv.decrypt(self.cipher_suite, b"", &self.secrets[index].encrypted_group_secrets)?;

		Ok(GroupSecrets::deserialize(&data)?)
	}

	pub fn decrypt_group_info(&self, joiner_secret: &[u8]) -> Result<GroupInfo, Error> {
		let (key, nonce) = KeyScheduleEpoch::welcome_key_nonce(self.cipher_suite, joiner_secret);
		let data = aead::open(self.cipher_suite, &key, &nonce, b"", &self.encrypted_group_info)?;

		Ok(GroupInfo::deserialize(&data)?)
	}
}

impl Serializable for Welcome {
	fn encode(&self, buf: &mut Vec<u8>) {
		codec::write_u8(buf, WELCOME_VERSION);
		codec::write_u16(buf, self.cipher_suite.code());

		let mut body = Vec::new();
		self.secrets.iter().for_each(|egs| egs.encode(&mut body));
		codec::write_opaque32(buf, &body);
		codec::write_opaque32(buf, &self.encrypted_group_info);
	}
}

impl Deserializable for Welcome {
	fn decode(r: &mut Reader) -> Result<Self, codec::Error> {
		if r.read_u8()? != WELCOME_VERSION {
			return Err(codec::Error::BadValue);
		}

		let cipher_suite = Ciphersuite::try_from(r.read_u16()?).or(Err(codec::Error::BadValue))?;
		let body = r.read_opaque32()?;
		let mut br = Reader::new(&body);
		let mut secrets = Vec::new();

		while !br.is_empty() {
			secrets.push(EncryptedGroupSecrets::decode(&mut br)?);
		}

		Ok(Self { cipher_suite, secrets, encrypted_group_info: r.read_opaque32()? })
	}
}
