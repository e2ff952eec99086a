use crate::{
	codec::{self, Deserializable, Reader, Serializable},
	hash::{self, Hashable},
	hpke::HpkePublicKey,
	sig::{Signature, SignaturePrivateKey, SignaturePublicKey},
	suite::Ciphersuite,
};

// who a member claims to be: an application identity bound to the key that
// signs everything the member says
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Credential {
	Basic { identity: Vec<u8>, public_key: SignaturePublicKey },
}

impl Credential {
	pub fn basic(identity: &[u8], public_key: &SignaturePublicKey) -> Self {
		Self::Basic { identity: identity.to_vec(), public_key: public_key.clone() }
	}

	pub fn identity(&self) -> &[u8] {
		match self {
			Self::Basic { identity, .. } => identity,
		}
	}

	pub fn public_key(&self) -> &SignaturePublicKey {
		match self {
			Self::Basic { public_key, .. } => public_key,
		}
	}
}

impl Serializable for Credential {
	fn encode(&self, buf: &mut Vec<u8>) {
		match self {
			Self::Basic { identity, public_key } => {
				codec::write_u8(buf, 0);
				codec::write_opaque16(buf, identity);
				codec::write_opaque16(buf, public_key.as_bytes());
			}
		}
	}
}

impl Deserializable for Credential {
	fn decode(r: &mut Reader) -> Result<Self, codec::Error> {
		match r.read_u8()? {
			0 => Ok(Self::Basic {
				identity: r.read_opaque16()?,
				public_key: SignaturePublicKey::new(r.read_opaque16()?),
			}),
			tag => Err(codec::Error::BadTag(tag)),
		}
	}
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Extension {
	pub ext_type: u16,
	pub data: Vec<u8>,
}

impl Serializable for Extension {
	fn encode(&self, buf: &mut Vec<u8>) {
		codec::write_u16(buf, self.ext_type);
		codec::write_opaque16(buf, &self.data);
	}
}

impl Deserializable for Extension {
	fn decode(r: &mut Reader) -> Result<Self, codec::Error> {
		Ok(Self { ext_type: r.read_u16()?, data: r.read_opaque16()? })
	}
}

pub fn encode_extensions(buf: &mut Vec<u8>, extensions: &[Extension]) {
	let mut body = Vec::new();

	extensions.iter().for_each(|ext| ext.encode(&mut body));
	codec::write_opaque16(buf, &body);
}

pub fn decode_extensions(r: &mut Reader) -> Result<Vec<Extension>, codec::Error> {
	let body = r.read_opaque16()?;
	let mut r = Reader::new(&body);
	let mut extensions = Vec::new();

	while !r.is_empty() {
		extensions.push(Extension::decode(&mut r)?);
	}

	Ok(extensions)
}

// a self-signed member handle: created by a prospective joiner, consumed once
// by an Add, replaced wholesale on Update and on every commit path
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct KeyPackage {
	pub suite: Ciphersuite,
	pub init_key: HpkePublicKey,
	pub credential: Credential,
	pub extensions: Vec<Extension>,
	pub signature: Signature,
}

impl KeyPackage {
	pub fn new(
		suite: Ciphersuite,
		init_key: &HpkePublicKey,
		credential: Credential,
		identity_priv: &SignaturePrivateKey,
	) -> Self {
		let mut kp = Self {
			suite,
			init_key: init_key.clone(),
			credential,
			extensions: vec![],
			signature: Signature::new(vec![]),
		};

		kp.sign(identity_priv);

		kp
	}

	fn to_be_signed(&self) -> Vec<u8> {
		let mut buf = Vec::new();

		codec::write_u16(&mut buf, self.suite.code());
		codec::write_opaque16(&mut buf, self.init_key.as_bytes());
		self.credential.encode(&mut buf);
		encode_extensions(&mut buf, &self.extensions);

		buf
	}

	// rotating the init key (an update, a commit path) re-signs the package
	pub fn sign(&mut self, identity_priv: &SignaturePrivateKey) {
		self.signature = identity_priv.sign(self.suite, &self.to_be_signed());
	}

	pub fn verify(&self) -> bool {
		self.credential.public_key().verify(self.suite, &self.to_be_signed(), &self.signature)
	}
}

impl Hashable for KeyPackage {
	fn hash(&self, suite: Ciphersuite) -> hash::Hash {
		hash::digest(suite, &self.serialize())
	}
}

impl Serializable for KeyPackage {
	fn encode(&self, buf: &mut Vec<u8>) {
		buf.extend_from_slice(&self.to_be_signed());
		codec::write_opaque16(buf, self.signature.as_bytes());
	}
}

impl Deserializable for KeyPackage {
	fn decode(r: &mut Reader) -> Result<Self, codec::Error> {
		let suite = Ciphersuite::try_from(r.read_u16()?).or(Err(codec::Error::BadValue))?;

		Ok(Self {
			suite,
			init_key: HpkePublicKey::new(r.read_opaque16()?),
			credential: Credential::decode(r)?,
			extensions: decode_extensions(r)?,
			signature: Signature::new(r.read_opaque16()?),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::{Credential, Extension, KeyPackage};
	use crate::{
		codec::{Deserializable, Serializable},
		hash::Hashable,
		hpke::HpkePrivateKey,
		sig::{Signature, SignaturePrivateKey},
		suite::Ciphersuite,
	};

	const SUITE: Ciphersuite = Ciphersuite::X25519Aes128Sha256Ed25519;

	fn make_package() -> KeyPackage {
		let identity_priv = SignaturePrivateKey::generate(SUITE);
		let init_priv = HpkePrivateKey::generate(SUITE);

		KeyPackage::new(
			SUITE,
			init_priv.public_key(),
			Credential::basic(b"alice", identity_priv.public_key()),
			&identity_priv,
		)
	}

	#[test]
	fn test_sign_verify() {
		let kp = make_package();

		assert!(kp.verify());

		let mut forged = kp.clone();
		forged.signature = Signature::new(vec![1u8; 64]);
		assert!(!forged.verify());

		let mut swapped = kp;
		swapped.credential = Credential::basic(
			b"mallory",
			SignaturePrivateKey::generate(SUITE).public_key(),
		);
		assert!(!swapped.verify());
	}

	#[test]
	fn test_round_trip() {
		let mut kp = make_package();
		kp.extensions = vec![Extension { ext_type: 2, data: vec![1, 2, 3] }];

		let bytes = kp.serialize();
		let decoded = KeyPackage::deserialize(&bytes).unwrap();

		assert_eq!(decoded, kp);
		assert_eq!(decoded.serialize(), bytes);
	}

	#[test]
	fn test_hash_covers_signature() {
		let kp = make_package();
		let mut other = kp.clone();

		other.signature = Signature::new(vec![7u8; 64]);

		assert_ne!(kp.hash(SUITE), other.hash(SUITE));
	}

	#[test]
	fn test_suite_code_validated() {
		let mut bytes = make_package().serialize();
		// corrupt the suite code
		bytes[0] = 0x7a;
		bytes[1] = 0x7a;

		assert!(KeyPackage::deserialize(&bytes).is_err());
	}
}
