use std::collections::BTreeMap;

use zeroize::Zeroize;

use crate::{
	codec::{self, Deserializable, Reader, Serializable},
	error::Error,
	hash, hkdf,
	hpke::{HpkeCiphertext, HpkePrivateKey, HpkePublicKey},
	key_package::KeyPackage,
	sig::SignaturePrivateKey,
	suite::Ciphersuite,
	treemath::{LeafCount, LeafIndex, NodeCount, NodeIndex},
};

// an intermediate node of the ratchet tree; unmerged_leaves lists the leaves
// added below it since its key was last set, whose holders do not yet share it
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ParentNode {
	pub public_key: HpkePublicKey,
	pub parent_hash: Vec<u8>,
	pub unmerged_leaves: Vec<LeafIndex>,
}

impl Serializable for ParentNode {
	fn encode(&self, buf: &mut Vec<u8>) {
		codec::write_opaque16(buf, self.public_key.as_bytes());
		codec::write_opaque8(buf, &self.parent_hash);

		let mut body = Vec::new();
		self.unmerged_leaves.iter().for_each(|li| codec::write_u32(&mut body, li.0));
		codec::write_opaque32(buf, &body);
	}
}

impl Deserializable for ParentNode {
	fn decode(r: &mut Reader) -> Result<Self, codec::Error> {
		let public_key = HpkePublicKey::new(r.read_opaque16()?);
		let parent_hash = r.read_opaque8()?;
		let body = r.read_opaque32()?;

		if body.len() % 4 != 0 {
			return Err(codec::Error::BadLength);
		}

		let mut br = Reader::new(&body);
		let mut unmerged_leaves = Vec::new();
		while !br.is_empty() {
			unmerged_leaves.push(LeafIndex(br.read_u32()?));
		}

		Ok(Self { public_key, parent_hash, unmerged_leaves })
	}
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Node {
	Leaf(KeyPackage),
	Parent(ParentNode),
}

impl Node {
	pub fn public_key(&self) -> &HpkePublicKey {
		match self {
			Node::Leaf(kp) => &kp.init_key,
			Node::Parent(parent) => &parent.public_key,
		}
	}

	fn key_package(&self) -> Option<&KeyPackage> {
		match self {
			Node::Leaf(kp) => Some(kp),
			Node::Parent(_) => None,
		}
	}

	fn parent(&self) -> Option<&ParentNode> {
		match self {
			Node::Leaf(_) => None,
			Node::Parent(parent) => Some(parent),
		}
	}
}

impl Serializable for Node {
	fn encode(&self, buf: &mut Vec<u8>) {
		match self {
			Node::Leaf(kp) => {
				codec::write_u8(buf, 0);
				kp.encode(buf);
			}
			Node::Parent(parent) => {
				codec::write_u8(buf, 1);
				parent.encode(buf);
			}
		}
	}
}

impl Deserializable for Node {
	fn decode(r: &mut Reader) -> Result<Self, codec::Error> {
		match r.read_u8()? {
			0 => Ok(Node::Leaf(KeyPackage::decode(r)?)),
			1 => Ok(Node::Parent(ParentNode::decode(r)?)),
			tag => Err(codec::Error::BadTag(tag)),
		}
	}
}

// a slot of the flattened tree; blank slots still occupy their position.
// the hash is a memo over the subtree and never travels on the wire
#[derive(Debug, Clone, Default)]
pub struct OptionalNode {
	pub node: Option<Node>,
	pub hash: Vec<u8>,
}

impl PartialEq for OptionalNode {
	fn eq(&self, other: &Self) -> bool {
		self.node == other.node
	}
}

impl Eq for OptionalNode {}

// one step of an encapsulated path: the fresh node key plus the path secret
// sealed to every member of the copath node's resolution, in resolve order
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct RatchetNode {
	pub public_key: HpkePublicKey,
	pub node_secrets: Vec<HpkeCiphertext>,
}

impl Serializable for RatchetNode {
	fn encode(&self, buf: &mut Vec<u8>) {
		codec::write_opaque16(buf, self.public_key.as_bytes());

		let mut body = Vec::new();
		self.node_secrets.iter().for_each(|ct| ct.encode(&mut body));
		codec::write_opaque32(buf, &body);
	}
}

impl Deserializable for RatchetNode {
	fn decode(r: &mut Reader) -> Result<Self, codec::Error> {
		let public_key = HpkePublicKey::new(r.read_opaque16()?);
		let body = r.read_opaque32()?;
		let mut br = Reader::new(&body);
		let mut node_secrets = Vec::new();

		while !br.is_empty() {
			node_secrets.push(HpkeCiphertext::decode(&mut br)?);
		}

		Ok(Self { public_key, node_secrets })
	}
}

impl Serializable for HpkeCiphertext {
	fn encode(&self, buf: &mut Vec<u8>) {
		codec::write_opaque16(buf, &self.kem_output);
		codec::write_opaque16(buf, &self.ciphertext);
	}
}

impl Deserializable for HpkeCiphertext {
	fn decode(r: &mut Reader) -> Result<Self, codec::Error> {
		Ok(Self { kem_output: r.read_opaque16()?, ciphertext: r.read_opaque16()? })
	}
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DirectPath {
	pub leaf_key_package: KeyPackage,
	pub nodes: Vec<RatchetNode>,
}

impl DirectPath {
	// the committer's leaf rotates with the path: install the fresh leaf key
	// and re-sign the package under the sender's identity
	fn sign(&mut self, leaf_public: &HpkePublicKey, identity_priv: &SignaturePrivateKey) {
		self.leaf_key_package.init_key = leaf_public.clone();
		self.leaf_key_package.sign(identity_priv);
	}
}

impl Serializable for DirectPath {
	fn encode(&self, buf: &mut Vec<u8>) {
		self.leaf_key_package.encode(buf);

		let mut body = Vec::new();
		self.nodes.iter().for_each(|n| n.encode(&mut body));
		codec::write_opaque32(buf, &body);
	}
}

impl Deserializable for DirectPath {
	fn decode(r: &mut Reader) -> Result<Self, codec::Error> {
		let leaf_key_package = KeyPackage::decode(r)?;
		let body = r.read_opaque32()?;
		let mut br = Reader::new(&body);
		let mut nodes = Vec::new();

		while !br.is_empty() {
			nodes.push(RatchetNode::decode(&mut br)?);
		}

		Ok(Self { leaf_key_package, nodes })
	}
}

// the public ratchet tree every replica shares: leaves are member key
// packages, parents hold node public keys
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TreeKEMPublicKey {
	pub suite: Ciphersuite,
	pub nodes: Vec<OptionalNode>,
}

impl TreeKEMPublicKey {
	pub fn new(suite: Ciphersuite) -> Self {
		Self { suite, nodes: vec![] }
	}

	pub fn size(&self) -> LeafCount {
		// the node array is kept at an odd length by construction
		LeafCount::try_from(NodeCount(self.nodes.len() as u32)).unwrap()
	}

	fn node_at(&self, n: NodeIndex) -> &OptionalNode {
		&self.nodes[n.0 as usize]
	}

	fn node_at_mut(&mut self, n: NodeIndex) -> &mut OptionalNode {
		&mut self.nodes[n.0 as usize]
	}

	pub fn node(&self, n: NodeIndex) -> Option<&Node> {
		self.nodes.get(n.0 as usize).and_then(|slot| slot.node.as_ref())
	}

	pub fn key_package(&self, index: LeafIndex) -> Option<&KeyPackage> {
		self.node(NodeIndex::from(index)).and_then(|node| node.key_package())
	}

	pub fn find(&self, kp: &KeyPackage) -> Option<LeafIndex> {
		(0..self.size().0)
			.map(LeafIndex)
			.find(|&li| self.key_package(li).map_or(false, |found| found == kp))
	}

	// place the package at the leftmost blank leaf, growing the array by two
	// slots when the tree is full
	pub fn add_leaf(&mut self, kp: &KeyPackage) -> Result<LeafIndex, Error> {
		let mut index = LeafIndex(0);
		while index.0 < self.size().0 {
			if self.node_at(NodeIndex::from(index)).node.is_none() {
				break;
			}

			index.0 += 1;
		}

		let ni = NodeIndex::from(index);
		if index.0 >= self.size().0 {
			self.nodes.resize(ni.0 as usize + 1, OptionalNode::default());
		}

		self.node_at_mut(ni).node = Some(Node::Leaf(kp.clone()));

		// existing parents above the new leaf don't cover it yet
		for n in ni.dirpath(self.size())? {
			if let Some(Node::Parent(parent)) = &mut self.node_at_mut(n).node {
				parent.unmerged_leaves.push(index);
			}
		}

		self.clear_hash_path(index)?;

		Ok(index)
	}

	pub fn update_leaf(&mut self, index: LeafIndex, kp: &KeyPackage) -> Result<(), Error> {
		self.blank_path(index)?;
		self.node_at_mut(NodeIndex::from(index)).node = Some(Node::Leaf(kp.clone()));
		self.clear_hash_path(index)
	}

	// used on Remove: the leaf and its whole path forget their keys
	pub fn blank_path(&mut self, index: LeafIndex) -> Result<(), Error> {
		if self.nodes.is_empty() {
			return Ok(());
		}

		let ni = NodeIndex::from(index);
		self.node_at_mut(ni).node = None;
		for n in ni.dirpath(self.size())? {
			self.node_at_mut(n).node = None;
		}

		self.clear_hash_path(index)
	}

	pub fn merge(&mut self, from: LeafIndex, path: &DirectPath) -> Result<(), Error> {
		let ni = NodeIndex::from(from);
		self.node_at_mut(ni).node = Some(Node::Leaf(path.leaf_key_package.clone()));

		let dp = ni.dirpath(self.size())?;
		if dp.len() != path.nodes.len() {
			return Err(Error::Protocol("direct path does not match the tree"));
		}

		for (i, n) in dp.into_iter().enumerate() {
			self.node_at_mut(n).node = Some(Node::Parent(ParentNode {
				public_key: path.nodes[i].public_key.clone(),
				parent_hash: vec![],
				unmerged_leaves: vec![],
			}));
		}

		self.clear_hash_path(from)?;
		self.set_hash_all()
	}

	// the set of non-blank subtree roots covering n, plus unmerged leaves of
	// non-blank parents; these are the encryption targets of a copath step
	pub fn resolve(&self, n: NodeIndex) -> Vec<NodeIndex> {
		if let Some(node) = &self.node_at(n).node {
			let mut out = vec![n];

			if let Node::Parent(parent) = node {
				out.extend(parent.unmerged_leaves.iter().map(|&li| NodeIndex::from(li)));
			}

			return out;
		}

		if n.level() == 0 {
			return vec![];
		}

		let mut left = self.resolve(n.left().unwrap());
		let right = self.resolve(n.right(self.size()).unwrap());

		left.extend(right);
		left
	}

	// fresh path secrets up the sender's path, each sealed to the resolution
	// of the corresponding copath node; merges the new path into the tree
	pub fn encap(
		&mut self,
		from: LeafIndex,
		context: &[u8],
		leaf_secret: &[u8],
		identity_priv: &SignaturePrivateKey,
	) -> Result<(TreeKEMPrivateKey, DirectPath), Error> {
		let leaf_kp = match self.key_package(from) {
			Some(kp) => kp.clone(),
			None => return Err(Error::InvalidParameter("cannot encap from a blank leaf")),
		};

		let size = self.size();
		let mut tree_priv = TreeKEMPrivateKey::create(self.suite, size, from, leaf_secret);
		let mut path = DirectPath { leaf_key_package: leaf_kp, nodes: vec![] };

		let mut last = NodeIndex::from(from);
		for n in NodeIndex::from(from).dirpath(size)? {
			let path_secret = tree_priv.path_secrets.get(&n).unwrap().clone();
			let node_priv = tree_priv.private_key(n).unwrap();
			let mut node =
				RatchetNode { public_key: node_priv.public_key().clone(), node_secrets: vec![] };

			for nr in self.resolve(last.sibling(size)?) {
				let node_pub = self.node_at(nr).node.as_ref().unwrap().public_key();
				node.node_secrets.push(node_pub.encrypt(self.suite, context, &path_secret)?);
			}

			path.nodes.push(node);
			last = n;
		}

		let leaf_priv = tree_priv.private_key(NodeIndex::from(from)).unwrap();
		path.sign(leaf_priv.public_key(), identity_priv);

		self.merge(from, &path)?;

		Ok((tree_priv, path))
	}

	// drop trailing blank slots so the last one is occupied; an emptied tree
	// is a terminal state of the group
	pub fn truncate(&mut self) {
		while self.nodes.last().map_or(false, |slot| slot.node.is_none()) {
			self.nodes.pop();
		}
	}

	fn clear_hash_path(&mut self, index: LeafIndex) -> Result<(), Error> {
		let ni = NodeIndex::from(index);
		self.node_at_mut(ni).hash.clear();
		for n in ni.dirpath(self.size())? {
			self.node_at_mut(n).hash.clear();
		}

		Ok(())
	}

	pub fn set_hash_all(&mut self) -> Result<(), Error> {
		if self.nodes.is_empty() {
			return Ok(());
		}

		let root = NodeIndex::root(self.size())?;
		self.get_hash(root)?;

		Ok(())
	}

	pub fn root_hash(&self) -> Result<Vec<u8>, Error> {
		if self.nodes.is_empty() {
			return Err(Error::InvalidParameter("no hash for an empty tree"));
		}

		let root = NodeIndex::root(self.size())?;
		let hash = &self.node_at(root).hash;
		if hash.is_empty() {
			Err(Error::InvalidParameter("root hash not set"))
		} else {
			Ok(hash.clone())
		}
	}

	// memoized over the subtree; leaves hash their slot and package, parents
	// fold in both children so the root depends on every slot
	pub fn get_hash(&mut self, n: NodeIndex) -> Result<Vec<u8>, Error> {
		if !self.node_at(n).hash.is_empty() {
			return Ok(self.node_at(n).hash.clone());
		}

		let hash = if n.level() == 0 {
			let mut buf = Vec::new();
			codec::write_u32(&mut buf, n.0);
			match self.node_at(n).node.as_ref().and_then(|node| node.key_package()) {
				None => codec::write_u8(&mut buf, 0),
				Some(kp) => {
					codec::write_u8(&mut buf, 1);
					kp.encode(&mut buf);
				}
			}

			hash::digest(self.suite, &buf).to_vec()
		} else {
			let left = self.get_hash(n.left()?)?;
			let right = self.get_hash(n.right(self.size())?)?;
			let mut buf = Vec::new();
			codec::write_u32(&mut buf, n.0);
			match self.node_at(n).node.as_ref().and_then(|node| node.parent()) {
				None => codec::write_u8(&mut buf, 0),
				Some(parent) => {
					codec::write_u8(&mut buf, 1);
					parent.encode(&mut buf);
				}
			}
			codec::write_opaque8(&mut buf, &left);
			codec::write_opaque8(&mut buf, &right);

			hash::digest(self.suite, &buf).to_vec()
		};

		self.node_at_mut(n).hash = hash.clone();

		Ok(hash)
	}
}

impl Serializable for TreeKEMPublicKey {
	fn encode(&self, buf: &mut Vec<u8>) {
		codec::write_u16(buf, self.suite.code());

		let mut body = Vec::new();
		self.nodes.iter().for_each(|slot| match &slot.node {
			None => codec::write_u8(&mut body, 0),
			Some(node) => {
				codec::write_u8(&mut body, 1);
				node.encode(&mut body);
			}
		});
		codec::write_opaque32(buf, &body);
	}
}

impl Deserializable for TreeKEMPublicKey {
	fn decode(r: &mut Reader) -> Result<Self, codec::Error> {
		let suite = Ciphersuite::try_from(r.read_u16()?).or(Err(codec::Error::BadValue))?;
		let body = r.read_opaque32()?;
		let mut br = Reader::new(&body);
		let mut nodes = Vec::new();

		while !br.is_empty() {
			let node = match br.read_u8()? {
				0 => None,
				1 => Some(Node::decode(&mut br)?),
				tag => return Err(codec::Error::BadTag(tag)),
			};

			nodes.push(OptionalNode { node, hash: vec![] });
		}

		if !nodes.is_empty() && nodes.len() % 2 == 0 {
			return Err(codec::Error::BadLength);
		}

		Ok(Self { suite, nodes })
	}
}

// one member's private window into the tree: path secrets for the nodes it
// shares, and the key pairs derived from them on demand
#[derive(Debug, Clone)]
pub struct TreeKEMPrivateKey {
	pub suite: Ciphersuite,
	pub index: LeafIndex,
	pub update_secret: Vec<u8>,
	path_secrets: BTreeMap<NodeIndex, Vec<u8>>,
	private_key_cache: BTreeMap<NodeIndex, HpkePrivateKey>,
}

impl TreeKEMPrivateKey {
	fn empty(suite: Ciphersuite, index: LeafIndex) -> Self {
		Self {
			suite,
			index,
			update_secret: vec![],
			path_secrets: BTreeMap::new(),
			private_key_cache: BTreeMap::new(),
		}
	}

	// a committer's view: implant fresh secrets from own leaf up to the root
	pub fn create(
		suite: Ciphersuite,
		size: LeafCount,
		index: LeafIndex,
		leaf_secret: &[u8],
	) -> Self {
		let mut tree_priv = Self::empty(suite, index);

		tree_priv.implant(NodeIndex::from(index), size, leaf_secret.to_vec());

		tree_priv
	}

	// a joiner's view: the leaf secret, plus everything from the lowest
	// common ancestor with the committer upward when a path secret came with
	// the welcome
	pub fn joiner(
		suite: Ciphersuite,
		size: LeafCount,
		index: LeafIndex,
		leaf_secret: &[u8],
		intersect: NodeIndex,
		path_secret: Option<&[u8]>,
	) -> Self {
		let mut tree_priv = Self::empty(suite, index);

		tree_priv.path_secrets.insert(NodeIndex::from(index), leaf_secret.to_vec());
		if let Some(secret) = path_secret {
			tree_priv.implant(intersect, size, secret.to_vec());
		}

		tree_priv
	}

	fn path_step(&self, path_secret: &[u8]) -> Vec<u8> {
		hkdf::expand_label(self.suite, path_secret, "path", b"", self.suite.hash_size())
	}

	fn implant(&mut self, start: NodeIndex, size: LeafCount, path_secret: Vec<u8>) {
		let root = NodeIndex::root(size).unwrap();
		let mut n = start;
		let mut secret = path_secret;

		while n != root {
			self.private_key_cache.remove(&n);
			self.path_secrets.insert(n, secret.clone());

			n = n.parent(size).unwrap();
			secret = self.path_step(&secret);
		}

		self.private_key_cache.remove(&root);
		self.path_secrets.insert(root, secret.clone());
		self.update_secret = secret;
	}

	// memoized derivation; the cache never outlives the secrets that feed it
	pub fn private_key(&mut self, n: NodeIndex) -> Option<HpkePrivateKey> {
		if let Some(key) = self.private_key_cache.get(&n) {
			return Some(key.clone());
		}

		let secret = self.path_secrets.get(&n)?;
		let key = HpkePrivateKey::derive(self.suite, secret);

		self.private_key_cache.insert(n, key.clone());

		Some(key)
	}

	// the secret a welcomed joiner at `to` can be seeded with
	pub fn shared_path_secret(&self, to: LeafIndex) -> Option<(NodeIndex, Vec<u8>)> {
		let n = self.index.ancestor(to);

		self.path_secrets.get(&n).map(|secret| (n, secret.clone()))
	}

	// walk the committer's path to the first node covering us, decrypt its
	// path secret out of the matching copath resolution, implant upward
	pub fn decap(
		&mut self,
		from: LeafIndex,
		tree: &TreeKEMPublicKey,
		context: &[u8],
		path: &DirectPath,
	) -> Result<(), Error> {
		let own = NodeIndex::from(self.index);
		let size = tree.size();
		let dp = NodeIndex::from(from).dirpath(size)?;

		if dp.len() != path.nodes.len() {
			return Err(Error::Protocol("direct path does not match the tree"));
		}

		let mut last = NodeIndex::from(from);
		let mut overlap = None;
		for (i, &n) in dp.iter().enumerate() {
			if own.is_below(&n) {
				overlap = Some((i, n, last.sibling(size)?));
				break;
			}

			last = n;
		}

		let (dpi, overlap_node, copath_node) = match overlap {
			Some(found) => found,
			None => return Err(Error::Protocol("no overlap with the sender's path")),
		};

		let res = tree.resolve(copath_node);
		if res.len() != path.nodes[dpi].node_secrets.len() {
			return Err(Error::Protocol("copath resolution does not match the path node"));
		}

		let resi = match res.iter().position(|n| self.path_secrets.contains_key(n)) {
			Some(resi) => resi,
			None => return Err(Error::Protocol("no private key to decrypt the path secret")),
		};

		let node_priv = self.private_key(res[resi]).unwrap();
		let path_secret =
			node_priv.decrypt(self.suite, context, &path.nodes[dpi].node_secrets[resi])?;

		self.implant(overlap_node, size, path_secret);

		Ok(())
	}

	// forget everything that fell off the end of a shrunken tree
	pub fn truncate(&mut self, size: LeafCount) {
		let last = NodeIndex::from(LeafIndex(size.0 - 1));
		let stale: Vec<NodeIndex> =
			self.path_secrets.keys().filter(|n| n.0 > last.0).cloned().collect();

		stale.into_iter().for_each(|n| {
			if let Some(mut secret) = self.path_secrets.remove(&n) {
				secret.zeroize();
			}
			self.private_key_cache.remove(&n);
		});
	}

	// every held secret must derive the public key the shared tree shows
	pub fn consistent(&self, tree: &TreeKEMPublicKey) -> bool {
		if self.suite != tree.suite {
			return false;
		}

		self.path_secrets.iter().all(|(&n, secret)| {
			let derived = HpkePrivateKey::derive(self.suite, secret);

			tree.node(n).map_or(false, |node| node.public_key() == derived.public_key())
		})
	}
}

impl Drop for TreeKEMPrivateKey {
	fn drop(&mut self) {
		self.update_secret.zeroize();
		self.path_secrets.values_mut().for_each(|secret| secret.zeroize());
	}
}
