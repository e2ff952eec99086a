// Math over a left-balanced binary tree flattened into an array. Leaves sit
// at even indices, intermediate nodes at odd ones; the root of a tree of n
// leaves is the node with the highest level:
//
//                                               X
//                       X
//           X                       X                       X
//     X           X           X           X           X
//  X     X     X     X     X     X     X     X     X     X     X
//  0  1  2  3  4  5  6  7  8  9 10 11 12 13 14 15 16 17 18 19 20    node
//  0     1     2     3     4     5     6     7     8     9    10    leaf

#[derive(Debug, PartialEq)]
pub enum Error {
	EmptyTree,
	EvenNodeCount,
	NotALeaf,
	LeafHasNoChildren,
	OutOfRange { n: NodeIndex, width: NodeCount },
	RootHasNoParent,
}

// number of leaves; a tree of size 1 is a lone leaf with no intermediate nodes
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct LeafCount(pub u32);

// number of array slots a tree occupies
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct NodeCount(pub u32);

impl From<LeafCount> for NodeCount {
	fn from(lc: LeafCount) -> Self {
		if lc.0 == 0 {
			Self(0)
		} else {
			Self(2 * lc.0 - 1)
		}
	}
}

impl TryFrom<NodeCount> for LeafCount {
	type Error = Error;

	fn try_from(nc: NodeCount) -> Result<Self, Self::Error> {
		if nc.0 == 0 {
			Ok(Self(0))
		} else if nc.0 & 1 == 0 {
			Err(Error::EvenNodeCount)
		} else {
			Ok(Self((nc.0 >> 1) + 1))
		}
	}
}

// position among the leaves only, [0, 1, 2, ..]
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct LeafIndex(pub u32);

// position in the flattened node array
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct NodeIndex(pub u32);

impl From<LeafIndex> for NodeIndex {
	fn from(li: LeafIndex) -> Self {
		Self(li.0 << 1)
	}
}

impl TryFrom<NodeIndex> for LeafIndex {
	type Error = Error;

	fn try_from(ni: NodeIndex) -> Result<Self, Self::Error> {
		if ni.0 & 1 == 1 {
			Err(Error::NotALeaf)
		} else {
			Ok(Self(ni.0 >> 1))
		}
	}
}

impl LeafIndex {
	// lowest common ancestor of two leaves
	pub fn ancestor(&self, other: LeafIndex) -> NodeIndex {
		let mut l = NodeIndex::from(*self).0;
		let mut r = NodeIndex::from(other).0;

		if l == r {
			return NodeIndex(l);
		}

		let mut k = 0u32;
		while l != r {
			l >>= 1;
			r >>= 1;
			k += 1;
		}

		NodeIndex((l << k) + (1 << (k - 1)) - 1)
	}
}

impl NodeIndex {
	pub fn root(lc: LeafCount) -> Result<NodeIndex, Error> {
		if lc.0 == 0 {
			Err(Error::EmptyTree)
		} else {
			// a one-leaf tree is its own root
			Ok(NodeIndex((1 << NodeCount::from(lc).0.ilog2()) - 1))
		}
	}

	pub fn is_leaf(&self) -> bool {
		self.0 & 1 == 0
	}

	// leaves are level 0, the root of a full subtree of 2^k leaves is level k
	pub fn level(&self) -> u32 {
		self.0.trailing_ones()
	}

	// whether self belongs to the subtree rooted at other; true if self == other
	pub fn is_below(&self, other: &NodeIndex) -> bool {
		let lo = other.level();

		self.level() <= lo && (self.0 >> (lo + 1) == other.0 >> (lo + 1))
	}

	pub fn left(&self) -> Result<NodeIndex, Error> {
		if self.is_leaf() {
			Err(Error::LeafHasNoChildren)
		} else {
			Ok(NodeIndex(self.0 ^ (1 << (self.level() - 1))))
		}
	}

	pub fn right(&self, lc: LeafCount) -> Result<NodeIndex, Error> {
		let width = NodeCount::from(lc);

		if self.0 >= width.0 {
			Err(Error::OutOfRange { n: *self, width })
		} else if self.is_leaf() {
			Err(Error::LeafHasNoChildren)
		} else {
			// in a non-full tree, descend left until the child exists
			let mut r = NodeIndex(self.0 ^ (3 << (self.level() - 1)));
			while r.0 >= width.0 {
				r = r.left()?;
			}

			Ok(r)
		}
	}

	// direct parent as if the tree were full
	fn parent_in_full(&self) -> NodeIndex {
		let k = self.level();

		NodeIndex((self.0 | (1 << k)) & !(1 << (k + 1)))
	}

	pub fn parent(&self, lc: LeafCount) -> Result<NodeIndex, Error> {
		if *self == Self::root(lc)? {
			Err(Error::RootHasNoParent)
		} else {
			let width = NodeCount::from(lc);

			if self.0 >= width.0 {
				Err(Error::OutOfRange { n: *self, width })
			} else {
				let mut p = self.parent_in_full();
				while p.0 >= width.0 {
					p = p.parent_in_full();
				}

				Ok(p)
			}
		}
	}

	pub fn sibling(&self, lc: LeafCount) -> Result<NodeIndex, Error> {
		let p = self.parent(lc)?;

		if self.0 < p.0 {
			p.right(lc)
		} else {
			p.left()
		}
	}

	// own path to the root: excludes self, includes the root; empty for the root
	pub fn dirpath(&self, lc: LeafCount) -> Result<Vec<NodeIndex>, Error> {
		let r = Self::root(lc)?;
		let mut x = *self;
		let mut path = Vec::new();

		while x != r {
			x = x.parent(lc)?;
			path.push(x);
		}

		Ok(path)
	}

	// siblings of self and of every dirpath node below the root
	pub fn copath(&self, lc: LeafCount) -> Result<Vec<NodeIndex>, Error> {
		if *self == Self::root(lc)? {
			Ok(vec![])
		} else {
			let mut nodes = self.dirpath(lc)?;

			nodes.insert(0, *self);
			nodes.pop();

			nodes.into_iter().map(|n| n.sibling(lc)).collect()
		}
	}
}

#[cfg(test)]
mod tests {
	use super::{Error, LeafCount, LeafIndex, NodeCount, NodeIndex};

	#[test]
	fn test_node_count() {
		let solutions = vec![(0, 0), (1, 1), (2, 3), (3, 5), (4, 7), (7, 13), (11, 21), (32, 63)];

		solutions.into_iter().for_each(|(lc, nc)| {
			assert_eq!(NodeCount::from(LeafCount(lc)).0, nc);
		});
	}

	#[test]
	fn test_leaf_count() {
		assert_eq!(LeafCount::try_from(NodeCount(0)), Ok(LeafCount(0)));
		assert_eq!(LeafCount::try_from(NodeCount(1)), Ok(LeafCount(1)));
		assert_eq!(LeafCount::try_from(NodeCount(21)), Ok(LeafCount(11)));
		assert_eq!(LeafCount::try_from(NodeCount(4)), Err(Error::EvenNodeCount));
		assert_eq!(LeafCount::try_from(NodeCount(1000)), Err(Error::EvenNodeCount));
	}

	#[test]
	fn test_leaf_node_conversion() {
		(0u32..64).for_each(|i| {
			assert_eq!(NodeIndex::from(LeafIndex(i)).0, 2 * i);
		});
		(0u32..64).for_each(|i| {
			if i % 2 == 0 {
				assert_eq!(LeafIndex::try_from(NodeIndex(i)), Ok(LeafIndex(i / 2)));
			} else {
				assert_eq!(LeafIndex::try_from(NodeIndex(i)), Err(Error::NotALeaf));
			}
		});
	}

	#[test]
	fn test_root() {
		let solutions = vec![
			(1, 0),
			(2, 1),
			(3, 3),
			(4, 3),
			(5, 7),
			(8, 7),
			(9, 15),
			(16, 15),
			(17, 31),
		];

		solutions.into_iter().for_each(|(lc, r)| {
			assert_eq!(NodeIndex::root(LeafCount(lc)), Ok(NodeIndex(r)));
		});

		assert_eq!(NodeIndex::root(LeafCount(0)), Err(Error::EmptyTree));
	}

	#[test]
	fn test_level() {
		let solutions = vec![0, 1, 0, 2, 0, 1, 0, 3, 0, 1, 0, 2, 0, 1, 0, 4, 0];

		solutions.into_iter().enumerate().for_each(|(n, l)| {
			assert_eq!(NodeIndex(n as u32).level(), l);
		});
	}

	#[test]
	fn test_left() {
		let solutions = vec![(1, 0), (3, 1), (5, 4), (7, 3), (9, 8), (11, 9), (13, 12), (15, 7)];

		solutions.into_iter().for_each(|(n, l)| {
			assert_eq!(NodeIndex(n).left(), Ok(NodeIndex(l)));
		});

		assert_eq!(NodeIndex(6).left(), Err(Error::LeafHasNoChildren));
	}

	#[test]
	fn test_right() {
		// in a non-full tree the right child of an ancestor slides left
		let solutions = vec![
			(1, 2, 2),
			(3, 3, 4),
			(3, 4, 5),
			(7, 5, 8),
			(7, 6, 9),
			(7, 7, 11),
			(7, 8, 11),
			(11, 7, 12),
			(11, 8, 13),
			(15, 9, 16),
			(15, 10, 17),
			(15, 11, 19),
		];

		solutions.into_iter().for_each(|(n, lc, r)| {
			assert_eq!(NodeIndex(n).right(LeafCount(lc)), Ok(NodeIndex(r)));
		});

		assert_eq!(NodeIndex(4).right(LeafCount(4)), Err(Error::LeafHasNoChildren));
		assert_eq!(
			NodeIndex(9).right(LeafCount(4)),
			Err(Error::OutOfRange { n: NodeIndex(9), width: NodeCount(7) })
		);
	}

	#[test]
	fn test_parent() {
		let solutions = vec![
			(0, 2, 1),
			(2, 2, 1),
			(4, 3, 3),
			(4, 4, 5),
			(6, 4, 5),
			(5, 4, 3),
			(8, 5, 7),
			(8, 6, 9),
			(9, 6, 7),
			(9, 7, 11),
			(12, 7, 11),
			(12, 8, 13),
			(16, 9, 15),
			(16, 10, 17),
		];

		solutions.into_iter().for_each(|(n, lc, p)| {
			assert_eq!(NodeIndex(n).parent(LeafCount(lc)), Ok(NodeIndex(p)));
		});

		assert_eq!(NodeIndex(3).parent(LeafCount(2)), Err(Error::RootHasNoParent));
		assert_eq!(NodeIndex(0).parent(LeafCount(0)), Err(Error::EmptyTree));
	}

	#[test]
	fn test_sibling() {
		let solutions = vec![
			(0, 2, 2),
			(2, 2, 0),
			(1, 3, 4),
			(4, 3, 1),
			(4, 4, 6),
			(3, 5, 8),
			(8, 5, 3),
			(8, 6, 10),
			(7, 9, 16),
			(16, 9, 7),
			(19, 13, 24),
		];

		solutions.into_iter().for_each(|(n, lc, s)| {
			assert_eq!(NodeIndex(n).sibling(LeafCount(lc)), Ok(NodeIndex(s)));
		});
	}

	#[test]
	fn test_dirpath() {
		// the root's dirpath is empty
		assert_eq!(NodeIndex(7).dirpath(LeafCount(8)), Ok(vec![]));

		let solutions = vec![
			(0, 2, vec![1]),
			(4, 3, vec![3]),
			(0, 4, vec![1, 3]),
			(6, 4, vec![5, 3]),
			(8, 5, vec![7]),
			(8, 6, vec![9, 7]),
			(10, 7, vec![9, 11, 7]),
			(12, 7, vec![11, 7]),
			(16, 10, vec![17, 15]),
			(20, 11, vec![19, 15]),
		];

		solutions.into_iter().for_each(|(n, lc, path)| {
			assert_eq!(
				NodeIndex(n).dirpath(LeafCount(lc)).unwrap(),
				path.into_iter().map(NodeIndex).collect::<Vec<NodeIndex>>()
			);
		});
	}

	#[test]
	fn test_copath() {
		assert_eq!(NodeIndex(7).copath(LeafCount(8)), Ok(vec![]));

		let solutions = vec![
			(0, 2, vec![2]),
			(0, 4, vec![2, 5]),
			(6, 4, vec![4, 1]),
			(8, 5, vec![3]),
			(8, 6, vec![10, 3]),
			(16, 9, vec![7]),
			(16, 11, vec![18, 20, 7]),
		];

		solutions.into_iter().for_each(|(n, lc, path)| {
			assert_eq!(
				NodeIndex(n).copath(LeafCount(lc)).unwrap(),
				path.into_iter().map(NodeIndex).collect::<Vec<NodeIndex>>()
			);
		});
	}

	#[test]
	fn test_ancestor() {
		let solutions = vec![
			(0, 0, 0),
			(0, 1, 1),
			(1, 0, 1),
			(0, 2, 3),
			(0, 3, 3),
			(2, 3, 5),
			(0, 4, 7),
			(3, 4, 7),
			(4, 7, 11),
			(6, 7, 13),
			(8, 9, 17),
			(8, 10, 19),
		];

		solutions.into_iter().for_each(|(l, r, a)| {
			assert_eq!(LeafIndex(l).ancestor(LeafIndex(r)), NodeIndex(a));
		});
	}

	#[test]
	fn test_is_below() {
		// every node is below itself and below the root
		(0u32..21).for_each(|n| {
			assert!(NodeIndex(n).is_below(&NodeIndex(n)));
			assert!(NodeIndex(n).is_below(&NodeIndex(15)));
		});

		assert!(NodeIndex(0).is_below(&NodeIndex(1)));
		assert!(NodeIndex(2).is_below(&NodeIndex(1)));
		assert!(NodeIndex(4).is_below(&NodeIndex(3)));
		assert!(NodeIndex(8).is_below(&NodeIndex(11)));
		assert!(!NodeIndex(8).is_below(&NodeIndex(3)));
		assert!(!NodeIndex(1).is_below(&NodeIndex(0)));
		assert!(!NodeIndex(3).is_below(&NodeIndex(5)));
		assert!(!NodeIndex(16).is_below(&NodeIndex(11)));
	}
}
