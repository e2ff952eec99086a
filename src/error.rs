use crate::{aead, codec, hpke, treemath};

// every fallible boundary operation surfaces one of these kinds and leaves
// the state untouched
#[derive(Debug, PartialEq)]
pub enum Error {
	// malformed message, size mismatch, bad tree shape
	Protocol(&'static str),
	// programmer misuse: blank leaf, wrong key, stale index
	InvalidParameter(&'static str),
	InvalidSignature,
	// confirmation or framing tag mismatch
	InvalidMac,
	Decryption,
	// commits must be applied in epoch order
	EpochMismatch { epoch: u64, current: u64 },
	// a commit referenced a proposal this replica never saw
	UnknownProposal,
	Codec(codec::Error),
}

impl From<treemath::Error> for Error {
	fn from(_: treemath::Error) -> Self {
		Error::Protocol("tree index out of range")
	}
}

impl From<codec::Error> for Error {
	fn from(err: codec::Error) -> Self {
		Error::Codec(err)
	}
}

impl From<hpke::Error> for Error {
	fn from(_: hpke::Error) -> Self {
		Error::Decryption
	}
}

impl From<aead::Error> for Error {
	fn from(_: aead::Error) -> Self {
		Error::Decryption
	}
}
