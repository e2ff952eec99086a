// grove: continuous group keying over a TreeKEM ratchet tree. Each member
// holds a State replica; signed proposals queue up, a commit folds them into
// the tree and advances the epoch, and every honest replica lands on the same
// secrets.

pub mod aead;
pub mod codec;
pub mod error;
pub mod hash;
pub mod hkdf;
pub mod hmac;
pub mod hpke;
pub mod key_package;
pub mod key_schedule;
pub mod messages;
pub mod ratchet;
pub mod sig;
pub mod state;
pub mod suite;
pub mod treekem;
pub mod treemath;

pub use error::Error;
pub use state::State;
pub use suite::Ciphersuite;
