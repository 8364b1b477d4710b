//! Node identity material
//!
//! Every repository carries one Ed25519 keypair. The public half is the
//! node's `NodeId` on the iroh network and the peer identity embedded in
//! peer addresses; the secret half is persisted as PEM inside the repository
//! and never leaves the machine.

mod keys;

pub use keys::{KeyError, PublicKey, SecretKey, PRIVATE_KEY_SIZE};
