/**
 * Cryptographic types and operations.
 *  - Node identity keys
 *  - PEM and hex encodings
 */
pub mod crypto;
/**
 * Content-addressed storage backend.
 *  Implements the storage contract on top
 *  of a running iroh node, staging retrieved
 *  content on local disk.
 */
pub mod iroh_storage;
/**
 * Everything that goes into running a node:
 *  configuration, the on-disk repository,
 *  lifecycle, plugins and peer dialing.
 */
pub mod node;
/**
 * The backend-agnostic storage contract
 *  application code is written against.
 */
pub mod storage;

pub mod prelude {
    pub use crate::crypto::{PublicKey, SecretKey};
    pub use crate::iroh_storage::{IrohStorage, SetupError};
    pub use crate::node::{ContentId, ContentKind, Node, NodeConfig, NodeType, PluginPolicy};
    pub use crate::storage::{
        ByteReader, CallContext, CancelHandle, Object, ObjectReader, Retrieved, StorageError,
        StorageInterface,
    };
}
