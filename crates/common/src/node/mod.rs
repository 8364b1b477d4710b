mod blobs_store;
pub mod config;
pub mod content_id;
#[allow(clippy::module_inception)]
mod node;
pub mod peers;
pub mod plugins;
pub mod repo;

pub use blobs_store::{BlobsStore, BlobsStoreError};
pub use config::{
    resolve, AddressConfig, ConfigError, DatastoreConfig, NodeConfig, NodeType, PluginPolicy,
    ResolvedConfig,
};
pub use content_id::{ContentId, ContentIdError, ContentKind, NAMESPACE};
pub use node::{Node, NodeError, NodeState};
pub use peers::{PeerAddr, PeerAddressError};
pub use plugins::{DhtPlugin, Plugin, PluginError, PluginLoader};
pub use repo::{Repository, RepositoryError};

// Re-export iroh types for convenience
pub use iroh::{NodeAddr, NodeId};
