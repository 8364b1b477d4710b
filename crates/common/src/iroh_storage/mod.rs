//! Content-addressed storage backend on top of an iroh node.
//!
//! Paths are `/iroh/<content-id>`. `put` returns a handle for new content
//! and pins it; `delete` drops the pin, leaving the content to garbage
//! collection. Retrieved content is staged under the configured temp
//! directory.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::Utc;

use crate::node::content_id::NAMESPACE;
use crate::node::repo::{ensure_dir, RepositoryError};
use crate::node::{
    peers, resolve, ConfigError, ContentId, ContentKind, Node, NodeConfig, NodeError,
    PeerAddressError, Repository,
};
use crate::storage::{
    ByteReader, CallContext, Object, ObjectReader, Retrieved, StorageError, StorageInterface,
};

mod ingest;
mod staging;

use staging::InFlight;

/// Failures while constructing an [`IrohStorage`]. Nothing is left running
/// when one of these is returned.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("node error: {0}")]
    Node(#[from] NodeError),
    #[error("peer address error: {0}")]
    PeerAddress(#[from] PeerAddressError),
}

#[derive(Debug)]
pub struct IrohStorage {
    node: Node,
    temp_dir: PathBuf,
    verify_staged: bool,
    in_flight: InFlight,
    this: Weak<IrohStorage>,
}

impl IrohStorage {
    /// Provision a fresh repository at `config.root_path`, start a node on
    /// it and dial the configured peers.
    ///
    /// Fails with [`RepositoryError::Exists`] if the root already holds a
    /// repository; use [`IrohStorage::open`] for that. A repository whose
    /// node fails to start is discarded again, so the call can be retried.
    pub async fn new(config: NodeConfig) -> Result<Arc<Self>, SetupError> {
        config.validate()?;
        peers::parse_peers(&config.peers)?;

        let resolved = resolve(&config)?;
        let repo = Repository::init(
            &config.root_path,
            &config.temp_dir,
            resolved,
            config.datastore.as_ref(),
        )?;

        match Self::start(config).await {
            Ok(storage) => Ok(storage),
            Err(e) => {
                repo.discard();
                Err(e)
            }
        }
    }

    /// Start over an existing repository, keeping its identity and content
    pub async fn open(config: NodeConfig) -> Result<Arc<Self>, SetupError> {
        config.validate()?;
        peers::parse_peers(&config.peers)?;
        ensure_dir(&config.temp_dir)?;

        Self::start(config).await
    }

    async fn start(config: NodeConfig) -> Result<Arc<Self>, SetupError> {
        let node = Node::start(&config).await?;

        let mut bootstrap = node.repo().bootstrap().to_vec();
        bootstrap.extend(config.peers.iter().cloned());
        if let Err(e) = peers::parse_peers(&bootstrap) {
            node.stop().await?;
            return Err(e.into());
        }

        let storage = Arc::new_cyclic(|this| IrohStorage {
            node,
            temp_dir: config.temp_dir.clone(),
            verify_staged: config.verify_staged,
            in_flight: InFlight::default(),
            this: this.clone(),
        });

        // connectivity is advisory, unreachable peers are only logged
        storage.node.connect_peers(&bootstrap).await?;

        Ok(storage)
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// This node's dialable address, or an empty string if it has none
    pub fn node_addr(&self) -> String {
        self.node.node_addr_string()
    }

    /// Dial more peers after construction
    pub async fn connect_peers<S: AsRef<str>>(
        &self,
        addrs: &[S],
    ) -> Result<Vec<iroh::NodeId>, PeerAddressError> {
        self.node.connect_peers(addrs).await
    }

    /// Stop the node. Operations fail with [`NodeError::NotRunning`] after.
    pub async fn shutdown(&self) -> Result<(), NodeError> {
        self.node.stop().await
    }

    fn object(&self, path: String, name: String) -> Object {
        let storage: Weak<dyn StorageInterface> = self.this.clone();
        Object::new(path, name, Utc::now(), storage)
    }

    fn expect_kind(path: &str, id: &ContentId, expected: ContentKind) -> Result<(), StorageError> {
        if id.kind() == expected {
            return Ok(());
        }
        Err(StorageError::TypeMismatch {
            path: path.to_string(),
            expected,
            found: id.kind(),
        })
    }

    /// Make `id` available locally or report it as not found
    async fn fetch(&self, path: &str, id: &ContentId) -> Result<(), StorageError> {
        self.node.fetch(id).await.map_err(|e| {
            tracing::debug!(%id, "failed to resolve content: {}", e);
            StorageError::NotFound(path.to_string())
        })
    }

    /// Hand out a handle for ingested content and pin it. A failed pin
    /// still carries the handle.
    async fn commit(&self, ingested: ingest::Ingested) -> Result<Object, StorageError> {
        let id = ingested.id;
        let object = self.object(id.canonical_path(), id.to_string());

        if let Err(source) = ingested.pin(self.node.blobs()).await {
            tracing::warn!(%id, "failed to pin content: {}", source);
            return Err(StorageError::PinFailed {
                object: Box::new(object),
                source,
            });
        }

        tracing::info!(%id, "put content");
        Ok(object)
    }

    async fn stage(&self, path: &str) -> Result<Retrieved, StorageError> {
        let id = ContentId::from_path(path)?;
        let target = self.temp_dir.join(staging::derive_name(path)?);

        let _guard = self.in_flight.acquire(id).await;

        if tokio::fs::try_exists(&target).await? {
            if id.is_dir() {
                return Ok(Retrieved::Directory(target));
            }
            if !self.verify_staged || staging::verify_file(&target, id.hash()).await? {
                tracing::debug!(%id, "serving staged file");
                return Ok(Retrieved::File(tokio::fs::File::open(&target).await?));
            }
            tracing::warn!(%id, path = %target.display(), "staged file failed verification, restaging");
            staging::remove_staged(&target).await;
        }

        self.fetch(path, &id).await?;

        match id.kind() {
            ContentKind::File => {
                staging::materialize_file(&self.node, id.hash(), &target).await?;
                Ok(Retrieved::File(tokio::fs::File::open(&target).await?))
            }
            ContentKind::Directory => {
                staging::materialize_dir(&self.node, id, &target).await?;
                Ok(Retrieved::Directory(target))
            }
        }
    }
}

#[async_trait]
impl StorageInterface for IrohStorage {
    async fn put(
        &self,
        ctx: &CallContext,
        path: &str,
        reader: Option<ByteReader>,
    ) -> Result<Object, StorageError> {
        ctx.run(async {
            self.node.ensure_running()?;
            let blobs = self.node.blobs();

            let ingested = match reader {
                Some(reader) => ingest::stream(blobs, reader).await?,
                None => ingest::local_path(blobs, Path::new(path)).await?,
            };

            self.commit(ingested).await
        })
        .await
    }

    async fn get(&self, ctx: &CallContext, path: &str) -> Result<Retrieved, StorageError> {
        ctx.run(async {
            self.node.ensure_running()?;
            self.stage(path).await
        })
        .await
    }

    async fn get_stream(
        &self,
        ctx: &CallContext,
        path: &str,
    ) -> Result<ObjectReader, StorageError> {
        ctx.run(async {
            self.node.ensure_running()?;
            let id = ContentId::from_path(path)?;
            Self::expect_kind(path, &id, ContentKind::File)?;
            self.fetch(path, &id).await?;

            let reader = self.node.blobs().get_reader(id.hash()).await?;
            let reader: ObjectReader = Box::new(Box::pin(reader));
            Ok(reader)
        })
        .await
    }

    async fn delete(&self, ctx: &CallContext, path: &str) -> Result<(), StorageError> {
        ctx.run(async {
            self.node.ensure_running()?;
            let id = ContentId::from_path(path)?;
            let blobs = self.node.blobs();

            if !blobs.is_pinned(&id.pin_tag()).await? {
                return Err(StorageError::NotFound(path.to_string()));
            }

            if let Ok(name) = staging::derive_name(path) {
                let _guard = self.in_flight.acquire(id).await;
                staging::remove_staged(&self.temp_dir.join(name)).await;
            }

            blobs.unpin_prefix(&id.pin_tag()).await?;
            tracing::info!(%id, "unpinned content");
            Ok(())
        })
        .await
    }

    async fn list(&self, ctx: &CallContext, path: &str) -> Result<Vec<Object>, StorageError> {
        ctx.run(async {
            self.node.ensure_running()?;
            let id = ContentId::from_path(path)?;
            Self::expect_kind(path, &id, ContentKind::Directory)?;
            self.fetch(path, &id).await?;

            let collection = self
                .node
                .blobs()
                .load_collection(id.hash())
                .await
                .map_err(|_| StorageError::NotFound(path.to_string()))?;

            let objects = collection
                .iter()
                .map(|(name, hash)| {
                    let (name, kind) = staging::split_entry(name);
                    let child = match kind {
                        ContentKind::File => ContentId::file(*hash),
                        ContentKind::Directory => ContentId::directory(*hash),
                    };
                    self.object(child.canonical_path(), name.to_string())
                })
                .collect();
            Ok(objects)
        })
        .await
    }

    fn get_url(&self, path: &str) -> String {
        path.to_string()
    }

    fn get_endpoint(&self) -> String {
        NAMESPACE.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup() -> (Arc<IrohStorage>, TempDir) {
        let temp = TempDir::new().unwrap();
        let mut config = NodeConfig::new(temp.path().join("repo"), temp.path().join("staging"));
        config.networking = false;
        let storage = IrohStorage::new(config).await.unwrap();
        (storage, temp)
    }

    #[tokio::test]
    async fn test_failed_pin_still_returns_handle() {
        let (storage, _temp) = setup().await;
        let blobs = storage.node().blobs();

        let reader: ByteReader = Box::new(std::io::Cursor::new(b"unpinned".to_vec()));
        let ingested = ingest::stream(blobs, reader).await.unwrap();
        let id = ingested.id;

        blobs.shutdown().await.unwrap();

        let err = storage.commit(ingested).await.unwrap_err();
        assert!(matches!(err, StorageError::PinFailed { .. }));
        let object = err.object().unwrap();
        assert_eq!(object.path, id.canonical_path());
        assert_eq!(object.name, id.to_string());
        assert!(object.storage().is_some());
    }
}
