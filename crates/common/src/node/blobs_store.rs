use std::fmt::Display;
use std::future::IntoFuture;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use bytes::Bytes;
use futures::Stream;
use iroh::{Endpoint, NodeId};
use iroh_blobs::{
    api::{
        blobs::{BlobReader as Reader, BlobStatus, Blobs},
        downloader::{Downloader, Shuffled},
        ExportBaoError, RequestError, Store, TempTag,
    },
    format::collection::Collection,
    hashseq::HashSeq,
    store::{
        fs::{
            options::{GcConfig, Options},
            FsStore,
        },
        mem::MemStore,
    },
    BlobsProtocol, Hash, HashAndFormat,
};

use super::content_id::{ContentId, ContentKind};

/// Client over a local iroh-blobs store.
///
/// Wraps the store in the iroh-blobs protocol handler so the same value can
/// be mounted on a router to serve content to peers.
#[derive(Clone, Debug)]
pub struct BlobsStore {
    pub inner: Arc<BlobsProtocol>,
}

impl Deref for BlobsStore {
    type Target = Arc<BlobsProtocol>;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BlobsStoreError {
    #[error("blobs store error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("blob store i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("export bao error: {0}")]
    ExportBao(#[from] ExportBaoError),
    #[error("request error: {0}")]
    Request(#[from] RequestError),
    #[error("blob not found: {0}")]
    NotFound(Hash),
}

fn other(err: impl Display) -> BlobsStoreError {
    BlobsStoreError::Default(anyhow!("{}", err))
}

impl BlobsStore {
    /// Load a persistent blob store from the given path.
    ///
    /// # Arguments
    /// * `path` - Path to the blob store on disk
    /// * `gc_interval` - When set, unprotected content is garbage collected
    ///     on this interval. Pins (persistent tags) and temp tags protect.
    #[allow(clippy::doc_overindented_list_items)]
    pub async fn fs(path: &Path, gc_interval: Option<Duration>) -> Result<Self, BlobsStoreError> {
        tracing::debug!("BlobsStore::fs called with path: {:?}", path);
        let mut options = Options::new(path);
        options.gc = gc_interval.map(|interval| GcConfig {
            interval,
            add_protected: None,
        });
        let store = FsStore::load_with_opts(path.join("blobs.db"), options).await?;
        tracing::debug!("BlobsStore::fs completed loading FsStore");
        let blobs = BlobsProtocol::new(&store, None);
        Ok(Self {
            inner: Arc::new(blobs),
        })
    }

    /// Load a memory blobs store
    pub async fn memory() -> Result<Self, BlobsStoreError> {
        let store = MemStore::new();
        let blobs = BlobsProtocol::new(&store, None);
        Ok(Self {
            inner: Arc::new(blobs),
        })
    }

    pub fn store(&self) -> &Store {
        self.inner.store()
    }

    /// Get a handle to the underlying blobs client against
    ///  the store
    pub fn blobs(&self) -> &Blobs {
        self.store().blobs()
    }

    /// Get a blob as bytes
    pub async fn get(&self, hash: &Hash) -> Result<Bytes, BlobsStoreError> {
        let bytes = self.blobs().get_bytes(*hash).await?;
        Ok(bytes)
    }

    /// Get a blob from the store as a reader
    pub async fn get_reader(&self, hash: Hash) -> Result<Reader, BlobsStoreError> {
        let reader = self.blobs().reader(hash);
        Ok(reader)
    }

    /// Store a stream of bytes as a blob.
    ///
    /// The returned temp tag keeps the blob alive until it is dropped; pin
    /// it before letting go.
    pub async fn put_stream(
        &self,
        stream: impl Stream<Item = std::io::Result<Bytes>> + Send + Unpin + 'static + std::marker::Sync,
    ) -> Result<TempTag, BlobsStoreError> {
        let tag = self
            .blobs()
            .add_stream(stream)
            .into_future()
            .await
            .temp_tag()
            .await?;
        Ok(tag)
    }

    /// Import a local file. `path` must be absolute.
    pub async fn put_path(&self, path: &Path) -> Result<TempTag, BlobsStoreError> {
        let tag = self.blobs().add_path(path).temp_tag().await?;
        Ok(tag)
    }

    /// Store a directory listing as a collection
    pub async fn put_collection(
        &self,
        entries: Vec<(String, Hash)>,
    ) -> Result<TempTag, BlobsStoreError> {
        let mut collection = Collection::default();
        for (name, hash) in entries {
            collection.push(name, hash);
        }
        let tag = collection.store(self.store()).await?;
        Ok(tag)
    }

    /// Load a directory listing. Root and name metadata must be local.
    pub async fn load_collection(&self, hash: Hash) -> Result<Collection, BlobsStoreError> {
        let collection = Collection::load(hash, self.store()).await?;
        Ok(collection)
    }

    /// Get the stat of a blob
    pub async fn stat(&self, hash: &Hash) -> Result<bool, BlobsStoreError> {
        let stat = self.blobs().status(*hash).await.map_err(other)?;
        Ok(matches!(stat, BlobStatus::Complete { .. }))
    }

    /// Whether everything needed to read `id` is present locally.
    ///
    /// For directories this covers the hash sequence and its direct
    /// children, not the contents of nested sub-directories.
    pub async fn is_complete(&self, id: &ContentId) -> Result<bool, BlobsStoreError> {
        if !self.stat(&id.hash()).await? {
            return Ok(false);
        }
        if id.kind() == ContentKind::File {
            return Ok(true);
        }
        let seq = HashSeq::try_from(self.get(&id.hash()).await?).map_err(other)?;
        for child in seq.iter() {
            if !self.stat(&child).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Protect `value` from garbage collection under the tag `name`
    pub async fn pin(&self, name: &str, value: HashAndFormat) -> Result<(), BlobsStoreError> {
        self.store().tags().set(name, value).await.map_err(other)?;
        Ok(())
    }

    pub async fn is_pinned(&self, name: &str) -> Result<bool, BlobsStoreError> {
        let tag = self.store().tags().get(name).await.map_err(other)?;
        Ok(tag.is_some())
    }

    /// Drop every tag whose name starts with `prefix`
    pub async fn unpin_prefix(&self, prefix: &str) -> Result<(), BlobsStoreError> {
        self.store().tags().delete_prefix(prefix).await.map_err(other)?;
        Ok(())
    }

    /// Download `id` from peers
    ///
    /// This checks if the content exists locally first, then downloads if needed.
    /// Uses the Downloader API with Shuffled content discovery.
    pub async fn download(
        &self,
        id: &ContentId,
        peer_ids: Vec<NodeId>,
        endpoint: &Endpoint,
    ) -> Result<(), BlobsStoreError> {
        if self.is_complete(id).await? {
            tracing::debug!("download: {} already exists locally, skipping download", id);
            return Ok(());
        }

        tracing::info!(
            "download: fetching {} from {} peers: {:?}",
            id,
            peer_ids.len(),
            peer_ids
        );

        let downloader = Downloader::new(self.store(), endpoint);
        let discovery = Shuffled::new(peer_ids.clone());

        if let Err(e) = downloader.download(id.hash_and_format(), discovery).await {
            tracing::warn!(
                "download: failed to fetch {} from peers {:?}: {}",
                id,
                peer_ids,
                e
            );
            return Err(other(e));
        }

        if !self.is_complete(id).await? {
            tracing::error!("download: {} NOT found after download!", id);
            return Err(BlobsStoreError::NotFound(id.hash()));
        }

        tracing::debug!("download: fetched {}", id);
        Ok(())
    }

    /// Flush and stop the store
    pub async fn shutdown(&self) -> Result<(), BlobsStoreError> {
        self.store().shutdown().await.map_err(other)?;
        Ok(())
    }
}
