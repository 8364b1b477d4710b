//! The storage contract shared by every backend.
//!
//! Application code talks to a [`StorageInterface`]; the content-addressed
//! backend lives in [`crate::iroh_storage`].

use std::fmt::Debug;
use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncSeek};

use crate::node::{BlobsStoreError, ContentIdError, ContentKind, NodeError};

mod context;
mod object;

pub use context::{CallContext, CancelHandle};
pub use object::{Object, Retrieved};

/// Caller-supplied bytes for `put`
pub type ByteReader = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Readable, seekable object content
pub trait ObjectRead: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> ObjectRead for T {}

pub type ObjectReader = Box<dyn ObjectRead>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid path: '{0}'")]
    Path(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{path} is a {found:?}, expected a {expected:?}")]
    TypeMismatch {
        path: String,
        expected: ContentKind,
        found: ContentKind,
    },
    /// Content was stored but could not be pinned. The handle is still
    /// returned so the caller can retry or clean up.
    #[error("stored {} but failed to pin it: {source}", .object.path)]
    PinFailed {
        object: Box<Object>,
        source: BlobsStoreError,
    },
    #[error("operation cancelled")]
    Cancelled,
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("node error: {0}")]
    Node(#[from] NodeError),
    #[error("blobs store error: {0}")]
    Blobs(#[from] BlobsStoreError),
    #[error("storage i/o error: {0}")]
    Io(#[from] io::Error),
}

impl From<ContentIdError> for StorageError {
    fn from(err: ContentIdError) -> Self {
        match err {
            ContentIdError::EmptyPath(path) => StorageError::Path(path),
            // a malformed identifier can never resolve
            ContentIdError::Invalid(id) => StorageError::NotFound(id),
        }
    }
}

impl StorageError {
    /// The handle carried alongside a failure, if any
    pub fn object(&self) -> Option<&Object> {
        match self {
            StorageError::PinFailed { object, .. } => Some(object),
            _ => None,
        }
    }
}

/// Uniform object-storage contract.
///
/// Every call that touches the backend takes a [`CallContext`] carrying its
/// deadline and cancellation signal.
#[async_trait]
pub trait StorageInterface: Send + Sync + Debug {
    /// Store `reader`'s bytes, or the local file or directory at `path` when
    /// no reader is given.
    async fn put(
        &self,
        ctx: &CallContext,
        path: &str,
        reader: Option<ByteReader>,
    ) -> Result<Object, StorageError>;

    /// Materialize `path` locally and hand back the result
    async fn get(&self, ctx: &CallContext, path: &str) -> Result<Retrieved, StorageError>;

    /// Open a file's content without staging it
    async fn get_stream(&self, ctx: &CallContext, path: &str)
        -> Result<ObjectReader, StorageError>;

    async fn delete(&self, ctx: &CallContext, path: &str) -> Result<(), StorageError>;

    /// Direct children of the directory at `path`
    async fn list(&self, ctx: &CallContext, path: &str) -> Result<Vec<Object>, StorageError>;

    fn get_url(&self, path: &str) -> String;

    fn get_endpoint(&self) -> String;
}
