//! Local staging of retrieved content.
//!
//! `get` materializes content under the temp directory, named by the final
//! segment of the requested path. A staged entry is reused on later calls.
//! Writes land in a `.partial` sibling first and are renamed into place, so
//! a half-written entry is never mistaken for a staged one.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use iroh_blobs::Hash;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::node::content_id::final_segment;
use crate::node::{ContentId, ContentKind, Node};
use crate::storage::StorageError;

const PARTIAL_SUFFIX: &str = ".partial";

/// Staged file name for `path`: its final non-empty segment
pub fn derive_name(path: &str) -> Result<&str, StorageError> {
    final_segment(path).ok_or_else(|| StorageError::Path(path.to_string()))
}

/// Split a directory entry name into its display name and kind.
///
/// Sub-directory entries carry a trailing `/`.
pub fn split_entry(name: &str) -> (&str, ContentKind) {
    match name.strip_suffix('/') {
        Some(dir) => (dir, ContentKind::Directory),
        None => (name, ContentKind::File),
    }
}

/// Serializes work on one identifier.
///
/// Concurrent `get`s of the same identifier queue behind a shared lock; the
/// first one stages the content and the rest find it staged.
#[derive(Debug, Default)]
pub struct InFlight {
    slots: Mutex<HashMap<ContentId, Weak<AsyncMutex<()>>>>,
}

impl InFlight {
    pub async fn acquire(&self, id: ContentId) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock();
            slots.retain(|_, slot| slot.strong_count() > 0);
            match slots.get(&id).and_then(Weak::upgrade) {
                Some(slot) => slot,
                None => {
                    let slot = Arc::new(AsyncMutex::new(()));
                    slots.insert(id, Arc::downgrade(&slot));
                    slot
                }
            }
        };
        slot.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().values().filter(|s| s.strong_count() > 0).count()
    }
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(PARTIAL_SUFFIX);
    target.with_file_name(name)
}

/// Write a local blob to `target`
pub async fn materialize_file(node: &Node, hash: Hash, target: &Path) -> Result<(), StorageError> {
    let partial = partial_path(target);
    write_blob(node, hash, &partial).await?;
    tokio::fs::rename(&partial, target).await?;
    Ok(())
}

async fn write_blob(node: &Node, hash: Hash, dest: &Path) -> Result<(), StorageError> {
    let mut reader = Box::pin(node.blobs().get_reader(hash).await?);
    let mut file = tokio::fs::File::create(dest).await?;
    tokio::io::copy(&mut reader, &mut file).await?;
    file.sync_all().await?;
    Ok(())
}

/// Write the directory tree rooted at `id` to `target`.
///
/// Sub-directories missing locally are fetched from known peers on the way.
pub async fn materialize_dir(node: &Node, id: ContentId, target: &Path) -> Result<(), StorageError> {
    let partial = partial_path(target);
    if tokio::fs::try_exists(&partial).await? {
        tokio::fs::remove_dir_all(&partial).await?;
    }
    write_tree(node, id, partial.clone()).await?;
    tokio::fs::rename(&partial, target).await?;
    Ok(())
}

fn write_tree(node: &Node, id: ContentId, dest: PathBuf) -> BoxFuture<'_, Result<(), StorageError>> {
    Box::pin(async move {
        tokio::fs::create_dir_all(&dest).await?;
        let collection = node.blobs().load_collection(id.hash()).await?;
        for (name, hash) in collection.iter() {
            let (entry, kind) = split_entry(name);
            if entry.is_empty() || entry == "." || entry == ".." || entry.contains('/') {
                return Err(StorageError::Path(format!("{}/{}", id, name)));
            }
            let child_path = dest.join(entry);
            match kind {
                ContentKind::File => write_blob(node, *hash, &child_path).await?,
                ContentKind::Directory => {
                    let child = ContentId::directory(*hash);
                    node.fetch(&child)
                        .await
                        .map_err(|_| StorageError::NotFound(child.canonical_path()))?;
                    write_tree(node, child, child_path).await?;
                }
            }
        }
        Ok(())
    })
}

/// Whether the staged file at `path` hashes to `hash`
pub async fn verify_file(path: &Path, hash: Hash) -> io::Result<bool> {
    let path = path.to_path_buf();
    let computed = tokio::task::spawn_blocking(move || -> io::Result<blake3::Hash> {
        let mut hasher = blake3::Hasher::new();
        hasher.update_reader(std::fs::File::open(path)?)?;
        Ok(hasher.finalize())
    })
    .await
    .map_err(io::Error::other)??;
    Ok(computed.as_bytes() == hash.as_bytes())
}

/// Remove a staged entry, ignoring failures
pub async fn remove_staged(target: &Path) {
    let result = match tokio::fs::metadata(target).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(target).await,
        Ok(_) => tokio::fs::remove_file(target).await,
        Err(_) => return,
    };
    if let Err(e) = result {
        tracing::debug!(path = %target.display(), "failed to remove staged entry: {}", e);
    }
}
