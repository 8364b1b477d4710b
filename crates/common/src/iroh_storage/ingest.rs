//! Turning local files, directories and byte streams into content.

use std::io;
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use futures::Stream;
use iroh_blobs::api::TempTag;
use tokio::io::AsyncReadExt;

use crate::node::{BlobsStore, BlobsStoreError, ContentId};
use crate::storage::{ByteReader, StorageError};

const CHUNK_SIZE: usize = 64 * 1024;

/// Freshly added content, kept alive by temp tags until it is pinned
#[derive(Debug)]
pub struct Ingested {
    pub id: ContentId,
    /// Sub-directories of a directory tree, each pinned separately
    pub subdirs: Vec<ContentId>,
    tags: Vec<TempTag>,
}

impl Ingested {
    fn new(id: ContentId, tag: TempTag) -> Self {
        Self {
            id,
            subdirs: Vec::new(),
            tags: vec![tag],
        }
    }

    /// Pin the content and every nested directory, then release the temp
    /// tags.
    pub async fn pin(self, blobs: &BlobsStore) -> Result<ContentId, BlobsStoreError> {
        let id = self.id;
        blobs.pin(&id.pin_tag(), id.hash_and_format()).await?;
        for subdir in &self.subdirs {
            blobs
                .pin(&id.nested_pin_tag(subdir), subdir.hash_and_format())
                .await?;
        }
        tracing::debug!(%id, nested = self.subdirs.len(), "pinned content");
        drop(self.tags);
        Ok(id)
    }
}

/// Ingest the local file or directory at `path`
pub async fn local_path(blobs: &BlobsStore, path: &Path) -> Result<Ingested, StorageError> {
    let not_found = |_| StorageError::NotFound(path.display().to_string());
    let meta = tokio::fs::metadata(path).await.map_err(not_found)?;
    let path = tokio::fs::canonicalize(path).await.map_err(not_found)?;

    if meta.is_dir() {
        let mut tags = Vec::new();
        let mut subdirs = Vec::new();
        let id = directory(blobs, path, &mut tags, &mut subdirs).await?;
        Ok(Ingested { id, subdirs, tags })
    } else {
        let tag = blobs.put_path(&path).await?;
        Ok(Ingested::new(ContentId::file(tag.hash()), tag))
    }
}

fn directory<'a>(
    blobs: &'a BlobsStore,
    dir: PathBuf,
    tags: &'a mut Vec<TempTag>,
    subdirs: &'a mut Vec<ContentId>,
) -> BoxFuture<'a, Result<ContentId, StorageError>> {
    Box::pin(async move {
        let mut read_dir = tokio::fs::read_dir(&dir).await?;
        let mut entries = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            entries.push(entry);
        }
        entries.sort_by_key(|entry| entry.file_name());

        let mut children = Vec::with_capacity(entries.len());
        for entry in entries {
            let name = entry
                .file_name()
                .into_string()
                .map_err(|raw| StorageError::Path(raw.to_string_lossy().into_owned()))?;
            if name.starts_with('.') {
                tracing::debug!(path = %entry.path().display(), "skipping hidden entry");
                continue;
            }
            let file_type = entry.file_type().await?;

            if file_type.is_dir() {
                let child = directory(blobs, entry.path(), tags, subdirs).await?;
                subdirs.push(child);
                children.push((format!("{}/", name), child.hash()));
            } else if file_type.is_file() || file_type.is_symlink() {
                let path = regular_file(&entry.path()).await?;
                let tag = blobs.put_path(&path).await?;
                children.push((name, tag.hash()));
                tags.push(tag);
            } else {
                return Err(unsupported(&entry.path()));
            }
        }

        let tag = blobs.put_collection(children).await?;
        let id = ContentId::directory(tag.hash());
        tags.push(tag);
        Ok(id)
    })
}

/// Resolve `path` to a regular file, following symlinks. Links to
/// directories and dangling links are rejected.
async fn regular_file(path: &Path) -> Result<PathBuf, StorageError> {
    let target = tokio::fs::canonicalize(path)
        .await
        .map_err(|_| unsupported(path))?;
    if !tokio::fs::metadata(&target).await?.is_file() {
        return Err(unsupported(path));
    }
    Ok(target)
}

fn unsupported(path: &Path) -> StorageError {
    StorageError::Path(format!("{}: not a regular file or directory", path.display()))
}

/// Ingest everything `reader` yields as a single file
pub async fn stream(blobs: &BlobsStore, reader: ByteReader) -> Result<Ingested, StorageError> {
    let tag = blobs.put_stream(Box::pin(chunks(reader))).await?;
    Ok(Ingested::new(ContentId::file(tag.hash()), tag))
}

fn chunks(reader: ByteReader) -> impl Stream<Item = io::Result<Bytes>> + Send + Sync + 'static {
    futures::stream::unfold(Some(reader), |state| async move {
        let mut reader = state?;
        let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
        match reader.read_buf(&mut buf).await {
            Ok(0) => None,
            Ok(_) => Some((Ok(buf.freeze()), Some(reader))),
            Err(e) => Some((Err(e), None)),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup() -> (BlobsStore, TempDir) {
        let temp = TempDir::new().unwrap();
        let blobs = BlobsStore::fs(&temp.path().join("blobs"), None).await.unwrap();
        (blobs, temp)
    }

    #[tokio::test]
    async fn test_stream_ingest_matches_content_hash() {
        let (blobs, _temp) = setup().await;
        let data = vec![42u8; CHUNK_SIZE * 3 + 17];

        let reader: ByteReader = Box::new(std::io::Cursor::new(data.clone()));
        let ingested = stream(&blobs, reader).await.unwrap();

        assert_eq!(ingested.id, ContentId::file(iroh_blobs::Hash::new(&data)));
        assert_eq!(blobs.get(&ingested.id.hash()).await.unwrap().as_ref(), &data[..]);
    }

    #[tokio::test]
    async fn test_missing_path_is_not_found() {
        let (blobs, temp) = setup().await;
        let err = local_path(&blobs, &temp.path().join("nope")).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_directory_is_nested_and_sorted() {
        let (blobs, temp) = setup().await;
        let root = temp.path().join("tree");
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("b.txt"), b"b").unwrap();
        std::fs::write(root.join("a.txt"), b"a").unwrap();
        std::fs::write(root.join("sub/c.txt"), b"c").unwrap();

        let ingested = local_path(&blobs, &root).await.unwrap();
        assert!(ingested.id.is_dir());
        assert_eq!(ingested.subdirs.len(), 1);

        let collection = blobs.load_collection(ingested.id.hash()).await.unwrap();
        let names: Vec<_> = collection.iter().map(|(name, _)| name.clone()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "sub/"]);

        let sub = ingested.subdirs[0];
        let pinned = ingested.pin(&blobs).await.unwrap();
        assert!(blobs.is_pinned(&pinned.pin_tag()).await.unwrap());
        assert!(blobs
            .is_pinned(&pinned.nested_pin_tag(&sub))
            .await
            .unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_directory_skips_hidden_and_follows_file_links() {
        let (blobs, temp) = setup().await;
        let root = temp.path().join("tree");
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::write(root.join("a.txt"), b"a").unwrap();
        std::fs::write(root.join(".DS_Store"), b"junk").unwrap();
        std::fs::write(temp.path().join("outside.txt"), b"linked").unwrap();
        std::os::unix::fs::symlink(temp.path().join("outside.txt"), root.join("link.txt")).unwrap();

        let ingested = local_path(&blobs, &root).await.unwrap();
        assert!(ingested.subdirs.is_empty());

        let collection = blobs.load_collection(ingested.id.hash()).await.unwrap();
        let entries: Vec<_> = collection.iter().cloned().collect();
        assert_eq!(
            entries,
            vec![
                ("a.txt".to_string(), iroh_blobs::Hash::new(b"a")),
                ("link.txt".to_string(), iroh_blobs::Hash::new(b"linked")),
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_directory_rejects_dangling_link() {
        let (blobs, temp) = setup().await;
        let root = temp.path().join("tree");
        std::fs::create_dir_all(&root).unwrap();
        std::os::unix::fs::symlink(temp.path().join("gone"), root.join("broken")).unwrap();

        let err = local_path(&blobs, &root).await.unwrap_err();
        assert!(matches!(err, StorageError::Path(_)));
    }

    #[tokio::test]
    async fn test_same_tree_same_id() {
        let (blobs, temp) = setup().await;
        for name in ["one", "two"] {
            let dir = temp.path().join(name);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("f"), b"same").unwrap();
        }
        let one = local_path(&blobs, &temp.path().join("one")).await.unwrap();
        let two = local_path(&blobs, &temp.path().join("two")).await.unwrap();
        assert_eq!(one.id, two.id);
    }
}
