//! Content identifiers and path translation.
//!
//! A [`ContentId`] is a BLAKE3 hash plus the kind of object it names. Files
//! are raw iroh blobs; directories are iroh collections (a hash sequence
//! whose first child holds the entry names). The kind is part of the text
//! form so callers never have to discover it after the fact:
//!
//! ```text
//! <64 hex>        file
//! dir-<64 hex>    directory
//! ```
//!
//! Paths handed to the storage contract look like `/iroh/<content-id>`; only
//! the final segment is significant.

use std::fmt;
use std::str::FromStr;

use iroh_blobs::{Hash, HashAndFormat};

/// Leading path segment for content stored on this backend
pub const NAMESPACE: &str = "/iroh";

const DIR_PREFIX: &str = "dir-";
const PIN_TAG_PREFIX: &str = "pin/";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContentIdError {
    #[error("path does not contain a content identifier: '{0}'")]
    EmptyPath(String),
    #[error("invalid content identifier: '{0}'")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContentKind {
    File,
    Directory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId {
    hash: Hash,
    kind: ContentKind,
}

impl ContentId {
    pub fn file(hash: Hash) -> Self {
        Self {
            hash,
            kind: ContentKind::File,
        }
    }

    pub fn directory(hash: Hash) -> Self {
        Self {
            hash,
            kind: ContentKind::Directory,
        }
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    pub fn is_dir(&self) -> bool {
        self.kind == ContentKind::Directory
    }

    /// Parse the identifier out of a storage path (`/iroh/<id>` or bare `<id>`)
    pub fn from_path(path: &str) -> Result<Self, ContentIdError> {
        let segment =
            final_segment(path).ok_or_else(|| ContentIdError::EmptyPath(path.to_string()))?;
        segment.parse()
    }

    /// `/iroh/<id>`
    pub fn canonical_path(&self) -> String {
        format!("{}/{}", NAMESPACE, self)
    }

    /// Format tag used for protection and transfer
    pub fn hash_and_format(&self) -> HashAndFormat {
        match self.kind {
            ContentKind::File => HashAndFormat::raw(self.hash),
            ContentKind::Directory => HashAndFormat::hash_seq(self.hash),
        }
    }

    /// Name of the persistent tag that pins this content
    pub fn pin_tag(&self) -> String {
        format!("{}{}", PIN_TAG_PREFIX, self)
    }

    /// Tag pinning a sub-directory of this directory's tree.
    ///
    /// Nested tags share [`ContentId::pin_tag`] as a prefix so unpinning the
    /// root releases the whole tree.
    pub fn nested_pin_tag(&self, child: &ContentId) -> String {
        format!("{}/{}", self.pin_tag(), child)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = hex::encode(self.hash.as_bytes());
        match self.kind {
            ContentKind::File => write!(f, "{}", hex),
            ContentKind::Directory => write!(f, "{}{}", DIR_PREFIX, hex),
        }
    }
}

impl FromStr for ContentId {
    type Err = ContentIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, hex) = match s.strip_prefix(DIR_PREFIX) {
            Some(rest) => (ContentKind::Directory, rest),
            None => (ContentKind::File, s),
        };
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(hex, &mut bytes).map_err(|_| ContentIdError::Invalid(s.to_string()))?;
        Ok(Self {
            hash: Hash::from_bytes(bytes),
            kind,
        })
    }
}

/// Last non-empty `/`-separated segment of `path`
pub fn final_segment(path: &str) -> Option<&str> {
    path.split('/').filter(|segment| !segment.is_empty()).last()
}
