//! Repository provisioner.
//!
//! A repository is the persistent state of one node:
//!
//! ```text
//! <root>/config.toml   bootstrap peers, addresses, datastore section
//! <root>/key.pem       node identity
//! <root>/blobs/        iroh-blobs datastore (fs datastores only)
//! ```
//!
//! Repositories are init-once: provisioning a root that already holds a
//! `config.toml` fails with [`RepositoryError::Exists`]. Use
//! [`Repository::open`] to pick an existing one back up.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::SecretKey;

use super::config::{AddressConfig, ConfigError, DatastoreConfig, ResolvedConfig};

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const KEY_FILE_NAME: &str = "key.pem";

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("repository already initialized at {0}")]
    Exists(PathBuf),
    #[error("failed to open repository at {path}: {reason}")]
    Open { path: PathBuf, reason: String },
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("repository i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

/// Persisted repository configuration (`config.toml`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Node id derived from `key.pem`, kept for operators and sanity checks
    pub node_id: String,
    #[serde(default)]
    pub bootstrap: Vec<String>,
    #[serde(default)]
    pub addresses: AddressConfig,
    #[serde(default)]
    pub datastore: DatastoreConfig,
}

/// A provisioned repository on disk.
#[derive(Debug, Clone)]
pub struct Repository {
    root: PathBuf,
    config: RepoConfig,
    secret_key: SecretKey,
}

impl Repository {
    /// Whether `root` already holds a repository
    pub fn is_initialized(root: &Path) -> bool {
        root.join(CONFIG_FILE_NAME).exists()
    }

    /// Materialize a new repository at `root`.
    ///
    /// Creates `root` and `temp_dir` when missing, overlays the datastore
    /// override onto the default datastore section and writes identity and
    /// configuration to disk.
    pub fn init(
        root: &Path,
        temp_dir: &Path,
        resolved: ResolvedConfig,
        datastore_override: Option<&Value>,
    ) -> Result<Self, RepositoryError> {
        ensure_dir(root)?;
        ensure_dir(temp_dir)?;

        if Self::is_initialized(root) {
            return Err(RepositoryError::Exists(root.to_path_buf()));
        }

        let datastore = match datastore_override {
            Some(overrides) => DatastoreConfig::default().overlay(overrides)?,
            None => DatastoreConfig::default(),
        };

        if let Some(store_path) = datastore.store_path(root) {
            ensure_dir(&store_path)?;
        }

        let ResolvedConfig {
            secret_key,
            bootstrap,
            addresses,
        } = resolved;

        let config = RepoConfig {
            node_id: secret_key.public().to_string(),
            bootstrap,
            addresses,
            datastore,
        };

        write_key(&root.join(KEY_FILE_NAME), &secret_key)?;
        // config.toml goes last; its presence marks the repository as initialized
        fs::write(root.join(CONFIG_FILE_NAME), toml::to_string_pretty(&config)?)?;

        tracing::info!(
            root = %root.display(),
            node_id = %config.node_id,
            "initialized repository"
        );

        Ok(Self {
            root: root.to_path_buf(),
            config,
            secret_key,
        })
    }

    /// Open a previously provisioned repository
    pub fn open(root: &Path) -> Result<Self, RepositoryError> {
        let open_err = |reason: String| RepositoryError::Open {
            path: root.to_path_buf(),
            reason,
        };

        if !Self::is_initialized(root) {
            return Err(open_err("repository not initialized".to_string()));
        }

        let config_toml = fs::read_to_string(root.join(CONFIG_FILE_NAME))
            .map_err(|e| open_err(format!("failed to read {}: {}", CONFIG_FILE_NAME, e)))?;
        let config: RepoConfig = toml::from_str(&config_toml)
            .map_err(|e| open_err(format!("invalid {}: {}", CONFIG_FILE_NAME, e)))?;

        let pem = fs::read_to_string(root.join(KEY_FILE_NAME))
            .map_err(|e| open_err(format!("failed to read {}: {}", KEY_FILE_NAME, e)))?;
        let secret_key = SecretKey::from_pem(&pem)
            .map_err(|e| open_err(format!("invalid {}: {}", KEY_FILE_NAME, e)))?;

        if secret_key.public().to_string() != config.node_id {
            return Err(open_err(format!(
                "{} does not match node id {}",
                KEY_FILE_NAME, config.node_id
            )));
        }

        tracing::debug!(root = %root.display(), node_id = %config.node_id, "opened repository");

        Ok(Self {
            root: root.to_path_buf(),
            config,
            secret_key,
        })
    }

    /// Remove the identity and configuration written by [`Repository::init`]
    /// so the root can be provisioned again. Datastore contents are left
    /// in place.
    pub fn discard(self) {
        for name in [CONFIG_FILE_NAME, KEY_FILE_NAME] {
            let path = self.root.join(name);
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), "failed to discard repository file: {}", e);
            }
        }
        tracing::info!(root = %self.root.display(), "discarded repository");
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }

    pub fn datastore(&self) -> &DatastoreConfig {
        &self.config.datastore
    }

    pub fn addresses(&self) -> &AddressConfig {
        &self.config.addresses
    }

    pub fn bootstrap(&self) -> &[String] {
        &self.config.bootstrap
    }

    /// Location of the blob store, `None` for in-memory datastores
    pub fn store_path(&self) -> Option<PathBuf> {
        self.config.datastore.store_path(&self.root)
    }
}

/// Create `path` (and parents) if it does not exist yet
pub fn ensure_dir(path: &Path) -> Result<(), RepositoryError> {
    if path.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(path).map_err(|source| RepositoryError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

fn write_key(path: &Path, secret_key: &SecretKey) -> Result<(), RepositoryError> {
    fs::write(path, secret_key.to_pem())?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}
