//! Node configuration and the config resolver.
//!
//! [`NodeConfig`] is the document an application hands us at construction
//! time. [`resolve`] turns it into a [`ResolvedConfig`]: a fresh identity,
//! the bootstrap peer list and the effective listen addresses. The datastore
//! override is applied later by the repository provisioner, which owns the
//! on-disk layout.

use std::net::{SocketAddr, SocketAddrV4, SocketAddrV6};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::{KeyError, SecretKey};

pub const DEFAULT_BLOBS_DIR: &str = "blobs";
pub const DEFAULT_DIAL_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config document: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid datastore override: {0}")]
    Datastore(serde_json::Error),
    #[error("invalid address override: {0}")]
    Addresses(serde_json::Error),
    #[error("missing required path: {0}")]
    MissingPath(&'static str),
    #[error("failed to generate identity: {0}")]
    Identity(#[from] KeyError),
}

/// Role the node plays in the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Fetches and serves content
    #[default]
    Full,
    /// Only fetches; no protocol router is spawned
    Client,
}

/// What to do when an optional engine plugin fails to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginPolicy {
    /// Log the failure and continue without the plugin
    #[default]
    BestEffort,
    /// Abort node start
    Strict,
}

/// Configuration document consumed when an adapter is constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Repository root (identity, config, datastore)
    pub root_path: PathBuf,
    /// Staging directory for files materialized by `get`
    pub temp_dir: PathBuf,
    #[serde(default = "default_true")]
    pub networking: bool,
    /// iroh connections are always encrypted; `false` is accepted but ignored
    #[serde(default = "default_true")]
    pub encrypted_connections: bool,
    /// Peer addresses, e.g. `/ip4/10.0.0.2/udp/4433/p2p/<node-id>`
    #[serde(default)]
    pub peers: Vec<String>,
    #[serde(default)]
    pub node_type: NodeType,
    /// Datastore section override, overlaid onto the default datastore
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datastore: Option<Value>,
    /// Address section override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addresses: Option<Value>,
    /// Keep the node off relays and discovery; only configured peers reach it
    #[serde(default)]
    pub private_network: bool,
    /// Engine plugins to load at startup (known: `dht`)
    #[serde(default)]
    pub plugins: Vec<String>,
    #[serde(default)]
    pub plugin_policy: PluginPolicy,
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,
    /// Re-hash staged files against their identifier before serving them
    #[serde(default)]
    pub verify_staged: bool,
}

fn default_true() -> bool {
    true
}

fn default_dial_timeout_ms() -> u64 {
    DEFAULT_DIAL_TIMEOUT_MS
}

impl NodeConfig {
    /// A config with defaults for everything but the two paths
    pub fn new(root_path: impl Into<PathBuf>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
            temp_dir: temp_dir.into(),
            networking: true,
            encrypted_connections: true,
            peers: Vec::new(),
            node_type: NodeType::default(),
            datastore: None,
            addresses: None,
            private_network: false,
            plugins: Vec::new(),
            plugin_policy: PluginPolicy::default(),
            dial_timeout_ms: DEFAULT_DIAL_TIMEOUT_MS,
            verify_staged: false,
        }
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.root_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingPath("root_path"));
        }
        if self.temp_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingPath("temp_dir"));
        }
        Ok(())
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    /// Relays and discovery are only used on a public, networked node
    pub fn uses_public_infrastructure(&self) -> bool {
        self.networking && !self.private_network
    }
}

/// Datastore section of the repository config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DatastoreConfig {
    /// Persistent iroh-blobs store, relative paths resolve under the repo root
    Fs {
        #[serde(default = "default_blobs_dir")]
        path: PathBuf,
        /// Run garbage collection of unpinned content on this interval
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gc_interval_secs: Option<u64>,
    },
    /// Volatile in-memory store
    Memory,
}

fn default_blobs_dir() -> PathBuf {
    PathBuf::from(DEFAULT_BLOBS_DIR)
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        DatastoreConfig::Fs {
            path: default_blobs_dir(),
            gc_interval_secs: None,
        }
    }
}

impl DatastoreConfig {
    /// Overlay a JSON override onto this section.
    ///
    /// Keys present in the override replace ours. An override naming a
    /// different `type` replaces the section wholesale.
    pub fn overlay(&self, overrides: &Value) -> Result<Self, ConfigError> {
        let mut base = serde_json::to_value(self).map_err(ConfigError::Datastore)?;
        let same_type = match overrides.get("type") {
            Some(kind) => base.get("type") == Some(kind),
            None => true,
        };
        if same_type {
            merge_json(&mut base, overrides);
        } else {
            base = overrides.clone();
        }
        serde_json::from_value(base).map_err(ConfigError::Datastore)
    }

    /// Resolve the on-disk location of the store, if any
    pub fn store_path(&self, root: &Path) -> Option<PathBuf> {
        match self {
            DatastoreConfig::Fs { path, .. } if path.is_absolute() => Some(path.clone()),
            DatastoreConfig::Fs { path, .. } => Some(root.join(path)),
            DatastoreConfig::Memory => None,
        }
    }

    pub fn gc_interval(&self) -> Option<Duration> {
        match self {
            DatastoreConfig::Fs {
                gc_interval_secs: Some(secs),
                ..
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

/// Address section of the repository config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddressConfig {
    /// Sockets to listen on; the first IPv4 and first IPv6 entries are used
    #[serde(default)]
    pub swarm: Vec<SocketAddr>,
}

impl AddressConfig {
    pub fn bind_v4(&self) -> Option<SocketAddrV4> {
        self.swarm.iter().find_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(*v4),
            SocketAddr::V6(_) => None,
        })
    }

    pub fn bind_v6(&self) -> Option<SocketAddrV6> {
        self.swarm.iter().find_map(|addr| match addr {
            SocketAddr::V6(v6) => Some(*v6),
            SocketAddr::V4(_) => None,
        })
    }
}

/// Output of the config resolver, ready to be provisioned.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub secret_key: SecretKey,
    pub bootstrap: Vec<String>,
    pub addresses: AddressConfig,
}

/// Build the base node configuration for a fresh repository.
///
/// Generates a new identity, takes the configured peers as the bootstrap
/// list and overlays the address override when one is given. No side
/// effects.
pub fn resolve(config: &NodeConfig) -> Result<ResolvedConfig, ConfigError> {
    let secret_key = SecretKey::generate()?;

    let addresses = match &config.addresses {
        Some(overrides) => {
            serde_json::from_value(overrides.clone()).map_err(ConfigError::Addresses)?
        }
        None => AddressConfig::default(),
    };

    tracing::debug!(
        node_id = %secret_key.public().node_id(),
        bootstrap = config.peers.len(),
        "resolved node configuration"
    );

    Ok(ResolvedConfig {
        secret_key,
        bootstrap: config.peers.clone(),
        addresses,
    })
}

fn merge_json(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}
