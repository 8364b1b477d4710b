use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use iroh::discovery::ConcurrentDiscovery;
use iroh::protocol::Router;
use iroh::{Endpoint, NodeId, RelayMode};
use parking_lot::{Mutex, RwLock};

use crate::crypto::SecretKey;

use super::blobs_store::{BlobsStore, BlobsStoreError};
use super::config::{NodeConfig, NodeType};
use super::content_id::ContentId;
use super::peers::{self, PeerAddressError};
use super::plugins::{PluginError, PluginLoader};
use super::repo::Repository;

/// Lifecycle of a node.
///
/// `Unstarted → Provisioned → Running → Stopped`. A stopped node is never
/// restarted; build a new one over the same repository instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Unstarted,
    Provisioned,
    Running,
    Stopped,
}

impl NodeState {
    pub fn can_advance_to(self, next: NodeState) -> bool {
        matches!(
            (self, next),
            (NodeState::Unstarted, NodeState::Provisioned)
                | (NodeState::Provisioned, NodeState::Running)
                | (NodeState::Running, NodeState::Stopped)
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("failed to start node: {0}")]
    Start(#[source] anyhow::Error),
    #[error("failed to stop node: {0}")]
    Stop(#[source] anyhow::Error),
    #[error("plugin error: {0}")]
    Plugin(#[from] PluginError),
    #[error("node is not running (state: {0:?})")]
    NotRunning(NodeState),
    #[error("invalid node state transition {from:?} -> {to:?}")]
    Transition { from: NodeState, to: NodeState },
}

fn start_err(err: impl Into<anyhow::Error>) -> NodeError {
    NodeError::Start(err.into())
}

/// A running iroh node bound to one repository.
///
/// Owns the endpoint, the blob store and, for full nodes, the protocol
/// router that serves content to peers.
#[derive(Debug)]
pub struct Node {
    repo: Repository,
    blobs: BlobsStore,
    endpoint: Endpoint,
    router: Option<Router>,
    node_type: NodeType,
    dial_timeout: std::time::Duration,
    known_peers: RwLock<BTreeSet<NodeId>>,
    state: Mutex<NodeState>,
}

impl Node {
    /// Open the provisioned repository at `config.root_path` and bring the
    /// node online.
    pub async fn start(config: &NodeConfig) -> Result<Self, NodeError> {
        let repo = Repository::open(&config.root_path).map_err(start_err)?;
        let mut state = NodeState::Provisioned;

        let plugins = PluginLoader::load(&config.plugins, repo.root(), config.plugin_policy)?;

        let blobs = match repo.store_path() {
            Some(path) => BlobsStore::fs(&path, repo.datastore().gc_interval()).await,
            None => BlobsStore::memory().await,
        }
        .map_err(start_err)?;

        if !config.encrypted_connections {
            tracing::warn!("encrypted_connections = false is not supported, connections stay encrypted");
        }

        let secret_key: &SecretKey = repo.secret_key();
        let mut builder = Endpoint::builder().secret_key(secret_key.0.clone());

        if config.uses_public_infrastructure() {
            let services = plugins.inject(secret_key)?;
            if !services.is_empty() {
                tracing::debug!(plugins = ?plugins.names(), "enabling plugin discovery");
                builder = builder.discovery(ConcurrentDiscovery::from_services(services));
            }
        } else {
            builder = builder.relay_mode(RelayMode::Disabled);
        }

        if let Some(v4) = repo.addresses().bind_v4() {
            builder = builder.bind_addr_v4(v4);
        }
        if let Some(v6) = repo.addresses().bind_v6() {
            builder = builder.bind_addr_v6(v6);
        }

        let endpoint = builder.bind().await.map_err(start_err)?;

        let router = match config.node_type {
            NodeType::Full => Some(
                Router::builder(endpoint.clone())
                    .accept(iroh_blobs::ALPN, blobs.inner.clone())
                    .spawn(),
            ),
            NodeType::Client => None,
        };

        debug_assert!(state.can_advance_to(NodeState::Running));
        state = NodeState::Running;

        tracing::info!(
            node_id = %endpoint.node_id(),
            node_type = ?config.node_type,
            root = %repo.root().display(),
            "node started"
        );

        Ok(Self {
            repo,
            blobs,
            endpoint,
            router,
            node_type: config.node_type,
            dial_timeout: config.dial_timeout(),
            known_peers: RwLock::new(BTreeSet::new()),
            state: Mutex::new(state),
        })
    }

    pub fn state(&self) -> NodeState {
        *self.state.lock()
    }

    pub fn ensure_running(&self) -> Result<(), NodeError> {
        match self.state() {
            NodeState::Running => Ok(()),
            other => Err(NodeError::NotRunning(other)),
        }
    }

    pub fn id(&self) -> NodeId {
        self.endpoint.node_id()
    }

    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    pub fn blobs(&self) -> &BlobsStore {
        &self.blobs
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// `/ip4/<ip>/udp/<port>/p2p/<node-id>` for the first bound socket, or
    /// an empty string when the endpoint has none.
    pub fn node_addr_string(&self) -> String {
        let Some(socket) = self.endpoint.bound_sockets().into_iter().next() else {
            return String::new();
        };
        let socket = dialable(socket);
        let proto = match socket.ip() {
            IpAddr::V4(_) => "ip4",
            IpAddr::V6(_) => "ip6",
        };
        format!("/{}/{}/udp/{}/p2p/{}", proto, socket.ip(), socket.port(), self.id())
    }

    /// Peers that answered a dial, used as download providers
    pub fn known_peers(&self) -> Vec<NodeId> {
        self.known_peers.read().iter().copied().collect()
    }

    /// Parse, dial and remember `addrs`.
    ///
    /// Malformed input fails before anything is dialed. Unreachable peers
    /// are logged and left out of the result.
    pub async fn connect_peers<S: AsRef<str>>(
        &self,
        addrs: &[S],
    ) -> Result<Vec<NodeId>, PeerAddressError> {
        let grouped = peers::parse_peers(addrs)?;
        if grouped.is_empty() {
            return Ok(Vec::new());
        }
        let connected = peers::connect_all(&self.endpoint, grouped, self.dial_timeout).await;
        self.known_peers.write().extend(connected.iter().copied());
        Ok(connected)
    }

    /// Make `id` available locally, fetching it from known peers if needed
    pub async fn fetch(&self, id: &ContentId) -> Result<(), BlobsStoreError> {
        if self.blobs.is_complete(id).await? {
            return Ok(());
        }
        let providers = self.known_peers();
        if providers.is_empty() {
            return Err(BlobsStoreError::NotFound(id.hash()));
        }
        self.blobs.download(id, providers, &self.endpoint).await
    }

    /// Shut the router (or bare endpoint) and the store down.
    ///
    /// Stopping an already stopped node is a no-op.
    pub async fn stop(&self) -> Result<(), NodeError> {
        {
            let mut state = self.state.lock();
            if *state == NodeState::Stopped {
                return Ok(());
            }
            if !state.can_advance_to(NodeState::Stopped) {
                return Err(NodeError::Transition {
                    from: *state,
                    to: NodeState::Stopped,
                });
            }
            *state = NodeState::Stopped;
        }

        match &self.router {
            Some(router) => router
                .shutdown()
                .await
                .map_err(|e| NodeError::Stop(anyhow::anyhow!("router shutdown: {}", e)))?,
            None => self.endpoint.close().await,
        }
        self.blobs
            .shutdown()
            .await
            .map_err(|e| NodeError::Stop(e.into()))?;

        tracing::info!(node_id = %self.id(), "node stopped");
        Ok(())
    }
}

/// Unspecified bind addresses are reported as loopback so they can be dialed
fn dialable(socket: SocketAddr) -> SocketAddr {
    match socket.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(Ipv4Addr::LOCALHOST.into(), socket.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(Ipv6Addr::LOCALHOST.into(), socket.port())
        }
        _ => socket,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::config::resolve;
    use crate::node::peers::PeerAddr;
    use serde_json::json;
    use tempfile::TempDir;

    fn offline_config(temp: &TempDir) -> NodeConfig {
        let mut config = NodeConfig::new(temp.path().join("repo"), temp.path().join("tmp"));
        config.networking = false;
        config.datastore = Some(json!({"type": "memory"}));
        config
    }

    fn provision(config: &NodeConfig) {
        let resolved = resolve(config).unwrap();
        Repository::init(
            &config.root_path,
            &config.temp_dir,
            resolved,
            config.datastore.as_ref(),
        )
        .unwrap();
    }

    #[test]
    fn test_state_transitions() {
        assert!(NodeState::Unstarted.can_advance_to(NodeState::Provisioned));
        assert!(NodeState::Provisioned.can_advance_to(NodeState::Running));
        assert!(NodeState::Running.can_advance_to(NodeState::Stopped));
        assert!(!NodeState::Running.can_advance_to(NodeState::Provisioned));
        assert!(!NodeState::Stopped.can_advance_to(NodeState::Running));
        assert!(!NodeState::Unstarted.can_advance_to(NodeState::Running));
    }

    #[tokio::test]
    async fn test_start_requires_repository() {
        let temp = TempDir::new().unwrap();
        let config = offline_config(&temp);
        assert!(matches!(
            Node::start(&config).await,
            Err(NodeError::Start(_))
        ));
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let temp = TempDir::new().unwrap();
        let config = offline_config(&temp);
        provision(&config);

        let node = Node::start(&config).await.unwrap();
        assert_eq!(node.state(), NodeState::Running);
        assert_eq!(
            node.id(),
            Repository::open(&config.root_path)
                .unwrap()
                .secret_key()
                .public()
                .node_id()
        );

        let addr: PeerAddr = node.node_addr_string().parse().unwrap();
        assert_eq!(addr.node_id, node.id());
        assert!(addr.direct.unwrap().ip().is_loopback());

        node.stop().await.unwrap();
        assert_eq!(node.state(), NodeState::Stopped);
        assert!(matches!(
            node.ensure_running(),
            Err(NodeError::NotRunning(NodeState::Stopped))
        ));
        node.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_strict_unknown_plugin_aborts_start() {
        let temp = TempDir::new().unwrap();
        let mut config = offline_config(&temp);
        config.plugins = vec!["bogus".to_string()];
        config.plugin_policy = crate::node::config::PluginPolicy::Strict;
        provision(&config);

        assert!(matches!(
            Node::start(&config).await,
            Err(NodeError::Plugin(PluginError::Unknown(_)))
        ));
    }

    #[tokio::test]
    async fn test_connect_peers_records_reachable_peer() {
        let temp_a = TempDir::new().unwrap();
        let temp_b = TempDir::new().unwrap();
        let config_a = offline_config(&temp_a);
        let mut config_b = offline_config(&temp_b);
        config_b.node_type = NodeType::Client;
        provision(&config_a);
        provision(&config_b);

        let a = Node::start(&config_a).await.unwrap();
        let b = Node::start(&config_b).await.unwrap();

        let connected = b.connect_peers(&[a.node_addr_string()]).await.unwrap();
        assert_eq!(connected, vec![a.id()]);
        assert_eq!(b.known_peers(), vec![a.id()]);

        b.stop().await.unwrap();
        a.stop().await.unwrap();
    }
}
