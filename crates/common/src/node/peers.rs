//! Peer connector.
//!
//! Configured peers are written as address strings:
//!
//! ```text
//! /ip4/<v4>/udp/<port>[/quic-v1]/p2p/<node-id>
//! /ip6/<v6>/udp/<port>[/quic-v1]/p2p/<node-id>
//! /p2p/<node-id>
//! ```
//!
//! The last form carries no direct address; the endpoint falls back to
//! relays and discovery to reach it.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use iroh::{Endpoint, NodeAddr, NodeId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed peer address '{addr}': {reason}")]
pub struct PeerAddressError {
    pub addr: String,
    pub reason: String,
}

/// One parsed peer address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddr {
    pub node_id: NodeId,
    pub direct: Option<SocketAddr>,
}

impl FromStr for PeerAddr {
    type Err = PeerAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = |reason: &str| PeerAddressError {
            addr: s.to_string(),
            reason: reason.to_string(),
        };

        let rest = s
            .strip_prefix('/')
            .ok_or_else(|| malformed("must start with '/'"))?;
        let parts: Vec<&str> = rest.split('/').collect();

        let (ip, port, id) = match parts.as_slice() {
            ["p2p", id] => (None, None, *id),
            [proto @ ("ip4" | "ip6"), ip, "udp", port, "p2p", id]
            | [proto @ ("ip4" | "ip6"), ip, "udp", port, "quic-v1", "p2p", id] => {
                let ip: IpAddr = match *proto {
                    "ip4" => ip
                        .parse::<Ipv4Addr>()
                        .map_err(|_| malformed("invalid ipv4 address"))?
                        .into(),
                    _ => ip
                        .parse::<Ipv6Addr>()
                        .map_err(|_| malformed("invalid ipv6 address"))?
                        .into(),
                };
                let port: u16 = port.parse().map_err(|_| malformed("invalid udp port"))?;
                (Some(ip), Some(port), *id)
            }
            _ => return Err(malformed("unsupported protocol sequence")),
        };

        let node_id = id
            .parse::<NodeId>()
            .map_err(|_| malformed("invalid node id"))?;
        let direct = match (ip, port) {
            (Some(ip), Some(port)) => Some(SocketAddr::new(ip, port)),
            _ => None,
        };

        Ok(Self { node_id, direct })
    }
}

/// Parse every address and group them by node id.
///
/// Fails on the first malformed entry; nothing is dialed in that case.
/// Direct addresses land in a set, so repeated addresses for a peer collapse.
pub fn parse_peers<S: AsRef<str>>(
    addrs: &[S],
) -> Result<BTreeMap<NodeId, NodeAddr>, PeerAddressError> {
    let mut grouped: BTreeMap<NodeId, Vec<SocketAddr>> = BTreeMap::new();
    for addr in addrs {
        let parsed: PeerAddr = addr.as_ref().parse()?;
        let direct = grouped.entry(parsed.node_id).or_default();
        direct.extend(parsed.direct);
    }
    Ok(grouped
        .into_iter()
        .map(|(node_id, direct)| (node_id, NodeAddr::from_parts(node_id, None, direct)))
        .collect())
}

/// Dial every peer concurrently and wait for all attempts to finish.
///
/// Each dial runs in its own task bounded by `timeout`. Failures are logged
/// and skipped; the returned list holds the peers that answered.
pub async fn connect_all(
    endpoint: &Endpoint,
    peers: BTreeMap<NodeId, NodeAddr>,
    timeout: Duration,
) -> Vec<NodeId> {
    let mut tasks = Vec::with_capacity(peers.len());

    for (node_id, addr) in peers {
        let endpoint = endpoint.clone();
        tasks.push(tokio::spawn(async move {
            let result =
                tokio::time::timeout(timeout, endpoint.connect(addr, iroh_blobs::ALPN)).await;
            (node_id, result)
        }));
    }

    let mut connected = Vec::new();
    for task in tasks {
        match task.await {
            Ok((node_id, Ok(Ok(_conn)))) => {
                tracing::debug!(peer = %node_id, "connected to peer");
                connected.push(node_id);
            }
            Ok((node_id, Ok(Err(e)))) => {
                tracing::warn!(peer = %node_id, "failed to connect to peer: {}", e);
            }
            Ok((node_id, Err(_))) => {
                tracing::warn!(peer = %node_id, "timed out connecting to peer after {:?}", timeout);
            }
            Err(e) => {
                tracing::warn!("peer dial task panicked: {}", e);
            }
        }
    }

    tracing::info!(connected = connected.len(), "peer dial-out finished");
    connected
}
