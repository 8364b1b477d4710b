//! Integration tests for provisioning, reopening and peer setup

mod common;

use ::common::iroh_storage::{IrohStorage, SetupError};
use ::common::node::{NodeError, NodeState, PluginPolicy, RepositoryError};
use ::common::storage::{ByteReader, StorageInterface};
use serde_json::json;
use tempfile::TempDir;

fn reader(data: &[u8]) -> Option<ByteReader> {
    Some(Box::new(std::io::Cursor::new(data.to_vec())))
}

#[tokio::test]
async fn test_second_provision_fails() {
    common::init_tracing();
    let temp = TempDir::new().unwrap();

    let first = IrohStorage::new(common::offline_config(&temp)).await.unwrap();
    first.shutdown().await.unwrap();

    let err = IrohStorage::new(common::offline_config(&temp))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SetupError::Repository(RepositoryError::Exists(_))
    ));
}

#[tokio::test]
async fn test_open_keeps_identity_and_pins() {
    common::init_tracing();
    let temp = TempDir::new().unwrap();
    let ctx = common::ctx();

    let first = IrohStorage::new(common::offline_config(&temp)).await.unwrap();
    let node_id = first.node().id();
    let object = first.put(&ctx, "x", reader(b"persisted")).await.unwrap();
    first.shutdown().await.unwrap();
    assert_eq!(first.node().state(), NodeState::Stopped);
    drop(first);

    let reopened = IrohStorage::open(common::offline_config(&temp)).await.unwrap();
    assert_eq!(reopened.node().id(), node_id);

    let retrieved = reopened.get(&ctx, &object.path).await.unwrap();
    assert_eq!(common::read_file(retrieved).await, b"persisted");
    reopened.delete(&ctx, &object.path).await.unwrap();
}

#[tokio::test]
async fn test_open_without_repository_fails() {
    let temp = TempDir::new().unwrap();
    let err = IrohStorage::open(common::offline_config(&temp))
        .await
        .unwrap_err();
    assert!(matches!(err, SetupError::Node(_)));
}

#[tokio::test]
async fn test_malformed_peer_fails_before_provisioning() {
    let temp = TempDir::new().unwrap();
    let mut config = common::offline_config(&temp);
    config.peers = vec!["/ip4/127.0.0.1/udp/4433".to_string()];

    let err = IrohStorage::new(config.clone()).await.unwrap_err();
    assert!(matches!(err, SetupError::PeerAddress(_)));
    assert!(!config.root_path.join("config.toml").exists());
}

#[tokio::test]
async fn test_unreachable_peer_does_not_block_setup() {
    let temp = TempDir::new().unwrap();
    let ghost = ::common::crypto::SecretKey::generate().unwrap().public();
    let mut config = common::offline_config(&temp);
    config.peers = vec![format!("/ip4/127.0.0.1/udp/9/quic-v1/p2p/{}", ghost)];
    config.dial_timeout_ms = 300;

    let storage = IrohStorage::new(config).await.unwrap();
    assert!(storage.node().known_peers().is_empty());
    storage.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_memory_datastore() {
    let temp = TempDir::new().unwrap();
    let mut config = common::offline_config(&temp);
    config.datastore = Some(json!({"type": "memory"}));

    let storage = IrohStorage::new(config.clone()).await.unwrap();
    assert!(!config.root_path.join("blobs").exists());

    let ctx = common::ctx();
    let object = storage.put(&ctx, "x", reader(b"volatile")).await.unwrap();
    let retrieved = storage.get(&ctx, &object.path).await.unwrap();
    assert_eq!(common::read_file(retrieved).await, b"volatile");
}

#[tokio::test]
async fn test_independent_adapters_coexist() {
    let temp_a = TempDir::new().unwrap();
    let temp_b = TempDir::new().unwrap();
    let a = IrohStorage::new(common::offline_config(&temp_a)).await.unwrap();
    let b = IrohStorage::new(common::offline_config(&temp_b)).await.unwrap();

    assert_ne!(a.node().id(), b.node().id());

    let ctx = common::ctx();
    let object = a.put(&ctx, "x", reader(b"only on a")).await.unwrap();
    assert!(b.get(&ctx, &object.path).await.is_err());
}

#[tokio::test]
async fn test_failed_start_discards_repository() {
    common::init_tracing();
    let temp = TempDir::new().unwrap();
    let mut config = common::offline_config(&temp);
    config.plugins = vec!["no-such-plugin".to_string()];
    config.plugin_policy = PluginPolicy::Strict;

    let err = IrohStorage::new(config.clone()).await.unwrap_err();
    assert!(matches!(err, SetupError::Node(NodeError::Plugin(_))));
    assert!(!config.root_path.join("config.toml").exists());

    // best effort tolerates the same plugin, and the root can be provisioned again
    config.plugin_policy = PluginPolicy::BestEffort;
    let storage = IrohStorage::new(config).await.unwrap();
    assert_eq!(storage.node().state(), NodeState::Running);

    let ctx = common::ctx();
    let object = storage.put(&ctx, "x", reader(b"after retry")).await.unwrap();
    let retrieved = storage.get(&ctx, &object.path).await.unwrap();
    assert_eq!(common::read_file(retrieved).await, b"after retry");
    storage.shutdown().await.unwrap();
}
