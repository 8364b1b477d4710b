//! Integration tests for fetching content between two nodes

mod common;

use ::common::iroh_storage::IrohStorage;
use ::common::node::NodeType;
use ::common::storage::{ByteReader, Retrieved, StorageError, StorageInterface};
use tempfile::TempDir;

fn reader(data: &[u8]) -> Option<ByteReader> {
    Some(Box::new(std::io::Cursor::new(data.to_vec())))
}

#[tokio::test]
async fn test_client_fetches_from_full_node() {
    common::init_tracing();
    let ctx = common::ctx();

    let temp_a = TempDir::new().unwrap();
    let provider = IrohStorage::new(common::offline_config(&temp_a)).await.unwrap();
    let object = provider
        .put(&ctx, "x", reader(b"shared over the network"))
        .await
        .unwrap();

    let temp_b = TempDir::new().unwrap();
    let mut config = common::offline_config(&temp_b);
    config.node_type = NodeType::Client;
    config.peers = vec![provider.node_addr()];
    let client = IrohStorage::new(config).await.unwrap();

    assert_eq!(client.node().known_peers(), vec![provider.node().id()]);

    let retrieved = client.get(&ctx, &object.path).await.unwrap();
    assert_eq!(common::read_file(retrieved).await, b"shared over the network");

    client.shutdown().await.unwrap();
    provider.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_fetch_directory_tree_from_peer() {
    common::init_tracing();
    let ctx = common::ctx();

    let temp_a = TempDir::new().unwrap();
    let provider = IrohStorage::new(common::offline_config(&temp_a)).await.unwrap();
    let dir = temp_a.path().join("tree");
    std::fs::create_dir_all(dir.join("nested")).unwrap();
    std::fs::write(dir.join("top.txt"), "top").unwrap();
    std::fs::write(dir.join("nested/deep.txt"), "deep").unwrap();
    let object = provider.put(&ctx, dir.to_str().unwrap(), None).await.unwrap();

    let temp_b = TempDir::new().unwrap();
    let client = IrohStorage::new(common::offline_config(&temp_b)).await.unwrap();
    client
        .connect_peers(&[provider.node_addr()])
        .await
        .unwrap();

    let names: Vec<_> = client
        .list(&ctx, &object.path)
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.name)
        .collect();
    assert_eq!(names, vec!["nested", "top.txt"]);

    let Retrieved::Directory(staged) = client.get(&ctx, &object.path).await.unwrap() else {
        panic!("expected a directory");
    };
    assert_eq!(std::fs::read(staged.join("top.txt")).unwrap(), b"top");
    assert_eq!(
        std::fs::read(staged.join("nested/deep.txt")).unwrap(),
        b"deep"
    );

    client.shutdown().await.unwrap();
    provider.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_get_without_peers_is_not_found() {
    let ctx = common::ctx();

    let temp_a = TempDir::new().unwrap();
    let provider = IrohStorage::new(common::offline_config(&temp_a)).await.unwrap();
    let object = provider.put(&ctx, "x", reader(b"private")).await.unwrap();

    let temp_b = TempDir::new().unwrap();
    let stranger = IrohStorage::new(common::offline_config(&temp_b)).await.unwrap();

    assert!(matches!(
        stranger.get(&ctx, &object.path).await,
        Err(StorageError::NotFound(_))
    ));
}
