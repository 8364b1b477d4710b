//! Shared test utilities for storage integration tests
#![allow(dead_code)]

use std::sync::Arc;

use common::iroh_storage::IrohStorage;
use common::node::NodeConfig;
use common::storage::{CallContext, Retrieved};
use tempfile::TempDir;
use tokio::io::AsyncReadExt;

/// Install a subscriber once so `RUST_LOG` works in tests
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A config rooted in `temp` that stays off relays and discovery
pub fn offline_config(temp: &TempDir) -> NodeConfig {
    let mut config = NodeConfig::new(temp.path().join("repo"), temp.path().join("staging"));
    config.networking = false;
    config
}

/// Set up a fresh storage backend in its own temp dir
pub async fn setup_storage() -> (Arc<IrohStorage>, TempDir) {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let storage = IrohStorage::new(offline_config(&temp)).await.unwrap();
    (storage, temp)
}

pub fn ctx() -> CallContext {
    CallContext::new()
}

/// Read a retrieved file to the end
pub async fn read_file(retrieved: Retrieved) -> Vec<u8> {
    let mut file = retrieved.into_file().expect("expected a file");
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).await.unwrap();
    buf
}
