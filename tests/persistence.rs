//! Persistence across engine restarts, ANN index recovery, and
//! backup/restore round trips.

use std::path::Path;

use codectx::{CancelToken, Engine, EngineConfig, IndexOptions};
use tempfile::TempDir;

const DIM: usize = 64;

fn config(store_dir: &Path) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.vector_store.path = store_dir.to_path_buf();
    config.vector_store.dimension = DIM;
    config
}

fn write(dir: &Path, rel: &str, content: &str) {
    std::fs::write(dir.join(rel), content).unwrap();
}

#[tokio::test]
async fn index_survives_restart() {
    let store = TempDir::new().unwrap();
    let source = TempDir::new().unwrap();
    write(source.path(), "auth.rs", "pub fn verify_token(token: &str) -> bool { check(token) }\n");

    let top_before = {
        let engine = Engine::new(config(store.path())).unwrap();
        engine.index(source.path(), IndexOptions::default()).await.unwrap();
        let hits = engine
            .search("verify_token", 1, None, &CancelToken::new())
            .await
            .unwrap();
        hits[0].0.id.clone()
    };

    // Fresh engine on the same directory: store, HNSW pair and metadata
    // all reload from disk.
    let engine = Engine::new(config(store.path())).unwrap();
    let stats = engine.stats().unwrap();
    assert!(stats.store.chunk_count > 0);
    assert_eq!(stats.hnsw.count, stats.store.vector_count);

    let hits = engine
        .search("verify_token", 1, None, &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(hits[0].0.id, top_before);
}

#[tokio::test]
async fn ann_index_rebuilds_when_files_are_missing() {
    let store = TempDir::new().unwrap();
    let source = TempDir::new().unwrap();
    write(source.path(), "cache.rs", "pub fn evict_entry(key: &str) { remove(key) }\n");

    {
        let engine = Engine::new(config(store.path())).unwrap();
        engine.index(source.path(), IndexOptions::default()).await.unwrap();
    }

    // Simulate a lost ANN pair; vectors remain in the relational store.
    std::fs::remove_file(store.path().join("index.hnsw.json")).unwrap();
    std::fs::remove_file(store.path().join("index.hnsw.ids.json")).unwrap();

    let engine = Engine::new(config(store.path())).unwrap();
    assert!(engine.stats().unwrap().hnsw.count > 0);
    let hits = engine
        .search("evict_entry", 1, None, &CancelToken::new())
        .await
        .unwrap();
    assert!(!hits.is_empty());
}

#[tokio::test]
async fn dimension_drift_refuses_to_open() {
    let store = TempDir::new().unwrap();
    {
        Engine::new(config(store.path())).unwrap();
    }
    let mut drifted = config(store.path());
    drifted.vector_store.dimension = DIM * 2;
    let err = Engine::new(drifted).unwrap_err();
    assert_eq!(err.kind(), "store.dimension_mismatch");
}

#[tokio::test]
async fn backup_and_restore_round_trip() {
    let store = TempDir::new().unwrap();
    let source = TempDir::new().unwrap();
    write(source.path(), "billing.rs", "pub fn charge_invoice(id: u64) { submit(id) }\n");

    let snapshot = {
        let engine = Engine::new(config(store.path())).unwrap();
        engine.index(source.path(), IndexOptions::default()).await.unwrap();
        engine.backup().unwrap()
    };

    let restored_dir = TempDir::new().unwrap();
    Engine::restore(&snapshot, restored_dir.path()).unwrap();

    let engine = Engine::new(config(restored_dir.path())).unwrap();
    let stats = engine.stats().unwrap();
    assert!(stats.store.chunk_count > 0);
    let hits = engine
        .search("charge_invoice", 1, None, &CancelToken::new())
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].0.file_path, "billing.rs");
}

#[tokio::test]
async fn clear_then_reopen_is_empty() {
    let store = TempDir::new().unwrap();
    let source = TempDir::new().unwrap();
    write(source.path(), "tmp.rs", "pub fn scratch() {}\n");

    {
        let engine = Engine::new(config(store.path())).unwrap();
        engine.index(source.path(), IndexOptions::default()).await.unwrap();
        engine.clear().await.unwrap();
    }

    let engine = Engine::new(config(store.path())).unwrap();
    let stats = engine.stats().unwrap();
    assert_eq!(stats.store.chunk_count, 0);
    assert_eq!(stats.hnsw.count, 0);
    assert_eq!(stats.files.total_files, 0);
}
