//! Snapshot backup and restore.
//!
//! A backup copies the relational store and the HNSW pair into a
//! timestamped directory under `backups/`, with a SHA-256 integrity file
//! written beside them. Only the last N snapshots are kept. Restore
//! verifies the checksums and copies the files back; the engine must be
//! reopened afterwards.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::checksum_store::checksum;
use crate::error::{Error, Result};
use crate::hnsw;
use crate::storage::Storage;

pub const BACKUP_DIR: &str = "backups";
const CHECKSUM_FILE: &str = "checksums.sha256";

/// Create a snapshot of the store, returning its directory.
pub fn create_backup(storage: &Storage, keep: usize) -> Result<PathBuf> {
    let base = storage.base_dir();
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%3f").to_string();
    let snapshot_dir = base.join(BACKUP_DIR).join(stamp);
    std::fs::create_dir_all(&snapshot_dir)?;

    storage.snapshot_db(&snapshot_dir.join(Storage::DB_FILE))?;
    for name in [hnsw::INDEX_FILE, hnsw::MAPPING_FILE] {
        let source = base.join(name);
        if source.exists() {
            std::fs::copy(&source, snapshot_dir.join(name))?;
        }
    }

    let mut lines = Vec::new();
    for name in [Storage::DB_FILE, hnsw::INDEX_FILE, hnsw::MAPPING_FILE] {
        let path = snapshot_dir.join(name);
        if path.exists() {
            let bytes = std::fs::read(&path)?;
            lines.push(format!("{name}:{}", checksum(&bytes)));
        }
    }
    std::fs::write(snapshot_dir.join(CHECKSUM_FILE), lines.join("\n"))?;

    prune_backups(&base.join(BACKUP_DIR), keep)?;
    info!(path = %snapshot_dir.display(), "Backup created");
    Ok(snapshot_dir)
}

/// List snapshot directories, oldest first.
pub fn list_backups(store_dir: &Path) -> Result<Vec<PathBuf>> {
    let dir = store_dir.join(BACKUP_DIR);
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut snapshots: Vec<PathBuf> = std::fs::read_dir(&dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .map(|e| e.path())
        .collect();
    snapshots.sort();
    Ok(snapshots)
}

fn prune_backups(dir: &Path, keep: usize) -> Result<()> {
    let mut snapshots: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .map(|e| e.path())
        .collect();
    snapshots.sort();
    while snapshots.len() > keep.max(1) {
        let oldest = snapshots.remove(0);
        if let Err(e) = std::fs::remove_dir_all(&oldest) {
            warn!(path = %oldest.display(), error = %e, "Failed to prune old backup");
        }
    }
    Ok(())
}

/// Verify a snapshot's integrity file and copy its contents back into the
/// store directory. Callers reopen the engine afterwards.
pub fn restore_backup(snapshot_dir: &Path, store_dir: &Path) -> Result<()> {
    let checksum_path = snapshot_dir.join(CHECKSUM_FILE);
    if checksum_path.exists() {
        let content = std::fs::read_to_string(&checksum_path)?;
        for line in content.lines() {
            let Some((name, expected)) = line.split_once(':') else { continue };
            let path = snapshot_dir.join(name);
            if !path.exists() {
                return Err(Error::Corrupted(format!(
                    "snapshot is missing {name} listed in its integrity file"
                )));
            }
            let actual = checksum(&std::fs::read(&path)?);
            if actual != expected {
                return Err(Error::Corrupted(format!(
                    "checksum mismatch for {name}: expected {expected}, got {actual}"
                )));
            }
        }
    } else {
        warn!(path = %snapshot_dir.display(), "Snapshot has no integrity file, restoring unverified");
    }

    std::fs::create_dir_all(store_dir)?;
    for name in [Storage::DB_FILE, hnsw::INDEX_FILE, hnsw::MAPPING_FILE] {
        let source = snapshot_dir.join(name);
        if source.exists() {
            std::fs::copy(&source, store_dir.join(name))?;
        }
    }
    // Stale WAL sidecars would shadow the restored database.
    for suffix in ["-wal", "-shm"] {
        let sidecar = store_dir.join(format!("{}{suffix}", Storage::DB_FILE));
        if sidecar.exists() {
            let _ = std::fs::remove_file(sidecar);
        }
    }
    info!(from = %snapshot_dir.display(), to = %store_dir.display(), "Backup restored");
    Ok(())
}
