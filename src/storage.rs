//! Relational store plumbing.
//!
//! One SQLite database file holds chunks, vectors, the file index, the
//! deletion log and the index metadata. The connection is wrapped in a
//! mutex: this store is single-writer by construction, and batch writes run
//! inside one transaction so a failure rolls back every row.
//!
//! The persisted dimension is pinned in `index_metadata`; opening the store
//! against a different configured dimension is refused.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rusqlite::{Connection, Transaction};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};

pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    file_path TEXT NOT NULL,
    language TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    content TEXT NOT NULL,
    signature TEXT,
    kind TEXT NOT NULL,
    symbols TEXT NOT NULL,
    dependencies TEXT NOT NULL,
    last_modified_ms INTEGER NOT NULL,
    exports TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chunks_file ON chunks(file_path);

CREATE TABLE IF NOT EXISTS vectors (
    chunk_id TEXT PRIMARY KEY,
    embedding BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS file_index (
    path TEXT PRIMARY KEY,
    checksum TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    last_modified INTEGER NOT NULL,
    last_indexed INTEGER NOT NULL,
    chunk_count INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS deleted_files (
    path TEXT NOT NULL,
    deleted_at INTEGER NOT NULL,
    cleaned_up INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS index_metadata (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    index_id TEXT NOT NULL,
    last_updated INTEGER NOT NULL,
    files_indexed INTEGER NOT NULL,
    chunks_indexed INTEGER NOT NULL,
    schema_version INTEGER NOT NULL,
    dimension INTEGER NOT NULL
);
"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub index_id: String,
    pub last_updated: i64,
    pub files_indexed: usize,
    pub chunks_indexed: usize,
    pub schema_version: i64,
    pub dimension: usize,
}

pub struct Storage {
    conn: Mutex<Connection>,
    db_path: PathBuf,
    base_dir: PathBuf,
    dimension: usize,
    /// Metadata cache so stats reads skip the database.
    metadata: RwLock<IndexMetadata>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("db_path", &self.db_path)
            .field("base_dir", &self.base_dir)
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

impl Storage {
    pub const DB_FILE: &'static str = "store.db";

    /// Open (or create) the store under `base_dir` with the configured
    /// embedding dimension. An existing store with a different persisted
    /// dimension is refused.
    pub fn open(base_dir: &Path, dimension: usize) -> Result<Arc<Self>> {
        std::fs::create_dir_all(base_dir)?;
        let db_path = base_dir.join(Self::DB_FILE);
        let conn = Connection::open(&db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA)?;

        let existing: Option<IndexMetadata> = conn
            .query_row(
                "SELECT index_id, last_updated, files_indexed, chunks_indexed, schema_version, dimension
                 FROM index_metadata WHERE id = 1",
                [],
                |row| {
                    Ok(IndexMetadata {
                        index_id: row.get(0)?,
                        last_updated: row.get(1)?,
                        files_indexed: row.get::<_, i64>(2)? as usize,
                        chunks_indexed: row.get::<_, i64>(3)? as usize,
                        schema_version: row.get(4)?,
                        dimension: row.get::<_, i64>(5)? as usize,
                    })
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        let metadata = match existing {
            Some(meta) => {
                if meta.dimension != dimension {
                    return Err(Error::DimensionMismatch {
                        expected: meta.dimension,
                        actual: dimension,
                    });
                }
                if meta.schema_version != SCHEMA_VERSION {
                    return Err(Error::Corrupted(format!(
                        "unsupported schema version {}",
                        meta.schema_version
                    )));
                }
                meta
            }
            None => {
                let meta = IndexMetadata {
                    index_id: Uuid::new_v4().to_string(),
                    last_updated: chrono::Utc::now().timestamp_millis(),
                    files_indexed: 0,
                    chunks_indexed: 0,
                    schema_version: SCHEMA_VERSION,
                    dimension,
                };
                conn.execute(
                    "INSERT INTO index_metadata
                     (id, index_id, last_updated, files_indexed, chunks_indexed, schema_version, dimension)
                     VALUES (1, ?1, ?2, 0, 0, ?3, ?4)",
                    rusqlite::params![
                        meta.index_id,
                        meta.last_updated,
                        meta.schema_version,
                        meta.dimension as i64
                    ],
                )?;
                info!(index_id = %meta.index_id, dimension, "Created new store");
                meta
            }
        };

        Ok(Arc::new(Self {
            conn: Mutex::new(conn),
            db_path,
            base_dir: base_dir.to_path_buf(),
            dimension,
            metadata: RwLock::new(metadata),
        }))
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Run a read or single-statement write against the connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run `f` inside a transaction: commit on Ok, roll back on Err so a
    /// failed batch leaves no partial state.
    pub fn transaction<T>(&self, f: impl FnOnce(&Transaction) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                // Drop rolls the transaction back.
                Err(e)
            }
        }
    }

    /// Cached metadata record.
    pub fn metadata(&self) -> IndexMetadata {
        self.metadata.read().clone()
    }

    /// Persist new run totals into `index_metadata` and refresh the cache.
    pub fn update_metadata(&self, files_indexed: usize, chunks_indexed: usize) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE index_metadata
                 SET last_updated = ?1, files_indexed = ?2, chunks_indexed = ?3
                 WHERE id = 1",
                rusqlite::params![now, files_indexed as i64, chunks_indexed as i64],
            )?;
            Ok(())
        })?;
        let mut meta = self.metadata.write();
        meta.last_updated = now;
        meta.files_indexed = files_indexed;
        meta.chunks_indexed = chunks_indexed;
        Ok(())
    }

    /// Write a consistent snapshot of the database to `dest`. `VACUUM INTO`
    /// produces a standalone copy even with WAL sidecars present.
    pub fn snapshot_db(&self, dest: &Path) -> Result<()> {
        let dest_str = dest.to_string_lossy().replace('\'', "''");
        self.with_conn(|conn| {
            conn.execute_batch(&format!("VACUUM INTO '{dest_str}'"))?;
            Ok(())
        })
    }
}

/// Encode an embedding as a little-endian f32 blob.
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode an embedding blob, validating the expected dimension.
pub fn decode_vector(bytes: &[u8], dimension: usize) -> Result<Vec<f32>> {
    if bytes.len() != dimension * 4 {
        return Err(Error::Corrupted(format!(
            "vector blob has {} bytes, expected {}",
            bytes.len(),
            dimension * 4
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_creates_metadata_once() {
        let tmp = TempDir::new().unwrap();
        let storage = Storage::open(tmp.path(), 64).unwrap();
        let first = storage.metadata();
        drop(storage);

        let storage = Storage::open(tmp.path(), 64).unwrap();
        assert_eq!(storage.metadata().index_id, first.index_id);
    }

    #[test]
    fn dimension_drift_is_refused() {
        let tmp = TempDir::new().unwrap();
        {
            Storage::open(tmp.path(), 64).unwrap();
        }
        let err = Storage::open(tmp.path(), 128).unwrap_err();
        assert_eq!(err.kind(), "store.dimension_mismatch");
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let tmp = TempDir::new().unwrap();
        let storage = Storage::open(tmp.path(), 8).unwrap();

        let result: Result<()> = storage.transaction(|tx| {
            tx.execute(
                "INSERT INTO file_index (path, checksum, file_size, last_modified, last_indexed, chunk_count)
                 VALUES ('a', 'c', 1, 1, 1, 0)",
                [],
            )?;
            Err(Error::Storage("forced failure".into()))
        });
        assert!(result.is_err());

        let count: i64 = storage
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM file_index", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn vector_blob_round_trip() {
        let v = vec![0.5f32, -1.25, 3.0];
        let decoded = decode_vector(&encode_vector(&v), 3).unwrap();
        assert_eq!(decoded, v);
    }

    #[test]
    fn vector_blob_wrong_size_is_corrupted() {
        let err = decode_vector(&[0u8; 7], 2).unwrap_err();
        assert_eq!(err.kind(), "store.corrupted");
    }

    #[test]
    fn snapshot_produces_standalone_copy() {
        let tmp = TempDir::new().unwrap();
        let storage = Storage::open(tmp.path(), 8).unwrap();
        storage.update_metadata(3, 9).unwrap();

        let snap = tmp.path().join("snapshot.db");
        storage.snapshot_db(&snap).unwrap();
        assert!(snap.exists());

        let conn = Connection::open(&snap).unwrap();
        let files: i64 = conn
            .query_row("SELECT files_indexed FROM index_metadata", [], |r| r.get(0))
            .unwrap();
        assert_eq!(files, 3);
    }
}
