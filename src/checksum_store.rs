//! Per-file checksum bookkeeping.
//!
//! One `FileRecord` per indexed file plus an append-only deletion log,
//! backed by the `file_index` and `deleted_files` tables. The
//! needs-reindex decision is checksum-only: an unchanged checksum never
//! triggers a re-chunk, whatever the mtime says (VCS checkouts and
//! filesystem touches rewrite mtimes without changing content).

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::storage::Storage;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    /// SHA-256 of the full file bytes, lowercase hex.
    pub checksum: String,
    pub file_size: u64,
    /// Source mtime, milliseconds.
    pub last_modified: i64,
    /// Indexer wall-clock at record time, milliseconds.
    pub last_indexed: i64,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletedFileRecord {
    pub path: String,
    pub deleted_at: i64,
    pub cleaned_up: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChecksumStats {
    pub total_files: usize,
    pub total_chunks: usize,
    pub pending_cleanup: usize,
}

/// SHA-256 of a byte string, lowercase hex.
pub fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub struct ChecksumStore {
    storage: Arc<Storage>,
}

impl ChecksumStore {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    pub fn get_record(&self, path: &str) -> Result<Option<FileRecord>> {
        self.storage.with_conn(|conn| {
            let record = conn
                .query_row(
                    "SELECT path, checksum, file_size, last_modified, last_indexed, chunk_count
                     FROM file_index WHERE path = ?1",
                    [path],
                    |row| {
                        Ok(FileRecord {
                            path: row.get(0)?,
                            checksum: row.get(1)?,
                            file_size: row.get::<_, i64>(2)? as u64,
                            last_modified: row.get(3)?,
                            last_indexed: row.get(4)?,
                            chunk_count: row.get::<_, i64>(5)? as usize,
                        })
                    },
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;
            Ok(record)
        })
    }

    /// Upsert the record for a file.
    pub fn put_record(&self, record: &FileRecord) -> Result<()> {
        self.storage.with_conn(|conn| {
            conn.execute(
                "INSERT INTO file_index (path, checksum, file_size, last_modified, last_indexed, chunk_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(path) DO UPDATE SET
                   checksum = excluded.checksum,
                   file_size = excluded.file_size,
                   last_modified = excluded.last_modified,
                   last_indexed = excluded.last_indexed,
                   chunk_count = excluded.chunk_count",
                rusqlite::params![
                    record.path,
                    record.checksum,
                    record.file_size as i64,
                    record.last_modified,
                    record.last_indexed,
                    record.chunk_count as i64
                ],
            )?;
            Ok(())
        })
    }

    pub fn remove_record(&self, path: &str) -> Result<()> {
        self.storage.with_conn(|conn| {
            conn.execute("DELETE FROM file_index WHERE path = ?1", [path])?;
            Ok(())
        })
    }

    pub fn all_paths(&self) -> Result<HashSet<String>> {
        self.storage.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT path FROM file_index")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut paths = HashSet::new();
            for row in rows {
                paths.insert(row?);
            }
            Ok(paths)
        })
    }

    /// Whether `(path, new_checksum)` requires a re-chunk. mtime is
    /// deliberately not consulted.
    pub fn needs_reindex(&self, path: &str, new_checksum: &str) -> Result<bool> {
        Ok(match self.get_record(path)? {
            None => true,
            Some(record) => record.checksum != new_checksum,
        })
    }

    /// Paths present in the store but absent from the current walk.
    pub fn detect_deleted(&self, current_paths: &HashSet<String>) -> Result<Vec<String>> {
        let mut deleted: Vec<String> = self
            .all_paths()?
            .into_iter()
            .filter(|p| !current_paths.contains(p))
            .collect();
        deleted.sort();
        Ok(deleted)
    }

    /// Append a deletion log entry for a vanished file.
    pub fn mark_deleted(&self, path: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        self.storage.with_conn(|conn| {
            conn.execute(
                "INSERT INTO deleted_files (path, deleted_at, cleaned_up) VALUES (?1, ?2, 0)",
                rusqlite::params![path, now],
            )?;
            Ok(())
        })
    }

    /// Flip the log entries for `path` to cleaned once its chunks and
    /// vectors are gone.
    pub fn mark_cleaned(&self, path: &str) -> Result<()> {
        self.storage.with_conn(|conn| {
            conn.execute(
                "UPDATE deleted_files SET cleaned_up = 1 WHERE path = ?1",
                [path],
            )?;
            Ok(())
        })
    }

    pub fn deletion_log(&self) -> Result<Vec<DeletedFileRecord>> {
        self.storage.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT path, deleted_at, cleaned_up FROM deleted_files ORDER BY deleted_at")?;
            let rows = stmt.query_map([], |row| {
                Ok(DeletedFileRecord {
                    path: row.get(0)?,
                    deleted_at: row.get(1)?,
                    cleaned_up: row.get::<_, i64>(2)? != 0,
                })
            })?;
            let mut log = Vec::new();
            for row in rows {
                log.push(row?);
            }
            Ok(log)
        })
    }

    pub fn stats(&self) -> Result<ChecksumStats> {
        self.storage.with_conn(|conn| {
            let total_files: i64 =
                conn.query_row("SELECT COUNT(*) FROM file_index", [], |r| r.get(0))?;
            let total_chunks: i64 = conn.query_row(
                "SELECT COALESCE(SUM(chunk_count), 0) FROM file_index",
                [],
                |r| r.get(0),
            )?;
            let pending_cleanup: i64 = conn.query_row(
                "SELECT COUNT(*) FROM deleted_files WHERE cleaned_up = 0",
                [],
                |r| r.get(0),
            )?;
            Ok(ChecksumStats {
                total_files: total_files as usize,
                total_chunks: total_chunks as usize,
                pending_cleanup: pending_cleanup as usize,
            })
        })
    }
}
