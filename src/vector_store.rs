//! Persistent vector store.
//!
//! Durable chunk + vector records keyed by chunk id, on top of the
//! relational store, with the HNSW index attached for sub-linear search.
//! Batches are transactional: a failed `insert_batch` leaves no partial
//! rows, a `delete_by_file` removes every chunk of the file or none.

use std::collections::HashMap;
use std::sync::Arc;

use rayon::prelude::*;
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chunk::{Chunk, ChunkKind, ChunkMetadata};
use crate::error::{Error, Result};
use crate::hnsw::HnswIndex;
use crate::storage::{decode_vector, encode_vector, Storage};

/// Page size for the lazy chunk iterator.
const SCAN_PAGE: usize = 256;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub chunk_count: usize,
    pub vector_count: usize,
    pub languages: HashMap<String, usize>,
}

pub struct VectorStore {
    storage: Arc<Storage>,
    hnsw: Arc<HnswIndex>,
}

fn row_to_chunk(row: &Row) -> rusqlite::Result<Chunk> {
    let symbols: String = row.get(8)?;
    let dependencies: String = row.get(9)?;
    let exports: String = row.get(11)?;
    Ok(Chunk {
        id: row.get(0)?,
        file_path: row.get(1)?,
        language: row.get(2)?,
        start_line: row.get::<_, i64>(3)? as usize,
        end_line: row.get::<_, i64>(4)? as usize,
        content: row.get(5)?,
        signature: row.get(6)?,
        kind: ChunkKind::parse(&row.get::<_, String>(7)?),
        symbols: serde_json::from_str(&symbols).unwrap_or_default(),
        dependencies: serde_json::from_str(&dependencies).unwrap_or_default(),
        metadata: ChunkMetadata {
            last_modified_ms: row.get(10)?,
            exports: serde_json::from_str(&exports).unwrap_or_default(),
        },
    })
}

const CHUNK_COLUMNS: &str = "id, file_path, language, start_line, end_line, content, signature, \
                             kind, symbols, dependencies, last_modified_ms, exports";

fn insert_chunk_row(
    tx: &rusqlite::Transaction,
    chunk: &Chunk,
    vector: Option<&[f32]>,
) -> Result<()> {
    tx.execute(
        "INSERT OR REPLACE INTO chunks
         (id, file_path, language, start_line, end_line, content, signature, kind,
          symbols, dependencies, last_modified_ms, exports)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        rusqlite::params![
            chunk.id,
            chunk.file_path,
            chunk.language,
            chunk.start_line as i64,
            chunk.end_line as i64,
            chunk.content,
            chunk.signature,
            chunk.kind.as_str(),
            serde_json::to_string(&chunk.symbols)?,
            serde_json::to_string(&chunk.dependencies)?,
            chunk.metadata.last_modified_ms,
            serde_json::to_string(&chunk.metadata.exports)?,
        ],
    )?;
    if let Some(vector) = vector {
        tx.execute(
            "INSERT OR REPLACE INTO vectors (chunk_id, embedding) VALUES (?1, ?2)",
            rusqlite::params![chunk.id, encode_vector(vector)],
        )?;
    }
    Ok(())
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

impl VectorStore {
    pub fn new(storage: Arc<Storage>, hnsw: Arc<HnswIndex>) -> Self {
        Self { storage, hnsw }
    }

    pub fn dimension(&self) -> usize {
        self.storage.dimension()
    }

    pub fn hnsw(&self) -> &Arc<HnswIndex> {
        &self.hnsw
    }

    /// Refresh the persisted run totals in `index_metadata`.
    pub fn update_metadata(&self, files_indexed: usize, chunks_indexed: usize) -> Result<()> {
        self.storage.update_metadata(files_indexed, chunks_indexed)
    }

    /// Every stored `(chunk_id, vector)` pair; used to rebuild the ANN
    /// index when its persisted pair is missing or unreadable.
    pub fn all_vectors(&self) -> Result<Vec<(String, Vec<f32>)>> {
        let dimension = self.storage.dimension();
        self.storage.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT chunk_id, embedding FROM vectors")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (id, blob) = row?;
                out.push((id, decode_vector(&blob, dimension)?));
            }
            Ok(out)
        })
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.storage.dimension() {
            return Err(Error::DimensionMismatch {
                expected: self.storage.dimension(),
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Insert one chunk, optionally with its vector. A failed insert
    /// leaves the store unchanged.
    pub fn insert(&self, chunk: &Chunk, vector: Option<&[f32]>) -> Result<()> {
        if let Some(v) = vector {
            self.check_dimension(v)?;
        }
        self.storage.transaction(|tx| insert_chunk_row(tx, chunk, vector))
    }

    /// Insert a batch atomically: either every row becomes visible or none.
    pub fn insert_batch(&self, items: &[(Chunk, Option<Vec<f32>>)]) -> Result<()> {
        for (_, vector) in items {
            if let Some(v) = vector {
                self.check_dimension(v)?;
            }
        }
        self.storage.transaction(|tx| {
            for (chunk, vector) in items {
                insert_chunk_row(tx, chunk, vector.as_deref())?;
            }
            Ok(())
        })
    }

    /// Remove a chunk, its vector and any HNSW mapping. Idempotent.
    pub fn delete(&self, chunk_id: &str) -> Result<()> {
        self.storage.transaction(|tx| {
            tx.execute("DELETE FROM chunks WHERE id = ?1", [chunk_id])?;
            tx.execute("DELETE FROM vectors WHERE chunk_id = ?1", [chunk_id])?;
            Ok(())
        })?;
        self.hnsw.remove(chunk_id);
        Ok(())
    }

    /// Remove every chunk of a file in a single transaction. Returns the
    /// removed chunk ids so the caller can account for them.
    pub fn delete_by_file(&self, path: &str) -> Result<Vec<String>> {
        let ids = self.storage.transaction(|tx| {
            let mut stmt = tx.prepare("SELECT id FROM chunks WHERE file_path = ?1")?;
            let rows = stmt.query_map([path], |row| row.get::<_, String>(0))?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row?);
            }
            drop(stmt);
            tx.execute("DELETE FROM chunks WHERE file_path = ?1", [path])?;
            tx.execute(
                "DELETE FROM vectors WHERE chunk_id NOT IN (SELECT id FROM chunks)",
                [],
            )?;
            Ok(ids)
        })?;
        for id in &ids {
            self.hnsw.remove(id);
        }
        debug!(path, removed = ids.len(), "Deleted chunks for file");
        Ok(ids)
    }

    pub fn get(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        self.storage.with_conn(|conn| {
            let chunk = conn
                .query_row(
                    &format!("SELECT {CHUNK_COLUMNS} FROM chunks WHERE id = ?1"),
                    [chunk_id],
                    row_to_chunk,
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;
            Ok(chunk)
        })
    }

    pub fn get_vector(&self, chunk_id: &str) -> Result<Option<Vec<f32>>> {
        let dimension = self.storage.dimension();
        self.storage.with_conn(|conn| {
            let blob = conn
                .query_row(
                    "SELECT embedding FROM vectors WHERE chunk_id = ?1",
                    [chunk_id],
                    |row| row.get::<_, Vec<u8>>(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;
            blob.map(|b| decode_vector(&b, dimension)).transpose()
        })
    }

    /// Lazy sequence over every chunk, paging by rowid so the table is
    /// never resident at once.
    pub fn get_all(&self) -> ChunkIter {
        ChunkIter {
            storage: self.storage.clone(),
            last_rowid: 0,
            buffer: Vec::new(),
            done: false,
        }
    }

    /// Cosine-similarity search. Uses the HNSW index when it has entries
    /// and falls back to a full scan otherwise. Searching an empty store
    /// returns an empty list.
    pub fn search(
        &self,
        query_vector: &[f32],
        k: usize,
        min_score: Option<f32>,
    ) -> Result<Vec<(Chunk, f32)>> {
        self.check_dimension(query_vector)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let scored_ids: Vec<(String, f32)> = if self.hnsw.count() > 0 {
            self.hnsw.search(query_vector, k)?
        } else {
            self.brute_force_search(query_vector, k)?
        };

        let threshold = min_score.unwrap_or(f32::MIN);
        let mut results = Vec::with_capacity(scored_ids.len());
        for (id, score) in scored_ids {
            if score < threshold {
                continue;
            }
            if let Some(chunk) = self.get(&id)? {
                results.push((chunk, score));
            }
        }
        Ok(results)
    }

    /// Full-scan fallback: decode every stored vector and rank by cosine.
    fn brute_force_search(&self, query_vector: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        let dimension = self.storage.dimension();
        let rows: Vec<(String, Vec<u8>)> = self.storage.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT chunk_id, embedding FROM vectors")?;
            let mapped = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?;
            let mut rows = Vec::new();
            for row in mapped {
                rows.push(row?);
            }
            Ok(rows)
        })?;

        let mut scored: Vec<(String, f32)> = rows
            .par_iter()
            .filter_map(|(id, blob)| {
                let vector = decode_vector(blob, dimension).ok()?;
                Some((id.clone(), cosine_similarity(query_vector, &vector)))
            })
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        Ok(scored)
    }

    /// Wipe all chunk, vector, file and deletion-log state.
    pub fn clear(&self) -> Result<()> {
        self.storage.transaction(|tx| {
            tx.execute("DELETE FROM chunks", [])?;
            tx.execute("DELETE FROM vectors", [])?;
            tx.execute("DELETE FROM file_index", [])?;
            tx.execute("DELETE FROM deleted_files", [])?;
            Ok(())
        })?;
        self.hnsw.clear();
        self.storage.update_metadata(0, 0)?;
        Ok(())
    }

    pub fn stats(&self) -> Result<StoreStats> {
        self.storage.with_conn(|conn| {
            let chunk_count: i64 =
                conn.query_row("SELECT COUNT(*) FROM chunks", [], |r| r.get(0))?;
            let vector_count: i64 =
                conn.query_row("SELECT COUNT(*) FROM vectors", [], |r| r.get(0))?;
            let mut stmt =
                conn.prepare("SELECT language, COUNT(*) FROM chunks GROUP BY language")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?;
            let mut languages = HashMap::new();
            for row in rows {
                let (lang, count) = row?;
                languages.insert(lang, count);
            }
            Ok(StoreStats {
                chunk_count: chunk_count as usize,
                vector_count: vector_count as usize,
                languages,
            })
        })
    }
}

pub struct ChunkIter {
    storage: Arc<Storage>,
    last_rowid: i64,
    buffer: Vec<(i64, Chunk)>,
    done: bool,
}

impl Iterator for ChunkIter {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.done {
            let last = self.last_rowid;
            let page = self.storage.with_conn(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT rowid, {CHUNK_COLUMNS} FROM chunks WHERE rowid > ?1
                     ORDER BY rowid LIMIT {SCAN_PAGE}"
                ))?;
                let rows = stmt.query_map([last], |row| {
                    let rowid: i64 = row.get(0)?;
                    let chunk = Chunk {
                        id: row.get(1)?,
                        file_path: row.get(2)?,
                        language: row.get(3)?,
                        start_line: row.get::<_, i64>(4)? as usize,
                        end_line: row.get::<_, i64>(5)? as usize,
                        content: row.get(6)?,
                        signature: row.get(7)?,
                        kind: ChunkKind::parse(&row.get::<_, String>(8)?),
                        symbols: serde_json::from_str(&row.get::<_, String>(9)?)
                            .unwrap_or_default(),
                        dependencies: serde_json::from_str(&row.get::<_, String>(10)?)
                            .unwrap_or_default(),
                        metadata: ChunkMetadata {
                            last_modified_ms: row.get(11)?,
                            exports: serde_json::from_str(&row.get::<_, String>(12)?)
                                .unwrap_or_default(),
                        },
                    };
                    Ok((rowid, chunk))
                })?;
                let mut page = Vec::new();
                for row in rows {
                    page.push(row?);
                }
                Ok(page)
            });
            match page {
                Ok(mut page) => {
                    if page.len() < SCAN_PAGE {
                        self.done = true;
                    }
                    if let Some(&(rowid, _)) = page.last() {
                        self.last_rowid = rowid;
                    }
                    page.reverse();
                    self.buffer = page;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        self.buffer.pop().map(|(_, chunk)| Ok(chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_id;
    use crate::config::HnswConfig;
    use crate::hnsw::HnswParams;
    use tempfile::TempDir;

    const DIM: usize = 8;

    fn store() -> (TempDir, VectorStore) {
        let tmp = TempDir::new().unwrap();
        let storage = Storage::open(tmp.path(), DIM).unwrap();
        let hnsw = Arc::new(HnswIndex::new(HnswParams::new(DIM, &HnswConfig::default())));
        (tmp, VectorStore::new(storage, hnsw))
    }

    fn chunk(path: &str, start: usize, content: &str) -> Chunk {
        Chunk {
            id: chunk_id(path, start, start + 4, "rust"),
            file_path: path.to_string(),
            language: "rust".to_string(),
            start_line: start,
            end_line: start + 4,
            content: content.to_string(),
            signature: Some(format!("fn f{start}()")),
            kind: ChunkKind::Function,
            symbols: vec![format!("f{start}")],
            dependencies: vec!["std::fmt".to_string()],
            metadata: ChunkMetadata { last_modified_ms: 42, exports: vec![] },
        }
    }

    fn unit(axis: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; DIM];
        v[axis % DIM] = 1.0;
        v
    }

    #[test]
    fn insert_get_round_trip() {
        let (_tmp, store) = store();
        let c = chunk("src/a.rs", 1, "fn f1() { body(); }");
        store.insert(&c, Some(&unit(0))).unwrap();

        let got = store.get(&c.id).unwrap().unwrap();
        assert_eq!(got, c);
        assert_eq!(store.get_vector(&c.id).unwrap().unwrap(), unit(0));
    }

    #[test]
    fn dimension_mismatch_leaves_store_unchanged() {
        let (_tmp, store) = store();
        let c = chunk("src/a.rs", 1, "x");
        let err = store.insert(&c, Some(&[1.0; DIM + 3])).unwrap_err();
        assert_eq!(err.kind(), "store.dimension_mismatch");
        assert_eq!(store.stats().unwrap().chunk_count, 0);
    }

    #[test]
    fn batch_failure_is_invisible() {
        let (_tmp, store) = store();
        let items = vec![
            (chunk("a.rs", 1, "one"), Some(unit(0))),
            (chunk("a.rs", 10, "two"), Some(vec![1.0; DIM + 1])), // bad dimension
        ];
        assert!(store.insert_batch(&items).is_err());
        assert_eq!(store.stats().unwrap().chunk_count, 0);
        assert_eq!(store.stats().unwrap().vector_count, 0);
    }

    #[test]
    fn delete_is_idempotent() {
        let (_tmp, store) = store();
        let c = chunk("a.rs", 1, "x");
        store.insert(&c, Some(&unit(1))).unwrap();
        store.delete(&c.id).unwrap();
        store.delete(&c.id).unwrap();
        assert!(store.get(&c.id).unwrap().is_none());
    }

    #[test]
    fn delete_by_file_removes_only_that_file() {
        let (_tmp, store) = store();
        let items = vec![
            (chunk("a.rs", 1, "a1"), Some(unit(0))),
            (chunk("a.rs", 10, "a2"), Some(unit(1))),
            (chunk("b.rs", 1, "b1"), Some(unit(2))),
        ];
        store.insert_batch(&items).unwrap();

        let removed = store.delete_by_file("a.rs").unwrap();
        assert_eq!(removed.len(), 2);
        let stats = store.stats().unwrap();
        assert_eq!(stats.chunk_count, 1);
        assert_eq!(stats.vector_count, 1);
    }

    #[test]
    fn search_empty_store_is_ok() {
        let (_tmp, store) = store();
        assert!(store.search(&unit(0), 10, None).unwrap().is_empty());
    }

    #[test]
    fn brute_force_search_ranks_by_cosine() {
        let (_tmp, store) = store();
        store.insert(&chunk("a.rs", 1, "axis0"), Some(&unit(0))).unwrap();
        store.insert(&chunk("b.rs", 1, "axis1"), Some(&unit(1))).unwrap();

        let results = store.search(&unit(0), 2, None).unwrap();
        assert_eq!(results[0].0.file_path, "a.rs");
        assert!(results[0].1 > 0.99);
        assert!(results[0].1 >= results[1].1);
    }

    #[test]
    fn min_score_filters() {
        let (_tmp, store) = store();
        store.insert(&chunk("a.rs", 1, "axis0"), Some(&unit(0))).unwrap();
        store.insert(&chunk("b.rs", 1, "axis1"), Some(&unit(1))).unwrap();

        let results = store.search(&unit(0), 10, Some(0.5)).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.file_path, "a.rs");
    }

    #[test]
    fn hnsw_path_used_when_populated() {
        let (_tmp, store) = store();
        let c0 = chunk("a.rs", 1, "axis0");
        let c1 = chunk("b.rs", 1, "axis1");
        store.insert(&c0, Some(&unit(0))).unwrap();
        store.insert(&c1, Some(&unit(1))).unwrap();
        store.hnsw().add(&c0.id, &unit(0)).unwrap();
        store.hnsw().add(&c1.id, &unit(1)).unwrap();

        let results = store.search(&unit(1), 1, None).unwrap();
        assert_eq!(results[0].0.file_path, "b.rs");
    }

    #[test]
    fn get_all_pages_through_everything() {
        let (_tmp, store) = store();
        let items: Vec<(Chunk, Option<Vec<f32>>)> = (0..600)
            .map(|i| (chunk("big.rs", i * 10 + 1, &format!("chunk {i}")), None))
            .collect();
        store.insert_batch(&items).unwrap();

        let all: Vec<Chunk> = store.get_all().map(|c| c.unwrap()).collect();
        assert_eq!(all.len(), 600);
    }

    #[test]
    fn clear_wipes_everything() {
        let (_tmp, store) = store();
        store.insert(&chunk("a.rs", 1, "x"), Some(&unit(0))).unwrap();
        store.clear().unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.chunk_count, 0);
        assert_eq!(stats.vector_count, 0);
        assert!(stats.languages.is_empty());
    }

    #[test]
    fn stats_count_languages() {
        let (_tmp, store) = store();
        let mut c = chunk("a.py", 1, "def x(): pass");
        c.language = "python".to_string();
        c.id = chunk_id("a.py", 1, 5, "python");
        store.insert(&c, None).unwrap();
        store.insert(&chunk("b.rs", 1, "fn x() {}"), None).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.languages.get("python"), Some(&1));
        assert_eq!(stats.languages.get("rust"), Some(&1));
    }
}
