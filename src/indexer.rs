//! Index orchestration.
//!
//! Drives an incremental index run end-to-end: walk the tree, compare
//! checksums, re-chunk and re-embed only what changed, sweep deletions,
//! persist the ANN index and metadata, and report per-file failures
//! without aborting the run. Cancellation lands at file boundaries, so a
//! cancelled run leaves every file either fully committed or untouched.

use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::checksum_store::{checksum, ChecksumStore, FileRecord};
use crate::chunker::Chunker;
use crate::config::IndexerConfig;
use crate::embedding::EmbeddingClient;
use crate::error::{Error, Result};
use crate::hnsw;
use crate::walker::{looks_binary, SourceWalker, WalkedFile};
use crate::vector_store::VectorStore;

/// Receives `(percent_complete, message)` during a run.
pub type ProgressCallback = Arc<dyn Fn(f32, &str) + Send + Sync>;

#[derive(Clone, Default)]
pub struct IndexOptions {
    pub progress: Option<ProgressCallback>,
    pub cancel: CancelToken,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexReport {
    pub files_indexed: usize,
    pub chunks_indexed: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub files_deleted: usize,
    /// (path, message) per failed file.
    pub failures: Vec<(String, String)>,
    pub duration_ms: u64,
}

enum FileOutcome {
    Indexed(usize),
    Skipped,
}

pub struct Indexer {
    config: IndexerConfig,
    checksum_store: Arc<ChecksumStore>,
    vector_store: Arc<VectorStore>,
    embedder: Arc<dyn EmbeddingClient>,
    base_dir: PathBuf,
    /// Prevents overlapping runs; checked with a CAS like any other guard.
    running: AtomicBool,
}

impl Indexer {
    pub fn new(
        config: IndexerConfig,
        checksum_store: Arc<ChecksumStore>,
        vector_store: Arc<VectorStore>,
        embedder: Arc<dyn EmbeddingClient>,
        base_dir: PathBuf,
    ) -> Self {
        Self {
            config,
            checksum_store,
            vector_store,
            embedder,
            base_dir,
            running: AtomicBool::new(false),
        }
    }

    fn progress(options: &IndexOptions, percent: f32, message: &str) {
        if let Some(callback) = &options.progress {
            callback(percent, message);
        }
    }

    /// Run one incremental index pass over `root`.
    pub async fn index_directory(
        &self,
        root: &Path,
        options: &IndexOptions,
    ) -> Result<IndexReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Storage("an index run is already in progress".into()));
        }
        struct RunGuard<'a>(&'a AtomicBool);
        impl Drop for RunGuard<'_> {
            fn drop(&mut self) {
                self.0.store(false, Ordering::SeqCst);
            }
        }
        let _guard = RunGuard(&self.running);

        let start = std::time::Instant::now();
        let mut report = IndexReport::default();

        Self::progress(options, 0.0, "walking source tree");
        let walker = SourceWalker::new(root, &self.config)?;
        let walk = walker.walk();
        let total = walk.files.len();
        report.files_skipped += walk.skipped_oversize.len();
        for (path, size) in &walk.skipped_oversize {
            warn!(path, size, "Skipping oversize file");
        }

        for (i, file) in walk.files.iter().enumerate() {
            options.cancel.check().inspect_err(|_| {
                self.persist_best_effort();
            })?;

            let percent = if total == 0 { 1.0 } else { i as f32 / total as f32 };
            Self::progress(options, percent, &format!("indexing {}", file.rel_path));

            match self.process_file(file).await {
                Ok(FileOutcome::Indexed(chunks)) => {
                    report.files_indexed += 1;
                    report.chunks_indexed += chunks;
                }
                Ok(FileOutcome::Skipped) => report.files_skipped += 1,
                Err(e) => {
                    warn!(path = %file.rel_path, error = %e, "File failed to index");
                    report.files_failed += 1;
                    report.failures.push((file.rel_path.clone(), e.to_string()));
                }
            }
        }

        // Deletion sweep: anything in the file index missing from this walk.
        Self::progress(options, 0.97, "sweeping deleted files");
        let current: std::collections::HashSet<String> =
            walk.files.iter().map(|f| f.rel_path.clone()).collect();
        let deleted = self.checksum_store.detect_deleted(&current)?;
        for path in &deleted {
            options.cancel.check().inspect_err(|_| {
                self.persist_best_effort();
            })?;
            self.checksum_store.mark_deleted(path)?;
            self.vector_store.delete_by_file(path)?;
            self.checksum_store.remove_record(path)?;
            self.checksum_store.mark_cleaned(path)?;
            report.files_deleted += 1;
        }

        Self::progress(options, 0.99, "persisting index");
        self.persist()?;

        report.duration_ms = start.elapsed().as_millis() as u64;
        Self::progress(options, 1.0, "index run complete");
        info!(
            files_indexed = report.files_indexed,
            chunks_indexed = report.chunks_indexed,
            files_skipped = report.files_skipped,
            files_failed = report.files_failed,
            files_deleted = report.files_deleted,
            duration_ms = report.duration_ms,
            "Index run complete"
        );
        Ok(report)
    }

    /// Checksum-compare one file and, when it changed, replace all of its
    /// chunks: embed first, then delete-then-insert so searches never see
    /// stale rows mixed with new ones.
    async fn process_file(&self, file: &WalkedFile) -> Result<FileOutcome> {
        let bytes = file.read()?;
        if looks_binary(&bytes) {
            return Ok(FileOutcome::Skipped);
        }

        let file_checksum = checksum(&bytes);
        if !self.checksum_store.needs_reindex(&file.rel_path, &file_checksum)? {
            return Ok(FileOutcome::Skipped);
        }

        let text = String::from_utf8_lossy(&bytes);
        let extension = Path::new(&file.rel_path)
            .extension()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let language = crate::lang::detect_language(&extension);

        let chunker = Chunker::new(&self.config);
        let chunks = chunker.chunk_file(&file.rel_path, &text, language, file.mtime_ms);

        // Embed before touching the store so an embedding failure leaves
        // the previous version of the file intact.
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.config.batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let embedded = self.embedder.embed_batch(&texts).await?;
            if embedded.len() != texts.len() {
                return Err(Error::Embedding(format!(
                    "embedder returned {} vectors for {} texts",
                    embedded.len(),
                    texts.len()
                )));
            }
            vectors.extend(embedded);
        }

        self.vector_store.delete_by_file(&file.rel_path)?;

        let rows: Vec<_> = chunks
            .iter()
            .cloned()
            .zip(vectors.iter().cloned().map(Some))
            .collect();
        self.vector_store.insert_batch(&rows)?;

        let hnsw_rows: Vec<(String, Vec<f32>)> = chunks
            .iter()
            .map(|c| c.id.clone())
            .zip(vectors.into_iter())
            .collect();
        self.vector_store.hnsw().add_batch(&hnsw_rows)?;

        self.checksum_store.put_record(&FileRecord {
            path: file.rel_path.clone(),
            checksum: file_checksum,
            file_size: file.size,
            last_modified: file.mtime_ms,
            last_indexed: chrono::Utc::now().timestamp_millis(),
            chunk_count: chunks.len(),
        })?;

        Ok(FileOutcome::Indexed(chunks.len()))
    }

    /// Persist the ANN pair and refresh the metadata totals.
    fn persist(&self) -> Result<()> {
        self.vector_store.hnsw().save(
            &self.base_dir.join(hnsw::INDEX_FILE),
            &self.base_dir.join(hnsw::MAPPING_FILE),
        )?;
        let stats = self.checksum_store.stats()?;
        self.vector_store.update_metadata(stats.total_files, stats.total_chunks)?;
        Ok(())
    }

    /// On cancellation, committed files stay committed; flush what we can
    /// so a restart starts from a consistent pair.
    fn persist_best_effort(&self) {
        if let Err(e) = self.persist() {
            warn!(error = %e, "Persist after cancellation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::hnsw::{HnswIndex, HnswParams};
    use crate::storage::Storage;
    use tempfile::TempDir;

    const DIM: usize = 32;

    struct Fixture {
        _store_dir: TempDir,
        source_dir: TempDir,
        indexer: Indexer,
        vector_store: Arc<VectorStore>,
        checksum_store: Arc<ChecksumStore>,
    }

    fn fixture() -> Fixture {
        let store_dir = TempDir::new().unwrap();
        let source_dir = TempDir::new().unwrap();
        let storage = Storage::open(store_dir.path(), DIM).unwrap();
        let hnsw = Arc::new(HnswIndex::new(HnswParams::new(
            DIM,
            &crate::config::HnswConfig::default(),
        )));
        let vector_store = Arc::new(VectorStore::new(storage.clone(), hnsw));
        let checksum_store = Arc::new(ChecksumStore::new(storage));
        let embedder: Arc<dyn EmbeddingClient> = Arc::new(HashEmbedder::new(DIM));
        let indexer = Indexer::new(
            IndexerConfig::default(),
            checksum_store.clone(),
            vector_store.clone(),
            embedder,
            store_dir.path().to_path_buf(),
        );
        Fixture { _store_dir: store_dir, source_dir, indexer, vector_store, checksum_store }
    }

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn fresh_run_indexes_everything() {
        let fx = fixture();
        write(fx.source_dir.path(), "a.rs", "pub fn alpha() { body(); }\n");
        write(fx.source_dir.path(), "b.rs", "pub fn beta() { body(); }\n");

        let report = fx
            .indexer
            .index_directory(fx.source_dir.path(), &IndexOptions::default())
            .await
            .unwrap();
        assert_eq!(report.files_indexed, 2);
        assert!(report.chunks_indexed >= 2);
        assert_eq!(report.files_failed, 0);
        assert_eq!(fx.vector_store.stats().unwrap().chunk_count, report.chunks_indexed);
        assert_eq!(fx.vector_store.hnsw().count(), report.chunks_indexed);
    }

    #[tokio::test]
    async fn second_run_skips_unchanged() {
        let fx = fixture();
        write(fx.source_dir.path(), "a.rs", "pub fn alpha() {}\n");

        fx.indexer
            .index_directory(fx.source_dir.path(), &IndexOptions::default())
            .await
            .unwrap();
        let second = fx
            .indexer
            .index_directory(fx.source_dir.path(), &IndexOptions::default())
            .await
            .unwrap();
        assert_eq!(second.files_indexed, 0);
        assert_eq!(second.files_skipped, 1);
    }

    #[tokio::test]
    async fn edit_replaces_chunks() {
        let fx = fixture();
        write(fx.source_dir.path(), "a.rs", "pub fn old_name() {}\n");
        fx.indexer
            .index_directory(fx.source_dir.path(), &IndexOptions::default())
            .await
            .unwrap();

        write(fx.source_dir.path(), "a.rs", "pub fn new_name() { different(); }\n");
        let report = fx
            .indexer
            .index_directory(fx.source_dir.path(), &IndexOptions::default())
            .await
            .unwrap();
        assert_eq!(report.files_indexed, 1);

        let symbols: Vec<String> = fx
            .vector_store
            .get_all()
            .map(|c| c.unwrap())
            .flat_map(|c| c.symbols)
            .collect();
        assert!(symbols.contains(&"new_name".to_string()));
        assert!(!symbols.contains(&"old_name".to_string()));
    }

    #[tokio::test]
    async fn deletion_sweep_removes_state() {
        let fx = fixture();
        write(fx.source_dir.path(), "a.rs", "pub fn alpha() {}\n");
        write(fx.source_dir.path(), "b.rs", "pub fn beta() {}\n");
        fx.indexer
            .index_directory(fx.source_dir.path(), &IndexOptions::default())
            .await
            .unwrap();

        std::fs::remove_file(fx.source_dir.path().join("b.rs")).unwrap();
        let report = fx
            .indexer
            .index_directory(fx.source_dir.path(), &IndexOptions::default())
            .await
            .unwrap();
        assert_eq!(report.files_deleted, 1);

        let paths: Vec<String> = fx
            .vector_store
            .get_all()
            .map(|c| c.unwrap().file_path)
            .collect();
        assert!(!paths.contains(&"b.rs".to_string()));
        assert_eq!(fx.checksum_store.stats().unwrap().pending_cleanup, 0);
    }

    #[tokio::test]
    async fn cancellation_stops_at_file_boundary() {
        let fx = fixture();
        for i in 0..5 {
            write(fx.source_dir.path(), &format!("f{i}.rs"), &format!("pub fn f{i}() {{}}\n"));
        }
        let options = IndexOptions::default();
        options.cancel.cancel();
        let err = fx
            .indexer
            .index_directory(fx.source_dir.path(), &options)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(fx.vector_store.stats().unwrap().chunk_count, 0);
    }

    #[tokio::test]
    async fn progress_reports_per_file() {
        let fx = fixture();
        write(fx.source_dir.path(), "a.rs", "pub fn alpha() {}\n");

        let seen = Arc::new(parking_lot::Mutex::new(Vec::<(f32, String)>::new()));
        let sink = seen.clone();
        let options = IndexOptions {
            progress: Some(Arc::new(move |pct, msg: &str| {
                sink.lock().push((pct, msg.to_string()));
            })),
            cancel: CancelToken::new(),
        };
        fx.indexer.index_directory(fx.source_dir.path(), &options).await.unwrap();

        let seen = seen.lock();
        assert!(seen.iter().any(|(_, m)| m.contains("a.rs")));
        assert!(seen.last().unwrap().0 >= 1.0);
    }
}
