//! Engine facade.
//!
//! Owns every component — storage, checksum store, vector store, HNSW,
//! embedder, scorer, compressor, router, optimizer, indexer — and presents
//! the callable surface external integrations adapt to their own wire
//! formats: index, search, optimize, stats, clear, backup/restore. No
//! global state; configuration is passed in explicitly.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backup;
use crate::cancel::CancelToken;
use crate::checksum_store::{ChecksumStats, ChecksumStore};
use crate::chunk::Chunk;
use crate::compress::Compressor;
use crate::config::{EngineConfig, MAX_SEARCH_QUERY_LENGTH};
use crate::embedding::{EmbeddingClient, HashEmbedder, RetryingEmbedder};
use crate::error::{Error, Result};
use crate::hnsw::{self, HnswIndex, HnswParams, HnswStats};
use crate::indexer::{IndexOptions, IndexReport, Indexer};
use crate::optimizer::{OptimizedPrompt, QueryContext, TokenOptimizer};
use crate::router::ModelRouter;
use crate::scoring::{usage::UsageTracker, RelevanceScorer, ScorerMetrics};
use crate::storage::{IndexMetadata, Storage};
use crate::vector_store::{StoreStats, VectorStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    pub metadata: IndexMetadata,
    pub store: StoreStats,
    pub files: ChecksumStats,
    pub hnsw: HnswStats,
    pub scorer: ScorerMetrics,
}

pub struct Engine {
    config: EngineConfig,
    storage: Arc<Storage>,
    checksum_store: Arc<ChecksumStore>,
    vector_store: Arc<VectorStore>,
    embedder: Arc<dyn EmbeddingClient>,
    scorer: Arc<RelevanceScorer>,
    optimizer: TokenOptimizer,
    indexer: Indexer,
    /// Index generation, bumped on every mutation; keys the score cache.
    epoch: AtomicU64,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Build an engine with the default local feature-hashing embedder.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let dimension = config.vector_store.dimension;
        let local: Arc<dyn EmbeddingClient> = Arc::new(HashEmbedder::new(dimension));
        let embedder: Arc<dyn EmbeddingClient> =
            Arc::new(RetryingEmbedder::new(local, &config.embedding));
        Self::with_embedder(config, embedder)
    }

    /// Build an engine around a caller-supplied embedding provider.
    pub fn with_embedder(
        config: EngineConfig,
        embedder: Arc<dyn EmbeddingClient>,
    ) -> Result<Self> {
        config.validate()?;
        let dimension = config.vector_store.dimension;
        if embedder.dimension() != dimension {
            return Err(Error::Config(format!(
                "embedder dimension {} does not match vector_store.dimension {}",
                embedder.dimension(),
                dimension
            )));
        }

        let base_dir = config.vector_store.path.clone();
        let storage = Storage::open(&base_dir, dimension)?;
        let checksum_store = Arc::new(ChecksumStore::new(storage.clone()));

        let params = HnswParams::new(dimension, &config.hnsw);
        let index_path = base_dir.join(hnsw::INDEX_FILE);
        let mapping_path = base_dir.join(hnsw::MAPPING_FILE);
        let hnsw_index = if index_path.exists() && mapping_path.exists() {
            match HnswIndex::load(&index_path, &mapping_path, params) {
                Ok(index) => Arc::new(index),
                Err(e) => {
                    warn!(error = %e, "Persisted ANN index unusable, rebuilding from store");
                    Arc::new(HnswIndex::new(params))
                }
            }
        } else {
            Arc::new(HnswIndex::new(params))
        };

        let vector_store = Arc::new(VectorStore::new(storage.clone(), hnsw_index.clone()));
        if hnsw_index.count() == 0 {
            let vectors = vector_store.all_vectors()?;
            if !vectors.is_empty() {
                info!(count = vectors.len(), "Rebuilding ANN index from stored vectors");
                hnsw_index.add_batch(&vectors)?;
            }
        }

        let usage = Arc::new(UsageTracker::load(base_dir.join("usage_stats.json")));
        let scorer = Arc::new(RelevanceScorer::new(&config.scoring, usage)?);
        let compressor = Arc::new(Compressor::new(config.compression.clone()));
        let router = Arc::new(ModelRouter::new(config.router.clone()));

        let optimizer = TokenOptimizer::new(
            config.optimizer.clone(),
            vector_store.clone(),
            embedder.clone(),
            scorer.clone(),
            compressor,
            router,
        );
        let indexer = Indexer::new(
            config.indexer.clone(),
            checksum_store.clone(),
            vector_store.clone(),
            embedder.clone(),
            base_dir,
        );

        Ok(Self {
            config,
            storage,
            checksum_store,
            vector_store,
            embedder,
            scorer,
            optimizer,
            indexer,
            epoch: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Relaxed)
    }

    /// Run an incremental index pass over `root`. The score-cache epoch is
    /// bumped even for cancelled runs, since files may have committed.
    pub async fn index(&self, root: &Path, options: IndexOptions) -> Result<IndexReport> {
        let result = self.indexer.index_directory(root, &options).await;
        self.epoch.fetch_add(1, Ordering::Relaxed);
        result
    }

    /// Natural-language search over the index: embed, ANN search, rank.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        min_score: Option<f32>,
        cancel: &CancelToken,
    ) -> Result<Vec<(Chunk, f32)>> {
        if query.trim().is_empty() {
            return Err(Error::Search("query must not be empty".into()));
        }
        if query.len() > MAX_SEARCH_QUERY_LENGTH {
            return Err(Error::Search(format!(
                "query exceeds {MAX_SEARCH_QUERY_LENGTH} characters"
            )));
        }
        cancel.check()?;

        let vectors = self.embedder.embed_batch(&[query.to_string()]).await?;
        let query_vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("empty embedding result for query".into()))?;
        cancel.check()?;
        self.vector_store.search(&query_vector, limit, min_score)
    }

    /// Assemble a token-budgeted prompt for `prompt`.
    pub async fn optimize(
        &self,
        prompt: &str,
        budget: Option<usize>,
        context: QueryContext,
        cancel: &CancelToken,
    ) -> Result<OptimizedPrompt> {
        self.optimizer
            .optimize(prompt, budget, &context, self.epoch(), cancel)
            .await
    }

    pub fn stats(&self) -> Result<EngineStats> {
        Ok(EngineStats {
            metadata: self.storage.metadata(),
            store: self.vector_store.stats()?,
            files: self.checksum_store.stats()?,
            hnsw: self.vector_store.hnsw().stats(),
            scorer: self.scorer.metrics(),
        })
    }

    /// Wipe all indexed state: rows, ANN graph, caches, usage history.
    pub async fn clear(&self) -> Result<()> {
        self.vector_store.clear()?;
        self.scorer.invalidate_cache();
        self.scorer.usage().retain_ids(&Default::default());
        self.scorer.usage().save()?;
        self.vector_store.hnsw().save(
            &self.storage.base_dir().join(hnsw::INDEX_FILE),
            &self.storage.base_dir().join(hnsw::MAPPING_FILE),
        )?;
        self.epoch.fetch_add(1, Ordering::Relaxed);
        info!("Engine state cleared");
        Ok(())
    }

    /// Snapshot the store into the backup directory.
    pub fn backup(&self) -> Result<PathBuf> {
        backup::create_backup(&self.storage, self.config.vector_store.backup_keep)
    }

    pub fn list_backups(&self) -> Result<Vec<PathBuf>> {
        backup::list_backups(self.storage.base_dir())
    }

    /// Restore a snapshot into `store_dir`. Build a fresh `Engine` against
    /// the directory afterwards; open handles keep seeing the old state.
    pub fn restore(snapshot_dir: &Path, store_dir: &Path) -> Result<()> {
        backup::restore_backup(snapshot_dir, store_dir)
    }
}
