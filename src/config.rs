use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum allowed length for search queries (characters).
pub const MAX_SEARCH_QUERY_LENGTH: usize = 1000;

/// Directory names that are never worth indexing, even without a .gitignore.
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    "node_modules", ".git", "target", "dist", "build", "out",
    ".next", ".nuxt", ".output", ".vite", ".turbo", ".svelte-kit",
    "__pycache__", ".tox", ".mypy_cache", ".pytest_cache", ".ruff_cache",
    "coverage", ".nyc_output", ".cache", "vendor", ".gradle", ".terraform",
    ".vscode", ".idea", ".cargo",
];

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("codectx"))
        .unwrap_or_else(|| PathBuf::from(".codectx-data"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Target tokens per chunk for the fallback window chunker.
    pub chunk_size: usize,
    /// Token overlap between consecutive windows.
    pub chunk_overlap: usize,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    /// Files above this size are skipped and reported.
    pub max_file_size: u64,
    /// Honor the host VCS ignore file during the walk.
    pub respect_gitignore: bool,
    /// Embedding/insert batch size during an index run.
    pub batch_size: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 256,
            chunk_overlap: 32,
            include_patterns: vec!["**/*".to_string()],
            exclude_patterns: DEFAULT_EXCLUDED_DIRS
                .iter()
                .map(|d| format!("**/{d}/**"))
                .collect(),
            max_file_size: 10 * 1024 * 1024,
            respect_gitignore: true,
            batch_size: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorStoreConfig {
    /// Base directory for persistent state.
    pub path: PathBuf,
    /// Embedding dimension, immutable after the first run.
    pub dimension: usize,
    /// Snapshots kept in the backup directory.
    pub backup_keep: usize,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            path: default_data_dir(),
            dimension: 256,
            backup_keep: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswConfig {
    /// Maximum out-degree per node per layer.
    pub m: usize,
    /// Candidate list size during insertion.
    pub ef_construction: usize,
    /// Candidate list size during query.
    pub ef_search: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self { m: 16, ef_construction: 200, ef_search: 64 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model_id: String,
    pub batch_size: usize,
    /// Per-call timeout for remote providers, milliseconds.
    pub timeout_ms: u64,
    /// Retry attempts for transient embedding failures.
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_id: "hash-v1".to_string(),
            batch_size: 32,
            timeout_ms: 10_000,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Feature name -> weight; must sum to 1.
    pub weights: HashMap<String, f64>,
    pub cache_capacity: usize,
    pub cache_ttl_secs: u64,
    pub parallelism: usize,
    /// Half-life for the recency feature, days.
    pub recency_half_life_days: f64,
    pub metrics_enabled: bool,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let weights = [
            ("semantic", 0.40),
            ("symbol_match", 0.25),
            ("file_proximity", 0.20),
            ("recency", 0.10),
            ("usage_frequency", 0.05),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Self {
            weights,
            cache_capacity: 2048,
            cache_ttl_secs: 300,
            parallelism: 4,
            recency_half_life_days: 14.0,
            metrics_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub preserve_imports: bool,
    pub preserve_types: bool,
    /// Levels whose expected ratio exceeds this are skipped.
    pub max_ratio: f64,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self { preserve_imports: true, preserve_types: true, max_ratio: 30.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Total prompt token budget.
    pub token_budget: usize,
    pub min_relevance: f64,
    pub max_chunks: usize,
    /// Budget split; fractions must not sum above 1.
    pub system_fraction: f64,
    pub user_query_fraction: f64,
    pub context_fraction: f64,
    pub response_reserve_fraction: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            token_budget: 8000,
            min_relevance: 0.10,
            max_chunks: 10,
            system_fraction: 0.05,
            user_query_fraction: 0.10,
            context_fraction: 0.60,
            response_reserve_fraction: 0.25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterTier {
    pub model_id: String,
    /// Upper token bound for this tier (inclusive).
    pub max_tokens: usize,
    /// Complexity above this bumps the decision to the next tier.
    pub complexity_cap: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Ordered cheapest-first; the last tier is the flagship catch-all.
    pub tiers: Vec<RouterTier>,
    pub prefer_local: bool,
    pub local_model: Option<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            tiers: vec![
                RouterTier {
                    model_id: "small-local".to_string(),
                    max_tokens: 2_000,
                    complexity_cap: 0.3,
                },
                RouterTier {
                    model_id: "mid-tier".to_string(),
                    max_tokens: 16_000,
                    complexity_cap: 0.7,
                },
                RouterTier {
                    model_id: "flagship".to_string(),
                    max_tokens: usize::MAX,
                    complexity_cap: 1.0,
                },
            ],
            prefer_local: false,
            local_model: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// One of: trace, debug, info, warn, error.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

/// The single configuration record loaded at startup. All components read
/// their options from here; nothing is global.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub indexer: IndexerConfig,
    pub vector_store: VectorStoreConfig,
    pub hnsw: HnswConfig,
    pub embedding: EmbeddingConfig,
    pub scoring: ScoringConfig,
    pub compression: CompressionConfig,
    pub optimizer: OptimizerConfig,
    pub router: RouterConfig,
    pub log: LogConfig,
}

impl EngineConfig {
    /// Load from a JSON file, falling back to defaults for absent sections.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would violate engine invariants. A weight
    /// table that does not sum to 1 is a fatal configuration error.
    pub fn validate(&self) -> Result<()> {
        let sum: f64 = self.scoring.weights.values().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(Error::WeightSum { sum });
        }
        for (name, w) in &self.scoring.weights {
            if !(0.0..=1.0).contains(w) {
                return Err(Error::Config(format!(
                    "scoring weight '{name}' out of [0,1]: {w}"
                )));
            }
        }
        if self.vector_store.dimension == 0 {
            return Err(Error::Config("vector_store.dimension must be positive".into()));
        }
        if self.hnsw.m < 2 {
            return Err(Error::Config("hnsw.m must be at least 2".into()));
        }
        if self.hnsw.ef_construction == 0 || self.hnsw.ef_search == 0 {
            return Err(Error::Config("hnsw ef parameters must be positive".into()));
        }
        if self.indexer.chunk_size == 0 {
            return Err(Error::Config("indexer.chunk_size must be positive".into()));
        }
        if self.indexer.chunk_overlap >= self.indexer.chunk_size {
            return Err(Error::Config(
                "indexer.chunk_overlap must be smaller than chunk_size".into(),
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(Error::Config("embedding.batch_size must be positive".into()));
        }
        if self.scoring.parallelism == 0 {
            return Err(Error::Config("scoring.parallelism must be positive".into()));
        }
        if self.compression.max_ratio < 1.0 {
            return Err(Error::Config("compression.max_ratio must be >= 1".into()));
        }
        let fractions = self.optimizer.system_fraction
            + self.optimizer.user_query_fraction
            + self.optimizer.context_fraction
            + self.optimizer.response_reserve_fraction;
        if fractions > 1.0 + 1e-9 {
            return Err(Error::Config(format!(
                "optimizer budget fractions sum above 1: {fractions}"
            )));
        }
        if self.router.tiers.is_empty() {
            return Err(Error::Config("router.tiers must not be empty".into()));
        }
        Ok(())
    }
}
