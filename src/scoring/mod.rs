//! Pluggable relevance scoring.
//!
//! A feature scorer is a named object producing a value in [0, 1] for a
//! `(chunk, context)` pair; the registry holds `(weight, feature)` pairs
//! whose weights must sum to 1, validated at construction. Batch scoring
//! fans out over a dedicated rayon pool, results come back sorted with a
//! deterministic tie-break, and a keyed LRU cache short-circuits repeat
//! evaluations of the same chunk/query/epoch triple.
//!
//! Memory stays proportional to the batch plus the bounded cache: one
//! candidate record and one breakdown per chunk in flight, so a 1K-chunk
//! batch stays under roughly 8 MB with the default cache capacity.

pub mod cache;
pub mod features;
pub mod usage;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::chunk::CandidateChunk;
use crate::config::ScoringConfig;
use crate::error::{Error, Result};
use cache::{CacheKey, ScoreCache};
use features::{
    FileProximityFeature, RecencyFeature, SemanticFeature, SymbolMatchFeature,
    UsageFrequencyFeature,
};
use usage::UsageTracker;

/// Per-query environment a feature scorer sees.
#[derive(Debug, Clone)]
pub struct ScoringContext {
    pub query_text: String,
    /// Short hash of the query text, part of the cache key.
    pub query_hash: String,
    pub query_vector: Vec<f32>,
    pub current_file: Option<String>,
    pub recent_files: Vec<String>,
    pub symbols_in_query: Vec<String>,
    pub now_ms: i64,
    /// Bumped by the engine whenever the index mutates, invalidating
    /// cached scores from before the change.
    pub epoch: u64,
    /// Min/max usage EMA over the current candidate set, filled by the
    /// batch scorer before fan-out.
    pub usage_bounds: Option<(f64, f64)>,
}

/// Short stable hash of a query string for cache keying.
pub fn hash_query(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..16].to_string()
}

/// A named scoring capability. Implementations must be pure with respect
/// to their inputs; the batch scorer runs them in parallel.
pub trait FeatureScorer: Send + Sync {
    fn name(&self) -> &'static str;
    /// Returns a value in [0, 1].
    fn score(&self, candidate: &CandidateChunk, ctx: &ScoringContext) -> f64;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScore {
    pub name: String,
    pub weight: f64,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub candidate: CandidateChunk,
    pub total_score: f64,
    pub features: Vec<FeatureScore>,
}

impl ScoredChunk {
    fn feature(&self, name: &str) -> f64 {
        self.features
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.score)
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScorerMetrics {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub hit_rate: f64,
    pub chunks_evaluated: u64,
    pub mean_eval_time_us: f64,
}

pub struct RelevanceScorer {
    features: Vec<(f64, Box<dyn FeatureScorer>)>,
    cache: ScoreCache,
    pool: rayon::ThreadPool,
    usage: Arc<UsageTracker>,
    metrics_enabled: bool,
    evaluated: AtomicU64,
    eval_time_ns: AtomicU64,
}

impl std::fmt::Debug for RelevanceScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelevanceScorer")
            .field("metrics_enabled", &self.metrics_enabled)
            .finish_non_exhaustive()
    }
}

impl RelevanceScorer {
    /// Build the default five-feature registry with weights taken from the
    /// configuration. Weights not summing to 1 (or naming an unknown
    /// feature) are a fatal configuration error.
    pub fn new(config: &ScoringConfig, usage: Arc<UsageTracker>) -> Result<Self> {
        let builtin: Vec<Box<dyn FeatureScorer>> = vec![
            Box::new(SemanticFeature),
            Box::new(SymbolMatchFeature),
            Box::new(FileProximityFeature),
            Box::new(RecencyFeature { half_life_days: config.recency_half_life_days }),
            Box::new(UsageFrequencyFeature { tracker: usage.clone() }),
        ];
        let known: Vec<&'static str> = builtin.iter().map(|f| f.name()).collect();
        for name in config.weights.keys() {
            if !known.contains(&name.as_str()) {
                return Err(Error::Config(format!("unknown scoring feature '{name}'")));
            }
        }

        let mut features = Vec::with_capacity(builtin.len());
        for feature in builtin {
            let weight = config.weights.get(feature.name()).copied().unwrap_or(0.0);
            features.push((weight, feature));
        }
        Self::with_features(config, usage, features)
    }

    /// Plugin entry point: an explicit registry replaces the default one.
    /// The weight-sum invariant still applies.
    pub fn with_features(
        config: &ScoringConfig,
        usage: Arc<UsageTracker>,
        features: Vec<(f64, Box<dyn FeatureScorer>)>,
    ) -> Result<Self> {
        let sum: f64 = features.iter().map(|(w, _)| w).sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(Error::WeightSum { sum });
        }
        for (weight, feature) in &features {
            if !(0.0..=1.0).contains(weight) {
                return Err(Error::Config(format!(
                    "weight for '{}' out of [0,1]: {weight}",
                    feature.name()
                )));
            }
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.parallelism)
            .thread_name(|i| format!("scorer-{i}"))
            .build()
            .map_err(|e| Error::Config(format!("scorer pool: {e}")))?;

        Ok(Self {
            features,
            cache: ScoreCache::new(
                config.cache_capacity,
                Duration::from_secs(config.cache_ttl_secs),
            ),
            pool,
            usage,
            metrics_enabled: config.metrics_enabled,
            evaluated: AtomicU64::new(0),
            eval_time_ns: AtomicU64::new(0),
        })
    }

    pub fn usage(&self) -> &Arc<UsageTracker> {
        &self.usage
    }

    /// Score a candidate batch. Parallel across chunks; output sorted by
    /// total score descending, ties broken by semantic score then chunk id.
    pub fn score_batch(
        &self,
        candidates: Vec<CandidateChunk>,
        ctx: &ScoringContext,
    ) -> Vec<ScoredChunk> {
        if candidates.is_empty() {
            return Vec::new();
        }

        // Usage min-max bounds need the whole candidate set, so they are
        // computed once up front and carried in the context.
        let mut ctx = ctx.clone();
        let emas: Vec<f64> =
            candidates.iter().map(|c| self.usage.ema(&c.chunk.id)).collect();
        let min = emas.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = emas.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        ctx.usage_bounds = if min.is_finite() && max.is_finite() {
            Some((min, max))
        } else {
            None
        };

        let mut scored: Vec<ScoredChunk> = self.pool.install(|| {
            candidates
                .into_par_iter()
                .map(|candidate| self.score_one(candidate, &ctx))
                .collect()
        });

        scored.sort_by(|a, b| {
            b.total_score
                .partial_cmp(&a.total_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.feature("semantic")
                        .partial_cmp(&a.feature("semantic"))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.candidate.chunk.id.cmp(&b.candidate.chunk.id))
        });
        scored
    }

    fn score_one(&self, candidate: CandidateChunk, ctx: &ScoringContext) -> ScoredChunk {
        let key = CacheKey {
            chunk_id: candidate.chunk.id.clone(),
            query_hash: ctx.query_hash.clone(),
            epoch: ctx.epoch,
        };
        if let Some((total, features)) = self.cache.get(&key) {
            return ScoredChunk { candidate, total_score: total, features };
        }

        let started = Instant::now();
        let mut features = Vec::with_capacity(self.features.len());
        let mut total = 0.0;
        for (weight, feature) in &self.features {
            let score = feature.score(&candidate, ctx).clamp(0.0, 1.0);
            total += weight * score;
            features.push(FeatureScore {
                name: feature.name().to_string(),
                weight: *weight,
                score,
            });
        }

        if self.metrics_enabled {
            self.evaluated.fetch_add(1, Ordering::Relaxed);
            self.eval_time_ns
                .fetch_add(started.elapsed().as_nanos() as u64, Ordering::Relaxed);
        }
        self.cache.put(key, total, features.clone());
        ScoredChunk { candidate, total_score: total, features }
    }

    pub fn metrics(&self) -> ScorerMetrics {
        let evaluated = self.evaluated.load(Ordering::Relaxed);
        let eval_time_ns = self.eval_time_ns.load(Ordering::Relaxed);
        ScorerMetrics {
            cache_hits: self.cache.hit_count(),
            cache_misses: self.cache.miss_count(),
            hit_rate: self.cache.hit_rate(),
            chunks_evaluated: evaluated,
            mean_eval_time_us: if evaluated == 0 {
                0.0
            } else {
                eval_time_ns as f64 / evaluated as f64 / 1_000.0
            },
        }
    }

    pub fn invalidate_cache(&self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{chunk_id, Chunk, ChunkKind, ChunkMetadata};
    use tempfile::TempDir;

    fn tracker() -> (TempDir, Arc<UsageTracker>) {
        let tmp = TempDir::new().unwrap();
        let tracker = Arc::new(UsageTracker::load(tmp.path().join("usage.json")));
        (tmp, tracker)
    }

    fn candidate(path: &str, symbols: &[&str], embedding: Vec<f32>) -> CandidateChunk {
        CandidateChunk {
            chunk: Chunk {
                id: chunk_id(path, 1, 5, "rust"),
                file_path: path.to_string(),
                language: "rust".to_string(),
                start_line: 1,
                end_line: 5,
                content: format!("content of {path}"),
                signature: None,
                kind: ChunkKind::Function,
                symbols: symbols.iter().map(|s| s.to_string()).collect(),
                dependencies: vec![],
                metadata: ChunkMetadata { last_modified_ms: 0, exports: vec![] },
            },
            embedding: Some(embedding),
            retrieval_score: 0.0,
        }
    }

    fn ctx(query_vector: Vec<f32>, symbols: &[&str]) -> ScoringContext {
        ScoringContext {
            query_text: "find the parser".to_string(),
            query_hash: hash_query("find the parser"),
            query_vector,
            current_file: None,
            recent_files: vec![],
            symbols_in_query: symbols.iter().map(|s| s.to_string()).collect(),
            now_ms: 0,
            epoch: 0,
            usage_bounds: None,
        }
    }

    #[test]
    fn bad_weights_fail_at_init() {
        let (_tmp, usage) = tracker();
        let mut config = ScoringConfig::default();
        config.weights.insert("semantic".to_string(), 0.99);
        let err = RelevanceScorer::new(&config, usage).unwrap_err();
        assert_eq!(err.kind(), "config.weight_sum");
    }

    #[test]
    fn unknown_feature_name_fails_at_init() {
        let (_tmp, usage) = tracker();
        let mut config = ScoringConfig::default();
        config.weights.insert("nonsense".to_string(), 0.0);
        assert!(RelevanceScorer::new(&config, usage).is_err());
    }

    #[test]
    fn identical_chunk_outranks_others() {
        let (_tmp, usage) = tracker();
        let scorer = RelevanceScorer::new(&ScoringConfig::default(), usage).unwrap();
        let query_vec = vec![1.0, 0.0, 0.0];

        let exact = candidate("exact.rs", &["parser"], vec![1.0, 0.0, 0.0]);
        let other = candidate("other.rs", &["renderer"], vec![0.0, 1.0, 0.0]);
        let exact_id = exact.chunk.id.clone();

        let scored = scorer.score_batch(vec![other, exact], &ctx(query_vec, &["parser"]));
        assert_eq!(scored[0].candidate.chunk.id, exact_id);
        assert!(scored[0].total_score > scored[1].total_score);
    }

    #[test]
    fn second_scoring_hits_cache() {
        let (_tmp, usage) = tracker();
        let scorer = RelevanceScorer::new(&ScoringConfig::default(), usage).unwrap();
        let context = ctx(vec![1.0, 0.0], &[]);
        let cand = candidate("a.rs", &[], vec![1.0, 0.0]);

        scorer.score_batch(vec![cand.clone()], &context);
        let hits_before = scorer.metrics().cache_hits;
        scorer.score_batch(vec![cand], &context);
        assert_eq!(scorer.metrics().cache_hits, hits_before + 1);
    }

    #[test]
    fn epoch_bump_invalidates_cache() {
        let (_tmp, usage) = tracker();
        let scorer = RelevanceScorer::new(&ScoringConfig::default(), usage).unwrap();
        let mut context = ctx(vec![1.0, 0.0], &[]);
        let cand = candidate("a.rs", &[], vec![1.0, 0.0]);

        scorer.score_batch(vec![cand.clone()], &context);
        context.epoch += 1;
        let misses_before = scorer.metrics().cache_misses;
        scorer.score_batch(vec![cand], &context);
        assert!(scorer.metrics().cache_misses > misses_before);
    }

    #[test]
    fn ties_break_on_chunk_id() {
        let (_tmp, usage) = tracker();
        let scorer = RelevanceScorer::new(&ScoringConfig::default(), usage).unwrap();
        // Identical feature inputs, different paths: totals tie.
        let a = candidate("a.rs", &[], vec![1.0, 0.0]);
        let b = candidate("b.rs", &[], vec![1.0, 0.0]);
        let mut ids = vec![a.chunk.id.clone(), b.chunk.id.clone()];
        ids.sort();

        let scored = scorer.score_batch(vec![b, a], &ctx(vec![1.0, 0.0], &[]));
        assert_eq!(scored[0].candidate.chunk.id, ids[0]);
        assert_eq!(scored[1].candidate.chunk.id, ids[1]);
    }

    #[test]
    fn breakdown_reports_every_feature() {
        let (_tmp, usage) = tracker();
        let scorer = RelevanceScorer::new(&ScoringConfig::default(), usage).unwrap();
        let scored = scorer.score_batch(
            vec![candidate("a.rs", &[], vec![1.0, 0.0])],
            &ctx(vec![1.0, 0.0], &[]),
        );
        let names: Vec<&str> = scored[0].features.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["semantic", "symbol_match", "file_proximity", "recency", "usage_frequency"]
        );
        let weight_sum: f64 = scored[0].features.iter().map(|f| f.weight).sum();
        assert!((weight_sum - 1.0).abs() < 1e-9);
    }
}
