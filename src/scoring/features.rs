//! Built-in feature scorers.
//!
//! Each feature maps a candidate chunk to [0, 1] given the query context.
//! Features are pure with respect to their inputs so the batch scorer can
//! fan out freely.

use std::collections::HashSet;
use std::sync::Arc;

use super::{FeatureScorer, ScoringContext};
use crate::chunk::CandidateChunk;
use crate::scoring::usage::UsageTracker;

fn cosine_clamped(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    ((dot / (mag_a * mag_b)) as f64).clamp(0.0, 1.0)
}

/// Cosine similarity between the chunk embedding and the query vector.
pub struct SemanticFeature;

impl FeatureScorer for SemanticFeature {
    fn name(&self) -> &'static str {
        "semantic"
    }

    fn score(&self, candidate: &CandidateChunk, ctx: &ScoringContext) -> f64 {
        match &candidate.embedding {
            Some(embedding) => cosine_clamped(embedding, &ctx.query_vector),
            // Retrieval already measured this cosine; reuse it when the
            // vector was not materialized.
            None => (candidate.retrieval_score as f64).clamp(0.0, 1.0),
        }
    }
}

/// Overlap coefficient between query symbols and the chunk's symbols plus
/// the words of its signature.
pub struct SymbolMatchFeature;

impl FeatureScorer for SymbolMatchFeature {
    fn name(&self) -> &'static str {
        "symbol_match"
    }

    fn score(&self, candidate: &CandidateChunk, ctx: &ScoringContext) -> f64 {
        if ctx.symbols_in_query.is_empty() {
            return 0.0;
        }
        let query: HashSet<String> =
            ctx.symbols_in_query.iter().map(|s| s.to_lowercase()).collect();

        let mut chunk_terms: HashSet<String> = candidate
            .chunk
            .symbols
            .iter()
            .map(|s| s.to_lowercase())
            .collect();
        if let Some(signature) = &candidate.chunk.signature {
            for word in signature.split(|c: char| !c.is_alphanumeric() && c != '_') {
                if word.len() >= 2 {
                    chunk_terms.insert(word.to_lowercase());
                }
            }
        }
        if chunk_terms.is_empty() {
            return 0.0;
        }

        let intersection = query.intersection(&chunk_terms).count();
        let denom = query.len().min(chunk_terms.len());
        intersection as f64 / denom as f64
    }
}

/// Path affinity with the file the caller is editing: 1 for the same file,
/// decaying with the shared directory prefix, 0 for unrelated trees.
pub struct FileProximityFeature;

impl FeatureScorer for FileProximityFeature {
    fn name(&self) -> &'static str {
        "file_proximity"
    }

    fn score(&self, candidate: &CandidateChunk, ctx: &ScoringContext) -> f64 {
        let Some(current) = &ctx.current_file else {
            return 0.0;
        };
        if &candidate.chunk.file_path == current {
            return 1.0;
        }
        let current_parts: Vec<&str> = current.split('/').collect();
        let chunk_parts: Vec<&str> = candidate.chunk.file_path.split('/').collect();
        let shared = current_parts
            .iter()
            .zip(chunk_parts.iter())
            .take_while(|(a, b)| a == b)
            .count();
        if shared == 0 {
            return 0.0;
        }
        shared as f64 / current_parts.len() as f64
    }
}

/// Exponential decay on chunk age with a configurable half-life.
pub struct RecencyFeature {
    pub half_life_days: f64,
}

impl FeatureScorer for RecencyFeature {
    fn name(&self) -> &'static str {
        "recency"
    }

    fn score(&self, candidate: &CandidateChunk, ctx: &ScoringContext) -> f64 {
        let age_ms = (ctx.now_ms - candidate.chunk.metadata.last_modified_ms).max(0);
        let age_days = age_ms as f64 / 86_400_000.0;
        if self.half_life_days <= 0.0 {
            return 0.0;
        }
        0.5f64.powf(age_days / self.half_life_days).clamp(0.0, 1.0)
    }
}

/// Across-session selection frequency, min-maxed over the candidate set.
pub struct UsageFrequencyFeature {
    pub tracker: Arc<UsageTracker>,
}

impl FeatureScorer for UsageFrequencyFeature {
    fn name(&self) -> &'static str {
        "usage_frequency"
    }

    fn score(&self, candidate: &CandidateChunk, ctx: &ScoringContext) -> f64 {
        let raw = self.tracker.ema(&candidate.chunk.id);
        match ctx.usage_bounds {
            Some((min, max)) if max > min => ((raw - min) / (max - min)).clamp(0.0, 1.0),
            _ => {
                if raw > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}
