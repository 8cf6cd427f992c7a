//! Token optimization pipeline.
//!
//! Turns a user prompt into a bounded-token `OptimizedPrompt`:
//! intent detection, ANN retrieval with a wide candidate pool, multi-feature
//! scoring, greedy budget-constrained selection by score density, adaptive
//! per-chunk compression, three-region prompt assembly and model routing.
//! Phase failures surface as typed errors; no partial prompt is emitted.

use std::collections::HashSet;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::chunk::CandidateChunk;
use crate::compress::{CompressedChunk, Compressor};
use crate::config::OptimizerConfig;
use crate::embedding::EmbeddingClient;
use crate::error::{Error, Result};
use crate::router::ModelRouter;
use crate::scoring::{hash_query, RelevanceScorer, ScoredChunk, ScoringContext};
use crate::tokens::estimate_tokens;
use crate::vector_store::VectorStore;

/// Retrieval pool multiplier: the scorer sees this many times the final
/// chunk cap, floored at a workable minimum.
const RETRIEVAL_MULTIPLIER: usize = 10;
const RETRIEVAL_FLOOR: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    BugFix,
    NewFeature,
    Explanation,
    Refactor,
    Other,
}

impl IntentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::BugFix => "bug_fix",
            IntentKind::NewFeature => "new_feature",
            IntentKind::Explanation => "explanation",
            IntentKind::Refactor => "refactor",
            IntentKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryIntent {
    pub kind: IntentKind,
    pub symbols: Vec<String>,
    /// Routing signal in [0, 1].
    pub complexity: f64,
}

/// Pipeline phases, in order. Failures transition to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    Idle,
    IntentReady,
    Retrieved,
    Scored,
    Selected,
    Compressed,
    Assembled,
    Routed,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRegion {
    pub title: String,
    pub content: String,
    pub tokens: usize,
}

#[derive(Debug, Clone)]
pub struct OptimizedPrompt {
    pub text: String,
    pub tokens_used: usize,
    pub regions: Vec<PromptRegion>,
    pub selected: Vec<CompressedChunk>,
    pub model: String,
    /// Original token sum of the selected chunks minus their compressed sum.
    pub savings: usize,
    pub intent: QueryIntent,
}

/// Caller-supplied environment for one optimize call.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    pub current_file: Option<String>,
    pub recent_files: Vec<String>,
}

// =============================================================================
// Intent detection
// =============================================================================

const BUG_FIX_WORDS: &[&str] =
    &["fix", "bug", "error", "crash", "fail", "fails", "failing", "broken", "panic", "exception", "wrong"];
const NEW_FEATURE_WORDS: &[&str] =
    &["add", "implement", "create", "support", "feature", "introduce", "build"];
const EXPLANATION_WORDS: &[&str] =
    &["explain", "what", "how", "why", "understand", "describe", "documentation"];
const REFACTOR_WORDS: &[&str] =
    &["refactor", "clean", "rename", "restructure", "simplify", "reorganize", "extract"];

static RE_BACKTICK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`([^`]+)`").unwrap());
static RE_IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    // snake_case, camelCase, PascalCase, namespaced paths, dotted members
    Regex::new(r"\b(?:[a-z][a-z0-9]*(?:_[a-z0-9]+)+|[a-z]+[A-Z]\w*|[A-Z][a-z]+[A-Z]\w*|\w+(?:::\w+)+|[a-zA-Z_]\w*\.[a-zA-Z_]\w+)\b").unwrap()
});

/// Classify the prompt and pull out referenced symbols.
pub fn detect_intent(prompt: &str) -> QueryIntent {
    let lowered = prompt.to_lowercase();
    let words: HashSet<&str> = lowered
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .collect();

    let count = |lexicon: &[&str]| lexicon.iter().filter(|w| words.contains(*w)).count();
    let scores = [
        (IntentKind::BugFix, count(BUG_FIX_WORDS)),
        (IntentKind::Refactor, count(REFACTOR_WORDS)),
        (IntentKind::NewFeature, count(NEW_FEATURE_WORDS)),
        (IntentKind::Explanation, count(EXPLANATION_WORDS)),
    ];
    // Ties resolve toward the earlier, more actionable intents.
    let kind = scores
        .iter()
        .filter(|(_, n)| *n > 0)
        .max_by_key(|(_, n)| *n)
        .map(|(k, _)| *k)
        .unwrap_or(IntentKind::Other);

    let mut symbols = Vec::new();
    let mut seen = HashSet::new();
    for cap in RE_BACKTICK.captures_iter(prompt) {
        let span = cap[1].trim().to_string();
        if !span.is_empty() && seen.insert(span.clone()) {
            symbols.push(span);
        }
    }
    for m in RE_IDENTIFIER.find_iter(prompt) {
        let symbol = m.as_str().to_string();
        if seen.insert(symbol.clone()) {
            symbols.push(symbol);
        }
    }

    let base = match kind {
        IntentKind::BugFix | IntentKind::Refactor => 0.6,
        IntentKind::NewFeature => 0.7,
        IntentKind::Explanation => 0.4,
        IntentKind::Other => 0.4,
    };
    let complexity = (base + 0.05 * symbols.len() as f64).clamp(0.0, 1.0);

    QueryIntent { kind, symbols, complexity }
}

// =============================================================================
// Budget allocation
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetAllocation {
    pub total: usize,
    pub system: usize,
    pub user_query: usize,
    pub context: usize,
    pub response_reserve: usize,
}

impl BudgetAllocation {
    pub fn from_config(config: &OptimizerConfig, total: usize) -> Self {
        Self {
            total,
            system: (total as f64 * config.system_fraction) as usize,
            user_query: (total as f64 * config.user_query_fraction) as usize,
            context: (total as f64 * config.context_fraction) as usize,
            response_reserve: (total as f64 * config.response_reserve_fraction) as usize,
        }
    }
}

// =============================================================================
// Budget-constrained selection
// =============================================================================

#[derive(Debug, Clone)]
pub struct SelectionCandidate {
    pub id: String,
    pub score: f64,
    pub tokens: usize,
}

/// Greedy admission by score density under a token budget, a chunk cap and
/// a relevance floor. Returns the indices of admitted candidates in
/// admission order. Ties on density break on score, then id.
pub fn select_by_density(
    candidates: &[SelectionCandidate],
    token_budget: usize,
    max_chunks: usize,
    min_relevance: f64,
) -> Vec<usize> {
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| {
        let ca = &candidates[a];
        let cb = &candidates[b];
        let da = ca.score / ca.tokens.max(1) as f64;
        let db = cb.score / cb.tokens.max(1) as f64;
        db.partial_cmp(&da)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                cb.score.partial_cmp(&ca.score).unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| ca.id.cmp(&cb.id))
    });

    let mut selected = Vec::new();
    let mut used = 0usize;
    for index in order {
        if selected.len() >= max_chunks {
            break;
        }
        let candidate = &candidates[index];
        if candidate.score < min_relevance {
            continue;
        }
        if used + candidate.tokens > token_budget {
            continue;
        }
        used += candidate.tokens;
        selected.push(index);
    }
    selected
}

// =============================================================================
// TokenOptimizer
// =============================================================================

pub struct TokenOptimizer {
    config: OptimizerConfig,
    store: Arc<VectorStore>,
    embedder: Arc<dyn EmbeddingClient>,
    scorer: Arc<RelevanceScorer>,
    compressor: Arc<Compressor>,
    router: Arc<ModelRouter>,
}

impl TokenOptimizer {
    pub fn new(
        config: OptimizerConfig,
        store: Arc<VectorStore>,
        embedder: Arc<dyn EmbeddingClient>,
        scorer: Arc<RelevanceScorer>,
        compressor: Arc<Compressor>,
        router: Arc<ModelRouter>,
    ) -> Self {
        Self { config, store, embedder, scorer, compressor, router }
    }

    /// Run the full pipeline for one prompt. `budget` overrides the
    /// configured total token budget; `epoch` keys the score cache to the
    /// current index generation.
    pub async fn optimize(
        &self,
        prompt: &str,
        budget: Option<usize>,
        query_ctx: &QueryContext,
        epoch: u64,
        cancel: &CancelToken,
    ) -> Result<OptimizedPrompt> {
        let mut phase = PipelinePhase::Idle;
        let result = self
            .run(prompt, budget, query_ctx, epoch, cancel, &mut phase)
            .await;
        if result.is_err() {
            phase = PipelinePhase::Failed;
        }
        debug!(phase = ?phase, "Pipeline finished");
        result
    }

    async fn run(
        &self,
        prompt: &str,
        budget: Option<usize>,
        query_ctx: &QueryContext,
        epoch: u64,
        cancel: &CancelToken,
        phase: &mut PipelinePhase,
    ) -> Result<OptimizedPrompt> {
        let total_budget = budget.unwrap_or(self.config.token_budget);
        let allocation = BudgetAllocation::from_config(&self.config, total_budget);

        // Phase 1: intent.
        cancel.check()?;
        let intent = detect_intent(prompt);
        *phase = PipelinePhase::IntentReady;

        // Phase 2: retrieval.
        cancel.check()?;
        let query_vectors = self.embedder.embed_batch(&[prompt.to_string()]).await?;
        let query_vector = query_vectors
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("empty embedding result for query".into()))?;
        let k_initial =
            (self.config.max_chunks * RETRIEVAL_MULTIPLIER).max(RETRIEVAL_FLOOR);
        let retrieved = self.store.search(&query_vector, k_initial, None)?;
        *phase = PipelinePhase::Retrieved;
        debug!(retrieved = retrieved.len(), k_initial, "Retrieval complete");

        // Phase 3: scoring.
        cancel.check()?;
        let ctx = ScoringContext {
            query_text: prompt.to_string(),
            query_hash: hash_query(prompt),
            query_vector,
            current_file: query_ctx.current_file.clone(),
            recent_files: query_ctx.recent_files.clone(),
            symbols_in_query: intent.symbols.clone(),
            now_ms: chrono::Utc::now().timestamp_millis(),
            epoch,
            usage_bounds: None,
        };
        let candidates: Vec<CandidateChunk> = retrieved
            .into_iter()
            .map(|(chunk, score)| CandidateChunk {
                chunk,
                embedding: None,
                retrieval_score: score,
            })
            .collect();
        let scored = self.scorer.score_batch(candidates, &ctx);
        *phase = PipelinePhase::Scored;

        // Phase 4: budget-constrained selection.
        cancel.check()?;
        let selection_input: Vec<SelectionCandidate> = scored
            .iter()
            .map(|s| SelectionCandidate {
                id: s.candidate.chunk.id.clone(),
                score: s.total_score,
                tokens: s.candidate.chunk.estimated_tokens(),
            })
            .collect();
        let admitted = select_by_density(
            &selection_input,
            allocation.context,
            self.config.max_chunks,
            self.config.min_relevance,
        );
        let selected: Vec<&ScoredChunk> = admitted.iter().map(|&i| &scored[i]).collect();
        *phase = PipelinePhase::Selected;
        debug!(selected = selected.len(), context_budget = allocation.context, "Selection complete");

        // Phase 5: adaptive compression. The context budget is re-divided
        // across admitted chunks weighted by density, so more relevant
        // chunks keep more of their tokens.
        cancel.check()?;
        let densities: Vec<f64> = selected
            .iter()
            .map(|s| s.total_score / s.candidate.chunk.estimated_tokens().max(1) as f64)
            .collect();
        let density_sum: f64 = densities.iter().sum();
        let mut compression_input = Vec::with_capacity(selected.len());
        for (scored_chunk, density) in selected.iter().zip(&densities) {
            let share = if density_sum > 0.0 {
                density / density_sum
            } else {
                1.0 / selected.len().max(1) as f64
            };
            let target = (allocation.context as f64 * share).floor() as usize;
            compression_input.push((scored_chunk.candidate.chunk.clone(), target.max(1)));
        }
        let mut compressed = Vec::with_capacity(compression_input.len());
        for item in self.compressor.compress_batch(&compression_input) {
            cancel.check()?;
            if item.success {
                compressed.push(item);
            }
        }
        *phase = PipelinePhase::Compressed;

        // Selections feed the across-session usage signal.
        let now_ms = chrono::Utc::now().timestamp_millis();
        for item in &compressed {
            self.scorer.usage().record_selection(&item.chunk.id, now_ms);
        }
        if let Err(e) = self.scorer.usage().save() {
            debug!(error = %e, "Usage sidecar save deferred");
        }

        // Phase 6: assembly and routing.
        cancel.check()?;
        let assembled = self.assemble(prompt, &compressed, &intent);
        *phase = PipelinePhase::Assembled;

        let model = self.router.select(assembled.tokens_used, intent.complexity);
        *phase = PipelinePhase::Routed;

        let original_sum: usize =
            compressed.iter().map(|c| c.original_tokens).sum();
        let compressed_sum: usize =
            compressed.iter().map(|c| c.compressed_tokens).sum();

        *phase = PipelinePhase::Done;
        info!(
            model = %model,
            tokens = assembled.tokens_used,
            chunks = compressed.len(),
            savings = original_sum.saturating_sub(compressed_sum),
            intent = intent.kind.as_str(),
            "Prompt optimized"
        );

        Ok(OptimizedPrompt {
            text: assembled.text,
            tokens_used: assembled.tokens_used,
            regions: assembled.regions,
            selected: compressed,
            model,
            savings: original_sum.saturating_sub(compressed_sum),
            intent,
        })
    }

    fn assemble(
        &self,
        prompt: &str,
        compressed: &[CompressedChunk],
        intent: &QueryIntent,
    ) -> AssembledPrompt {
        let system = format!(
            "You are a coding assistant. Answer the {} request using the provided code context.",
            intent.kind.as_str().replace('_', " ")
        );
        let mut context = String::new();
        for item in compressed {
            context.push_str(&format!(
                "// {}:{}-{} [{}]\n{}\n\n",
                item.chunk.file_path,
                item.chunk.start_line,
                item.chunk.end_line,
                item.level.as_str(),
                item.content
            ));
        }
        let context = context.trim_end().to_string();

        let regions = vec![
            PromptRegion {
                tokens: estimate_tokens(&system, "plaintext"),
                title: "System".to_string(),
                content: system,
            },
            PromptRegion {
                tokens: estimate_tokens(prompt, "plaintext"),
                title: "Query".to_string(),
                content: prompt.to_string(),
            },
            PromptRegion {
                tokens: estimate_tokens(&context, "plaintext"),
                title: "Context".to_string(),
                content: context,
            },
        ];

        let mut text = String::new();
        for region in &regions {
            if region.title == "Context" && region.content.is_empty() {
                continue;
            }
            text.push_str(&format!(
                "## {} (~{} tokens)\n{}\n\n",
                region.title, region.tokens, region.content
            ));
        }
        let text = text.trim_end().to_string();
        let tokens_used = regions.iter().map(|r| r.tokens).sum();

        AssembledPrompt { text, tokens_used, regions }
    }
}

struct AssembledPrompt {
    text: String,
    tokens_used: usize,
    regions: Vec<PromptRegion>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_classification_by_lexicon() {
        assert_eq!(detect_intent("fix the crash in the parser").kind, IntentKind::BugFix);
        assert_eq!(detect_intent("implement support for yaml").kind, IntentKind::NewFeature);
        assert_eq!(detect_intent("explain how retries work").kind, IntentKind::Explanation);
        assert_eq!(detect_intent("refactor the config loading").kind, IntentKind::Refactor);
        assert_eq!(detect_intent("hello there").kind, IntentKind::Other);
    }

    #[test]
    fn intent_extracts_symbols() {
        let intent = detect_intent("why does `parse_config` fail when HttpClient.connect runs?");
        assert!(intent.symbols.contains(&"parse_config".to_string()));
        assert!(intent.symbols.iter().any(|s| s.contains("HttpClient")));
    }

    #[test]
    fn complexity_is_bounded() {
        let many_symbols =
            "implement alpha_one alpha_two alpha_three alpha_four alpha_five alpha_six \
             alpha_seven alpha_eight alpha_nine alpha_ten alpha_eleven alpha_twelve";
        let intent = detect_intent(many_symbols);
        assert!(intent.complexity <= 1.0);
        assert!(detect_intent("hi").complexity >= 0.0);
    }

    #[test]
    fn budget_allocation_respects_fractions() {
        let config = OptimizerConfig::default();
        let allocation = BudgetAllocation::from_config(&config, 10_000);
        assert_eq!(allocation.context, 6_000);
        assert_eq!(allocation.system, 500);
        assert_eq!(allocation.user_query, 1_000);
        assert_eq!(allocation.response_reserve, 2_500);
        let sum = allocation.system
            + allocation.user_query
            + allocation.context
            + allocation.response_reserve;
        assert!(sum <= allocation.total);
    }

    fn candidate(id: &str, score: f64, tokens: usize) -> SelectionCandidate {
        SelectionCandidate { id: id.to_string(), score, tokens }
    }

    #[test]
    fn selection_is_greedy_by_density() {
        let candidates = vec![
            candidate("fat", 0.9, 280),    // density ~0.0032
            candidate("dense", 0.5, 50),   // density 0.01
            candidate("medium", 0.6, 100), // density 0.006
        ];
        let selected = select_by_density(&candidates, 300, 5, 0.0);
        // dense admitted first, then medium, then fat no longer fits.
        assert_eq!(selected, vec![1, 2]);
    }

    #[test]
    fn selection_respects_budget_and_cap() {
        let candidates: Vec<SelectionCandidate> =
            (0..10).map(|i| candidate(&format!("c{i}"), 0.5, 60)).collect();
        let selected = select_by_density(&candidates, 300, 5, 0.0);
        assert_eq!(selected.len(), 5);
        let used: usize = selected.iter().map(|&i| candidates[i].tokens).sum();
        assert!(used <= 300);

        let capped = select_by_density(&candidates, 10_000, 3, 0.0);
        assert_eq!(capped.len(), 3);
    }

    #[test]
    fn selection_filters_below_min_relevance() {
        let candidates = vec![candidate("good", 0.8, 10), candidate("weak", 0.05, 10)];
        let selected = select_by_density(&candidates, 1000, 10, 0.1);
        assert_eq!(selected.len(), 1);
        assert_eq!(candidates[selected[0]].id, "good");
    }

    #[test]
    fn selection_no_swap_improves_total() {
        // The spec scenario: greedy-by-density optimality among orderings.
        let candidates = vec![
            candidate("a", 0.9, 100),
            candidate("b", 0.8, 100),
            candidate("c", 0.7, 100),
            candidate("d", 0.3, 100),
        ];
        let selected = select_by_density(&candidates, 300, 5, 0.0);
        let total: f64 = selected.iter().map(|&i| candidates[i].score).sum();
        // Swapping any selected chunk for any unselected one within budget
        // cannot improve the total.
        for &kept in &selected {
            for swap in 0..candidates.len() {
                if selected.contains(&swap) {
                    continue;
                }
                let alt: f64 = total - candidates[kept].score + candidates[swap].score;
                assert!(alt <= total + 1e-9);
            }
        }
    }

    #[test]
    fn density_ties_break_on_score_then_id() {
        let candidates = vec![
            candidate("b", 0.5, 100),
            candidate("a", 0.5, 100),
            candidate("c", 1.0, 200), // same density as the others
        ];
        let selected = select_by_density(&candidates, 10_000, 10, 0.0);
        assert_eq!(candidates[selected[0]].id, "c"); // higher score wins the tie
        assert_eq!(candidates[selected[1]].id, "a"); // then lexicographic id
        assert_eq!(candidates[selected[2]].id, "b");
    }
}
