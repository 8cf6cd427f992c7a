//! Embedding client contract.
//!
//! One operation: turn a batch of texts into fixed-dimension vectors, in
//! input order. Concrete model providers (local neural net, remote HTTP
//! service) live behind this trait outside the engine; the crate ships a
//! deterministic feature-hashing implementation as the default local
//! strategy and as the test-suite embedder, plus a retrying decorator for
//! remote providers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Identifier reported in stats and logs.
    fn model_id(&self) -> &str;

    /// Output vector dimension; constant for the client's lifetime.
    fn dimension(&self) -> usize;

    /// Embed a batch. The result has exactly one vector per input text, in
    /// the same order; the call is all-or-nothing.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

// =============================================================================
// HashEmbedder
// =============================================================================

/// Deterministic feature-hashing embedder: word tokens and adjacent-word
/// bigrams are hashed into `dimension` buckets and the result is
/// L2-normalized. No model download, identical output on every platform,
/// and texts sharing vocabulary land near each other under cosine, which
/// is what retrieval needs from a local fallback.
pub struct HashEmbedder {
    dimension: usize,
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x1_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        let tokens: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect();

        for token in &tokens {
            let h = fnv1a(token.as_bytes());
            let bucket = (h % self.dimension as u64) as usize;
            // Sign bit from a second hash keeps buckets from only growing.
            let sign = if (h >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        for pair in tokens.windows(2) {
            let joined = format!("{} {}", pair[0], pair[1]);
            let h = fnv1a(joined.as_bytes());
            let bucket = (h % self.dimension as u64) as usize;
            let sign = if (h >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += 0.5 * sign;
        }

        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingClient for HashEmbedder {
    fn model_id(&self) -> &str {
        "hash-v1"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

// =============================================================================
// RetryingEmbedder
// =============================================================================

/// Decorator adding a per-call timeout and exponential backoff retries for
/// transient failures. A permanent failure surfaces after the attempt
/// budget is spent.
pub struct RetryingEmbedder {
    inner: Arc<dyn EmbeddingClient>,
    timeout: Duration,
    max_retries: u32,
    base_backoff: Duration,
}

impl RetryingEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingClient>, config: &EmbeddingConfig) -> Self {
        Self {
            inner,
            timeout: Duration::from_millis(config.timeout_ms),
            max_retries: config.max_retries,
            base_backoff: Duration::from_millis(100),
        }
    }
}

#[async_trait]
impl EmbeddingClient for RetryingEmbedder {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let attempts = self.max_retries.max(1);
        let mut last_error: Option<Error> = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let backoff = self.base_backoff * 2u32.pow(attempt - 1);
                tokio::time::sleep(backoff).await;
            }
            match tokio::time::timeout(self.timeout, self.inner.embed_batch(texts)).await {
                Ok(Ok(vectors)) => return Ok(vectors),
                Ok(Err(e)) => {
                    warn!(attempt, error = %e, "Embedding attempt failed, retrying");
                    last_error = Some(e);
                }
                Err(_) => {
                    warn!(attempt, timeout_ms = self.timeout.as_millis() as u64,
                          "Embedding attempt timed out, retrying");
                    last_error = Some(Error::EmbeddingTimeout { attempts: attempt + 1 });
                }
            }
        }

        Err(last_error.unwrap_or(Error::EmbeddingTimeout { attempts }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn hash_embedder_is_deterministic() {
        let e = HashEmbedder::new(64);
        let a = e.embed_batch(&["fn parse_config()".to_string()]).await.unwrap();
        let b = e.embed_batch(&["fn parse_config()".to_string()]).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 64);
    }

    #[tokio::test]
    async fn output_order_matches_input() {
        let e = HashEmbedder::new(32);
        let texts = vec!["alpha".to_string(), "beta".to_string(), "alpha".to_string()];
        let out = e.embed_batch(&texts).await.unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], out[2]);
        assert_ne!(out[0], out[1]);
    }

    #[tokio::test]
    async fn shared_vocabulary_scores_higher() {
        let e = HashEmbedder::new(128);
        let out = e
            .embed_batch(&[
                "alpha beta".to_string(),
                "alpha gamma".to_string(),
                "delta epsilon".to_string(),
            ])
            .await
            .unwrap();
        let near = cosine(&out[0], &out[1]);
        let far = cosine(&out[0], &out[2]);
        assert!(near > far, "near={near} far={far}");
    }

    #[tokio::test]
    async fn vectors_are_normalized() {
        let e = HashEmbedder::new(64);
        let out = e.embed_batch(&["some content here".to_string()]).await.unwrap();
        let norm: f32 = out[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    struct FlakyEmbedder {
        failures_left: AtomicU32,
        dimension: usize,
    }

    #[async_trait]
    impl EmbeddingClient for FlakyEmbedder {
        fn model_id(&self) -> &str {
            "flaky"
        }
        fn dimension(&self) -> usize {
            self.dimension
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if self.failures_left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                v.checked_sub(1)
            }).is_ok()
            {
                return Err(Error::Embedding("transient".into()));
            }
            Ok(texts.iter().map(|_| vec![1.0; self.dimension]).collect())
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let flaky = Arc::new(FlakyEmbedder { failures_left: AtomicU32::new(2), dimension: 4 });
        let config = EmbeddingConfig { max_retries: 3, timeout_ms: 1000, ..Default::default() };
        let retrying = RetryingEmbedder::new(flaky, &config);
        let out = retrying.embed_batch(&["x".to_string()]).await.unwrap();
        assert_eq!(out.len(), 1);
    }

    #[tokio::test]
    async fn permanent_failure_surfaces_after_budget() {
        let flaky = Arc::new(FlakyEmbedder { failures_left: AtomicU32::new(100), dimension: 4 });
        let config = EmbeddingConfig { max_retries: 2, timeout_ms: 1000, ..Default::default() };
        let retrying = RetryingEmbedder::new(flaky, &config);
        let err = retrying.embed_batch(&["x".to_string()]).await.unwrap_err();
        assert_eq!(err.kind(), "embedding.failed");
    }
}
