//! codectx — local semantic code search and context optimization.
//!
//! Given a source tree, the engine parses files into semantic chunks,
//! computes embeddings, persists them in an on-disk store with an HNSW
//! approximate-nearest-neighbor index, answers natural-language queries
//! with ranked chunks, and assembles bounded-token prompt contexts by
//! scoring, selecting and adaptively compressing retrieved chunks.
//!
//! The [`Engine`] facade is the whole public surface:
//!
//! ```no_run
//! use codectx::{CancelToken, Engine, EngineConfig, IndexOptions, QueryContext};
//!
//! # async fn run() -> codectx::Result<()> {
//! let engine = Engine::new(EngineConfig::default())?;
//! engine.index(std::path::Path::new("./my-project"), IndexOptions::default()).await?;
//!
//! let hits = engine.search("where are retries handled", 10, None, &CancelToken::new()).await?;
//! let prompt = engine
//!     .optimize("fix the retry backoff bug", None, QueryContext::default(), &CancelToken::new())
//!     .await?;
//! println!("{} tokens for {}", prompt.tokens_used, prompt.model);
//! # let _ = hits;
//! # Ok(())
//! # }
//! ```

pub mod backup;
pub mod cancel;
pub mod checksum_store;
pub mod chunk;
pub mod chunker;
pub mod compress;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod hnsw;
pub mod indexer;
pub mod lang;
pub mod optimizer;
pub mod router;
pub mod scoring;
pub mod storage;
pub mod tokens;
pub mod vector_store;
pub mod walker;

pub use cancel::CancelToken;
pub use chunk::{Chunk, ChunkKind};
pub use compress::{CompressedChunk, CompressionLevel};
pub use config::EngineConfig;
pub use engine::{Engine, EngineStats};
pub use error::{Error, Result};
pub use hnsw::{HnswIndex, HnswParams};
pub use indexer::{IndexOptions, IndexReport, ProgressCallback};
pub use optimizer::{IntentKind, OptimizedPrompt, QueryContext, QueryIntent};

/// Install a tracing subscriber honoring `RUST_LOG`, falling back to the
/// configured level. Hosts with their own subscriber skip this.
pub fn init_tracing(level: &str) {
    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("codectx={level}").into());
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true).compact();
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}
