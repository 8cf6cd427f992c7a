//! Chunk model and identity.
//!
//! A chunk is the unit of indexing, retrieval, scoring, compression and
//! citation. Chunks are immutable after creation; an update is a
//! delete-then-insert keyed by id. Identity depends only on
//! `(file_path, start_line, end_line, language)` so it is stable across
//! indexing runs as long as those four do not change.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::tokens;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Function,
    Method,
    Class,
    Interface,
    Type,
    Variable,
    Other,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Function => "function",
            ChunkKind::Method => "method",
            ChunkKind::Class => "class",
            ChunkKind::Interface => "interface",
            ChunkKind::Type => "type",
            ChunkKind::Variable => "variable",
            ChunkKind::Other => "other",
        }
    }

    pub fn parse(s: &str) -> ChunkKind {
        match s {
            "function" => ChunkKind::Function,
            "method" => ChunkKind::Method,
            "class" => ChunkKind::Class,
            "interface" => ChunkKind::Interface,
            "type" => ChunkKind::Type,
            "variable" => ChunkKind::Variable,
            _ => ChunkKind::Other,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Source file mtime, milliseconds since the Unix epoch.
    pub last_modified_ms: i64,
    /// Names the chunk exports, best effort.
    pub exports: Vec<String>,
}

/// A contiguous semantic region of one source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    /// Repo-relative path with forward slashes.
    pub file_path: String,
    pub language: String,
    /// 1-based, inclusive.
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    /// Extracted declaration line(s), when the chunker found one.
    pub signature: Option<String>,
    pub kind: ChunkKind,
    /// Names defined in this chunk, best effort.
    pub symbols: Vec<String>,
    /// Imported/required names this chunk references.
    pub dependencies: Vec<String>,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Estimated token cost of the chunk content.
    pub fn estimated_tokens(&self) -> usize {
        tokens::estimate_tokens(&self.content, &self.language)
    }
}

/// Stable chunk identity: lowercase hex SHA-256 over the four identity
/// fields. Same inputs produce the same id on every run and platform.
pub fn chunk_id(file_path: &str, start_line: usize, end_line: usize, language: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_path.as_bytes());
    hasher.update(b":");
    hasher.update(start_line.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(end_line.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(language.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A chunk paired with its embedding, as handed to the scorer. Retrieval
/// produces these; the semantic feature needs the vector and the rest of
/// the features only need the chunk record.
#[derive(Debug, Clone)]
pub struct CandidateChunk {
    pub chunk: Chunk,
    pub embedding: Option<Vec<f32>>,
    /// Raw similarity from the retrieval pass, kept for diagnostics.
    pub retrieval_score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(path: &str, start: usize, end: usize) -> Chunk {
        Chunk {
            id: chunk_id(path, start, end, "rust"),
            file_path: path.to_string(),
            language: "rust".to_string(),
            start_line: start,
            end_line: end,
            content: "fn main() {}".to_string(),
            signature: Some("fn main()".to_string()),
            kind: ChunkKind::Function,
            symbols: vec!["main".to_string()],
            dependencies: vec![],
            metadata: ChunkMetadata::default(),
        }
    }

    #[test]
    fn id_is_deterministic() {
        let a = chunk_id("src/lib.rs", 1, 20, "rust");
        let b = chunk_id("src/lib.rs", 1, 20, "rust");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn id_depends_on_every_identity_field() {
        let base = chunk_id("src/lib.rs", 1, 20, "rust");
        assert_ne!(base, chunk_id("src/main.rs", 1, 20, "rust"));
        assert_ne!(base, chunk_id("src/lib.rs", 2, 20, "rust"));
        assert_ne!(base, chunk_id("src/lib.rs", 1, 21, "rust"));
        assert_ne!(base, chunk_id("src/lib.rs", 1, 20, "python"));
    }

    #[test]
    fn id_fields_do_not_collide_across_boundaries() {
        // "ab" + 1 vs "a" + "b1"-ish ambiguity is prevented by separators
        assert_ne!(chunk_id("a", 11, 2, "rust"), chunk_id("a1", 1, 2, "rust"));
    }

    #[test]
    fn content_does_not_affect_identity() {
        let mut a = sample("src/lib.rs", 1, 5);
        let b = sample("src/lib.rs", 1, 5);
        a.content = "something else".to_string();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn kind_round_trips() {
        for kind in [
            ChunkKind::Function,
            ChunkKind::Method,
            ChunkKind::Class,
            ChunkKind::Interface,
            ChunkKind::Type,
            ChunkKind::Variable,
            ChunkKind::Other,
        ] {
            assert_eq!(ChunkKind::parse(kind.as_str()), kind);
        }
    }
}
