//! Adaptive chunk compression.
//!
//! Reduces a chunk toward a per-chunk token target through four progressive
//! levels, measured after each attempt. The heuristics are regex-grade, not
//! parser-grade; aggressive levels are allowed to produce syntactically
//! invalid text, the goal is preserving meaning per token, not validity.

use std::sync::LazyLock;

use rayon::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::chunk::Chunk;
use crate::chunker::extract_signature;
use crate::config::CompressionConfig;
use crate::lang::comment_syntax;
use crate::tokens::{estimate_tokens, truncate_to_tokens};

/// Truncation fallback aims at this share of the target so the estimate's
/// slack cannot push the result back over budget.
const TRUNCATE_FRACTION: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionLevel {
    Light,
    Medium,
    Aggressive,
    SignatureOnly,
}

impl CompressionLevel {
    pub const ALL: [CompressionLevel; 4] = [
        CompressionLevel::Light,
        CompressionLevel::Medium,
        CompressionLevel::Aggressive,
        CompressionLevel::SignatureOnly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionLevel::Light => "light",
            CompressionLevel::Medium => "medium",
            CompressionLevel::Aggressive => "aggressive",
            CompressionLevel::SignatureOnly => "signature_only",
        }
    }

    /// Rough expected compression ratio, used to honor `max_ratio`.
    fn expected_ratio(&self) -> f64 {
        match self {
            CompressionLevel::Light => 1.2,
            CompressionLevel::Medium => 2.5,
            CompressionLevel::Aggressive => 10.0,
            CompressionLevel::SignatureOnly => 25.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompressedChunk {
    pub chunk: Chunk,
    pub level: CompressionLevel,
    pub content: String,
    pub original_tokens: usize,
    pub compressed_tokens: usize,
    pub ratio: f64,
    pub success: bool,
}

static RE_IMPORT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*(?:use\s|import\s|from\s+\S+\s+import|#include\s)|require\s*\("#).unwrap()
});

static RE_TYPE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:export\s+)?(?:pub(?:\([\w:\s]+\))?\s+)?(?:type|interface|struct|enum)\b")
        .unwrap()
});

static RE_HEADER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:pub(?:\([\w:\s]+\))?\s+|public\s+|private\s+|protected\s+|static\s+|export\s+|abstract\s+|final\s+)*(?:async\s+)?(?:fn|def|function|func|class|interface|trait|impl|module)\b",
    )
    .unwrap()
});

static RE_CONTROL_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:if|else|for|while|match|switch|loop|try|catch|return)\b").unwrap()
});

pub struct Compressor {
    config: CompressionConfig,
}

impl Compressor {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    /// Compress one chunk toward `target_tokens`. Levels are attempted in
    /// order; the first one that fits wins. When even signature_only is too
    /// large, its output is truncated at line boundaries and the result is
    /// still reported as a success.
    pub fn compress(&self, chunk: &Chunk, target_tokens: usize) -> CompressedChunk {
        let original_tokens = estimate_tokens(&chunk.content, &chunk.language);
        if original_tokens <= target_tokens {
            return CompressedChunk {
                chunk: chunk.clone(),
                level: CompressionLevel::Light,
                content: chunk.content.clone(),
                original_tokens,
                compressed_tokens: original_tokens,
                ratio: 1.0,
                success: true,
            };
        }

        for level in CompressionLevel::ALL {
            if level.expected_ratio() > self.config.max_ratio {
                continue;
            }
            let content = self.apply(chunk, level);
            let tokens = estimate_tokens(&content, &chunk.language);
            if tokens <= target_tokens {
                return CompressedChunk {
                    chunk: chunk.clone(),
                    level,
                    content,
                    original_tokens,
                    compressed_tokens: tokens,
                    ratio: original_tokens as f64 / tokens.max(1) as f64,
                    success: true,
                };
            }
        }

        // No level fit: truncate the signature_only rendition at line
        // boundaries, even when the ratio cap skipped it as a level.
        let content = self.apply(chunk, CompressionLevel::SignatureOnly);
        let budget = ((target_tokens as f64) * TRUNCATE_FRACTION).floor() as usize;
        let truncated = truncate_to_tokens(&content, &chunk.language, budget.max(1));
        let tokens = estimate_tokens(&truncated, &chunk.language);
        CompressedChunk {
            chunk: chunk.clone(),
            level: CompressionLevel::SignatureOnly,
            content: truncated,
            original_tokens,
            compressed_tokens: tokens,
            ratio: original_tokens as f64 / tokens.max(1) as f64,
            success: true,
        }
    }

    /// Compress a set in parallel; result order matches input order.
    pub fn compress_batch(&self, items: &[(Chunk, usize)]) -> Vec<CompressedChunk> {
        items
            .par_iter()
            .map(|(chunk, target)| self.compress(chunk, *target))
            .collect()
    }

    /// Apply one level's transform without measuring.
    pub fn apply(&self, chunk: &Chunk, level: CompressionLevel) -> String {
        match level {
            CompressionLevel::Light => strip_comments(&chunk.content, &chunk.language),
            CompressionLevel::Medium => {
                collapse_whitespace(&strip_comments(&chunk.content, &chunk.language))
            }
            CompressionLevel::Aggressive => self.skeleton(chunk, true),
            CompressionLevel::SignatureOnly => self.skeleton(chunk, false),
        }
    }

    /// Structural skeleton: signature plus the line classes the level and
    /// configuration keep. `full` additionally keeps type definitions and
    /// control-flow openers.
    fn skeleton(&self, chunk: &Chunk, full: bool) -> String {
        let stripped = strip_comments(&chunk.content, &chunk.language);
        let mut kept: Vec<String> = Vec::new();

        for line in stripped.lines() {
            let keep = (self.config.preserve_imports && RE_IMPORT_LINE.is_match(line))
                || RE_HEADER_LINE.is_match(line)
                || (full && self.config.preserve_types && RE_TYPE_LINE.is_match(line))
                || (full && RE_CONTROL_LINE.is_match(line));
            if keep {
                kept.push(line.trim_end().to_string());
            }
        }

        let signature = chunk.signature.clone().or_else(|| {
            let lines: Vec<&str> = stripped.lines().collect();
            extract_signature(&lines)
        });
        if let Some(signature) = &signature {
            let first = signature.lines().next().unwrap_or_default().trim_end();
            if !kept.iter().any(|l| l.trim() == first.trim()) {
                kept.insert(0, signature.clone());
            }
        }
        kept.join("\n")
    }
}

/// Remove block comments, full-line comments, trailing line comments and
/// blank lines. Every non-comment, non-blank character survives.
pub fn strip_comments(content: &str, language: &str) -> String {
    let syntax = comment_syntax(language);

    let mut text = content.to_string();
    for (open, close) in syntax.block_pairs {
        let mut out = String::with_capacity(text.len());
        let mut rest = text.as_str();
        loop {
            match rest.find(open) {
                Some(start) => {
                    out.push_str(&rest[..start]);
                    let after = &rest[start + open.len()..];
                    match after.find(close) {
                        Some(end) => rest = &after[end + close.len()..],
                        None => {
                            rest = "";
                        }
                    }
                }
                None => {
                    out.push_str(rest);
                    break;
                }
            }
        }
        text = out;
    }

    let mut lines: Vec<String> = Vec::new();
    for line in text.lines() {
        let mut kept = line.to_string();
        for marker in syntax.line_markers {
            if let Some(pos) = kept.find(marker) {
                kept.truncate(pos);
            }
        }
        let kept = kept.trim_end();
        if !kept.trim().is_empty() {
            lines.push(kept.to_string());
        }
    }
    lines.join("\n")
}

/// Collapse runs of spaces/tabs to a single space and squeeze repeated
/// newlines. Idempotent.
pub fn collapse_whitespace(content: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    for line in content.lines() {
        let collapsed: String = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if !collapsed.is_empty() {
            lines.push(collapsed);
        }
    }
    lines.join("\n")
}
