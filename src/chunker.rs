//! File chunking.
//!
//! Splits a file into a finite, ordered list of chunks covering it. The
//! chunker tries structural boundaries first (function / method / class /
//! type headers per language family, regex-driven, advisory precision) and
//! falls back to a token-budgeted line window with overlap when a language
//! has no patterns or a structural unit is oversize.

use std::sync::LazyLock;

use regex::Regex;

use crate::chunk::{chunk_id, Chunk, ChunkKind, ChunkMetadata};
use crate::config::IndexerConfig;
use crate::tokens::estimate_tokens;

/// A structural unit above twice the window target is re-split internally.
const OVERSIZE_FACTOR: usize = 2;

/// Signature heuristic: stop at the first line containing an opener, or
/// after this many lines.
const MAX_SIGNATURE_LINES: usize = 5;

struct HeaderPattern {
    regex: Regex,
    kind: ChunkKind,
}

fn patterns(defs: &[(&str, ChunkKind)]) -> Vec<HeaderPattern> {
    defs.iter()
        .map(|(src, kind)| HeaderPattern {
            regex: Regex::new(src).unwrap(),
            kind: *kind,
        })
        .collect()
}

static HEADERS_TS_JS: LazyLock<Vec<HeaderPattern>> = LazyLock::new(|| {
    patterns(&[
        (r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s+\w+", ChunkKind::Function),
        (r"^\s*(?:export\s+)?(?:abstract\s+)?class\s+\w+", ChunkKind::Class),
        (r"^\s*(?:export\s+)?interface\s+\w+", ChunkKind::Interface),
        (r"^\s*(?:export\s+)?type\s+\w+\s*=", ChunkKind::Type),
        (r"^\s*(?:export\s+)?enum\s+\w+", ChunkKind::Type),
        (r"^\s*(?:export\s+)?const\s+\w+\s*=\s*(?:async\s+)?(?:\([^)]*\)|\w+)\s*=>", ChunkKind::Function),
    ])
});

static HEADERS_RUST: LazyLock<Vec<HeaderPattern>> = LazyLock::new(|| {
    patterns(&[
        (r"^\s*(?:pub(?:\([\w:\s]+\))?\s+)?(?:async\s+)?(?:unsafe\s+)?fn\s+\w+", ChunkKind::Function),
        (r"^\s*(?:pub(?:\([\w:\s]+\))?\s+)?struct\s+\w+", ChunkKind::Class),
        (r"^\s*(?:pub(?:\([\w:\s]+\))?\s+)?enum\s+\w+", ChunkKind::Type),
        (r"^\s*(?:pub(?:\([\w:\s]+\))?\s+)?trait\s+\w+", ChunkKind::Interface),
        (r"^\s*(?:pub(?:\([\w:\s]+\))?\s+)?type\s+\w+", ChunkKind::Type),
        (r"^impl(?:<[^>]*>)?\s+\S+", ChunkKind::Class),
    ])
});

static HEADERS_PYTHON: LazyLock<Vec<HeaderPattern>> = LazyLock::new(|| {
    patterns(&[
        (r"^(?:async\s+)?def\s+\w+", ChunkKind::Function),
        (r"^\s+(?:async\s+)?def\s+\w+", ChunkKind::Method),
        (r"^class\s+\w+", ChunkKind::Class),
    ])
});

static HEADERS_GO: LazyLock<Vec<HeaderPattern>> = LazyLock::new(|| {
    patterns(&[
        (r"^func\s+\(\s*\w+[^)]*\)\s+\w+", ChunkKind::Method),
        (r"^func\s+\w+", ChunkKind::Function),
        (r"^type\s+\w+\s+struct", ChunkKind::Class),
        (r"^type\s+\w+\s+interface", ChunkKind::Interface),
        (r"^type\s+\w+", ChunkKind::Type),
    ])
});

static HEADERS_JAVA: LazyLock<Vec<HeaderPattern>> = LazyLock::new(|| {
    patterns(&[
        (r"^\s*(?:public|private|protected)?\s*(?:static\s+)?(?:abstract\s+)?(?:final\s+)?class\s+\w+", ChunkKind::Class),
        (r"^\s*(?:public|private|protected)?\s*interface\s+\w+", ChunkKind::Interface),
        (r"^\s*(?:public|private|protected)?\s*enum\s+\w+", ChunkKind::Type),
        (r"^\s*(?:public|private|protected)\s+(?:static\s+)?(?:final\s+)?[\w<>\[\],\s]+\s+\w+\s*\(", ChunkKind::Method),
    ])
});

static HEADERS_C_CPP: LazyLock<Vec<HeaderPattern>> = LazyLock::new(|| {
    patterns(&[
        (r"^(?:static\s+)?(?:inline\s+)?[\w:*&<>]+\s+[\w:]+\s*\([^;]*$", ChunkKind::Function),
        (r"^(?:class|struct)\s+\w+", ChunkKind::Class),
        (r"^enum\s+(?:class\s+)?\w+", ChunkKind::Type),
        (r"^namespace\s+\w+", ChunkKind::Other),
    ])
});

static HEADERS_RUBY: LazyLock<Vec<HeaderPattern>> = LazyLock::new(|| {
    patterns(&[
        (r"^\s*def\s+(?:self\.)?\w+", ChunkKind::Method),
        (r"^\s*class\s+\w+", ChunkKind::Class),
        (r"^\s*module\s+\w+", ChunkKind::Other),
    ])
});

static HEADERS_PHP: LazyLock<Vec<HeaderPattern>> = LazyLock::new(|| {
    patterns(&[
        (r"^\s*(?:public|private|protected)?\s*(?:static\s+)?function\s+\w+", ChunkKind::Function),
        (r"^\s*(?:abstract\s+)?class\s+\w+", ChunkKind::Class),
        (r"^\s*interface\s+\w+", ChunkKind::Interface),
        (r"^\s*trait\s+\w+", ChunkKind::Class),
    ])
});

fn header_patterns(language: &str) -> Option<&'static [HeaderPattern]> {
    match language {
        "typescript" | "javascript" => Some(&HEADERS_TS_JS),
        "rust" => Some(&HEADERS_RUST),
        "python" => Some(&HEADERS_PYTHON),
        "go" => Some(&HEADERS_GO),
        "java" | "kotlin" | "scala" | "csharp" => Some(&HEADERS_JAVA),
        "c" | "cpp" => Some(&HEADERS_C_CPP),
        "ruby" => Some(&HEADERS_RUBY),
        "php" => Some(&HEADERS_PHP),
        _ => None,
    }
}

// =============================================================================
// Symbol / dependency / export extraction
// =============================================================================

static RE_SYMBOLS_TS_JS: LazyLock<Vec<Regex>> = LazyLock::new(|| vec![
    Regex::new(r"(?m)^\s*(?:export\s+)?(?:async\s+)?function\s+(\w+)").unwrap(),
    Regex::new(r"(?m)^\s*(?:export\s+)?class\s+(\w+)").unwrap(),
    Regex::new(r"(?m)^\s*(?:export\s+)?interface\s+(\w+)").unwrap(),
    Regex::new(r"(?m)^\s*(?:export\s+)?type\s+(\w+)").unwrap(),
    Regex::new(r"(?m)^\s*(?:export\s+)?enum\s+(\w+)").unwrap(),
    Regex::new(r"(?m)^\s*(?:export\s+)?const\s+(\w+)\s*[:=]").unwrap(),
]);

static RE_SYMBOLS_RUST: LazyLock<Vec<Regex>> = LazyLock::new(|| vec![
    Regex::new(r"(?m)^\s*(?:pub(?:\([\w:\s]+\))?\s+)?(?:async\s+)?(?:unsafe\s+)?fn\s+(\w+)").unwrap(),
    Regex::new(r"(?m)^\s*(?:pub(?:\([\w:\s]+\))?\s+)?struct\s+(\w+)").unwrap(),
    Regex::new(r"(?m)^\s*(?:pub(?:\([\w:\s]+\))?\s+)?enum\s+(\w+)").unwrap(),
    Regex::new(r"(?m)^\s*(?:pub(?:\([\w:\s]+\))?\s+)?trait\s+(\w+)").unwrap(),
    Regex::new(r"(?m)^\s*(?:pub(?:\([\w:\s]+\))?\s+)?type\s+(\w+)").unwrap(),
    Regex::new(r"(?m)^impl(?:<[^>]*>)?\s+(\w+)").unwrap(),
]);

static RE_SYMBOLS_PYTHON: LazyLock<Vec<Regex>> = LazyLock::new(|| vec![
    Regex::new(r"(?m)^\s*(?:async\s+)?def\s+(\w+)").unwrap(),
    Regex::new(r"(?m)^class\s+(\w+)").unwrap(),
]);

static RE_SYMBOLS_GO: LazyLock<Vec<Regex>> = LazyLock::new(|| vec![
    Regex::new(r"(?m)^func\s+(?:\([^)]+\)\s+)?(\w+)").unwrap(),
    Regex::new(r"(?m)^type\s+(\w+)").unwrap(),
]);

static RE_SYMBOLS_JAVA: LazyLock<Vec<Regex>> = LazyLock::new(|| vec![
    Regex::new(r"(?m)(?:public|private|protected)?\s*(?:static\s+)?(?:abstract\s+)?class\s+(\w+)").unwrap(),
    Regex::new(r"(?m)(?:public|private|protected)?\s*interface\s+(\w+)").unwrap(),
    Regex::new(r"(?m)(?:public|private|protected)?\s*enum\s+(\w+)").unwrap(),
    Regex::new(r"(?m)(?:public|private|protected)\s+(?:static\s+)?(?:final\s+)?[\w<>\[\]]+\s+(\w+)\s*\(").unwrap(),
]);

static RE_SYMBOLS_C_CPP: LazyLock<Vec<Regex>> = LazyLock::new(|| vec![
    Regex::new(r"(?m)^(?:static\s+)?(?:inline\s+)?(?:[\w:*&<>]+\s+)+(\w+)\s*\(").unwrap(),
    Regex::new(r"(?m)^(?:class|struct)\s+(\w+)").unwrap(),
    Regex::new(r"(?m)^enum\s+(?:class\s+)?(\w+)").unwrap(),
    Regex::new(r"(?m)^namespace\s+(\w+)").unwrap(),
]);

static RE_SYMBOLS_RUBY: LazyLock<Vec<Regex>> = LazyLock::new(|| vec![
    Regex::new(r"(?m)^\s*def\s+(?:self\.)?(\w+[?!]?)").unwrap(),
    Regex::new(r"(?m)^\s*class\s+(\w+)").unwrap(),
    Regex::new(r"(?m)^\s*module\s+(\w+)").unwrap(),
]);

static RE_SYMBOLS_PHP: LazyLock<Vec<Regex>> = LazyLock::new(|| vec![
    Regex::new(r"(?m)(?:public|private|protected)?\s*(?:static\s+)?function\s+(\w+)").unwrap(),
    Regex::new(r"(?m)(?:abstract\s+)?class\s+(\w+)").unwrap(),
    Regex::new(r"(?m)interface\s+(\w+)").unwrap(),
    Regex::new(r"(?m)trait\s+(\w+)").unwrap(),
]);

/// Extract defined symbol names from source text. Advisory: failure to
/// extract is never an error, the list is only a scoring signal.
pub fn extract_symbols(content: &str, language: &str) -> Vec<String> {
    let regexes: &[Regex] = match language {
        "typescript" | "javascript" => &RE_SYMBOLS_TS_JS,
        "rust" => &RE_SYMBOLS_RUST,
        "python" => &RE_SYMBOLS_PYTHON,
        "go" => &RE_SYMBOLS_GO,
        "java" | "kotlin" | "scala" | "csharp" => &RE_SYMBOLS_JAVA,
        "c" | "cpp" => &RE_SYMBOLS_C_CPP,
        "ruby" => &RE_SYMBOLS_RUBY,
        "php" => &RE_SYMBOLS_PHP,
        _ => return Vec::new(),
    };

    let mut symbols = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for re in regexes {
        for cap in re.captures_iter(content) {
            if let Some(name) = cap.get(1) {
                let sym = name.as_str();
                if sym.len() >= 2 && seen.insert(sym.to_string()) {
                    symbols.push(sym.to_string());
                }
            }
        }
    }
    symbols
}

static RE_IMPORTS: LazyLock<Vec<Regex>> = LazyLock::new(|| vec![
    Regex::new(r#"(?m)^\s*import\s+.*?from\s+['"]([^'"]+)['"]"#).unwrap(),
    Regex::new(r#"(?m)^\s*import\s+['"]([^'"]+)['"]"#).unwrap(),
    Regex::new(r#"(?m)require\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap(),
    Regex::new(r"(?m)^\s*use\s+([\w:]+)").unwrap(),
    Regex::new(r"(?m)^\s*from\s+([\w.]+)\s+import").unwrap(),
    Regex::new(r"(?m)^\s*import\s+([\w.]+)\s*$").unwrap(),
    Regex::new(r#"(?m)^\s*#include\s+[<"]([^>"]+)[>"]"#).unwrap(),
]);

/// Extract imported/required names, best effort.
pub fn extract_dependencies(content: &str) -> Vec<String> {
    let mut deps = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for re in RE_IMPORTS.iter() {
        for cap in re.captures_iter(content) {
            if let Some(name) = cap.get(1) {
                if seen.insert(name.as_str().to_string()) {
                    deps.push(name.as_str().to_string());
                }
            }
        }
    }
    deps
}

static RE_EXPORTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:pub(?:\([\w:\s]+\))?\s+\w+\s+(\w+)|export\s+(?:default\s+)?(?:async\s+)?\w+\s+(\w+))").unwrap()
});

fn extract_exports(content: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for cap in RE_EXPORTED.captures_iter(content) {
        let name = cap.get(1).or_else(|| cap.get(2));
        if let Some(name) = name {
            if name.as_str().len() >= 2 && seen.insert(name.as_str().to_string()) {
                out.push(name.as_str().to_string());
            }
        }
    }
    out
}

/// Signature heuristic shared with the compressor: header lines up to the
/// first opener (`{`, `=>`, `;`, trailing `:`) or MAX_SIGNATURE_LINES.
pub fn extract_signature(lines: &[&str]) -> Option<String> {
    if lines.is_empty() {
        return None;
    }
    let mut sig = Vec::new();
    for line in lines.iter().take(MAX_SIGNATURE_LINES) {
        sig.push(*line);
        let trimmed = line.trim_end();
        if trimmed.contains('{')
            || trimmed.contains("=>")
            || trimmed.ends_with(';')
            || trimmed.ends_with(':')
        {
            break;
        }
    }
    let joined = sig.join("\n");
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

// =============================================================================
// Chunker
// =============================================================================

pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

struct Segment {
    start: usize, // 0-based line index, inclusive
    end: usize,   // exclusive
    kind: ChunkKind,
}

impl Chunker {
    pub fn new(config: &IndexerConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
        }
    }

    /// Produce the ordered chunk list for one file. The chunks cover every
    /// line of the file.
    pub fn chunk_file(
        &self,
        rel_path: &str,
        content: &str,
        language: &str,
        mtime_ms: i64,
    ) -> Vec<Chunk> {
        if content.is_empty() {
            return Vec::new();
        }
        let lines: Vec<&str> = content.lines().collect();

        let segments = match header_patterns(language) {
            Some(patterns) => self.structural_segments(&lines, language, patterns),
            None => self.window_segments(&lines, language, 0, ChunkKind::Other),
        };

        segments
            .into_iter()
            .map(|seg| self.build_chunk(rel_path, &lines, language, mtime_ms, seg))
            .collect()
    }

    fn build_chunk(
        &self,
        rel_path: &str,
        lines: &[&str],
        language: &str,
        mtime_ms: i64,
        seg: Segment,
    ) -> Chunk {
        let seg_lines = &lines[seg.start..seg.end];
        let content = seg_lines.join("\n");
        let start_line = seg.start + 1;
        let end_line = seg.end;
        let signature = if seg.kind == ChunkKind::Other {
            None
        } else {
            extract_signature(seg_lines)
        };
        let symbols = extract_symbols(&content, language);
        let dependencies = extract_dependencies(&content);
        let exports = extract_exports(&content);

        Chunk {
            id: chunk_id(rel_path, start_line, end_line, language),
            file_path: rel_path.to_string(),
            language: language.to_string(),
            start_line,
            end_line,
            content,
            signature,
            kind: seg.kind,
            symbols,
            dependencies,
            metadata: ChunkMetadata { last_modified_ms: mtime_ms, exports },
        }
    }

    /// Split at structural header lines, coalescing small neighbors up to
    /// the window target and re-splitting oversize units internally.
    fn structural_segments(
        &self,
        lines: &[&str],
        language: &str,
        patterns: &[HeaderPattern],
    ) -> Vec<Segment> {
        let mut boundaries: Vec<(usize, ChunkKind)> = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            if let Some(p) = patterns.iter().find(|p| p.regex.is_match(line)) {
                boundaries.push((i, p.kind));
            }
        }
        if boundaries.is_empty() {
            return self.window_segments(lines, language, 0, ChunkKind::Other);
        }

        // Raw units: preamble before the first header, then header-to-header.
        let mut units: Vec<Segment> = Vec::new();
        if boundaries[0].0 > 0 {
            units.push(Segment { start: 0, end: boundaries[0].0, kind: ChunkKind::Other });
        }
        for (i, &(start, kind)) in boundaries.iter().enumerate() {
            let end = boundaries.get(i + 1).map(|&(next, _)| next).unwrap_or(lines.len());
            units.push(Segment { start, end, kind });
        }

        let max_tokens = self.chunk_size * OVERSIZE_FACTOR;
        let mut out: Vec<Segment> = Vec::new();
        let mut acc: Option<Segment> = None;

        for unit in units {
            let unit_tokens = self.segment_tokens(lines, &unit, language);

            if unit_tokens > max_tokens {
                if let Some(acc) = acc.take() {
                    out.push(acc);
                }
                out.extend(self.window_segments(
                    &lines[unit.start..unit.end],
                    language,
                    unit.start,
                    unit.kind,
                ));
                continue;
            }

            match acc.take() {
                None => acc = Some(unit),
                Some(current) => {
                    let merged_tokens =
                        self.segment_tokens(lines, &current, language) + unit_tokens;
                    if merged_tokens <= self.chunk_size {
                        let kind = if current.kind == ChunkKind::Other {
                            unit.kind
                        } else {
                            current.kind
                        };
                        acc = Some(Segment { start: current.start, end: unit.end, kind });
                    } else {
                        out.push(current);
                        acc = Some(unit);
                    }
                }
            }
        }
        if let Some(acc) = acc {
            out.push(acc);
        }
        out
    }

    fn segment_tokens(&self, lines: &[&str], seg: &Segment, language: &str) -> usize {
        lines[seg.start..seg.end]
            .iter()
            .map(|l| estimate_tokens(l, language) + 1)
            .sum()
    }

    /// Token-budgeted line windows with overlap. `offset` maps local line
    /// indices back into the whole file.
    fn window_segments(
        &self,
        lines: &[&str],
        language: &str,
        offset: usize,
        kind: ChunkKind,
    ) -> Vec<Segment> {
        let mut segments = Vec::new();
        if lines.is_empty() {
            return segments;
        }

        let mut start = 0usize;
        let mut current_tokens = 0usize;

        for i in 0..lines.len() {
            let line_tokens = estimate_tokens(lines[i], language) + 1;
            if current_tokens + line_tokens > self.chunk_size && i > start {
                segments.push(Segment { start: offset + start, end: offset + i, kind });

                // Back up for the overlap window.
                let mut overlap_tokens = 0usize;
                let mut new_start = i;
                while new_start > start {
                    let t = estimate_tokens(lines[new_start - 1], language) + 1;
                    if overlap_tokens + t > self.chunk_overlap {
                        break;
                    }
                    overlap_tokens += t;
                    new_start -= 1;
                }
                start = new_start.max(start + 1);
                current_tokens = lines[start..i]
                    .iter()
                    .map(|l| estimate_tokens(l, language) + 1)
                    .sum();
            }
            current_tokens += line_tokens;
        }

        segments.push(Segment { start: offset + start, end: offset + lines.len(), kind });
        segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker() -> Chunker {
        Chunker::new(&IndexerConfig::default())
    }

    #[test]
    fn empty_file_yields_no_chunks() {
        assert!(chunker().chunk_file("a.rs", "", "rust", 0).is_empty());
    }

    #[test]
    fn chunks_cover_the_file() {
        let content = (0..200)
            .map(|i| format!("fn f{i}() {{ let x = {i}; }}"))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunker().chunk_file("a.rs", &content, "rust", 0);
        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks.last().unwrap().end_line, 200);
        // Ordered and contiguous-or-overlapping
        for pair in chunks.windows(2) {
            assert!(pair[1].start_line <= pair[0].end_line + 1);
            assert!(pair[1].start_line > pair[0].start_line);
        }
    }

    #[test]
    fn structural_split_finds_functions() {
        let content = "\
use std::fmt;

pub fn alpha() {
    println!(\"a\");
}

pub fn beta() {
    println!(\"b\");
}
";
        let chunks = chunker().chunk_file("a.rs", content, "rust", 0);
        let symbols: Vec<String> = chunks.iter().flat_map(|c| c.symbols.clone()).collect();
        assert!(symbols.contains(&"alpha".to_string()));
        assert!(symbols.contains(&"beta".to_string()));
        let deps: Vec<String> = chunks.iter().flat_map(|c| c.dependencies.clone()).collect();
        assert!(deps.iter().any(|d| d.contains("std::fmt")));
    }

    #[test]
    fn unknown_language_uses_window_fallback() {
        let content = (0..100).map(|i| format!("row {i}")).collect::<Vec<_>>().join("\n");
        let chunks = chunker().chunk_file("data.xyz", &content, "unknown", 0);
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.kind == ChunkKind::Other));
        assert_eq!(chunks.last().unwrap().end_line, 100);
    }

    #[test]
    fn oversize_function_is_window_split() {
        let body = (0..400).map(|i| format!("    let v{i} = compute({i});")).collect::<Vec<_>>().join("\n");
        let content = format!("pub fn huge() {{\n{body}\n}}\n");
        let chunks = chunker().chunk_file("a.rs", &content, "rust", 0);
        assert!(chunks.len() > 1);
        let max = IndexerConfig::default().chunk_size * OVERSIZE_FACTOR;
        for c in &chunks {
            assert!(c.estimated_tokens() <= max * 2, "chunk too large: {}", c.estimated_tokens());
        }
    }

    #[test]
    fn signature_is_extracted_for_structural_chunks() {
        let content = "pub fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n";
        let chunks = chunker().chunk_file("a.rs", content, "rust", 0);
        let with_sig = chunks.iter().find(|c| c.signature.is_some()).unwrap();
        assert!(with_sig.signature.as_ref().unwrap().contains("fn add"));
    }

    #[test]
    fn ids_are_stable_across_runs() {
        let content = "pub fn stable() {}\n";
        let a = chunker().chunk_file("a.rs", content, "rust", 1);
        let b = chunker().chunk_file("a.rs", content, "rust", 2);
        assert_eq!(a[0].id, b[0].id); // mtime does not affect identity
    }

    #[test]
    fn exports_are_best_effort() {
        let content = "pub fn visible() {}\nfn hidden() {}\n";
        let chunks = chunker().chunk_file("a.rs", content, "rust", 0);
        let exports: Vec<String> =
            chunks.iter().flat_map(|c| c.metadata.exports.clone()).collect();
        assert!(exports.contains(&"visible".to_string()));
        assert!(!exports.contains(&"hidden".to_string()));
    }

    #[test]
    fn signature_heuristic_stops_at_opener() {
        let lines = vec!["fn multi(", "    a: i32,", ") -> i32 {", "    a", "}"];
        let sig = extract_signature(&lines).unwrap();
        assert!(sig.ends_with('{'));
        assert!(!sig.contains("    a\n"));
    }
}
