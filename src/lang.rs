/// Shared language detection utility.
///
/// Single source of truth for the extension table so the walker, chunker,
/// compressor and token estimator never diverge on what a file is.

/// Detect programming language from file extension.
/// Returns a static string identifier for the language.
/// Unrecognized extensions are tagged `unknown` and still indexed as plain text.
pub fn detect_language(ext: &str) -> &'static str {
    match ext.to_lowercase().as_str() {
        "ts" | "tsx" => "typescript",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "rs" => "rust",
        "py" | "pyi" | "pyw" => "python",
        "go" => "go",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "hpp" | "cc" | "cxx" | "hxx" => "cpp",
        "cs" => "csharp",
        "rb" | "rake" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "kt" | "kts" => "kotlin",
        "scala" | "sc" => "scala",
        "html" | "htm" => "html",
        "css" => "css",
        "scss" | "sass" | "less" => "scss",
        "json" | "jsonc" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "xml" | "xsl" | "xslt" => "xml",
        "md" | "mdx" | "rst" => "markdown",
        "sql" => "sql",
        "graphql" | "gql" => "graphql",
        "sh" | "bash" | "zsh" | "fish" => "shell",
        "lua" => "lua",
        "zig" => "zig",
        "dart" => "dart",
        "ex" | "exs" => "elixir",
        "erl" | "hrl" => "erlang",
        "r" => "r",
        "jl" => "julia",
        "clj" | "cljs" | "cljc" => "clojure",
        "tf" | "hcl" => "hcl",
        "proto" => "protobuf",
        "txt" => "plaintext",
        _ => "unknown",
    }
}

/// Comment syntax for a language tag, used by the compressor when stripping
/// comments without a parser.
#[derive(Debug, Clone, Copy)]
pub struct CommentSyntax {
    pub line_markers: &'static [&'static str],
    pub block_pairs: &'static [(&'static str, &'static str)],
}

pub fn comment_syntax(language: &str) -> CommentSyntax {
    match language {
        "python" | "shell" | "ruby" | "yaml" | "toml" | "r" | "julia" | "elixir" | "hcl" => {
            CommentSyntax {
                line_markers: &["#"],
                block_pairs: &[("\"\"\"", "\"\"\""), ("'''", "'''")],
            }
        }
        "sql" | "lua" => CommentSyntax {
            line_markers: &["--"],
            block_pairs: &[("/*", "*/"), ("--[[", "]]")],
        },
        "html" | "xml" | "markdown" => CommentSyntax {
            line_markers: &[],
            block_pairs: &[("<!--", "-->")],
        },
        "erlang" | "clojure" => CommentSyntax {
            line_markers: &["%", ";;"],
            block_pairs: &[],
        },
        // C-family default covers the bulk of the table
        _ => CommentSyntax {
            line_markers: &["//"],
            block_pairs: &[("/*", "*/")],
        },
    }
}

/// Rough characters-per-token ratio by language. Code tokenizes denser than
/// prose; markup and plain text looser. Exact tokenization belongs to the
/// downstream model provider.
pub fn chars_per_token(language: &str) -> f32 {
    match language {
        "markdown" | "plaintext" | "unknown" => 4.5,
        "html" | "xml" | "json" | "yaml" | "toml" => 3.2,
        "python" | "ruby" => 3.8,
        _ => 3.5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_extensions_detect() {
        assert_eq!(detect_language("rs"), "rust");
        assert_eq!(detect_language("TSX"), "typescript");
        assert_eq!(detect_language("py"), "python");
    }

    #[test]
    fn unknown_extension_is_tagged_unknown() {
        assert_eq!(detect_language("xyz"), "unknown");
        assert_eq!(detect_language(""), "unknown");
    }

    #[test]
    fn comment_syntax_per_family() {
        assert_eq!(comment_syntax("rust").line_markers, &["//"]);
        assert_eq!(comment_syntax("python").line_markers, &["#"]);
        assert_eq!(comment_syntax("sql").line_markers, &["--"]);
    }
}
