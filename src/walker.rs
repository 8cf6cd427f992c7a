//! Source tree walker.
//!
//! Selects the files an index run will consider: a path is taken iff some
//! include pattern matches, no exclude pattern matches, and (when enabled)
//! the host VCS ignore rules do not exclude it. Oversize files are skipped
//! and reported rather than silently dropped.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use tracing::debug;

use crate::config::IndexerConfig;
use crate::error::{Error, Result};

/// Symlink cycles are bounded by not following links and capping depth.
const MAX_WALK_DEPTH: usize = 64;

#[derive(Debug, Clone)]
pub struct WalkedFile {
    pub abs_path: PathBuf,
    /// Root-relative path with forward slashes; the key used everywhere else.
    pub rel_path: String,
    pub size: u64,
    /// Source mtime, milliseconds since the Unix epoch.
    pub mtime_ms: i64,
}

impl WalkedFile {
    /// Read the file bytes. Deferred so the walk itself stays cheap and
    /// cancellation can land between files.
    pub fn read(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.abs_path).map_err(|e| Error::FileRead {
            path: self.rel_path.clone(),
            message: e.to_string(),
        })
    }
}

#[derive(Debug, Default)]
pub struct WalkReport {
    pub files: Vec<WalkedFile>,
    /// (rel_path, size) of files skipped for exceeding the size limit.
    pub skipped_oversize: Vec<(String, u64)>,
}

pub struct SourceWalker {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    respect_gitignore: bool,
    max_file_size: u64,
}

fn compile_globs(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::Config(format!("invalid glob '{pattern}': {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::Config(format!("glob set build failed: {e}")))
}

impl SourceWalker {
    pub fn new(root: &Path, config: &IndexerConfig) -> Result<Self> {
        let root = dunce::canonicalize(root).map_err(|e| Error::FileRead {
            path: root.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            root,
            include: compile_globs(&config.include_patterns)?,
            exclude: compile_globs(&config.exclude_patterns)?,
            respect_gitignore: config.respect_gitignore,
            max_file_size: config.max_file_size,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walk the tree and collect selected files in path order.
    pub fn walk(&self) -> WalkReport {
        let mut report = WalkReport::default();

        let walker = WalkBuilder::new(&self.root)
            .hidden(false)
            .follow_links(false)
            .max_depth(Some(MAX_WALK_DEPTH))
            .git_ignore(self.respect_gitignore)
            .git_global(self.respect_gitignore)
            .git_exclude(self.respect_gitignore)
            .build();

        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let abs_path = entry.path();
            let rel_path = match abs_path.strip_prefix(&self.root) {
                Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };

            if !self.include.is_match(&rel_path) || self.exclude.is_match(&rel_path) {
                continue;
            }

            let Ok(metadata) = entry.metadata() else {
                debug!(path = %rel_path, "Skipping file with unreadable metadata");
                continue;
            };
            let size = metadata.len();
            if size > self.max_file_size {
                report.skipped_oversize.push((rel_path, size));
                continue;
            }

            let mtime_ms = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);

            report.files.push(WalkedFile {
                abs_path: abs_path.to_path_buf(),
                rel_path,
                size,
                mtime_ms,
            });
        }

        report.files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        report
    }
}

/// Quick binary sniff: treat a file as non-text when a NUL byte shows up in
/// the leading window. Unknown text formats are still indexed as plain text.
pub fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(1024).any(|&b| b == 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexerConfig;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn selects_included_and_drops_excluded() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "src/main.rs", "fn main() {}");
        write(tmp.path(), "node_modules/pkg/index.js", "x");
        write(tmp.path(), "README.md", "# hi");

        let walker = SourceWalker::new(tmp.path(), &IndexerConfig::default()).unwrap();
        let report = walker.walk();
        let paths: Vec<&str> = report.files.iter().map(|f| f.rel_path.as_str()).collect();
        assert!(paths.contains(&"src/main.rs"));
        assert!(paths.contains(&"README.md"));
        assert!(!paths.iter().any(|p| p.starts_with("node_modules")));
    }

    #[test]
    fn oversize_files_are_reported_not_returned() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "big.txt", &"a".repeat(4096));
        write(tmp.path(), "small.txt", "ok");

        let config = IndexerConfig { max_file_size: 1024, ..Default::default() };
        let walker = SourceWalker::new(tmp.path(), &config).unwrap();
        let report = walker.walk();
        assert_eq!(report.files.len(), 1);
        assert_eq!(report.files[0].rel_path, "small.txt");
        assert_eq!(report.skipped_oversize.len(), 1);
        assert_eq!(report.skipped_oversize[0].0, "big.txt");
    }

    #[test]
    fn include_patterns_narrow_selection() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.rs", "fn a() {}");
        write(tmp.path(), "b.py", "def b(): pass");

        let config = IndexerConfig {
            include_patterns: vec!["**/*.rs".to_string()],
            ..Default::default()
        };
        let walker = SourceWalker::new(tmp.path(), &config).unwrap();
        let report = walker.walk();
        assert_eq!(report.files.len(), 1);
        assert_eq!(report.files[0].rel_path, "a.rs");
    }

    #[test]
    fn invalid_glob_is_a_config_error() {
        let tmp = TempDir::new().unwrap();
        let config = IndexerConfig {
            include_patterns: vec!["[".to_string()],
            ..Default::default()
        };
        assert!(SourceWalker::new(tmp.path(), &config).is_err());
    }

    #[test]
    fn binary_sniff() {
        assert!(looks_binary(b"\x7fELF\x00\x01"));
        assert!(!looks_binary(b"plain text content"));
    }

    #[test]
    fn files_sorted_by_relative_path() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "z.txt", "z");
        write(tmp.path(), "a.txt", "a");
        let walker = SourceWalker::new(tmp.path(), &IndexerConfig::default()).unwrap();
        let report = walker.walk();
        let paths: Vec<&str> = report.files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "z.txt"]);
    }
}
