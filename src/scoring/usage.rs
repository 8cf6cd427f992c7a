//! Across-session usage statistics.
//!
//! Every time the optimizer selects a chunk, its usage EMA is bumped; the
//! usage_frequency feature reads the smoothed value back. State persists
//! in a JSON sidecar under the store directory, written atomically, so
//! frequently selected chunks keep their boost across restarts.

use std::path::PathBuf;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

/// Blend factor for new selections; older history decays by (1 - alpha).
const EMA_ALPHA: f64 = 0.3;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageStat {
    pub ema: f64,
    pub samples: u64,
    pub last_selected_ms: i64,
}

pub struct UsageTracker {
    stats: DashMap<String, UsageStat>,
    path: PathBuf,
}

impl UsageTracker {
    /// Load the sidecar if present; a missing or unreadable file starts
    /// empty rather than failing the engine.
    pub fn load(path: PathBuf) -> Self {
        let stats = DashMap::new();
        match std::fs::read_to_string(&path) {
            Ok(json) => match serde_json::from_str::<std::collections::HashMap<String, UsageStat>>(&json) {
                Ok(map) => {
                    for (k, v) in map {
                        stats.insert(k, v);
                    }
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Usage sidecar unreadable, starting fresh"),
            },
            Err(_) => {}
        }
        Self { stats, path }
    }

    /// Record one selection of `chunk_id`.
    pub fn record_selection(&self, chunk_id: &str, now_ms: i64) {
        let mut entry = self.stats.entry(chunk_id.to_string()).or_default();
        entry.ema = entry.ema * (1.0 - EMA_ALPHA) + 1.0;
        entry.samples += 1;
        entry.last_selected_ms = now_ms;
    }

    /// Smoothed selection count; 0 for never-selected chunks.
    pub fn ema(&self, chunk_id: &str) -> f64 {
        self.stats.get(chunk_id).map(|s| s.ema).unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    /// Forget chunks that no longer exist in the store.
    pub fn retain_ids(&self, live: &std::collections::HashSet<String>) {
        self.stats.retain(|id, _| live.contains(id));
    }

    /// Persist to the sidecar via temp-file-and-rename.
    pub fn save(&self) -> Result<()> {
        let map: std::collections::HashMap<String, UsageStat> = self
            .stats
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let json = serde_json::to_string(&map)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn selections_accumulate_with_decay() {
        let tmp = TempDir::new().unwrap();
        let tracker = UsageTracker::load(tmp.path().join("usage_stats.json"));
        assert_eq!(tracker.ema("c"), 0.0);

        tracker.record_selection("c", 1);
        let once = tracker.ema("c");
        tracker.record_selection("c", 2);
        let twice = tracker.ema("c");
        assert!(twice > once);
        // Decay keeps the EMA bounded below the raw count ceiling.
        assert!(twice < 2.0);
    }

    #[test]
    fn state_survives_reload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("usage_stats.json");
        {
            let tracker = UsageTracker::load(path.clone());
            tracker.record_selection("a", 10);
            tracker.record_selection("a", 11);
            tracker.save().unwrap();
        }
        let tracker = UsageTracker::load(path);
        assert!(tracker.ema("a") > 1.0);
        assert_eq!(tracker.ema("b"), 0.0);
    }

    #[test]
    fn retain_drops_dead_ids() {
        let tmp = TempDir::new().unwrap();
        let tracker = UsageTracker::load(tmp.path().join("u.json"));
        tracker.record_selection("keep", 1);
        tracker.record_selection("drop", 1);
        let live = ["keep".to_string()].into_iter().collect();
        tracker.retain_ids(&live);
        assert!(tracker.ema("keep") > 0.0);
        assert_eq!(tracker.ema("drop"), 0.0);
    }
}
