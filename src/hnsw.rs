//! Hierarchical navigable small-world index.
//!
//! Approximate k-nearest-neighbor search under cosine similarity with
//! sub-linear query time. Nodes live in an arena addressed by contiguous
//! internal ids; external chunk ids map to internal ids through a side
//! table, so the graph itself only ever holds integer references.
//!
//! Layout follows the standard HNSW construction: each node gets a
//! geometrically sampled top layer, inserts descend greedily from the
//! entry point and run an `ef_construction`-bounded candidate search per
//! layer, links are bidirectional with degree pruning (`M` per layer,
//! `2M` at layer 0). Deletion unlinks the node, cross-links its former
//! neighbors and repairs the entry point, so every id a search can reach
//! resolves to a live vector.
//!
//! Mutations take the write half of a `parking_lot::RwLock`; searches
//! share the read half and keep their visited set on the stack.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::HnswConfig;
use crate::error::{Error, Result};

/// Hard cap on the layer count; geometric sampling virtually never gets
/// close, this only bounds a pathological RNG stream.
const MAX_LEVEL: usize = 16;

/// Persisted graph file name under the store directory.
pub const INDEX_FILE: &str = "index.hnsw.json";
/// Persisted external⇄internal id map file name.
pub const MAPPING_FILE: &str = "index.hnsw.ids.json";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HnswParams {
    pub dimension: usize,
    /// Maximum out-degree per node per layer (2M at layer 0).
    pub m: usize,
    /// Candidate list size during insertion.
    pub ef_construction: usize,
    /// Candidate list size during query; tunable per query.
    pub ef_search: usize,
}

impl HnswParams {
    pub fn new(dimension: usize, config: &HnswConfig) -> Self {
        Self {
            dimension,
            m: config.m,
            ef_construction: config.ef_construction,
            ef_search: config.ef_search,
        }
    }

    /// Preset tuned for build speed over recall.
    pub fn fast(dimension: usize) -> Self {
        Self { dimension, m: 12, ef_construction: 100, ef_search: 40 }
    }

    /// Preset tuned for recall over build speed.
    pub fn accurate(dimension: usize) -> Self {
        Self { dimension, m: 24, ef_construction: 300, ef_search: 120 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswStats {
    pub count: usize,
    pub dimension: usize,
    pub m: usize,
    pub ef_search: usize,
    pub size_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Node {
    /// L2-normalized vector; dot product is cosine similarity.
    vector: Vec<f32>,
    /// Neighbor lists, one per layer up to the node's top layer.
    neighbors: Vec<Vec<u32>>,
}

impl Node {
    fn level(&self) -> usize {
        self.neighbors.len() - 1
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Graph {
    dimension: usize,
    m: usize,
    ef_construction: usize,
    nodes: Vec<Option<Node>>,
    free: Vec<u32>,
    entry: Option<u32>,
    entry_level: usize,
    rng_state: u64,
}

struct Inner {
    graph: Graph,
    id_map: HashMap<String, u32>,
    externals: Vec<Option<String>>,
    count: usize,
}

/// Orderable wrapper so f32 distances can live in sort keys and heaps.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Dist(f32);

impl Eq for Dist {}

impl PartialOrd for Dist {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Dist {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(std::cmp::Ordering::Equal)
    }
}

fn normalize(vector: &[f32]) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter().map(|x| x / norm).collect()
    } else {
        vector.to_vec()
    }
}

/// Cosine distance between normalized vectors: 1 - dot, in [0, 2].
fn distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    1.0 - dot
}

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

pub struct HnswIndex {
    params: HnswParams,
    inner: RwLock<Inner>,
}

impl std::fmt::Debug for HnswIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HnswIndex")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl HnswIndex {
    pub fn new(params: HnswParams) -> Self {
        Self {
            params,
            inner: RwLock::new(Inner {
                graph: Graph {
                    dimension: params.dimension,
                    m: params.m,
                    ef_construction: params.ef_construction,
                    nodes: Vec::new(),
                    free: Vec::new(),
                    entry: None,
                    entry_level: 0,
                    rng_state: 0x51_7C_C1B7_2722_0A95,
                },
                id_map: HashMap::new(),
                externals: Vec::new(),
                count: 0,
            }),
        }
    }

    pub fn params(&self) -> HnswParams {
        self.params
    }

    pub fn count(&self) -> usize {
        self.inner.read().count
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn contains(&self, external_id: &str) -> bool {
        self.inner.read().id_map.contains_key(external_id)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.params.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.params.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Insert one vector under a fresh external id.
    pub fn add(&self, external_id: &str, vector: &[f32]) -> Result<()> {
        self.check_dimension(vector)?;
        let mut inner = self.inner.write();
        if inner.id_map.contains_key(external_id) {
            return Err(Error::DuplicateId(external_id.to_string()));
        }
        Self::insert_node(&mut inner, external_id, vector, self.params.m);
        Ok(())
    }

    /// Insert a batch. Validation runs before any mutation so a rejected
    /// batch leaves the index untouched.
    pub fn add_batch(&self, items: &[(String, Vec<f32>)]) -> Result<()> {
        let mut inner = self.inner.write();
        let mut batch_ids = HashSet::new();
        for (id, vector) in items {
            if vector.len() != self.params.dimension {
                return Err(Error::DimensionMismatch {
                    expected: self.params.dimension,
                    actual: vector.len(),
                });
            }
            if inner.id_map.contains_key(id) || !batch_ids.insert(id.as_str()) {
                return Err(Error::DuplicateId(id.clone()));
            }
        }
        for (id, vector) in items {
            Self::insert_node(&mut inner, id, vector, self.params.m);
        }
        Ok(())
    }

    fn insert_node(inner: &mut Inner, external_id: &str, vector: &[f32], m: usize) {
        let q = normalize(vector);
        let level = Self::sample_level(&mut inner.graph.rng_state, m);

        let internal = match inner.graph.free.pop() {
            Some(slot) => {
                inner.graph.nodes[slot as usize] =
                    Some(Node { vector: q.clone(), neighbors: vec![Vec::new(); level + 1] });
                inner.externals[slot as usize] = Some(external_id.to_string());
                slot
            }
            None => {
                inner.graph.nodes.push(Some(Node {
                    vector: q.clone(),
                    neighbors: vec![Vec::new(); level + 1],
                }));
                inner.externals.push(Some(external_id.to_string()));
                (inner.graph.nodes.len() - 1) as u32
            }
        };
        inner.id_map.insert(external_id.to_string(), internal);
        inner.count += 1;

        let Some(entry) = inner.graph.entry else {
            inner.graph.entry = Some(internal);
            inner.graph.entry_level = level;
            return;
        };

        let entry_level = inner.graph.entry_level;
        let ef_construction = inner.graph.ef_construction;
        let mut ep = entry;

        // Greedy descent through the layers above the new node's level.
        let mut lc = entry_level;
        while lc > level {
            ep = Self::search_layer(&inner.graph, &q, &[ep], 1, lc)
                .first()
                .map(|&(_, id)| id)
                .unwrap_or(ep);
            lc -= 1;
        }

        // Candidate search and bidirectional linking per layer.
        for lc in (0..=level.min(entry_level)).rev() {
            let candidates = Self::search_layer(&inner.graph, &q, &[ep], ef_construction, lc);
            if let Some(&(_, best)) = candidates.first() {
                ep = best;
            }
            let cap = Self::layer_cap(m, lc);
            let selected: Vec<u32> =
                candidates.iter().take(cap).map(|&(_, id)| id).collect();

            if let Some(node) = inner.graph.nodes[internal as usize].as_mut() {
                node.neighbors[lc] = selected.clone();
            }
            for &neighbor in &selected {
                Self::link(&mut inner.graph, neighbor, internal, lc, cap);
            }
        }

        if level > entry_level {
            inner.graph.entry = Some(internal);
            inner.graph.entry_level = level;
        }
    }

    fn sample_level(rng_state: &mut u64, m: usize) -> usize {
        let ml = 1.0 / (m as f64).ln();
        let u = (splitmix64(rng_state) >> 11) as f64 / (1u64 << 53) as f64;
        let u = u.max(f64::MIN_POSITIVE);
        ((-u.ln() * ml).floor() as usize).min(MAX_LEVEL)
    }

    fn layer_cap(m: usize, layer: usize) -> usize {
        if layer == 0 { m * 2 } else { m }
    }

    /// Add `target` to `node`'s neighbor list at `layer`, pruning back to
    /// the degree cap by distance when the list overflows.
    fn link(graph: &mut Graph, node: u32, target: u32, layer: usize, cap: usize) {
        let node_vector = match graph.nodes[node as usize].as_ref() {
            Some(n) => n.vector.clone(),
            None => return,
        };
        let Some(n) = graph.nodes[node as usize].as_ref() else { return };
        if n.neighbors.len() <= layer || n.neighbors[layer].contains(&target) {
            return;
        }

        let mut list = n.neighbors[layer].clone();
        list.push(target);
        if list.len() > cap {
            list.sort_by_key(|&id| {
                graph.nodes[id as usize]
                    .as_ref()
                    .map(|other| Dist(distance(&node_vector, &other.vector)))
                    .unwrap_or(Dist(f32::MAX))
            });
            list.truncate(cap);
        }
        if let Some(n) = graph.nodes[node as usize].as_mut() {
            n.neighbors[layer] = list;
        }
    }

    /// Best-first search restricted to one layer. Returns up to `ef`
    /// (distance, id) pairs sorted by ascending distance.
    fn search_layer(
        graph: &Graph,
        query: &[f32],
        entry_points: &[u32],
        ef: usize,
        layer: usize,
    ) -> Vec<(f32, u32)> {
        use std::cmp::Reverse;
        use std::collections::BinaryHeap;

        let mut visited: HashSet<u32> = HashSet::new();
        // Min-heap of candidates to expand, max-heap of the best found.
        let mut candidates: BinaryHeap<Reverse<(Dist, u32)>> = BinaryHeap::new();
        let mut best: BinaryHeap<(Dist, u32)> = BinaryHeap::new();

        for &ep in entry_points {
            let Some(node) = graph.nodes.get(ep as usize).and_then(|n| n.as_ref()) else {
                continue;
            };
            if !visited.insert(ep) {
                continue;
            }
            let d = Dist(distance(query, &node.vector));
            candidates.push(Reverse((d, ep)));
            best.push((d, ep));
        }

        while let Some(Reverse((d, current))) = candidates.pop() {
            if best.len() >= ef {
                if let Some(&(worst, _)) = best.peek() {
                    if d > worst {
                        break;
                    }
                }
            }
            let Some(node) = graph.nodes.get(current as usize).and_then(|n| n.as_ref()) else {
                continue;
            };
            if node.neighbors.len() <= layer {
                continue;
            }
            for &neighbor in &node.neighbors[layer] {
                if !visited.insert(neighbor) {
                    continue;
                }
                let Some(other) = graph.nodes.get(neighbor as usize).and_then(|n| n.as_ref())
                else {
                    continue;
                };
                let nd = Dist(distance(query, &other.vector));
                let admit = best.len() < ef
                    || best.peek().map(|&(worst, _)| nd < worst).unwrap_or(true);
                if admit {
                    candidates.push(Reverse((nd, neighbor)));
                    best.push((nd, neighbor));
                    if best.len() > ef {
                        best.pop();
                    }
                }
            }
        }

        let mut out: Vec<(f32, u32)> =
            best.into_iter().map(|(d, id)| (d.0, id)).collect();
        out.sort_by(|a, b| Dist(a.0).cmp(&Dist(b.0)));
        out
    }

    /// k-nearest neighbors with the configured `ef_search`.
    pub fn search(&self, vector: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        self.search_with_ef(vector, k, self.params.ef_search)
    }

    /// k-nearest neighbors with a per-query candidate width. Results are
    /// sorted by score descending and never exceed the index count.
    pub fn search_with_ef(&self, vector: &[f32], k: usize, ef: usize) -> Result<Vec<(String, f32)>> {
        self.check_dimension(vector)?;
        let inner = self.inner.read();
        let Some(entry) = inner.graph.entry else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }

        let q = normalize(vector);
        let mut ep = entry;
        for lc in (1..=inner.graph.entry_level).rev() {
            ep = Self::search_layer(&inner.graph, &q, &[ep], 1, lc)
                .first()
                .map(|&(_, id)| id)
                .unwrap_or(ep);
        }

        let ef = ef.max(k);
        let found = Self::search_layer(&inner.graph, &q, &[ep], ef, 0);

        Ok(found
            .into_iter()
            .take(k)
            .filter_map(|(d, id)| {
                inner.externals[id as usize]
                    .as_ref()
                    .map(|ext| (ext.clone(), 1.0 - d))
            })
            .collect())
    }

    /// Remove a node. Idempotent: returns whether anything was removed.
    /// Former neighbors are cross-linked so the graph stays navigable.
    pub fn remove(&self, external_id: &str) -> bool {
        let mut inner = self.inner.write();
        let Some(internal) = inner.id_map.remove(external_id) else {
            return false;
        };

        let Some(node) = inner.graph.nodes[internal as usize].take() else {
            return false;
        };
        inner.externals[internal as usize] = None;
        inner.count -= 1;
        let m = inner.graph.m;

        for (layer, neighbors) in node.neighbors.iter().enumerate() {
            // Unlink, then repair each former neighbor's list with the
            // removed node's other neighbors as reconnect candidates.
            for &n in neighbors {
                if let Some(other) = inner.graph.nodes[n as usize].as_mut() {
                    if other.neighbors.len() > layer {
                        other.neighbors[layer].retain(|&id| id != internal);
                    }
                }
            }
            let cap = Self::layer_cap(m, layer);
            for &n in neighbors {
                let Some(anchor) = inner.graph.nodes[n as usize].as_ref() else { continue };
                if anchor.neighbors.len() <= layer {
                    continue;
                }
                let anchor_vector = anchor.vector.clone();
                let mut candidates: Vec<u32> = anchor.neighbors[layer].clone();
                for &other in neighbors {
                    if other != n && !candidates.contains(&other) {
                        candidates.push(other);
                    }
                }
                candidates.retain(|&id| {
                    id != n && inner.graph.nodes[id as usize].is_some()
                });
                candidates.sort_by_key(|&id| {
                    inner.graph.nodes[id as usize]
                        .as_ref()
                        .map(|o| Dist(distance(&anchor_vector, &o.vector)))
                        .unwrap_or(Dist(f32::MAX))
                });
                candidates.dedup();
                candidates.truncate(cap);
                if let Some(anchor) = inner.graph.nodes[n as usize].as_mut() {
                    anchor.neighbors[layer] = candidates;
                }
            }
        }

        inner.graph.free.push(internal);

        if inner.graph.entry == Some(internal) {
            // Promote the highest remaining node to entry.
            let mut new_entry = None;
            let mut new_level = 0;
            for (i, slot) in inner.graph.nodes.iter().enumerate() {
                if let Some(n) = slot {
                    if new_entry.is_none() || n.level() > new_level {
                        new_entry = Some(i as u32);
                        new_level = n.level();
                    }
                }
            }
            inner.graph.entry = new_entry;
            inner.graph.entry_level = new_level;
            debug!(?new_entry, new_level, "HNSW entry point repaired after removal");
        }

        true
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.graph.nodes.clear();
        inner.graph.free.clear();
        inner.graph.entry = None;
        inner.graph.entry_level = 0;
        inner.id_map.clear();
        inner.externals.clear();
        inner.count = 0;
    }

    pub fn stats(&self) -> HnswStats {
        let inner = self.inner.read();
        let mut size_bytes = 0usize;
        for slot in inner.graph.nodes.iter().flatten() {
            size_bytes += slot.vector.len() * 4;
            size_bytes += slot.neighbors.iter().map(|l| l.len() * 4 + 24).sum::<usize>();
        }
        for ext in inner.externals.iter().flatten() {
            size_bytes += ext.len() + 24;
        }
        HnswStats {
            count: inner.count,
            dimension: self.params.dimension,
            m: self.params.m,
            ef_search: self.params.ef_search,
            size_bytes,
        }
    }

    /// Persist the graph and the external⇄internal id map. Both files are
    /// written via temp-file-and-rename.
    pub fn save(&self, index_path: &Path, mapping_path: &Path) -> Result<()> {
        let inner = self.inner.read();
        write_atomic(index_path, &serde_json::to_vec(&inner.graph)?)?;
        let mapping: Vec<(&String, &u32)> = inner.id_map.iter().collect();
        write_atomic(mapping_path, &serde_json::to_vec(&mapping)?)?;
        info!(count = inner.count, path = %index_path.display(), "HNSW index saved");
        Ok(())
    }

    /// Restore a persisted graph. The stored dimension must match the
    /// configured one; `ef_search` comes from `params` so it stays tunable.
    pub fn load(index_path: &Path, mapping_path: &Path, params: HnswParams) -> Result<Self> {
        let graph_bytes = std::fs::read(index_path)?;
        let graph: Graph = serde_json::from_slice(&graph_bytes)
            .map_err(|e| Error::Corrupted(format!("HNSW graph file unreadable: {e}")))?;
        if graph.dimension != params.dimension {
            return Err(Error::DimensionMismatch {
                expected: graph.dimension,
                actual: params.dimension,
            });
        }

        let mapping_bytes = std::fs::read(mapping_path)?;
        let mapping: Vec<(String, u32)> = serde_json::from_slice(&mapping_bytes)
            .map_err(|e| Error::Corrupted(format!("HNSW mapping file unreadable: {e}")))?;

        let mut externals: Vec<Option<String>> = vec![None; graph.nodes.len()];
        let mut id_map = HashMap::with_capacity(mapping.len());
        for (external, internal) in mapping {
            let slot = graph
                .nodes
                .get(internal as usize)
                .and_then(|n| n.as_ref());
            if slot.is_none() {
                return Err(Error::Corrupted(format!(
                    "mapping points at missing node {internal}"
                )));
            }
            externals[internal as usize] = Some(external.clone());
            id_map.insert(external, internal);
        }
        let count = id_map.len();

        info!(count, path = %index_path.display(), "HNSW index loaded");
        Ok(Self {
            params: HnswParams {
                dimension: graph.dimension,
                m: graph.m,
                ef_construction: graph.ef_construction,
                ef_search: params.ef_search,
            },
            inner: RwLock::new(Inner { graph, id_map, externals, count }),
        })
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
