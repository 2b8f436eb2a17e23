//! Hierarchical navigable small-world graph.
//!
//! The graph stores only adjacency; vectors are borrowed from the caller by
//! slot number at build and search time, so a loaded index never holds a
//! second copy of the data.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use ahash::AHashSet;
use rand::prelude::*;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::error::{QuiverError, Result};
use crate::schema::MetricType;

/// Levels above this are never assigned; keeps pathological draws bounded.
const MAX_LEVEL: usize = 16;

/// Graph construction and search parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswConfig {
    /// Target number of links per node on upper layers.
    pub m: usize,
    /// Link cap on layers above 0.
    pub m_max: usize,
    /// Link cap on layer 0, usually `2 * m`.
    pub m_max0: usize,
    /// Candidate list size while inserting.
    pub ef_construction: usize,
    /// Candidate list size while searching.
    pub ef_search: usize,
    /// Level multiplier, `1 / ln(m)`.
    pub ml: f64,
    /// Fixes level assignment for reproducible graphs.
    pub seed: Option<u64>,
}

impl HnswConfig {
    pub fn new(m: usize) -> Self {
        Self {
            m,
            m_max: m,
            m_max0: m * 2,
            ef_construction: 200,
            ef_search: 50,
            ml: 1.0 / (m as f64).ln(),
            seed: None,
        }
    }

    /// Change `m` and the values derived from it.
    pub fn with_m(self, m: usize) -> Self {
        Self {
            ef_construction: self.ef_construction,
            ef_search: self.ef_search,
            seed: self.seed,
            ..Self::new(m)
        }
    }

    pub fn with_ef_construction(mut self, ef: usize) -> Self {
        self.ef_construction = ef;
        self
    }

    pub fn with_ef_search(mut self, ef: usize) -> Self {
        self.ef_search = ef;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// The first constraint these settings break, if any.
    pub fn violation(&self) -> Option<&'static str> {
        if self.m < 2 {
            Some("m must be >= 2")
        } else if self.ef_construction < self.m {
            Some("ef_construction must be >= m")
        } else if self.ef_search == 0 {
            Some("ef_search must be > 0")
        } else {
            None
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.violation() {
            Some(problem) => Err(QuiverError::invalid_config(format!("hnsw.{problem}"))),
            None => Ok(()),
        }
    }

    fn max_connections(&self, layer: usize) -> usize {
        if layer == 0 { self.m_max0 } else { self.m_max }
    }
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self::new(16)
    }
}

/// A slot and its rank key. Orders by key, then slot, so results are
/// deterministic when distances tie.
#[derive(Debug, Clone, Copy)]
struct Scored {
    key: f32,
    slot: u32,
}

impl PartialEq for Scored {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .total_cmp(&other.key)
            .then(self.slot.cmp(&other.slot))
    }
}

/// An immutable-after-build HNSW graph over slots `0..len`.
#[derive(Debug, Clone)]
pub struct HnswGraph {
    /// `links[slot][layer]` = neighbor slots.
    links: Vec<Vec<Vec<u32>>>,
    entry_point: Option<u32>,
    max_layer: usize,
    metric: MetricType,
    config: HnswConfig,
}

impl HnswGraph {
    /// Build a graph over `vectors`, inserting them in slot order.
    pub fn build<V: AsRef<[f32]>>(vectors: &[V], metric: MetricType, config: &HnswConfig) -> Self {
        let mut builder = GraphBuilder {
            graph: HnswGraph {
                links: Vec::with_capacity(vectors.len()),
                entry_point: None,
                max_layer: 0,
                metric,
                config: config.clone(),
            },
            rng: match config.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_os_rng(),
            },
        };
        for slot in 0..vectors.len() {
            builder.insert(vectors, slot as u32);
        }
        builder.graph
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn ef_search(&self) -> usize {
        self.config.ef_search
    }

    /// Approximate `k` nearest slots as `(slot, rank_key)`, closest first.
    pub fn search<V: AsRef<[f32]>>(
        &self,
        vectors: &[V],
        query: &[f32],
        k: usize,
        ef: usize,
    ) -> Vec<(u32, f32)> {
        let Some(entry) = self.entry_point else {
            return Vec::new();
        };
        if k == 0 {
            return Vec::new();
        }

        let mut current = self.score(vectors, query, entry);
        for layer in (1..=self.max_layer).rev() {
            current = self.greedy_search_layer(vectors, query, current, layer);
        }

        self.search_layer(vectors, query, &[current], ef.max(k), 0)
            .into_iter()
            .take(k)
            .map(|s| (s.slot, s.key))
            .collect()
    }

    fn score<V: AsRef<[f32]>>(&self, vectors: &[V], query: &[f32], slot: u32) -> Scored {
        Scored {
            key: self.metric.rank_key(query, vectors[slot as usize].as_ref()),
            slot,
        }
    }

    fn neighbors(&self, slot: u32, layer: usize) -> &[u32] {
        self.links[slot as usize]
            .get(layer)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn greedy_search_layer<V: AsRef<[f32]>>(
        &self,
        vectors: &[V],
        query: &[f32],
        start: Scored,
        layer: usize,
    ) -> Scored {
        let mut best = start;
        let mut changed = true;
        while changed {
            changed = false;
            for &neighbor in self.neighbors(best.slot, layer) {
                let candidate = self.score(vectors, query, neighbor);
                if candidate < best {
                    best = candidate;
                    changed = true;
                }
            }
        }
        best
    }

    /// Beam search on one layer; returns up to `ef` slots sorted closest first.
    fn search_layer<V: AsRef<[f32]>>(
        &self,
        vectors: &[V],
        query: &[f32],
        entry_points: &[Scored],
        ef: usize,
        layer: usize,
    ) -> Vec<Scored> {
        let mut visited: AHashSet<u32> = entry_points.iter().map(|s| s.slot).collect();
        let mut candidates: BinaryHeap<Reverse<Scored>> =
            entry_points.iter().copied().map(Reverse).collect();
        let mut results: BinaryHeap<Scored> = entry_points.iter().copied().collect();
        while results.len() > ef {
            results.pop();
        }

        while let Some(Reverse(current)) = candidates.pop() {
            if let Some(worst) = results.peek()
                && results.len() >= ef
                && current > *worst
            {
                break;
            }

            for &neighbor in self.neighbors(current.slot, layer) {
                if !visited.insert(neighbor) {
                    continue;
                }
                let candidate = self.score(vectors, query, neighbor);
                let admit = results.len() < ef || results.peek().is_some_and(|w| candidate < *w);
                if admit {
                    candidates.push(Reverse(candidate));
                    results.push(candidate);
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        results.into_sorted_vec()
    }

    /// Keep candidates that are closer to the base than to any already
    /// selected neighbor, topping up with the rejected ones if short.
    fn select_neighbors<V: AsRef<[f32]>>(
        &self,
        vectors: &[V],
        candidates: &[Scored],
        m: usize,
    ) -> Vec<u32> {
        if candidates.len() <= m {
            return candidates.iter().map(|s| s.slot).collect();
        }

        let mut selected: Vec<Scored> = Vec::with_capacity(m);
        let mut discarded: Vec<Scored> = Vec::new();
        for &candidate in candidates {
            if selected.len() >= m {
                break;
            }
            let vector = vectors[candidate.slot as usize].as_ref();
            let dominated = selected.iter().any(|chosen| {
                self.metric
                    .rank_key(vector, vectors[chosen.slot as usize].as_ref())
                    < candidate.key
            });
            if dominated {
                discarded.push(candidate);
            } else {
                selected.push(candidate);
            }
        }

        for candidate in discarded {
            if selected.len() >= m {
                break;
            }
            selected.push(candidate);
        }

        selected.iter().map(|s| s.slot).collect()
    }
}

struct GraphBuilder {
    graph: HnswGraph,
    rng: StdRng,
}

impl GraphBuilder {
    fn random_level(&mut self) -> usize {
        // (0, 1] so ln never sees zero
        let r: f64 = 1.0 - self.rng.random::<f64>();
        ((-r.ln() * self.graph.config.ml).floor() as usize).min(MAX_LEVEL)
    }

    fn insert<V: AsRef<[f32]>>(&mut self, vectors: &[V], slot: u32) {
        let level = self.random_level();
        self.graph.links.push(vec![Vec::new(); level + 1]);

        let Some(entry) = self.graph.entry_point else {
            self.graph.entry_point = Some(slot);
            self.graph.max_layer = level;
            return;
        };

        let graph = &mut self.graph;
        let query = vectors[slot as usize].as_ref();
        let mut current = graph.score(vectors, query, entry);
        for layer in (level + 1..=graph.max_layer).rev() {
            current = graph.greedy_search_layer(vectors, query, current, layer);
        }

        let mut entry_points = vec![current];
        for layer in (0..=level.min(graph.max_layer)).rev() {
            let candidates =
                graph.search_layer(vectors, query, &entry_points, graph.config.ef_construction, layer);
            let max_conn = graph.config.max_connections(layer);
            let neighbors = graph.select_neighbors(vectors, &candidates, max_conn);

            for &neighbor in &neighbors {
                let links = &mut graph.links[neighbor as usize][layer];
                if !links.contains(&slot) {
                    links.push(slot);
                }
                if links.len() > max_conn {
                    let base = vectors[neighbor as usize].as_ref();
                    let mut scored: Vec<Scored> = graph.links[neighbor as usize][layer]
                        .iter()
                        .map(|&n| Scored {
                            key: graph.metric.rank_key(base, vectors[n as usize].as_ref()),
                            slot: n,
                        })
                        .collect();
                    scored.sort();
                    let pruned = graph.select_neighbors(vectors, &scored, max_conn);
                    graph.links[neighbor as usize][layer] = pruned;
                }
            }
            graph.links[slot as usize][layer] = neighbors;

            if !candidates.is_empty() {
                entry_points = candidates;
            }
        }

        if level > graph.max_layer {
            graph.entry_point = Some(slot);
            graph.max_layer = level;
        }
    }
}
