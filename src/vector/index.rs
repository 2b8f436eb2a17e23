//! The vector index: durable vectors plus an optional loaded search structure.
//!
//! Vectors are always kept in `entries`, whatever the load state. Loading
//! takes a point-in-time [`LoadPlan`], builds a [`LoadedIndex`] from it
//! (possibly on another thread) and installs it. Changes made after the plan
//! was taken are tracked as a [`ChangeSet`] (delta ids plus tombstones) and
//! merged into every query, so results stay exact with respect to the durable
//! data until the next load rebuilds the structure. While a rebuild is in
//! flight the installed structure keeps its own change set.

use std::cmp::Ordering;
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use log::debug;
use rayon::prelude::*;

use crate::config::QuiverConfig;
use crate::error::IndexError;
use crate::schema::{IndexParams, IndexType, MetricType};
use crate::vector::distance::compare_ranked;
use crate::vector::hnsw::{HnswConfig, HnswGraph};

/// Flat scans over at least this many vectors are split across the rayon pool.
const PARALLEL_SCAN_THRESHOLD: usize = 8192;

/// A loaded structure is rebuilt in place once its change set tracks more
/// than this many ids, or more than a quarter of its slots if that is larger.
const REBUILD_MIN_CHANGES: usize = 256;
const REBUILD_FRACTION: usize = 4;

/// Search structure used once the index is loaded.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexKind {
    /// Exact scan.
    Flat,
    /// Approximate graph search.
    Hnsw(HnswConfig),
    /// Flat below `threshold` vectors at load time, graph otherwise.
    Auto { threshold: usize, hnsw: HnswConfig },
}

impl IndexKind {
    /// Resolve a declared index against engine defaults.
    pub fn from_params(params: &IndexParams, config: &QuiverConfig) -> Self {
        let hnsw = params.params.resolve(&config.hnsw);
        match params.index_type {
            IndexType::Flat => IndexKind::Flat,
            IndexType::Hnsw => IndexKind::Hnsw(hnsw),
            IndexType::AutoIndex => IndexKind::Auto {
                threshold: config.auto_index_threshold,
                hnsw,
            },
        }
    }

    fn graph_config(&self, len: usize) -> Option<&HnswConfig> {
        match self {
            IndexKind::Flat => None,
            IndexKind::Hnsw(config) => Some(config),
            IndexKind::Auto { threshold, hnsw } if len >= *threshold => Some(hnsw),
            IndexKind::Auto { .. } => None,
        }
    }
}

/// A ranked id returned by [`VectorIndex::search`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredId {
    pub id: String,
    /// Distance for COSINE and L2, inner product for IP.
    pub distance: f32,
}

/// Ids changed since a load plan was taken.
#[derive(Debug, Default)]
struct ChangeSet {
    /// Ids whose current vector is not in the structure.
    delta: AHashSet<String>,
    /// Ids whose slot in the structure is stale.
    tombstones: AHashSet<String>,
}

impl ChangeSet {
    fn record_put(&mut self, id: &str, existed: bool) {
        if existed {
            self.tombstones.insert(id.to_string());
        }
        self.delta.insert(id.to_string());
    }

    fn record_remove(&mut self, id: &str) {
        self.delta.remove(id);
        self.tombstones.insert(id.to_string());
    }

    fn len(&self) -> usize {
        self.delta.len() + self.tombstones.len()
    }
}

#[derive(Debug, Clone)]
struct VectorEntry {
    seq: u64,
    vector: Arc<[f32]>,
}

#[derive(Debug, Clone)]
struct Slot {
    id: String,
    seq: u64,
    vector: Arc<[f32]>,
}

impl AsRef<[f32]> for Slot {
    fn as_ref(&self) -> &[f32] {
        &self.vector
    }
}

/// Snapshot of the vectors to build a [`LoadedIndex`] from.
#[derive(Debug)]
pub struct LoadPlan {
    epoch: u64,
    metric: MetricType,
    kind: IndexKind,
    slots: Vec<Slot>,
}

impl LoadPlan {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Build the search structure. CPU bound for graph indexes.
    pub fn build(self) -> LoadedIndex {
        let graph = self
            .kind
            .graph_config(self.slots.len())
            .map(|config| HnswGraph::build(&self.slots, self.metric, config));
        debug!(
            "built {} index over {} vectors",
            if graph.is_some() { "graph" } else { "flat" },
            self.slots.len()
        );
        LoadedIndex {
            epoch: self.epoch,
            slots: self.slots,
            graph,
        }
    }
}

/// An immutable, shareable search structure.
#[derive(Debug)]
pub struct LoadedIndex {
    epoch: u64,
    slots: Vec<Slot>,
    graph: Option<HnswGraph>,
}

impl LoadedIndex {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn uses_graph(&self) -> bool {
        self.graph.is_some()
    }
}

/// Maps primary keys to vectors and answers k-nearest-neighbor queries.
#[derive(Debug)]
pub struct VectorIndex {
    dim: usize,
    metric: MetricType,
    kind: IndexKind,
    entries: AHashMap<String, VectorEntry>,
    next_seq: u64,
    loaded: Option<Arc<LoadedIndex>>,
    /// Changes relative to `loaded`; present iff `loaded` is.
    live_changes: Option<ChangeSet>,
    /// Changes relative to the most recent unfinished plan.
    pending_changes: Option<ChangeSet>,
    load_epoch: u64,
}

impl VectorIndex {
    /// Create an empty, unloaded index.
    pub fn build(dim: usize, metric: MetricType, kind: IndexKind) -> Self {
        VectorIndex {
            dim,
            metric,
            kind,
            entries: AHashMap::new(),
            next_seq: 0,
            loaded: None,
            live_changes: None,
            pending_changes: None,
            load_epoch: 0,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn metric(&self) -> MetricType {
        self.metric
    }

    pub fn kind(&self) -> &IndexKind {
        &self.kind
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    /// The currently installed search structure, if any.
    pub fn loaded(&self) -> Option<&Arc<LoadedIndex>> {
        self.loaded.as_ref()
    }

    /// Sequence number the next new id will receive.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn get(&self, id: &str) -> Option<Arc<[f32]>> {
        self.entries.get(id).map(|entry| Arc::clone(&entry.vector))
    }

    /// Insertion sequence of `id`.
    pub fn seq_of(&self, id: &str) -> Option<u64> {
        self.entries.get(id).map(|entry| entry.seq)
    }

    /// Validate a vector without storing it.
    pub fn check(&self, id: &str, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(IndexError::InvalidVector(id.to_string()));
        }
        Ok(())
    }

    /// Insert or overwrite a vector. An overwrite keeps the id's original
    /// insertion position.
    pub fn add(
        &mut self,
        id: impl Into<String>,
        vector: impl Into<Arc<[f32]>>,
    ) -> Result<(), IndexError> {
        let id = id.into();
        let vector = vector.into();
        self.check(&id, &vector)?;

        let seq = match self.entries.get(&id) {
            Some(existing) => existing.seq,
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                seq
            }
        };
        self.put(id, seq, vector);
        Ok(())
    }

    /// Insert a vector with a known sequence number, as read back from a
    /// snapshot.
    pub fn restore(
        &mut self,
        id: impl Into<String>,
        seq: u64,
        vector: impl Into<Arc<[f32]>>,
    ) -> Result<(), IndexError> {
        let id = id.into();
        let vector = vector.into();
        self.check(&id, &vector)?;
        self.next_seq = self.next_seq.max(seq + 1);
        self.put(id, seq, vector);
        Ok(())
    }

    fn put(&mut self, id: String, seq: u64, vector: Arc<[f32]>) {
        let existed = self.entries.contains_key(&id);
        for changes in [&mut self.live_changes, &mut self.pending_changes]
            .into_iter()
            .flatten()
        {
            changes.record_put(&id, existed);
        }
        self.entries.insert(id, VectorEntry { seq, vector });
        self.rebuild_if_stale();
    }

    /// Remove a vector. Returns whether it was present.
    pub fn remove(&mut self, id: &str) -> bool {
        let removed = self.entries.remove(id).is_some();
        if removed {
            for changes in [&mut self.live_changes, &mut self.pending_changes]
                .into_iter()
                .flatten()
            {
                changes.record_remove(id);
            }
            self.rebuild_if_stale();
        }
        removed
    }

    /// Whether a prepared plan is waiting to be installed.
    pub fn is_building(&self) -> bool {
        self.pending_changes.is_some()
    }

    /// Ids tracked on top of the installed structure.
    pub fn change_count(&self) -> usize {
        self.live_changes.as_ref().map_or(0, ChangeSet::len)
    }

    /// Rebuild the installed structure once its change set outgrows it.
    /// Skipped while a load is in flight; installing that one resets the
    /// change set anyway.
    fn rebuild_if_stale(&mut self) {
        let (Some(loaded), Some(changes)) = (&self.loaded, &self.live_changes) else {
            return;
        };
        let limit = REBUILD_MIN_CHANGES.max(loaded.len() / REBUILD_FRACTION);
        if self.pending_changes.is_some() || changes.len() <= limit {
            return;
        }
        debug!(
            "rebuilding search structure: {} changes over {} slots",
            changes.len(),
            loaded.len()
        );
        self.load();
    }

    /// Ids with their sequence numbers and vectors, in insertion order.
    pub fn entries_in_order(&self) -> Vec<(&str, u64, &[f32])> {
        let mut entries: Vec<(&str, u64, &[f32])> = self
            .entries
            .iter()
            .map(|(id, entry)| (id.as_str(), entry.seq, &*entry.vector))
            .collect();
        entries.sort_unstable_by_key(|(_, seq, _)| *seq);
        entries
    }

    /// Snapshot the current vectors for building. Changes made from here on
    /// are tracked until the structure is installed. An already installed
    /// structure keeps serving queries meanwhile.
    pub fn prepare_load(&mut self) -> LoadPlan {
        self.load_epoch += 1;
        self.pending_changes = Some(ChangeSet::default());

        let mut slots: Vec<Slot> = self
            .entries
            .iter()
            .map(|(id, entry)| Slot {
                id: id.clone(),
                seq: entry.seq,
                vector: Arc::clone(&entry.vector),
            })
            .collect();
        slots.sort_unstable_by_key(|slot| slot.seq);

        LoadPlan {
            epoch: self.load_epoch,
            metric: self.metric,
            kind: self.kind.clone(),
            slots,
        }
    }

    /// Install a built structure. Returns false, leaving the index untouched,
    /// if a newer plan has been prepared since `loaded` was planned.
    pub fn install(&mut self, loaded: LoadedIndex) -> bool {
        if loaded.epoch != self.load_epoch {
            return false;
        }
        let Some(changes) = self.pending_changes.take() else {
            return false;
        };
        self.loaded = Some(Arc::new(loaded));
        self.live_changes = Some(changes);
        true
    }

    /// Forget the plan prepared at `epoch` if it was never installed. The
    /// installed structure, if any, stays as it is.
    pub fn abandon_load(&mut self, epoch: u64) {
        if epoch == self.load_epoch && self.pending_changes.take().is_some() {
            debug!("abandoned index build {epoch}");
        }
    }

    /// Build and install synchronously.
    pub fn load(&mut self) {
        let plan = self.prepare_load();
        let loaded = plan.build();
        self.install(loaded);
    }

    /// Drop the search structure; durable vectors stay.
    pub fn unload(&mut self) {
        self.loaded = None;
        self.live_changes = None;
        self.pending_changes = None;
        self.load_epoch += 1;
    }

    /// Up to `k` nearest ids, best first. Equal distances rank by insertion
    /// order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredId>, IndexError> {
        let (Some(loaded), Some(changes)) = (&self.loaded, &self.live_changes) else {
            return Err(IndexError::NotLoaded);
        };
        self.check("<query>", query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let metric = self.metric;
        let live = |slot: &Slot| !changes.tombstones.contains(&slot.id);
        let mut ranked: Vec<(f32, u64, &str)> = match &loaded.graph {
            Some(graph) => {
                let fetch = k + changes.tombstones.len();
                let ef = graph.ef_search().max(fetch);
                graph
                    .search(&loaded.slots, query, fetch, ef)
                    .into_iter()
                    .map(|(slot, key)| (&loaded.slots[slot as usize], key))
                    .filter(|&(slot, _)| live(slot))
                    .map(|(slot, key)| (key, slot.seq, slot.id.as_str()))
                    .collect()
            }
            None if loaded.slots.len() >= PARALLEL_SCAN_THRESHOLD => loaded
                .slots
                .par_iter()
                .filter(|&slot| live(slot))
                .map(|slot| (metric.rank_key(query, &slot.vector), slot.seq, slot.id.as_str()))
                .collect(),
            None => loaded
                .slots
                .iter()
                .filter(|&slot| live(slot))
                .map(|slot| (metric.rank_key(query, &slot.vector), slot.seq, slot.id.as_str()))
                .collect(),
        };

        for id in &changes.delta {
            if let Some(entry) = self.entries.get(id) {
                ranked.push((metric.rank_key(query, &entry.vector), entry.seq, id.as_str()));
            }
        }

        fn by_rank(a: &(f32, u64, &str), b: &(f32, u64, &str)) -> Ordering {
            compare_ranked((a.0, a.1), (b.0, b.1))
        }
        if ranked.len() > k {
            ranked.select_nth_unstable_by(k - 1, by_rank);
            ranked.truncate(k);
        }
        ranked.sort_unstable_by(by_rank);

        Ok(ranked
            .into_iter()
            .map(|(key, _, id)| ScoredId {
                id: id.to_string(),
                distance: metric.report(key),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(metric: MetricType) -> VectorIndex {
        VectorIndex::build(2, metric, IndexKind::Flat)
    }

    fn ids(results: &[ScoredId]) -> Vec<&str> {
        results.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_search_requires_load() {
        let mut index = flat(MetricType::L2);
        index.add("a", vec![0.0, 0.0]).unwrap();
        assert_eq!(index.search(&[0.0, 0.0], 1), Err(IndexError::NotLoaded));

        index.load();
        assert_eq!(ids(&index.search(&[0.0, 0.0], 1).unwrap()), vec!["a"]);

        index.unload();
        assert_eq!(index.search(&[0.0, 0.0], 1), Err(IndexError::NotLoaded));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_dimension_checks() {
        let mut index = flat(MetricType::L2);
        assert_eq!(
            index.add("a", vec![1.0, 2.0, 3.0]),
            Err(IndexError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        );
        assert!(matches!(
            index.add("a", vec![f32::NAN, 0.0]),
            Err(IndexError::InvalidVector(_))
        ));
        assert!(index.is_empty());

        index.load();
        assert!(matches!(
            index.search(&[1.0], 1),
            Err(IndexError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_ordering_per_metric() {
        let mut l2 = flat(MetricType::L2);
        let mut ip = flat(MetricType::Ip);
        for index in [&mut l2, &mut ip] {
            index.add("near", vec![1.0, 0.0]).unwrap();
            index.add("far", vec![3.0, 0.0]).unwrap();
            index.add("opposite", vec![-1.0, 0.0]).unwrap();
            index.load();
        }

        let results = l2.search(&[1.0, 0.0], 3).unwrap();
        assert_eq!(ids(&results), vec!["near", "opposite", "far"]);
        assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));

        let results = ip.search(&[1.0, 0.0], 3).unwrap();
        assert_eq!(ids(&results), vec!["far", "near", "opposite"]);
        assert_eq!(results[0].distance, 3.0);
        assert!(results.windows(2).all(|w| w[0].distance >= w[1].distance));
    }

    #[test]
    fn test_ties_break_by_insertion_order_and_overwrite_keeps_position() {
        let mut index = flat(MetricType::Cosine);
        index.add("b", vec![1.0, 0.0]).unwrap();
        index.add("a", vec![2.0, 0.0]).unwrap();
        index.add("c", vec![0.0, 1.0]).unwrap();
        // same direction as before, so still tied with "a"
        index.add("b", vec![5.0, 0.0]).unwrap();
        index.load();

        let results = index.search(&[1.0, 0.0], 3).unwrap();
        assert_eq!(ids(&results), vec!["b", "a", "c"]);
        assert_eq!(index.seq_of("b"), Some(0));
    }

    #[test]
    fn test_changes_after_load_are_visible() {
        let mut index = flat(MetricType::L2);
        index.add("a", vec![0.0, 0.0]).unwrap();
        index.add("b", vec![5.0, 5.0]).unwrap();
        index.load();

        index.add("c", vec![0.1, 0.0]).unwrap();
        index.add("a", vec![9.0, 9.0]).unwrap();
        assert!(index.remove("b"));
        assert!(!index.remove("missing"));

        let results = index.search(&[0.0, 0.0], 10).unwrap();
        assert_eq!(ids(&results), vec!["c", "a"]);
        assert!((results[1].distance - (162.0f32).sqrt()).abs() < 1e-4);
    }

    #[test]
    fn test_rebuild_in_flight_keeps_serving_changes() {
        let mut index = flat(MetricType::L2);
        index.add("a", vec![0.0, 0.0]).unwrap();
        index.load();

        index.add("b", vec![1.0, 0.0]).unwrap();
        let plan = index.prepare_load();
        index.add("c", vec![2.0, 0.0]).unwrap();
        index.remove("a");

        // the old structure still answers, with every change applied
        let results = index.search(&[0.0, 0.0], 10).unwrap();
        assert_eq!(ids(&results), vec!["b", "c"]);

        assert!(index.install(plan.build()));
        let results = index.search(&[0.0, 0.0], 10).unwrap();
        assert_eq!(ids(&results), vec!["b", "c"]);
    }

    #[test]
    fn test_k_zero_and_k_larger_than_len() {
        let mut index = flat(MetricType::L2);
        index.add("a", vec![0.0, 0.0]).unwrap();
        index.load();
        assert!(index.search(&[0.0, 0.0], 0).unwrap().is_empty());
        assert_eq!(index.search(&[0.0, 0.0], 50).unwrap().len(), 1);
    }

    #[test]
    fn test_stale_plan_is_not_installed() {
        let mut index = flat(MetricType::L2);
        index.add("a", vec![0.0, 0.0]).unwrap();
        let stale = index.prepare_load();
        let fresh = index.prepare_load();
        assert!(!index.install(stale.build()));
        assert!(index.install(fresh.build()));

        let plan = index.prepare_load();
        index.unload();
        assert!(!index.install(plan.build()));
        assert!(!index.is_loaded());
    }

    #[test]
    fn test_auto_index_switches_to_graph() {
        let config = HnswConfig::new(4).with_seed(1);
        let mut small = VectorIndex::build(
            2,
            MetricType::L2,
            IndexKind::Auto {
                threshold: 10,
                hnsw: config.clone(),
            },
        );
        let mut large = VectorIndex::build(
            2,
            MetricType::L2,
            IndexKind::Auto {
                threshold: 10,
                hnsw: config,
            },
        );
        for i in 0..5 {
            small.add(format!("s{i}"), vec![i as f32, 0.0]).unwrap();
        }
        for i in 0..20 {
            large.add(format!("l{i}"), vec![i as f32, 0.0]).unwrap();
        }
        small.load();
        large.load();
        assert!(!small.loaded().unwrap().uses_graph());
        assert!(large.loaded().unwrap().uses_graph());

        large.remove("l3");
        let results = large.search(&[3.0, 0.0], 2).unwrap();
        assert_eq!(results.len(), 2);
        assert!(!ids(&results).contains(&"l3"));
    }

    #[test]
    fn test_restore_advances_sequence() {
        let mut index = flat(MetricType::L2);
        index.restore("x", 41, vec![1.0, 1.0]).unwrap();
        index.add("y", vec![2.0, 2.0]).unwrap();
        assert_eq!(index.seq_of("y"), Some(42));
        let order: Vec<&str> = index.entries_in_order().iter().map(|e| e.0).collect();
        assert_eq!(order, vec!["x", "y"]);
    }

    #[test]
    fn test_change_set_stays_bounded() {
        let mut index = flat(MetricType::L2);
        for i in 0..100 {
            index.add(format!("k{i}"), vec![i as f32, 0.0]).unwrap();
        }
        index.load();

        let mut peak = 0;
        for round in 1..=20 {
            for i in 0..100 {
                index.add(format!("k{i}"), vec![i as f32, round as f32]).unwrap();
                peak = peak.max(index.change_count());
            }
            for j in 0..30 {
                let fresh = format!("tmp{round}_{j}");
                index.add(fresh.as_str(), vec![0.0, 0.0]).unwrap();
                assert!(index.remove(&fresh));
                peak = peak.max(index.change_count());
            }
        }
        assert!(peak <= REBUILD_MIN_CHANGES, "change set grew to {peak}");
        assert!(peak > 0);

        let results = index.search(&[7.0, 20.0], 3).unwrap();
        assert_eq!(results[0].id, "k7");
        assert!(results[0].distance.abs() < 1e-6);
        assert!(!ids(&index.search(&[0.0, 0.0], 200).unwrap()).contains(&"tmp20_0"));
    }

    #[test]
    fn test_abandoned_plan_stops_tracking() {
        let mut index = flat(MetricType::L2);
        index.add("a", vec![0.0, 0.0]).unwrap();
        index.load();

        let plan = index.prepare_load();
        index.abandon_load(plan.epoch());
        assert!(!index.is_building());
        for i in 0..(REBUILD_MIN_CHANGES * 2) {
            index.add(format!("n{i}"), vec![i as f32, 1.0]).unwrap();
        }
        assert!(index.change_count() <= REBUILD_MIN_CHANGES);
        assert!(!index.install(plan.build()));
        assert_eq!(index.search(&[0.0, 0.0], 1).unwrap()[0].id, "a");
    }
}
