//! The online HNSW index.
//!
//! [`HnswIndex`] wraps the mutable graph state in a `parking_lot::RwLock`: `add`,
//! `remove` and `clear` take the write lock, everything else (search, stats, save) a
//! read lock. Per-thread [`SearchScratch`](crate::hnsw::scratch::SearchScratch) means
//! concurrent readers only ever share the lock itself.

use std::collections::HashMap;

use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::debug;

use crate::error::{HnswError, Result};
use crate::hnsw::graph::{Graph, HnswConfig};
use crate::hnsw::heap::Neighbor;
use crate::hnsw::scratch::{with_scratch, SearchScratch};
use crate::hnsw::search::{filter_candidates, GraphView, Selection};
use crate::hnsw::space::Space;

/// Id stored for slots that hold no vector.
pub(crate) const EMPTY_ID: i64 = -1;

/// A single search hit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SearchResult {
    pub id: i64,
    pub distance: f64,
}

/// Structural statistics of an index, computed over live nodes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    /// Live vectors.
    pub size: usize,
    /// Allocated slots, live or free.
    pub total_nodes: usize,
    pub max_level: usize,
    pub total_edges: usize,
    pub average_level: f64,
    /// Out-degree summed over all levels, averaged per live node.
    pub average_degree: f64,
    pub average_degree_level0: f64,
    /// Approximate heap footprint of vectors, statistics, graph and id maps.
    pub memory_bytes: usize,
}

/// Maps a uniform draw `r` in `[0, 1)` to `floor(-ln(1 - r) * lambda)`, capped at the
/// top layer.
pub(crate) fn level_for_draw(r: f64, config: &HnswConfig) -> usize {
    let u = (1.0 - r).max(1e-12);
    let level = (-u.ln() * config.level_lambda).floor();
    (level.max(0.0) as usize).min(config.max_layers - 1)
}

/// External id ↔ slot mapping plus the free list.
#[derive(Debug, Clone, Default)]
pub(crate) struct NodeDirectory {
    id_to_slot: HashMap<i64, u32>,
    slot_to_id: Vec<i64>,
    free: Vec<u32>,
    node_count: usize,
}

impl NodeDirectory {
    pub fn new(capacity: usize) -> Self {
        Self {
            id_to_slot: HashMap::with_capacity(capacity),
            slot_to_id: vec![EMPTY_ID; capacity],
            free: Vec::new(),
            node_count: 0,
        }
    }

    /// Live ids.
    pub fn len(&self) -> usize {
        self.id_to_slot.len()
    }

    /// High-water mark of allocated slots.
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn slot_ids(&self) -> &[i64] {
        &self.slot_to_id[..self.node_count]
    }

    #[inline]
    pub fn lookup(&self, id: i64) -> Option<u32> {
        self.id_to_slot.get(&id).copied()
    }

    #[inline]
    pub fn id_of(&self, slot: u32) -> Option<i64> {
        self.slot_to_id
            .get(slot as usize)
            .copied()
            .filter(|&id| id != EMPTY_ID)
    }

    pub fn ensure_capacity(&mut self, slots: usize) {
        if slots > self.slot_to_id.len() {
            self.slot_to_id.resize(slots, EMPTY_ID);
        }
    }

    /// Pops a free slot, or grows by one.
    pub fn allocate(&mut self) -> u32 {
        if let Some(slot) = self.free.pop() {
            return slot;
        }
        let slot = self.node_count as u32;
        self.node_count += 1;
        self.ensure_capacity(self.node_count);
        slot
    }

    pub fn register(&mut self, id: i64, slot: u32) {
        if let Some(previous) = self.id_of(slot) {
            self.id_to_slot.remove(&previous);
        }
        self.slot_to_id[slot as usize] = id;
        self.id_to_slot.insert(id, slot);
    }

    /// Forgets the id held by `slot`.
    pub fn unregister(&mut self, slot: u32) -> Option<i64> {
        let id = self.id_of(slot)?;
        if self.id_to_slot.get(&id) == Some(&slot) {
            self.id_to_slot.remove(&id);
        }
        self.slot_to_id[slot as usize] = EMPTY_ID;
        Some(id)
    }

    pub fn release(&mut self, slot: u32) {
        self.free.push(slot);
    }

    /// Rebuilds every derived structure from a slot → id array. Slots whose id is
    /// negative or duplicated, or for which `is_live` is false, become free.
    /// Returns the slots that were freed.
    pub fn rebuild(&mut self, slot_ids: Vec<i64>, is_live: impl Fn(u32) -> bool) -> Vec<u32> {
        self.node_count = slot_ids.len();
        self.id_to_slot = HashMap::with_capacity(slot_ids.len());
        self.slot_to_id = slot_ids;
        self.free.clear();
        let mut freed = Vec::new();
        for slot in 0..self.node_count as u32 {
            let id = self.slot_to_id[slot as usize];
            let live = id >= 0 && is_live(slot) && !self.id_to_slot.contains_key(&id);
            if live {
                self.id_to_slot.insert(id, slot);
            } else {
                self.slot_to_id[slot as usize] = EMPTY_ID;
                freed.push(slot);
            }
        }
        // lowest slots are reused first
        self.free.extend(freed.iter().rev());
        freed
    }

    pub fn memory_bytes(&self) -> usize {
        self.id_to_slot.capacity() * (std::mem::size_of::<i64>() + std::mem::size_of::<u32>())
            + self.slot_to_id.capacity() * std::mem::size_of::<i64>()
            + self.free.capacity() * std::mem::size_of::<u32>()
    }
}

/// Everything guarded by the index lock.
#[derive(Debug)]
pub(crate) struct IndexCore {
    pub config: HnswConfig,
    pub space: Space,
    pub graph: Graph,
    /// Free slots are flagged deleted too.
    pub deleted: Vec<bool>,
    pub directory: NodeDirectory,
    rng: StdRng,
}

impl IndexCore {
    /// Empty index state. `config` must already be validated.
    pub fn new(config: HnswConfig) -> Self {
        let capacity = config.initial_capacity;
        Self {
            space: Space::new(config.distance_metric.clone(), config.dimension, capacity),
            graph: Graph::new(capacity),
            deleted: vec![true; capacity],
            directory: NodeDirectory::new(capacity),
            rng: StdRng::seed_from_u64(config.seed),
            config,
        }
    }

    #[inline]
    pub fn view(&self) -> GraphView<'_> {
        GraphView::new(&self.graph, &self.space, &self.deleted)
    }

    pub fn selection(&self) -> Selection {
        Selection {
            heuristic: self.config.heuristic,
            alpha: self.config.alpha,
        }
    }

    #[inline]
    pub fn is_live(&self, slot: u32) -> bool {
        !self.view().is_deleted(slot)
    }

    pub fn ensure_capacity(&mut self, slots: usize) {
        if slots > self.deleted.len() {
            let target = slots.max(self.deleted.len() * 2);
            self.deleted.resize(target, true);
            self.graph.ensure_slots(target);
            self.directory.ensure_capacity(target);
            self.space.preallocate(target);
        }
    }

    /// Draws a level from the truncated exponential distribution.
    pub fn sample_level(&mut self) -> usize {
        let r: f64 = self.rng.gen();
        level_for_draw(r, &self.config)
    }

    /// Highest-level live node other than `exclude`; the first one found wins ties.
    pub fn highest_live(&self, exclude: Option<u32>) -> Option<(u32, usize)> {
        let mut best: Option<(u32, usize)> = None;
        for slot in 0..self.directory.node_count() as u32 {
            if Some(slot) == exclude || !self.is_live(slot) || !self.graph.has_node(slot) {
                continue;
            }
            let level = self.graph.level(slot);
            if best.map_or(true, |(_, l)| level > l) {
                best = Some((slot, level));
            }
        }
        best
    }

    pub fn reselect_entry_point(&mut self) {
        let entry = self.highest_live(None);
        debug!(entry = ?entry, "reselected entry point");
        self.graph.set_entry_point(entry);
    }

    fn check_query(&self, query: &[f64], k: usize) -> Result<()> {
        if k == 0 {
            return Err(HnswError::invalid("k must be positive"));
        }
        if query.len() != self.config.dimension {
            return Err(HnswError::dimension_mismatch(self.config.dimension, query.len()));
        }
        Ok(())
    }

    /// Approximate k-NN through the graph, or a linear scan in exact mode.
    pub fn search(
        &self,
        query: &[f64],
        k: usize,
        ef_search: usize,
        scratch: &mut SearchScratch,
    ) -> Result<Vec<SearchResult>> {
        self.check_query(query, k)?;
        if self.config.exact_search {
            return self.search_exact(query, k, scratch);
        }
        let entry = match self.graph.entry_point() {
            Some(entry) if self.directory.len() > 0 => entry,
            _ => return Ok(Vec::new()),
        };
        // no search can retain more than the live nodes
        let ef = ef_search.max(k).min(self.directory.len());
        let view = self.view();
        let q = self.space.prepare_query(query);
        let start = view.descend(&q, entry, self.graph.max_level(), 0);

        scratch.begin(self.graph.slots(), ef);
        scratch.seed(start, self.space.distance(&q, start));
        view.search_level(&q, 0, None, scratch);
        scratch.take_results();
        filter_candidates(&mut scratch.candidates, None, |slot| !view.is_deleted(slot));
        scratch.candidates.truncate(k);
        Ok(self.to_results(&scratch.candidates))
    }

    /// Brute-force k-NN over every live vector.
    pub fn search_exact(
        &self,
        query: &[f64],
        k: usize,
        scratch: &mut SearchScratch,
    ) -> Result<Vec<SearchResult>> {
        self.check_query(query, k)?;
        if self.directory.len() == 0 {
            return Ok(Vec::new());
        }
        let q = self.space.prepare_query(query);
        let k = k.min(self.directory.len());
        self.view().exact_search(&q, k, scratch);
        Ok(self.to_results(&scratch.candidates))
    }

    fn to_results(&self, candidates: &[Neighbor]) -> Vec<SearchResult> {
        candidates
            .iter()
            .filter_map(|c| {
                self.directory.id_of(c.slot).map(|id| SearchResult {
                    id,
                    distance: c.distance,
                })
            })
            .collect()
    }

    pub fn clear(&mut self) {
        let capacity = self.config.initial_capacity;
        self.directory = NodeDirectory::new(capacity);
        self.deleted = vec![true; capacity];
        self.space.on_clear(capacity);
        self.graph.reset(capacity);
    }

    pub fn stats(&self) -> IndexStats {
        let mut active = 0usize;
        let mut level_sum = 0usize;
        let mut degree_sum = 0usize;
        let mut degree0_sum = 0usize;
        for slot in 0..self.directory.node_count() as u32 {
            if !self.is_live(slot) || !self.graph.has_node(slot) {
                continue;
            }
            active += 1;
            let level = self.graph.level(slot);
            level_sum += level;
            degree0_sum += self.graph.neighbors(slot, 0).len();
            degree_sum += (0..=level)
                .map(|l| self.graph.neighbors(slot, l).len())
                .sum::<usize>();
        }
        let average = |sum: usize| {
            if active == 0 {
                0.0
            } else {
                sum as f64 / active as f64
            }
        };
        IndexStats {
            size: self.directory.len(),
            total_nodes: self.directory.node_count(),
            max_level: self.graph.max_level(),
            total_edges: self.graph.total_edges(),
            average_level: average(level_sum),
            average_degree: average(degree_sum),
            average_degree_level0: average(degree0_sum),
            memory_bytes: self.space.memory_bytes()
                + self.graph.memory_bytes()
                + self.directory.memory_bytes()
                + self.deleted.capacity(),
        }
    }
}

/// Mutable HNSW index with a single-writer/multi-reader lock.
///
/// ```
/// use hnswdb_core::{HnswConfig, HnswIndex};
///
/// let index = HnswIndex::new(HnswConfig::new(2)).unwrap();
/// index.add(1, &[0.0, 0.0]).unwrap();
/// index.add(2, &[1.0, 1.0]).unwrap();
/// let hits = index.search_knn(&[0.9, 0.9], 1).unwrap();
/// assert_eq!(hits[0].id, 2);
/// ```
#[derive(Debug)]
pub struct HnswIndex {
    core: RwLock<IndexCore>,
}

impl HnswIndex {
    /// Creates an empty index after validating `config`.
    pub fn new(config: HnswConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_core(IndexCore::new(config)))
    }

    pub(crate) fn from_core(core: IndexCore) -> Self {
        Self {
            core: RwLock::new(core),
        }
    }

    pub(crate) fn read_core(&self) -> parking_lot::RwLockReadGuard<'_, IndexCore> {
        self.core.read()
    }

    /// Inserts `vector` under `id`. Ids must be non-negative.
    ///
    /// An existing id is rejected or replaced according to the duplicate policy.
    pub fn add(&self, id: i64, vector: &[f64]) -> Result<()> {
        let mut core = self.core.write();
        with_scratch(|scratch| core.insert(id, vector, scratch))
    }

    /// Removes `id`. Returns `false` if it was not present.
    pub fn remove(&self, id: i64) -> bool {
        let mut core = self.core.write();
        with_scratch(|scratch| core.remove(id, scratch))
    }

    pub fn contains(&self, id: i64) -> bool {
        self.core.read().directory.lookup(id).is_some()
    }

    /// Returns up to `k` nearest ids using the configured `ef_search`.
    pub fn search_knn(&self, query: &[f64], k: usize) -> Result<Vec<SearchResult>> {
        let core = self.core.read();
        let ef = core.config.ef_search;
        with_scratch(|scratch| core.search(query, k, ef, scratch))
    }

    /// Returns up to `k` nearest ids exploring `max(ef_search, k)` candidates.
    pub fn search_knn_with_ef(
        &self,
        query: &[f64],
        k: usize,
        ef_search: usize,
    ) -> Result<Vec<SearchResult>> {
        let core = self.core.read();
        with_scratch(|scratch| core.search(query, k, ef_search, scratch))
    }

    /// Exact k-NN by linear scan, regardless of `exact_search`.
    pub fn search_exact(&self, query: &[f64], k: usize) -> Result<Vec<SearchResult>> {
        let core = self.core.read();
        with_scratch(|scratch| core.search_exact(query, k, scratch))
    }

    /// Number of live vectors.
    pub fn len(&self) -> usize {
        self.core.read().directory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> usize {
        self.core.read().config.dimension
    }

    /// Allocated slots, including free ones awaiting reuse.
    pub fn node_count(&self) -> usize {
        self.core.read().directory.node_count()
    }

    pub fn config(&self) -> HnswConfig {
        self.core.read().config.clone()
    }

    /// Id of the current entry point.
    pub fn entry_point(&self) -> Option<i64> {
        let core = self.core.read();
        core.graph
            .entry_point()
            .and_then(|slot| core.directory.id_of(slot))
    }

    /// Level of the entry point, `None` when empty.
    pub fn max_level(&self) -> Option<usize> {
        let core = self.core.read();
        core.graph.entry_point().map(|_| core.graph.max_level())
    }

    pub fn level_of(&self, id: i64) -> Option<usize> {
        let core = self.core.read();
        core.directory.lookup(id).map(|slot| core.graph.level(slot))
    }

    /// Ids adjacent to `id` on `level`, or `None` if `id` is absent.
    pub fn neighbors(&self, id: i64, level: usize) -> Option<Vec<i64>> {
        let core = self.core.read();
        let slot = core.directory.lookup(id)?;
        Some(
            core.graph
                .neighbors(slot, level)
                .iter()
                .filter_map(|&n| core.directory.id_of(n))
                .collect(),
        )
    }

    pub fn stats(&self) -> IndexStats {
        self.core.read().stats()
    }

    /// Drops every vector and resets the graph to its initial capacity.
    pub fn clear(&self) {
        self.core.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_allocate_and_reuse() {
        let mut dir = NodeDirectory::new(2);
        let a = dir.allocate();
        let b = dir.allocate();
        dir.register(10, a);
        dir.register(20, b);
        assert_eq!(dir.len(), 2);
        assert_eq!(dir.lookup(20), Some(b));

        assert_eq!(dir.unregister(a), Some(10));
        dir.release(a);
        assert_eq!(dir.lookup(10), None);
        assert_eq!(dir.id_of(a), None);

        let c = dir.allocate();
        assert_eq!(c, a);
        assert_eq!(dir.node_count(), 2);
        dir.register(30, c);
        assert_eq!(dir.id_of(c), Some(30));
    }

    #[test]
    fn test_directory_rebuild_frees_inconsistent_slots() {
        let mut dir = NodeDirectory::new(0);
        let freed = dir.rebuild(vec![5, -1, 7, 5, 9], |slot| slot != 4);
        assert_eq!(freed, vec![1, 3, 4]);
        assert_eq!(dir.len(), 2);
        assert_eq!(dir.lookup(5), Some(0));
        assert_eq!(dir.lookup(9), None);
        assert_eq!(dir.allocate(), 1);
    }

    #[test]
    fn test_sample_level_respects_cap() {
        let config = HnswConfig {
            level_lambda: 50.0,
            max_layers: 3,
            ..HnswConfig::new(2)
        };
        let mut core = IndexCore::new(config);
        for _ in 0..200 {
            assert!(core.sample_level() <= 2);
        }
    }

    #[test]
    fn test_sample_level_is_seeded() {
        let mut a = IndexCore::new(HnswConfig::new(2));
        let mut b = IndexCore::new(HnswConfig::new(2));
        let la: Vec<usize> = (0..64).map(|_| a.sample_level()).collect();
        let lb: Vec<usize> = (0..64).map(|_| b.sample_level()).collect();
        assert_eq!(la, lb);
        assert!(la.iter().any(|&l| l > 0));
    }

    #[test]
    fn test_search_rejects_bad_queries() {
        let index = HnswIndex::new(HnswConfig::new(3)).unwrap();
        assert!(matches!(
            index.search_knn(&[0.0, 0.0, 0.0], 0),
            Err(HnswError::InvalidArgument(_))
        ));
        assert!(matches!(
            index.search_knn(&[0.0, 0.0], 1),
            Err(HnswError::InvalidArgument(_))
        ));
        assert!(index.search_knn(&[0.0, 0.0, 0.0], 1).unwrap().is_empty());
    }

    #[test]
    fn test_stats_on_empty_index() {
        let index = HnswIndex::new(HnswConfig::new(3)).unwrap();
        let stats = index.stats();
        assert_eq!(stats.size, 0);
        assert_eq!(stats.total_nodes, 0);
        assert_eq!(stats.average_degree, 0.0);
        assert!(stats.memory_bytes > 0);
    }
}
