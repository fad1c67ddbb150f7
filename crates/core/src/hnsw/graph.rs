//! HNSW graph structure and configuration.
//!
//! [`HnswConfig`] defines tuning parameters (M, ef_construction, ef_search, policies,
//! distance metric). [`Graph`] stores per-slot levels and per-level adjacency lists
//! using a Struct-of-Arrays layout indexed by node slot.

use crate::config;
use crate::error::{HnswError, Result};
use crate::hnsw::distance::DistanceMetric;
use serde::{Deserialize, Serialize};

/// What `add` does when the id is already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Fail with `InvalidArgument` and leave the index untouched.
    Reject,
    /// Remove the existing node, then insert the new vector under the same id.
    #[default]
    Overwrite,
}

/// How much work `remove` does to keep the graph navigable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionPolicy {
    /// Cut the node's edges and reclaim its slot.
    Lazy,
    /// Additionally reconnect the former neighbors to each other and to a local search.
    #[default]
    LazyWithRepair,
}

/// Neighbor selection rule used by insertion, repair and bulk construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeighborHeuristic {
    /// Keep the nearest candidates.
    Simple,
    /// Skip candidates occluded by a closer accepted neighbor, then backfill.
    #[default]
    Diversified,
}

macro_rules! byte_codec {
    ($ty:ident { $($variant:ident = $byte:literal),+ $(,)? }) => {
        impl $ty {
            pub(crate) fn to_byte(self) -> u8 {
                match self {
                    $($ty::$variant => $byte,)+
                }
            }

            pub(crate) fn from_byte(byte: u8) -> Option<Self> {
                match byte {
                    $($byte => Some($ty::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

byte_codec!(DuplicatePolicy { Reject = 0, Overwrite = 1 });
byte_codec!(DeletionPolicy { Lazy = 0, LazyWithRepair = 1 });
byte_codec!(NeighborHeuristic { Simple = 0, Diversified = 1 });

/// Configuration parameters for an HNSW index.
///
/// Controls the trade-off between build speed, search speed, recall, and memory usage.
/// Missing fields take their defaults when deserialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswConfig {
    /// Vector dimension. Must be set; the default of 0 fails validation.
    pub dimension: usize,
    /// Maximum links per node on layers above 0.
    pub m: usize,
    /// Maximum links per node at layer 0 (typically `2 * m`).
    pub m_max0: usize,
    /// Candidate list size during index construction.
    pub ef_construction: usize,
    /// Default candidate list size during search (higher = better recall, slower).
    pub ef_search: usize,
    /// Candidate list size of the local search run after a deletion. 0 disables it.
    pub ef_repair: usize,
    /// Maximum number of layers in the graph.
    pub max_layers: usize,
    /// Scale of the exponential level distribution.
    pub level_lambda: f64,
    /// Seed for level sampling.
    pub seed: u64,
    pub duplicate_policy: DuplicatePolicy,
    pub deletion_policy: DeletionPolicy,
    pub heuristic: NeighborHeuristic,
    /// Occlusion factor of the diversified heuristic. Values above 1 prune more.
    pub alpha: f64,
    /// Slots preallocated at construction.
    pub initial_capacity: usize,
    /// Answer every search with a linear scan instead of the graph.
    pub exact_search: bool,
    /// Distance function for similarity computation.
    pub distance_metric: DistanceMetric,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            dimension: 0,
            m: config::HNSW_DEFAULT_M,
            m_max0: config::HNSW_DEFAULT_MAX_M0,
            ef_construction: config::HNSW_DEFAULT_EF_CONSTRUCTION,
            ef_search: config::HNSW_DEFAULT_EF_SEARCH,
            ef_repair: config::HNSW_DEFAULT_EF_REPAIR,
            max_layers: config::HNSW_DEFAULT_MAX_LAYERS,
            level_lambda: config::HNSW_DEFAULT_LEVEL_LAMBDA,
            seed: config::HNSW_DEFAULT_SEED,
            duplicate_policy: DuplicatePolicy::default(),
            deletion_policy: DeletionPolicy::default(),
            heuristic: NeighborHeuristic::default(),
            alpha: config::HNSW_DEFAULT_ALPHA,
            initial_capacity: config::HNSW_DEFAULT_INITIAL_CAPACITY,
            exact_search: false,
            distance_metric: DistanceMetric::default(),
        }
    }
}

impl HnswConfig {
    /// Default configuration for vectors of `dimension` components.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ..Self::default()
        }
    }

    /// Rejects parameter combinations the index cannot work with.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(HnswError::invalid(msg));
        if self.dimension == 0 {
            return fail("dimension must be positive");
        }
        if self.m == 0 {
            return fail("m must be positive");
        }
        if self.m_max0 < self.m {
            return fail("m_max0 must be at least m");
        }
        if self.ef_construction < self.m {
            return fail("ef_construction must be at least m");
        }
        if self.ef_search == 0 {
            return fail("ef_search must be positive");
        }
        if !(self.level_lambda.is_finite() && self.level_lambda > 0.0) {
            return fail("level_lambda must be finite and positive");
        }
        if !(self.alpha.is_finite() && self.alpha > 0.0) {
            return fail("alpha must be finite and positive");
        }
        if self.initial_capacity == 0 {
            return fail("initial_capacity must be positive");
        }
        if self.max_layers == 0 || self.max_layers > usize::from(u8::MAX) + 1 {
            return fail("max_layers must be between 1 and 256");
        }
        Ok(())
    }

    /// Degree bound of `level`.
    #[inline]
    pub fn max_degree(&self, level: usize) -> usize {
        if level == 0 {
            self.m_max0
        } else {
            self.m
        }
    }
}

/// Per-slot levels and adjacency lists plus the entry point.
///
/// A slot holds a node iff it has at least one (possibly empty) adjacency list; free
/// slots have none.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    neighbors: Vec<Vec<Vec<u32>>>, // [slot][level][neighbor slots]
    levels: Vec<u8>,
    entry_point: Option<u32>,
    max_level: usize,
}

impl Graph {
    pub fn new(capacity: usize) -> Self {
        let mut graph = Self::default();
        graph.ensure_slots(capacity);
        graph
    }

    /// Number of addressable slots.
    pub fn slots(&self) -> usize {
        self.neighbors.len()
    }

    pub fn ensure_slots(&mut self, slots: usize) {
        if slots > self.neighbors.len() {
            self.neighbors.resize_with(slots, Vec::new);
            self.levels.resize(slots, 0);
        }
    }

    /// Gives `slot` one empty adjacency list per level `0..=level`.
    pub fn init_node(&mut self, slot: u32, level: usize) {
        self.ensure_slots(slot as usize + 1);
        let idx = slot as usize;
        self.levels[idx] = level as u8;
        self.neighbors[idx] = vec![Vec::new(); level + 1];
    }

    /// Drops every adjacency list of `slot`, turning it back into a free slot.
    pub fn clear_node(&mut self, slot: u32) {
        let idx = slot as usize;
        self.neighbors[idx] = Vec::new();
        self.levels[idx] = 0;
    }

    #[inline]
    pub fn has_node(&self, slot: u32) -> bool {
        self.neighbors
            .get(slot as usize)
            .is_some_and(|lists| !lists.is_empty())
    }

    #[inline]
    pub fn level(&self, slot: u32) -> usize {
        self.levels[slot as usize] as usize
    }

    /// Neighbors of `slot` at `level`; empty if the node does not reach that level.
    #[inline]
    pub fn neighbors(&self, slot: u32, level: usize) -> &[u32] {
        self.neighbors
            .get(slot as usize)
            .and_then(|lists| lists.get(level))
            .map_or(&[], Vec::as_slice)
    }

    /// Replaces the adjacency of `slot` at `level`. The node must reach `level`.
    pub fn set_neighbors(&mut self, slot: u32, level: usize, list: &[u32]) {
        if let Some(existing) = self.neighbors[slot as usize].get_mut(level) {
            existing.clear();
            existing.extend_from_slice(list);
        }
    }

    /// Removes `target` from `slot`'s list at `level`. Returns whether it was present.
    pub fn remove_edge(&mut self, slot: u32, level: usize, target: u32) -> bool {
        match self.neighbors[slot as usize].get_mut(level) {
            Some(list) => match list.iter().position(|&n| n == target) {
                Some(pos) => {
                    list.remove(pos);
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    pub fn entry_point(&self) -> Option<u32> {
        self.entry_point
    }

    /// Level of the entry point. Meaningless while the graph is empty.
    pub fn max_level(&self) -> usize {
        self.max_level
    }

    pub fn set_entry_point(&mut self, entry: Option<(u32, usize)>) {
        match entry {
            Some((slot, level)) => {
                self.entry_point = Some(slot);
                self.max_level = level;
            }
            None => {
                self.entry_point = None;
                self.max_level = 0;
            }
        }
    }

    /// Number of levels any slot reaches (highest level + 1), 0 when empty.
    pub fn level_count(&self) -> usize {
        self.neighbors.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn total_edges(&self) -> usize {
        self.neighbors
            .iter()
            .flat_map(|lists| lists.iter())
            .map(Vec::len)
            .sum()
    }

    pub fn reset(&mut self, capacity: usize) {
        *self = Self::new(capacity);
    }

    pub fn memory_bytes(&self) -> usize {
        let lists: usize = self
            .neighbors
            .iter()
            .map(|lists| {
                lists.capacity() * std::mem::size_of::<Vec<u32>>()
                    + lists
                        .iter()
                        .map(|l| l.capacity() * std::mem::size_of::<u32>())
                        .sum::<usize>()
            })
            .sum();
        lists
            + self.neighbors.capacity() * std::mem::size_of::<Vec<Vec<u32>>>()
            + self.levels.capacity()
    }
}
