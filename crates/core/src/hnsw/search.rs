//! HNSW search primitives shared by the online index and the bulk builder.
//!
//! [`GraphView`] bundles the read-only state a traversal needs (adjacency, vectors and
//! the deleted flags). All traversal state lives in a caller-supplied
//! [`SearchScratch`], so a view can be searched from any number of threads at once.

use std::cmp::Ordering;

use crate::hnsw::graph::{Graph, NeighborHeuristic};
use crate::hnsw::heap::Neighbor;
use crate::hnsw::scratch::SearchScratch;
use crate::hnsw::space::{QueryContext, Space};

/// Read-only view over a graph and its vectors.
#[derive(Clone, Copy)]
pub(crate) struct GraphView<'a> {
    pub graph: &'a Graph,
    pub space: &'a Space,
    pub deleted: &'a [bool],
}

impl<'a> GraphView<'a> {
    pub fn new(graph: &'a Graph, space: &'a Space, deleted: &'a [bool]) -> Self {
        Self {
            graph,
            space,
            deleted,
        }
    }

    /// Slots past the end of the deleted array count as deleted.
    #[inline]
    pub fn is_deleted(&self, slot: u32) -> bool {
        self.deleted.get(slot as usize).copied().unwrap_or(true)
    }

    /// Hill-climbs on `level` from `entry` until no live neighbor is closer.
    pub fn greedy_search(&self, query: &QueryContext, entry: u32, level: usize) -> u32 {
        let mut current = entry;
        let mut best = self.space.distance(query, current);
        if !best.is_finite() {
            best = f64::INFINITY;
        }
        loop {
            let mut improved = false;
            for &neighbor in self.graph.neighbors(current, level) {
                if self.is_deleted(neighbor) {
                    continue;
                }
                let dist = self.space.distance(query, neighbor);
                if dist.is_finite() && dist < best {
                    best = dist;
                    current = neighbor;
                    improved = true;
                }
            }
            if !improved {
                return current;
            }
        }
    }

    /// Greedy descent from `top` down to (and excluding) `bottom`.
    pub fn descend(&self, query: &QueryContext, entry: u32, top: usize, bottom: usize) -> u32 {
        let mut current = entry;
        for level in (bottom + 1..=top).rev() {
            current = self.greedy_search(query, current, level);
        }
        current
    }

    /// Bounded best-first search on `level`.
    ///
    /// The caller seeds `scratch` (see [`SearchScratch::seed`]) after
    /// [`SearchScratch::begin`]. Expansion stops once the closest frontier candidate is
    /// farther than the worst retained result and `ef` results are held. Returns the
    /// number of retained results.
    pub fn search_level(
        &self,
        query: &QueryContext,
        level: usize,
        exclude: Option<u32>,
        scratch: &mut SearchScratch,
    ) -> usize {
        while let Some(current) = scratch.frontier.pop() {
            if scratch.results.is_full() && current.distance > scratch.results.worst_distance() {
                break;
            }
            for &neighbor in self.graph.neighbors(current.slot, level) {
                if Some(neighbor) == exclude
                    || self.is_deleted(neighbor)
                    || !scratch.try_visit(neighbor)
                {
                    continue;
                }
                let dist = self.space.distance(query, neighbor);
                if !dist.is_finite() {
                    continue;
                }
                if !scratch.results.is_full() || dist < scratch.results.worst_distance() {
                    scratch.frontier.push(neighbor, dist);
                    scratch.results.insert(neighbor, dist);
                }
            }
        }
        scratch.results.len()
    }

    /// Linear scan of every live slot, leaving the `k` nearest sorted in
    /// `scratch.candidates`.
    pub fn exact_search(&self, query: &QueryContext, k: usize, scratch: &mut SearchScratch) {
        scratch.results.reset(k);
        for slot in 0..self.graph.slots() as u32 {
            if self.is_deleted(slot) || !self.graph.has_node(slot) {
                continue;
            }
            let dist = self.space.distance(query, slot);
            if dist.is_finite() {
                scratch.results.insert(slot, dist);
            }
        }
        scratch.take_results();
        sort_candidates(&mut scratch.candidates);
    }
}

#[inline]
fn by_distance(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| a.slot.cmp(&b.slot))
}

/// Sorts ascending by distance, ties broken by slot.
pub(crate) fn sort_candidates(candidates: &mut [Neighbor]) {
    candidates.sort_unstable_by(by_distance);
}

/// Drops `exclude`, dead slots, non-finite distances and duplicates, then sorts.
pub(crate) fn filter_candidates(
    candidates: &mut Vec<Neighbor>,
    exclude: Option<u32>,
    is_live: impl Fn(u32) -> bool,
) {
    candidates.retain(|c| Some(c.slot) != exclude && c.distance.is_finite() && is_live(c.slot));
    sort_candidates(candidates);
    candidates.dedup_by_key(|c| c.slot);
}

/// Parameters of a neighbor selection pass.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Selection {
    pub heuristic: NeighborHeuristic,
    pub alpha: f64,
}

impl Selection {
    /// Picks at most `max_degree` neighbors for `node` from `candidates`, which must be
    /// sorted nearest-first. `node` itself is never selected.
    pub fn select(
        &self,
        space: &Space,
        node: u32,
        candidates: &[Neighbor],
        max_degree: usize,
        out: &mut Vec<u32>,
    ) {
        out.clear();
        if max_degree == 0 {
            return;
        }
        let eligible = candidates.iter().filter(|c| c.slot != node);
        match self.heuristic {
            NeighborHeuristic::Simple => {
                out.extend(eligible.take(max_degree).map(|c| c.slot));
            }
            NeighborHeuristic::Diversified => {
                for candidate in eligible.clone() {
                    if out.len() >= max_degree {
                        break;
                    }
                    let bound = candidate.distance * self.alpha;
                    let occluded = out.iter().any(|&kept| {
                        let d = space.distance_between_nodes(candidate.slot, kept);
                        d.is_finite() && d < bound
                    });
                    if !occluded {
                        out.push(candidate.slot);
                    }
                }
                // backfill
                for candidate in eligible {
                    if out.len() >= max_degree {
                        break;
                    }
                    if !out.contains(&candidate.slot) {
                        out.push(candidate.slot);
                    }
                }
            }
        }
    }
}
