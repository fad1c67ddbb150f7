//! Node removal and local graph repair.
//!
//! Removing a node cuts every edge into and out of it, optionally reconnects its former
//! neighbors, and returns its slot to the free list. A recycled slot therefore starts
//! with no incoming edges.

use crate::hnsw::graph::DeletionPolicy;
use crate::hnsw::index::IndexCore;
use crate::hnsw::scratch::SearchScratch;
use crate::hnsw::search::filter_candidates;

impl IndexCore {
    /// Removes `id`. Returns `false` if it is not present.
    pub(crate) fn remove(&mut self, id: i64, scratch: &mut SearchScratch) -> bool {
        match self.directory.lookup(id) {
            Some(slot) => self.remove_slot(slot, scratch),
            None => false,
        }
    }

    pub(crate) fn remove_slot(&mut self, slot: u32, scratch: &mut SearchScratch) -> bool {
        if !self.is_live(slot) {
            return false;
        }
        self.deleted[slot as usize] = true;
        self.directory.unregister(slot);

        let level = self.graph.level(slot);
        let former: Vec<Vec<u32>> = (0..=level)
            .map(|lvl| self.graph.neighbors(slot, lvl).to_vec())
            .collect();
        self.purge_incoming(slot, level);

        for (lvl, neighbors) in former.iter().enumerate() {
            if self.config.deletion_policy == DeletionPolicy::LazyWithRepair {
                self.reconnect(lvl, neighbors, scratch);
            }
            self.graph.set_neighbors(slot, lvl, &[]);
        }

        self.graph.clear_node(slot);
        self.space.on_remove(slot);
        self.directory.release(slot);
        if self.graph.entry_point() == Some(slot) {
            self.reselect_entry_point();
        }
        true
    }

    /// Drops every edge pointing at `slot` on levels `0..=level`.
    fn purge_incoming(&mut self, slot: u32, level: usize) {
        for other in 0..self.directory.node_count() as u32 {
            if other == slot || !self.graph.has_node(other) {
                continue;
            }
            let top = self.graph.level(other).min(level);
            for lvl in 0..=top {
                self.graph.remove_edge(other, lvl, slot);
            }
        }
    }

    /// Links the live former neighbors of a removed node pairwise, then widens each
    /// one's neighborhood with a repair search.
    fn reconnect(&mut self, level: usize, neighbors: &[u32], scratch: &mut SearchScratch) {
        for (i, &neighbor) in neighbors.iter().enumerate() {
            if !self.is_live(neighbor) {
                continue;
            }
            for &other in &neighbors[i + 1..] {
                if !self.is_live(other) {
                    continue;
                }
                self.connect_mutual(level, neighbor, other, scratch);
                self.connect_mutual(level, other, neighbor, scratch);
            }
            if self.config.ef_repair > 0 {
                self.repair_search(level, neighbor, neighbors, scratch);
            }
        }
    }

    /// Re-selects `source`'s neighbors from a search seeded by `seeds`.
    fn repair_search(
        &mut self,
        level: usize,
        source: u32,
        seeds: &[u32],
        scratch: &mut SearchScratch,
    ) {
        let ef = self.config.ef_repair.max(self.config.m);
        let query = self.space.prepare_query_for_node(source);
        let view = self.view();
        scratch.begin(self.graph.slots(), ef);
        for &seed in seeds {
            if seed != source && !view.is_deleted(seed) {
                scratch.seed(seed, self.space.distance(&query, seed));
            }
        }
        view.search_level(&query, level, Some(source), scratch);
        scratch.take_results();
        filter_candidates(&mut scratch.candidates, Some(source), |s| !view.is_deleted(s));

        self.selection().select(
            &self.space,
            source,
            &scratch.candidates,
            self.config.max_degree(level),
            &mut scratch.selected,
        );
        let selected = scratch.selected.clone();
        self.graph.set_neighbors(source, level, &selected);
        for &picked in &selected {
            self.connect_mutual(level, source, picked, scratch);
        }
    }
}
