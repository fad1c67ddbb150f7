//! HNSW insertion algorithm.
//!
//! Inserts a vector into the graph with mutual connections and heuristic neighbor
//! pruning (Algorithm 4 from the HNSW paper). Every edge the new node selects is
//! mirrored into the neighbor's list, which is re-pruned to its own degree bound.

use crate::error::{HnswError, Result};
use crate::hnsw::graph::DuplicatePolicy;
use crate::hnsw::heap::Neighbor;
use crate::hnsw::index::IndexCore;
use crate::hnsw::scratch::SearchScratch;
use crate::hnsw::search::filter_candidates;
use crate::hnsw::space::{QueryContext, Space};

impl IndexCore {
    /// Insert `vector` under `id`. All validation happens before any state changes.
    pub(crate) fn insert(
        &mut self,
        id: i64,
        vector: &[f64],
        scratch: &mut SearchScratch,
    ) -> Result<()> {
        if vector.len() != self.config.dimension {
            return Err(HnswError::dimension_mismatch(
                self.config.dimension,
                vector.len(),
            ));
        }
        if id < 0 {
            return Err(HnswError::invalid(format!(
                "ids must be non-negative, got {id}"
            )));
        }
        if let Some(existing) = self.directory.lookup(id) {
            match self.config.duplicate_policy {
                DuplicatePolicy::Reject => {
                    return Err(HnswError::invalid(format!("duplicate id {id}")));
                }
                DuplicatePolicy::Overwrite => {
                    self.remove_slot(existing, scratch);
                }
            }
        }

        let slot = self.directory.allocate();
        self.ensure_capacity(slot as usize + 1);
        self.deleted[slot as usize] = false;
        self.directory.register(id, slot);
        self.space.on_insert(slot, vector);

        let level = self.sample_level();
        self.graph.init_node(slot, level);

        // First node becomes the entry point
        let Some(mut entry) = self.graph.entry_point() else {
            self.graph.set_entry_point(Some((slot, level)));
            return Ok(());
        };
        if entry == slot || !self.is_live(entry) || !self.graph.has_node(entry) {
            if let Some((alternate, _)) = self.highest_live(Some(slot)) {
                entry = alternate;
            }
        }

        let max_level = self.graph.max_level();
        let query = self.space.prepare_query_for_node(slot);

        // Phase 1: greedy descent through the levels above the new node
        let mut point = self.view().descend(&query, entry, max_level, level);

        // Phase 2: connect on every level the node shares with the graph
        for lvl in (0..=level.min(max_level)).rev() {
            point = self.connect_on_level(slot, &query, point, lvl, scratch);
        }

        if level > max_level {
            self.graph.set_entry_point(Some((slot, level)));
        }
        Ok(())
    }

    /// Searches `level` from `entry`, links `node` to the selected neighbors and
    /// mirrors each edge. Returns the entry for the next level down.
    fn connect_on_level(
        &mut self,
        node: u32,
        query: &QueryContext,
        entry: u32,
        level: usize,
        scratch: &mut SearchScratch,
    ) -> u32 {
        let ef = self.config.ef_construction.max(self.config.m);
        let view = self.view();
        scratch.begin(self.graph.slots(), ef);
        scratch.seed(entry, self.space.distance(query, entry));
        view.search_level(query, level, Some(node), scratch);
        scratch.take_results();
        filter_candidates(&mut scratch.candidates, Some(node), |s| !view.is_deleted(s));

        let max_degree = self.config.max_degree(level);
        self.selection().select(
            &self.space,
            node,
            &scratch.candidates,
            max_degree,
            &mut scratch.selected,
        );
        let selected = scratch.selected.clone();
        self.graph.set_neighbors(node, level, &selected);
        for &neighbor in &selected {
            self.connect_mutual(level, node, neighbor, scratch);
        }
        selected.first().copied().unwrap_or(entry)
    }

    /// Adds the edge `target -> source`, re-selecting `target`'s neighbors.
    ///
    /// If none of `target`'s previous neighbors survive the selection, the closest one is
    /// forced back in. `source` itself is then forced in.
    pub(crate) fn connect_mutual(
        &mut self,
        level: usize,
        source: u32,
        target: u32,
        scratch: &mut SearchScratch,
    ) {
        if source == target || !self.graph.has_node(target) || self.graph.level(target) < level {
            return;
        }
        let space = &self.space;
        let view = self.view();

        scratch.previous.clear();
        scratch
            .previous
            .extend_from_slice(self.graph.neighbors(target, level));
        scratch.candidates.clear();
        scratch.candidates.extend(
            scratch
                .previous
                .iter()
                .map(|&n| Neighbor::new(n, space.distance_between_nodes(target, n))),
        );
        if !scratch.previous.contains(&source) {
            scratch
                .candidates
                .push(Neighbor::new(source, space.distance_between_nodes(target, source)));
        }
        filter_candidates(&mut scratch.candidates, Some(target), |s| !view.is_deleted(s));

        let max_degree = self.config.max_degree(level);
        self.selection().select(
            space,
            target,
            &scratch.candidates,
            max_degree,
            &mut scratch.selected,
        );

        let selected = &mut scratch.selected;
        let previous = &scratch.previous;
        let kept_previous = previous.iter().any(|p| selected.contains(p));
        if !selected.is_empty() && !previous.is_empty() && !kept_previous {
            let best_previous = scratch
                .candidates
                .iter()
                .find(|c| c.slot != source && previous.contains(&c.slot));
            if let Some(best) = best_previous {
                force_insert(space, target, *best, selected, max_degree);
            }
        }
        if !selected.contains(&source) {
            let dist = space.distance_between_nodes(target, source);
            force_insert(space, target, Neighbor::new(source, dist), selected, max_degree);
        }
        self.graph.set_neighbors(target, level, &scratch.selected);
    }
}

/// Appends `candidate` under the bound, otherwise replaces the farthest entry if
/// `candidate` is closer.
fn force_insert(
    space: &Space,
    target: u32,
    candidate: Neighbor,
    selected: &mut Vec<u32>,
    max_degree: usize,
) {
    if selected.len() < max_degree {
        selected.push(candidate.slot);
        return;
    }
    let farthest = selected
        .iter()
        .enumerate()
        .map(|(i, &s)| (i, space.distance_between_nodes(target, s)))
        .max_by(|a, b| a.1.total_cmp(&b.1));
    if let Some((idx, dist)) = farthest {
        if candidate.distance < dist {
            selected[idx] = candidate.slot;
        }
    }
}
