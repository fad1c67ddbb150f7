//! Per-thread reusable search state.
//!
//! Every traversal needs a visited set, a frontier, a bounded result heap and a couple of
//! temporary buffers. They live in a thread-local [`SearchScratch`] so concurrent readers
//! and bulk workers never allocate on the hot path and never contend on shared buffers.

use std::cell::RefCell;

use super::heap::{BoundedMaxHeap, MinHeap, Neighbor};
use super::visited::VisitedSet;

/// Reusable buffers threaded through search, insert and repair.
#[derive(Debug, Default)]
pub struct SearchScratch {
    visited: VisitedSet,
    pub(crate) frontier: MinHeap,
    pub(crate) results: BoundedMaxHeap,
    /// Candidate list gathered from `results` before filtering and selection.
    pub(crate) candidates: Vec<Neighbor>,
    /// Output of neighbor selection.
    pub(crate) selected: Vec<u32>,
    /// Snapshot of an adjacency list that is about to be rewritten.
    pub(crate) previous: Vec<u32>,
}

impl SearchScratch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new traversal over a graph of `node_capacity` slots with budget `ef`.
    pub fn begin(&mut self, node_capacity: usize, ef: usize) {
        self.visited.ensure_capacity(node_capacity);
        self.visited.clear();
        self.frontier.clear();
        self.results.reset(ef);
    }

    /// Marks `slot` visited for the current traversal; `false` if it already was.
    #[inline]
    pub fn try_visit(&mut self, slot: u32) -> bool {
        self.visited.insert(slot)
    }

    /// Marks `slot` visited and seeds both heaps with it.
    ///
    /// A seed is always expanded, even when its distance is not finite; it is only kept
    /// out of the results, ranking last in the frontier.
    pub(crate) fn seed(&mut self, slot: u32, distance: f64) {
        if !self.try_visit(slot) {
            return;
        }
        if distance.is_finite() {
            self.frontier.push(slot, distance);
            self.results.insert(slot, distance);
        } else {
            self.frontier.push(slot, f64::INFINITY);
        }
    }

    /// Moves the retained results into the candidate buffer, which is cleared first.
    pub(crate) fn take_results(&mut self) {
        self.candidates.clear();
        self.results.drain_into(&mut self.candidates);
    }
}

thread_local! {
    static SEARCH_SCRATCH: RefCell<SearchScratch> = RefCell::new(SearchScratch::new());
}

/// Runs `f` with this thread's scratch. A re-entrant call gets a fresh instance.
pub fn with_scratch<R>(f: impl FnOnce(&mut SearchScratch) -> R) -> R {
    SEARCH_SCRATCH.with(|cell| match cell.try_borrow_mut() {
        Ok(mut scratch) => f(&mut scratch),
        Err(_) => f(&mut SearchScratch::new()),
    })
}
