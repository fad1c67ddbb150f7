//! Vector space: a distance metric bound to the slot-indexed vector storage.
//!
//! The graph code never touches raw vectors. It asks the [`Space`] for distances between
//! a prepared query and a slot, or between two slots, and notifies it when slots are
//! filled, freed or wiped.

use rayon::prelude::*;

use super::distance::{DistanceMetric, NodeStats};
use crate::storage::vectors::{AuxStorage, VectorStorage};

/// A query in the space's stored form.
#[derive(Debug, Clone)]
pub enum QueryContext {
    /// An external vector, already encoded by the metric.
    Vector { data: Vec<f64>, stats: NodeStats },
    /// A vector already stored at this slot.
    Node(u32),
}

#[derive(Debug, Clone)]
pub struct Space {
    metric: DistanceMetric,
    vectors: VectorStorage,
    aux: AuxStorage,
}

impl Space {
    pub fn new(metric: DistanceMetric, dimension: usize, capacity: usize) -> Self {
        Self {
            metric,
            vectors: VectorStorage::new(dimension, capacity),
            aux: AuxStorage::new(capacity),
        }
    }

    pub fn metric(&self) -> &DistanceMetric {
        &self.metric
    }

    pub fn dimension(&self) -> usize {
        self.vectors.dimension()
    }

    pub fn vectors(&self) -> &VectorStorage {
        &self.vectors
    }

    pub fn aux(&self) -> &AuxStorage {
        &self.aux
    }

    /// Makes sure `slots` rows and statistics entries exist.
    pub fn preallocate(&mut self, slots: usize) {
        self.vectors.ensure_capacity(slots);
        self.aux.ensure_capacity(slots);
    }

    /// Encodes `vector` into `slot`.
    pub fn on_insert(&mut self, slot: u32, vector: &[f64]) {
        self.preallocate(slot as usize + 1);
        let stats = self.metric.encode(vector, self.vectors.row_mut(slot));
        self.aux.set(slot, stats);
    }

    pub fn on_remove(&mut self, slot: u32) {
        self.vectors.clear_row(slot);
        self.aux.clear(slot);
    }

    pub fn on_clear(&mut self, capacity: usize) {
        self.vectors.reset(capacity);
        self.aux.reset(capacity);
    }

    /// Stores an already-encoded row, as read back from disk.
    pub(crate) fn restore(&mut self, slot: u32, row: &[f64], stats: NodeStats) {
        self.preallocate(slot as usize + 1);
        self.vectors.row_mut(slot).copy_from_slice(row);
        self.aux.set(slot, stats);
    }

    /// Encodes `vectors[i]` into slot `i` for every `i`, in parallel on the current
    /// rayon pool.
    pub(crate) fn ingest_parallel(&mut self, vectors: &[&[f64]]) {
        let dim = self.dimension();
        self.preallocate(vectors.len());
        let metric = &self.metric;
        let stats: Vec<NodeStats> = self
            .vectors
            .rows_mut(vectors.len())
            .par_chunks_mut(dim)
            .zip(vectors.par_iter())
            .map(|(row, v)| metric.encode(v, row))
            .collect();
        for (slot, s) in stats.into_iter().enumerate() {
            self.aux.set(slot as u32, s);
        }
    }

    pub fn prepare_query(&self, vector: &[f64]) -> QueryContext {
        let mut data = vec![0.0; vector.len()];
        let stats = self.metric.encode(vector, &mut data);
        QueryContext::Vector { data, stats }
    }

    pub fn prepare_query_for_node(&self, slot: u32) -> QueryContext {
        QueryContext::Node(slot)
    }

    #[inline]
    pub fn distance(&self, query: &QueryContext, slot: u32) -> f64 {
        match query {
            QueryContext::Vector { data, stats } => self.metric.distance(
                data,
                stats,
                self.vectors.row(slot),
                &self.aux.get(slot),
            ),
            QueryContext::Node(node) => self.distance_between_nodes(*node, slot),
        }
    }

    #[inline]
    pub fn distance_between_nodes(&self, a: u32, b: u32) -> f64 {
        self.metric.distance(
            self.vectors.row(a),
            &self.aux.get(a),
            self.vectors.row(b),
            &self.aux.get(b),
        )
    }

    pub fn memory_bytes(&self) -> usize {
        self.vectors.memory_bytes() + self.aux.memory_bytes()
    }
}
