//! Contiguous slot-indexed vector storage and the per-slot statistics arrays.
//!
//! Rows are `dimension` `f64` values laid out back to back in slot order, so a slot's
//! vector is a single slice into one allocation.

use crate::hnsw::distance::NodeStats;

/// Dense row-major storage for the encoded vectors, one row per slot.
#[derive(Debug, Clone)]
pub struct VectorStorage {
    dimension: usize,
    data: Vec<f64>,
}

impl VectorStorage {
    pub fn new(dimension: usize, capacity: usize) -> Self {
        Self {
            dimension,
            data: vec![0.0; dimension * capacity],
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of slots currently backed by storage.
    pub fn capacity(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    /// Grows the backing array to hold at least `slots` rows, doubling when it grows.
    pub fn ensure_capacity(&mut self, slots: usize) {
        let current = self.capacity();
        if slots > current {
            let target = slots.max(current * 2);
            self.data.resize(target * self.dimension, 0.0);
        }
    }

    #[inline]
    pub fn row(&self, slot: u32) -> &[f64] {
        let start = slot as usize * self.dimension;
        &self.data[start..start + self.dimension]
    }

    #[inline]
    pub fn row_mut(&mut self, slot: u32) -> &mut [f64] {
        let start = slot as usize * self.dimension;
        &mut self.data[start..start + self.dimension]
    }

    /// Rows `[0, slots)` as one slice, for serialization and parallel ingest.
    pub fn rows(&self, slots: usize) -> &[f64] {
        &self.data[..slots * self.dimension]
    }

    pub fn rows_mut(&mut self, slots: usize) -> &mut [f64] {
        &mut self.data[..slots * self.dimension]
    }

    pub fn clear_row(&mut self, slot: u32) {
        self.row_mut(slot).fill(0.0);
    }

    /// Drops every row and reallocates `capacity` zeroed slots.
    pub fn reset(&mut self, capacity: usize) {
        self.data = vec![0.0; self.dimension * capacity];
    }

    pub fn memory_bytes(&self) -> usize {
        self.data.capacity() * std::mem::size_of::<f64>()
    }
}

/// Parallel arrays of cached [`NodeStats`], one entry per slot.
#[derive(Debug, Clone, Default)]
pub struct AuxStorage {
    norms: Vec<f64>,
    means: Vec<f64>,
    centered_norms: Vec<f64>,
}

impl AuxStorage {
    pub fn new(capacity: usize) -> Self {
        let mut aux = Self::default();
        aux.ensure_capacity(capacity);
        aux
    }

    pub fn capacity(&self) -> usize {
        self.norms.len()
    }

    pub fn ensure_capacity(&mut self, slots: usize) {
        let current = self.capacity();
        if slots > current {
            let target = slots.max(current * 2);
            self.norms.resize(target, 0.0);
            self.means.resize(target, 0.0);
            self.centered_norms.resize(target, 0.0);
        }
    }

    #[inline]
    pub fn get(&self, slot: u32) -> NodeStats {
        let i = slot as usize;
        NodeStats {
            norm: self.norms[i],
            mean: self.means[i],
            centered_norm: self.centered_norms[i],
        }
    }

    #[inline]
    pub fn set(&mut self, slot: u32, stats: NodeStats) {
        let i = slot as usize;
        self.norms[i] = stats.norm;
        self.means[i] = stats.mean;
        self.centered_norms[i] = stats.centered_norm;
    }

    pub fn clear(&mut self, slot: u32) {
        self.set(slot, NodeStats::default());
    }

    pub fn reset(&mut self, capacity: usize) {
        *self = Self::new(capacity);
    }

    pub fn memory_bytes(&self) -> usize {
        (self.norms.capacity() + self.means.capacity() + self.centered_norms.capacity())
            * std::mem::size_of::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_are_contiguous() {
        let mut storage = VectorStorage::new(3, 2);
        storage.row_mut(1).copy_from_slice(&[1.0, 2.0, 3.0]);
        assert_eq!(storage.row(1), &[1.0, 2.0, 3.0]);
        assert_eq!(storage.rows(2), &[0.0, 0.0, 0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_storage_grows_geometrically() {
        let mut storage = VectorStorage::new(4, 2);
        storage.ensure_capacity(3);
        assert_eq!(storage.capacity(), 4);
        storage.ensure_capacity(9);
        assert_eq!(storage.capacity(), 9);
    }

    #[test]
    fn test_aux_set_and_clear() {
        let mut aux = AuxStorage::new(1);
        aux.ensure_capacity(4);
        let stats = NodeStats {
            norm: 2.0,
            mean: 0.5,
            centered_norm: 1.5,
        };
        aux.set(3, stats);
        assert_eq!(aux.get(3), stats);
        aux.clear(3);
        assert_eq!(aux.get(3), NodeStats::default());
    }
}
