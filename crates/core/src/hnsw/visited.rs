//! Generation-based visited set for HNSW graph traversal.
//!
//! Each `clear()` increments a generation counter instead of zeroing the array, making
//! repeated searches O(1) to reset.

/// The array is re-zeroed once the generation reaches this value.
const GENERATION_LIMIT: u32 = 1 << 31;

/// Generation-based visited set indexed by node slot.
/// Each `clear()` increments a generation counter; `insert()` compares against the current
/// generation. A full memset happens only once every 2^31 clears.
#[derive(Debug)]
pub struct VisitedSet {
    data: Vec<u32>,
    generation: u32,
}

impl VisitedSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u32; capacity],
            generation: 1,
        }
    }

    /// Reset the set. O(1) amortized.
    pub fn clear(&mut self) {
        if self.generation >= GENERATION_LIMIT {
            self.data.fill(0);
            self.generation = 1;
        } else {
            self.generation += 1;
        }
    }

    /// Ensure capacity covers at least `cap` elements, growing geometrically.
    pub fn ensure_capacity(&mut self, cap: usize) {
        if cap > self.data.len() {
            let target = cap.max(self.data.len() * 2);
            self.data.resize(target, 0);
        }
    }

    /// Mark `slot` as visited. Returns `true` if it was NOT previously visited.
    #[inline]
    pub fn insert(&mut self, slot: u32) -> bool {
        let idx = slot as usize;
        if idx >= self.data.len() {
            self.ensure_capacity(idx + 1);
        }
        if self.data[idx] == self.generation {
            false
        } else {
            self.data[idx] = self.generation;
            true
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl Default for VisitedSet {
    fn default() -> Self {
        Self::new(0)
    }
}
