//! Distance-keyed heaps used by graph traversal.
//!
//! [`BoundedMaxHeap`] keeps the best `ef` candidates seen so far with the worst one at
//! the root, so a closer candidate evicts it in O(log ef). [`MinHeap`] is the unbounded
//! best-first frontier.

use ordered_float::OrderedFloat;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// A node slot paired with its distance to the current query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub slot: u32,
    pub distance: f64,
}

impl Neighbor {
    #[inline]
    pub fn new(slot: u32, distance: f64) -> Self {
        Self { slot, distance }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeapEntry {
    distance: OrderedFloat<f64>,
    slot: u32,
}

impl HeapEntry {
    #[inline]
    fn new(slot: u32, distance: f64) -> Self {
        Self {
            distance: OrderedFloat(distance),
            slot,
        }
    }

    #[inline]
    fn neighbor(self) -> Neighbor {
        Neighbor::new(self.slot, self.distance.0)
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .cmp(&other.distance)
            .then_with(|| self.slot.cmp(&other.slot))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Largest number of entries a [`BoundedMaxHeap`] reserves ahead of use.
pub const RESERVE_LIMIT: usize = 4_096;

/// Fixed-capacity max-heap retaining the closest candidates offered to it.
#[derive(Debug, Default)]
pub struct BoundedMaxHeap {
    heap: BinaryHeap<HeapEntry>,
    capacity: usize,
}

impl BoundedMaxHeap {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity.min(RESERVE_LIMIT)),
            capacity,
        }
    }

    /// Empties the heap and fixes a new capacity. At most [`RESERVE_LIMIT`] entries are
    /// allocated up front; larger heaps grow as candidates arrive.
    pub fn reset(&mut self, capacity: usize) {
        self.heap.clear();
        self.capacity = capacity;
        let wanted = capacity.min(RESERVE_LIMIT);
        if self.heap.capacity() < wanted {
            self.heap.reserve(wanted);
        }
    }

    /// Offers a candidate. When full, it replaces the root only if strictly closer.
    /// Returns `true` if the candidate was retained.
    #[inline]
    pub fn insert(&mut self, slot: u32, distance: f64) -> bool {
        if self.heap.len() < self.capacity {
            self.heap.push(HeapEntry::new(slot, distance));
            return true;
        }
        match self.heap.peek_mut() {
            Some(mut worst) if distance < worst.distance.0 => {
                *worst = HeapEntry::new(slot, distance);
                true
            }
            _ => false,
        }
    }

    /// Largest retained distance, or `+∞` when empty.
    #[inline]
    pub fn worst_distance(&self) -> f64 {
        self.heap.peek().map_or(f64::INFINITY, |e| e.distance.0)
    }

    pub fn remove_worst(&mut self) -> Option<Neighbor> {
        self.heap.pop().map(HeapEntry::neighbor)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Moves every retained candidate into `out`, in no particular order.
    pub fn drain_into(&mut self, out: &mut Vec<Neighbor>) {
        out.extend(self.heap.drain().map(HeapEntry::neighbor));
    }
}

/// Unbounded min-heap driving best-first expansion.
#[derive(Debug, Default)]
pub struct MinHeap {
    heap: BinaryHeap<Reverse<HeapEntry>>,
}

impl MinHeap {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn push(&mut self, slot: u32, distance: f64) {
        self.heap.push(Reverse(HeapEntry::new(slot, distance)));
    }

    #[inline]
    pub fn peek(&self) -> Option<Neighbor> {
        self.heap.peek().map(|Reverse(e)| e.neighbor())
    }

    #[inline]
    pub fn pop(&mut self) -> Option<Neighbor> {
        self.heap.pop().map(|Reverse(e)| e.neighbor())
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_heap_keeps_closest() {
        let mut heap = BoundedMaxHeap::new(3);
        for (slot, d) in [(0, 5.0), (1, 1.0), (2, 4.0), (3, 0.5), (4, 9.0), (5, 2.0)] {
            heap.insert(slot, d);
        }
        assert_eq!(heap.len(), 3);
        assert_eq!(heap.worst_distance(), 2.0);

        let mut out = Vec::new();
        heap.drain_into(&mut out);
        let mut slots: Vec<u32> = out.iter().map(|n| n.slot).collect();
        slots.sort_unstable();
        assert_eq!(slots, vec![1, 3, 5]);
    }

    #[test]
    fn test_bounded_heap_rejects_equal_distance_when_full() {
        let mut heap = BoundedMaxHeap::new(1);
        assert!(heap.insert(7, 1.0));
        assert!(!heap.insert(8, 1.0));
        assert_eq!(heap.remove_worst(), Some(Neighbor::new(7, 1.0)));
    }

    #[test]
    fn test_bounded_heap_empty_worst_is_infinite() {
        let mut heap = BoundedMaxHeap::new(4);
        assert_eq!(heap.worst_distance(), f64::INFINITY);
        heap.insert(1, 3.0);
        heap.reset(2);
        assert!(heap.is_empty());
        assert_eq!(heap.capacity(), 2);
        assert_eq!(heap.worst_distance(), f64::INFINITY);
    }

    #[test]
    fn test_bounded_heap_huge_capacity_grows_lazily() {
        let mut heap = BoundedMaxHeap::new(usize::MAX);
        heap.reset(usize::MAX);
        assert_eq!(heap.capacity(), usize::MAX);
        assert!(heap.insert(1, 2.0));
        assert!(heap.insert(2, 1.0));
        assert!(!heap.is_full());
        assert_eq!(heap.worst_distance(), 2.0);
    }

    #[test]
    fn test_bounded_heap_zero_capacity_retains_nothing() {
        let mut heap = BoundedMaxHeap::new(0);
        assert!(!heap.insert(1, 0.0));
        assert!(heap.is_full());
    }

    #[test]
    fn test_min_heap_pops_ascending() {
        let mut heap = MinHeap::new();
        heap.push(1, 3.0);
        heap.push(2, 1.0);
        heap.push(3, 2.0);
        assert_eq!(heap.peek().map(|n| n.slot), Some(2));
        let order: Vec<u32> = std::iter::from_fn(|| heap.pop()).map(|n| n.slot).collect();
        assert_eq!(order, vec![2, 3, 1]);
        assert!(heap.is_empty());
    }
}
