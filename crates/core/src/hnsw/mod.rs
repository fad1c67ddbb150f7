//! Hierarchical Navigable Small World (HNSW) approximate nearest neighbor index.
//!
//! Nodes live in dense integer slots. Each slot owns a vector row in the [`space`]
//! storage, one adjacency list per level it reaches in the [`graph`], and a deleted
//! flag. External `i64` ids are mapped to slots by the index; freed slots are reused.
//!
//! The online path ([`HnswIndex`]) and the bulk path ([`BulkBuilder`]) share the same
//! search and neighbor-selection primitives.

/// Parallel bulk construction.
pub mod bulk;
/// Distance metrics: euclidean, cosine, correlation and user-defined.
pub mod distance;
/// Adjacency lists, levels, entry point and index configuration.
pub mod graph;
/// Bounded max-heap and min-heap over (slot, distance) pairs.
pub mod heap;
/// The online index: id mapping, search and statistics.
pub mod index;
/// Insertion with mutual connections.
pub mod insert;
/// Deletion with optional neighborhood repair.
pub mod remove;
/// Per-thread search buffers.
pub mod scratch;
/// Greedy descent, bounded best-first search and neighbor selection.
pub mod search;
/// Vector space: encoded rows, per-node statistics and distances.
pub mod space;
/// Generation-based visited set for efficient graph traversal.
pub mod visited;

pub use bulk::{BulkBuilder, BulkOptions};
pub use distance::{CustomDistance, DistanceMetric, NodeStats};
pub use graph::{DeletionPolicy, DuplicatePolicy, HnswConfig, NeighborHeuristic};
pub use index::{HnswIndex, IndexStats, SearchResult};
