//! # hnswdb-core
//!
//! In-memory Hierarchical Navigable Small World (HNSW) index for approximate nearest
//! neighbor search over `f64` vectors.
//!
//! The index supports incremental insert, delete (with optional neighborhood repair)
//! and concurrent k-NN search behind a single-writer/multi-reader lock, a parallel
//! bulk builder for datasets known upfront, and a checksummed binary file format.

/// Default tuning parameters and file format constants.
pub mod config;
/// Error type shared by every fallible operation.
pub mod error;
/// HNSW graph, search, insertion, deletion and bulk construction.
pub mod hnsw;
/// Vector storage and on-disk persistence.
pub mod storage;

pub use error::{HnswError, Result};
pub use hnsw::{
    BulkBuilder, BulkOptions, CustomDistance, DeletionPolicy, DistanceMetric, DuplicatePolicy,
    HnswConfig, HnswIndex, IndexStats, NeighborHeuristic, SearchResult,
};
pub use storage::SpaceResolver;
