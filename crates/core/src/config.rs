//! Global configuration constants for hnswdb.
//!
//! Index defaults, persistence format markers and bulk build tuning parameters are
//! defined here. Runtime configuration is carried by [`HnswConfig`](crate::hnsw::HnswConfig)
//! and [`BulkOptions`](crate::hnsw::BulkOptions), whose `Default` impls read these values.

/// Default number of neighbors per node on the upper layers (`M`).
///
/// Higher values improve recall but increase memory and build time.
/// Typical range: 8–64. Default: 16.
pub const HNSW_DEFAULT_M: usize = 16;

/// Default degree bound on the base layer (`maxM0`). Conventionally `2 * M`.
pub const HNSW_DEFAULT_MAX_M0: usize = 32;

/// Default ef parameter during HNSW index construction.
///
/// Controls the size of the dynamic candidate list during insertion.
/// Higher values produce a better graph but slow down build time.
pub const HNSW_DEFAULT_EF_CONSTRUCTION: usize = 200;

/// Default ef parameter during HNSW search.
///
/// Controls the size of the dynamic candidate list during query.
/// Higher values improve recall at the cost of latency.
pub const HNSW_DEFAULT_EF_SEARCH: usize = 50;

/// Default width of the local repair search run after a deletion. 0 disables it.
pub const HNSW_DEFAULT_EF_REPAIR: usize = 40;

/// Maximum number of layers in the HNSW graph. Node levels are `0..MAX_LAYERS`.
pub const HNSW_DEFAULT_MAX_LAYERS: usize = 16;

/// Level generation multiplier for HNSW layer assignment.
///
/// Nodes are assigned to layer `floor(-ln(uniform) * LEVEL_LAMBDA)`.
pub const HNSW_DEFAULT_LEVEL_LAMBDA: f64 = 1.0;

/// Default seed for level sampling.
pub const HNSW_DEFAULT_SEED: u64 = 42;

/// Default occlusion factor for the diversified neighbor heuristic.
pub const HNSW_DEFAULT_ALPHA: f64 = 1.0;

/// Default number of slots preallocated by a new index.
pub const HNSW_DEFAULT_INITIAL_CAPACITY: usize = 16_384;

/// Magic number at the start of a persisted index ("HNSW0001").
pub const INDEX_FILE_MAGIC: u64 = 0x484E_5357_3030_3031;

/// Current persistence format version.
pub const INDEX_FORMAT_VERSION: u32 = 4;

/// Oldest persistence format version this build can read.
pub const INDEX_MIN_FORMAT_VERSION: u32 = 4;

/// Maximum seed block size on the base layer during bulk construction.
pub const BULK_SEED_BLOCK_L0: usize = 1_024;

/// Maximum seed block size on upper layers during bulk construction.
pub const BULK_SEED_BLOCK_UPPER: usize = 256;

/// Maximum parallel block size on the base layer during bulk construction.
pub const BULK_BLOCK_SIZE_L0: usize = 65_536;

/// Parallel block size on upper layers during bulk construction.
pub const BULK_BLOCK_SIZE_UPPER: usize = 2_048;

/// Number of following block members added as candidates on the base layer.
///
/// Nodes early in a block have little graph context; sampling their block neighbors
/// keeps the base layer connected.
pub const BULK_LOCAL_SAMPLE_L0: usize = 8;

/// Number of seed nodes scanned when looking for a connected fallback entry.
pub const BULK_ENTRY_SCAN_LIMIT: usize = 128;

/// Upper bound on seed nodes appended to an under-filled candidate list.
pub const BULK_SEED_AUGMENT_LIMIT: usize = 32;
