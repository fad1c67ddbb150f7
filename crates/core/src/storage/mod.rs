//! Storage layer: contiguous vector rows and index persistence.
//!
//! Vectors are kept as flat `f64` rows indexed by slot. Snapshots are written in a
//! big-endian binary format with a CRC32 footer (atomic temp-file + rename).

/// Disk persistence: snapshot save/load with atomic writes.
pub mod persistence;
/// Flat per-slot vector rows and norm/mean statistics.
pub mod vectors;

pub use persistence::{load_index, save_index, SpaceResolver};
