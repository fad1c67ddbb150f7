//! Disk persistence for HNSW indexes.
//!
//! An index is written as one flat big-endian binary stream: header, configuration,
//! slot tables, vectors, cached statistics and adjacency lists, followed by a CRC32
//! footer over everything before it. Writes stream through a buffered temp file that is
//! renamed into place once synced.
//!
//! Loading verifies the footer before parsing anything, then rebuilds every derived
//! structure (id map, free list, entry point) from the slot tables, so records whose id
//! and deleted flags disagree are freed rather than trusted.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Take, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::config;
use crate::error::{HnswError, Result};
use crate::hnsw::distance::{DistanceMetric, NodeStats};
use crate::hnsw::graph::{DeletionPolicy, DuplicatePolicy, HnswConfig, NeighborHeuristic};
use crate::hnsw::index::{HnswIndex, IndexCore};

/// Rebuilds a custom distance from its persisted type id and state bytes.
pub type SpaceResolver<'a> = &'a dyn Fn(&str, &[u8]) -> Option<DistanceMetric>;

fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Forwards writes to `inner` and folds every written byte into a CRC32.
struct CrcWriter<W> {
    inner: W,
    hasher: crc32fast::Hasher,
    written: u64,
}

impl<W: Write> CrcWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
            written: 0,
        }
    }

    fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Appends the checksum footer and hands back the inner writer.
    fn finish(mut self) -> io::Result<(W, u64)> {
        let crc = self.checksum();
        self.inner.write_u32::<BigEndian>(crc)?;
        Ok((self.inner, self.written + 4))
    }
}

impl<W: Write> Write for CrcWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn write_len<W: Write>(w: &mut W, len: usize) -> io::Result<()> {
    let len = u32::try_from(len)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("{len} exceeds u32")))?;
    w.write_u32::<BigEndian>(len)
}

fn write_bytes<W: Write>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    write_len(w, bytes.len())?;
    w.write_all(bytes)
}

fn write_str<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    let len = u16::try_from(s.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "space type id too long"))?;
    w.write_u16::<BigEndian>(len)?;
    w.write_all(s.as_bytes())
}

fn read_len<R: Read>(r: &mut R) -> io::Result<usize> {
    Ok(r.read_u32::<BigEndian>()? as usize)
}

/// Fails early when a declared table cannot fit in the rest of the payload.
fn ensure_fits<R>(r: &Take<R>, count: usize, width: usize) -> io::Result<()> {
    match count.checked_mul(width) {
        Some(n) if n as u64 <= r.limit() => Ok(()),
        _ => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "table of {count} entries exceeds the remaining {} bytes",
                r.limit()
            ),
        )),
    }
}

fn read_bytes<R: Read>(r: &mut Take<R>) -> io::Result<Vec<u8>> {
    let len = read_len(r)?;
    ensure_fits(r, len, 1)?;
    let mut out = vec![0u8; len];
    r.read_exact(&mut out)?;
    Ok(out)
}

fn read_str<R: Read>(r: &mut Take<R>) -> io::Result<String> {
    let len = r.read_u16::<BigEndian>()? as usize;
    ensure_fits(r, len, 1)?;
    let mut out = vec![0u8; len];
    r.read_exact(&mut out)?;
    String::from_utf8(out).map_err(|e| invalid_data(e.to_string()))
}

/// Packs flags as bit `i % 8` of byte `i / 8`, trailing zero bytes trimmed.
fn encode_bitmap(flags: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; flags.len().div_ceil(8)];
    for (i, _) in flags.iter().enumerate().filter(|(_, &set)| set) {
        bytes[i / 8] |= 1 << (i % 8);
    }
    while bytes.last() == Some(&0) {
        bytes.pop();
    }
    bytes
}

fn decode_bitmap(bytes: &[u8], len: usize) -> Vec<bool> {
    (0..len)
        .map(|i| bytes.get(i / 8).is_some_and(|b| b & (1 << (i % 8)) != 0))
        .collect()
}

fn write_config<W: Write>(w: &mut W, config: &HnswConfig) -> io::Result<()> {
    write_len(w, config.dimension)?;
    write_len(w, config.m)?;
    write_len(w, config.m_max0)?;
    write_len(w, config.ef_construction)?;
    write_len(w, config.ef_search)?;
    w.write_f64::<BigEndian>(config.level_lambda)?;
    w.write_u64::<BigEndian>(config.seed)?;
    w.write_u8(config.duplicate_policy.to_byte())?;
    w.write_u8(config.deletion_policy.to_byte())?;
    w.write_u8(config.heuristic.to_byte())?;
    write_len(w, config.initial_capacity)?;
    write_len(w, config.ef_repair)?;
    w.write_f64::<BigEndian>(config.alpha)?;
    w.write_u8(config.exact_search as u8)?;
    write_len(w, config.max_layers)?;
    write_str(w, config.distance_metric.type_id())?;
    let mut state = Vec::new();
    config.distance_metric.write_state(&mut state);
    write_bytes(w, &state)
}

fn read_config<R: Read>(r: &mut Take<R>, resolver: SpaceResolver<'_>) -> Result<HnswConfig> {
    let mut config = HnswConfig {
        dimension: read_len(r)?,
        m: read_len(r)?,
        m_max0: read_len(r)?,
        ef_construction: read_len(r)?,
        ef_search: read_len(r)?,
        level_lambda: r.read_f64::<BigEndian>()?,
        seed: r.read_u64::<BigEndian>()?,
        ..HnswConfig::default()
    };
    config.duplicate_policy = DuplicatePolicy::from_byte(r.read_u8()?)
        .ok_or_else(|| invalid_data("unknown duplicate policy"))?;
    config.deletion_policy = DeletionPolicy::from_byte(r.read_u8()?)
        .ok_or_else(|| invalid_data("unknown deletion policy"))?;
    config.heuristic = NeighborHeuristic::from_byte(r.read_u8()?)
        .ok_or_else(|| invalid_data("unknown neighbor heuristic"))?;
    config.initial_capacity = read_len(r)?;
    config.ef_repair = read_len(r)?;
    config.alpha = r.read_f64::<BigEndian>()?;
    config.exact_search = r.read_u8()? != 0;
    config.max_layers = read_len(r)?;

    let type_id = read_str(r)?;
    let state = read_bytes(r)?;
    config.distance_metric = DistanceMetric::builtin(&type_id)
        .or_else(|| resolver(&type_id, &state))
        .ok_or(HnswError::UnknownSpace(type_id))?;

    config
        .validate()
        .map_err(|e| invalid_data(format!("stored configuration is invalid: {e}")))?;
    Ok(config)
}

fn encode_index<W: Write>(core: &IndexCore, w: &mut W) -> io::Result<()> {
    let node_count = core.directory.node_count();

    w.write_u64::<BigEndian>(config::INDEX_FILE_MAGIC)?;
    w.write_u32::<BigEndian>(config::INDEX_FORMAT_VERSION)?;
    write_config(w, &core.config)?;

    write_len(w, node_count)?;
    write_len(w, core.directory.len())?;
    let (entry, max_level) = match core.graph.entry_point() {
        Some(entry) => (entry as i32, core.graph.max_level() as i32),
        None => (-1, -1),
    };
    w.write_i32::<BigEndian>(entry)?;
    w.write_i32::<BigEndian>(max_level)?;

    for &id in core.directory.slot_ids() {
        w.write_i64::<BigEndian>(id)?;
    }
    write_bytes(w, &encode_bitmap(&core.deleted[..node_count]))?;
    for slot in 0..node_count as u32 {
        let level = if core.graph.has_node(slot) {
            core.graph.level(slot) as i32
        } else {
            -1
        };
        w.write_i32::<BigEndian>(level)?;
    }

    for &v in core.space.vectors().rows(node_count) {
        w.write_f64::<BigEndian>(v)?;
    }
    for slot in 0..node_count as u32 {
        let stats = core.space.aux().get(slot);
        w.write_f64::<BigEndian>(stats.norm)?;
        w.write_f64::<BigEndian>(stats.mean)?;
        w.write_f64::<BigEndian>(stats.centered_norm)?;
    }

    let level_count = core.graph.level_count();
    write_len(w, level_count)?;
    for level in 0..level_count {
        for slot in 0..node_count as u32 {
            let list = core.graph.neighbors(slot, level);
            write_len(w, list.len())?;
            for &n in list {
                w.write_u32::<BigEndian>(n)?;
            }
        }
    }
    Ok(())
}

/// Streams the first `payload_len` bytes of `file` through a CRC32 and compares it
/// with the footer that follows them.
fn verify_checksum(file: &mut File, payload_len: u64) -> io::Result<()> {
    let mut payload = BufReader::new(&mut *file).take(payload_len);
    let mut sink = CrcWriter::new(io::sink());
    io::copy(&mut payload, &mut sink)?;
    let computed_crc = sink.checksum();
    let stored_crc = payload.into_inner().read_u32::<BigEndian>()?;
    if stored_crc != computed_crc {
        return Err(invalid_data(format!(
            "index CRC32 mismatch: expected {stored_crc:#010x}, got {computed_crc:#010x}"
        )));
    }
    Ok(())
}

fn decode_index<R: Read>(r: &mut Take<R>, resolver: SpaceResolver<'_>) -> Result<IndexCore> {
    let magic = r.read_u64::<BigEndian>()?;
    if magic != config::INDEX_FILE_MAGIC {
        return Err(invalid_data(format!("bad magic {magic:#018x}")).into());
    }
    let version = r.read_u32::<BigEndian>()?;
    if !(config::INDEX_MIN_FORMAT_VERSION..=config::INDEX_FORMAT_VERSION).contains(&version) {
        return Err(invalid_data(format!("unsupported index format version {version}")).into());
    }
    let config = read_config(r, resolver)?;
    let dimension = config.dimension;

    let node_count = read_len(r)?;
    let stored_size = read_len(r)?;
    let entry = r.read_i32::<BigEndian>()?;
    let max_level = r.read_i32::<BigEndian>()?;

    ensure_fits(r, node_count, 8)?;
    let mut ids = vec![0i64; node_count];
    r.read_i64_into::<BigEndian>(&mut ids)?;
    let stored_deleted = decode_bitmap(&read_bytes(r)?, node_count);
    ensure_fits(r, node_count, 4)?;
    let mut levels = vec![0i32; node_count];
    r.read_i32_into::<BigEndian>(&mut levels)?;

    let mut core = IndexCore::new(config);
    core.ensure_capacity(node_count);
    for (slot, &level) in levels.iter().enumerate() {
        if level < 0 {
            continue;
        }
        if level as usize >= core.config.max_layers {
            return Err(
                invalid_data(format!("slot {slot} has level {level} above the layer cap")).into(),
            );
        }
        core.graph.init_node(slot as u32, level as usize);
    }

    ensure_fits(r, node_count, dimension * 8)?;
    let mut vectors = vec![0.0f64; node_count * dimension];
    r.read_f64_into::<BigEndian>(&mut vectors)?;
    ensure_fits(r, node_count, 24)?;
    for (slot, row) in vectors.chunks_exact(dimension).enumerate() {
        let stats = NodeStats {
            norm: r.read_f64::<BigEndian>()?,
            mean: r.read_f64::<BigEndian>()?,
            centered_norm: r.read_f64::<BigEndian>()?,
        };
        core.space.restore(slot as u32, row, stats);
    }

    let level_count = read_len(r)?;
    let mut dropped_edges = 0usize;
    let mut list: Vec<u32> = Vec::new();
    for level in 0..level_count {
        for slot in 0..node_count as u32 {
            let count = read_len(r)?;
            ensure_fits(r, count, 4)?;
            list.resize(count, 0);
            r.read_u32_into::<BigEndian>(&mut list)?;
            list.retain(|&n| (n as usize) < node_count && n != slot);
            dropped_edges += count - list.len();
            if core.graph.has_node(slot) && level <= core.graph.level(slot) {
                core.graph.set_neighbors(slot, level, &list);
            }
        }
    }
    if r.limit() != 0 {
        return Err(invalid_data(format!(
            "{} trailing bytes after adjacency lists",
            r.limit()
        ))
        .into());
    }

    // Derived state: id map, free list, deleted flags.
    let graph = &core.graph;
    let freed = core
        .directory
        .rebuild(ids, |slot| !stored_deleted[slot as usize] && graph.has_node(slot));
    for slot in 0..node_count {
        core.deleted[slot] = core.directory.id_of(slot as u32).is_none();
    }
    for &slot in &freed {
        core.graph.clear_node(slot);
        core.space.on_remove(slot);
    }
    for slot in 0..node_count as u32 {
        if !core.graph.has_node(slot) {
            continue;
        }
        for level in 0..=core.graph.level(slot) {
            let before = core.graph.neighbors(slot, level).len();
            list.clear();
            list.extend(
                core.graph
                    .neighbors(slot, level)
                    .iter()
                    .copied()
                    .filter(|&n| core.is_live(n) && core.graph.level(n) >= level),
            );
            dropped_edges += before - list.len();
            core.graph.set_neighbors(slot, level, &list);
        }
    }
    if dropped_edges > 0 || stored_size != core.directory.len() {
        tracing::warn!(
            dropped_edges,
            freed_slots = freed.len(),
            stored_size,
            size = core.directory.len(),
            "index file contained inconsistent records"
        );
    }

    let entry_valid = entry >= 0
        && (entry as usize) < node_count
        && core.is_live(entry as u32)
        && core.graph.has_node(entry as u32)
        && core.graph.level(entry as u32) as i32 == max_level;
    if entry_valid {
        core.graph.set_entry_point(Some((entry as u32, max_level as usize)));
    } else {
        core.reselect_entry_point();
    }
    Ok(core)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Streams `core` into a fresh file at `tmp_path` and syncs it. Returns the byte count.
fn write_file(core: &IndexCore, tmp_path: &Path) -> io::Result<u64> {
    let file = File::create(tmp_path)?;
    let mut w = CrcWriter::new(BufWriter::new(file));
    encode_index(core, &mut w)?;
    let (buffered, written) = w.finish()?;
    let file = buffered.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(written)
}

/// Writes `index` to `path` atomically.
pub fn save_index(index: &HnswIndex, path: &Path) -> Result<()> {
    let core = index.read_core();
    let tmp_path = temp_path(path);
    let written = match write_file(&core, &tmp_path) {
        Ok(written) => written,
        Err(e) => {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
    };
    fs::rename(&tmp_path, path)?;
    tracing::info!(
        path = %path.display(),
        bytes = written,
        nodes = core.directory.node_count(),
        size = core.directory.len(),
        "saved index"
    );
    Ok(())
}

/// Reads an index written by [`save_index`].
pub fn load_index(path: &Path, resolver: SpaceResolver<'_>) -> Result<HnswIndex> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if len < 4 {
        return Err(invalid_data("index file too short").into());
    }
    let payload_len = len - 4;
    verify_checksum(&mut file, payload_len)?;
    file.seek(SeekFrom::Start(0))?;
    let mut payload = BufReader::new(file).take(payload_len);
    let core = decode_index(&mut payload, resolver)?;
    tracing::info!(
        path = %path.display(),
        nodes = core.directory.node_count(),
        size = core.directory.len(),
        "loaded index"
    );
    Ok(HnswIndex::from_core(core))
}

impl HnswIndex {
    /// Saves the index to `path` (temp file + rename) under a read lock.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        save_index(self, path.as_ref())
    }

    /// Loads an index that uses a built-in distance metric.
    pub fn load(path: impl AsRef<Path>) -> Result<HnswIndex> {
        load_index(path.as_ref(), &|_, _| None)
    }

    /// Loads an index, resolving custom distance type ids through `resolver`.
    pub fn load_with(
        path: impl AsRef<Path>,
        resolver: impl Fn(&str, &[u8]) -> Option<DistanceMetric>,
    ) -> Result<HnswIndex> {
        load_index(path.as_ref(), &resolver)
    }
}
