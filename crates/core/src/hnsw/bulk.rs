//! Parallel bulk construction.
//!
//! [`BulkBuilder`] collects id/vector batches and builds the whole graph in one pass,
//! level by level from the top down. Each level is processed in blocks:
//!
//! - **Seed block**: a few hundred to a thousand nodes linked by brute force so later
//!   blocks have a connected region to search from.
//! - **Phase A**: every node of a block searches the already-built part of the level
//!   in parallel and picks its neighbors. The graph is only read.
//! - **Phase B**: every node touched by the picks (the block itself plus every picked
//!   neighbor) re-selects its list from its old edges, its own picks and the incoming
//!   proposals. Lists are computed in parallel and then applied one by one.
//!
//! A level is finished before the next one down uses it for greedy descent.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{
    BULK_BLOCK_SIZE_L0, BULK_BLOCK_SIZE_UPPER, BULK_ENTRY_SCAN_LIMIT, BULK_LOCAL_SAMPLE_L0,
    BULK_SEED_AUGMENT_LIMIT, BULK_SEED_BLOCK_L0, BULK_SEED_BLOCK_UPPER,
};
use crate::error::{HnswError, Result};
use crate::hnsw::graph::HnswConfig;
use crate::hnsw::heap::Neighbor;
use crate::hnsw::index::{level_for_draw, HnswIndex, IndexCore};
use crate::hnsw::scratch::{with_scratch, SearchScratch};
use crate::hnsw::search::{filter_candidates, GraphView};
use crate::hnsw::space::QueryContext;

/// Tuning knobs of the bulk engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkOptions {
    /// Worker threads.
    pub concurrency: usize,
    /// Search budget while building; 0 uses the index `ef_construction`.
    pub ef_construction: usize,
    pub seed_block_l0: usize,
    pub seed_block_upper: usize,
    pub block_size_l0: usize,
    pub block_size_upper: usize,
    /// Block neighbors added to every base-layer candidate list.
    pub local_sample_l0: usize,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            ef_construction: 0,
            seed_block_l0: BULK_SEED_BLOCK_L0,
            seed_block_upper: BULK_SEED_BLOCK_UPPER,
            block_size_l0: BULK_BLOCK_SIZE_L0,
            block_size_upper: BULK_BLOCK_SIZE_UPPER,
            local_sample_l0: BULK_LOCAL_SAMPLE_L0,
        }
    }
}

impl BulkOptions {
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(HnswError::invalid("concurrency must be positive"));
        }
        if self.seed_block_l0 == 0 || self.seed_block_upper == 0 {
            return Err(HnswError::invalid("seed block sizes must be positive"));
        }
        if self.block_size_l0 == 0 || self.block_size_upper == 0 {
            return Err(HnswError::invalid("block sizes must be positive"));
        }
        Ok(())
    }
}

/// One-shot parallel index builder.
///
/// ```
/// use hnswdb_core::{BulkBuilder, HnswConfig};
///
/// let mut builder = BulkBuilder::new(HnswConfig::new(2)).unwrap();
/// builder.add_batch(vec![1, 2], vec![vec![0.0, 0.0], vec![1.0, 1.0]]).unwrap();
/// let index = builder.build().unwrap();
/// assert_eq!(index.len(), 2);
/// ```
#[derive(Debug)]
pub struct BulkBuilder {
    config: HnswConfig,
    options: BulkOptions,
    ids: Vec<i64>,
    vectors: Vec<Vec<f64>>,
    seen: HashSet<i64>,
    built: bool,
}

impl BulkBuilder {
    pub fn new(config: HnswConfig) -> Result<Self> {
        Self::with_options(config, BulkOptions::default())
    }

    pub fn with_options(config: HnswConfig, options: BulkOptions) -> Result<Self> {
        config.validate()?;
        options.validate()?;
        Ok(Self {
            config,
            options,
            ids: Vec::new(),
            vectors: Vec::new(),
            seen: HashSet::new(),
            built: false,
        })
    }

    /// Vectors accumulated so far.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Queues a batch. The batch is validated as a whole and rejected without side
    /// effects if any id is negative or already queued, or any vector has the wrong
    /// dimension.
    pub fn add_batch(&mut self, ids: Vec<i64>, vectors: Vec<Vec<f64>>) -> Result<()> {
        self.ensure_not_built()?;
        self.validate_batch(&ids, &vectors)?;
        self.seen.extend(ids.iter().copied());
        self.ids.extend(ids);
        self.vectors.extend(vectors);
        Ok(())
    }

    /// Builds an index from every queued batch. The builder cannot be reused.
    pub fn build(&mut self) -> Result<HnswIndex> {
        self.ensure_not_built()?;
        self.built = true;
        let ids = std::mem::take(&mut self.ids);
        let vectors = std::mem::take(&mut self.vectors);
        self.seen.clear();
        run(self.config.clone(), &self.options, ids, vectors)
    }

    /// Queues one last batch and builds.
    pub fn build_from(&mut self, ids: &[i64], vectors: &[Vec<f64>]) -> Result<HnswIndex> {
        self.add_batch(ids.to_vec(), vectors.to_vec())?;
        self.build()
    }

    fn ensure_not_built(&self) -> Result<()> {
        if self.built {
            return Err(HnswError::IllegalState("Builder already used".into()));
        }
        Ok(())
    }

    fn validate_batch(&self, ids: &[i64], vectors: &[Vec<f64>]) -> Result<()> {
        if ids.len() != vectors.len() {
            return Err(HnswError::invalid(format!(
                "ids and vectors must have the same length ({} vs {})",
                ids.len(),
                vectors.len()
            )));
        }
        if self.ids.len() + ids.len() > u32::MAX as usize {
            return Err(HnswError::invalid("too many vectors for one index"));
        }
        let mut batch = HashSet::with_capacity(ids.len());
        for (&id, vector) in ids.iter().zip(vectors) {
            if vector.len() != self.config.dimension {
                return Err(HnswError::dimension_mismatch(
                    self.config.dimension,
                    vector.len(),
                ));
            }
            if id < 0 {
                return Err(HnswError::invalid(format!(
                    "ids must be non-negative, got {id}"
                )));
            }
            if self.seen.contains(&id) || !batch.insert(id) {
                return Err(HnswError::invalid(format!(
                    "Duplicate id {id} in bulk build input"
                )));
            }
        }
        Ok(())
    }
}

fn run(
    config: HnswConfig,
    options: &BulkOptions,
    ids: Vec<i64>,
    vectors: Vec<Vec<f64>>,
) -> Result<HnswIndex> {
    let mut core = IndexCore::new(config);
    if ids.is_empty() {
        return Ok(HnswIndex::from_core(core));
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.concurrency)
        .thread_name(|i| format!("hnsw-bulk-{i}"))
        .build()
        .map_err(|e| HnswError::BuildFailed(format!("worker pool: {e}")))?;

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        pool.install(|| populate(&mut core, options, &ids, &vectors))
    }));
    if let Err(payload) = outcome {
        return Err(HnswError::BuildFailed(panic_message(payload)));
    }
    info!(
        nodes = ids.len(),
        max_level = core.graph.max_level(),
        threads = options.concurrency,
        "bulk build complete"
    );
    Ok(HnswIndex::from_core(core))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("bulk worker panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("bulk worker panicked: {msg}")
    } else {
        "bulk worker panicked".to_string()
    }
}

/// Ingests every vector into slots `0..n` and builds the graph. Runs on the bulk pool.
fn populate(core: &mut IndexCore, options: &BulkOptions, ids: &[i64], vectors: &[Vec<f64>]) {
    let total = ids.len();
    core.ensure_capacity(total);
    let rows: Vec<&[f64]> = vectors.iter().map(Vec::as_slice).collect();
    core.space.ingest_parallel(&rows);

    let config = &core.config;
    let levels: Vec<usize> = ids
        .par_iter()
        .map(|&id| {
            let mut rng = StdRng::seed_from_u64(config.seed ^ id as u64);
            level_for_draw(rng.gen(), config)
        })
        .collect();

    for (slot, &level) in levels.iter().enumerate() {
        core.deleted[slot] = false;
        core.graph.init_node(slot as u32, level);
    }
    // first slot with the highest level
    let (entry, max_level) = levels
        .iter()
        .enumerate()
        .fold((0, 0), |best, (slot, &level)| {
            if level > best.1 {
                (slot, level)
            } else {
                best
            }
        });
    core.graph.set_entry_point(Some((entry as u32, max_level)));

    let ef = if options.ef_construction > 0 {
        options.ef_construction
    } else {
        core.config.ef_construction
    };
    let mut plan = LevelPlan {
        options,
        total,
        ef,
        seeds: Vec::new(),
        level_entry: None,
    };
    for level in (0..=max_level).rev() {
        let mut nodes: Vec<u32> = levels
            .iter()
            .enumerate()
            .filter(|(_, &l)| l >= level)
            .map(|(slot, _)| slot as u32)
            .collect();
        let mut rng = StdRng::seed_from_u64(
            core.config
                .seed
                .wrapping_add(level as u64 * 31)
                .wrapping_add(17),
        );
        nodes.shuffle(&mut rng);
        plan.build_level(core, level, nodes, entry as u32);
    }

    core.directory.rebuild(ids.to_vec(), |_| true);
}

/// Per-level state shared by every block of the level.
struct LevelPlan<'a> {
    options: &'a BulkOptions,
    total: usize,
    ef: usize,
    seeds: Vec<u32>,
    level_entry: Option<u32>,
}

impl LevelPlan<'_> {
    fn seed_block_size(&self, level: usize, nodes: usize) -> usize {
        if level == 0 {
            let dynamic = self.total / 32;
            self.options
                .seed_block_l0
                .min(nodes)
                .min(dynamic.max(256))
                .max(1)
        } else {
            nodes.min(self.options.seed_block_upper)
        }
    }

    fn block_size(&self, level: usize) -> usize {
        if level == 0 {
            let dynamic = (self.total / 6).max(8_000);
            self.options.block_size_l0.min(dynamic).max(1)
        } else {
            self.options.block_size_upper
        }
    }

    fn build_level(&mut self, core: &mut IndexCore, level: usize, mut nodes: Vec<u32>, entry: u32) {
        if nodes.is_empty() {
            return;
        }
        let seed_size = self.seed_block_size(level, nodes.len());
        // the global entry point always lands in the seed block
        if let Some(pos) = nodes.iter().position(|&n| n == entry) {
            if pos >= seed_size {
                nodes.swap(pos, seed_size - 1);
            }
        }
        self.seeds = nodes[..seed_size].to_vec();
        self.level_entry = core.graph.entry_point().or(self.seeds.first().copied());

        let seeds = &self.seeds;
        let picks = {
            let core: &IndexCore = core;
            let view = core.view();
            seeds
                .par_iter()
                .map(|&node| with_scratch(|s| self.link_within(core, view, level, seeds, node, s)))
                .collect::<Vec<_>>()
        };
        merge_block(core, level, seeds, &picks);

        let block_size = self.block_size(level);
        let mut blocks = 1;
        for block in nodes[seed_size..].chunks(block_size) {
            let picks = {
                let core: &IndexCore = core;
                let view = core.view();
                block
                    .par_iter()
                    .enumerate()
                    .map(|(idx, &node)| {
                        with_scratch(|s| {
                            self.link_by_search(core, view, level, block, idx, node, s)
                        })
                    })
                    .collect::<Vec<_>>()
            };
            merge_block(core, level, block, &picks);
            blocks += 1;
        }
        debug!(
            layer = level,
            nodes = nodes.len(),
            seed_block = seed_size,
            blocks,
            "bulk level built"
        );
    }

    /// Seed block linking: every other member of the block is a candidate.
    fn link_within(
        &self,
        core: &IndexCore,
        view: GraphView<'_>,
        level: usize,
        block: &[u32],
        node: u32,
        scratch: &mut SearchScratch,
    ) -> Vec<u32> {
        scratch.candidates.clear();
        scratch.candidates.extend(
            block
                .iter()
                .filter(|&&other| other != node)
                .map(|&other| Neighbor::new(other, core.space.distance_between_nodes(node, other))),
        );
        select_from_candidates(core, view, level, node, scratch)
    }

    /// Phase A: searches the built part of the level for `node`'s neighbors.
    #[allow(clippy::too_many_arguments)]
    fn link_by_search(
        &self,
        core: &IndexCore,
        view: GraphView<'_>,
        level: usize,
        block: &[u32],
        idx: usize,
        node: u32,
        scratch: &mut SearchScratch,
    ) -> Vec<u32> {
        let space = &core.space;
        let query = space.prepare_query_for_node(node);
        let entry = self.entry_for_level(view, &query, level).unwrap_or(node);

        scratch.begin(core.graph.slots(), self.ef);
        scratch.seed(entry, space.distance(&query, entry));
        let found = view.search_level(&query, level, None, scratch);
        scratch.take_results();

        let max_degree = core.config.max_degree(level);
        if found < self.ef && found < max_degree.min(4) {
            let augment = self
                .seeds
                .iter()
                .take(BULK_SEED_AUGMENT_LIMIT)
                .filter(|&&seed| has_edges(view, seed, level))
                .map(|&seed| Neighbor::new(seed, space.distance(&query, seed)));
            scratch.candidates.extend(augment);
        }
        if level == 0 && block.len() > 1 {
            let sample = self.options.local_sample_l0.min(block.len() - 1);
            let local = (1..=sample)
                .map(|step| block[(idx + step) % block.len()])
                .map(|other| Neighbor::new(other, space.distance_between_nodes(node, other)));
            scratch.candidates.extend(local);
        }
        select_from_candidates(core, view, level, node, scratch)
    }

    /// Greedy descent from the global entry point, else the level entry point, else the
    /// closest seed that already has edges.
    fn entry_for_level(
        &self,
        view: GraphView<'_>,
        query: &QueryContext,
        level: usize,
    ) -> Option<u32> {
        if let Some(global) = view.graph.entry_point() {
            let entry = view.descend(query, global, view.graph.max_level(), level);
            if has_edges(view, entry, level) {
                return Some(entry);
            }
        }
        if let Some(entry) = self.level_entry.filter(|&e| has_edges(view, e, level)) {
            return Some(entry);
        }
        self.seeds
            .iter()
            .take(BULK_ENTRY_SCAN_LIMIT)
            .filter(|&&seed| has_edges(view, seed, level))
            .map(|&seed| (seed, view.space.distance(query, seed)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(seed, _)| seed)
    }
}

#[inline]
fn has_edges(view: GraphView<'_>, slot: u32, level: usize) -> bool {
    !view.graph.neighbors(slot, level).is_empty()
}

/// Filters `scratch.candidates` and runs neighbor selection for `node`.
fn select_from_candidates(
    core: &IndexCore,
    view: GraphView<'_>,
    level: usize,
    node: u32,
    scratch: &mut SearchScratch,
) -> Vec<u32> {
    filter_candidates(&mut scratch.candidates, Some(node), |s| !view.is_deleted(s));
    core.selection().select(
        &core.space,
        node,
        &scratch.candidates,
        core.config.max_degree(level),
        &mut scratch.selected,
    );
    scratch.selected.clone()
}

/// Phase B: every node touched by `picks` re-selects its list from its previous
/// edges, its own picks and the proposals pointing at it.
fn merge_block(core: &mut IndexCore, level: usize, block: &[u32], picks: &[Vec<u32>]) {
    let mut touched = Vec::new();
    let mut marked = HashSet::new();
    let mut own: HashMap<u32, usize> = HashMap::with_capacity(block.len());
    let mut incoming: HashMap<u32, Vec<u32>> = HashMap::new();
    for (idx, (&node, selected)) in block.iter().zip(picks).enumerate() {
        own.insert(node, idx);
        if marked.insert(node) {
            touched.push(node);
        }
        for &neighbor in selected {
            if marked.insert(neighbor) {
                touched.push(neighbor);
            }
            incoming.entry(neighbor).or_default().push(node);
        }
    }

    let updates: Vec<Option<Vec<u32>>> = {
        let core = &*core;
        let view = core.view();
        touched
            .par_iter()
            .map(|&node| {
                with_scratch(|scratch| {
                    let space = &core.space;
                    let own_picks = own.get(&node).map_or(&[][..], |&i| picks[i].as_slice());
                    let proposals = incoming.get(&node).map_or(&[][..], Vec::as_slice);
                    scratch.candidates.clear();
                    scratch.candidates.extend(
                        core.graph
                            .neighbors(node, level)
                            .iter()
                            .chain(own_picks)
                            .chain(proposals)
                            .map(|&n| Neighbor::new(n, space.distance_between_nodes(node, n))),
                    );
                    let selected = select_from_candidates(core, view, level, node, scratch);
                    (!selected.is_empty()).then_some(selected)
                })
            })
            .collect()
    };

    for (&node, update) in touched.iter().zip(updates) {
        if let Some(list) = update {
            core.graph.set_neighbors(node, level, &list);
        }
    }
}
