use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use hnswdb_core::{
    CustomDistance, DeletionPolicy, DistanceMetric, DuplicatePolicy, HnswConfig, HnswError,
    HnswIndex, NeighborHeuristic,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect()
}

fn build(config: HnswConfig, vectors: &[Vec<f64>]) -> HnswIndex {
    let index = HnswIndex::new(config).unwrap();
    for (i, v) in vectors.iter().enumerate() {
        index.add(i as i64, v).unwrap();
    }
    index
}

/// Mean fraction of the exact top-k found by the graph search.
fn recall(index: &HnswIndex, queries: &[Vec<f64>], k: usize, ef: usize) -> f64 {
    let mut total = 0.0;
    for q in queries {
        let exact: HashSet<i64> = index
            .search_exact(q, k)
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        let approx = index.search_knn_with_ef(q, k, ef).unwrap();
        let hits = approx.iter().filter(|r| exact.contains(&r.id)).count();
        total += hits as f64 / exact.len() as f64;
    }
    total / queries.len() as f64
}

// ── Basic operations ──

#[test]
fn test_add_and_search_nearest() {
    let index = HnswIndex::new(HnswConfig::new(2)).unwrap();
    index.add(10, &[0.0, 0.0]).unwrap();
    index.add(20, &[5.0, 5.0]).unwrap();
    index.add(30, &[10.0, 10.0]).unwrap();

    let hits = index.search_knn(&[4.0, 4.5], 2).unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, 20);
    assert_eq!(hits[1].id, 10);
    assert!(hits[0].distance <= hits[1].distance);
    assert_eq!(index.len(), 3);
    assert!(index.contains(30));
    assert!(!index.contains(40));
}

#[test]
fn test_results_sorted_and_bounded_by_k() {
    let vectors = random_vectors(300, 6, 1);
    let index = build(HnswConfig::new(6), &vectors);
    let hits = index.search_knn(&vectors[17], 25).unwrap();
    assert_eq!(hits.len(), 25);
    assert_eq!(hits[0].id, 17);
    for pair in hits.windows(2) {
        assert!(pair[0].distance <= pair[1].distance, "{pair:?}");
    }
    let ids: HashSet<i64> = hits.iter().map(|r| r.id).collect();
    assert_eq!(ids.len(), 25);
}

#[test]
fn test_fewer_vectors_than_k() {
    let index = build(HnswConfig::new(3), &random_vectors(4, 3, 2));
    let hits = index.search_knn(&[0.0, 0.0, 0.0], 10).unwrap();
    assert_eq!(hits.len(), 4);
}

#[test]
fn test_oversized_k_and_ef_are_bounded_by_size() {
    let index = build(HnswConfig::new(2), &random_vectors(10, 2, 3));
    let q = [0.0, 0.0];
    let exact = index.search_exact(&q, usize::MAX).unwrap();
    assert_eq!(exact.len(), 10);
    assert_eq!(index.search_knn(&q, usize::MAX).unwrap(), exact);
    let top3 = index.search_knn_with_ef(&q, 3, usize::MAX).unwrap();
    assert_eq!(top3, exact[..3].to_vec());
}

#[test]
fn test_dimension_mismatch_leaves_index_untouched() {
    let index = HnswIndex::new(HnswConfig::new(3)).unwrap();
    index.add(1, &[1.0, 2.0, 3.0]).unwrap();
    let before = index.stats();

    let err = index.add(2, &[1.0, 2.0]).unwrap_err();
    assert!(matches!(err, HnswError::InvalidArgument(_)));
    assert!(index.add(-5, &[1.0, 2.0, 3.0]).is_err());
    assert!(index.search_knn(&[1.0], 1).is_err());
    assert!(index.search_knn(&[1.0, 2.0, 3.0], 0).is_err());

    assert_eq!(index.stats(), before);
    assert!(!index.contains(2));
    assert_eq!(index.search_knn(&[1.0, 2.0, 3.0], 1).unwrap()[0].id, 1);
}

#[test]
fn test_invalid_config_is_rejected() {
    assert!(HnswIndex::new(HnswConfig::default()).is_err());
    let config = HnswConfig {
        m: 16,
        m_max0: 8,
        ..HnswConfig::new(4)
    };
    assert!(matches!(
        HnswIndex::new(config),
        Err(HnswError::InvalidArgument(_))
    ));
}

// ── Duplicates ──

#[test]
fn test_duplicate_reject_policy() {
    let config = HnswConfig {
        duplicate_policy: DuplicatePolicy::Reject,
        ..HnswConfig::new(2)
    };
    let index = HnswIndex::new(config).unwrap();
    index.add(7, &[1.0, 1.0]).unwrap();
    let err = index.add(7, &[9.0, 9.0]).unwrap_err();
    assert!(matches!(err, HnswError::InvalidArgument(_)));
    assert_eq!(index.len(), 1);
    let hits = index.search_knn(&[1.0, 1.0], 1).unwrap();
    assert_eq!(hits[0].distance, 0.0);
}

#[test]
fn test_duplicate_overwrite_policy() {
    let index = HnswIndex::new(HnswConfig::new(2)).unwrap();
    for i in 0..20 {
        index.add(i, &[i as f64, 0.0]).unwrap();
    }
    index.add(5, &[100.0, 100.0]).unwrap();
    assert_eq!(index.len(), 20);

    let hits = index.search_knn(&[100.0, 100.0], 1).unwrap();
    assert_eq!(hits[0].id, 5);
    assert_eq!(hits[0].distance, 0.0);
    let near_old = index.search_knn(&[5.0, 0.0], 1).unwrap();
    assert_ne!(near_old[0].id, 5);
}

// ── Removal ──

#[test]
fn test_remove_updates_size_and_results() {
    let vectors = random_vectors(200, 4, 3);
    let index = build(HnswConfig::new(4), &vectors);

    assert!(index.remove(42));
    assert!(!index.remove(42));
    assert!(!index.remove(9_999));
    assert_eq!(index.len(), 199);
    assert!(!index.contains(42));

    let hits = index.search_knn(&vectors[42], 20).unwrap();
    assert!(hits.iter().all(|r| r.id != 42));
    assert!(index.neighbors(42, 0).is_none());
}

#[test]
fn test_freed_slot_is_reused() {
    let index = HnswIndex::new(HnswConfig::new(2)).unwrap();
    index.add(1, &[0.0, 0.0]).unwrap();
    index.add(2, &[1.0, 0.0]).unwrap();
    index.add(3, &[2.0, 0.0]).unwrap();
    assert_eq!(index.node_count(), 3);

    assert!(index.remove(2));
    assert_eq!(index.node_count(), 3);
    index.add(4, &[1.5, 0.0]).unwrap();
    assert_eq!(index.node_count(), 3);
    assert_eq!(index.len(), 3);

    let hits = index.search_knn(&[1.5, 0.0], 1).unwrap();
    assert_eq!(hits[0].id, 4);
    for id in [1, 3, 4] {
        let neighbors = index.neighbors(id, 0).unwrap();
        assert!(!neighbors.contains(&2), "id {id} still links to removed id");
    }
}

#[test]
fn test_entry_point_reselected_after_removal() {
    let vectors = random_vectors(150, 3, 4);
    let index = build(HnswConfig::new(3), &vectors);

    let entry = index.entry_point().unwrap();
    assert_eq!(index.level_of(entry), index.max_level());
    assert!(index.remove(entry));

    let next = index.entry_point().unwrap();
    assert_ne!(next, entry);
    assert!(index.contains(next));
    assert_eq!(index.level_of(next), index.max_level());
    assert!(!index.search_knn(&vectors[0], 5).unwrap().is_empty());
}

#[test]
fn test_remove_everything() {
    let vectors = random_vectors(30, 3, 5);
    let index = build(HnswConfig::new(3), &vectors);
    for id in 0..30 {
        assert!(index.remove(id));
    }
    assert!(index.is_empty());
    assert_eq!(index.entry_point(), None);
    assert_eq!(index.max_level(), None);
    assert!(index.search_knn(&vectors[0], 3).unwrap().is_empty());

    index.add(100, &vectors[3]).unwrap();
    assert_eq!(index.entry_point(), Some(100));
    assert_eq!(index.search_knn(&vectors[3], 1).unwrap()[0].id, 100);
}

#[test]
fn test_lazy_deletion_policy_still_excludes_removed() {
    let config = HnswConfig {
        deletion_policy: DeletionPolicy::Lazy,
        ..HnswConfig::new(4)
    };
    let vectors = random_vectors(200, 4, 6);
    let index = build(config, &vectors);
    for id in (0..200).step_by(3) {
        index.remove(id);
    }
    for q in vectors.iter().take(20) {
        let hits = index.search_knn(q, 10).unwrap();
        assert!(hits.iter().all(|r| r.id % 3 != 0), "{hits:?}");
    }
}

// ── Recall ──

#[test]
fn test_recall_against_exact() {
    let config = HnswConfig {
        ef_construction: 100,
        ..HnswConfig::new(8)
    };
    let vectors = random_vectors(1_500, 8, 7);
    let index = build(config, &vectors);
    let queries = random_vectors(50, 8, 8);
    let r = recall(&index, &queries, 10, 100);
    assert!(r >= 0.9, "recall {r}");
}

#[test]
fn test_simple_heuristic_recall() {
    let config = HnswConfig {
        ef_construction: 100,
        heuristic: NeighborHeuristic::Simple,
        ..HnswConfig::new(8)
    };
    let vectors = random_vectors(800, 8, 9);
    let index = build(config, &vectors);
    let queries = random_vectors(30, 8, 10);
    let r = recall(&index, &queries, 10, 100);
    assert!(r >= 0.85, "recall {r}");
}

#[test]
fn test_random_insert_delete_keeps_recall() {
    let config = HnswConfig {
        ef_construction: 100,
        ..HnswConfig::new(8)
    };
    let vectors = random_vectors(1_000, 8, 11);
    let index = build(config, &vectors[..700]);

    let mut rng = StdRng::seed_from_u64(12);
    let mut ids: Vec<i64> = (0..700).collect();
    ids.shuffle(&mut rng);
    let removed: HashSet<i64> = ids[..200].iter().copied().collect();
    for &id in &removed {
        assert!(index.remove(id));
    }
    for (i, v) in vectors.iter().enumerate().skip(700) {
        index.add(i as i64, v).unwrap();
    }
    assert_eq!(index.len(), 800);

    let queries = random_vectors(40, 8, 13);
    for q in &queries {
        let hits = index.search_knn(q, 10).unwrap();
        assert!(hits.iter().all(|r| !removed.contains(&r.id)));
    }
    let r = recall(&index, &queries, 10, 100);
    assert!(r >= 0.9, "recall {r}");
}

#[test]
fn test_ten_thousand_unit_vectors_find_themselves() {
    let vectors: Vec<Vec<f64>> = random_vectors(10_000, 8, 14)
        .into_iter()
        .map(|v| {
            let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
            v.iter().map(|x| x / norm).collect()
        })
        .collect();
    let index = build(HnswConfig::new(8), &vectors);
    assert_eq!(index.len(), 10_000);

    let hits = index.search_knn(&vectors[42], 10).unwrap();
    assert_eq!(hits.len(), 10);
    assert_eq!(hits[0].id, 42);
    assert_eq!(hits[0].distance, 0.0);
}

#[test]
fn test_ef_below_k_is_clamped() {
    let vectors = random_vectors(200, 4, 15);
    let index = build(HnswConfig::new(4), &vectors);
    let hits = index.search_knn_with_ef(&vectors[0], 20, 1).unwrap();
    assert_eq!(hits.len(), 20);
    assert_eq!(hits[0].id, 0);
}

#[test]
fn test_exact_mode_matches_linear_scan() {
    let config = HnswConfig {
        exact_search: true,
        ..HnswConfig::new(5)
    };
    let vectors = random_vectors(250, 5, 16);
    let index = build(config, &vectors);
    for q in random_vectors(10, 5, 17) {
        let graph = index.search_knn(&q, 15).unwrap();
        let scan = index.search_exact(&q, 15).unwrap();
        assert_eq!(graph, scan);
    }
}

// ── Distance metrics ──

#[test]
fn test_cosine_metric() {
    let config = HnswConfig {
        distance_metric: DistanceMetric::Cosine,
        ..HnswConfig::new(2)
    };
    let index = HnswIndex::new(config).unwrap();
    index.add(1, &[1.0, 0.0]).unwrap();
    index.add(2, &[0.0, 1.0]).unwrap();
    index.add(3, &[1.0, 1.0]).unwrap();
    index.add(4, &[0.0, 0.0]).unwrap();

    let hits = index.search_knn(&[3.0, 3.0], 4).unwrap();
    assert_eq!(hits[0].id, 3);
    assert!(hits[0].distance.abs() < 1e-12, "{}", hits[0].distance);
    let zero = hits.iter().find(|r| r.id == 4).unwrap();
    assert_eq!(zero.distance, 1.0);
}

#[test]
fn test_correlation_metric() {
    let config = HnswConfig {
        distance_metric: DistanceMetric::Correlation,
        ..HnswConfig::new(3)
    };
    let index = HnswIndex::new(config).unwrap();
    index.add(1, &[11.0, 12.0, 13.0]).unwrap();
    index.add(2, &[3.0, 2.0, 1.0]).unwrap();
    index.add(3, &[5.0, 5.0, 5.0]).unwrap();

    let hits = index.search_knn(&[1.0, 2.0, 3.0], 3).unwrap();
    assert_eq!(hits[0].id, 1);
    assert!(hits[0].distance.abs() < 1e-12);
    let constant = hits.iter().find(|r| r.id == 3).unwrap();
    assert_eq!(constant.distance, 1.0);
    let anti = hits.iter().find(|r| r.id == 2).unwrap();
    assert!((anti.distance - 2.0).abs() < 1e-12);
}

#[derive(Debug)]
struct Chebyshev;

impl CustomDistance for Chebyshev {
    fn type_id(&self) -> &str {
        "chebyshev"
    }

    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        a.iter()
            .zip(b)
            .map(|(x, y)| (x - y).abs())
            .fold(0.0, f64::max)
    }
}

#[test]
fn test_custom_metric() {
    let config = HnswConfig {
        distance_metric: DistanceMetric::Custom(Arc::new(Chebyshev)),
        ..HnswConfig::new(2)
    };
    let index = HnswIndex::new(config).unwrap();
    index.add(1, &[0.0, 3.0]).unwrap();
    index.add(2, &[2.5, 2.5]).unwrap();
    let hits = index.search_knn(&[0.0, 0.0], 2).unwrap();
    // euclidean would prefer id 1
    assert_eq!(hits[0].id, 2);
    assert_eq!(hits[0].distance, 2.5);
    assert_eq!(hits[1].distance, 3.0);
}

/// Euclidean on one axis, except that the pair (13, -13) has no defined distance.
#[derive(Debug)]
struct PartialLine;

impl CustomDistance for PartialLine {
    fn type_id(&self) -> &str {
        "partial-line"
    }

    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        let (x, y) = (a[0], b[0]);
        if (x == 13.0 && y == -13.0) || (x == -13.0 && y == 13.0) {
            return f64::NAN;
        }
        (x - y).abs()
    }
}

#[test]
fn test_undefined_distance_to_entry_degrades_gracefully() {
    let config = HnswConfig {
        max_layers: 1,
        distance_metric: DistanceMetric::Custom(Arc::new(PartialLine)),
        ..HnswConfig::new(1)
    };
    let index = HnswIndex::new(config).unwrap();
    index.add(0, &[13.0]).unwrap();
    for id in 1..=40 {
        index.add(id, &[id as f64 - 20.3]).unwrap();
    }
    assert_eq!(index.entry_point(), Some(0));

    let exact = index.search_exact(&[-13.0], 5).unwrap();
    let exact_ids: Vec<i64> = exact.iter().map(|r| r.id).collect();
    assert_eq!(exact_ids, vec![7, 8, 6, 9, 5]);

    let hits = index.search_knn(&[-13.0], 5).unwrap();
    assert_eq!(hits, exact);
    assert!(hits.iter().all(|r| r.distance.is_finite()));
}

// ── Introspection ──

#[test]
fn test_stats_and_neighbors() {
    let config = HnswConfig {
        m: 4,
        m_max0: 8,
        ef_construction: 32,
        ..HnswConfig::new(3)
    };
    let vectors = random_vectors(300, 3, 18);
    let index = build(config, &vectors);
    let stats = index.stats();
    assert_eq!(stats.size, 300);
    assert_eq!(stats.total_nodes, 300);
    assert_eq!(Some(stats.max_level), index.max_level());
    assert!(stats.total_edges > 0);
    assert!(stats.average_degree_level0 > 0.0 && stats.average_degree_level0 <= 8.0);
    assert!(stats.average_degree >= stats.average_degree_level0);
    assert!(stats.memory_bytes > 0);

    for id in 0..300 {
        let level = index.level_of(id).unwrap();
        for l in 0..=level {
            let neighbors = index.neighbors(id, l).unwrap();
            let bound = if l == 0 { 8 } else { 4 };
            assert!(neighbors.len() <= bound);
            assert!(!neighbors.contains(&id));
        }
        assert!(index.neighbors(id, level + 1).unwrap().is_empty());
    }
    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["size"], 300);
}

#[test]
fn test_clear_resets_index() {
    let vectors = random_vectors(50, 3, 19);
    let index = build(HnswConfig::new(3), &vectors);
    index.clear();
    assert!(index.is_empty());
    assert_eq!(index.node_count(), 0);
    assert_eq!(index.entry_point(), None);
    assert!(index.search_knn(&vectors[0], 1).unwrap().is_empty());

    index.add(1, &vectors[0]).unwrap();
    assert_eq!(index.search_knn(&vectors[0], 1).unwrap()[0].id, 1);
}

#[test]
fn test_growth_past_initial_capacity() {
    let config = HnswConfig {
        initial_capacity: 4,
        ..HnswConfig::new(3)
    };
    let vectors = random_vectors(100, 3, 20);
    let index = build(config, &vectors);
    assert_eq!(index.len(), 100);
    for (i, v) in vectors.iter().enumerate().step_by(9) {
        assert_eq!(index.search_knn(v, 1).unwrap()[0].id, i as i64);
    }
}

// ── Concurrency ──

#[test]
fn test_concurrent_readers_agree() {
    let vectors = random_vectors(500, 6, 21);
    let index = Arc::new(build(HnswConfig::new(6), &vectors));
    let queries = Arc::new(random_vectors(20, 6, 22));
    let expected: Vec<_> = queries
        .iter()
        .map(|q| index.search_knn(q, 5).unwrap())
        .collect();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let index = Arc::clone(&index);
            let queries = Arc::clone(&queries);
            thread::spawn(move || {
                queries
                    .iter()
                    .map(|q| index.search_knn(q, 5).unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
}

#[test]
fn test_writer_and_readers_interleave() {
    let index = Arc::new(HnswIndex::new(HnswConfig::new(4)).unwrap());
    let vectors = Arc::new(random_vectors(400, 4, 23));

    let writer = {
        let index = Arc::clone(&index);
        let vectors = Arc::clone(&vectors);
        thread::spawn(move || {
            for (i, v) in vectors.iter().enumerate() {
                index.add(i as i64, v).unwrap();
            }
        })
    };
    let readers: Vec<_> = (0..3)
        .map(|t| {
            let index = Arc::clone(&index);
            let vectors = Arc::clone(&vectors);
            thread::spawn(move || {
                for v in vectors.iter().skip(t).step_by(7) {
                    let hits = index.search_knn(v, 3).unwrap();
                    assert!(hits.len() <= 3);
                }
            })
        })
        .collect();
    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(index.len(), 400);
}
