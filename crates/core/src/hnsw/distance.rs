//! Distance metric implementations for HNSW search.
//!
//! Every metric encodes an incoming vector once (normalising or centring it where the
//! metric needs to) and caches per-node statistics, so the hot-path distance is a plain
//! dot product or L2 over stored rows. All metrics return a distance where
//! **lower is better**. Non-finite results are never compared; callers drop them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Persisted type id of [`DistanceMetric::Euclidean`].
pub const EUCLIDEAN_TYPE_ID: &str = "euclidean";
/// Persisted type id of [`DistanceMetric::Cosine`].
pub const COSINE_TYPE_ID: &str = "cosine";
/// Persisted type id of [`DistanceMetric::Correlation`].
pub const CORRELATION_TYPE_ID: &str = "correlation";

/// Statistics cached per node at insert time. A zero field means "unset".
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NodeStats {
    pub norm: f64,
    pub mean: f64,
    pub centered_norm: f64,
}

/// A user-supplied distance over raw stored vectors.
///
/// `type_id` and `write_state` are persisted with the index; loading such an index
/// requires a resolver that can rebuild the distance from them
/// (see [`HnswIndex::load_with`](crate::HnswIndex::load_with)).
pub trait CustomDistance: Send + Sync + fmt::Debug {
    /// Stable identifier written to disk.
    fn type_id(&self) -> &str;

    /// Distance between two vectors of equal length. Lower is closer.
    fn distance(&self, a: &[f64], b: &[f64]) -> f64;

    /// Extra state needed to reconstruct this distance on load.
    fn write_state(&self, _out: &mut Vec<u8>) {}
}

/// Distance metric used for vector similarity computation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// L2 distance `sqrt(sum((a - b)^2))`. Range: \[0, ∞).
    #[default]
    Euclidean,
    /// `1 - cosine_similarity`. Range: \[0, 2\]. Zero vectors are at distance 1 from everything.
    Cosine,
    /// `1 - pearson_correlation`. Range: \[0, 2\]. Constant vectors are at distance 1.
    Correlation,
    /// User distance over the raw vectors. Cannot be expressed in a config file.
    #[serde(skip)]
    Custom(Arc<dyn CustomDistance>),
}

impl PartialEq for DistanceMetric {
    fn eq(&self, other: &Self) -> bool {
        self.type_id() == other.type_id()
    }
}

impl DistanceMetric {
    /// Identifier persisted in the index header.
    pub fn type_id(&self) -> &str {
        match self {
            DistanceMetric::Euclidean => EUCLIDEAN_TYPE_ID,
            DistanceMetric::Cosine => COSINE_TYPE_ID,
            DistanceMetric::Correlation => CORRELATION_TYPE_ID,
            DistanceMetric::Custom(custom) => custom.type_id(),
        }
    }

    /// Resolves one of the built-in metrics from its type id.
    pub fn builtin(type_id: &str) -> Option<Self> {
        match type_id {
            EUCLIDEAN_TYPE_ID => Some(DistanceMetric::Euclidean),
            COSINE_TYPE_ID => Some(DistanceMetric::Cosine),
            CORRELATION_TYPE_ID => Some(DistanceMetric::Correlation),
            _ => None,
        }
    }

    pub(crate) fn write_state(&self, out: &mut Vec<u8>) {
        if let DistanceMetric::Custom(custom) = self {
            custom.write_state(out);
        }
    }

    /// Writes the stored form of `vector` into `out` and returns its statistics.
    pub(crate) fn encode(&self, vector: &[f64], out: &mut [f64]) -> NodeStats {
        match self {
            DistanceMetric::Euclidean | DistanceMetric::Custom(_) => {
                out.copy_from_slice(vector);
                NodeStats::default()
            }
            DistanceMetric::Cosine => {
                let norm = norm(vector);
                scale_into(vector, 0.0, norm, out);
                NodeStats {
                    norm,
                    ..NodeStats::default()
                }
            }
            DistanceMetric::Correlation => {
                let mean = if vector.is_empty() {
                    0.0
                } else {
                    vector.iter().sum::<f64>() / vector.len() as f64
                };
                let centered_norm = vector
                    .iter()
                    .map(|v| (v - mean) * (v - mean))
                    .sum::<f64>()
                    .sqrt();
                scale_into(vector, mean, centered_norm, out);
                NodeStats {
                    norm: norm(vector),
                    mean,
                    centered_norm,
                }
            }
        }
    }

    /// Distance between two encoded rows.
    #[inline]
    pub(crate) fn distance(
        &self,
        a: &[f64],
        a_stats: &NodeStats,
        b: &[f64],
        b_stats: &NodeStats,
    ) -> f64 {
        let d = match self {
            DistanceMetric::Euclidean => l2_squared(a, b).sqrt(),
            DistanceMetric::Cosine => {
                if a_stats.norm == 0.0 || b_stats.norm == 0.0 {
                    return 1.0;
                }
                1.0 - dot(a, b)
            }
            DistanceMetric::Correlation => {
                if a_stats.centered_norm == 0.0 || b_stats.centered_norm == 0.0 {
                    return 1.0;
                }
                1.0 - dot(a, b)
            }
            DistanceMetric::Custom(custom) => custom.distance(a, b),
        };
        if d.is_finite() {
            d
        } else {
            f64::INFINITY
        }
    }
}

/// Writes `(v - shift) / scale` into `out`, or zeros when `scale` is not positive.
fn scale_into(vector: &[f64], shift: f64, scale: f64, out: &mut [f64]) {
    if scale > 0.0 && scale.is_finite() {
        for (o, v) in out.iter_mut().zip(vector) {
            *o = (v - shift) / scale;
        }
    } else {
        out.fill(0.0);
    }
}

#[inline]
pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[inline]
pub(crate) fn l2_squared(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

#[inline]
pub(crate) fn norm(v: &[f64]) -> f64 {
    dot(v, v).sqrt()
}
