//! Vector summaries and the drift distance.
//!
//! The drift score is the cosine distance `1 - cos(a, b)` between the
//! centroid of a traffic batch and the baseline centroid. It is symmetric,
//! zero for batches drawn from the baseline distribution and bounded by
//! `[0, 2]`. Thresholds are tuned against this metric.

use modelgrid_core::VectorSummary;

use crate::error::{DriftError, DriftResult};

/// Component-wise mean of a non-empty set of equally sized vectors.
pub fn summarize(vectors: &[Vec<f32>]) -> DriftResult<VectorSummary> {
    let first = vectors.first().ok_or(DriftError::EmptyBatch)?;
    let dim = first.len();
    if dim == 0 {
        return Err(DriftError::EmptyEmbedding);
    }

    let mut sums = vec![0f64; dim];
    for v in vectors {
        if v.len() != dim {
            return Err(DriftError::DimensionMismatch {
                expected: dim,
                got: v.len(),
            });
        }
        for (sum, x) in sums.iter_mut().zip(v) {
            *sum += f64::from(*x);
        }
    }

    let n = vectors.len() as f64;
    Ok(VectorSummary {
        centroid: sums.into_iter().map(|s| (s / n) as f32).collect(),
        count: vectors.len(),
    })
}

/// Cosine distance between two vectors of the same dimension.
///
/// Two zero vectors are at distance 0; a zero vector is at distance 1 from
/// any non-zero vector.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> DriftResult<f64> {
    if a.len() != b.len() {
        return Err(DriftError::DimensionMismatch {
            expected: b.len(),
            got: a.len(),
        });
    }

    let (mut dot, mut norm_a, mut norm_b) = (0f64, 0f64, 0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    match (norm_a == 0.0, norm_b == 0.0) {
        (true, true) => Ok(0.0),
        (true, false) | (false, true) => Ok(1.0),
        (false, false) => {
            let cos = dot / (norm_a.sqrt() * norm_b.sqrt());
            Ok((1.0 - cos).clamp(0.0, 2.0))
        }
    }
}
