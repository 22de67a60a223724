//! Center seeding strategies.
//!
//! Every strategy returns a fresh `k × dim` matrix whose rows are copies of
//! dataset points (or of the caller's centers), never views into the data.

use ndarray::{Array2, ArrayView1};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::{euclidean_distance, DataMatrix, InitMethod, KMeansError, Result};

/// Pick `k` initial centers from `points` using `method`.
///
/// `manual` must hold exactly `k` rows of matching dimension when `method`
/// is [`InitMethod::Manual`] and is ignored otherwise.
pub fn initialize_centers<R: Rng + ?Sized>(
    points: &DataMatrix,
    k: usize,
    method: InitMethod,
    manual: Option<&DataMatrix>,
    rng: &mut R,
) -> Result<DataMatrix> {
    let n = points.nrows();
    if k == 0 || k > n {
        return Err(KMeansError::DegenerateInput(format!(
            "initialisation requires 0 < k <= n (k={k}, n={n})"
        )));
    }
    let centers = match method {
        InitMethod::Random => random_init(points, k, rng),
        InitMethod::FarthestFirst => farthest_first_init(points, k, rng),
        InitMethod::KMeansPlusPlus => kmeans_pp_init(points, k, rng),
        InitMethod::Manual => {
            let manual = manual.ok_or_else(|| {
                KMeansError::InvalidManualCenters(format!(
                    "manual initialization needs {k} centers but none were supplied"
                ))
            })?;
            check_manual_centers(manual, k, points.ncols())?;
            manual.to_owned()
        }
    };
    tracing::debug!(%method, k, "initial centers selected");
    Ok(centers)
}

/// Reject manual centers whose shape does not match `k × dim`.
pub fn check_manual_centers(centers: &DataMatrix, k: usize, dim: usize) -> Result<()> {
    if centers.nrows() != k {
        return Err(KMeansError::InvalidManualCenters(format!(
            "expected {k} centers, got {}",
            centers.nrows()
        )));
    }
    if centers.ncols() != dim {
        return Err(KMeansError::InvalidManualCenters(format!(
            "centers have dimension {} but the dataset has dimension {dim}",
            centers.ncols()
        )));
    }
    Ok(())
}

/// First `k` points of a uniformly shuffled index permutation.
pub fn random_init<R: Rng + ?Sized>(points: &DataMatrix, k: usize, rng: &mut R) -> DataMatrix {
    let n = points.nrows();
    let mut idxs: Vec<usize> = (0..n).collect();
    idxs.shuffle(rng);
    gather_rows(points, &idxs[..k])
}

pub fn farthest_first_init<R: Rng + ?Sized>(
    points: &DataMatrix,
    k: usize,
    rng: &mut R,
) -> DataMatrix {
    let first = rng.gen_range(0..points.nrows());
    farthest_first_from(points, k, first)
}

/// Greedy farthest-point traversal starting at row `first`.
///
/// Each subsequent pick maximises the distance to its nearest chosen
/// center; ties resolve to the lowest row index.
pub fn farthest_first_from(points: &DataMatrix, k: usize, first: usize) -> DataMatrix {
    let mut chosen = Vec::with_capacity(k);
    chosen.push(first);
    let mut nearest: Vec<f64> = points
        .rows()
        .into_iter()
        .map(|row| euclidean_distance(&row, &points.row(first)))
        .collect();

    while chosen.len() < k {
        let mut best = 0usize;
        let mut best_distance = f64::NEG_INFINITY;
        for (idx, &distance) in nearest.iter().enumerate() {
            if distance > best_distance {
                best_distance = distance;
                best = idx;
            }
        }
        chosen.push(best);
        relax_nearest(points, &mut nearest, &points.row(best), euclidean_distance);
    }
    gather_rows(points, &chosen)
}

pub fn kmeans_pp_init<R: Rng + ?Sized>(points: &DataMatrix, k: usize, rng: &mut R) -> DataMatrix {
    let n = points.nrows();
    let first = rng.gen_range(0..n);
    let mut chosen = Vec::with_capacity(k);
    chosen.push(first);

    let mut weights: Vec<f64> = points
        .rows()
        .into_iter()
        .map(|row| crate::squared_distance(&row, &points.row(first)))
        .collect();

    while chosen.len() < k {
        let idx = sample_weighted(&weights, rng.gen::<f64>());
        chosen.push(idx);
        relax_nearest(points, &mut weights, &points.row(idx), crate::squared_distance);
    }
    gather_rows(points, &chosen)
}

/// Invert the cumulative distribution of `weights` at `draw ∈ [0, 1)`.
///
/// Falls back to the last index when rounding leaves `draw` above every
/// partial sum, or when all weights are zero.
pub fn sample_weighted(weights: &[f64], draw: f64) -> usize {
    let last = weights.len().saturating_sub(1);
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        tracing::debug!("all sampling weights are zero; using last index");
        return last;
    }
    let mut cumulative = 0.0;
    for (idx, weight) in weights.iter().enumerate() {
        cumulative += weight / total;
        if draw < cumulative {
            return idx;
        }
    }
    last
}

fn relax_nearest(
    points: &DataMatrix,
    nearest: &mut [f64],
    center: &ArrayView1<f64>,
    metric: fn(&ArrayView1<f64>, &ArrayView1<f64>) -> f64,
) {
    nearest
        .iter_mut()
        .zip(points.rows())
        .for_each(|(slot, row)| {
            let d = metric(&row, center);
            if d < *slot {
                *slot = d;
            }
        });
}

fn gather_rows(points: &DataMatrix, idxs: &[usize]) -> DataMatrix {
    let mut centers = Array2::zeros((idxs.len(), points.ncols()));
    for (ci, &i) in idxs.iter().enumerate() {
        centers.row_mut(ci).assign(&points.row(i));
    }
    centers
}
