//! The two halves of a Lloyd pass and the convergence test.

use ndarray::{Array2, ArrayView1};
use rand::Rng;

use crate::{euclidean_distance, squared_distance, DataMatrix, EmptyClusterPolicy};

/// Index of the center closest to `point`; the lowest index wins exact ties.
pub fn nearest_center(point: &ArrayView1<f64>, centers: &DataMatrix) -> usize {
    debug_assert_eq!(point.len(), centers.ncols());
    let mut best = 0usize;
    let mut best_distance = f64::INFINITY;
    for (cid, center) in centers.rows().into_iter().enumerate() {
        let distance = euclidean_distance(point, &center);
        if distance < best_distance {
            best_distance = distance;
            best = cid;
        }
    }
    best
}

/// Assign every point to its nearest center, overwriting `assignments`.
pub fn assign_points(points: &DataMatrix, centers: &DataMatrix, assignments: &mut [usize]) {
    debug_assert_eq!(points.nrows(), assignments.len());
    for (slot, row) in assignments.iter_mut().zip(points.rows()) {
        *slot = nearest_center(&row, centers);
    }
}

/// Output of [`recompute_centers`].
#[derive(Debug, Clone)]
pub struct Recomputed {
    /// Candidate centers for the next pass.
    pub centers: DataMatrix,
    /// Number of points assigned to each cluster.
    pub counts: Vec<usize>,
    /// Clusters that had no points, in index order.
    pub empty: Vec<usize>,
}

/// Mean of each cluster's points; empty clusters are handled per `policy`.
///
/// `previous` supplies the centers kept by [`EmptyClusterPolicy::Freeze`].
pub fn recompute_centers<R: Rng + ?Sized>(
    points: &DataMatrix,
    assignments: &[usize],
    previous: &DataMatrix,
    policy: EmptyClusterPolicy,
    rng: &mut R,
) -> Recomputed {
    let (k, dim) = (previous.nrows(), previous.ncols());
    let n = points.nrows();
    let mut sums = Array2::<f64>::zeros((k, dim));
    let mut counts = vec![0usize; k];

    for (row, &cid) in points.rows().into_iter().zip(assignments) {
        let mut acc = sums.row_mut(cid);
        acc += &row;
        counts[cid] += 1;
    }

    let mut empty = Vec::new();
    for cid in 0..k {
        let count = counts[cid];
        if count == 0 {
            empty.push(cid);
            match policy {
                EmptyClusterPolicy::Reseed => {
                    let idx = rng.gen_range(0..n);
                    sums.row_mut(cid).assign(&points.row(idx));
                    tracing::warn!(cluster = cid, point = idx, "empty cluster reseeded");
                }
                EmptyClusterPolicy::Freeze => {
                    sums.row_mut(cid).assign(&previous.row(cid));
                    tracing::warn!(cluster = cid, "empty cluster frozen at previous center");
                }
            }
            continue;
        }
        let mut center = sums.row_mut(cid);
        center /= count as f64;
    }

    Recomputed {
        centers: sums,
        counts,
        empty,
    }
}

/// True when any center moved farther than `tol`.
pub fn centers_changed(old: &DataMatrix, new: &DataMatrix, tol: f64) -> bool {
    old.rows()
        .into_iter()
        .zip(new.rows())
        .any(|(a, b)| euclidean_distance(&a, &b) > tol)
}

/// Sum of squared distances from each point to its assigned center.
pub fn inertia(points: &DataMatrix, centers: &DataMatrix, assignments: &[usize]) -> f64 {
    assignments
        .iter()
        .enumerate()
        .map(|(idx, &cid)| squared_distance(&points.row(idx), &centers.row(cid)))
        .sum()
}
