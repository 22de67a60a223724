//! Dataset construction: synthetic generators, row-list conversion and CSV loading.

use std::path::Path;

use csv::ReaderBuilder;
use ndarray::{arr2, Array2};
use ndarray_rand::rand_distr::{Distribution, Uniform};
use ndarray_rand::RandomExt;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{DataMatrix, KMeansError, Result};

/// Blob centers used by [`DataMode::Clustered`].
pub const DEFAULT_BLOBS: [[f64; 2]; 4] = [[0.0, 0.0], [2.0, 2.0], [-3.0, 2.0], [2.0, -4.0]];
/// Per-coordinate offset range for clustered points.
pub const DEFAULT_SPREAD: f64 = 1.5;
/// Bounds of the uniform square used by [`DataMode::Uniform`].
pub const UNIFORM_BOUNDS: (f64, f64) = (-5.0, 5.0);
pub const DEFAULT_POINTS: usize = 300;

/// Shape of a generated 2-D dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DataMode {
    /// Points scattered around a few fixed blobs.
    #[default]
    Clustered,
    /// Points spread evenly over a square.
    Uniform,
}

impl std::str::FromStr for DataMode {
    type Err = KMeansError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "clustered" => Ok(Self::Clustered),
            "uniform" => Ok(Self::Uniform),
            other => Err(KMeansError::InvalidConfig(format!(
                "unsupported data mode '{other}'"
            ))),
        }
    }
}

/// Generate `n` two-dimensional points for `mode` with the stock parameters.
pub fn generate_dataset<R: Rng>(mode: DataMode, n: usize, rng: &mut R) -> Result<DataMatrix> {
    match mode {
        DataMode::Clustered => generate_clustered(n, &arr2(&DEFAULT_BLOBS), DEFAULT_SPREAD, rng),
        DataMode::Uniform => generate_uniform(n, 2, UNIFORM_BOUNDS.0, UNIFORM_BOUNDS.1, rng),
    }
}

/// `n` points with independent coordinates drawn from `[low, high)`.
pub fn generate_uniform<R: Rng>(
    n: usize,
    dim: usize,
    low: f64,
    high: f64,
    rng: &mut R,
) -> Result<DataMatrix> {
    if !(low.is_finite() && high.is_finite() && low < high) {
        return Err(KMeansError::InvalidConfig(format!(
            "uniform bounds must be finite with low < high (low={low}, high={high})"
        )));
    }
    Ok(Array2::random_using((n, dim), Uniform::new(low, high), rng))
}

/// `n` points, each offset from a uniformly chosen row of `blobs` by `U[0, spread)` per coordinate.
pub fn generate_clustered<R: Rng>(
    n: usize,
    blobs: &DataMatrix,
    spread: f64,
    rng: &mut R,
) -> Result<DataMatrix> {
    if blobs.nrows() == 0 {
        return Err(KMeansError::InvalidConfig(
            "clustered data needs at least one blob center".into(),
        ));
    }
    if !(spread.is_finite() && spread > 0.0) {
        return Err(KMeansError::InvalidConfig(format!(
            "spread must be finite and positive (spread={spread})"
        )));
    }
    let mut points = Array2::zeros((n, blobs.ncols()));
    let offset = Uniform::new(0.0, spread);
    for mut row in points.rows_mut() {
        let blob = blobs.row(rng.gen_range(0..blobs.nrows()));
        for (value, &centre) in row.iter_mut().zip(blob.iter()) {
            *value = centre + offset.sample(rng);
        }
    }
    Ok(points)
}

/// Convert a list of coordinate tuples into a [`DataMatrix`].
pub fn points_from_rows(rows: &[Vec<f64>]) -> Result<DataMatrix> {
    let Some(first) = rows.first() else {
        return Err(KMeansError::DegenerateInput("no points supplied".into()));
    };
    let dim = first.len();
    let mut arr = Array2::zeros((rows.len(), dim));
    for (i, row) in rows.iter().enumerate() {
        if row.len() != dim {
            return Err(KMeansError::DegenerateInput(format!(
                "point {i} has dimension {}, expected {dim}",
                row.len()
            )));
        }
        for (j, &value) in row.iter().enumerate() {
            arr[(i, j)] = value;
        }
    }
    Ok(arr)
}

/// Load a headered CSV file of numeric columns, one point per record.
pub fn load_csv<P: AsRef<Path>>(path: P) -> Result<DataMatrix> {
    let mut rdr = ReaderBuilder::new().has_headers(true).from_path(path)?;
    let mut records: Vec<Vec<f64>> = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let mut row = Vec::with_capacity(record.len());
        for field in record.iter() {
            row.push(field.trim().parse()?);
        }
        records.push(row);
    }
    points_from_rows(&records)
}
