//! Step-through k-means clustering.
//!
//! The engine runs Lloyd's algorithm to completion and records one
//! [`Snapshot`] per pass, plus a closing snapshot, so that a presentation
//! layer can replay the run, step through it, or jump straight to the
//! converged result. Four seeding strategies are supported: random
//! selection, farthest-first traversal, k-means++ and caller-supplied
//! centers.

use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod data;
pub mod engine;
pub mod init;
pub mod lloyd;
pub mod replay;

pub use data::{
    generate_clustered, generate_dataset, generate_uniform, load_csv, points_from_rows, DataMode,
};
pub use engine::{
    group_by_cluster, EmptyClusterEvent, EnginePhase, KMeansEngine, Snapshot, Termination,
    Trajectory,
};
pub use replay::ReplayCursor;

/// Dense data representation used across the crate (rows = points, columns = coordinates).
pub type DataMatrix = Array2<f64>;

/// Assignment sentinel for points that have not been through an assignment pass yet.
pub const UNASSIGNED: usize = usize::MAX;

/// Error type used by operations in this crate.
#[derive(Debug, Error)]
pub enum KMeansError {
    #[error("unknown initialization method: {0}")]
    InvalidInitMethod(String),
    #[error("invalid manual centers: {0}")]
    InvalidManualCenters(String),
    #[error("degenerate input: {0}")]
    DegenerateInput(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("engine has already been run; construct a new engine for another run")]
    AlreadyRun,
    #[error("step {step} is out of range for a trajectory of {len} snapshots")]
    StepOutOfRange { step: usize, len: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    ParseFloat(#[from] std::num::ParseFloatError),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

/// Convenient alias for results produced by this crate.
pub type Result<T> = std::result::Result<T, KMeansError>;

/// Strategy used to pick the initial centers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum InitMethod {
    /// First `k` points of a uniformly random permutation of the dataset.
    #[default]
    Random,
    /// Greedy farthest-point traversal from a random first point.
    #[serde(alias = "farthest first")]
    FarthestFirst,
    /// D²-weighted sampling as described by Arthur/Vassilvitskii.
    #[serde(rename = "kmeans++", alias = "k-means++")]
    KMeansPlusPlus,
    /// Centers supplied by the caller.
    Manual,
}

impl InitMethod {
    pub const ALL: [InitMethod; 4] = [
        InitMethod::Random,
        InitMethod::FarthestFirst,
        InitMethod::KMeansPlusPlus,
        InitMethod::Manual,
    ];
}

impl fmt::Display for InitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitMethod::Random => write!(f, "Random"),
            InitMethod::FarthestFirst => write!(f, "Farthest First"),
            InitMethod::KMeansPlusPlus => write!(f, "KMeans++"),
            InitMethod::Manual => write!(f, "Manual"),
        }
    }
}

impl std::str::FromStr for InitMethod {
    type Err = KMeansError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "random" => Ok(Self::Random),
            "farthest first" | "farthestfirst" | "farthest-first" | "farthest_first" => {
                Ok(Self::FarthestFirst)
            }
            "kmeans++" | "k-means++" | "kmeansplusplus" => Ok(Self::KMeansPlusPlus),
            "manual" => Ok(Self::Manual),
            _ => Err(KMeansError::InvalidInitMethod(s.to_string())),
        }
    }
}

/// What to do with a cluster that ends a pass without any points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EmptyClusterPolicy {
    /// Move the center onto a uniformly random dataset point.
    #[default]
    Reseed,
    /// Keep the center where it was.
    Freeze,
}

impl fmt::Display for EmptyClusterPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmptyClusterPolicy::Reseed => write!(f, "reseed"),
            EmptyClusterPolicy::Freeze => write!(f, "freeze"),
        }
    }
}

impl std::str::FromStr for EmptyClusterPolicy {
    type Err = KMeansError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "reseed" => Ok(Self::Reseed),
            "freeze" => Ok(Self::Freeze),
            other => Err(KMeansError::InvalidConfig(format!(
                "unsupported empty-cluster policy '{other}'"
            ))),
        }
    }
}

/// Configurable knobs for a single engine run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Number of centers.
    pub k: usize,
    /// Seeding strategy.
    pub init: InitMethod,
    /// Maximum number of assign/recompute passes.
    pub max_iter: usize,
    /// Centers closer than this to their successors count as unchanged.
    pub tol: f64,
    /// Recovery applied to clusters that lose all their points.
    #[serde(default)]
    pub empty_cluster: EmptyClusterPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            k: 4,
            init: InitMethod::default(),
            max_iter: 100,
            tol: 1e-6,
            empty_cluster: EmptyClusterPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Configuration with the default loop settings.
    pub fn new(k: usize, init: InitMethod) -> Self {
        Self {
            k,
            init,
            ..Self::default()
        }
    }

    /// Validate configuration parameters for a specific dataset.
    pub fn validate(&self, points: &DataMatrix) -> Result<()> {
        if points.nrows() == 0 {
            return Err(KMeansError::DegenerateInput(
                "dataset contains no points".into(),
            ));
        }
        if points.ncols() == 0 {
            return Err(KMeansError::DegenerateInput(
                "points must have at least one coordinate".into(),
            ));
        }
        if let Some(((row, col), value)) = points.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(KMeansError::DegenerateInput(format!(
                "point {row} has non-finite coordinate {col} ({value})"
            )));
        }
        if self.k == 0 {
            return Err(KMeansError::DegenerateInput(
                "k must be greater than zero".into(),
            ));
        }
        if points.nrows() < self.k {
            return Err(KMeansError::DegenerateInput(format!(
                "dataset has {} points but k = {}; add more data or decrease k",
                points.nrows(),
                self.k
            )));
        }
        if self.max_iter == 0 {
            return Err(KMeansError::InvalidConfig(
                "max_iter must be greater than zero".into(),
            ));
        }
        if !self.tol.is_finite() || self.tol < 0.0 {
            return Err(KMeansError::InvalidConfig(
                "tol must be finite and non-negative".into(),
            ));
        }
        Ok(())
    }
}

/// Sum of squared coordinate differences between two points of equal dimension.
pub fn squared_distance(a: &ArrayView1<f64>, b: &ArrayView1<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum()
}

/// Euclidean distance between two points of equal dimension.
pub fn euclidean_distance(a: &ArrayView1<f64>, b: &ArrayView1<f64>) -> f64 {
    squared_distance(a, b).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn init_method_parses_display_names() {
        for method in InitMethod::ALL {
            let parsed: InitMethod = method.to_string().parse().expect("display name parses");
            assert_eq!(parsed, method);
        }
        assert_eq!(
            "kmeans++".parse::<InitMethod>().unwrap(),
            InitMethod::KMeansPlusPlus
        );
        assert_eq!(
            "farthest-first".parse::<InitMethod>().unwrap(),
            InitMethod::FarthestFirst
        );
    }

    #[test]
    fn unknown_init_method_is_rejected() {
        let err = "Bogus".parse::<InitMethod>().unwrap_err();
        assert!(matches!(err, KMeansError::InvalidInitMethod(ref name) if name == "Bogus"));
        assert!(err.to_string().contains("Bogus"));
    }

    #[test]
    fn config_rejects_degenerate_inputs() {
        let points = array![[0.0, 0.0], [1.0, 1.0]];
        let too_many = EngineConfig::new(3, InitMethod::Random);
        assert!(matches!(
            too_many.validate(&points),
            Err(KMeansError::DegenerateInput(_))
        ));

        let zero_k = EngineConfig::new(0, InitMethod::Random);
        assert!(matches!(
            zero_k.validate(&points),
            Err(KMeansError::DegenerateInput(_))
        ));

        let empty = DataMatrix::zeros((0, 2));
        assert!(matches!(
            EngineConfig::default().validate(&empty),
            Err(KMeansError::DegenerateInput(_))
        ));

        let with_nan = array![[0.0, f64::NAN], [1.0, 1.0]];
        assert!(matches!(
            EngineConfig::new(1, InitMethod::Random).validate(&with_nan),
            Err(KMeansError::DegenerateInput(_))
        ));
    }

    #[test]
    fn config_rejects_bad_loop_settings() {
        let points = array![[0.0], [1.0]];
        let config = EngineConfig {
            max_iter: 0,
            ..EngineConfig::new(1, InitMethod::Random)
        };
        assert!(matches!(
            config.validate(&points),
            Err(KMeansError::InvalidConfig(_))
        ));
        let config = EngineConfig {
            tol: -1.0,
            ..EngineConfig::new(1, InitMethod::Random)
        };
        assert!(matches!(
            config.validate(&points),
            Err(KMeansError::InvalidConfig(_))
        ));
    }

    #[test]
    fn euclidean_distance_matches_pythagoras() {
        let a = array![0.0, 0.0];
        let b = array![3.0, 4.0];
        assert_eq!(euclidean_distance(&a.view(), &b.view()), 5.0);
        assert_eq!(squared_distance(&a.view(), &b.view()), 25.0);
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = EngineConfig {
            empty_cluster: EmptyClusterPolicy::Freeze,
            ..EngineConfig::new(3, InitMethod::KMeansPlusPlus)
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"kmeans++\""));
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
