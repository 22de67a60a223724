//! The snapshotting Lloyd engine.

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::init::{check_manual_centers, initialize_centers};
use crate::lloyd::{assign_points, centers_changed, inertia, recompute_centers};
use crate::{DataMatrix, EngineConfig, InitMethod, KMeansError, Result, UNASSIGNED};

/// Immutable capture of centers and assignments at one step of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SnapshotRecord")]
pub struct Snapshot {
    centers: DataMatrix,
    assignments: Vec<usize>,
}

impl Snapshot {
    fn capture(centers: &DataMatrix, assignments: &[usize]) -> Self {
        Self {
            centers: centers.clone(),
            assignments: assignments.to_vec(),
        }
    }

    /// Centers as rows (`k` × `dim`).
    pub fn centers(&self) -> &DataMatrix {
        &self.centers
    }

    /// Cluster id of every point, in dataset order.
    pub fn assignments(&self) -> &[usize] {
        &self.assignments
    }

    pub fn k(&self) -> usize {
        self.centers.nrows()
    }

    pub fn dim(&self) -> usize {
        self.centers.ncols()
    }

    /// Number of points assigned to each cluster.
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0usize; self.k()];
        for &cid in &self.assignments {
            sizes[cid] += 1;
        }
        sizes
    }

    /// Indices of the points assigned to `cluster`.
    pub fn members(&self, cluster: usize) -> Vec<usize> {
        self.assignments
            .iter()
            .enumerate()
            .filter(|&(_, &cid)| cid == cluster)
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Sum of squared distances of `points` to their assigned centers.
    pub fn inertia(&self, points: &DataMatrix) -> f64 {
        inertia(points, &self.centers, &self.assignments)
    }
}

#[derive(Deserialize)]
struct SnapshotRecord {
    centers: DataMatrix,
    assignments: Vec<usize>,
}

impl TryFrom<SnapshotRecord> for Snapshot {
    type Error = KMeansError;

    fn try_from(record: SnapshotRecord) -> Result<Self> {
        let k = record.centers.nrows();
        if k == 0 {
            return Err(KMeansError::DegenerateInput(
                "snapshot has no centers".into(),
            ));
        }
        if let Some((idx, cid)) = record
            .assignments
            .iter()
            .enumerate()
            .find(|&(_, &cid)| cid >= k)
        {
            return Err(KMeansError::DegenerateInput(format!(
                "point {idx} is assigned to cluster {cid} but the snapshot has {k} centers"
            )));
        }
        Ok(Self {
            centers: record.centers,
            assignments: record.assignments,
        })
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Termination {
    /// No center moved farther than the tolerance.
    Converged,
    /// The pass budget ran out first.
    CappedOut,
}

/// A cluster that ended a pass without points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyClusterEvent {
    /// Zero-based pass in which the cluster emptied.
    pub pass: usize,
    pub cluster: usize,
}

/// Ordered snapshots of one completed run plus run diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TrajectoryRecord")]
pub struct Trajectory {
    snapshots: Vec<Snapshot>,
    termination: Termination,
    center_updates: usize,
    empty_cluster_events: Vec<EmptyClusterEvent>,
}

#[derive(Deserialize)]
struct TrajectoryRecord {
    snapshots: Vec<Snapshot>,
    termination: Termination,
    center_updates: usize,
    empty_cluster_events: Vec<EmptyClusterEvent>,
}

impl TryFrom<TrajectoryRecord> for Trajectory {
    type Error = KMeansError;

    /// Every snapshot must share the first one's shape, and at least one must exist.
    fn try_from(record: TrajectoryRecord) -> Result<Self> {
        let Some(first) = record.snapshots.first() else {
            return Err(KMeansError::DegenerateInput(
                "trajectory has no snapshots".into(),
            ));
        };
        let shape = (first.k(), first.dim(), first.assignments().len());
        if let Some(step) = record
            .snapshots
            .iter()
            .position(|s| (s.k(), s.dim(), s.assignments().len()) != shape)
        {
            return Err(KMeansError::DegenerateInput(format!(
                "snapshot {step} does not match the shape of snapshot 0"
            )));
        }
        if let Some(event) = record
            .empty_cluster_events
            .iter()
            .find(|event| event.cluster >= shape.0)
        {
            return Err(KMeansError::DegenerateInput(format!(
                "empty-cluster event names cluster {} but the run has {} centers",
                event.cluster, shape.0
            )));
        }
        Ok(Self {
            snapshots: record.snapshots,
            termination: record.termination,
            center_updates: record.center_updates,
            empty_cluster_events: record.empty_cluster_events,
        })
    }
}

impl Trajectory {
    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn get(&self, step: usize) -> Option<&Snapshot> {
        self.snapshots.get(step)
    }

    /// Snapshot at `step`, or [`KMeansError::StepOutOfRange`].
    pub fn step(&self, step: usize) -> Result<&Snapshot> {
        self.snapshots.get(step).ok_or(KMeansError::StepOutOfRange {
            step,
            len: self.snapshots.len(),
        })
    }

    pub fn first(&self) -> &Snapshot {
        &self.snapshots[0]
    }

    /// The closing snapshot appended after the loop exits.
    pub fn final_snapshot(&self) -> &Snapshot {
        &self.snapshots[self.snapshots.len() - 1]
    }

    pub fn final_centers(&self) -> &DataMatrix {
        self.final_snapshot().centers()
    }

    pub fn final_assignments(&self) -> &[usize] {
        self.final_snapshot().assignments()
    }

    /// Loop passes executed; always one less than the snapshot count.
    pub fn passes(&self) -> usize {
        self.snapshots.len() - 1
    }

    /// How many times freshly computed centers replaced the current ones.
    pub fn center_updates(&self) -> usize {
        self.center_updates
    }

    pub fn termination(&self) -> Termination {
        self.termination
    }

    pub fn converged(&self) -> bool {
        self.termination == Termination::Converged
    }

    pub fn empty_cluster_events(&self) -> &[EmptyClusterEvent] {
        &self.empty_cluster_events
    }

    /// Inertia of every snapshot in order.
    ///
    /// Not necessarily monotone when empty clusters were reseeded.
    pub fn objective_history(&self, points: &DataMatrix) -> Vec<f64> {
        self.snapshots.iter().map(|s| s.inertia(points)).collect()
    }
}

/// Lifecycle of a [`KMeansEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnginePhase {
    Uninitialized,
    Initializing,
    Iterating,
    Converged,
    CappedOut,
}

impl From<Termination> for EnginePhase {
    fn from(value: Termination) -> Self {
        match value {
            Termination::Converged => EnginePhase::Converged,
            Termination::CappedOut => EnginePhase::CappedOut,
        }
    }
}

/// Single-use Lloyd engine over a borrowed dataset.
///
/// Construct one engine per run; [`KMeansEngine::run`] executes the whole
/// algorithm synchronously and keeps the resulting [`Trajectory`].
#[derive(Debug)]
pub struct KMeansEngine<'a> {
    points: &'a DataMatrix,
    config: EngineConfig,
    manual_centers: Option<DataMatrix>,
    centers: DataMatrix,
    assignments: Vec<usize>,
    phase: EnginePhase,
    trajectory: Option<Trajectory>,
}

impl<'a> KMeansEngine<'a> {
    /// Validate inputs and allocate run state.
    ///
    /// `initial_centers` is required for [`InitMethod::Manual`] and ignored
    /// for every other method.
    pub fn new(
        points: &'a DataMatrix,
        config: EngineConfig,
        initial_centers: Option<DataMatrix>,
    ) -> Result<Self> {
        config.validate(points)?;
        let manual_centers = match (config.init, initial_centers) {
            (InitMethod::Manual, Some(centers)) => {
                check_manual_centers(&centers, config.k, points.ncols())?;
                Some(centers)
            }
            (InitMethod::Manual, None) => {
                return Err(KMeansError::InvalidManualCenters(format!(
                    "manual initialization needs {} centers but none were supplied",
                    config.k
                )))
            }
            (method, Some(_)) => {
                tracing::debug!(%method, "ignoring initial centers for non-manual method");
                None
            }
            (_, None) => None,
        };

        Ok(Self {
            points,
            manual_centers,
            centers: DataMatrix::zeros((0, points.ncols())),
            assignments: vec![UNASSIGNED; points.nrows()],
            phase: EnginePhase::Uninitialized,
            trajectory: None,
            config,
        })
    }

    /// Build an engine from a method name such as `"KMeans++"` with default loop settings.
    pub fn with_method_name(
        points: &'a DataMatrix,
        k: usize,
        method: &str,
        initial_centers: Option<DataMatrix>,
    ) -> Result<Self> {
        let init = method.parse::<InitMethod>()?;
        Self::new(points, EngineConfig::new(k, init), initial_centers)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    /// Current centers; empty until the run has initialized them.
    pub fn centers(&self) -> &DataMatrix {
        &self.centers
    }

    /// Current assignment buffer; [`UNASSIGNED`] before the first pass.
    pub fn assignments(&self) -> &[usize] {
        &self.assignments
    }

    pub fn trajectory(&self) -> Option<&Trajectory> {
        self.trajectory.as_ref()
    }

    pub fn into_trajectory(self) -> Option<Trajectory> {
        self.trajectory
    }

    /// Run the algorithm to completion and return the recorded trajectory.
    pub fn run<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<&Trajectory> {
        if self.phase != EnginePhase::Uninitialized {
            return Err(KMeansError::AlreadyRun);
        }

        self.phase = EnginePhase::Initializing;
        self.centers = initialize_centers(
            self.points,
            self.config.k,
            self.config.init,
            self.manual_centers.as_ref(),
            rng,
        )?;

        self.phase = EnginePhase::Iterating;
        let mut snapshots = Vec::new();
        let mut empty_cluster_events = Vec::new();
        let mut center_updates = 0usize;
        let mut termination = Termination::CappedOut;

        for pass in 0..self.config.max_iter {
            assign_points(self.points, &self.centers, &mut self.assignments);
            let next = recompute_centers(
                self.points,
                &self.assignments,
                &self.centers,
                self.config.empty_cluster,
                rng,
            );
            empty_cluster_events.extend(
                next.empty
                    .iter()
                    .map(|&cluster| EmptyClusterEvent { pass, cluster }),
            );
            snapshots.push(Snapshot::capture(&self.centers, &self.assignments));

            if !centers_changed(&self.centers, &next.centers, self.config.tol) {
                termination = Termination::Converged;
                break;
            }
            self.centers = next.centers;
            center_updates += 1;
            tracing::debug!(pass, sizes = ?next.counts, "centers updated");
        }

        snapshots.push(Snapshot::capture(&self.centers, &self.assignments));
        self.phase = termination.into();

        if termination == Termination::CappedOut {
            tracing::warn!(
                max_iter = self.config.max_iter,
                "pass budget exhausted before convergence"
            );
        }
        tracing::info!(
            init = %self.config.init,
            k = self.config.k,
            passes = snapshots.len() - 1,
            center_updates,
            ?termination,
            empty_clusters = empty_cluster_events.len(),
            "kmeans run finished"
        );

        Ok(&*self.trajectory.insert(Trajectory {
            snapshots,
            termination,
            center_updates,
            empty_cluster_events,
        }))
    }
}

/// Points grouped by cluster id, for callers that draw one series per cluster.
pub fn group_by_cluster(snapshot: &Snapshot) -> BTreeMap<usize, Vec<usize>> {
    let mut groups: BTreeMap<usize, Vec<usize>> =
        (0..snapshot.k()).map(|c| (c, Vec::new())).collect();
    for (idx, &cid) in snapshot.assignments().iter().enumerate() {
        groups.entry(cid).or_default().push(idx);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{generate_dataset, DataMode, EmptyClusterPolicy};
    use ndarray::array;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn two_pairs() -> DataMatrix {
        array![[0.0, 0.0], [0.0, 1.0], [10.0, 0.0], [10.0, 1.0]]
    }

    #[test]
    fn manual_run_converges_after_one_update() {
        let points = two_pairs();
        let mut engine = KMeansEngine::new(
            &points,
            EngineConfig::new(2, InitMethod::Manual),
            Some(array![[0.0, 0.0], [10.0, 0.0]]),
        )
        .expect("valid engine");
        assert_eq!(engine.phase(), EnginePhase::Uninitialized);
        assert!(engine.assignments().iter().all(|&a| a == UNASSIGNED));

        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let run = engine.run(&mut rng).expect("run completes");

        assert!(run.converged());
        assert_eq!(run.center_updates(), 1);
        assert_eq!(run.passes(), 2);
        assert_eq!(run.len(), 3);
        assert_eq!(run.final_centers(), &array![[0.0, 0.5], [10.0, 0.5]]);
        assert_eq!(run.final_assignments(), &[0, 0, 1, 1]);

        // First pass pairs the seed centers with the assignment they produced.
        assert_eq!(run.first().centers(), &array![[0.0, 0.0], [10.0, 0.0]]);
        assert_eq!(run.first().assignments(), &[0, 0, 1, 1]);
        // The confirming pass and the closing snapshot are identical.
        assert_eq!(run.snapshots()[1], run.snapshots()[2]);

        assert_eq!(engine.phase(), EnginePhase::Converged);
    }

    #[test]
    fn snapshot_invariants_hold_for_every_method() {
        let mut data_rng = ChaCha8Rng::seed_from_u64(21);
        let points = generate_dataset(DataMode::Clustered, 300, &mut data_rng).unwrap();
        let k = 4;
        for method in [
            InitMethod::Random,
            InitMethod::FarthestFirst,
            InitMethod::KMeansPlusPlus,
        ] {
            let mut rng = ChaCha8Rng::seed_from_u64(7);
            let mut engine =
                KMeansEngine::new(&points, EngineConfig::new(k, method), None).unwrap();
            let run = engine.run(&mut rng).unwrap();
            assert!(run.passes() <= 100);
            assert_eq!(run.len(), run.passes() + 1);
            for snapshot in run.snapshots() {
                assert_eq!(snapshot.k(), k);
                assert_eq!(snapshot.dim(), points.ncols());
                assert_eq!(snapshot.assignments().len(), points.nrows());
                assert!(snapshot.assignments().iter().all(|&a| a < k), "{method}");
            }
            assert_eq!(
                run.final_snapshot().cluster_sizes().iter().sum::<usize>(),
                points.nrows()
            );
        }
    }

    #[test]
    fn runs_are_reproducible_with_a_fixed_seed() {
        let mut data_rng = ChaCha8Rng::seed_from_u64(8);
        let points = generate_dataset(DataMode::Uniform, 120, &mut data_rng).unwrap();
        let run_once = |seed| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let mut engine = KMeansEngine::new(
                &points,
                EngineConfig::new(5, InitMethod::KMeansPlusPlus),
                None,
            )
            .unwrap();
            engine.run(&mut rng).unwrap();
            engine.into_trajectory().unwrap()
        };
        assert_eq!(run_once(13), run_once(13));
    }

    #[test]
    fn pass_cap_yields_capped_out_trajectory() {
        let points = two_pairs();
        let config = EngineConfig {
            max_iter: 1,
            ..EngineConfig::new(2, InitMethod::Manual)
        };
        let mut engine =
            KMeansEngine::new(&points, config, Some(array![[0.0, 0.0], [10.0, 0.0]])).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let run = engine.run(&mut rng).unwrap();
        assert_eq!(run.termination(), Termination::CappedOut);
        assert_eq!(run.len(), 2);
        // The closing snapshot carries the adopted centers with the last assignment.
        assert_eq!(run.final_centers(), &array![[0.0, 0.5], [10.0, 0.5]]);
        assert_eq!(engine.phase(), EnginePhase::CappedOut);
    }

    #[test]
    fn second_run_is_rejected() {
        let points = two_pairs();
        let mut engine =
            KMeansEngine::new(&points, EngineConfig::new(2, InitMethod::Random), None).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        engine.run(&mut rng).unwrap();
        assert!(matches!(engine.run(&mut rng), Err(KMeansError::AlreadyRun)));
    }

    #[test]
    fn bogus_method_fails_before_construction() {
        let points = two_pairs();
        let err = KMeansEngine::with_method_name(&points, 2, "Bogus", None).unwrap_err();
        assert!(matches!(err, KMeansError::InvalidInitMethod(_)));
    }

    #[test]
    fn manual_without_matching_centers_fails_fast() {
        let points = two_pairs();
        let err = KMeansEngine::with_method_name(&points, 2, "Manual", None).unwrap_err();
        assert!(matches!(err, KMeansError::InvalidManualCenters(_)));
        let err = KMeansEngine::with_method_name(
            &points,
            2,
            "Manual",
            Some(array![[0.0, 0.0], [1.0, 1.0], [2.0, 2.0]]),
        )
        .unwrap_err();
        assert!(matches!(err, KMeansError::InvalidManualCenters(_)));
    }

    #[test]
    fn k_larger_than_dataset_fails_fast() {
        let points = two_pairs();
        let err = KMeansEngine::with_method_name(&points, 5, "Random", None).unwrap_err();
        assert!(matches!(err, KMeansError::DegenerateInput(_)));
    }

    #[test]
    fn empty_clusters_are_recorded() {
        // Identical points force every cluster but the first to empty out.
        let points = array![[1.0, 1.0], [1.0, 1.0], [1.0, 1.0]];
        let config = EngineConfig {
            empty_cluster: EmptyClusterPolicy::Freeze,
            ..EngineConfig::new(2, InitMethod::Manual)
        };
        let mut engine =
            KMeansEngine::new(&points, config, Some(array![[1.0, 1.0], [9.0, 9.0]])).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let run = engine.run(&mut rng).unwrap();
        assert!(run.converged());
        assert_eq!(
            run.empty_cluster_events(),
            &[EmptyClusterEvent { pass: 0, cluster: 1 }]
        );
        assert_eq!(run.final_centers(), &array![[1.0, 1.0], [9.0, 9.0]]);
    }

    fn converged_trajectory() -> Trajectory {
        let points = two_pairs();
        let mut engine = KMeansEngine::new(
            &points,
            EngineConfig::new(2, InitMethod::Manual),
            Some(array![[0.0, 0.0], [10.0, 0.0]]),
        )
        .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        engine.run(&mut rng).unwrap();
        engine.into_trajectory().unwrap()
    }

    #[test]
    fn recorded_trajectory_reads_back_from_json() {
        let trajectory = converged_trajectory();
        let json = serde_json::to_string(&trajectory).unwrap();
        let back: Trajectory = serde_json::from_str(&json).unwrap();
        assert_eq!(back, trajectory);
    }

    #[test]
    fn trajectory_without_snapshots_is_rejected_on_read() {
        let json = r#"{"snapshots":[],"termination":"converged","center_updates":0,"empty_cluster_events":[]}"#;
        let err = serde_json::from_str::<Trajectory>(json).unwrap_err();
        assert!(err.to_string().contains("no snapshots"), "{err}");
    }

    #[test]
    fn snapshot_with_out_of_range_cluster_is_rejected_on_read() {
        let mut value = serde_json::to_value(converged_trajectory().first()).unwrap();
        value["assignments"] = serde_json::json!([0, 5, 1, 1]);
        let err = serde_json::from_value::<Snapshot>(value).unwrap_err();
        assert!(err.to_string().contains("cluster 5"), "{err}");
    }

    #[test]
    fn trajectory_with_mismatched_snapshots_is_rejected_on_read() {
        let mut value = serde_json::to_value(converged_trajectory()).unwrap();
        value["snapshots"][2]["assignments"] = serde_json::json!([0, 0, 1]);
        assert!(serde_json::from_value::<Trajectory>(value).is_err());

        let mut value = serde_json::to_value(converged_trajectory()).unwrap();
        value["empty_cluster_events"] = serde_json::json!([{ "pass": 0, "cluster": 9 }]);
        assert!(serde_json::from_value::<Trajectory>(value).is_err());
    }

    #[test]
    fn grouping_lists_every_cluster() {
        let points = two_pairs();
        let mut engine = KMeansEngine::new(
            &points,
            EngineConfig::new(2, InitMethod::Manual),
            Some(array![[0.0, 0.0], [10.0, 0.0]]),
        )
        .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let run = engine.run(&mut rng).unwrap();
        let groups = group_by_cluster(run.final_snapshot());
        assert_eq!(groups[&0], vec![0, 1]);
        assert_eq!(groups[&1], vec![2, 3]);
        assert_eq!(run.final_snapshot().members(1), vec![2, 3]);
        assert_eq!(run.objective_history(&points).last().copied(), Some(1.0));
    }
}
