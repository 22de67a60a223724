use std::path::{Path, PathBuf};
use std::process;
use std::str::FromStr;
use std::time::Instant;

use clap::Parser;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

use kmeans_replay::{
    generate_dataset, load_csv, DataMatrix, DataMode, EmptyClusterPolicy, EngineConfig,
    InitMethod, KMeansEngine, ReplayCursor, Result as KMeansResult, Snapshot, Trajectory,
};

#[derive(Parser, Debug)]
#[command(name = "kmeans-replay")]
#[command(about = "Run k-means once and record every iteration for replay", long_about = None)]
struct Args {
    /// Number of clusters
    #[arg(short, long, default_value_t = 4)]
    k: usize,

    /// Initialization method (Random, "Farthest First", KMeans++, Manual)
    #[arg(long, value_parser = parse_init_method, default_value = "Random")]
    init: InitMethod,

    /// Shape of the generated dataset when not using --input
    #[arg(long, value_parser = parse_data_mode, default_value = "clustered")]
    data_mode: DataMode,

    /// Number of points to generate when not using --input
    #[arg(short = 'n', long, default_value_t = 300)]
    points: usize,

    /// Input dataset (CSV with a header row)
    #[arg(long)]
    input: Option<PathBuf>,

    /// Manual initial centers (CSV with a header row); required with --init Manual
    #[arg(long)]
    centers: Option<PathBuf>,

    /// RNG seed
    #[arg(long, default_value_t = 42u64)]
    seed: u64,

    /// Maximum number of assign/update passes
    #[arg(short = 'i', long, default_value_t = 100)]
    max_iter: usize,

    /// Convergence tolerance (Euclidean center shift)
    #[arg(long, default_value_t = 1e-6)]
    tol: f64,

    /// Recovery for clusters left without points (reseed, freeze)
    #[arg(long, value_parser = parse_empty_cluster_policy, default_value = "reseed")]
    empty_cluster: EmptyClusterPolicy,

    /// Output file for the recorded trajectory (JSON)
    #[arg(short, long, default_value = "kmeans_trajectory.json")]
    output: PathBuf,

    /// Optional file containing the final per-point cluster assignments (CSV)
    #[arg(long)]
    assignments: Option<PathBuf>,

    /// Print the snapshot at this step (0-based) after the run
    #[arg(long)]
    step: Option<usize>,

    /// Verbosity: set RUST_LOG style level (info, debug, warn)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() {
    let args = Args::parse();
    if let Err(err) = init_logging(&args.log_level) {
        eprintln!("failed to initialise logging: {err}");
    }

    if let Err(err) = run(args) {
        error!(error = %err, "kmeans run failed");
        process::exit(1);
    }
}

fn init_logging(level: &str) -> Result<(), String> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(match level {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "warn" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber).map_err(|err| err.to_string())
}

fn run(args: Args) -> KMeansResult<()> {
    info!(
        k = args.k,
        init = %args.init,
        max_iter = args.max_iter,
        tol = args.tol,
        seed = args.seed,
        "starting kmeans run"
    );

    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    let data = load_data(&args, &mut rng)?;
    let manual_centers = match args.centers.as_deref() {
        Some(path) => {
            info!(path = ?path, "loading manual centers");
            Some(load_csv(path)?)
        }
        None => None,
    };

    let config = EngineConfig {
        k: args.k,
        init: args.init,
        max_iter: args.max_iter,
        tol: args.tol,
        empty_cluster: args.empty_cluster,
    };

    let start = Instant::now();
    let mut engine = KMeansEngine::new(&data, config.clone(), manual_centers)?;
    let trajectory = engine.run(&mut rng)?;
    let elapsed = start.elapsed();
    info!(
        snapshots = trajectory.len(),
        center_updates = trajectory.center_updates(),
        converged = trajectory.converged(),
        inertia = trajectory.final_snapshot().inertia(&data),
        took_seconds = elapsed.as_secs_f64(),
        "kmeans run recorded"
    );
    info!(sizes = ?trajectory.final_snapshot().cluster_sizes(), "final cluster populations");

    write_trajectory(&args, &data, &config, trajectory, elapsed.as_secs_f64())?;

    if let Some(path) = args.assignments.as_ref() {
        write_assignments(path, trajectory)?;
    }

    if let Some(step) = args.step {
        let mut cursor = ReplayCursor::new(trajectory);
        let snapshot = cursor.seek(step)?;
        println!("{}", serde_json::to_string_pretty(&snapshot_json(snapshot))?);
    }

    Ok(())
}

fn load_data(args: &Args, rng: &mut ChaCha8Rng) -> KMeansResult<DataMatrix> {
    if let Some(path) = args.input.as_deref() {
        info!(path = ?path, "loading input data");
        load_csv(path)
    } else {
        info!(points = args.points, mode = ?args.data_mode, "generating synthetic data");
        generate_dataset(args.data_mode, args.points, rng)
    }
}

fn rows(matrix: &DataMatrix) -> Vec<Vec<f64>> {
    matrix.rows().into_iter().map(|row| row.to_vec()).collect()
}

fn snapshot_json(snapshot: &Snapshot) -> serde_json::Value {
    json!({
        "centers": rows(snapshot.centers()),
        "assignments": snapshot.assignments(),
    })
}

fn write_trajectory(
    args: &Args,
    data: &DataMatrix,
    config: &EngineConfig,
    trajectory: &Trajectory,
    elapsed_secs: f64,
) -> KMeansResult<()> {
    let dump = json!({
        "k": config.k,
        "dim": data.ncols(),
        "rows": data.nrows(),
        "config": config,
        "seed": args.seed,
        "elapsed_seconds": elapsed_secs,
        "termination": trajectory.termination(),
        "passes": trajectory.passes(),
        "center_updates": trajectory.center_updates(),
        "empty_cluster_events": trajectory.empty_cluster_events(),
        "objective": trajectory.objective_history(data),
        "data_source": match args.input.as_ref() {
            Some(path) => json!({
                "type": "file",
                "path": path.display().to_string(),
            }),
            None => json!({
                "type": "synthetic",
                "mode": args.data_mode,
                "points": args.points,
            }),
        },
        "points": rows(data),
        "snapshots": trajectory
            .snapshots()
            .iter()
            .map(snapshot_json)
            .collect::<Vec<_>>(),
    });

    std::fs::write(&args.output, serde_json::to_string_pretty(&dump)?)?;
    info!(path = ?args.output, "wrote trajectory");
    Ok(())
}

fn write_assignments(path: &Path, trajectory: &Trajectory) -> KMeansResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["index", "cluster"])?;
    for (idx, cluster) in trajectory.final_assignments().iter().enumerate() {
        writer.write_record([idx.to_string(), cluster.to_string()])?;
    }
    writer.flush()?;
    info!(path = ?path, "wrote assignments CSV");
    Ok(())
}

fn parse_init_method(raw: &str) -> Result<InitMethod, String> {
    InitMethod::from_str(raw).map_err(|err| err.to_string())
}

fn parse_data_mode(raw: &str) -> Result<DataMode, String> {
    DataMode::from_str(raw).map_err(|err| err.to_string())
}

fn parse_empty_cluster_policy(raw: &str) -> Result<EmptyClusterPolicy, String> {
    EmptyClusterPolicy::from_str(raw).map_err(|err| err.to_string())
}
