//! Horizon CLI — drive forecasting experiments from the terminal.
//!
//! Loads an experiment configuration and a dataset, then runs one of the
//! three phases: `train`, `test`, or `predict`.

use clap::Parser;
use horizon_core::config::{FeatureMode, ModelVariant};
use horizon_core::{ExperimentConfig, MatrixProvider};
use horizon_exp::Experiment;
use ndarray::Array2;
use std::path::{Path, PathBuf};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Horizon: train, evaluate, and run time-series forecasting models
#[derive(Parser, Debug)]
#[command(name = "horizon", version, about, long_about = None)]
struct Cli {
    /// Experiment configuration file (JSON)
    #[arg(short, long)]
    config: PathBuf,

    /// Dataset file: a JSON matrix of rows x feature columns
    #[arg(short, long)]
    data: PathBuf,

    /// Run identifier; composed from the configuration if omitted
    #[arg(short, long)]
    run_id: Option<String>,

    /// Override the configured input window length
    #[arg(long)]
    seq_len: Option<usize>,

    /// Override the configured forecast horizon
    #[arg(long)]
    pred_len: Option<usize>,

    /// Override the configured epoch budget
    #[arg(long)]
    epochs: Option<usize>,

    /// Override the configured batch size
    #[arg(long)]
    batch_size: Option<usize>,

    /// Override the configured peak learning rate
    #[arg(long)]
    learning_rate: Option<f64>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Train a model and checkpoint its final parameters
    Train,
    /// Evaluate on the test split and save prediction/target artifacts
    Test {
        /// Load the run's checkpoint before evaluating
        #[arg(long)]
        load: bool,
    },
    /// Forecast past the end of the series and save the raw outputs
    Predict {
        /// Load the run's checkpoint before forecasting
        #[arg(long)]
        load: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(EnvFilter::new(filter));
    tracing_subscriber::registry().with(stderr_layer).init();

    let mut cfg = load_config(&cli.config)?;
    if let Some(v) = cli.seq_len {
        cfg.seq_len = v;
    }
    if let Some(v) = cli.pred_len {
        cfg.pred_len = v;
    }
    if let Some(v) = cli.epochs {
        cfg.train_epochs = v;
    }
    if let Some(v) = cli.batch_size {
        cfg.batch_size = v;
    }
    if let Some(v) = cli.learning_rate {
        cfg.learning_rate = v;
    }
    cfg.validate()?;

    let raw = load_matrix(&cli.data)?;
    tracing::info!(
        rows = raw.nrows(),
        columns = raw.ncols(),
        data = %cli.data.display(),
        "dataset loaded"
    );

    let run_id = cli.run_id.clone().unwrap_or_else(|| compose_run_id(&cfg));
    let provider = MatrixProvider::new(cfg.clone(), raw);
    let mut exp = Experiment::new(cfg, Box::new(provider))?;

    match cli.command {
        Command::Train => {
            let report = exp.train(&run_id)?;
            println!(
                "run {run_id}: {} epochs x {} steps, train mse {:.6}, vali mse {:.6}, test mse {:.6}",
                report.epochs, report.steps_per_epoch, report.train_mse, report.vali_mse, report.test_mse
            );
            println!("checkpoint: {}", report.checkpoint.display());
        }
        Command::Test { load } => {
            let report = exp.test(&run_id, load)?;
            println!("run {run_id}: {report}");
        }
        Command::Predict { load } => {
            let preds = exp.predict(&run_id, load)?;
            let shape = preds.shape();
            println!(
                "run {run_id}: saved {} forecast windows of {} steps x {} channels",
                shape[0], shape[1], shape[2]
            );
        }
    }
    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<ExperimentConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
    let cfg: ExperimentConfig = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Parse a JSON matrix of `rows x columns` into an array. Every row must
/// have the same width.
fn load_matrix(path: &Path) -> anyhow::Result<Array2<f64>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("reading dataset {}: {e}", path.display()))?;
    let rows: Vec<Vec<f64>> = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("parsing dataset {}: {e}", path.display()))?;
    let height = rows.len();
    let width = rows.first().map(Vec::len).unwrap_or(0);
    if height == 0 || width == 0 {
        anyhow::bail!("dataset {} is empty", path.display());
    }
    if let Some(bad) = rows.iter().position(|r| r.len() != width) {
        anyhow::bail!(
            "dataset {} row {bad} has {} values, expected {width}",
            path.display(),
            rows[bad].len()
        );
    }
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    Ok(Array2::from_shape_vec((height, width), flat)?)
}

/// Default run identifier: architecture, feature mode, and window geometry.
fn compose_run_id(cfg: &ExperimentConfig) -> String {
    let model = match cfg.model {
        ModelVariant::DLinear => "dlinear",
        ModelVariant::PatchTst => "patchtst",
    };
    let features = match cfg.features {
        FeatureMode::S => "S",
        FeatureMode::Ms => "MS",
        FeatureMode::M => "M",
    };
    format!("{model}_{features}_sl{}_pl{}", cfg.seq_len, cfg.pred_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_compose_run_id() {
        let mut cfg = ExperimentConfig::new(ModelVariant::DLinear);
        cfg.seq_len = 96;
        cfg.pred_len = 24;
        assert_eq!(compose_run_id(&cfg), "dlinear_S_sl96_pl24");
        cfg.model = ModelVariant::PatchTst;
        cfg.features = FeatureMode::Ms;
        assert_eq!(compose_run_id(&cfg), "patchtst_MS_sl96_pl24");
    }

    #[test]
    fn test_load_matrix_rejects_ragged_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, "[[1.0, 2.0], [3.0]]").unwrap();
        assert!(load_matrix(&path).is_err());
    }

    #[test]
    fn test_load_matrix_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, "[[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]").unwrap();
        let m = load_matrix(&path).unwrap();
        assert_eq!(m.shape(), &[3, 2]);
        assert_eq!(m[[2, 1]], 6.0);
    }

    #[test]
    fn test_config_defaults_fill_in() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(&path, r#"{"model": "d_linear", "seq_len": 48}"#).unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.seq_len, 48);
        assert_eq!(cfg.pred_len, 24);
    }
}
