//! Command-line interface
//!
//! Loads Fashion-MNIST, runs the selected tuner, retrains the best
//! configuration, prints a classification report and saves the training plot.

use anyhow::Context;
use clap::Parser;
use colored::*;
use std::path::PathBuf;
use std::time::Instant;

use crate::config::RunConfig;
use crate::data::{Dataset, FashionMnist, LABEL_NAMES};
use crate::model::{search_space, CnnHyperModel};
use crate::nn::argmax_rows;
use crate::optimizer::{param_float, param_int, Tuner, TunerKind};
use crate::plot::save_plot;
use crate::training::ClassificationReport;

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString   { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }

fn kv(key: &str, val: &str) {
    println!("  {:<18} {}", muted(key), val.white());
}

fn step_ok(msg: &str) {
    println!("  {} {}", ok("✓"), msg);
}

fn step_run(msg: &str) {
    println!("  {} {}...", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("  {} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "fashion-tuner")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Hyperparameter search for a Fashion-MNIST CNN")]
#[command(long_about = None)]
pub struct Cli {
    /// Type of hyperparameter tuner to use
    #[arg(short, long, value_enum)]
    pub tuner: TunerKind,

    /// Path to the output accuracy/loss plot
    #[arg(short, long)]
    pub plot: PathBuf,

    /// Directory holding the Fashion-MNIST IDX files
    #[arg(long, default_value = "data/fashion-mnist")]
    pub data_dir: PathBuf,

    /// Root directory for tuner results (overrides the config file)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Maximum epochs per training run (overrides the config file)
    #[arg(long)]
    pub epochs: Option<usize>,

    /// JSON run configuration
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Fetch missing dataset files from the public mirror
    #[arg(long)]
    pub download: bool,

    /// Discard previous results for this tuner instead of resuming
    #[arg(long)]
    pub overwrite: bool,
}

impl Cli {
    /// Configuration file (or defaults) with command-line overrides applied
    pub fn run_config(&self) -> anyhow::Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_file(path)?,
            None => RunConfig::default(),
        };
        if let Some(output) = &self.output {
            config.train.output_path = output.clone();
        }
        if let Some(epochs) = self.epochs {
            config.train.epochs = epochs;
        }
        if self.overwrite {
            config.tuner.overwrite = true;
        }
        config.validate()?;
        Ok(config)
    }
}

// ─── Commands ──────────────────────────────────────────────────────────────────

fn load_dataset(cli: &Cli, config: &RunConfig) -> anyhow::Result<Dataset> {
    let source = FashionMnist::new(&cli.data_dir);
    let (train, test) = if cli.download {
        source.load_or_download()?
    } else {
        source.load().with_context(|| {
            format!(
                "cannot load Fashion-MNIST from {} (pass --download to fetch it)",
                cli.data_dir.display()
            )
        })?
    };
    let data = Dataset::from_raw(&train, &test, config.train.num_classes)?;

    let (h, w, c) = config.train.input_shape;
    if data.train_x.shape()[1..] != [h, w, c] {
        anyhow::bail!(
            "dataset images are {:?} but input_shape is {:?}",
            &data.train_x.shape()[1..],
            config.train.input_shape
        );
    }
    Ok(data)
}

/// Run the full search → retrain → evaluate → plot pipeline
pub fn cmd_run(cli: &Cli) -> anyhow::Result<()> {
    let config = cli.run_config()?;

    section("Fashion-MNIST tuner");
    kv("Tuner", cli.tuner.as_str());
    kv("Max epochs", &config.train.epochs.to_string());
    kv("Batch size", &config.train.batch_size.to_string());
    kv("Results", &config.train.output_path.join(cli.tuner.as_str()).display().to_string());

    step_run("Loading Fashion MNIST");
    let start = Instant::now();
    let data = load_dataset(cli, &config)?;
    step_done(&format!(
        "{} train / {} test images in {:.1?}",
        data.n_train(),
        data.n_test(),
        start.elapsed()
    ));

    step_run(&format!("Instantiating a {} tuner object", cli.tuner.label()));
    let hypermodel =
        CnnHyperModel::new(data, config.train.clone()).with_objective(config.tuner.objective.clone());
    let mut tuner = Tuner::new(
        cli.tuner,
        hypermodel,
        search_space(),
        &config.tuner,
        config.train.epochs,
        &config.train.output_path,
        cli.tuner.as_str(),
    )?;
    if !tuner.trials().is_empty() {
        step_ok(&format!("Resuming with {} recorded trials", tuner.trials().len()));
    }

    section("Search");
    step_run("Performing hyperparameter search");
    let start = Instant::now();
    tuner.search()?;
    step_done(&format!("{} trials in {:.1?}", tuner.trials().len(), start.elapsed()));
    for line in tuner.results_summary(3).lines() {
        println!("  {}", dim(line));
    }

    let best = tuner
        .get_best_hyperparameters(1)
        .into_iter()
        .next()
        .context("search finished without a completed trial")?;
    println!();
    step_ok(&format!("Optimal number of filters in conv_1 layer: {}", param_int(&best, "conv_1")?));
    step_ok(&format!("Optimal number of filters in conv_2 layer: {}", param_int(&best, "conv_2")?));
    step_ok(&format!("Optimal number of units in dense layer: {}", param_int(&best, "dense_units")?));
    step_ok(&format!("Optimal learning rate: {:.4}", param_float(&best, "learning_rate")?));

    section("Best model");
    step_run("Training the best model");
    let start = Instant::now();
    let (mut model, history) = tuner.hypermodel().fit_best(&best)?;
    step_done(&format!("{} epochs in {:.1?}", history.len(), start.elapsed()));
    for line in model.summary().lines() {
        println!("  {}", dim(line));
    }

    step_run("Evaluating network");
    let data = tuner.hypermodel().dataset();
    let predictions = model.predict(data.test_x.view().into_dyn(), config.train.predict_batch_size)?;
    let report = ClassificationReport::new(&data.test_labels, &argmax_rows(&predictions), &LABEL_NAMES)?;
    println!();
    println!("{}", report);

    save_plot(&history, &cli.plot)?;
    step_ok(&format!("Plot saved to {}", cli.plot.display()));
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuner_and_plot_are_required() {
        assert!(Cli::try_parse_from(["fashion-tuner"]).is_err());
        assert!(Cli::try_parse_from(["fashion-tuner", "--tuner", "random"]).is_err());
        assert!(Cli::try_parse_from(["fashion-tuner", "--plot", "p.png"]).is_err());
    }

    #[test]
    fn test_unknown_tuner_is_rejected() {
        let result = Cli::try_parse_from(["fashion-tuner", "--tuner", "grid", "--plot", "p.png"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parses_each_tuner() {
        for (name, kind) in [
            ("hyperband", TunerKind::Hyperband),
            ("random", TunerKind::Random),
            ("bayesian", TunerKind::Bayesian),
        ] {
            let cli = Cli::try_parse_from(["fashion-tuner", "-t", name, "-p", "out/plot.png"]).unwrap();
            assert_eq!(cli.tuner, kind);
            assert_eq!(cli.plot, PathBuf::from("out/plot.png"));
            assert!(!cli.download);
        }
    }

    #[test]
    fn test_tuner_labels_name_the_strategy() {
        assert_eq!(TunerKind::Hyperband.label(), "hyperband");
        assert_eq!(TunerKind::Random.label(), "random search");
        assert_eq!(TunerKind::Bayesian.label(), "bayesian optimization");
        assert_eq!(TunerKind::Random.as_str(), "random");
    }

    #[test]
    fn test_overrides_apply_to_run_config() {
        let cli = Cli::try_parse_from([
            "fashion-tuner",
            "--tuner",
            "bayesian",
            "--plot",
            "p.png",
            "--epochs",
            "7",
            "--output",
            "runs",
            "--overwrite",
        ])
        .unwrap();
        let config = cli.run_config().unwrap();
        assert_eq!(config.train.epochs, 7);
        assert_eq!(config.train.output_path, PathBuf::from("runs"));
        assert!(config.tuner.overwrite);
        assert_eq!(config.tuner.max_trials, 10);
    }

    #[test]
    fn test_zero_epochs_override_is_invalid() {
        let cli = Cli::try_parse_from(["fashion-tuner", "-t", "random", "-p", "p.png", "--epochs", "0"]).unwrap();
        assert!(cli.run_config().is_err());
    }

    #[test]
    fn test_missing_dataset_mentions_download() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::try_parse_from([
            "fashion-tuner",
            "-t",
            "random",
            "-p",
            "p.png",
            "--data-dir",
            dir.path().to_str().unwrap(),
        ])
        .unwrap();
        let err = load_dataset(&cli, &cli.run_config().unwrap()).unwrap_err();
        assert!(format!("{:#}", err).contains("--download"));
    }
}
