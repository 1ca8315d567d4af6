//! Run configuration
//!
//! Training constants and tuner settings. Defaults reproduce the reference
//! experiment; a JSON file can override any field.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, TunerError};
use crate::training::METRIC_NAMES;

/// Training settings shared by the search and the final retrain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Maximum epochs per training run
    pub epochs: usize,
    /// Mini-batch size
    pub batch_size: usize,
    /// Epochs without `val_loss` improvement before stopping
    pub early_stopping_patience: usize,
    /// Image shape (height, width, channels)
    pub input_shape: (usize, usize, usize),
    /// Number of output classes
    pub num_classes: usize,
    /// Root directory for tuner state
    pub output_path: PathBuf,
    /// Batch size used when predicting on the test set
    pub predict_batch_size: usize,
    /// Seed for weight init, dropout and shuffling
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 50,
            batch_size: 32,
            early_stopping_patience: 5,
            input_shape: (28, 28, 1),
            num_classes: 10,
            output_path: PathBuf::from("output"),
            predict_batch_size: 32,
            seed: 42,
        }
    }
}

impl TrainConfig {
    /// Create a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set epochs
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    /// Builder method to set batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Builder method to set early stopping patience
    pub fn with_patience(mut self, patience: usize) -> Self {
        self.early_stopping_patience = patience;
        self
    }

    /// Builder method to set the output directory
    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = path.into();
        self
    }

    /// Builder method to set the seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(invalid("epochs", self.epochs, "must be positive"));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size", self.batch_size, "must be positive"));
        }
        if self.predict_batch_size == 0 {
            return Err(invalid("predict_batch_size", self.predict_batch_size, "must be positive"));
        }
        if self.num_classes < 2 {
            return Err(invalid("num_classes", self.num_classes, "need at least two classes"));
        }
        let (h, w, c) = self.input_shape;
        if h < 4 || w < 4 || c == 0 {
            return Err(TunerError::ConfigError(format!(
                "input_shape {:?} is too small for two 2x2 pooling stages",
                self.input_shape
            )));
        }
        Ok(())
    }
}

/// Direction of the objective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizeDirection {
    Minimize,
    Maximize,
}

/// Metric the tuner ranks trials by
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    pub name: String,
    pub direction: OptimizeDirection,
}

impl Objective {
    pub fn new(name: impl Into<String>, direction: OptimizeDirection) -> Self {
        Self {
            name: name.into(),
            direction,
        }
    }

    pub fn maximize(name: impl Into<String>) -> Self {
        Self::new(name, OptimizeDirection::Maximize)
    }

    pub fn minimize(name: impl Into<String>) -> Self {
        Self::new(name, OptimizeDirection::Minimize)
    }

    /// Whether `a` is a better objective value than `b`
    pub fn is_better(&self, a: f64, b: f64) -> bool {
        match self.direction {
            OptimizeDirection::Maximize => a > b,
            OptimizeDirection::Minimize => a < b,
        }
    }

    /// Best value in a per-epoch series, ignoring NaN
    pub fn best_of(&self, values: &[f64]) -> Option<f64> {
        values
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .fold(None, |best, v| match best {
                Some(b) if !self.is_better(v, b) => Some(b),
                _ => Some(v),
            })
    }

    /// Worst possible value, used to rank failed trials last
    pub fn worst(&self) -> f64 {
        match self.direction {
            OptimizeDirection::Maximize => f64::NEG_INFINITY,
            OptimizeDirection::Minimize => f64::INFINITY,
        }
    }
}

impl Default for Objective {
    fn default() -> Self {
        Self::maximize("val_accuracy")
    }
}

/// Hyperparameter search settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    /// Metric used to score trials
    pub objective: Objective,
    /// Trial budget for random search and Bayesian optimization
    pub max_trials: usize,
    /// Hyperband reduction factor
    pub factor: usize,
    /// Number of full Hyperband sweeps
    pub hyperband_iterations: usize,
    /// Minimum epochs a Hyperband trial trains for
    pub min_epochs: usize,
    /// Random trials before the Gaussian process takes over
    pub num_initial_points: usize,
    /// Observation noise added to the GP kernel diagonal
    pub alpha: f64,
    /// Exploration weight of the UCB acquisition
    pub beta: f64,
    /// Random candidates scored by the acquisition per step
    pub num_candidates: usize,
    /// Duplicate draws tolerated before the oracle gives up
    pub max_collisions: usize,
    /// Random seed for the oracle
    pub seed: u64,
    /// Discard previous results in the project directory
    pub overwrite: bool,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            objective: Objective::default(),
            max_trials: 10,
            factor: 3,
            hyperband_iterations: 1,
            min_epochs: 1,
            num_initial_points: 2,
            alpha: 1e-4,
            beta: 2.6,
            num_candidates: 500,
            max_collisions: 20,
            seed: 42,
            overwrite: false,
        }
    }
}

impl TunerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_trials(mut self, n: usize) -> Self {
        self.max_trials = n;
        self
    }

    pub fn with_factor(mut self, factor: usize) -> Self {
        self.factor = factor;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_objective(mut self, objective: Objective) -> Self {
        self.objective = objective;
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_trials == 0 {
            return Err(invalid("max_trials", self.max_trials, "must be positive"));
        }
        if self.factor < 2 {
            return Err(invalid("factor", self.factor, "must be at least 2"));
        }
        if self.hyperband_iterations == 0 {
            return Err(invalid("hyperband_iterations", self.hyperband_iterations, "must be positive"));
        }
        if self.min_epochs == 0 {
            return Err(invalid("min_epochs", self.min_epochs, "must be positive"));
        }
        if self.num_candidates == 0 {
            return Err(invalid("num_candidates", self.num_candidates, "must be positive"));
        }
        if !(self.alpha > 0.0) {
            return Err(invalid("alpha", self.alpha, "must be positive"));
        }
        if !METRIC_NAMES.contains(&self.objective.name.as_str()) {
            return Err(invalid(
                "objective",
                &self.objective.name,
                &format!("must be one of {}", METRIC_NAMES.join(", ")),
            ));
        }
        Ok(())
    }
}

/// Everything a run needs, loadable from one JSON file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub train: TrainConfig,
    pub tuner: TunerConfig,
}

impl RunConfig {
    /// Load a configuration file; missing fields keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            TunerError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: RunConfig = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.train.validate()?;
        self.tuner.validate()
    }
}

fn invalid(name: &str, value: impl ToString, reason: &str) -> TunerError {
    TunerError::InvalidParameter {
        name: name.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
