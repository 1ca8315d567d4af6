//! CNN hypermodel: search space, network builder and per-trial training

use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::{Objective, TrainConfig};
use crate::data::Dataset;
use crate::error::{Result, TunerError};
use crate::nn::{Adam, BatchNorm, Conv2D, Dense, Dropout, Flatten, MaxPool2D, ReLU, Sequential, Softmax};
use crate::optimizer::{param_float, param_int, HyperModel, SearchSpace, TrialBudget, TrialOutcome, TrialParams};
use crate::training::{fit, Callback, EarlyStopping, FitConfig, History, ModelCheckpoint};

const KERNEL_SIZE: usize = 3;
const DROPOUT_RATE: f32 = 0.5;

/// conv_1, conv_2, dense_units and learning_rate
pub fn search_space() -> SearchSpace {
    SearchSpace::new()
        .int("conv_1", 32, 96, 32)
        .int("conv_2", 64, 128, 32)
        .int("dense_units", 256, 768, 256)
        .choice("learning_rate", vec![1e-1, 1e-2, 1e-3])
}

fn positive(params: &TrialParams, name: &str) -> Result<usize> {
    let value = param_int(params, name)?;
    usize::try_from(value)
        .ok()
        .filter(|&v| v > 0)
        .ok_or_else(|| TunerError::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
            reason: "must be a positive integer".to_string(),
        })
}

/// Build and compile the network for one configuration
///
/// Two CONV => RELU => BN => POOL blocks, then FC => RELU => BN => DROPOUT
/// and a softmax classifier.
pub fn build_model(params: &TrialParams, config: &TrainConfig) -> Result<Sequential> {
    let conv_1 = positive(params, "conv_1")?;
    let conv_2 = positive(params, "conv_2")?;
    let dense_units = positive(params, "dense_units")?;
    let learning_rate = param_float(params, "learning_rate")?;
    if !(learning_rate.is_finite() && learning_rate > 0.0) {
        return Err(TunerError::InvalidParameter {
            name: "learning_rate".to_string(),
            value: learning_rate.to_string(),
            reason: "must be positive".to_string(),
        });
    }

    let (h, w, c) = config.input_shape;
    let mut model = Sequential::new(&[h, w, c], config.seed);
    model
        .add(Conv2D::new(conv_1, KERNEL_SIZE))?
        .add(ReLU::new())?
        .add(BatchNorm::new())?
        .add(MaxPool2D::new())?;
    model
        .add(Conv2D::new(conv_2, KERNEL_SIZE))?
        .add(ReLU::new())?
        .add(BatchNorm::new())?
        .add(MaxPool2D::new())?;
    model
        .add(Flatten::new())?
        .add(Dense::new(dense_units))?
        .add(ReLU::new())?
        .add(BatchNorm::new())?
        .add(Dropout::new(DROPOUT_RATE))?;
    model.add(Dense::new(config.num_classes))?.add(Softmax::new())?;
    model.compile(Adam::new(learning_rate as f32));

    debug!(params = model.count_params(), "Built model");
    Ok(model)
}

/// Trains [`build_model`] networks on a dataset for the tuner
///
/// The test split doubles as validation data, both during the search and
/// when the best configuration is retrained. A trial's checkpoint holds the
/// weights of its best epoch by `objective`, which is what a continued
/// Hyperband trial resumes from.
pub struct CnnHyperModel {
    data: Dataset,
    config: TrainConfig,
    objective: Objective,
}

impl CnnHyperModel {
    pub fn new(data: Dataset, config: TrainConfig) -> Self {
        Self {
            data,
            config,
            objective: Objective::default(),
        }
    }

    pub fn with_objective(mut self, objective: Objective) -> Self {
        self.objective = objective;
        self
    }

    pub fn dataset(&self) -> &Dataset {
        &self.data
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    fn early_stopping(&self) -> EarlyStopping {
        EarlyStopping::new(self.config.early_stopping_patience).with_restore_best_weights()
    }

    fn train(&self, model: &mut Sequential, fit_config: &FitConfig, checkpoint: Option<&Path>) -> Result<History> {
        let mut es = self.early_stopping();
        let mut saver = checkpoint.map(|path| ModelCheckpoint::new(path, self.objective.clone()));
        let mut callbacks: Vec<&mut dyn Callback> = vec![&mut es];
        if let Some(saver) = saver.as_mut() {
            callbacks.push(saver);
        }
        let history = fit(
            model,
            self.data.train_x.view().into_dyn(),
            self.data.train_y.view(),
            Some((self.data.test_x.view().into_dyn(), self.data.test_y.view())),
            fit_config,
            &mut callbacks,
        )?;
        if let Some(epoch) = es.stopped_epoch() {
            info!("Early stopping at epoch {}, best val_loss {:.4}", epoch + 1, es.best());
        }
        Ok(history)
    }

    /// Train a fresh model for `params` over the full epoch budget
    pub fn fit_best(&self, params: &TrialParams) -> Result<(Sequential, History)> {
        let mut model = build_model(params, &self.config)?;
        let fit_config = FitConfig::new(self.config.epochs, self.config.batch_size).with_seed(self.config.seed);
        let history = self.train(&mut model, &fit_config, None)?;
        Ok((model, history))
    }
}

impl HyperModel for CnnHyperModel {
    fn run_trial(&mut self, params: &TrialParams, budget: &TrialBudget) -> Result<TrialOutcome> {
        let mut model = build_model(params, &self.config)?;

        let mut initial_epoch = budget.initial_epoch;
        if let Some(path) = &budget.restore_from {
            if path.exists() {
                model.load_weights(path)?;
                debug!(path = %path.display(), initial_epoch, "Continuing from parent checkpoint");
            } else {
                warn!(
                    path = %path.display(),
                    "Parent checkpoint missing, training trial {} from scratch",
                    budget.trial_id + 1
                );
                initial_epoch = 0;
            }
        }

        let fit_config = FitConfig::new(budget.epochs, self.config.batch_size)
            .with_initial_epoch(initial_epoch)
            .with_seed(self.config.seed);
        let history = self.train(&mut model, &fit_config, Some(budget.checkpoint_path.as_path()))?;
        Ok(TrialOutcome::from(&history))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::ParameterValue;
    use ndarray::{Array2, Array4};
    use rand::prelude::*;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn params(conv_1: i64, conv_2: i64, dense_units: i64, lr: f64) -> TrialParams {
        let mut p = TrialParams::new();
        p.insert("conv_1".to_string(), ParameterValue::Int(conv_1));
        p.insert("conv_2".to_string(), ParameterValue::Int(conv_2));
        p.insert("dense_units".to_string(), ParameterValue::Int(dense_units));
        p.insert("learning_rate".to_string(), ParameterValue::Float(lr));
        p
    }

    fn small_config() -> TrainConfig {
        TrainConfig {
            input_shape: (8, 8, 1),
            epochs: 2,
            batch_size: 8,
            ..TrainConfig::default()
        }
    }

    /// Bright top half for class 0, bright bottom half for class 1
    fn tiny_dataset(n: usize) -> Dataset {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let make = |rng: &mut Xoshiro256PlusPlus| {
            let mut x = Array4::<f32>::zeros((n, 8, 8, 1));
            let mut y = Array2::<f32>::zeros((n, 10));
            let mut labels = Vec::with_capacity(n);
            for i in 0..n {
                let class = i % 2;
                for r in 0..8 {
                    for c in 0..8 {
                        let lit = (r < 4) == (class == 0);
                        x[[i, r, c, 0]] = if lit { 0.8 } else { 0.1 } + rng.gen_range(0.0..0.1);
                    }
                }
                y[[i, class]] = 1.0;
                labels.push(class);
            }
            (x, y, labels)
        };
        let (train_x, train_y, _) = make(&mut rng);
        let (test_x, test_y, test_labels) = make(&mut rng);
        Dataset {
            train_x,
            train_y,
            test_x,
            test_y,
            test_labels,
        }
    }

    #[test]
    fn test_search_space_grid() {
        let space = search_space();
        assert_eq!(space.param_names(), vec!["conv_1", "conv_2", "dense_units", "learning_rate"]);
        assert_eq!(space.cardinality(), Some(3 * 3 * 3 * 3));
        let conv_2: Vec<i64> = space
            .get("conv_2")
            .and_then(|p| p.values())
            .unwrap()
            .iter()
            .filter_map(ParameterValue::as_int)
            .collect();
        assert_eq!(conv_2, vec![64, 96, 128]);
    }

    #[test]
    fn test_build_model_shapes() {
        let model = build_model(&params(32, 64, 256, 1e-3), &TrainConfig::default()).unwrap();
        assert_eq!(model.output_shape(), &[10]);
        let names: Vec<&str> = model.layers().map(|l| l.name()).collect();
        assert_eq!(names.len(), 15);
        assert_eq!(names.last(), Some(&"softmax"));
        assert!(model.optimizer().is_some());
    }

    #[test]
    fn test_build_model_rejects_bad_params() {
        let config = TrainConfig::default();
        assert!(build_model(&params(0, 64, 256, 1e-3), &config).is_err());
        assert!(build_model(&params(32, 64, 256, -1.0), &config).is_err());
        let mut missing = params(32, 64, 256, 1e-3);
        missing.remove("dense_units");
        assert!(matches!(
            build_model(&missing, &config),
            Err(TunerError::ParameterNotFound(_))
        ));
    }

    #[test]
    fn test_run_trial_writes_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut hm = CnnHyperModel::new(tiny_dataset(16), small_config());
        let budget = TrialBudget {
            trial_id: 0,
            epochs: 2,
            initial_epoch: 0,
            restore_from: None,
            checkpoint_path: dir.path().join("trial_0000").join("checkpoint.bin"),
        };
        let outcome = hm.run_trial(&params(32, 64, 256, 1e-3), &budget).unwrap();
        assert_eq!(outcome.metrics["val_accuracy"].len(), 2);
        assert!(budget.checkpoint_path.exists());

        let resumed = TrialBudget {
            trial_id: 1,
            epochs: 4,
            initial_epoch: 2,
            restore_from: Some(budget.checkpoint_path.clone()),
            checkpoint_path: dir.path().join("trial_0001").join("checkpoint.bin"),
        };
        let outcome = hm.run_trial(&params(32, 64, 256, 1e-3), &resumed).unwrap();
        assert_eq!(outcome.metrics["val_loss"].len(), 2);
    }

    #[test]
    fn test_checkpoint_holds_best_objective_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrainConfig {
            epochs: 4,
            ..small_config()
        };
        let mut hm = CnnHyperModel::new(tiny_dataset(16), config.clone());
        let budget = TrialBudget {
            trial_id: 0,
            epochs: 4,
            initial_epoch: 0,
            restore_from: None,
            checkpoint_path: dir.path().join("trial_0000").join("checkpoint.bin"),
        };
        let hp = params(32, 64, 256, 1e-1);
        let outcome = hm.run_trial(&hp, &budget).unwrap();
        let best = outcome.metrics["val_accuracy"].iter().copied().fold(f64::MIN, f64::max);

        // what a promoted trial would continue from
        let mut child = build_model(&hp, &config).unwrap();
        child.load_weights(&budget.checkpoint_path).unwrap();
        let data = hm.dataset();
        let (_, acc) = child
            .evaluate(data.test_x.view().into_dyn(), data.test_y.view(), config.batch_size)
            .unwrap();
        assert!((acc - best).abs() < 1e-9, "restored {} but best epoch scored {}", acc, best);
    }

    #[test]
    fn test_missing_parent_trains_from_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let mut hm = CnnHyperModel::new(tiny_dataset(8), small_config());
        let budget = TrialBudget {
            trial_id: 3,
            epochs: 2,
            initial_epoch: 1,
            restore_from: Some(dir.path().join("gone.bin")),
            checkpoint_path: dir.path().join("trial_0003").join("checkpoint.bin"),
        };
        let outcome = hm.run_trial(&params(32, 64, 256, 1e-2), &budget).unwrap();
        assert_eq!(outcome.metrics["loss"].len(), 2);
    }
}
