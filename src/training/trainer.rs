//! Mini-batch training loop

use ndarray::{ArrayView2, ArrayViewD, Axis};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

use super::{Callback, CallbackAction, EpochLogs, History};
use crate::error::{Result, TunerError};
use crate::nn::Sequential;

/// Settings for one `fit` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitConfig {
    /// Train until this (exclusive) epoch index
    pub epochs: usize,
    /// First epoch to run; earlier epochs belong to a previous fit
    pub initial_epoch: usize,
    pub batch_size: usize,
    pub shuffle: bool,
    pub seed: u64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            epochs: 1,
            initial_epoch: 0,
            batch_size: 32,
            shuffle: true,
            seed: 42,
        }
    }
}

impl FitConfig {
    pub fn new(epochs: usize, batch_size: usize) -> Self {
        Self {
            epochs,
            batch_size,
            ..Default::default()
        }
    }

    pub fn with_initial_epoch(mut self, initial_epoch: usize) -> Self {
        self.initial_epoch = initial_epoch;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Train `model` on (x, y), evaluating on `validation` after every epoch
///
/// Training loss and accuracy are sample-weighted means over the epoch's
/// batches. Without validation data the `val_*` entries are NaN.
pub fn fit(
    model: &mut Sequential,
    x: ArrayViewD<f32>,
    y: ArrayView2<f32>,
    validation: Option<(ArrayViewD<f32>, ArrayView2<f32>)>,
    config: &FitConfig,
    callbacks: &mut [&mut dyn Callback],
) -> Result<History> {
    let n = x.shape()[0];
    if n != y.nrows() {
        return Err(TunerError::ShapeError {
            expected: format!("{} target rows", n),
            actual: y.nrows().to_string(),
        });
    }
    if n == 0 {
        return Err(TunerError::TrainingError("empty training set".to_string()));
    }
    if config.batch_size == 0 {
        return Err(TunerError::InvalidParameter {
            name: "batch_size".to_string(),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        });
    }

    let mut history = History::new();
    for callback in callbacks.iter_mut() {
        callback.on_train_begin(model);
    }

    let mut indices: Vec<usize> = (0..n).collect();
    for epoch in config.initial_epoch..config.epochs {
        let start = Instant::now();
        if config.shuffle {
            // Per-epoch seed keeps resumed runs on the same batch order
            let mut rng = Xoshiro256PlusPlus::seed_from_u64(config.seed.wrapping_add(epoch as u64));
            indices.sort_unstable();
            indices.shuffle(&mut rng);
        }

        let mut loss_sum = 0.0f64;
        let mut acc_sum = 0.0f64;
        for chunk in indices.chunks(config.batch_size) {
            let batch_x = x.select(Axis(0), chunk);
            let batch_y = y.select(Axis(0), chunk);
            let (loss, acc) = model.train_on_batch(&batch_x, &batch_y)?;
            loss_sum += loss as f64 * chunk.len() as f64;
            acc_sum += acc as f64 * chunk.len() as f64;
        }

        let (val_loss, val_accuracy) = match &validation {
            Some((vx, vy)) => model.evaluate(vx.view(), vy.view(), config.batch_size)?,
            None => (f64::NAN, f64::NAN),
        };

        let logs = EpochLogs {
            epoch,
            loss: loss_sum / n as f64,
            accuracy: acc_sum / n as f64,
            val_loss,
            val_accuracy,
        };
        history.push(&logs);
        info!(
            "Epoch {}/{} - loss: {:.4} - accuracy: {:.4} - val_loss: {:.4} - val_accuracy: {:.4} ({:.1}s)",
            epoch + 1,
            config.epochs,
            logs.loss,
            logs.accuracy,
            logs.val_loss,
            logs.val_accuracy,
            start.elapsed().as_secs_f64()
        );

        let mut stop = false;
        for callback in callbacks.iter_mut() {
            if callback.on_epoch_end(&logs, model) == CallbackAction::Stop {
                stop = true;
            }
        }
        if stop {
            debug!(epoch, "Training stopped by callback");
            break;
        }
    }

    for callback in callbacks.iter_mut() {
        callback.on_train_end(model)?;
    }
    Ok(history)
}
