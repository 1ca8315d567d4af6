//! Training callbacks

use std::path::PathBuf;
use tracing::{debug, info};

use super::EpochLogs;
use crate::config::Objective;
use crate::error::{Result, TunerError};
use crate::nn::{Sequential, Tensor};

/// What the training loop should do after an epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    Stop,
}

/// Hooks invoked by [`fit`](super::fit)
pub trait Callback: Send {
    fn on_train_begin(&mut self, _model: &Sequential) {}

    fn on_epoch_end(&mut self, logs: &EpochLogs, model: &Sequential) -> CallbackAction;

    fn on_train_end(&mut self, _model: &mut Sequential) -> Result<()> {
        Ok(())
    }
}

/// Stop once the monitored metric has not improved for `patience` epochs
///
/// State is reset at the start of every `fit`, so one instance can be shared
/// across trials. Best weights are restored only when this callback is the
/// one that ended training.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    monitor: Objective,
    patience: usize,
    min_delta: f64,
    restore_best_weights: bool,
    best: f64,
    wait: usize,
    best_weights: Option<Vec<Tensor>>,
    stopped_epoch: Option<usize>,
}

impl EarlyStopping {
    /// Monitor `val_loss` (lower is better)
    pub fn new(patience: usize) -> Self {
        Self::monitoring(Objective::minimize("val_loss"), patience)
    }

    pub fn monitoring(monitor: Objective, patience: usize) -> Self {
        let best = monitor.worst();
        Self {
            monitor,
            patience,
            min_delta: 0.0,
            restore_best_weights: false,
            best,
            wait: 0,
            best_weights: None,
            stopped_epoch: None,
        }
    }

    pub fn with_min_delta(mut self, min_delta: f64) -> Self {
        self.min_delta = min_delta.abs();
        self
    }

    pub fn with_restore_best_weights(mut self) -> Self {
        self.restore_best_weights = true;
        self
    }

    /// Epoch at which training was stopped in the last `fit`, if any
    pub fn stopped_epoch(&self) -> Option<usize> {
        self.stopped_epoch
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    fn improved(&self, current: f64) -> bool {
        let shifted = match self.monitor.direction {
            crate::config::OptimizeDirection::Minimize => current + self.min_delta,
            crate::config::OptimizeDirection::Maximize => current - self.min_delta,
        };
        self.monitor.is_better(shifted, self.best)
    }
}

impl Callback for EarlyStopping {
    fn on_train_begin(&mut self, _model: &Sequential) {
        self.best = self.monitor.worst();
        self.wait = 0;
        self.best_weights = None;
        self.stopped_epoch = None;
    }

    fn on_epoch_end(&mut self, logs: &EpochLogs, model: &Sequential) -> CallbackAction {
        let Some(current) = logs.get(&self.monitor.name).filter(|v| !v.is_nan()) else {
            return CallbackAction::Continue;
        };

        if self.restore_best_weights && self.best_weights.is_none() {
            self.best_weights = Some(model.get_weights());
        }

        self.wait += 1;
        if self.improved(current) {
            self.best = current;
            self.wait = 0;
            if self.restore_best_weights {
                self.best_weights = Some(model.get_weights());
            }
        }

        if self.wait >= self.patience && logs.epoch > 0 {
            self.stopped_epoch = Some(logs.epoch);
            return CallbackAction::Stop;
        }
        CallbackAction::Continue
    }

    fn on_train_end(&mut self, model: &mut Sequential) -> Result<()> {
        if let Some(epoch) = self.stopped_epoch {
            info!(epoch = epoch + 1, monitor = %self.monitor.name, best = self.best, "Early stopping");
            if self.restore_best_weights {
                let weights = self
                    .best_weights
                    .take()
                    .ok_or_else(|| TunerError::TrainingError("no best weights recorded".to_string()))?;
                model.set_weights(&weights)?;
            }
        }
        Ok(())
    }
}

/// Save the weights of the best epoch by `monitor` to `path` when training ends
///
/// Epochs whose monitored value is missing or NaN never count as best. When
/// no epoch qualifies the final weights are written instead.
#[derive(Debug, Clone)]
pub struct ModelCheckpoint {
    path: PathBuf,
    monitor: Objective,
    best: f64,
    best_epoch: Option<usize>,
    best_weights: Option<Vec<Tensor>>,
}

impl ModelCheckpoint {
    pub fn new(path: impl Into<PathBuf>, monitor: Objective) -> Self {
        let best = monitor.worst();
        Self {
            path: path.into(),
            monitor,
            best,
            best_epoch: None,
            best_weights: None,
        }
    }

    /// Epoch whose weights will be (or were) saved
    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }
}

impl Callback for ModelCheckpoint {
    fn on_train_begin(&mut self, _model: &Sequential) {
        self.best = self.monitor.worst();
        self.best_epoch = None;
        self.best_weights = None;
    }

    fn on_epoch_end(&mut self, logs: &EpochLogs, model: &Sequential) -> CallbackAction {
        if let Some(current) = logs.get(&self.monitor.name).filter(|v| !v.is_nan()) {
            if self.best_epoch.is_none() || self.monitor.is_better(current, self.best) {
                self.best = current;
                self.best_epoch = Some(logs.epoch);
                self.best_weights = Some(model.get_weights());
            }
        }
        CallbackAction::Continue
    }

    fn on_train_end(&mut self, model: &mut Sequential) -> Result<()> {
        let weights = self.best_weights.take().unwrap_or_else(|| model.get_weights());
        model.save_snapshot(&self.path, weights)?;
        debug!(
            path = %self.path.display(),
            epoch = ?self.best_epoch.map(|e| e + 1),
            monitor = %self.monitor.name,
            "Saved best checkpoint"
        );
        Ok(())
    }
}
