//! Per-epoch training history

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metric names every epoch records
pub const METRIC_NAMES: [&str; 4] = ["loss", "accuracy", "val_loss", "val_accuracy"];

/// Metrics recorded at the end of one epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochLogs {
    pub epoch: usize,
    pub loss: f64,
    pub accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
}

impl EpochLogs {
    /// Look up a metric by its history key
    pub fn get(&self, name: &str) -> Option<f64> {
        match name {
            "loss" => Some(self.loss),
            "accuracy" => Some(self.accuracy),
            "val_loss" => Some(self.val_loss),
            "val_accuracy" => Some(self.val_accuracy),
            _ => None,
        }
    }
}

/// Metric series over the epochs of a `fit` call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    /// Zero-based global epoch index of each entry
    pub epochs: Vec<usize>,
    pub loss: Vec<f64>,
    pub accuracy: Vec<f64>,
    pub val_loss: Vec<f64>,
    pub val_accuracy: Vec<f64>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, logs: &EpochLogs) {
        self.epochs.push(logs.epoch);
        self.loss.push(logs.loss);
        self.accuracy.push(logs.accuracy);
        self.val_loss.push(logs.val_loss);
        self.val_accuracy.push(logs.val_accuracy);
    }

    pub fn len(&self) -> usize {
        self.loss.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loss.is_empty()
    }

    pub fn metric(&self, name: &str) -> Option<&[f64]> {
        match name {
            "loss" => Some(&self.loss),
            "accuracy" => Some(&self.accuracy),
            "val_loss" => Some(&self.val_loss),
            "val_accuracy" => Some(&self.val_accuracy),
            _ => None,
        }
    }

    /// All series keyed by metric name
    pub fn to_metrics(&self) -> BTreeMap<String, Vec<f64>> {
        ["loss", "accuracy", "val_loss", "val_accuracy"]
            .iter()
            .filter_map(|name| self.metric(name).map(|v| (name.to_string(), v.to_vec())))
            .collect()
    }

    pub fn last(&self) -> Option<EpochLogs> {
        let i = self.len().checked_sub(1)?;
        Some(EpochLogs {
            epoch: self.epochs[i],
            loss: self.loss[i],
            accuracy: self.accuracy[i],
            val_loss: self.val_loss[i],
            val_accuracy: self.val_accuracy[i],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logs(epoch: usize, val_loss: f64) -> EpochLogs {
        EpochLogs {
            epoch,
            loss: 1.0,
            accuracy: 0.5,
            val_loss,
            val_accuracy: 0.6,
        }
    }

    #[test]
    fn test_push_and_lookup() {
        let mut history = History::new();
        assert!(history.is_empty());
        history.push(&logs(3, 0.9));
        history.push(&logs(4, 0.8));

        assert_eq!(history.len(), 2);
        assert_eq!(history.epochs, vec![3, 4]);
        assert_eq!(history.metric("val_loss"), Some(&[0.9, 0.8][..]));
        assert!(history.metric("f1").is_none());
        assert_eq!(history.last().map(|l| l.epoch), Some(4));
    }

    #[test]
    fn test_to_metrics_keys() {
        let mut history = History::new();
        history.push(&logs(0, 0.5));
        let metrics = history.to_metrics();
        let keys: Vec<&str> = metrics.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["accuracy", "loss", "val_accuracy", "val_loss"]);
    }

    #[test]
    fn test_epoch_logs_get() {
        let l = logs(0, 0.25);
        assert_eq!(l.get("val_loss"), Some(0.25));
        assert_eq!(l.get("nope"), None);
    }
}
