//! Trial records kept by the tuner

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::search_space::TrialParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    Completed,
    Failed,
}

/// Position of a trial in the Hyperband schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BracketTag {
    pub iteration: usize,
    pub bracket: usize,
    pub round: usize,
}

/// What an oracle asks the tuner to run next
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialSpec {
    pub params: TrialParams,
    /// Train until this epoch
    pub epochs: usize,
    /// Epochs already trained by `parent`
    pub initial_epoch: usize,
    /// Trial whose checkpoint this one continues from
    pub parent: Option<usize>,
    pub bracket: Option<BracketTag>,
}

impl TrialSpec {
    /// A fresh trial trained from scratch for `epochs`
    pub fn new(params: TrialParams, epochs: usize) -> Self {
        Self {
            params,
            epochs,
            initial_epoch: 0,
            parent: None,
            bracket: None,
        }
    }
}

/// A finished trial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub id: usize,
    pub params: TrialParams,
    pub status: TrialStatus,
    /// Best objective value over the trial's epochs
    pub score: Option<f64>,
    /// Per-epoch metric series
    #[serde(default)]
    pub metrics: BTreeMap<String, Vec<f64>>,
    pub epochs: usize,
    pub initial_epoch: usize,
    pub parent: Option<usize>,
    pub bracket: Option<BracketTag>,
    #[serde(default)]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TrialRecord {
    pub fn is_completed(&self) -> bool {
        self.status == TrialStatus::Completed && self.score.is_some()
    }

    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

#[cfg(test)]
pub(crate) fn record(id: usize, params: TrialParams, score: Option<f64>) -> TrialRecord {
    let now = Utc::now();
    TrialRecord {
        id,
        params,
        status: if score.is_some() {
            TrialStatus::Completed
        } else {
            TrialStatus::Failed
        },
        score,
        metrics: BTreeMap::new(),
        epochs: 1,
        initial_epoch: 0,
        parent: None,
        bracket: None,
        error: None,
        started_at: now,
        finished_at: now,
    }
}
