//! Tuner: runs the trials an oracle proposes and keeps the results on disk

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::oracle::{create_oracle, Oracle, TunerKind};
use super::search_space::{SearchSpace, TrialParams};
use super::trial::{TrialRecord, TrialSpec, TrialStatus};
use crate::config::{Objective, OptimizeDirection, TunerConfig};
use crate::error::{Result, TunerError};
use crate::training::History;

/// File holding the tuner state inside the project directory
pub const STATE_FILE: &str = "oracle.json";

/// Resources granted to one trial
#[derive(Debug, Clone, PartialEq)]
pub struct TrialBudget {
    pub trial_id: usize,
    /// Train until this epoch
    pub epochs: usize,
    /// Epoch to resume from; 0 for a fresh model
    pub initial_epoch: usize,
    /// Checkpoint to load before training, for continued trials
    pub restore_from: Option<PathBuf>,
    /// Where the trained weights go
    pub checkpoint_path: PathBuf,
}

/// Per-epoch metrics reported by a trial
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrialOutcome {
    pub metrics: BTreeMap<String, Vec<f64>>,
}

impl From<&History> for TrialOutcome {
    fn from(history: &History) -> Self {
        Self {
            metrics: history.to_metrics(),
        }
    }
}

/// Builds and trains a model for one configuration
pub trait HyperModel {
    fn run_trial(&mut self, params: &TrialParams, budget: &TrialBudget) -> Result<TrialOutcome>;
}

#[derive(Debug, Serialize, Deserialize)]
struct TunerState {
    tuner: TunerKind,
    objective: Objective,
    space: SearchSpace,
    trials: Vec<TrialRecord>,
    updated_at: DateTime<Utc>,
}

/// Hyperparameter search driver
pub struct Tuner<H: HyperModel> {
    kind: TunerKind,
    oracle: Box<dyn Oracle>,
    hypermodel: H,
    space: SearchSpace,
    objective: Objective,
    directory: PathBuf,
    trials: Vec<TrialRecord>,
}

impl<H: HyperModel> Tuner<H> {
    /// Create a tuner whose results live in `directory/project_name`
    ///
    /// An existing state file there is reloaded so the search resumes, unless
    /// `config.overwrite` is set, in which case the project is cleared.
    pub fn new(
        kind: TunerKind,
        hypermodel: H,
        space: SearchSpace,
        config: &TunerConfig,
        max_epochs: usize,
        directory: impl AsRef<Path>,
        project_name: &str,
    ) -> Result<Self> {
        config.validate()?;
        space.validate()?;
        let directory = directory.as_ref().join(project_name);

        if config.overwrite && directory.exists() {
            info!(directory = %directory.display(), "Overwriting previous results");
            std::fs::remove_dir_all(&directory)?;
        }

        let mut tuner = Self {
            kind,
            oracle: create_oracle(kind, config, max_epochs),
            hypermodel,
            space,
            objective: config.objective.clone(),
            directory,
            trials: Vec::new(),
        };
        tuner.reload()?;
        Ok(tuner)
    }

    fn state_path(&self) -> PathBuf {
        self.directory.join(STATE_FILE)
    }

    /// Weights file of a trial
    pub fn checkpoint_path(&self, trial_id: usize) -> PathBuf {
        self.directory
            .join(format!("trial_{:04}", trial_id))
            .join("checkpoint.bin")
    }

    fn reload(&mut self) -> Result<()> {
        let path = self.state_path();
        if !path.exists() {
            return Ok(());
        }
        let json = std::fs::read_to_string(&path)?;
        let state: TunerState = serde_json::from_str(&json)?;

        if state.tuner != self.kind || state.space != self.space || state.objective != self.objective {
            return Err(TunerError::ConfigError(format!(
                "{} was written by a different {} search; pass --overwrite to start over",
                path.display(),
                state.tuner
            )));
        }
        info!(
            trials = state.trials.len(),
            path = %path.display(),
            "Reloaded tuner state"
        );
        self.trials = state.trials;
        Ok(())
    }

    fn save(&self) -> Result<()> {
        std::fs::create_dir_all(&self.directory)?;
        let state = TunerState {
            tuner: self.kind,
            objective: self.objective.clone(),
            space: self.space.clone(),
            trials: self.trials.clone(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&state)?;
        let tmp = self.directory.join(format!("{}.tmp", STATE_FILE));
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, self.state_path())?;
        Ok(())
    }

    /// Run trials until the oracle has nothing left to propose
    ///
    /// A trial that errors is recorded as failed and the search moves on;
    /// the search itself fails only when no trial completes.
    pub fn search(&mut self) -> Result<()> {
        while let Some(spec) = self.oracle.next_trial(&self.space, &self.trials)? {
            let record = self.run_trial(spec);
            match (&record.status, record.score) {
                (TrialStatus::Completed, Some(score)) => info!(
                    "Trial {} complete [{:.1}s]: {} = {:.4}",
                    record.id + 1,
                    record.duration_secs(),
                    self.objective.name,
                    score
                ),
                _ => warn!(
                    "Trial {} failed: {}",
                    record.id + 1,
                    record.error.as_deref().unwrap_or("unknown error")
                ),
            }
            self.trials.push(record);
            self.save()?;

            if let Some(best) = self.best_trials(1).first() {
                info!("Best {} so far: {:.4}", self.objective.name, best.score.unwrap_or(f64::NAN));
            }
        }

        if !self.trials.iter().any(TrialRecord::is_completed) {
            return Err(TunerError::OptimizationError(format!(
                "none of {} trials completed",
                self.trials.len()
            )));
        }
        info!(trials = self.trials.len(), "Search finished");
        Ok(())
    }

    fn run_trial(&mut self, spec: TrialSpec) -> TrialRecord {
        let id = self.trials.len();
        let budget = TrialBudget {
            trial_id: id,
            epochs: spec.epochs,
            initial_epoch: spec.initial_epoch,
            restore_from: spec.parent.map(|p| self.checkpoint_path(p)),
            checkpoint_path: self.checkpoint_path(id),
        };
        let summary: Vec<String> = spec.params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        info!(
            "Running trial {} ({}), epochs {}..{}",
            id + 1,
            summary.join(", "),
            spec.initial_epoch,
            spec.epochs
        );

        let started_at = Utc::now();
        let outcome = self.hypermodel.run_trial(&spec.params, &budget);
        let finished_at = Utc::now();

        let (status, score, metrics, error) = match outcome {
            Ok(outcome) => {
                let score = outcome
                    .metrics
                    .get(&self.objective.name)
                    .and_then(|series| self.objective.best_of(series));
                match score {
                    Some(score) => (TrialStatus::Completed, Some(score), outcome.metrics, None),
                    None => (
                        TrialStatus::Failed,
                        None,
                        outcome.metrics,
                        Some(format!("no finite value for objective {}", self.objective.name)),
                    ),
                }
            }
            Err(e) => (TrialStatus::Failed, None, BTreeMap::new(), Some(e.to_string())),
        };

        TrialRecord {
            id,
            params: spec.params,
            status,
            score,
            metrics,
            epochs: spec.epochs,
            initial_epoch: spec.initial_epoch,
            parent: spec.parent,
            bracket: spec.bracket,
            error,
            started_at,
            finished_at,
        }
    }

    /// Completed trials, best first; ties keep the earlier trial
    pub fn best_trials(&self, n: usize) -> Vec<&TrialRecord> {
        let mut completed: Vec<&TrialRecord> = self.trials.iter().filter(|t| t.is_completed()).collect();
        completed.sort_by(|a, b| {
            let (sa, sb) = (a.score.unwrap_or(f64::NAN), b.score.unwrap_or(f64::NAN));
            let ord = sa.partial_cmp(&sb).unwrap_or(std::cmp::Ordering::Equal);
            let ord = match self.objective.direction {
                OptimizeDirection::Maximize => ord.reverse(),
                OptimizeDirection::Minimize => ord,
            };
            ord.then(a.id.cmp(&b.id))
        });
        completed.truncate(n);
        completed
    }

    /// Hyperparameters of the `n` best trials
    pub fn get_best_hyperparameters(&self, n: usize) -> Vec<TrialParams> {
        self.best_trials(n).into_iter().map(|t| t.params.clone()).collect()
    }

    /// Text summary of the `n` best trials
    pub fn results_summary(&self, n: usize) -> String {
        let best = self.best_trials(n);
        let direction = match self.objective.direction {
            OptimizeDirection::Maximize => "max",
            OptimizeDirection::Minimize => "min",
        };
        let mut out = format!(
            "Results summary\nResults in {}\nShowing {} best trials\nObjective(name=\"{}\", direction=\"{}\")\n",
            self.directory.display(),
            best.len(),
            self.objective.name,
            direction
        );
        for trial in best {
            out.push_str(&format!("\nTrial {:04} summary\nHyperparameters:\n", trial.id));
            for (name, value) in &trial.params {
                out.push_str(&format!("{}: {}\n", name, value));
            }
            out.push_str(&format!("Score: {}\n", trial.score.unwrap_or(f64::NAN)));
        }
        out
    }

    pub fn trials(&self) -> &[TrialRecord] {
        &self.trials
    }

    pub fn kind(&self) -> TunerKind {
        self.kind
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn search_space(&self) -> &SearchSpace {
        &self.space
    }

    pub fn hypermodel(&self) -> &H {
        &self.hypermodel
    }
}
