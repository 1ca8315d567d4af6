//! Oracles decide which configuration the tuner trains next

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info};

use super::gaussian_process::GpSampler;
use super::hyperband::HyperbandOracle;
use super::samplers::{RandomSampler, Sampler};
use super::search_space::{trial_key, SearchSpace, TrialParams};
use super::trial::{TrialRecord, TrialSpec};
use crate::config::{Objective, OptimizeDirection, TunerConfig};
use crate::error::Result;

/// Search strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TunerKind {
    Hyperband,
    Random,
    Bayesian,
}

impl TunerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TunerKind::Hyperband => "hyperband",
            TunerKind::Random => "random",
            TunerKind::Bayesian => "bayesian",
        }
    }

    /// Human-readable name of the search strategy
    pub fn label(&self) -> &'static str {
        match self {
            TunerKind::Hyperband => "hyperband",
            TunerKind::Random => "random search",
            TunerKind::Bayesian => "bayesian optimization",
        }
    }
}

impl fmt::Display for TunerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Proposes trials from the history of finished ones
///
/// Implementations derive everything from `trials`, so an oracle rebuilt
/// from a saved history continues where the previous run stopped.
pub trait Oracle: Send {
    fn kind(&self) -> TunerKind;

    /// Next trial to run, or `None` once the search is over
    fn next_trial(&mut self, space: &SearchSpace, trials: &[TrialRecord]) -> Result<Option<TrialSpec>>;
}

/// Keys of every configuration tried so far, failed ones included
pub(crate) fn tried_keys(trials: &[TrialRecord]) -> HashSet<String> {
    trials.iter().map(|t| trial_key(&t.params)).collect()
}

/// Completed configurations with scores oriented so larger is better
fn oriented_history(trials: &[TrialRecord], objective: &Objective) -> Vec<(TrialParams, f64)> {
    trials
        .iter()
        .filter(|t| t.is_completed())
        .filter_map(|t| {
            let score = t.score?;
            let oriented = match objective.direction {
                OptimizeDirection::Maximize => score,
                OptimizeDirection::Minimize => -score,
            };
            Some((t.params.clone(), oriented))
        })
        .collect()
}

/// Per-call seed so proposals depend only on the seed and the history length
pub(crate) fn call_seed(seed: u64, n_trials: usize) -> u64 {
    seed.wrapping_add(n_trials as u64)
}

/// Uniform random search over untried configurations
#[derive(Debug, Clone)]
pub struct RandomSearchOracle {
    max_trials: usize,
    max_collisions: usize,
    epochs: usize,
    seed: u64,
}

impl RandomSearchOracle {
    pub fn new(config: &TunerConfig, epochs: usize) -> Self {
        Self {
            max_trials: config.max_trials,
            max_collisions: config.max_collisions,
            epochs,
            seed: config.seed,
        }
    }
}

impl Oracle for RandomSearchOracle {
    fn kind(&self) -> TunerKind {
        TunerKind::Random
    }

    fn next_trial(&mut self, space: &SearchSpace, trials: &[TrialRecord]) -> Result<Option<TrialSpec>> {
        if trials.len() >= self.max_trials {
            return Ok(None);
        }
        let mut sampler =
            RandomSampler::new(Some(call_seed(self.seed, trials.len()))).with_max_collisions(self.max_collisions);
        match sampler.sample(space, &[], &tried_keys(trials))? {
            Some(params) => Ok(Some(TrialSpec::new(params, self.epochs))),
            None => {
                info!(tried = trials.len(), "Search space exhausted, stopping random search");
                Ok(None)
            }
        }
    }
}

/// Gaussian-process Bayesian optimization
///
/// The first `num_initial_points` trials are random; after that the GP is
/// refit on every completed trial and the best UCB candidate is proposed.
#[derive(Debug, Clone)]
pub struct BayesianOracle {
    objective: Objective,
    max_trials: usize,
    num_initial_points: usize,
    alpha: f64,
    beta: f64,
    num_candidates: usize,
    max_collisions: usize,
    epochs: usize,
    seed: u64,
}

impl BayesianOracle {
    pub fn new(config: &TunerConfig, epochs: usize) -> Self {
        Self {
            objective: config.objective.clone(),
            max_trials: config.max_trials,
            num_initial_points: config.num_initial_points,
            alpha: config.alpha,
            beta: config.beta,
            num_candidates: config.num_candidates,
            max_collisions: config.max_collisions,
            epochs,
            seed: config.seed,
        }
    }
}

impl Oracle for BayesianOracle {
    fn kind(&self) -> TunerKind {
        TunerKind::Bayesian
    }

    fn next_trial(&mut self, space: &SearchSpace, trials: &[TrialRecord]) -> Result<Option<TrialSpec>> {
        if trials.len() >= self.max_trials {
            return Ok(None);
        }
        let seed = call_seed(self.seed, trials.len());
        let exclude = tried_keys(trials);
        let history = oriented_history(trials, &self.objective);

        let proposal = if history.len() < self.num_initial_points.max(1) {
            debug!(completed = history.len(), "Random initial point");
            RandomSampler::new(Some(seed))
                .with_max_collisions(self.max_collisions)
                .sample(space, &history, &exclude)?
        } else {
            GpSampler::new(Some(seed))
                .with_noise(self.alpha)
                .with_beta(self.beta)
                .with_n_candidates(self.num_candidates)
                .sample(space, &history, &exclude)?
        };

        match proposal {
            Some(params) => Ok(Some(TrialSpec::new(params, self.epochs))),
            None => {
                info!(tried = trials.len(), "No untried candidates left, stopping bayesian search");
                Ok(None)
            }
        }
    }
}

/// Create an oracle of the given kind
pub fn create_oracle(kind: TunerKind, config: &TunerConfig, max_epochs: usize) -> Box<dyn Oracle> {
    match kind {
        TunerKind::Hyperband => Box::new(HyperbandOracle::new(config, max_epochs)),
        TunerKind::Random => Box::new(RandomSearchOracle::new(config, max_epochs)),
        TunerKind::Bayesian => Box::new(BayesianOracle::new(config, max_epochs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::search_space::param_int;
    use crate::optimizer::trial::record;

    fn space() -> SearchSpace {
        SearchSpace::new().int("a", 0, 4, 1).int("b", 0, 4, 1)
    }

    /// Drive an oracle to completion with a synthetic score
    fn drive(oracle: &mut dyn Oracle, space: &SearchSpace, score: impl Fn(&TrialParams) -> f64) -> Vec<TrialRecord> {
        let mut trials = Vec::new();
        while let Some(spec) = oracle.next_trial(space, &trials).unwrap() {
            let s = score(&spec.params);
            trials.push(record(trials.len(), spec.params, Some(s)));
            assert!(trials.len() <= 100, "oracle did not stop");
        }
        trials
    }

    fn distinct(trials: &[TrialRecord]) -> usize {
        tried_keys(trials).len()
    }

    #[test]
    fn test_random_stops_at_max_trials_without_repeats() {
        let config = TunerConfig::default().with_max_trials(10);
        let mut oracle = RandomSearchOracle::new(&config, 3);
        let trials = drive(&mut oracle, &space(), |_| 0.0);
        assert_eq!(trials.len(), 10);
        assert_eq!(distinct(&trials), 10);
    }

    #[test]
    fn test_random_stops_when_space_exhausted() {
        let config = TunerConfig::default().with_max_trials(50);
        let mut oracle = RandomSearchOracle::new(&config, 1);
        let small = SearchSpace::new().boolean("flag");
        let trials = drive(&mut oracle, &small, |_| 0.0);
        assert_eq!(trials.len(), 2);
    }

    #[test]
    fn test_random_is_reproducible() {
        let config = TunerConfig::default().with_max_trials(5).with_seed(7);
        let a = drive(&mut RandomSearchOracle::new(&config, 1), &space(), |_| 0.0);
        let b = drive(&mut RandomSearchOracle::new(&config, 1), &space(), |_| 0.0);
        let keys = |t: &[TrialRecord]| t.iter().map(|r| trial_key(&r.params)).collect::<Vec<_>>();
        assert_eq!(keys(&a), keys(&b));
    }

    #[test]
    fn test_bayesian_stops_at_max_trials_without_repeats() {
        let config = TunerConfig::default().with_max_trials(12);
        let mut oracle = BayesianOracle::new(&config, 2);
        let trials = drive(&mut oracle, &space(), |p| {
            let a = param_int(p, "a").unwrap() as f64;
            let b = param_int(p, "b").unwrap() as f64;
            -((a - 3.0).powi(2) + (b - 1.0).powi(2))
        });
        assert_eq!(trials.len(), 12);
        assert_eq!(distinct(&trials), 12);
    }

    #[test]
    fn test_bayesian_beats_its_random_start() {
        let config = TunerConfig::default().with_max_trials(10);
        let mut oracle = BayesianOracle::new(&config, 1);
        let score = |p: &TrialParams| {
            let a = param_int(p, "a").unwrap() as f64;
            let b = param_int(p, "b").unwrap() as f64;
            -((a - 3.0).powi(2) + (b - 1.0).powi(2))
        };
        let trials = drive(&mut oracle, &space(), score);
        let initial = trials[..2].iter().filter_map(|t| t.score).fold(f64::NEG_INFINITY, f64::max);
        let overall = trials.iter().filter_map(|t| t.score).fold(f64::NEG_INFINITY, f64::max);
        assert!(overall >= initial);
        assert!(overall >= -2.0, "best score {}", overall);
    }

    #[test]
    fn test_bayesian_minimizing_objective() {
        let config = TunerConfig::default()
            .with_max_trials(6)
            .with_objective(Objective::minimize("val_loss"));
        let mut oracle = BayesianOracle::new(&config, 1);
        let trials = drive(&mut oracle, &space(), |p| param_int(p, "a").unwrap() as f64);
        assert_eq!(distinct(&trials), 6);
    }

    #[test]
    fn test_failed_trials_are_not_retried() {
        let config = TunerConfig::default().with_max_trials(3);
        let mut oracle = RandomSearchOracle::new(&config, 1);
        let small = SearchSpace::new().int("a", 0, 2, 1);
        let mut trials = Vec::new();
        while let Some(spec) = oracle.next_trial(&small, &trials).unwrap() {
            trials.push(record(trials.len(), spec.params, None));
        }
        assert_eq!(distinct(&trials), 3);
    }

    #[test]
    fn test_create_oracle_kinds() {
        let config = TunerConfig::default();
        for kind in [TunerKind::Hyperband, TunerKind::Random, TunerKind::Bayesian] {
            assert_eq!(create_oracle(kind, &config, 5).kind(), kind);
        }
        assert_eq!(TunerKind::Bayesian.to_string(), "bayesian");
    }
}
