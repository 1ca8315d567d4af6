//! Integration test: the three tuners driven through the public API

use fashion_tuner::config::{Objective, TunerConfig};
use fashion_tuner::optimizer::{
    param_float, param_int, trial_key, HyperModel, SearchSpace, TrialBudget, TrialOutcome, TrialParams, TrialStatus,
    Tuner, TunerKind, STATE_FILE,
};
use fashion_tuner::Result;
use std::collections::{BTreeMap, HashSet};

/// Pretends to train: accuracy rises with epochs and peaks at x = 60, lr = 0.01
struct Surrogate {
    budgets: Vec<TrialBudget>,
}

impl Surrogate {
    fn new() -> Self {
        Self { budgets: Vec::new() }
    }
}

impl HyperModel for Surrogate {
    fn run_trial(&mut self, params: &TrialParams, budget: &TrialBudget) -> Result<TrialOutcome> {
        self.budgets.push(budget.clone());
        let x = param_int(params, "x")? as f64;
        let lr = param_float(params, "lr")?;
        let peak = 0.9 - ((x - 60.0) / 100.0).powi(2) - (lr.log10() + 2.0).powi(2) * 0.05;

        let mut acc = Vec::new();
        let mut loss = Vec::new();
        for epoch in budget.initial_epoch..budget.epochs {
            let a = peak * (1.0 - 0.5f64.powi(epoch as i32 + 1));
            acc.push(a);
            loss.push(1.0 - a);
        }
        let mut metrics = BTreeMap::new();
        metrics.insert("val_accuracy".to_string(), acc);
        metrics.insert("val_loss".to_string(), loss);
        Ok(TrialOutcome { metrics })
    }
}

fn space() -> SearchSpace {
    SearchSpace::new().int("x", 0, 99, 1).choice("lr", vec![1e-1, 1e-2, 1e-3])
}

#[test]
fn test_random_search_runs_ten_distinct_trials() {
    let dir = tempfile::tempdir().unwrap();
    let config = TunerConfig::default();
    let mut tuner = Tuner::new(TunerKind::Random, Surrogate::new(), space(), &config, 5, dir.path(), "random").unwrap();
    tuner.search().unwrap();

    assert_eq!(tuner.trials().len(), 10);
    let keys: HashSet<String> = tuner.trials().iter().map(|t| trial_key(&t.params)).collect();
    assert_eq!(keys.len(), 10);
    assert!(tuner.hypermodel().budgets.iter().all(|b| b.epochs == 5 && b.initial_epoch == 0));
    assert!(dir.path().join("random").join(STATE_FILE).is_file());
}

#[test]
fn test_bayesian_finds_a_good_region() {
    let dir = tempfile::tempdir().unwrap();
    let config = TunerConfig::default().with_max_trials(15);
    let mut tuner =
        Tuner::new(TunerKind::Bayesian, Surrogate::new(), space(), &config, 3, dir.path(), "bayesian").unwrap();
    tuner.search().unwrap();

    assert_eq!(tuner.trials().len(), 15);
    let best = tuner.best_trials(1)[0];
    let first_two = tuner.trials()[..2].iter().filter_map(|t| t.score).fold(f64::MIN, f64::max);
    assert!(best.score.unwrap() >= first_two);
}

#[test]
fn test_hyperband_full_schedule() {
    let dir = tempfile::tempdir().unwrap();
    let config = TunerConfig::default();
    let mut tuner =
        Tuner::new(TunerKind::Hyperband, Surrogate::new(), space(), &config, 50, dir.path(), "hyperband").unwrap();
    tuner.search().unwrap();

    let trials = tuner.trials();
    assert_eq!(trials.len(), 90);
    assert!(trials.iter().all(|t| t.status == TrialStatus::Completed));

    let mut epochs: Vec<usize> = trials.iter().map(|t| t.epochs).collect();
    epochs.dedup();
    assert_eq!(epochs[..4], [2, 6, 17, 50]);

    for t in trials.iter().filter(|t| t.parent.is_some()) {
        let parent = &trials[t.parent.unwrap()];
        assert_eq!(t.initial_epoch, parent.epochs);
        assert_eq!(t.params, parent.params);
        let (tb, pb) = (t.bracket.unwrap(), parent.bracket.unwrap());
        assert_eq!((tb.bracket, tb.round), (pb.bracket, pb.round + 1));
    }
    assert!(trials.iter().any(|t| t.epochs == 50 && t.parent.is_some()));
}

#[test]
fn test_search_resumes_after_interruption() {
    let dir = tempfile::tempdir().unwrap();
    let short = TunerConfig::default().with_max_trials(4);
    let mut first = Tuner::new(TunerKind::Random, Surrogate::new(), space(), &short, 2, dir.path(), "r").unwrap();
    first.search().unwrap();

    let full = TunerConfig::default().with_max_trials(7);
    let mut resumed = Tuner::new(TunerKind::Random, Surrogate::new(), space(), &full, 2, dir.path(), "r").unwrap();
    assert_eq!(resumed.trials().len(), 4);
    resumed.search().unwrap();
    assert_eq!(resumed.trials().len(), 7);
    assert_eq!(resumed.hypermodel().budgets.len(), 3);
    assert_eq!(resumed.hypermodel().budgets[0].trial_id, 4);
}

#[test]
fn test_minimizing_objective_ranks_lowest_first() {
    let dir = tempfile::tempdir().unwrap();
    let config = TunerConfig::default()
        .with_max_trials(6)
        .with_objective(Objective::minimize("val_loss"));
    let mut tuner = Tuner::new(TunerKind::Random, Surrogate::new(), space(), &config, 2, dir.path(), "min").unwrap();
    tuner.search().unwrap();

    let best = tuner.best_trials(6);
    assert!(best.windows(2).all(|w| w[0].score <= w[1].score));
    assert_eq!(tuner.get_best_hyperparameters(1)[0], best[0].params);
}
