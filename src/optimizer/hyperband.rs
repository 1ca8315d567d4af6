//! Hyperband: successive halving over brackets of decreasing aggressiveness
//!
//! Bracket `b` starts `size(b, 0)` random configurations on a small epoch
//! budget; each following round keeps the best `size(b, r)` of the previous
//! round and trains them further, resuming from their checkpoints, until the
//! last round reaches `max_epochs`. Brackets run from the most aggressive
//! (`num_brackets - 1`) down to 0, and the whole sweep repeats
//! `hyperband_iterations` times.

use std::collections::HashSet;
use tracing::{debug, warn};

use super::oracle::{call_seed, Oracle, TunerKind};
use super::samplers::{RandomSampler, Sampler};
use super::search_space::{trial_key, SearchSpace};
use super::trial::{BracketTag, TrialRecord, TrialSpec};
use crate::config::{Objective, TunerConfig};
use crate::error::Result;

/// Ceiling that ignores floating-point noise just above an integer
fn ceil_tol(x: f64) -> usize {
    (x - 1e-9).ceil().max(0.0) as usize
}

/// One round of the schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundPlan {
    pub tag: BracketTag,
    /// Trials in the round
    pub size: usize,
    /// Epoch budget each trial trains up to
    pub epochs: usize,
}

#[derive(Debug, Clone)]
pub struct HyperbandOracle {
    objective: Objective,
    max_epochs: usize,
    factor: usize,
    min_epochs: usize,
    iterations: usize,
    max_collisions: usize,
    seed: u64,
}

impl HyperbandOracle {
    pub fn new(config: &TunerConfig, max_epochs: usize) -> Self {
        Self {
            objective: config.objective.clone(),
            max_epochs: max_epochs.max(1),
            factor: config.factor.max(2),
            min_epochs: config.min_epochs.max(1),
            iterations: config.hyperband_iterations.max(1),
            max_collisions: config.max_collisions,
            seed: config.seed,
        }
    }

    /// How many times `max_epochs` can be divided by `factor` while staying
    /// at or above `min_epochs`
    pub fn num_brackets(&self) -> usize {
        let mut epochs = self.max_epochs as f64;
        let mut brackets = 0;
        while epochs >= self.min_epochs as f64 {
            epochs /= self.factor as f64;
            brackets += 1;
        }
        brackets.max(1)
    }

    /// Number of trials in round `round` of bracket `bracket`
    pub fn bracket_size(&self, bracket: usize, round: usize) -> usize {
        let f = self.factor as f64;
        let bracket0_end_size = ceil_tol(1.0 + (self.max_epochs as f64).ln() / f.ln()) as f64;
        let bracket_end_size = bracket0_end_size / (bracket + 1) as f64;
        ceil_tol(bracket_end_size * f.powi((bracket - round) as i32))
    }

    /// Epoch budget of round `round` in bracket `bracket`
    pub fn round_epochs(&self, bracket: usize, round: usize) -> usize {
        let f = self.factor as f64;
        ceil_tol(self.max_epochs as f64 / f.powi((bracket - round) as i32)).max(1)
    }

    /// Full schedule in execution order
    pub fn schedule(&self) -> Vec<RoundPlan> {
        let n = self.num_brackets();
        let mut plan = Vec::new();
        for iteration in 0..self.iterations {
            for bracket in (0..n).rev() {
                for round in 0..=bracket {
                    plan.push(RoundPlan {
                        tag: BracketTag {
                            iteration,
                            bracket,
                            round,
                        },
                        size: self.bracket_size(bracket, round),
                        epochs: self.round_epochs(bracket, round),
                    });
                }
            }
        }
        plan
    }

    /// Fresh configuration for round 0, unique within its bracket when possible
    fn new_trial(&self, space: &SearchSpace, trials: &[TrialRecord], plan: &RoundPlan) -> Result<TrialSpec> {
        let in_bracket: HashSet<String> = trials
            .iter()
            .filter(|t| {
                t.bracket
                    .map_or(false, |b| b.iteration == plan.tag.iteration && b.bracket == plan.tag.bracket)
            })
            .map(|t| trial_key(&t.params))
            .collect();

        let mut sampler =
            RandomSampler::new(Some(call_seed(self.seed, trials.len()))).with_max_collisions(self.max_collisions);
        let params = match sampler.sample(space, &[], &in_bracket)? {
            Some(params) => params,
            None => {
                warn!(bracket = plan.tag.bracket, "Search space exhausted within bracket, repeating a configuration");
                sampler.sample(space, &[], &HashSet::new())?.unwrap_or_default()
            }
        };

        Ok(TrialSpec {
            params,
            epochs: plan.epochs,
            initial_epoch: 0,
            parent: None,
            bracket: Some(plan.tag),
        })
    }

    /// Best not-yet-promoted trial among the top `plan.size` of the previous round
    fn promotion(&self, trials: &[TrialRecord], plan: &RoundPlan, in_round: &[&TrialRecord]) -> Option<TrialSpec> {
        let previous = BracketTag {
            round: plan.tag.round - 1,
            ..plan.tag
        };
        let mut ranked: Vec<&TrialRecord> = trials
            .iter()
            .filter(|t| t.bracket == Some(previous) && t.is_completed())
            .collect();
        ranked.sort_by(|a, b| {
            let (sa, sb) = (a.score.unwrap_or(f64::NAN), b.score.unwrap_or(f64::NAN));
            if self.objective.is_better(sa, sb) {
                std::cmp::Ordering::Less
            } else if self.objective.is_better(sb, sa) {
                std::cmp::Ordering::Greater
            } else {
                a.id.cmp(&b.id)
            }
        });

        let promoted: HashSet<usize> = in_round.iter().filter_map(|t| t.parent).collect();
        let parent = ranked
            .into_iter()
            .take(plan.size)
            .find(|t| !promoted.contains(&t.id))?;

        Some(TrialSpec {
            params: parent.params.clone(),
            epochs: plan.epochs,
            initial_epoch: parent.epochs,
            parent: Some(parent.id),
            bracket: Some(plan.tag),
        })
    }
}

impl Oracle for HyperbandOracle {
    fn kind(&self) -> TunerKind {
        TunerKind::Hyperband
    }

    fn next_trial(&mut self, space: &SearchSpace, trials: &[TrialRecord]) -> Result<Option<TrialSpec>> {
        for plan in self.schedule() {
            let in_round: Vec<&TrialRecord> = trials.iter().filter(|t| t.bracket == Some(plan.tag)).collect();
            if in_round.len() >= plan.size {
                continue;
            }

            if plan.tag.round == 0 {
                return self.new_trial(space, trials, &plan).map(Some);
            }
            match self.promotion(trials, &plan, &in_round) {
                Some(spec) => {
                    debug!(
                        parent = spec.parent,
                        bracket = plan.tag.bracket,
                        round = plan.tag.round,
                        epochs = spec.epochs,
                        "Promoting trial"
                    );
                    return Ok(Some(spec));
                }
                // Previous round ran short of completed trials
                None => continue,
            }
        }
        Ok(None)
    }
}
