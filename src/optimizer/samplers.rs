//! Sampling strategies for hyperparameter optimization

use super::search_space::{trial_key, SearchSpace, TrialParams};
use crate::error::Result;
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::collections::HashSet;

/// Trait for hyperparameter samplers
pub trait Sampler: Send {
    /// Propose a configuration not in `exclude`, or `None` when the sampler
    /// cannot find one
    ///
    /// `history` holds completed configurations with their objective values,
    /// oriented so that larger is better.
    fn sample(
        &mut self,
        search_space: &SearchSpace,
        history: &[(TrialParams, f64)],
        exclude: &HashSet<String>,
    ) -> Result<Option<TrialParams>>;
}

/// Uniform random sampler that retries on repeats
#[derive(Debug)]
pub struct RandomSampler {
    rng: Xoshiro256PlusPlus,
    max_collisions: usize,
}

impl RandomSampler {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => Xoshiro256PlusPlus::seed_from_u64(s),
            None => Xoshiro256PlusPlus::from_entropy(),
        };
        Self {
            rng,
            max_collisions: 20,
        }
    }

    /// Number of repeated draws tolerated before giving up
    pub fn with_max_collisions(mut self, n: usize) -> Self {
        self.max_collisions = n;
        self
    }
}

impl Sampler for RandomSampler {
    fn sample(
        &mut self,
        search_space: &SearchSpace,
        _history: &[(TrialParams, f64)],
        exclude: &HashSet<String>,
    ) -> Result<Option<TrialParams>> {
        for _ in 0..=self.max_collisions {
            let params = search_space.sample(&mut self.rng);
            if !exclude.contains(&trial_key(&params)) {
                return Ok(Some(params));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> SearchSpace {
        SearchSpace::new().int("a", 0, 1, 1).int("b", 0, 1, 1)
    }

    #[test]
    fn test_seeded_sampler_is_reproducible() {
        let mut s1 = RandomSampler::new(Some(42));
        let mut s2 = RandomSampler::new(Some(42));
        let none = HashSet::new();
        for _ in 0..5 {
            assert_eq!(
                s1.sample(&space(), &[], &none).unwrap(),
                s2.sample(&space(), &[], &none).unwrap()
            );
        }
    }

    #[test]
    fn test_skips_excluded_configurations() {
        let space = space();
        let mut exclude: HashSet<String> = space.enumerate().unwrap().iter().map(trial_key).collect();
        let keep = "a=1,b=0".to_string();
        exclude.remove(&keep);

        let mut sampler = RandomSampler::new(Some(0)).with_max_collisions(200);
        let params = sampler.sample(&space, &[], &exclude).unwrap().unwrap();
        assert_eq!(trial_key(&params), keep);
    }

    #[test]
    fn test_gives_up_when_exhausted() {
        let space = space();
        let exclude: HashSet<String> = space.enumerate().unwrap().iter().map(trial_key).collect();
        let mut sampler = RandomSampler::new(Some(0)).with_max_collisions(5);
        assert!(sampler.sample(&space, &[], &exclude).unwrap().is_none());
    }
}
