//! Gaussian Process for Bayesian Optimization
//!
//! GP regression on unit-cube encodings of configurations, with an
//! upper-confidence-bound acquisition.

use ndarray::{Array1, Array2, ArrayView1};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::collections::HashSet;

use super::search_space::{trial_key, SearchSpace, TrialParams};
use super::Sampler;
use crate::error::{Result, TunerError};

/// Matern 5/2 kernel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matern52 {
    pub length_scale: f64,
}

impl Default for Matern52 {
    fn default() -> Self {
        Self { length_scale: 1.0 }
    }
}

impl Matern52 {
    pub fn new(length_scale: f64) -> Self {
        Self { length_scale }
    }

    fn value(&self, x1: ArrayView1<f64>, x2: ArrayView1<f64>) -> f64 {
        let dist_sq: f64 = x1.iter().zip(x2.iter()).map(|(a, b)| (a - b) * (a - b)).sum();
        let sqrt5 = 5.0_f64.sqrt();
        let r = dist_sq.sqrt() / self.length_scale;
        (1.0 + sqrt5 * r + 5.0 / 3.0 * r * r) * (-sqrt5 * r).exp()
    }

    fn matrix(&self, x1: &Array2<f64>, x2: &Array2<f64>) -> Array2<f64> {
        Array2::from_shape_fn((x1.nrows(), x2.nrows()), |(i, j)| self.value(x1.row(i), x2.row(j)))
    }
}

/// Upper confidence bound `mean + beta * std`, for maximizing the objective
pub fn upper_confidence_bound(mean: f64, var: f64, beta: f64) -> f64 {
    mean + beta * var.max(0.0).sqrt()
}

/// Gaussian Process model for regression
#[derive(Debug, Clone)]
pub struct GaussianProcess {
    kernel: Matern52,
    /// Noise variance added to the kernel diagonal
    noise: f64,
    x_train: Option<Array2<f64>>,
    /// Cholesky factor of K + noise*I
    l_chol: Option<Array2<f64>>,
    /// Alpha = L^-T L^-1 y
    alpha: Option<Array1<f64>>,
    y_mean: f64,
    y_std: f64,
}

impl GaussianProcess {
    pub fn new(kernel: Matern52) -> Self {
        Self {
            kernel,
            noise: 1e-6,
            x_train: None,
            l_chol: None,
            alpha: None,
            y_mean: 0.0,
            y_std: 1.0,
        }
    }

    pub fn with_noise(mut self, noise: f64) -> Self {
        self.noise = noise.max(1e-10);
        self
    }

    pub fn is_fitted(&self) -> bool {
        self.alpha.is_some()
    }

    /// Fit on standardized targets
    pub fn fit(&mut self, x: Array2<f64>, y: Array1<f64>) -> Result<()> {
        let n = y.len();
        if n == 0 || x.nrows() != n {
            return Err(TunerError::ShapeError {
                expected: format!("{} rows of inputs", n),
                actual: x.nrows().to_string(),
            });
        }

        self.y_mean = y.mean().unwrap_or(0.0);
        self.y_std = y.std(0.0);
        if self.y_std < 1e-10 {
            self.y_std = 1.0;
        }
        let y_normalized = y.mapv(|yi| (yi - self.y_mean) / self.y_std);

        let mut k = self.kernel.matrix(&x, &x);
        for i in 0..n {
            k[[i, i]] += self.noise;
        }

        let l = cholesky(&k);
        let alpha = solve_upper_transposed(&l, &solve_lower_triangular(&l, &y_normalized));

        self.x_train = Some(x);
        self.l_chol = Some(l);
        self.alpha = Some(alpha);
        Ok(())
    }

    /// Posterior mean and variance at test points
    pub fn predict(&self, x_test: &Array2<f64>) -> Result<(Array1<f64>, Array1<f64>)> {
        let (Some(x_train), Some(l), Some(alpha)) = (&self.x_train, &self.l_chol, &self.alpha) else {
            return Err(TunerError::OptimizationError("Gaussian process is not fitted".to_string()));
        };

        let k_star = self.kernel.matrix(x_test, x_train);
        let mean = k_star.dot(alpha).mapv(|m| m * self.y_std + self.y_mean);

        let var = Array1::from_shape_fn(x_test.nrows(), |i| {
            let k_self = self.kernel.value(x_test.row(i), x_test.row(i));
            let v = solve_lower_triangular(l, &k_star.row(i).to_owned());
            (k_self - v.dot(&v)).max(1e-10) * self.y_std * self.y_std
        });

        Ok((mean, var))
    }
}

fn cholesky(a: &Array2<f64>) -> Array2<f64> {
    let n = a.nrows();
    let mut l = Array2::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[[i, k]] * l[[j, k]]).sum();
            if i == j {
                l[[j, j]] = (a[[j, j]] - sum).max(1e-10).sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }
    l
}

/// Solve L x = b for lower triangular L
fn solve_lower_triangular(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = b.len();
    let mut x = Array1::zeros(n);
    for i in 0..n {
        let sum: f64 = (0..i).map(|j| l[[i, j]] * x[j]).sum();
        x[i] = (b[i] - sum) / l[[i, i]];
    }
    x
}

/// Solve L^T x = y
fn solve_upper_transposed(l: &Array2<f64>, y: &Array1<f64>) -> Array1<f64> {
    let n = y.len();
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        let sum: f64 = ((i + 1)..n).map(|j| l[[j, i]] * x[j]).sum();
        x[i] = (y[i] - sum) / l[[i, i]];
    }
    x
}

/// Gaussian Process based Bayesian Optimization sampler
///
/// Fits the GP to the history on every call and returns the candidate with
/// the highest acquisition value. Fully discrete spaces small enough to
/// enumerate are scored exhaustively; otherwise `n_candidates` random points
/// are drawn.
#[derive(Debug)]
pub struct GpSampler {
    rng: Xoshiro256PlusPlus,
    noise: f64,
    beta: f64,
    n_candidates: usize,
}

impl GpSampler {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => Xoshiro256PlusPlus::seed_from_u64(s),
            None => Xoshiro256PlusPlus::from_entropy(),
        };
        Self {
            rng,
            noise: 1e-4,
            beta: 2.6,
            n_candidates: 500,
        }
    }

    pub fn with_noise(mut self, noise: f64) -> Self {
        self.noise = noise;
        self
    }

    /// Exploration weight of the UCB acquisition
    pub fn with_beta(mut self, beta: f64) -> Self {
        self.beta = beta;
        self
    }

    pub fn with_n_candidates(mut self, n: usize) -> Self {
        self.n_candidates = n.max(1);
        self
    }

    fn candidates(&mut self, space: &SearchSpace, exclude: &HashSet<String>) -> Result<Vec<TrialParams>> {
        let exhaustive = space.cardinality().map_or(false, |n| n <= self.n_candidates);
        let grid = if exhaustive { space.enumerate() } else { None };
        let pool = match grid {
            Some(grid) => grid,
            None => (0..self.n_candidates)
                .map(|_| {
                    let point: Vec<f64> = (0..space.len()).map(|_| self.rng.gen::<f64>()).collect();
                    space.decode(&point)
                })
                .collect::<Result<Vec<_>>>()?,
        };

        let mut seen = HashSet::new();
        Ok(pool
            .into_iter()
            .filter(|p| {
                let key = trial_key(p);
                !exclude.contains(&key) && seen.insert(key)
            })
            .collect())
    }
}

impl Sampler for GpSampler {
    fn sample(
        &mut self,
        search_space: &SearchSpace,
        history: &[(TrialParams, f64)],
        exclude: &HashSet<String>,
    ) -> Result<Option<TrialParams>> {
        let candidates = self.candidates(search_space, exclude)?;
        if candidates.is_empty() {
            return Ok(None);
        }
        if history.is_empty() {
            let idx = self.rng.gen_range(0..candidates.len());
            return Ok(candidates.into_iter().nth(idx));
        }

        let dim = search_space.len();
        let mut x_data = Vec::with_capacity(history.len() * dim);
        for (params, _) in history {
            x_data.extend(search_space.encode(params)?);
        }
        let x_train = Array2::from_shape_vec((history.len(), dim), x_data)?;
        let y_train: Array1<f64> = history.iter().map(|(_, y)| *y).collect();

        let mut gp = GaussianProcess::new(Matern52::default()).with_noise(self.noise);
        gp.fit(x_train, y_train)?;

        let mut x_cand = Vec::with_capacity(candidates.len() * dim);
        for params in &candidates {
            x_cand.extend(search_space.encode(params)?);
        }
        let x_cand = Array2::from_shape_vec((candidates.len(), dim), x_cand)?;
        let (mean, var) = gp.predict(&x_cand)?;

        let best = (0..candidates.len())
            .map(|i| (i, upper_confidence_bound(mean[i], var[i], self.beta)))
            .fold((0, f64::NEG_INFINITY), |(bi, bv), (i, v)| if v > bv { (i, v) } else { (bi, bv) })
            .0;
        Ok(candidates.into_iter().nth(best))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::search_space::ParameterValue;

    #[test]
    fn test_gp_interpolates_training_points() {
        let x = Array2::from_shape_vec((3, 1), vec![0.1, 0.5, 0.9]).unwrap();
        let y = Array1::from_vec(vec![1.0, 3.0, 2.0]);
        let mut gp = GaussianProcess::new(Matern52::default()).with_noise(1e-8);
        gp.fit(x.clone(), y.clone()).unwrap();

        let (mean, var) = gp.predict(&x).unwrap();
        for i in 0..3 {
            assert!((mean[i] - y[i]).abs() < 1e-3);
            assert!(var[i] < 1e-3);
        }
    }

    #[test]
    fn test_gp_uncertainty_grows_away_from_data() {
        let x = Array2::from_shape_vec((2, 1), vec![0.0, 0.1]).unwrap();
        let y = Array1::from_vec(vec![0.0, 1.0]);
        let mut gp = GaussianProcess::new(Matern52::new(0.2));
        gp.fit(x, y).unwrap();

        let probe = Array2::from_shape_vec((2, 1), vec![0.05, 1.0]).unwrap();
        let (_, var) = gp.predict(&probe).unwrap();
        assert!(var[1] > var[0]);
    }

    #[test]
    fn test_predict_before_fit_errors() {
        let gp = GaussianProcess::new(Matern52::default());
        assert!(!gp.is_fitted());
        assert!(gp.predict(&Array2::zeros((1, 1))).is_err());
    }

    #[test]
    fn test_upper_confidence_bound() {
        assert!((upper_confidence_bound(1.0, 0.25, 2.0) - 2.0).abs() < 1e-12);
        assert_eq!(upper_confidence_bound(0.5, -1e-12, 2.6), 0.5);
    }

    #[test]
    fn test_sampler_moves_towards_high_scores() {
        let space = SearchSpace::new().int("x", 0, 10, 1);
        let history: Vec<(TrialParams, f64)> = [0i64, 5, 10]
            .iter()
            .map(|&x| {
                let mut p = TrialParams::new();
                p.insert("x".to_string(), ParameterValue::Int(x));
                (p, -((x - 8) as f64).powi(2))
            })
            .collect();
        let exclude: HashSet<String> = history.iter().map(|(p, _)| trial_key(p)).collect();

        let mut sampler = GpSampler::new(Some(1))
            .with_beta(0.1);
        let next = sampler.sample(&space, &history, &exclude).unwrap().unwrap();
        let x = next["x"].as_int().unwrap();
        assert!((6..=9).contains(&x), "proposed x = {}", x);
    }

    #[test]
    fn test_large_grid_is_sampled_not_enumerated() {
        // two billion configurations; building the grid would not fit in memory
        let space = SearchSpace::new().int("a", 0, 1_999_999, 1).int("b", 0, 999, 1);
        let history: Vec<(TrialParams, f64)> = [(0i64, 0i64, 0.0), (1_000_000, 500, 1.0)]
            .iter()
            .map(|&(a, b, y)| {
                let mut p = TrialParams::new();
                p.insert("a".to_string(), ParameterValue::Int(a));
                p.insert("b".to_string(), ParameterValue::Int(b));
                (p, y)
            })
            .collect();

        let mut sampler = GpSampler::new(Some(4)).with_n_candidates(50);
        let next = sampler.sample(&space, &history, &HashSet::new()).unwrap();
        assert!(next.is_some_and(|p| space.parameters().iter().all(|param| param.contains(&p[&param.name]))));
    }

    #[test]
    fn test_sampler_returns_none_when_space_exhausted() {
        let space = SearchSpace::new().boolean("flag");
        let exclude: HashSet<String> = space.enumerate().unwrap().iter().map(trial_key).collect();
        let mut sampler = GpSampler::new(Some(0));
        assert!(sampler.sample(&space, &[], &exclude).unwrap().is_none());
    }
}
