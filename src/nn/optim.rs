//! Adam optimizer

use ndarray::Zip;
use serde::{Deserialize, Serialize};

use super::Tensor;

/// Adam with bias-corrected step size
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adam {
    pub learning_rate: f32,
    pub beta_1: f32,
    pub beta_2: f32,
    pub epsilon: f32,
    iterations: u64,
    #[serde(skip)]
    m: Vec<Tensor>,
    #[serde(skip)]
    v: Vec<Tensor>,
}

impl Adam {
    pub fn new(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            beta_1: 0.9,
            beta_2: 0.999,
            epsilon: 1e-7,
            iterations: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Apply one update to every (parameter, gradient) pair
    pub fn step(&mut self, params: Vec<(&mut Tensor, &Tensor)>) {
        let shapes_match = self.m.len() == params.len()
            && self.m.iter().zip(&params).all(|(m, (p, _))| m.shape() == p.shape());
        if !shapes_match {
            self.m = params.iter().map(|(p, _)| Tensor::zeros(p.raw_dim())).collect();
            self.v = self.m.clone();
            self.iterations = 0;
        }

        self.iterations += 1;
        let t = self.iterations as i32;
        let (b1, b2, eps) = (self.beta_1, self.beta_2, self.epsilon);
        let lr_t = self.learning_rate * (1.0 - b2.powi(t)).sqrt() / (1.0 - b1.powi(t));

        for ((param, grad), (m, v)) in params.into_iter().zip(self.m.iter_mut().zip(self.v.iter_mut())) {
            Zip::from(param)
                .and(m)
                .and(v)
                .and(grad)
                .for_each(|p, m, v, &g| {
                    *m = b1 * *m + (1.0 - b1) * g;
                    *v = b2 * *v + (1.0 - b2) * g * g;
                    *p -= lr_t * *m / (v.sqrt() + eps);
                });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_step_moves_by_learning_rate() {
        let mut adam = Adam::new(0.1);
        let mut p = Tensor::from_elem(vec![2], 1.0);
        let g = Tensor::from_shape_vec(vec![2], vec![0.5, -3.0]).unwrap();
        adam.step(vec![(&mut p, &g)]);

        // bias-corrected first step is lr * sign(g)
        assert!((p[[0]] - 0.9).abs() < 1e-4);
        assert!((p[[1]] - 1.1).abs() < 1e-4);
        assert_eq!(adam.iterations(), 1);
    }

    #[test]
    fn test_minimizes_quadratic() {
        let mut adam = Adam::new(0.05);
        let mut p = Tensor::from_elem(vec![1], 3.0);
        for _ in 0..500 {
            let g = p.mapv(|x| 2.0 * x);
            adam.step(vec![(&mut p, &g)]);
        }
        assert!(p[[0]].abs() < 0.05);
    }

    #[test]
    fn test_reinitializes_on_shape_change() {
        let mut adam = Adam::new(0.01);
        let mut a = Tensor::zeros(vec![3]);
        let g = Tensor::ones(vec![3]);
        adam.step(vec![(&mut a, &g)]);

        let mut b = Tensor::zeros(vec![2, 2]);
        let gb = Tensor::ones(vec![2, 2]);
        adam.step(vec![(&mut b, &gb)]);
        assert_eq!(adam.iterations(), 1);
    }
}
