//! Minimal convolutional network stack
//!
//! Just the pieces the Fashion-MNIST classifier needs: 3x3 same-padded
//! convolutions, ReLU, batch normalization, 2x2 max pooling, dense layers,
//! dropout and softmax, trained with categorical cross-entropy and Adam.
//!
//! Tensors are `f32` and channels-last: images are (N, H, W, C), dense
//! activations are (N, F).

pub mod layers;
pub mod loss;
pub mod model;
pub mod optim;

use ndarray::{Array2, ArrayD};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::error::Result;

pub use layers::{BatchNorm, Conv2D, Dense, Dropout, Flatten, MaxPool2D, ReLU, Softmax};
pub use loss::categorical_crossentropy;
pub use model::Sequential;
pub use optim::Adam;

/// Dynamic-rank activation tensor
pub type Tensor = ArrayD<f32>;

/// A differentiable layer
///
/// `forward` caches whatever `backward` needs, so calls must alternate
/// forward/backward for one batch at a time.
pub trait Layer: Send + Sync {
    /// Short layer name for summaries
    fn name(&self) -> &'static str;

    /// Allocate weights for a per-sample input shape and return the
    /// per-sample output shape
    fn build(&mut self, input_shape: &[usize], rng: &mut Xoshiro256PlusPlus) -> Result<Vec<usize>>;

    fn forward(&mut self, input: &Tensor, training: bool) -> Result<Tensor>;

    /// Propagate the loss gradient, storing parameter gradients
    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor>;

    /// Trainable parameters paired with their latest gradients
    fn params_and_grads(&mut self) -> Vec<(&mut Tensor, &Tensor)> {
        Vec::new()
    }

    /// Full layer state, including non-trainable statistics
    fn weights(&self) -> Vec<Tensor> {
        Vec::new()
    }

    fn set_weights(&mut self, weights: &[Tensor]) -> Result<()> {
        expect_weight_count(self.name(), weights, 0)
    }

    /// Number of tensors `weights` returns
    fn n_weights(&self) -> usize {
        0
    }

    fn param_count(&self) -> usize {
        self.weights().iter().map(|w| w.len()).sum()
    }
}

pub(crate) fn expect_weight_count(layer: &str, weights: &[Tensor], n: usize) -> Result<()> {
    if weights.len() != n {
        return Err(crate::error::TunerError::ShapeError {
            expected: format!("{} weight tensors for {}", n, layer),
            actual: weights.len().to_string(),
        });
    }
    Ok(())
}

pub(crate) fn assign_weight(layer: &str, target: &mut Tensor, source: &Tensor) -> Result<()> {
    if target.shape() != source.shape() {
        return Err(crate::error::TunerError::ShapeError {
            expected: format!("{:?} for {}", target.shape(), layer),
            actual: format!("{:?}", source.shape()),
        });
    }
    target.assign(source);
    Ok(())
}

/// Copy any tensor into a standard-layout (rows, cols) matrix
pub(crate) fn to_matrix(t: &Tensor, rows: usize, cols: usize) -> Result<Array2<f32>> {
    Ok(t.as_standard_layout().into_owned().into_shape((rows, cols))?)
}

/// Index of the largest value in each row
pub fn argmax_rows(x: &Array2<f32>) -> Vec<usize> {
    x.rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |(bi, bv), (i, &v)| if v > bv { (i, v) } else { (bi, bv) })
                .0
        })
        .collect()
}
