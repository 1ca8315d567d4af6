//! Sequential model: layer stack, optimizer and weight checkpoints

use ndarray::{Array2, ArrayView2, ArrayViewD, Axis, Ix2, Slice};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::debug;

use super::{argmax_rows, categorical_crossentropy, Adam, Layer, Tensor};
use crate::error::{Result, TunerError};

/// Serialized model weights
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Checkpoint {
    input_shape: Vec<usize>,
    weights: Vec<Tensor>,
}

/// Linear stack of layers compiled with Adam and categorical cross-entropy
pub struct Sequential {
    layers: Vec<Box<dyn Layer>>,
    input_shape: Vec<usize>,
    output_shape: Vec<usize>,
    optimizer: Option<Adam>,
    rng: Xoshiro256PlusPlus,
}

impl Sequential {
    /// Start a model for per-sample inputs of `input_shape`
    pub fn new(input_shape: &[usize], seed: u64) -> Self {
        Self {
            layers: Vec::new(),
            input_shape: input_shape.to_vec(),
            output_shape: input_shape.to_vec(),
            optimizer: None,
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
        }
    }

    /// Append a layer, building its weights against the current output shape
    pub fn add(&mut self, mut layer: impl Layer + 'static) -> Result<&mut Self> {
        self.output_shape = layer.build(&self.output_shape, &mut self.rng)?;
        self.layers.push(Box::new(layer));
        Ok(self)
    }

    pub fn compile(&mut self, optimizer: Adam) {
        self.optimizer = Some(optimizer);
    }

    pub fn optimizer(&self) -> Option<&Adam> {
        self.optimizer.as_ref()
    }

    pub fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    pub fn output_shape(&self) -> &[usize] {
        &self.output_shape
    }

    pub fn layers(&self) -> impl Iterator<Item = &dyn Layer> {
        self.layers.iter().map(|l| l.as_ref())
    }

    pub fn count_params(&self) -> usize {
        self.layers.iter().map(|l| l.param_count()).sum()
    }

    /// Human-readable layer table
    pub fn summary(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("{:<14} {:>12}\n", "Layer", "Params"));
        for layer in &self.layers {
            out.push_str(&format!("{:<14} {:>12}\n", layer.name(), layer.param_count()));
        }
        out.push_str(&format!("{:<14} {:>12}\n", "Total", self.count_params()));
        out
    }

    fn check_input(&self, x: &ArrayViewD<f32>) -> Result<()> {
        if x.ndim() != self.input_shape.len() + 1 || &x.shape()[1..] != self.input_shape.as_slice() {
            return Err(TunerError::ShapeError {
                expected: format!("(N, {:?})", self.input_shape),
                actual: format!("{:?}", x.shape()),
            });
        }
        Ok(())
    }

    /// Forward pass over one batch
    pub fn forward(&mut self, x: &Tensor, training: bool) -> Result<Tensor> {
        self.check_input(&x.view())?;
        let mut out = x.clone();
        for layer in &mut self.layers {
            out = layer.forward(&out, training)?;
        }
        Ok(out)
    }

    fn backward(&mut self, grad: Tensor) -> Result<()> {
        let mut grad = grad;
        for layer in self.layers.iter_mut().rev() {
            grad = layer.backward(&grad)?;
        }
        Ok(())
    }

    /// One optimizer step; returns (loss, accuracy) on the batch
    pub fn train_on_batch(&mut self, x: &Tensor, y: &Array2<f32>) -> Result<(f32, f32)> {
        if self.optimizer.is_none() {
            return Err(TunerError::ModelNotCompiled);
        }

        let probs = self.forward(x, true)?.into_dimensionality::<Ix2>()?;
        let (loss, grad) = categorical_crossentropy(&probs, y)?;
        let accuracy = batch_accuracy(&probs, &y.view());
        if !loss.is_finite() {
            return Err(TunerError::TrainingError(format!("loss diverged to {}", loss)));
        }

        self.backward(grad.into_dyn())?;

        let params: Vec<(&mut Tensor, &Tensor)> = self
            .layers
            .iter_mut()
            .flat_map(|layer| layer.params_and_grads())
            .collect();
        if let Some(optimizer) = self.optimizer.as_mut() {
            optimizer.step(params);
        }
        Ok((loss, accuracy))
    }

    /// Class probabilities for every sample, computed in batches
    pub fn predict(&mut self, x: ArrayViewD<f32>, batch_size: usize) -> Result<Array2<f32>> {
        self.check_input(&x)?;
        let n = x.shape()[0];
        let n_out: usize = self.output_shape.iter().product();
        let mut out = Array2::zeros((n, n_out));

        for start in (0..n).step_by(batch_size.max(1)) {
            let end = (start + batch_size).min(n);
            let batch = x.slice_axis(Axis(0), Slice::from(start..end)).to_owned();
            let probs = self.forward(&batch, false)?.into_dimensionality::<Ix2>()?;
            out.slice_axis_mut(Axis(0), Slice::from(start..end)).assign(&probs);
        }
        Ok(out)
    }

    /// Inference-mode loss and accuracy, weighted by batch size
    pub fn evaluate(&mut self, x: ArrayViewD<f32>, y: ArrayView2<f32>, batch_size: usize) -> Result<(f64, f64)> {
        let n = x.shape()[0];
        if n != y.nrows() {
            return Err(TunerError::ShapeError {
                expected: format!("{} target rows", n),
                actual: y.nrows().to_string(),
            });
        }
        if n == 0 {
            return Ok((f64::NAN, f64::NAN));
        }

        let mut total_loss = 0.0f64;
        let mut total_acc = 0.0f64;
        for start in (0..n).step_by(batch_size.max(1)) {
            let end = (start + batch_size).min(n);
            let batch = x.slice_axis(Axis(0), Slice::from(start..end)).to_owned();
            let targets = y.slice_axis(Axis(0), Slice::from(start..end)).to_owned();
            let probs = self.forward(&batch, false)?.into_dimensionality::<Ix2>()?;
            let (loss, _) = categorical_crossentropy(&probs, &targets)?;
            let weight = (end - start) as f64;
            total_loss += loss as f64 * weight;
            total_acc += batch_accuracy(&probs, &targets.view()) as f64 * weight;
        }
        Ok((total_loss / n as f64, total_acc / n as f64))
    }

    /// Snapshot of every layer's state
    pub fn get_weights(&self) -> Vec<Tensor> {
        self.layers.iter().flat_map(|l| l.weights()).collect()
    }

    pub fn set_weights(&mut self, weights: &[Tensor]) -> Result<()> {
        let expected: usize = self.layers.iter().map(|l| l.n_weights()).sum();
        if weights.len() != expected {
            return Err(TunerError::ShapeError {
                expected: format!("{} weight tensors", expected),
                actual: weights.len().to_string(),
            });
        }
        let mut offset = 0;
        for layer in &mut self.layers {
            let n = layer.n_weights();
            layer.set_weights(&weights[offset..offset + n])?;
            offset += n;
        }
        Ok(())
    }

    pub fn save_weights(&self, path: &Path) -> Result<()> {
        self.save_snapshot(path, self.get_weights())
    }

    /// Write a [`get_weights`](Self::get_weights) snapshot of this model as a checkpoint
    pub fn save_snapshot(&self, path: &Path, weights: Vec<Tensor>) -> Result<()> {
        let expected: usize = self.layers.iter().map(|l| l.n_weights()).sum();
        if weights.len() != expected {
            return Err(TunerError::ShapeError {
                expected: format!("{} weight tensors", expected),
                actual: weights.len().to_string(),
            });
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let checkpoint = Checkpoint {
            input_shape: self.input_shape.clone(),
            weights,
        };
        let writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(writer, &checkpoint)?;
        debug!(path = %path.display(), "Saved weights");
        Ok(())
    }

    pub fn load_weights(&mut self, path: &Path) -> Result<()> {
        let reader = BufReader::new(File::open(path)?);
        let checkpoint: Checkpoint = bincode::deserialize_from(reader)?;
        if checkpoint.input_shape != self.input_shape {
            return Err(TunerError::ShapeError {
                expected: format!("checkpoint for input {:?}", self.input_shape),
                actual: format!("{:?}", checkpoint.input_shape),
            });
        }
        self.set_weights(&checkpoint.weights)?;
        debug!(path = %path.display(), "Loaded weights");
        Ok(())
    }
}

/// Fraction of rows whose predicted class matches the one-hot target
pub fn batch_accuracy(probs: &Array2<f32>, targets: &ArrayView2<f32>) -> f32 {
    let n = probs.nrows();
    if n == 0 {
        return 0.0;
    }
    let predicted = argmax_rows(probs);
    let actual = argmax_rows(&targets.to_owned());
    let correct = predicted.iter().zip(&actual).filter(|(p, a)| p == a).count();
    correct as f32 / n as f32
}
