//! Network layers

use ndarray::{Array1, Array2, Array4, ArrayView3, Axis, Ix2, Zip};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;

use super::{assign_weight, expect_weight_count, to_matrix, Layer, Tensor};
use crate::error::{Result, TunerError};

fn glorot_uniform(shape: &[usize], fan_in: usize, fan_out: usize, rng: &mut Xoshiro256PlusPlus) -> Tensor {
    let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
    Tensor::from_shape_fn(shape, |_| rng.gen_range(-limit..limit))
}

fn expect_rank(layer: &str, t: &Tensor, rank: usize) -> Result<()> {
    if t.ndim() != rank {
        return Err(TunerError::ShapeError {
            expected: format!("rank-{} input for {}", rank, layer),
            actual: format!("{:?}", t.shape()),
        });
    }
    Ok(())
}

fn not_built(layer: &str) -> TunerError {
    TunerError::TrainingError(format!("{} used before build", layer))
}

fn no_forward(layer: &str) -> TunerError {
    TunerError::TrainingError(format!("{}: backward called without a training forward pass", layer))
}

// ─── Conv2D ────────────────────────────────────────────────────────────────────

/// 2D convolution, stride 1, "same" zero padding, via im2col
#[derive(Debug, Clone)]
pub struct Conv2D {
    filters: usize,
    kernel_size: usize,
    in_channels: usize,
    /// (k * k * in_channels, filters)
    kernel: Tensor,
    bias: Tensor,
    grad_kernel: Tensor,
    grad_bias: Tensor,
    cols: Option<Array2<f32>>,
    input_dims: (usize, usize, usize, usize),
}

impl Conv2D {
    pub fn new(filters: usize, kernel_size: usize) -> Self {
        Self {
            filters,
            kernel_size,
            in_channels: 0,
            kernel: Tensor::zeros(vec![0, 0]),
            bias: Tensor::zeros(vec![0]),
            grad_kernel: Tensor::zeros(vec![0, 0]),
            grad_bias: Tensor::zeros(vec![0]),
            cols: None,
            input_dims: (0, 0, 0, 0),
        }
    }

    pub fn filters(&self) -> usize {
        self.filters
    }

    fn patch_len(&self) -> usize {
        self.kernel_size * self.kernel_size * self.in_channels
    }
}

/// Unfold one (H, W, C) image into (H * W, k * k * C) patches
fn im2col_sample(x: ArrayView3<f32>, k: usize) -> Vec<f32> {
    let (h, w, c) = x.dim();
    let pad = (k / 2) as isize;
    let row_len = k * k * c;
    let mut out = vec![0.0f32; h * w * row_len];

    for i in 0..h {
        for j in 0..w {
            let base = (i * w + j) * row_len;
            for di in 0..k {
                let ii = i as isize + di as isize - pad;
                if ii < 0 || ii >= h as isize {
                    continue;
                }
                for dj in 0..k {
                    let jj = j as isize + dj as isize - pad;
                    if jj < 0 || jj >= w as isize {
                        continue;
                    }
                    let offset = base + (di * k + dj) * c;
                    for ch in 0..c {
                        out[offset + ch] = x[[ii as usize, jj as usize, ch]];
                    }
                }
            }
        }
    }
    out
}

/// Fold (H * W, k * k * C) patch gradients back onto an (H, W, C) image
fn col2im_sample(cols: &[f32], h: usize, w: usize, c: usize, k: usize) -> Vec<f32> {
    let pad = (k / 2) as isize;
    let row_len = k * k * c;
    let mut out = vec![0.0f32; h * w * c];

    for i in 0..h {
        for j in 0..w {
            let base = (i * w + j) * row_len;
            for di in 0..k {
                let ii = i as isize + di as isize - pad;
                if ii < 0 || ii >= h as isize {
                    continue;
                }
                for dj in 0..k {
                    let jj = j as isize + dj as isize - pad;
                    if jj < 0 || jj >= w as isize {
                        continue;
                    }
                    let src = base + (di * k + dj) * c;
                    let dst = (ii as usize * w + jj as usize) * c;
                    for ch in 0..c {
                        out[dst + ch] += cols[src + ch];
                    }
                }
            }
        }
    }
    out
}

impl Layer for Conv2D {
    fn name(&self) -> &'static str {
        "conv2d"
    }

    fn build(&mut self, input_shape: &[usize], rng: &mut Xoshiro256PlusPlus) -> Result<Vec<usize>> {
        if input_shape.len() != 3 {
            return Err(TunerError::ShapeError {
                expected: "(height, width, channels) input for conv2d".to_string(),
                actual: format!("{:?}", input_shape),
            });
        }
        if self.kernel_size % 2 == 0 {
            return Err(TunerError::InvalidParameter {
                name: "kernel_size".to_string(),
                value: self.kernel_size.to_string(),
                reason: "same padding needs an odd kernel".to_string(),
            });
        }
        self.in_channels = input_shape[2];
        let patch = self.patch_len();
        let k2 = self.kernel_size * self.kernel_size;
        self.kernel = glorot_uniform(&[patch, self.filters], patch, k2 * self.filters, rng);
        self.bias = Tensor::zeros(vec![self.filters]);
        self.grad_kernel = Tensor::zeros(vec![patch, self.filters]);
        self.grad_bias = Tensor::zeros(vec![self.filters]);
        Ok(vec![input_shape[0], input_shape[1], self.filters])
    }

    fn forward(&mut self, input: &Tensor, training: bool) -> Result<Tensor> {
        expect_rank("conv2d", input, 4)?;
        let x = input.view().into_dimensionality::<ndarray::Ix4>()?;
        let (n, h, w, c) = x.dim();
        if c != self.in_channels {
            return Err(TunerError::ShapeError {
                expected: format!("{} input channels", self.in_channels),
                actual: c.to_string(),
            });
        }
        let k = self.kernel_size;

        let samples: Vec<Vec<f32>> = (0..n)
            .into_par_iter()
            .map(|i| im2col_sample(x.index_axis(Axis(0), i), k))
            .collect();
        let cols = Array2::from_shape_vec((n * h * w, self.patch_len()), samples.concat())?;

        let kernel = self.kernel.view().into_dimensionality::<Ix2>()?;
        let bias = self.bias.view().into_dimensionality::<ndarray::Ix1>()?;
        let out = cols.dot(&kernel) + &bias;

        if training {
            self.cols = Some(cols);
            self.input_dims = (n, h, w, c);
        }
        Ok(out.into_shape((n, h, w, self.filters))?.into_dyn())
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let cols = self.cols.take().ok_or_else(|| no_forward("conv2d"))?;
        let (n, h, w, c) = self.input_dims;
        let grad = to_matrix(grad_output, n * h * w, self.filters)?;

        let kernel = self.kernel.view().into_dimensionality::<Ix2>()?;
        self.grad_kernel = cols.t().dot(&grad).into_dyn();
        self.grad_bias = grad.sum_axis(Axis(0)).into_dyn();

        let grad_cols = grad.dot(&kernel.t());
        let k = self.kernel_size;
        let per_sample = h * w * self.patch_len();
        let grad_cols = grad_cols
            .as_slice()
            .ok_or_else(|| TunerError::TrainingError("conv2d: non-contiguous gradient".to_string()))?;

        let samples: Vec<Vec<f32>> = grad_cols
            .par_chunks(per_sample)
            .map(|chunk| col2im_sample(chunk, h, w, c, k))
            .collect();
        Ok(Array4::from_shape_vec((n, h, w, c), samples.concat())?.into_dyn())
    }

    fn params_and_grads(&mut self) -> Vec<(&mut Tensor, &Tensor)> {
        vec![(&mut self.kernel, &self.grad_kernel), (&mut self.bias, &self.grad_bias)]
    }

    fn weights(&self) -> Vec<Tensor> {
        vec![self.kernel.clone(), self.bias.clone()]
    }

    fn set_weights(&mut self, weights: &[Tensor]) -> Result<()> {
        expect_weight_count("conv2d", weights, 2)?;
        assign_weight("conv2d", &mut self.kernel, &weights[0])?;
        assign_weight("conv2d", &mut self.bias, &weights[1])
    }

    fn n_weights(&self) -> usize {
        2
    }
}

// ─── ReLU ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ReLU {
    mask: Option<Tensor>,
}

impl ReLU {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Layer for ReLU {
    fn name(&self) -> &'static str {
        "relu"
    }

    fn build(&mut self, input_shape: &[usize], _rng: &mut Xoshiro256PlusPlus) -> Result<Vec<usize>> {
        Ok(input_shape.to_vec())
    }

    fn forward(&mut self, input: &Tensor, training: bool) -> Result<Tensor> {
        if training {
            self.mask = Some(input.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }));
        }
        Ok(input.mapv(|v| v.max(0.0)))
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let mask = self.mask.take().ok_or_else(|| no_forward("relu"))?;
        Ok(grad_output * &mask)
    }
}

// ─── BatchNorm ─────────────────────────────────────────────────────────────────

/// Batch normalization over the last axis
#[derive(Debug, Clone)]
pub struct BatchNorm {
    momentum: f32,
    eps: f32,
    gamma: Tensor,
    beta: Tensor,
    running_mean: Tensor,
    running_var: Tensor,
    grad_gamma: Tensor,
    grad_beta: Tensor,
    /// (normalized input as (M, C), 1 / std, original shape)
    cache: Option<(Array2<f32>, Array1<f32>, Vec<usize>)>,
}

impl Default for BatchNorm {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchNorm {
    pub fn new() -> Self {
        Self {
            momentum: 0.99,
            eps: 1e-3,
            gamma: Tensor::zeros(vec![0]),
            beta: Tensor::zeros(vec![0]),
            running_mean: Tensor::zeros(vec![0]),
            running_var: Tensor::zeros(vec![0]),
            grad_gamma: Tensor::zeros(vec![0]),
            grad_beta: Tensor::zeros(vec![0]),
            cache: None,
        }
    }

    pub fn with_momentum(mut self, momentum: f32) -> Self {
        self.momentum = momentum;
        self
    }

    fn channels(&self) -> usize {
        self.gamma.len()
    }
}

impl Layer for BatchNorm {
    fn name(&self) -> &'static str {
        "batch_norm"
    }

    fn build(&mut self, input_shape: &[usize], _rng: &mut Xoshiro256PlusPlus) -> Result<Vec<usize>> {
        let c = *input_shape.last().ok_or_else(|| not_built("batch_norm"))?;
        self.gamma = Tensor::ones(vec![c]);
        self.beta = Tensor::zeros(vec![c]);
        self.running_mean = Tensor::zeros(vec![c]);
        self.running_var = Tensor::ones(vec![c]);
        self.grad_gamma = Tensor::zeros(vec![c]);
        self.grad_beta = Tensor::zeros(vec![c]);
        Ok(input_shape.to_vec())
    }

    fn forward(&mut self, input: &Tensor, training: bool) -> Result<Tensor> {
        let c = self.channels();
        if input.shape().last() != Some(&c) {
            return Err(TunerError::ShapeError {
                expected: format!("{} channels on the last axis", c),
                actual: format!("{:?}", input.shape()),
            });
        }
        let m = input.len() / c;
        let x = to_matrix(input, m, c)?;
        let gamma = self.gamma.view().into_dimensionality::<ndarray::Ix1>()?;
        let beta = self.beta.view().into_dimensionality::<ndarray::Ix1>()?;

        let (mean, var) = if training {
            let mean = x.mean_axis(Axis(0)).ok_or_else(|| not_built("batch_norm"))?;
            let var = x.var_axis(Axis(0), 0.0);
            let mom = self.momentum;
            Zip::from(&mut self.running_mean)
                .and(mean.view().into_dyn())
                .for_each(|r, &b| *r = mom * *r + (1.0 - mom) * b);
            Zip::from(&mut self.running_var)
                .and(var.view().into_dyn())
                .for_each(|r, &b| *r = mom * *r + (1.0 - mom) * b);
            (mean, var)
        } else {
            (
                self.running_mean.view().into_dimensionality::<ndarray::Ix1>()?.to_owned(),
                self.running_var.view().into_dimensionality::<ndarray::Ix1>()?.to_owned(),
            )
        };

        let inv_std = var.mapv(|v| 1.0 / (v + self.eps).sqrt());
        let x_hat = (&x - &mean) * &inv_std;
        let out = &x_hat * &gamma + &beta;

        if training {
            self.cache = Some((x_hat, inv_std, input.shape().to_vec()));
        }
        Ok(out.into_shape(input.shape())?.into_dyn())
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let (x_hat, inv_std, shape) = self.cache.take().ok_or_else(|| no_forward("batch_norm"))?;
        let (m, c) = x_hat.dim();
        let dy = to_matrix(grad_output, m, c)?;
        let gamma = self.gamma.view().into_dimensionality::<ndarray::Ix1>()?;

        let sum_dy = dy.sum_axis(Axis(0));
        let sum_dy_xhat = (&dy * &x_hat).sum_axis(Axis(0));
        self.grad_beta = sum_dy.clone().into_dyn();
        self.grad_gamma = sum_dy_xhat.clone().into_dyn();

        // dx = gamma * inv_std / M * (M * dy - sum(dy) - x_hat * sum(dy * x_hat))
        let scale = &gamma * &inv_std / m as f32;
        let dx = (&dy * m as f32 - &sum_dy - &x_hat * &sum_dy_xhat) * &scale;
        Ok(dx.into_shape(shape)?)
    }

    fn params_and_grads(&mut self) -> Vec<(&mut Tensor, &Tensor)> {
        vec![(&mut self.gamma, &self.grad_gamma), (&mut self.beta, &self.grad_beta)]
    }

    fn weights(&self) -> Vec<Tensor> {
        vec![
            self.gamma.clone(),
            self.beta.clone(),
            self.running_mean.clone(),
            self.running_var.clone(),
        ]
    }

    fn set_weights(&mut self, weights: &[Tensor]) -> Result<()> {
        expect_weight_count("batch_norm", weights, 4)?;
        assign_weight("batch_norm", &mut self.gamma, &weights[0])?;
        assign_weight("batch_norm", &mut self.beta, &weights[1])?;
        assign_weight("batch_norm", &mut self.running_mean, &weights[2])?;
        assign_weight("batch_norm", &mut self.running_var, &weights[3])
    }

    fn n_weights(&self) -> usize {
        4
    }
}

// ─── MaxPool2D ─────────────────────────────────────────────────────────────────

/// 2x2 max pooling with stride 2, trailing odd rows/columns dropped
#[derive(Debug, Clone, Default)]
pub struct MaxPool2D {
    /// Flat input index of each output's maximum
    argmax: Option<Vec<usize>>,
    input_shape: Vec<usize>,
}

impl MaxPool2D {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Layer for MaxPool2D {
    fn name(&self) -> &'static str {
        "max_pool2d"
    }

    fn build(&mut self, input_shape: &[usize], _rng: &mut Xoshiro256PlusPlus) -> Result<Vec<usize>> {
        if input_shape.len() != 3 || input_shape[0] < 2 || input_shape[1] < 2 {
            return Err(TunerError::ShapeError {
                expected: "(height >= 2, width >= 2, channels) input for max_pool2d".to_string(),
                actual: format!("{:?}", input_shape),
            });
        }
        Ok(vec![input_shape[0] / 2, input_shape[1] / 2, input_shape[2]])
    }

    fn forward(&mut self, input: &Tensor, training: bool) -> Result<Tensor> {
        expect_rank("max_pool2d", input, 4)?;
        let x = input.as_standard_layout();
        let (n, h, w, c) = (x.shape()[0], x.shape()[1], x.shape()[2], x.shape()[3]);
        let (oh, ow) = (h / 2, w / 2);
        let data = x
            .as_slice()
            .ok_or_else(|| TunerError::TrainingError("max_pool2d: non-contiguous input".to_string()))?;

        let per_sample: Vec<(Vec<f32>, Vec<usize>)> = (0..n)
            .into_par_iter()
            .map(|s| {
                let base = s * h * w * c;
                let mut values = Vec::with_capacity(oh * ow * c);
                let mut indices = Vec::with_capacity(oh * ow * c);
                for i in 0..oh {
                    for j in 0..ow {
                        for ch in 0..c {
                            let mut best_idx = base + ((2 * i) * w + 2 * j) * c + ch;
                            let mut best = data[best_idx];
                            for (di, dj) in [(0, 1), (1, 0), (1, 1)] {
                                let idx = base + ((2 * i + di) * w + 2 * j + dj) * c + ch;
                                if data[idx] > best {
                                    best = data[idx];
                                    best_idx = idx;
                                }
                            }
                            values.push(best);
                            indices.push(best_idx);
                        }
                    }
                }
                (values, indices)
            })
            .collect();

        let mut values = Vec::with_capacity(n * oh * ow * c);
        let mut indices = Vec::with_capacity(n * oh * ow * c);
        for (v, i) in per_sample {
            values.extend(v);
            indices.extend(i);
        }

        if training {
            self.argmax = Some(indices);
            self.input_shape = vec![n, h, w, c];
        }
        Ok(Array4::from_shape_vec((n, oh, ow, c), values)?.into_dyn())
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let argmax = self.argmax.take().ok_or_else(|| no_forward("max_pool2d"))?;
        let grad = grad_output.as_standard_layout();
        let mut dx = Tensor::zeros(self.input_shape.clone());
        {
            let dx_slice = dx
                .as_slice_mut()
                .ok_or_else(|| TunerError::TrainingError("max_pool2d: non-contiguous gradient".to_string()))?;
            for (&idx, &g) in argmax.iter().zip(grad.iter()) {
                dx_slice[idx] += g;
            }
        }
        Ok(dx)
    }
}

// ─── Flatten ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct Flatten {
    input_shape: Vec<usize>,
}

impl Flatten {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Layer for Flatten {
    fn name(&self) -> &'static str {
        "flatten"
    }

    fn build(&mut self, input_shape: &[usize], _rng: &mut Xoshiro256PlusPlus) -> Result<Vec<usize>> {
        Ok(vec![input_shape.iter().product()])
    }

    fn forward(&mut self, input: &Tensor, _training: bool) -> Result<Tensor> {
        let n = input.shape()[0];
        let features = input.len() / n.max(1);
        self.input_shape = input.shape().to_vec();
        Ok(to_matrix(input, n, features)?.into_dyn())
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        Ok(grad_output
            .as_standard_layout()
            .into_owned()
            .into_shape(self.input_shape.clone())?)
    }
}

// ─── Dense ─────────────────────────────────────────────────────────────────────

/// Fully connected layer
#[derive(Debug, Clone)]
pub struct Dense {
    units: usize,
    /// (in_features, units)
    kernel: Tensor,
    bias: Tensor,
    grad_kernel: Tensor,
    grad_bias: Tensor,
    input: Option<Array2<f32>>,
}

impl Dense {
    pub fn new(units: usize) -> Self {
        Self {
            units,
            kernel: Tensor::zeros(vec![0, 0]),
            bias: Tensor::zeros(vec![0]),
            grad_kernel: Tensor::zeros(vec![0, 0]),
            grad_bias: Tensor::zeros(vec![0]),
            input: None,
        }
    }

    pub fn units(&self) -> usize {
        self.units
    }
}

impl Layer for Dense {
    fn name(&self) -> &'static str {
        "dense"
    }

    fn build(&mut self, input_shape: &[usize], rng: &mut Xoshiro256PlusPlus) -> Result<Vec<usize>> {
        if input_shape.len() != 1 {
            return Err(TunerError::ShapeError {
                expected: "flat (features,) input for dense".to_string(),
                actual: format!("{:?}", input_shape),
            });
        }
        let fan_in = input_shape[0];
        self.kernel = glorot_uniform(&[fan_in, self.units], fan_in, self.units, rng);
        self.bias = Tensor::zeros(vec![self.units]);
        self.grad_kernel = Tensor::zeros(vec![fan_in, self.units]);
        self.grad_bias = Tensor::zeros(vec![self.units]);
        Ok(vec![self.units])
    }

    fn forward(&mut self, input: &Tensor, training: bool) -> Result<Tensor> {
        expect_rank("dense", input, 2)?;
        let x = input.view().into_dimensionality::<Ix2>()?;
        let kernel = self.kernel.view().into_dimensionality::<Ix2>()?;
        let bias = self.bias.view().into_dimensionality::<ndarray::Ix1>()?;
        let out = x.dot(&kernel) + &bias;
        if training {
            self.input = Some(x.to_owned());
        }
        Ok(out.into_dyn())
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let x = self.input.take().ok_or_else(|| no_forward("dense"))?;
        let grad = grad_output.view().into_dimensionality::<Ix2>()?;
        let kernel = self.kernel.view().into_dimensionality::<Ix2>()?;

        self.grad_kernel = x.t().dot(&grad).into_dyn();
        self.grad_bias = grad.sum_axis(Axis(0)).into_dyn();
        Ok(grad.dot(&kernel.t()).into_dyn())
    }

    fn params_and_grads(&mut self) -> Vec<(&mut Tensor, &Tensor)> {
        vec![(&mut self.kernel, &self.grad_kernel), (&mut self.bias, &self.grad_bias)]
    }

    fn weights(&self) -> Vec<Tensor> {
        vec![self.kernel.clone(), self.bias.clone()]
    }

    fn set_weights(&mut self, weights: &[Tensor]) -> Result<()> {
        expect_weight_count("dense", weights, 2)?;
        assign_weight("dense", &mut self.kernel, &weights[0])?;
        assign_weight("dense", &mut self.bias, &weights[1])
    }

    fn n_weights(&self) -> usize {
        2
    }
}

// ─── Dropout ───────────────────────────────────────────────────────────────────

/// Inverted dropout; identity at inference
#[derive(Debug, Clone)]
pub struct Dropout {
    rate: f32,
    rng: Option<Xoshiro256PlusPlus>,
    mask: Option<Tensor>,
}

impl Dropout {
    pub fn new(rate: f32) -> Self {
        Self {
            rate: rate.clamp(0.0, 0.99),
            rng: None,
            mask: None,
        }
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }
}

impl Layer for Dropout {
    fn name(&self) -> &'static str {
        "dropout"
    }

    fn build(&mut self, input_shape: &[usize], rng: &mut Xoshiro256PlusPlus) -> Result<Vec<usize>> {
        self.rng = Some(Xoshiro256PlusPlus::seed_from_u64(rng.gen()));
        Ok(input_shape.to_vec())
    }

    fn forward(&mut self, input: &Tensor, training: bool) -> Result<Tensor> {
        if !training || self.rate == 0.0 {
            return Ok(input.clone());
        }
        let rng = self.rng.as_mut().ok_or_else(|| not_built("dropout"))?;
        let keep = 1.0 - self.rate;
        let mask = Tensor::from_shape_fn(input.raw_dim(), |_| {
            if rng.gen::<f32>() < keep {
                1.0 / keep
            } else {
                0.0
            }
        });
        let out = input * &mask;
        self.mask = Some(mask);
        Ok(out)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        match self.mask.take() {
            Some(mask) => Ok(grad_output * &mask),
            None => Ok(grad_output.clone()),
        }
    }
}

// ─── Softmax ───────────────────────────────────────────────────────────────────

/// Row-wise softmax over (N, classes)
#[derive(Debug, Clone, Default)]
pub struct Softmax {
    output: Option<Array2<f32>>,
}

impl Softmax {
    pub fn new() -> Self {
        Self::default()
    }
}

pub(crate) fn softmax_rows(x: &Array2<f32>) -> Array2<f32> {
    let mut out = x.clone();
    for mut row in out.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    out
}

impl Layer for Softmax {
    fn name(&self) -> &'static str {
        "softmax"
    }

    fn build(&mut self, input_shape: &[usize], _rng: &mut Xoshiro256PlusPlus) -> Result<Vec<usize>> {
        Ok(input_shape.to_vec())
    }

    fn forward(&mut self, input: &Tensor, training: bool) -> Result<Tensor> {
        expect_rank("softmax", input, 2)?;
        let x = input.view().into_dimensionality::<Ix2>()?.to_owned();
        let y = softmax_rows(&x);
        if training {
            self.output = Some(y.clone());
        }
        Ok(y.into_dyn())
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let y = self.output.take().ok_or_else(|| no_forward("softmax"))?;
        let g = grad_output.view().into_dimensionality::<Ix2>()?;
        // dx = y * (g - sum(g * y))
        let dot = (&g * &y).sum_axis(Axis(1)).insert_axis(Axis(1));
        Ok((&y * &(&g - &dot)).into_dyn())
    }
}
