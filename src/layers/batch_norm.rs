//! Batch Normalization
//!
//! Batch normalization standardizes each feature over the batch, then applies
//! a learnable per-feature scale (gamma) and shift (beta). This module also
//! hosts the shared core that layer norm and spatial batch norm reuse.
//!
//! ## Forward Pass (training)
//!
//! ```text
//! 1. mean = sum(x, axis=0) / N
//! 2. var  = sum((x - mean)², axis=0) / N
//! 3. x̂    = (x - mean) / √(var + ε)
//! 4. y    = γ * x̂ + β
//! 5. running = momentum * running + (1 - momentum) * batch_stat
//! ```
//!
//! At test time steps 1-2 are replaced by the running statistics and nothing
//! is cached.
//!
//! ## Backward Pass
//!
//! ```text
//! grad_β = sum(grad_y)
//! grad_γ = sum(grad_y * x̂)
//! grad_x̂ = grad_y * γ
//! ```
//!
//! Every element of a column feeds that column's mean and variance, so the
//! input gradient has three terms (direct, through the variance, through the
//! mean). [`batchnorm_backward`] evaluates them one at a time;
//! [`batchnorm_backward_alt`] uses the simplified form
//!
//! ```text
//! grad_x = (1/√(var+ε)) * (grad_x̂ - mean(grad_x̂) - x̂ * mean(grad_x̂ * x̂))
//! ```
//!
//! ## Working Layout
//!
//! The core always computes statistics per column over the rows of a
//! `[R, K]` working matrix. [`NormAxis`] records which axis gamma/beta run
//! along: the columns for batch norm, the rows for layer norm (which feeds
//! the core a transposed input).

use crate::config::BatchNormOptions;
use crate::error::{Error, Result};
use crate::tensor::Tensor;

/// Axis that gamma/beta (and their gradients) run along in the working matrix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NormAxis {
    /// Parameters per column, gradients summed over rows (batch norm).
    Batch,
    /// Parameters per row, gradients summed over columns (layer norm).
    Layer,
}

/// Per-feature exponential moving averages used at test time.
///
/// Owned by the caller and passed to [`batchnorm_forward`] by `&mut`. A
/// default (empty) record is zero-filled to the feature width on first use.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunningStats {
    pub mean: Vec<f64>,
    pub var: Vec<f64>,
}

impl RunningStats {
    /// Zero-valued statistics for `features` features.
    pub fn new(features: usize) -> Self {
        Self {
            mean: vec![0.0; features],
            var: vec![0.0; features],
        }
    }

    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    fn ensure_width(&mut self, op: &'static str, features: usize) -> Result<()> {
        if self.is_empty() && self.var.is_empty() {
            *self = Self::new(features);
            return Ok(());
        }
        if self.mean.len() != features || self.var.len() != features {
            return Err(Error::ShapeMismatch {
                op,
                expected: vec![features],
                got: vec![self.mean.len(), self.var.len()],
            });
        }
        Ok(())
    }

    /// Fold one batch's statistics into the running averages.
    pub fn update(&mut self, batch_mean: &[f64], batch_var: &[f64], momentum: f64) {
        for (r, &m) in self.mean.iter_mut().zip(batch_mean) {
            *r = momentum * *r + (1.0 - momentum) * m;
        }
        for (r, &v) in self.var.iter_mut().zip(batch_var) {
            *r = momentum * *r + (1.0 - momentum) * v;
        }
    }
}

/// Cache for the shared normalization backward pass
#[derive(Clone, Debug)]
pub struct NormCache {
    /// `x - mean` in the working layout
    pub(crate) x_centered: Tensor,
    /// Per-column variance (without ε)
    pub(crate) var: Vec<f64>,
    pub(crate) x_hat: Tensor,
    pub(crate) gamma: Vec<f64>,
    pub(crate) eps: f64,
    pub(crate) axis: NormAxis,
}

impl NormCache {
    pub fn axis(&self) -> NormAxis {
        self.axis
    }

    /// Normalized input `x̂` in the working layout
    pub fn x_hat(&self) -> &Tensor {
        &self.x_hat
    }
}

/// Gradients for the normalization kernels
#[derive(Clone, Debug)]
pub struct NormGradients {
    pub x: Tensor,
    pub gamma: Tensor,
    pub beta: Tensor,
}

/// Training-branch normalization of a `[R, K]` working matrix.
///
/// Returns the output, the cache and the per-column batch mean.
pub(crate) fn normalize_columns(
    x: &Tensor,
    gamma: &Tensor,
    beta: &Tensor,
    eps: f64,
    axis: NormAxis,
) -> Result<(Tensor, NormCache, Vec<f64>)> {
    let (rows, cols) = x.dims2("batchnorm_forward")?;
    if rows == 0 {
        return Err(Error::config("cannot compute statistics over zero rows"));
    }
    let params = match axis {
        NormAxis::Batch => cols,
        NormAxis::Layer => rows,
    };
    gamma.expect_shape("batchnorm_forward", &[params])?;
    beta.expect_shape("batchnorm_forward", &[params])?;

    let inv_rows = 1.0 / rows as f64;
    let mut mean = vec![0.0; cols];
    for r in 0..rows {
        for (m, &v) in mean.iter_mut().zip(&x.data[r * cols..(r + 1) * cols]) {
            *m += v;
        }
    }
    mean.iter_mut().for_each(|m| *m *= inv_rows);

    let mut x_centered = vec![0.0; rows * cols];
    let mut var = vec![0.0; cols];
    for r in 0..rows {
        for k in 0..cols {
            let d = x.data[r * cols + k] - mean[k];
            x_centered[r * cols + k] = d;
            var[k] += d * d;
        }
    }
    var.iter_mut().for_each(|v| *v *= inv_rows);

    let inv_std: Vec<f64> = var.iter().map(|v| 1.0 / (v + eps).sqrt()).collect();
    let mut x_hat = vec![0.0; rows * cols];
    let mut out = vec![0.0; rows * cols];
    for r in 0..rows {
        for k in 0..cols {
            let idx = r * cols + k;
            let p = match axis {
                NormAxis::Batch => k,
                NormAxis::Layer => r,
            };
            x_hat[idx] = x_centered[idx] * inv_std[k];
            out[idx] = gamma.data[p] * x_hat[idx] + beta.data[p];
        }
    }

    let cache = NormCache {
        x_centered: Tensor::from_raw(x_centered, vec![rows, cols]),
        var,
        x_hat: Tensor::from_raw(x_hat, vec![rows, cols]),
        gamma: gamma.data.clone(),
        eps,
        axis,
    };
    Ok((Tensor::from_raw(out, vec![rows, cols]), cache, mean))
}

/// Batch normalization forward pass
///
/// # Arguments
///
/// * `x` - Input `[N, D]`
/// * `gamma` - Scale `[D]`
/// * `beta` - Shift `[D]`
/// * `options` - Mode, ε and momentum
/// * `stats` - Running statistics, updated in place in training mode only
///
/// # Returns
///
/// Output `[N, D]` and, in training mode, the cache for the backward pass.
/// Test mode produces no cache.
///
/// # Example
///
/// ```rust
/// # use handgrad::{Tensor, BatchNormOptions, layers::{batchnorm_forward, RunningStats}};
/// let x = Tensor::new(vec![1.0, 10.0, 3.0, 30.0], vec![2, 2]).unwrap();
/// let gamma = Tensor::full(vec![2], 1.0);
/// let beta = Tensor::zeros(vec![2]);
/// let mut stats = RunningStats::new(2);
/// let (out, cache) =
///     batchnorm_forward(&x, &gamma, &beta, &BatchNormOptions::default(), &mut stats).unwrap();
/// assert!(cache.is_some());
/// assert!((out.data[0] + 1.0).abs() < 1e-4);
/// // running mean moved 10% of the way to the batch mean [2, 20]
/// assert!((stats.mean[1] - 2.0).abs() < 1e-12);
/// ```
pub fn batchnorm_forward(
    x: &Tensor,
    gamma: &Tensor,
    beta: &Tensor,
    options: &BatchNormOptions,
    stats: &mut RunningStats,
) -> Result<(Tensor, Option<NormCache>)> {
    options.validate()?;
    let (rows, features) = x.dims2("batchnorm_forward")?;
    gamma.expect_shape("batchnorm_forward", &[features])?;
    beta.expect_shape("batchnorm_forward", &[features])?;
    if stats.is_empty() && !options.mode.is_train() {
        tracing::warn!(
            features,
            "batchnorm_forward in test mode with empty running statistics, using zeros"
        );
    }
    stats.ensure_width("batchnorm_forward", features)?;

    tracing::debug!(rows, features, mode = %options.mode, "batchnorm forward");

    if options.mode.is_train() {
        let (out, cache, mean) = normalize_columns(x, gamma, beta, options.eps, NormAxis::Batch)?;
        stats.update(&mean, &cache.var, options.momentum);
        tracing::trace!(momentum = options.momentum, "running statistics updated");
        return Ok((out, Some(cache)));
    }

    // Test mode: an affine map built only from the running statistics
    let scale: Vec<f64> = (0..features)
        .map(|k| gamma.data[k] / (stats.var[k] + options.eps).sqrt())
        .collect();
    let mut out = vec![0.0; rows * features];
    for r in 0..rows {
        for k in 0..features {
            let idx = r * features + k;
            out[idx] = scale[k] * (x.data[idx] - stats.mean[k]) + beta.data[k];
        }
    }
    Ok((Tensor::from_raw(out, vec![rows, features]), None))
}

/// Accumulate grad_β and grad_γ along the cache's parameter axis.
fn param_gradients(grad_out: &Tensor, cache: &NormCache) -> (Tensor, Tensor) {
    let (rows, cols) = (cache.x_hat.shape[0], cache.x_hat.shape[1]);
    let params = cache.gamma.len();
    let mut grad_gamma = vec![0.0; params];
    let mut grad_beta = vec![0.0; params];
    for r in 0..rows {
        for k in 0..cols {
            let idx = r * cols + k;
            let p = match cache.axis {
                NormAxis::Batch => k,
                NormAxis::Layer => r,
            };
            grad_gamma[p] += grad_out.data[idx] * cache.x_hat.data[idx];
            grad_beta[p] += grad_out.data[idx];
        }
    }
    (
        Tensor::from_raw(grad_gamma, vec![params]),
        Tensor::from_raw(grad_beta, vec![params]),
    )
}

/// grad_x̂ = grad_y * γ, with γ broadcast along the cache's parameter axis.
fn scale_by_gamma(grad_out: &Tensor, cache: &NormCache) -> Vec<f64> {
    let cols = cache.x_hat.shape[1];
    grad_out
        .data
        .iter()
        .enumerate()
        .map(|(idx, &g)| {
            let p = match cache.axis {
                NormAxis::Batch => idx % cols,
                NormAxis::Layer => idx / cols,
            };
            g * cache.gamma[p]
        })
        .collect()
}

/// Batch normalization backward pass, staged through variance and mean
///
/// # Arguments
///
/// * `grad_out` - Upstream gradient, same shape as the forward output
/// * `cache` - Cache from a training-mode forward pass
pub fn batchnorm_backward(grad_out: &Tensor, cache: &NormCache) -> Result<NormGradients> {
    grad_out.expect_shape("batchnorm_backward", &cache.x_hat.shape)?;
    let (rows, cols) = (cache.x_hat.shape[0], cache.x_hat.shape[1]);
    let m = rows as f64;

    let (grad_gamma, grad_beta) = param_gradients(grad_out, cache);
    let grad_x_hat = scale_by_gamma(grad_out, cache);
    let xc = &cache.x_centered.data;

    let mut grad_var = vec![0.0; cols];
    let mut grad_mean = vec![0.0; cols];
    let mut sum_centered = vec![0.0; cols];
    for r in 0..rows {
        for k in 0..cols {
            let idx = r * cols + k;
            let std = (cache.var[k] + cache.eps).sqrt();
            grad_var[k] += grad_x_hat[idx] * xc[idx];
            grad_mean[k] -= grad_x_hat[idx] / std;
            sum_centered[k] += xc[idx];
        }
    }
    for k in 0..cols {
        // ∂x̂/∂var = -½ (x - mean) (var + ε)^(-3/2)
        grad_var[k] *= -0.5 * (cache.var[k] + cache.eps).powf(-1.5);
        // ∂var/∂mean = -2 Σ(x - mean) / m, zero up to rounding
        grad_mean[k] -= 2.0 * grad_var[k] * sum_centered[k] / m;
    }

    let mut grad_x = vec![0.0; rows * cols];
    for r in 0..rows {
        for k in 0..cols {
            let idx = r * cols + k;
            let std = (cache.var[k] + cache.eps).sqrt();
            grad_x[idx] =
                grad_x_hat[idx] / std + grad_var[k] * 2.0 * xc[idx] / m + grad_mean[k] / m;
        }
    }

    Ok(NormGradients {
        x: Tensor::from_raw(grad_x, vec![rows, cols]),
        gamma: grad_gamma,
        beta: grad_beta,
    })
}

/// Batch normalization backward pass, simplified closed form
///
/// Takes the same cache as [`batchnorm_backward`] and agrees with it to
/// floating-point tolerance.
pub fn batchnorm_backward_alt(grad_out: &Tensor, cache: &NormCache) -> Result<NormGradients> {
    grad_out.expect_shape("batchnorm_backward_alt", &cache.x_hat.shape)?;
    let (rows, cols) = (cache.x_hat.shape[0], cache.x_hat.shape[1]);
    let inv_m = 1.0 / rows as f64;

    let (grad_gamma, grad_beta) = param_gradients(grad_out, cache);
    let grad_x_hat = scale_by_gamma(grad_out, cache);
    let x_hat = &cache.x_hat.data;

    // Column means of grad_x̂ (mean dependency) and grad_x̂ * x̂ (variance dependency)
    let mut mean_grad = vec![0.0; cols];
    let mut mean_grad_x = vec![0.0; cols];
    for r in 0..rows {
        for k in 0..cols {
            let idx = r * cols + k;
            mean_grad[k] += grad_x_hat[idx] * inv_m;
            mean_grad_x[k] += grad_x_hat[idx] * x_hat[idx] * inv_m;
        }
    }

    let mut grad_x = vec![0.0; rows * cols];
    for r in 0..rows {
        for k in 0..cols {
            let idx = r * cols + k;
            let std_val = (cache.var[k] + cache.eps).sqrt();
            grad_x[idx] = (grad_x_hat[idx] - mean_grad[k] - x_hat[idx] * mean_grad_x[k]) / std_val;
        }
    }

    Ok(NormGradients {
        x: Tensor::from_raw(grad_x, vec![rows, cols]),
        gamma: grad_gamma,
        beta: grad_beta,
    })
}
