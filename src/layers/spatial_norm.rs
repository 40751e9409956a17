//! Spatial Normalization
//!
//! Normalization for convolutional feature maps `[N, C, H, W]`.
//!
//! ## Spatial Batch Norm
//!
//! Statistics per channel, aggregated over the batch *and* every spatial
//! position. Implemented by reshaping to `[N*H*W, C]` rows
//! (see [`crate::layers::layout`]) and running plain batch norm.
//!
//! ## Group Norm
//!
//! Channels are split into `G` contiguous groups. Each (example, group) block
//! of `C/G * H * W` values is standardized on its own, then a per-*channel*
//! scale and shift is applied:
//!
//! ```text
//! GroupNorm(1, C)  normalizes each example over all its channels
//! GroupNorm(C, C)  normalizes each channel of each example separately
//! ```
//!
//! Group norm ignores the batch, keeps no running statistics and has no
//! test mode.

use crate::config::{BatchNormOptions, GroupNormOptions};
use crate::error::{Error, Result};
use crate::layers::batch_norm::{batchnorm_backward, batchnorm_forward, NormCache, RunningStats};
use crate::layers::layout::{nchw_to_rows, rows_to_nchw};
use crate::layers::NormGradients;
use crate::tensor::Tensor;

/// Spatial batch normalization forward pass
///
/// # Arguments
///
/// * `x` - Input `[N, C, H, W]`
/// * `gamma` - Scale `[C]`
/// * `beta` - Shift `[C]`
/// * `options` - Mode, ε and momentum
/// * `stats` - Per-channel running statistics
pub fn spatial_batchnorm_forward(
    x: &Tensor,
    gamma: &Tensor,
    beta: &Tensor,
    options: &BatchNormOptions,
    stats: &mut RunningStats,
) -> Result<(Tensor, Option<NormCache>)> {
    let (n, c, h, w) = x.dims4("spatial_batchnorm_forward")?;
    let rows = nchw_to_rows(x)?;
    let (out, cache) = batchnorm_forward(&rows, gamma, beta, options, stats)?;
    Ok((rows_to_nchw(&out, [n, c, h, w])?, cache))
}

/// Spatial batch normalization backward pass
///
/// `grad_out` is `[N, C, H, W]`; parameter gradients are `[C]`.
pub fn spatial_batchnorm_backward(grad_out: &Tensor, cache: &NormCache) -> Result<NormGradients> {
    let (n, c, h, w) = grad_out.dims4("spatial_batchnorm_backward")?;
    let grads = batchnorm_backward(&nchw_to_rows(grad_out)?, cache)?;
    Ok(NormGradients {
        x: rows_to_nchw(&grads.x, [n, c, h, w])?,
        ..grads
    })
}

/// Cache for group norm backward pass
#[derive(Clone, Debug)]
pub struct GroupNormCache {
    /// Normalized input, `[N, C, H, W]`
    x_hat: Tensor,
    /// Per (example, group) mean and variance, `N * G` entries each
    mean: Vec<f64>,
    var: Vec<f64>,
    gamma: Vec<f64>,
    eps: f64,
    groups: usize,
}

impl GroupNormCache {
    pub fn x_hat(&self) -> &Tensor {
        &self.x_hat
    }

    /// Mean of each (example, group) block, example-major.
    pub fn group_mean(&self) -> &[f64] {
        &self.mean
    }
}

/// Spatial group normalization forward pass
///
/// # Arguments
///
/// * `x` - Input `[N, C, H, W]`
/// * `gamma` - Per-channel scale `[C]`
/// * `beta` - Per-channel shift `[C]`
/// * `groups` - Number of groups `G`, must divide `C`
/// * `options` - ε
pub fn spatial_groupnorm_forward(
    x: &Tensor,
    gamma: &Tensor,
    beta: &Tensor,
    groups: usize,
    options: &GroupNormOptions,
) -> Result<(Tensor, GroupNormCache)> {
    options.validate()?;
    let (n, c, h, w) = x.dims4("spatial_groupnorm_forward")?;
    if groups == 0 || c % groups != 0 {
        return Err(Error::IndivisibleGroups {
            channels: c,
            groups,
        });
    }
    gamma.expect_shape("spatial_groupnorm_forward", &[c])?;
    beta.expect_shape("spatial_groupnorm_forward", &[c])?;
    tracing::debug!(shape = ?x.shape, groups, "groupnorm forward");

    let plane = h * w;
    // Channels of one group are contiguous in NCHW, so each block is a slice
    let block = (c / groups) * plane;
    if block == 0 {
        return Err(Error::config("group norm needs non-empty channel and spatial dimensions"));
    }
    let inv_m = 1.0 / block as f64;

    let mut mean = Vec::with_capacity(n * groups);
    let mut var = Vec::with_capacity(n * groups);
    let mut x_hat = vec![0.0; x.numel()];
    let mut out = vec![0.0; x.numel()];

    for (b, values) in x.data.chunks(block).enumerate() {
        let mu = values.iter().sum::<f64>() * inv_m;
        let sigma2 = values.iter().map(|v| (v - mu) * (v - mu)).sum::<f64>() * inv_m;
        let inv_std = 1.0 / (sigma2 + options.eps).sqrt();

        let start = b * block;
        for (i, &v) in values.iter().enumerate() {
            let idx = start + i;
            let channel = (idx / plane) % c;
            x_hat[idx] = (v - mu) * inv_std;
            out[idx] = gamma.data[channel] * x_hat[idx] + beta.data[channel];
        }
        mean.push(mu);
        var.push(sigma2);
    }

    let cache = GroupNormCache {
        x_hat: Tensor::from_raw(x_hat, x.shape.clone()),
        mean,
        var,
        gamma: gamma.data.clone(),
        eps: options.eps,
        groups,
    };
    Ok((Tensor::from_raw(out, x.shape.clone()), cache))
}

/// Spatial group normalization backward pass
///
/// Parameter gradients are summed over batch and spatial positions but kept
/// per channel; the input gradient follows the three-term rule within each
/// (example, group) block.
pub fn spatial_groupnorm_backward(
    grad_out: &Tensor,
    cache: &GroupNormCache,
) -> Result<NormGradients> {
    grad_out.expect_shape("spatial_groupnorm_backward", &cache.x_hat.shape)?;
    let (_, c, h, w) = grad_out.dims4("spatial_groupnorm_backward")?;
    let plane = h * w;
    let block = (c / cache.groups) * plane;
    let m = block as f64;
    let x_hat = &cache.x_hat.data;

    let mut grad_gamma = vec![0.0; c];
    let mut grad_beta = vec![0.0; c];
    let mut grad_x_hat = vec![0.0; grad_out.numel()];
    for (idx, &g) in grad_out.data.iter().enumerate() {
        let channel = (idx / plane) % c;
        grad_gamma[channel] += g * x_hat[idx];
        grad_beta[channel] += g;
        grad_x_hat[idx] = g * cache.gamma[channel];
    }

    let mut grad_x = vec![0.0; grad_out.numel()];
    for (b, (dxh, dx)) in grad_x_hat
        .chunks(block)
        .zip(grad_x.chunks_mut(block))
        .enumerate()
    {
        let xh = &x_hat[b * block..(b + 1) * block];
        let inv_std = 1.0 / (cache.var[b] + cache.eps).sqrt();
        let sum_grad: f64 = dxh.iter().sum();
        let sum_grad_x: f64 = dxh.iter().zip(xh).map(|(g, x)| g * x).sum();
        for i in 0..block {
            dx[i] = inv_std / m * (m * dxh[i] - sum_grad - xh[i] * sum_grad_x);
        }
    }

    Ok(NormGradients {
        x: Tensor::from_raw(grad_x, grad_out.shape.clone()),
        gamma: Tensor::from_raw(grad_gamma, vec![c]),
        beta: Tensor::from_raw(grad_beta, vec![c]),
    })
}
