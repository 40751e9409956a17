//! Layer Normalization
//!
//! Layer norm standardizes each *example* over its features instead of each
//! feature over the batch, so it behaves identically at train and test time
//! and keeps no running statistics.
//!
//! ## The Transpose Trick
//!
//! Batch norm computes statistics per column. Transposing the input turns
//! examples into columns, so the batch-norm core can be reused unchanged:
//!
//! ```text
//! x       [N, D]  --transpose-->  x^T [D, N]
//! core:   per-column stats over D rows, γ/β applied per row (NormAxis::Layer)
//! out^T   [D, N]  --transpose-->  out [N, D]
//! ```
//!
//! The backward pass transposes the upstream gradient, runs the shared
//! batch-norm backward and transposes `grad_x` back. Parameter gradients are
//! summed over the examples (the working matrix's columns).

use crate::config::LayerNormOptions;
use crate::error::Result;
use crate::layers::batch_norm::{batchnorm_backward, normalize_columns, NormAxis, NormCache};
use crate::layers::NormGradients;
use crate::tensor::Tensor;

/// Layer normalization forward pass
///
/// # Arguments
///
/// * `x` - Input `[N, D]`
/// * `gamma` - Scale `[D]`
/// * `beta` - Shift `[D]`
/// * `options` - ε
///
/// # Returns
///
/// Output `[N, D]` and the cache (always produced; there is no test mode)
pub fn layernorm_forward(
    x: &Tensor,
    gamma: &Tensor,
    beta: &Tensor,
    options: &LayerNormOptions,
) -> Result<(Tensor, NormCache)> {
    options.validate()?;
    let (n, d) = x.dims2("layernorm_forward")?;
    tracing::debug!(rows = n, features = d, "layernorm forward");

    let x_t = x.transpose(0, 1)?;
    let (out_t, cache, _) = normalize_columns(&x_t, gamma, beta, options.eps, NormAxis::Layer)?;
    Ok((out_t.transpose(0, 1)?, cache))
}

/// Layer normalization backward pass
///
/// # Arguments
///
/// * `grad_out` - Upstream gradient `[N, D]`
/// * `cache` - Cache from [`layernorm_forward`]
pub fn layernorm_backward(grad_out: &Tensor, cache: &NormCache) -> Result<NormGradients> {
    grad_out.dims2("layernorm_backward")?;
    let grads = batchnorm_backward(&grad_out.transpose(0, 1)?, cache)?;
    Ok(NormGradients {
        x: grads.x.transpose(0, 1)?,
        ..grads
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_rows_are_standardized() {
        let mut rng = StdRng::seed_from_u64(3);
        let x = Tensor::randn(vec![4, 10], &mut rng).map(|v| 3.0 * v + 2.0);
        let (out, cache) = layernorm_forward(
            &x,
            &Tensor::full(vec![10], 1.0),
            &Tensor::zeros(vec![10]),
            &LayerNormOptions::default(),
        )
        .unwrap();
        assert_eq!(cache.axis(), NormAxis::Layer);
        assert_eq!(out.shape, vec![4, 10]);
        for row in out.data.chunks(10) {
            let mean: f64 = row.iter().sum::<f64>() / 10.0;
            let var: f64 = row.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 10.0;
            assert!(mean.abs() < 1e-12);
            assert!((var - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_gamma_beta_apply_per_feature() {
        let x = Tensor::new(vec![1.0, 3.0, 5.0, 7.0], vec![2, 2]).unwrap();
        let gamma = Tensor::new(vec![2.0, 3.0], vec![2]).unwrap();
        let beta = Tensor::new(vec![10.0, 20.0], vec![2]).unwrap();
        let (out, _) = layernorm_forward(&x, &gamma, &beta, &LayerNormOptions::default()).unwrap();
        // each row normalizes to [-1, 1] (up to ε)
        let s = 1.0 / (1.0f64 + 1e-5).sqrt();
        let expected = [10.0 - 2.0 * s, 20.0 + 3.0 * s, 10.0 - 2.0 * s, 20.0 + 3.0 * s];
        for (o, e) in out.data.iter().zip(expected) {
            assert!((o - e).abs() < 1e-12);
        }
    }

    #[test]
    fn test_backward_shapes_and_param_sums() {
        let mut rng = StdRng::seed_from_u64(8);
        let x = Tensor::randn(vec![3, 5], &mut rng);
        let gamma = Tensor::randn(vec![5], &mut rng);
        let beta = Tensor::randn(vec![5], &mut rng);
        let dout = Tensor::randn(vec![3, 5], &mut rng);
        let (_, cache) = layernorm_forward(&x, &gamma, &beta, &LayerNormOptions::default()).unwrap();
        let grads = layernorm_backward(&dout, &cache).unwrap();
        assert_eq!(grads.x.shape, vec![3, 5]);
        assert_eq!(grads.gamma.shape, vec![5]);
        // grad_β is the column sum of the upstream gradient
        let col_sums = dout.sum_axis0().unwrap();
        for (g, s) in grads.beta.data.iter().zip(&col_sums.data) {
            assert!((g - s).abs() < 1e-12);
        }
        // each row of grad_x sums to zero: shifting a row leaves the output unchanged
        for row in grads.x.data.chunks(5) {
            assert!(row.iter().sum::<f64>().abs() < 1e-10);
        }
    }

    #[test]
    fn test_gamma_length_checked() {
        let x = Tensor::zeros(vec![2, 4]);
        let res = layernorm_forward(
            &x,
            &Tensor::zeros(vec![2]),
            &Tensor::zeros(vec![2]),
            &LayerNormOptions::default(),
        );
        assert!(res.is_err());
    }
}
