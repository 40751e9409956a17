//! Affine Layer (Fully Connected)
//!
//! The affine layer performs `out = x @ W + b` after flattening every
//! example into a row vector.
//!
//! ## Forward Pass
//!
//! ```text
//! Input:  x [N, d_1, ..., d_k]   flattened to [N, D], D = d_1 * ... * d_k
//! Weight: W [D, M]
//! Bias:   b [M]
//! Output: out = x_flat @ W + b   [N, M]
//! ```
//!
//! ## Backward Pass
//!
//! Using the chain rule:
//! ```text
//! grad_W = x_flat^T @ grad_out
//! grad_b = sum(grad_out, axis=0)
//! grad_x = (grad_out @ W^T) reshaped to [N, d_1, ..., d_k]
//! ```
//!
//! - **grad_W**: Each weight W[i,j] affects output out[*,j] through input x[*,i]
//! - **grad_b**: Each bias b[j] affects all outputs out[*,j] equally
//! - **grad_x**: Needed to backprop to the previous layer

use crate::error::{Error, Result};
use crate::tensor::Tensor;

/// Cache for affine backward pass
#[derive(Clone, Debug)]
pub struct AffineCache {
    /// Input flattened to `[N, D]`
    x_flat: Tensor,
    /// Original input shape, restored on `grad_x`
    x_shape: Vec<usize>,
    w: Tensor,
}

/// Gradients for the affine layer
#[derive(Clone, Debug)]
pub struct AffineGradients {
    /// Same shape as the original input
    pub x: Tensor,
    pub w: Tensor,
    pub b: Tensor,
}

/// Flatten `[N, d_1, ..., d_k]` to `[N, D]`.
fn flatten_rows(x: &Tensor) -> Result<Tensor> {
    if x.shape.len() < 2 {
        return Err(Error::RankMismatch {
            op: "affine_forward",
            expected: 2,
            got: x.shape.len(),
            shape: x.shape.clone(),
        });
    }
    let n = x.shape[0];
    let d: usize = x.shape[1..].iter().product();
    x.reshape(&[n, d])
}

/// Forward pass
///
/// # Arguments
///
/// * `x` - Input `[N, d_1, ..., d_k]`
/// * `w` - Weights `[D, M]`
/// * `b` - Bias `[M]`
///
/// # Returns
///
/// Tuple of (output `[N, M]`, cache)
///
/// # Example
///
/// ```rust
/// # use handgrad::{Tensor, layers::affine_forward};
/// let x = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![1, 2, 2]).unwrap();
/// let w = Tensor::new(vec![1.0; 8], vec![4, 2]).unwrap();
/// let b = Tensor::new(vec![0.5, -0.5], vec![2]).unwrap();
/// let (out, _cache) = affine_forward(&x, &w, &b).unwrap();
/// assert_eq!(out.data, vec![10.5, 9.5]);
/// ```
pub fn affine_forward(x: &Tensor, w: &Tensor, b: &Tensor) -> Result<(Tensor, AffineCache)> {
    let x_flat = flatten_rows(x)?;
    let d = x_flat.shape[1];
    w.expect_rank("affine_forward", 2)?;
    let m = w.shape[1];
    w.expect_shape("affine_forward", &[d, m])?;
    b.expect_shape("affine_forward", &[m])?;

    tracing::debug!(input = ?x.shape, out_features = m, "affine forward");

    let out = x_flat.matmul(w)?.add(b)?;
    let cache = AffineCache {
        x_flat,
        x_shape: x.shape.clone(),
        w: w.clone(),
    };
    Ok((out, cache))
}

/// Backward pass
///
/// # Arguments
///
/// * `grad_out` - Upstream gradient `[N, M]`
/// * `cache` - Cached values from forward pass
pub fn affine_backward(grad_out: &Tensor, cache: &AffineCache) -> Result<AffineGradients> {
    let n = cache.x_flat.shape[0];
    let m = cache.w.shape[1];
    grad_out.expect_shape("affine_backward", &[n, m])?;

    // grad_W = x^T @ grad_out
    let grad_w = cache.x_flat.transpose(0, 1)?.matmul(grad_out)?;

    // grad_b = sum(grad_out) along the batch axis
    let grad_b = grad_out.sum_axis0()?;

    // grad_x = grad_out @ W^T, restored to the input's shape
    let grad_x = grad_out
        .matmul(&cache.w.transpose(0, 1)?)?
        .reshape(&cache.x_shape)?;

    Ok(AffineGradients {
        x: grad_x,
        w: grad_w,
        b: grad_b,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linspace(lo: f64, hi: f64, shape: Vec<usize>) -> Tensor {
        let n: usize = shape.iter().product();
        let step = if n > 1 { (hi - lo) / (n - 1) as f64 } else { 0.0 };
        Tensor::new((0..n).map(|i| lo + step * i as f64).collect(), shape).unwrap()
    }

    #[test]
    fn test_forward_known_values() {
        // Two examples of shape (4, 5, 6), 3 outputs
        let x = linspace(-0.1, 0.5, vec![2, 4, 5, 6]);
        let w = linspace(-0.2, 0.3, vec![120, 3]);
        let b = linspace(-0.3, 0.1, vec![3]);
        let (out, _) = affine_forward(&x, &w, &b).unwrap();

        let expected = [
            1.49834967, 1.70660132, 1.91485297, 3.25553199, 3.5141327, 3.77273342,
        ];
        assert_eq!(out.shape, vec![2, 3]);
        for (got, want) in out.data.iter().zip(expected) {
            assert!((got - want).abs() < 1e-7, "{got} vs {want}");
        }
    }

    #[test]
    fn test_backward_shapes_follow_input() {
        let x = linspace(-1.0, 1.0, vec![3, 2, 5]);
        let w = linspace(-1.0, 1.0, vec![10, 4]);
        let b = Tensor::zeros(vec![4]);
        let (out, cache) = affine_forward(&x, &w, &b).unwrap();
        let grads = affine_backward(&Tensor::full(out.shape.clone(), 1.0), &cache).unwrap();
        assert_eq!(grads.x.shape, vec![3, 2, 5]);
        assert_eq!(grads.w.shape, vec![10, 4]);
        assert_eq!(grads.b.data, vec![3.0; 4]);
    }

    #[test]
    fn test_shape_contract_errors() {
        let x = Tensor::zeros(vec![2, 3]);
        let w = Tensor::zeros(vec![4, 2]);
        let b = Tensor::zeros(vec![2]);
        assert!(matches!(
            affine_forward(&x, &w, &b),
            Err(Error::ShapeMismatch { .. })
        ));
        assert!(matches!(
            affine_forward(&Tensor::zeros(vec![6]), &w, &b),
            Err(Error::RankMismatch { .. })
        ));

        let w = Tensor::zeros(vec![3, 2]);
        let (_, cache) = affine_forward(&x, &w, &b).unwrap();
        assert!(affine_backward(&Tensor::zeros(vec![2, 3]), &cache).is_err());
    }
}
