//! Activation Functions
//!
//! ## ReLU (Rectified Linear Unit)
//!
//! ```text
//! relu(x) = max(x, 0)
//! ```
//!
//! ReLU is not differentiable at `x = 0`. The backward pass uses the
//! subgradient `0` there, so a gradient only flows where the input was
//! strictly positive:
//!
//! ```text
//! grad_x = grad_out   if x > 0
//!          0          otherwise
//! ```

use rayon::prelude::*;

use crate::error::Result;
use crate::tensor::Tensor;

/// Cache for ReLU backward pass: the original input
#[derive(Clone, Debug)]
pub struct ReluCache {
    x: Tensor,
}

/// ReLU activation (forward pass)
///
/// Works on tensors of any shape. NaN inputs stay NaN.
pub fn relu_forward(x: &Tensor) -> (Tensor, ReluCache) {
    // f64::max would turn NaN into 0
    let out = x.map(|v| if v.is_nan() || v > 0.0 { v } else { 0.0 });
    (out, ReluCache { x: x.clone() })
}

/// ReLU activation derivative (backward pass)
///
/// # Errors
///
/// `grad_out` must have the cached input's shape.
pub fn relu_backward(grad_out: &Tensor, cache: &ReluCache) -> Result<Tensor> {
    grad_out.expect_shape("relu_backward", &cache.x.shape)?;
    let grad_data = cache
        .x
        .data
        .par_iter()
        .zip(&grad_out.data)
        .map(|(&x_val, &grad_val)| if x_val > 0.0 { grad_val } else { 0.0 })
        .collect();
    Tensor::new(grad_data, cache.x.shape.clone())
}
