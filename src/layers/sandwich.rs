//! Sandwich Layers
//!
//! Fixed compositions of kernels that show up in nearly every network built
//! from this library. Each forward bundles the inner caches; each backward
//! runs the inner backward passes in reverse order.
//!
//! ```text
//! affine_relu:     x -> affine -> relu
//! conv_relu_pool:  x -> conv -> relu -> max_pool
//! ```

use crate::config::{ConvOptions, PoolOptions};
use crate::error::Result;
use crate::layers::activation::{relu_backward, relu_forward, ReluCache};
use crate::layers::affine::{affine_backward, affine_forward, AffineCache, AffineGradients};
use crate::layers::conv::{conv_backward_naive, conv_forward_naive, ConvCache, ConvGradients};
use crate::layers::pool::{max_pool_backward_naive, max_pool_forward_naive, PoolCache};
use crate::tensor::Tensor;

/// Cache for [`affine_relu_backward`]
#[derive(Clone, Debug)]
pub struct AffineReluCache {
    affine: AffineCache,
    relu: ReluCache,
}

/// Affine transform followed by ReLU
pub fn affine_relu_forward(x: &Tensor, w: &Tensor, b: &Tensor) -> Result<(Tensor, AffineReluCache)> {
    let (a, affine) = affine_forward(x, w, b)?;
    let (out, relu) = relu_forward(&a);
    Ok((out, AffineReluCache { affine, relu }))
}

pub fn affine_relu_backward(grad_out: &Tensor, cache: &AffineReluCache) -> Result<AffineGradients> {
    let da = relu_backward(grad_out, &cache.relu)?;
    affine_backward(&da, &cache.affine)
}

/// Cache for [`conv_relu_pool_backward`]
#[derive(Clone, Debug)]
pub struct ConvReluPoolCache {
    conv: ConvCache,
    relu: ReluCache,
    pool: PoolCache,
}

/// Convolution, ReLU, then max pooling
pub fn conv_relu_pool_forward(
    x: &Tensor,
    w: &Tensor,
    b: &Tensor,
    conv_options: &ConvOptions,
    pool_options: &PoolOptions,
) -> Result<(Tensor, ConvReluPoolCache)> {
    let (a, conv) = conv_forward_naive(x, w, b, conv_options)?;
    let (s, relu) = relu_forward(&a);
    let (out, pool) = max_pool_forward_naive(&s, pool_options)?;
    Ok((out, ConvReluPoolCache { conv, relu, pool }))
}

pub fn conv_relu_pool_backward(
    grad_out: &Tensor,
    cache: &ConvReluPoolCache,
) -> Result<ConvGradients> {
    let ds = max_pool_backward_naive(grad_out, &cache.pool)?;
    let da = relu_backward(&ds, &cache.relu)?;
    conv_backward_naive(&da, &cache.conv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_affine_relu_matches_manual_composition() {
        let mut rng = StdRng::seed_from_u64(3);
        let x = Tensor::randn(vec![4, 2, 3], &mut rng);
        let w = Tensor::randn(vec![6, 5], &mut rng);
        let b = Tensor::randn(vec![5], &mut rng);

        let (out, cache) = affine_relu_forward(&x, &w, &b).unwrap();
        let (a, affine_cache) = affine_forward(&x, &w, &b).unwrap();
        let (expected, relu_cache) = relu_forward(&a);
        assert_eq!(out, expected);

        let dout = Tensor::randn(vec![4, 5], &mut rng);
        let grads = affine_relu_backward(&dout, &cache).unwrap();
        let manual = affine_backward(&relu_backward(&dout, &relu_cache).unwrap(), &affine_cache).unwrap();
        assert_eq!(grads.x, manual.x);
        assert_eq!(grads.w, manual.w);
        assert_eq!(grads.b, manual.b);
        assert_eq!(grads.x.shape, vec![4, 2, 3]);
    }

    #[test]
    fn test_conv_relu_pool_shapes() {
        let mut rng = StdRng::seed_from_u64(11);
        let x = Tensor::randn(vec![2, 3, 8, 8], &mut rng);
        let w = Tensor::randn(vec![4, 3, 3, 3], &mut rng);
        let b = Tensor::randn(vec![4], &mut rng);
        let conv = ConvOptions { stride: 1, pad: 1 };
        let pool = PoolOptions::default();

        let (out, cache) = conv_relu_pool_forward(&x, &w, &b, &conv, &pool).unwrap();
        assert_eq!(out.shape, vec![2, 4, 4, 4]);
        assert!(out.data.iter().all(|&v| v >= 0.0));

        let grads = conv_relu_pool_backward(&Tensor::full(out.shape.clone(), 1.0), &cache).unwrap();
        assert_eq!(grads.x.shape, x.shape);
        assert_eq!(grads.w.shape, w.shape);
        assert_eq!(grads.b.shape, vec![4]);
    }
}
