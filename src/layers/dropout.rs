//! Dropout Layer
//!
//! Dropout is a regularization technique that randomly zeros out activations
//! during training to prevent overfitting. During inference, it passes values
//! through unchanged.
//!
//! This is *inverted* dropout: `p` is the probability of **keeping** a unit,
//! and kept units are scaled by `1/p` at training time so the expected
//! activation matches test time and no rescaling is needed there.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{DropoutOptions, Mode};
use crate::error::Result;
use crate::tensor::Tensor;

/// Cache for dropout backward pass
#[derive(Clone, Debug)]
pub struct DropoutCache {
    shape: Vec<usize>,
    /// Dropout mask (true = kept, false = dropped)
    /// None in test mode
    mask: Option<Vec<bool>>,
    /// Scaling factor applied to kept values
    scale: f64,
}

impl DropoutCache {
    /// Keep mask from a training-mode forward pass
    pub fn mask(&self) -> Option<&[bool]> {
        self.mask.as_deref()
    }
}

/// Forward pass with caching for backward
///
/// # Arguments
///
/// * `x` - Input tensor, any shape
/// * `options` - Keep probability, mode and optional seed
///
/// # Returns
///
/// Tuple of (output, cache) where cache stores the dropout mask
///
/// # Example
///
/// ```rust
/// # use handgrad::{Tensor, DropoutOptions, Mode, layers::dropout_forward};
/// let x = Tensor::full(vec![4, 4], 1.0);
/// let options = DropoutOptions { p: 0.5, mode: Mode::Train, seed: Some(0) };
/// let (out, _) = dropout_forward(&x, &options).unwrap();
/// // every value is either dropped or scaled by 1/p
/// assert!(out.data.iter().all(|&v| v == 0.0 || v == 2.0));
/// ```
pub fn dropout_forward(x: &Tensor, options: &DropoutOptions) -> Result<(Tensor, DropoutCache)> {
    options.validate()?;

    if options.mode == Mode::Test {
        // No dropout - just pass through
        let cache = DropoutCache {
            shape: x.shape.clone(),
            mask: None,
            scale: 1.0,
        };
        return Ok((x.clone(), cache));
    }

    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    tracing::debug!(
        numel = x.numel(),
        p = options.p,
        seeded = options.seed.is_some(),
        "dropout mask"
    );

    let scale = 1.0 / options.p;
    let mut mask = Vec::with_capacity(x.numel());
    let mut output = Tensor::zeros(x.shape.clone());

    for (i, &v) in x.data.iter().enumerate() {
        let keep = rng.random::<f64>() < options.p;
        mask.push(keep);
        if keep {
            output.data[i] = v * scale;
        }
    }

    let cache = DropoutCache {
        shape: x.shape.clone(),
        mask: Some(mask),
        scale,
    };

    Ok((output, cache))
}

/// Backward pass through dropout
///
/// # Errors
///
/// `grad_out` must have the forward input's shape.
pub fn dropout_backward(grad_out: &Tensor, cache: &DropoutCache) -> Result<Tensor> {
    grad_out.expect_shape("dropout_backward", &cache.shape)?;
    match &cache.mask {
        Some(mask) => {
            // Apply the same mask to gradients
            let mut grad_input = Tensor::zeros(grad_out.shape.clone());
            for (i, &keep) in mask.iter().enumerate() {
                if keep {
                    grad_input.data[i] = grad_out.data[i] * cache.scale;
                }
                // else: gradient is zero (value was dropped)
            }
            Ok(grad_input)
        }
        // No dropout was applied, just pass gradient through
        None => Ok(grad_out.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn train(p: f64, seed: u64) -> DropoutOptions {
        DropoutOptions {
            p,
            mode: Mode::Train,
            seed: Some(seed),
        }
    }

    #[test]
    fn test_keep_fraction_and_mean_preserved() {
        let x = Tensor::full(vec![500, 500], 10.0);
        for p in [0.25, 0.4, 0.7] {
            let (out, cache) = dropout_forward(&x, &train(p, 123)).unwrap();
            let kept = cache.mask().unwrap().iter().filter(|&&k| k).count();
            let frac = kept as f64 / x.numel() as f64;
            assert!((frac - p).abs() < 0.01, "p={p} kept {frac}");
            let mean = out.data.iter().sum::<f64>() / out.numel() as f64;
            assert!((mean - 10.0).abs() < 0.3, "p={p} mean {mean}");
        }
    }

    #[test]
    fn test_test_mode_is_identity() {
        let x = Tensor::new(vec![1.0, -2.0, 3.0], vec![3]).unwrap();
        let options = DropoutOptions {
            p: 0.3,
            mode: Mode::Test,
            seed: None,
        };
        let (out, cache) = dropout_forward(&x, &options).unwrap();
        assert_eq!(out, x);
        assert!(cache.mask().is_none());
        let dout = Tensor::new(vec![4.0, 5.0, 6.0], vec![3]).unwrap();
        assert_eq!(dropout_backward(&dout, &cache).unwrap(), dout);
    }

    #[test]
    fn test_seed_makes_mask_reproducible() {
        let x = Tensor::full(vec![64], 1.0);
        let (a, _) = dropout_forward(&x, &train(0.5, 42)).unwrap();
        let (b, _) = dropout_forward(&x, &train(0.5, 42)).unwrap();
        let (c, _) = dropout_forward(&x, &train(0.5, 43)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_backward_routes_through_mask() {
        let x = Tensor::full(vec![10, 10], 1.0);
        let (out, cache) = dropout_forward(&x, &train(0.6, 7)).unwrap();
        let dout = Tensor::full(vec![10, 10], 3.0);
        let dx = dropout_backward(&dout, &cache).unwrap();
        for (o, g) in out.data.iter().zip(&dx.data) {
            // out = x * mask and x = 1, so grad = 3 * mask = 3 * out
            assert!((g - 3.0 * o).abs() < 1e-12);
        }
    }

    #[test]
    fn test_keep_probability_validated() {
        let x = Tensor::zeros(vec![2]);
        assert!(dropout_forward(&x, &train(0.0, 1)).is_err());
        assert!(dropout_forward(&x, &train(1.5, 1)).is_err());
        let (out, _) = dropout_forward(&Tensor::full(vec![8], 2.0), &train(1.0, 1)).unwrap();
        assert!(out.data.iter().all(|&v| v == 2.0));
    }
}
